//! Sandboxed, read-only access to a directory of XML templates

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::types::{Template, TemplateError, TemplateResult};

const TEMPLATE_EXTENSION: &str = ".xml";

/// Template storage confined to a root directory.
///
/// Templates are re-read from disk on every access. Every name handed to
/// [`TemplateStore::get`] is resolved and checked against the canonical root
/// before any file content is read.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    /// Open a template store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> TemplateResult<Self> {
        let root = root.as_ref();

        let metadata = match fs::metadata(root) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::RootNotFound(root.to_path_buf()))
            }
            Err(e) => return Err(TemplateError::io(root, e)),
        };

        if !metadata.is_dir() {
            return Err(TemplateError::NotADirectory(root.to_path_buf()));
        }

        let canonical = root
            .canonicalize()
            .map_err(|e| TemplateError::io(root, e))?;

        tracing::debug!(root = %canonical.display(), "Template store opened");

        Ok(Self { root: canonical })
    }

    /// Canonical root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the root for `.xml` files.
    ///
    /// Entries are visited in lexical order per directory, so repeated calls
    /// yield the same sequence as long as the tree is unchanged.
    pub fn list(&self) -> TemplateNames {
        TemplateNames::new(self.root.clone())
    }

    /// Collect all template names, failing on the first traversal error
    pub fn names(&self) -> TemplateResult<Vec<String>> {
        self.list().collect()
    }

    /// Read a template by its name relative to the root
    pub fn get(&self, name: &str) -> TemplateResult<Template> {
        let path = self.resolve(name)?;

        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TemplateError::NotFound(name.to_string()),
            _ => TemplateError::io(&path, e),
        })?;

        Ok(Template {
            name: name.to_string(),
            content,
        })
    }

    fn resolve(&self, name: &str) -> TemplateResult<PathBuf> {
        let relative = Path::new(name);

        // Lexical pass: reject anything that climbs above the root or is
        // anchored somewhere else.
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| TemplateError::PathEscape(name.to_string()))?;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(TemplateError::PathEscape(name.to_string()));
                }
            }
        }

        if depth == 0 {
            return Err(TemplateError::NotFound(name.to_string()));
        }

        // Resolve symlinks, then confirm the target is still inside the root.
        let candidate = self.root.join(relative);
        let resolved = match candidate.canonicalize() {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(name.to_string()))
            }
            Err(e) => return Err(TemplateError::io(candidate, e)),
        };

        if !resolved.starts_with(&self.root) {
            tracing::warn!(
                name = %name,
                resolved = %resolved.display(),
                "Rejected template path outside of the template root"
            );
            return Err(TemplateError::PathEscape(name.to_string()));
        }

        if !resolved.is_file() {
            return Err(TemplateError::NotFound(name.to_string()));
        }

        Ok(resolved)
    }
}

/// Iterator over template names produced by [`TemplateStore::list`].
///
/// Directories are read only when the walk reaches them. After a traversal
/// error is yielded the iterator is exhausted.
#[derive(Debug)]
pub struct TemplateNames {
    root: PathBuf,
    pending: Vec<Entry>,
}

#[derive(Debug)]
enum Entry {
    Dir(Vec<String>),
    File(String),
}

impl TemplateNames {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            pending: vec![Entry::Dir(Vec::new())],
        }
    }

    fn read_dir(&self, segments: &[String]) -> TemplateResult<Vec<Entry>> {
        let dir = segments.iter().fold(self.root.clone(), |path, s| path.join(s));

        let mut children = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| TemplateError::io(&dir, e))? {
            let entry = entry.map_err(|e| TemplateError::io(&dir, e))?;
            // file_type() does not follow symlinks, so linked entries are skipped
            let file_type = entry.file_type().map_err(|e| TemplateError::io(entry.path(), e))?;
            children.push((entry.file_name(), file_type));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(children.len());
        for (file_name, file_type) in children {
            let file_name = file_name.to_string_lossy().into_owned();
            let mut path: Vec<String> = segments.to_vec();
            path.push(file_name);

            if file_type.is_dir() {
                entries.push(Entry::Dir(path));
            } else if file_type.is_file() && path.last().is_some_and(|n| n.ends_with(TEMPLATE_EXTENSION)) {
                entries.push(Entry::File(path.join("/")));
            }
        }

        Ok(entries)
    }
}

impl Iterator for TemplateNames {
    type Item = TemplateResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.pending.pop() {
            match entry {
                Entry::File(name) => return Some(Ok(name)),
                Entry::Dir(segments) => match self.read_dir(&segments) {
                    Ok(children) => self.pending.extend(children.into_iter().rev()),
                    Err(e) => {
                        self.pending.clear();
                        return Some(Err(e));
                    }
                },
            }
        }
        None
    }
}

/// Open a store, logging and returning `None` when the root is unusable
pub fn open_optional(root: impl AsRef<Path>) -> Option<TemplateStore> {
    match TemplateStore::open(root.as_ref()) {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "Template directory unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "siri/test.xml", "<Siri>{{ .ClientRef }}</Siri>");
        write(dir.path(), "siri/test2.xml", "<Siri/>");
        write(dir.path(), "vdv453/test.xml", "<vdv/>");
        write(dir.path(), "vdv453/ans/test.xml", "<ans/>");
        write(dir.path(), "vdv453/notes.txt", "not a template");
        dir
    }

    #[test]
    fn test_open_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            TemplateStore::open(&missing),
            Err(TemplateError::RootNotFound(_))
        ));
    }

    #[test]
    fn test_open_file_as_root() {
        let dir = fixture();
        assert!(matches!(
            TemplateStore::open(dir.path().join("vdv453/notes.txt")),
            Err(TemplateError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_list_recursive_in_lexical_order() {
        let dir = fixture();
        let store = TemplateStore::open(dir.path()).unwrap();

        let names = store.names().unwrap();
        assert_eq!(
            names,
            vec![
                "siri/test.xml",
                "siri/test2.xml",
                "vdv453/ans/test.xml",
                "vdv453/test.xml",
            ]
        );
        assert_eq!(store.names().unwrap(), names);
    }

    #[test]
    fn test_list_subfolder_and_empty() {
        let dir = fixture();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let sub = TemplateStore::open(dir.path().join("vdv453")).unwrap();
        assert_eq!(sub.names().unwrap(), vec!["ans/test.xml", "test.xml"]);

        let empty = TemplateStore::open(dir.path().join("empty")).unwrap();
        assert!(empty.names().unwrap().is_empty());
    }

    #[test]
    fn test_list_is_lazy_and_restartable() {
        let dir = fixture();
        let store = TemplateStore::open(dir.path()).unwrap();

        let first: Vec<_> = store.list().take(1).map(Result::unwrap).collect();
        assert_eq!(first, vec!["siri/test.xml"]);
        assert_eq!(store.list().count(), 4);
    }

    #[test]
    fn test_get_reads_content() {
        let dir = fixture();
        let store = TemplateStore::open(dir.path()).unwrap();

        let template = store.get("siri/test.xml").unwrap();
        assert_eq!(template.name, "siri/test.xml");
        assert_eq!(template.content, "<Siri>{{ .ClientRef }}</Siri>");

        // Harmless detours that stay inside the root are fine
        let template = store.get("vdv453/../siri/./test2.xml").unwrap();
        assert_eq!(template.content, "<Siri/>");
    }

    #[test]
    fn test_get_missing() {
        let dir = fixture();
        let store = TemplateStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.get("siri/DOES-NOT-EXIST.xml"),
            Err(TemplateError::NotFound(_))
        ));
        assert!(matches!(store.get("siri"), Err(TemplateError::NotFound(_))));
        assert!(matches!(store.get(""), Err(TemplateError::NotFound(_))));
    }

    #[test]
    fn test_get_rejects_parent_escape() {
        let outer = TempDir::new().unwrap();
        write(outer.path(), "secret.xml", "<secret/>");
        write(outer.path(), "templates/ok.xml", "<ok/>");
        let store = TemplateStore::open(outer.path().join("templates")).unwrap();

        assert!(matches!(
            store.get("../secret.xml"),
            Err(TemplateError::PathEscape(_))
        ));
        assert!(matches!(
            store.get("a/../../secret.xml"),
            Err(TemplateError::PathEscape(_))
        ));
    }

    #[test]
    fn test_get_rejects_absolute_path() {
        let outer = TempDir::new().unwrap();
        write(outer.path(), "secret.xml", "<secret/>");
        write(outer.path(), "templates/ok.xml", "<ok/>");
        let store = TemplateStore::open(outer.path().join("templates")).unwrap();

        let absolute = outer.path().join("secret.xml");
        assert!(matches!(
            store.get(absolute.to_str().unwrap()),
            Err(TemplateError::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_get_rejects_symlink_escape() {
        let outer = TempDir::new().unwrap();
        write(outer.path(), "secret.xml", "<secret/>");
        write(outer.path(), "templates/ok.xml", "<ok/>");
        std::os::unix::fs::symlink(
            outer.path().join("secret.xml"),
            outer.path().join("templates/innocent.xml"),
        )
        .unwrap();
        let store = TemplateStore::open(outer.path().join("templates")).unwrap();

        assert!(matches!(
            store.get("innocent.xml"),
            Err(TemplateError::PathEscape(_))
        ));
        // Symlinked entries are not listed either
        assert_eq!(store.names().unwrap(), vec!["ok.xml"]);
    }
}
