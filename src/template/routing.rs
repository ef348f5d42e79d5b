//! Routing hints embedded in request templates as `<!-- path: /siri/et.xml -->`

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// First capture group holds the URL path
    static ref ROUTING_HINT: Regex = Regex::new(r"<!--\s*path:\s*(.*?)\s*-->").unwrap();
}

/// Return the value of the first `<!-- path: ... -->` marker, if any
pub fn extract_routing_hint(text: &str) -> Option<String> {
    ROUTING_HINT
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Join a base URL and a routing hint without doubling or dropping the `/`
pub fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) if !path.is_empty() => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}
