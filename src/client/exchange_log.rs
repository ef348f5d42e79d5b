//! Plain-text trace of every HTTP exchange, written to an arbitrary byte sink

use std::fmt::{self, Write as _};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Handle, RuntimeFlavor};

/// Write-only sink for request/response traces.
///
/// Failures to write are logged and otherwise ignored; nothing in the
/// client depends on the trace being written.
#[derive(Clone, Default)]
pub struct ExchangeLog {
    sink: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
}

/// One side of an exchange as it appears in the trace
pub(crate) struct Message<'a> {
    pub heading: &'a str,
    /// Lines printed between the heading and the content type
    pub lines: Vec<String>,
    pub content_type: Option<&'a str>,
    pub body: &'a str,
}

impl ExchangeLog {
    /// A log that drops everything
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn record(&self, request: Message<'_>, response: Message<'_>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let mut text = String::new();
        for message in [request, response] {
            // Formatting into a String cannot fail
            let _ = write!(text, "{message}");
        }

        let write = || {
            let mut writer = sink.lock().unwrap_or_else(PoisonError::into_inner);
            writer
                .write_all(text.as_bytes())
                .and_then(|()| writer.flush())
        };

        // Sinks are usually files. On a multi-thread runtime the worker's
        // other tasks are handed off while the write blocks.
        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(write)
            }
            _ => write(),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write exchange log");
        }
    }
}

impl fmt::Debug for ExchangeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.heading)?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        writeln!(f, "Content-Type {}", self.content_type.unwrap_or_default())?;
        writeln!(f)?;
        writeln!(f, "{}", self.body)?;
        writeln!(f)
    }
}
