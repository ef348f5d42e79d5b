//! Protocol client types and error definitions

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::template::TemplateError;

/// Content type of every rendered request and auto-response
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// Language reported when a content type is missing or cannot be parsed
pub const PLAINTEXT: &str = "plaintext";

/// Coarse classification of a failed outbound exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Protocol client error type
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to render template: {0}")]
    Render(#[from] TemplateError),

    #[error("Failed to send request ({kind:?}): {source}")]
    Send {
        kind: SendErrorKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Failed to bind inbound endpoint to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inbound endpoint failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Inbound endpoint did not shut down within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Inbound endpoint cannot start while {0}")]
    InvalidState(EndpointState),

    #[error("Invalid auto-response status code: {0}")]
    InvalidStatus(u16),
}

impl ClientError {
    pub(crate) fn send(source: reqwest::Error) -> Self {
        let kind = if source.is_timeout() {
            SendErrorKind::Timeout
        } else if source.is_connect() {
            SendErrorKind::Connect
        } else {
            SendErrorKind::Other
        };
        Self::Send { kind, source }
    }

    /// Kind of a `Send` failure, `None` for every other error
    pub fn send_kind(&self) -> Option<SendErrorKind> {
        match self {
            Self::Send { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type for protocol client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Lifecycle of the inbound endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Unstarted,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A request to send to the SIRI server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Full target URL
    pub url: String,

    /// Raw template text, rendered right before sending
    pub body: String,
}

impl OutboundRequest {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }
}

/// The SIRI server's answer to an [`OutboundRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResult {
    pub body: String,
    pub status: u16,
    /// Content-type subtype such as `xml` or `json`, else `plaintext`
    pub language: String,
}

/// A request pushed by the SIRI server to the inbound endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundNotification {
    pub remote_address: String,
    /// Path and query as received
    pub uri: String,
    pub body: String,
    pub language: String,
}

/// Reply returned for every inbound notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoResponse {
    /// Template text rendered per reply
    pub body: String,
    pub status: StatusCode,
}

impl AutoResponse {
    pub fn new(body: impl Into<String>, status: u16) -> ClientResult<Self> {
        let status = StatusCode::from_u16(status).map_err(|_| ClientError::InvalidStatus(status))?;
        Ok(Self {
            body: body.into(),
            status,
        })
    }
}

impl Default for AutoResponse {
    fn default() -> Self {
        Self {
            body: String::new(),
            status: StatusCode::OK,
        }
    }
}

/// Derive the display language from a `Content-Type` header value.
///
/// `application/xml; charset=utf-8` yields `xml`. Anything that is not a
/// `type/subtype` media type with well-formed parameters yields `plaintext`.
pub fn language_from_content_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(media_subtype)
        .unwrap_or_else(|| PLAINTEXT.to_string())
}

fn media_subtype(content_type: &str) -> Option<String> {
    let (media_type, parameters) = match content_type.find(';') {
        Some(i) => content_type.split_at(i),
        None => (content_type, ""),
    };
    let (kind, subtype) = media_type.trim().split_once('/')?;
    if !is_token(kind) || !is_token(subtype) || !valid_parameters(parameters) {
        return None;
    }
    Some(subtype.to_ascii_lowercase())
}

/// Check a `; name=value` parameter list. Values are tokens or quoted
/// strings; a trailing `;` is tolerated.
fn valid_parameters(mut rest: &str) -> bool {
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return true;
        }
        let Some(parameter) = rest.strip_prefix(';') else {
            return false;
        };
        let parameter = parameter.trim_start();
        if parameter.is_empty() {
            return true;
        }

        let name_len = token_len(parameter);
        if name_len == 0 {
            return false;
        }
        let Some(value) = parameter[name_len..].trim_start().strip_prefix('=') else {
            return false;
        };
        let value = value.trim_start();

        let value_len = if value.starts_with('"') {
            match quoted_len(value) {
                Some(len) => len,
                None => return false,
            }
        } else {
            token_len(value)
        };
        if value_len == 0 {
            return false;
        }
        rest = &value[value_len..];
    }
}

/// Length of the quoted string at the start of `s`, quotes included
fn quoted_len(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?= ";

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !SEPARATORS.contains(&b)
}

fn token_len(s: &str) -> usize {
    s.bytes().take_while(|&b| is_token_byte(b)).count()
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && token_len(s) == s.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_content_type() {
        let cases = [
            (Some("application/xml"), "xml"),
            (Some("text/xml"), "xml"),
            (Some("application/json"), "json"),
            (Some("text/csv"), "csv"),
            (Some("Text/XML; charset=UTF-8"), "xml"),
            (Some("application/soap+xml"), "soap+xml"),
            (Some("SOMETHING-STRANGE"), "plaintext"),
            (Some("text/"), "plaintext"),
            (Some("/xml"), "plaintext"),
            (Some("text/x/ml"), "plaintext"),
            (Some("text/xml;"), "xml"),
            (Some("text/xml; charset=\"utf-8\""), "xml"),
            (Some("text/xml; charset=utf-8; q=0.9"), "xml"),
            (Some("text/xml; charset"), "plaintext"),
            (Some("text/xml; =utf-8"), "plaintext"),
            (Some("text/xml; charset="), "plaintext"),
            (Some("text/xml; charset=\"utf-8"), "plaintext"),
            (Some("text/xml; charset=utf 8"), "plaintext"),
            (Some(""), "plaintext"),
            (None, "plaintext"),
        ];

        for (content_type, expected) in cases {
            assert_eq!(
                language_from_content_type(content_type),
                expected,
                "content type {content_type:?}"
            );
        }
    }

    #[test]
    fn test_auto_response_status_validation() {
        let response = AutoResponse::new("<ack/>", 202).unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);

        assert!(matches!(
            AutoResponse::new("", 42),
            Err(ClientError::InvalidStatus(42))
        ));
        assert!(matches!(
            AutoResponse::new("", 1000),
            Err(ClientError::InvalidStatus(1000))
        ));
    }

    #[test]
    fn test_auto_response_default() {
        let response = AutoResponse::default();
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_endpoint_state_display() {
        let error = ClientError::InvalidState(EndpointState::Running);
        assert_eq!(error.to_string(), "Inbound endpoint cannot start while running");
    }
}
