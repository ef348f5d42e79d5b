use thiserror::Error;

use crate::client::ClientError;
use crate::telemetry::TelemetryError;
use crate::template::TemplateError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_error_converts() {
        let err: AppError = TemplateError::NotFound("siri/missing.xml".to_string()).into();
        assert!(matches!(err, AppError::Template(_)));
        assert!(err.to_string().contains("siri/missing.xml"));
    }

    #[test]
    fn test_client_error_converts() {
        let err: AppError = ClientError::InvalidStatus(1000).into();
        assert!(matches!(err, AppError::Client(ClientError::InvalidStatus(1000))));
    }
}
