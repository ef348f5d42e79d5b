use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub autoresponse: AutoResponseConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Client reference rendered into requests as `.ClientRef`
    #[serde(default = "default_client_ref")]
    pub client_ref: String,
    /// Base URL of the SIRI server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Outbound request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Deadline for a graceful stop in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_request_dir")]
    pub request_dir: String,
    #[serde(default = "default_autoresponse_dir")]
    pub autoresponse_dir: String,
    /// Auto-response template installed at startup
    pub autoresponse: Option<String>,
    /// Request template sent once at startup
    pub startup_request: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoResponseConfig {
    #[serde(default = "default_autoresponse_status")]
    pub status: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// File receiving request/response traces
    pub exchange_file: Option<String>,
}

fn default_client_ref() -> String {
    "client".to_string()
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

fn default_mailbox_capacity() -> usize {
    5
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_request_dir() -> String {
    "templates/siri/request".to_string()
}

fn default_autoresponse_dir() -> String {
    "templates/siri/autoresponse".to_string()
}

fn default_autoresponse_status() -> u16 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("client.client_ref", "client")?
            .set_default("client.server_url", "http://localhost:8080")?
            .set_default("client.listen_port", 8000)?
            .set_default("autoresponse.status", 200)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SIRI_CLIENT__SERVER_URL, SIRI_CLIENT__LISTEN_PORT, SIRI_TEMPLATES__REQUEST_DIR, etc.
            .add_source(
                Environment::with_prefix("SIRI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.client.listen_host, self.client.listen_port)
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_ref: default_client_ref(),
            server_url: default_server_url(),
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            mailbox_capacity: default_mailbox_capacity(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            request_dir: default_request_dir(),
            autoresponse_dir: default_autoresponse_dir(),
            autoresponse: None,
            startup_request: None,
        }
    }
}

impl Default for AutoResponseConfig {
    fn default() -> Self {
        Self {
            status: default_autoresponse_status(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            exchange_file: None,
        }
    }
}
