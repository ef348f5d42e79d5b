pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod template;
