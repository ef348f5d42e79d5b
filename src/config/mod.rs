mod settings;

pub use settings::{AutoResponseConfig, ClientConfig, LogConfig, Settings, TemplatesConfig};
