pub mod settings;

pub use settings::{CaptureConfig, Config, ConfigError, DispatchConfig, DEFAULT_CONFIG_PATH};
