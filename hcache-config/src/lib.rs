pub mod config;
#[cfg(feature = "http")]
pub mod http;
pub mod settings;

pub use config::{ConfigError, Configurable};
pub use settings::{BackendKind, BackendSettings, CacheSettings, SecuritySettings};
