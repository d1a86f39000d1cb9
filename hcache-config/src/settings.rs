//! Typed view of the `cache` section of the YAML config.
//!
//! ```yaml
//! cache:
//!   key_headers: [Authorization, Accept-Language]
//!   mark_responses: true
//!   marker_header: x-cache-status
//!   storage_timeout_ms: 2000
//!   heuristic_freshness: false
//!   security:
//!     secret: change-me
//!   backend:
//!     kind: redis
//!     uri: redis://127.0.0.1:6379
//!     prefix: hcache
//!     ttl_secs: 86400
//! ```
//!
//! Every field has a default, so an empty section yields a working
//! in-memory cache.
use serde::Deserialize;
use std::{fmt, path::PathBuf, time::Duration};
use tracing::debug;

use crate::{ConfigError, Configurable};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Request headers whose values partition the cache key.
    pub key_headers: Vec<String>,
    /// Inject the provenance header into responses.
    pub mark_responses: bool,
    pub marker_header: String,
    pub storage_timeout_ms: u64,
    /// Allow a bounded lifetime for responses carrying only Last-Modified.
    pub heuristic_freshness: bool,
    pub security: Option<SecuritySettings>,
    pub backend: BackendSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_headers: Vec::new(),
            mark_responses: true,
            marker_header: "x-cache-status".to_string(),
            storage_timeout_ms: 2_000,
            heuristic_freshness: false,
            security: None,
            backend: BackendSettings::default(),
        }
    }
}

impl CacheSettings {
    /// Deserialize from a YAML node (usually `config["cache"]`).
    /// A null node gives the defaults.
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let settings: CacheSettings = serde_yaml::from_value(value.clone())?;
        settings.validate()?;
        debug!(?settings, "Cache settings loaded");
        Ok(settings)
    }

    /// Read the `cache` section of an application config.
    pub fn from_config<C: Configurable>(app: &C) -> Result<Self, ConfigError> {
        match app.get_config_value("cache") {
            Some(value) => Self::from_value(value),
            None => Ok(Self::default()),
        }
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "storage_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.mark_responses && self.marker_header.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "marker_header must not be empty".to_string(),
            ));
        }
        if let Some(security) = &self.security {
            security.validate()?;
        }
        self.backend.validate()
    }
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct SecuritySettings {
    /// Passphrase for payload encryption. Without it only keys are hashed.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub iterations: Option<u32>,
}

impl SecuritySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret) = &self.secret {
            if secret.is_empty() {
                return Err(ConfigError::Invalid(
                    "security.secret is set but empty".to_string(),
                ));
            }
        }
        if self.iterations == Some(0) {
            return Err(ConfigError::Invalid(
                "security.iterations must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Fjall,
    Redis,
    Mongodb,
}

/// Connection parameters, interpreted by the selected backend only.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    /// fjall: directory of the keyspace
    pub path: Option<PathBuf>,
    /// redis / mongodb: connection string
    pub uri: Option<String>,
    /// mongodb: falls back to the database named in the uri
    pub database: Option<String>,
    pub collection: Option<String>,
    /// redis: key namespace
    pub prefix: Option<String>,
    pub ttl_secs: Option<u64>,
}

impl BackendSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            BackendKind::Memory => Ok(()),
            BackendKind::Fjall if self.path.is_none() => Err(
                ConfigError::Missing("backend.path for fjall".to_string()),
            ),
            BackendKind::Redis | BackendKind::Mongodb if self.uri.is_none() => {
                Err(ConfigError::Missing(format!(
                    "backend.uri for {:?}",
                    self.kind
                )))
            }
            _ => Ok(()),
        }
    }
}
