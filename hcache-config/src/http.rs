//! Builder for the `reqwest::Client` that does the actual network work
//! underneath the cache.
//!
//! # Example
//! ```no_run
//! use hcache_config::http::{HttpClientParams, build_http_client};
//! use serde_yaml::Value;
//!
//! let config: Value = serde_yaml::from_str(r#"
//! http:
//!     timeout: 30
//!     connect_timeout: 10
//! "#).unwrap();
//!
//! let params = HttpClientParams::from_config(&config["http"], "my-crawler/1.0")
//!     .unwrap();
//! let client = build_http_client(params).unwrap();
//! ```
use std::time::Duration;

use crate::ConfigError;

/// Parameters for configuring an HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientParams<'a> {
    pub timeout: u64,
    pub connect_timeout: u64,
    pub user_agent: &'a str,
}

impl<'a> HttpClientParams<'a> {
    /// Creates an HttpClientParams instance from a YAML configuration.
    ///
    /// ```yaml
    /// http:
    ///     timeout: 30
    ///     connect_timeout: 10
    /// ```
    pub fn from_config(
        http_config: &serde_yaml::Value,
        user_agent: &'a str,
    ) -> Result<Self, ConfigError> {
        let timeout = http_config["timeout"]
            .as_u64()
            .ok_or_else(|| ConfigError::Missing("http.timeout".to_string()))?;
        let connect_timeout =
            http_config["connect_timeout"].as_u64().ok_or_else(|| {
                ConfigError::Missing("http.connect_timeout".to_string())
            })?;

        Ok(Self {
            timeout,
            connect_timeout,
            user_agent,
        })
    }
}

/// Builds a reqwest client with rustls, the configured timeouts and the
/// user agent.
///
/// Redirects are followed by reqwest itself; the cache sees and stores
/// the final response under the originally requested URL.
pub fn build_http_client(
    params: HttpClientParams,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(Duration::from_secs(params.timeout))
        .connect_timeout(Duration::from_secs(params.connect_timeout))
        .user_agent(params.user_agent)
        .build()
}
