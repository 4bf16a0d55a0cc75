//! Client configuration
//!
//! # Environment Overrides
//! - `QVERSE_API_URL`: REST API base URL
//! - `QVERSE_WS_URL`: realtime WebSocket endpoint
//!
//! Everything else is set through the `with_*` builders.

use std::time::Duration;
use url::Url;

use crate::error::{ClientError, Result};
use crate::{DEFAULT_API_BASE, DEFAULT_WS_ENDPOINT};

pub const API_URL_ENV: &str = "QVERSE_API_URL";
pub const WS_URL_ENV: &str = "QVERSE_WS_URL";

/// Settings shared by the API and realtime clients
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// REST base URL, endpoints are appended verbatim
    pub api_base_url: String,
    /// WebSocket endpoint
    pub ws_url: String,
    /// Per-attempt HTTP timeout
    pub request_timeout: Duration,
    /// Additional attempts after the first one
    pub retries: u32,
    /// Delay before the first request retry, doubled each retry
    pub retry_base_delay: Duration,
    /// Delay before the first reconnect, doubled each attempt
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            ws_url: DEFAULT_WS_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(30),
            retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            reconnect_base_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
        }
    }
}

impl ClientConfig {
    /// Defaults with URL overrides from the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(api) = non_empty_env(API_URL_ENV) {
            config.api_base_url = api;
        }
        if let Some(ws) = non_empty_env(WS_URL_ENV) {
            config.ws_url = ws;
        }
        config
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self
    }

    /// Check that both URLs parse and the WebSocket one uses ws/wss
    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_base_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "API base URL must be http(s): {}",
                self.api_base_url
            )));
        }

        let ws = Url::parse(&self.ws_url)?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(ClientError::Config(format!(
                "WebSocket URL must be ws(s): {}",
                self.ws_url
            )));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE);
        assert_eq!(config.ws_url, "ws://localhost:8080/ws");
        assert_eq!(config.retries, 3);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_schemes() {
        let config = ClientConfig::default().with_ws_url("http://localhost:8080/ws");
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config = ClientConfig::default().with_api_base_url("ws://localhost/api");
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config = ClientConfig::default().with_api_base_url("/api");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::default()
            .with_retries(5, Duration::from_millis(10))
            .with_reconnect(2, Duration::from_millis(20));
        assert_eq!(config.retries, 5);
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(20));
    }
}
