// Connection settings for the classification backend

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ClassifyError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const BASE_URL_ENV: &str = "CLASSIFIER_BASE_URL";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Configuration for [`crate::ApiClient`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API root including the `/api` prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Overall timeout for plain REST calls. Never applied to job streams,
    /// whose duration is unbounded.
    /// An explicit `null` disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

pub fn default_request_timeout_ms() -> Option<u64> {
    Some(DEFAULT_REQUEST_TIMEOUT_MS)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults, with the base URL taken from `CLASSIFIER_BASE_URL` when set
    pub fn from_env() -> Self {
        match std::env::var(BASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Check the base URL and return it without a trailing slash
    pub fn normalized_base_url(&self) -> Result<String> {
        let url = self.base_url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClassifyError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        Ok(url.to_string())
    }
}
