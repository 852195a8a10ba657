//! Client Configuration
//!
//! Defines the configuration schema for the API endpoint and retry behaviour.

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::engine::RetryPolicy;

/// Configuration for the completion API client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL for the API
    pub base_url: String,

    /// Environment variable that overrides `base_url` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url_env: Option<String>,

    /// Literal API key. Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Organization header value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// Additional headers to send with requests
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Whole-request timeout; long generations need a generous value
    pub timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Retries after the initial attempt of one logical call
    pub max_retries: u32,

    /// Space retries with exponential backoff instead of retrying at once
    pub retry_backoff: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            base_url_env: Some("OPENAI_BASE_URL".to_string()),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            organization: None,
            headers: HashMap::new(),
            timeout_secs: 300,
            connect_timeout_secs: 10,
            max_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            retry_backoff: false,
        }
    }
}

impl ClientConfig {
    /// Get the effective base URL (from env var if configured, otherwise default)
    pub fn get_base_url(&self) -> String {
        if let Some(env_var) = &self.base_url_env {
            if let Ok(url) = std::env::var(env_var) {
                if !url.is_empty() {
                    return url;
                }
            }
        }
        self.base_url.clone()
    }

    /// Get the API key: the literal key first, then the env var
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }

        self.api_key_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_retries);
        if self.retry_backoff {
            policy.with_backoff(ExponentialBackoff {
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(30),
                multiplier: 2.0,
                max_elapsed_time: Some(Duration::from_secs(120)),
                ..Default::default()
            })
        } else {
            policy
        }
    }
}
