//! Client configuration.
//!
//! Read from `<root>/.pi/settings.json` when present, with environment
//! variables filling the gaps:
//! - `PI_BASE_URL`
//! - `PI_API_TOKEN`
//! - `PI_WORKSPACE_ID`
//! - `PI_WORKSPACE_SLUG`
//! - `PI_LLM_MODEL`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Default request timeout for non-streaming calls
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection and default-scope settings for the Pi API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiConfig {
    /// API root, e.g. `https://pi.example.com`
    #[serde(default)]
    pub base_url: String,
    /// Bearer token; never read from the settings file
    #[serde(skip)]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl PiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            workspace_id: None,
            workspace_slug: None,
            default_model: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Build configuration from environment variables only.
    pub fn from_env() -> ChatResult<Self> {
        let base_url = env_var("PI_BASE_URL")
            .ok_or_else(|| ChatError::Config("PI_BASE_URL is not set".to_string()))?;
        let mut config = Self::new(base_url);
        config.apply_env();
        Ok(config)
    }

    /// Load `<root>/.pi/settings.json`, then let the environment fill gaps.
    pub fn from_settings(workspace_root: &Path) -> ChatResult<Self> {
        let settings_path = workspace_root.join(".pi").join("settings.json");
        if !settings_path.exists() {
            return Self::from_env();
        }

        let content = std::fs::read_to_string(&settings_path)?;
        let mut config: PiConfig = serde_json::from_str(&content).map_err(|e| {
            ChatError::Config(format!("Invalid settings file {}: {}", settings_path.display(), e))
        })?;
        if config.base_url.is_empty() {
            config.base_url = env_var("PI_BASE_URL").unwrap_or_default();
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Fill unset fields from the environment.
    fn apply_env(&mut self) {
        if self.api_token.is_none() {
            self.api_token = env_var("PI_API_TOKEN");
        }
        if self.workspace_id.is_none() {
            self.workspace_id = env_var("PI_WORKSPACE_ID");
        }
        if self.workspace_slug.is_none() {
            self.workspace_slug = env_var("PI_WORKSPACE_SLUG");
        }
        if self.default_model.is_none() {
            self.default_model = env_var("PI_LLM_MODEL");
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        if self.base_url.is_empty() {
            return Err(ChatError::Config("base URL is empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ChatError::Config(format!(
                "base URL must start with http:// or https://: {}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Absolute URL for an API path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
