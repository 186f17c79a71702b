//! Client settings: TOML file, then environment, then command-line flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_BASE_URL: &str = "MYMAP_BASE_URL";
pub const ENV_API_KEY: &str = "MYMAP_API_KEY";
pub const ENV_MODEL: &str = "MYMAP_MODEL";
pub const ENV_USER: &str = "MYMAP_USER";

/// Configuration for a [`crate::ChatSession`].
///
/// Defaults:
/// - base_url: `http://localhost:8088`
/// - model: `mymap-ai`
/// - request_timeout_secs: 180
/// - fence_label: `mymap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server root; the chat endpoint is `{base_url}/v1/chat/completions`.
    pub base_url: String,
    /// Sent as a bearer credential when set.
    pub api_key: Option<String>,
    pub model: String,
    /// Session key the server uses to keep conversation context.
    pub user: String,
    pub request_timeout_secs: u64,
    /// Info string that marks a fenced block as visual markup.
    pub fence_label: String,
    pub known_models: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8088".to_string(),
            api_key: None,
            model: "mymap-ai".to_string(),
            user: "mymap-chat".to_string(),
            request_timeout_secs: 180,
            fence_label: "mymap".to_string(),
            known_models: vec!["mymap-ai".to_string(), "mymap-ai-vision".to_string()],
        }
    }
}

impl Settings {
    /// Load from `path` if given (a missing file is an error), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(settings.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `MYMAP_*` overrides looked up through `lookup`. Empty values
    /// are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_BASE_URL) {
            self.base_url = v;
        }
        if let Some(v) = get(ENV_API_KEY) {
            self.api_key = Some(v);
        }
        if let Some(v) = get(ENV_MODEL) {
            self.model = v;
        }
        if let Some(v) = get(ENV_USER) {
            self.user = v;
        }
        self
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
