use crate::error::{ProxyError, Result};
use crate::models::{default_model_mapping, ModelMap, FALLBACK_MODEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub defaults: RequestDefaults,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_model_mapping")]
    pub models: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Values filled in when the caller leaves them out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

/// Deploy-time toggles. Read-only once the server is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Splice `reasoning_content` into the visible content as a `<think>` block.
    #[serde(default)]
    pub show_reasoning: bool,
    /// Ask the upstream to run its chat template in thinking mode.
    #[serde(default)]
    pub thinking_mode: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Largest unterminated line kept while waiting for its newline.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "NIM_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_temperature() -> f64 {
    0.6
}

fn default_max_tokens() -> u64 {
    9024
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

fn default_fallback_model() -> String {
    FALLBACK_MODEL.to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            defaults: RequestDefaults::default(),
            features: Features::default(),
            stream: StreamConfig::default(),
            fallback_model: default_fallback_model(),
            models: default_model_mapping(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Apply `PORT` and `NIM_BASE_URL` from the environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ProxyError::config(format!("PORT is not a valid port: '{port}'")))?;
        }
        if let Some(url) = lookup("NIM_BASE_URL") {
            self.upstream.base_url = url;
        }
        Ok(())
    }

    /// Check the constraints the request builder and model mapper rely on.
    pub fn validate(&self) -> Result<()> {
        if self.fallback_model.trim().is_empty() {
            return Err(ProxyError::config("fallback_model must not be empty"));
        }
        if let Some((name, _)) = self
            .models
            .iter()
            .find(|(_, target)| **target == self.fallback_model)
        {
            return Err(ProxyError::config(format!(
                "Model '{name}' maps onto the fallback model '{}'; the fallback must be distinct",
                self.fallback_model
            )));
        }
        if !(0.0..=1.0).contains(&self.defaults.temperature) {
            return Err(ProxyError::config(format!(
                "defaults.temperature must be within [0, 1], got {}",
                self.defaults.temperature
            )));
        }
        if self.defaults.max_tokens == 0 {
            return Err(ProxyError::config("defaults.max_tokens must be positive"));
        }
        if self.stream.max_line_bytes == 0 {
            return Err(ProxyError::config("stream.max_line_bytes must be positive"));
        }
        Ok(())
    }

    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.upstream.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your upstream API key.",
                self.upstream.api_key_env
            ))
        })
    }

    #[must_use]
    pub fn model_map(&self) -> ModelMap {
        ModelMap::new(self.models.clone(), self.fallback_model.clone())
    }

    #[must_use]
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.upstream.base_url.trim_end_matches('/'))
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("nim-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("nim-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("nim-proxy").join("config.toml"));
        paths.push(home.join(".nim-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
