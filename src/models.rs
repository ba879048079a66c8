//! Caller-facing model names and the upstream identifiers they resolve to.
//!
//! The table is built once at startup and handed to whoever needs it; nothing
//! mutates it afterwards.

use std::collections::BTreeMap;

/// Upstream model used when a caller asks for a name we don't know.
pub const FALLBACK_MODEL: &str = "meta/llama-3.1-8b-instruct";

/// Built-in mapping used when the config file has no `[models]` table.
const DEFAULT_MAPPING: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "nvidia/llama-3.1-nemotron-ultra-253b-v1"),
    ("gpt-4", "qwen/qwen3-coder-480b-a35b-instruct"),
    ("gpt-4-turbo", "moonshotai/kimi-k2-instruct-0905"),
    ("gpt-4o", "deepseek-ai/deepseek-v3.1"),
    ("claude-3-opus", "openai/gpt-oss-120b"),
    ("claude-3-sonnet", "openai/gpt-oss-20b"),
    ("gemini-pro", "qwen/qwen3-next-80b-a3b-thinking"),
];

#[must_use]
pub fn default_model_mapping() -> BTreeMap<String, String> {
    DEFAULT_MAPPING
        .iter()
        .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
        .collect()
}

/// Immutable lookup from caller model names to upstream identifiers.
#[derive(Debug, Clone)]
pub struct ModelMap {
    entries: BTreeMap<String, String>,
    fallback: String,
}

impl ModelMap {
    pub fn new(entries: BTreeMap<String, String>, fallback: impl Into<String>) -> Self {
        Self {
            entries,
            fallback: fallback.into(),
        }
    }

    /// Upstream identifier for `name`, or the fallback. Never fails.
    #[must_use]
    pub fn resolve(&self, name: &str) -> &str {
        self.entries
            .get(name)
            .map_or(self.fallback.as_str(), String::as_str)
    }

    /// Caller-facing names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModelMap {
    fn default() -> Self {
        Self::new(default_model_mapping(), FALLBACK_MODEL)
    }
}
