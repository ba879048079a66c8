//! Type definitions for the upstream gateway dialect.
//!
//! The upstream speaks an OpenAI-like protocol with two additions: a
//! `reasoning_content` side channel next to `content`, and an
//! `extra_body.chat_template_kwargs` switch for thinking mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Request types (what we send TO the upstream)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub temperature: f64,
    pub max_tokens: u64,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_body: Option<ExtraBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraBody {
    pub chat_template_kwargs: ChatTemplateKwargs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTemplateKwargs {
    pub thinking: bool,
}

impl ExtraBody {
    #[must_use]
    pub fn thinking() -> Self {
        Self {
            chat_template_kwargs: ChatTemplateKwargs { thinking: true },
        }
    }
}

// ---------------------------------------------------------------------------
// Non-streaming response (what the upstream sends back)
// ---------------------------------------------------------------------------

/// Lenient view of a complete upstream response; every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub choices: Vec<UpstreamChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamChoice {
    #[serde(default)]
    pub index: Option<u64>,
    #[serde(default)]
    pub message: Option<UpstreamMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}
