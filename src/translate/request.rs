//! Build the upstream request body from an OpenAI-style chat request.

use super::openai_types::ChatRequest;
use super::upstream_types::{ExtraBody, UpstreamRequest};
use crate::config::{Features, RequestDefaults};

/// Translate a caller request into the upstream dialect.
/// Pure function: messages are forwarded verbatim, missing sampling
/// parameters take the configured defaults.
pub fn build_upstream_request(
    req: &ChatRequest,
    upstream_model: &str,
    defaults: &RequestDefaults,
    features: &Features,
) -> UpstreamRequest {
    UpstreamRequest {
        model: upstream_model.to_string(),
        messages: req.messages.clone(),
        temperature: req.temperature.unwrap_or(defaults.temperature),
        max_tokens: req.max_tokens.unwrap_or(defaults.max_tokens),
        stream: req.stream,
        extra_body: features.thinking_mode.then(ExtraBody::thinking),
    }
}
