use super::openai_types::{ChatResponse, ResponseChoice, ResponseMessage};
use super::upstream_types::UpstreamResponse;
use crate::config::Features;

/// Combine visible content with the reasoning side channel.
///
/// With `show_reasoning` on and non-empty reasoning the result is
/// `<think>{reasoning}</think>\n\n{content}`; otherwise it is `content`.
pub fn merge_reasoning(content: &str, reasoning: &str, features: &Features) -> String {
    if features.show_reasoning && !reasoning.is_empty() {
        format!("<think>{reasoning}</think>\n\n{content}")
    } else {
        content.to_string()
    }
}

/// Translate a complete upstream response into an OpenAI chat completion.
/// Pure function: `requested_model` is the name the caller asked for, which is
/// echoed back instead of the upstream identifier.
pub fn transcode_response(
    resp: &UpstreamResponse,
    requested_model: &str,
    features: &Features,
) -> ChatResponse {
    let choices = resp
        .choices
        .iter()
        .enumerate()
        .map(|(position, choice)| {
            let message = choice.message.as_ref();
            let content = message.and_then(|m| m.content.as_deref()).unwrap_or("");
            let reasoning = message
                .and_then(|m| m.reasoning_content.as_deref())
                .unwrap_or("");

            ResponseChoice {
                index: choice.index.unwrap_or(position as u64),
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: merge_reasoning(content, reasoning, features),
                },
                finish_reason: choice.finish_reason.clone(),
            }
        })
        .collect();

    let id = resp.id.clone().unwrap_or_else(|| {
        format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
    });

    ChatResponse {
        id,
        object: "chat.completion".to_string(),
        created: resp.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: requested_model.to_string(),
        choices,
        usage: resp
            .usage
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
    }
}
