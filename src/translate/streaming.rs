//! Per-line rewriting of upstream SSE events into OpenAI chunks.
//!
//! The [`EventTranscoder`] looks at one complete line at a time and decides
//! whether it produces output. It holds only the feature toggles, so the same
//! instance can be reused for every line of a stream.
//!
//! Usage:
//!   let transcoder = EventTranscoder::new(features);
//!   for line in reassembler.feed(&chunk)? {
//!       match transcoder.transcode_line(&line) {
//!           Disposition::Skip => {}
//!           Disposition::Emit(bytes) => send(bytes),
//!           Disposition::Done(bytes) => { send(bytes); break; }
//!       }
//!   }

use bytes::Bytes;
use serde_json::{Map, Value};

use super::response::merge_reasoning;
use crate::config::Features;

const DATA_PREFIX: &[u8] = b"data:";
const DONE_SENTINEL: &str = "[DONE]";

/// What to do with one reassembled line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Produces no output.
    Skip,
    /// A rewritten event, already framed as `data: ...\n\n`.
    Emit(Bytes),
    /// The terminal sentinel. Nothing after it should be processed.
    Done(Bytes),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventTranscoder {
    features: Features,
}

impl EventTranscoder {
    pub fn new(features: Features) -> Self {
        Self { features }
    }

    pub fn transcode_line(&self, line: &[u8]) -> Disposition {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Disposition::Skip;
        };

        let Ok(payload) = std::str::from_utf8(payload) else {
            tracing::debug!("Skipping non-UTF-8 data line");
            return Disposition::Skip;
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            return Disposition::Done(Bytes::from_static(b"data: [DONE]\n\n"));
        }

        let mut event: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable chunk");
                return Disposition::Skip;
            }
        };

        if !self.rewrite_event(&mut event) {
            return Disposition::Skip;
        }

        match serde_json::to_vec(&event) {
            Ok(json) => {
                let mut framed = Vec::with_capacity(json.len() + 8);
                framed.extend_from_slice(b"data: ");
                framed.extend_from_slice(&json);
                framed.extend_from_slice(b"\n\n");
                Disposition::Emit(Bytes::from(framed))
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to re-serialize chunk");
                Disposition::Skip
            }
        }
    }

    /// Replace the first choice's delta with a single merged `content` field.
    /// Returns false when the event has no choice to rewrite.
    fn rewrite_event(&self, event: &mut Value) -> bool {
        let Some(choice) = event
            .get_mut("choices")
            .and_then(Value::as_array_mut)
            .and_then(|choices| choices.first_mut())
            .and_then(Value::as_object_mut)
        else {
            return false;
        };

        let delta = choice.get("delta");
        let content = delta
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let reasoning = if self.features.show_reasoning {
            delta
                .and_then(|d| d.get("reasoning_content"))
                .and_then(Value::as_str)
                .unwrap_or("")
        } else {
            ""
        };

        let merged = merge_reasoning(content, reasoning, &self.features);

        let mut new_delta = Map::new();
        new_delta.insert("content".to_string(), Value::String(merged));
        choice.insert("delta".to_string(), Value::Object(new_delta));
        true
    }
}
