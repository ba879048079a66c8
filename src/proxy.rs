use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{ExchangeRecord, Outcome, SharedExchangeLog};
use crate::models::ModelMap;
use crate::translate::openai_types::{ChatRequest, ChatResponse};
use crate::translate::request::build_upstream_request;
use crate::translate::response::transcode_response;
use crate::translate::sse::LineReassembler;
use crate::translate::streaming::{Disposition, EventTranscoder};
use crate::translate::upstream_types::{UpstreamRequest, UpstreamResponse};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;

/// Outcome of proxying a streaming request: already-framed SSE bytes.
pub type SseStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, Infallible>> + Send>>;

/// Sends translated requests to the upstream `chat/completions` endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, config: &ProxyConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            url: config.chat_completions_url(),
            api_key: api_key.into(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the request. Transport failures and non-2xx statuses are errors.
    async fn send(&self, body: &UpstreamRequest) -> Result<reqwest::Response> {
        let accept = if body.stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, accept)
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::upstream(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProxyError::upstream_status(
                status.as_u16(),
                truncate(&text, 500).to_string(),
            ));
        }

        Ok(response)
    }
}

/// Forward a non-streaming chat request and translate the complete response.
pub async fn proxy_non_streaming(
    req: &ChatRequest,
    config: &ProxyConfig,
    models: &ModelMap,
    upstream: &UpstreamClient,
    log: &SharedExchangeLog,
) -> Result<ChatResponse> {
    let upstream_model = models.resolve(&req.model);
    let upstream_req = build_upstream_request(req, upstream_model, &config.defaults, &config.features);

    tracing::info!(url = %upstream.url(), model = %upstream_model, "POST upstream");

    let result = fetch_complete(&upstream_req, upstream).await;
    let record = ExchangeRecord::new(&req.model, upstream_model, false, Outcome::Completed);

    match result {
        Ok(resp) => {
            log.record(record);
            Ok(transcode_response(&resp, &req.model, &config.features))
        }
        Err(e) => {
            log.record(ExchangeRecord {
                outcome: Outcome::Failed,
                ..record.with_detail(e.to_string())
            });
            Err(e)
        }
    }
}

async fn fetch_complete(
    upstream_req: &UpstreamRequest,
    upstream: &UpstreamClient,
) -> Result<UpstreamResponse> {
    let response = upstream.send(upstream_req).await?;
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::upstream(format!("Failed to read response body: {e}")))?;

    tracing::debug!(body_len = body.len(), "Upstream response received");

    Ok(serde_json::from_slice(&body)?)
}

/// Forward a streaming chat request, returning the rewritten SSE byte stream.
///
/// Errors here happen before any byte reaches the caller; once the stream is
/// returned, upstream failures only end it.
pub async fn proxy_streaming(
    req: &ChatRequest,
    config: &ProxyConfig,
    models: &ModelMap,
    upstream: &UpstreamClient,
    log: &SharedExchangeLog,
) -> Result<SseStream> {
    let upstream_model = models.resolve(&req.model);
    let upstream_req = build_upstream_request(req, upstream_model, &config.defaults, &config.features);

    tracing::info!(url = %upstream.url(), model = %upstream_model, "POST upstream (streaming)");

    let response = match upstream.send(&upstream_req).await {
        Ok(r) => r,
        Err(e) => {
            log.record(
                ExchangeRecord::new(&req.model, upstream_model, true, Outcome::Failed)
                    .with_detail(e.to_string()),
            );
            return Err(e);
        }
    };

    let tracker = StreamTracker::new(log.clone(), &req.model, upstream_model);
    let stream = transcode_stream(
        response.bytes_stream(),
        EventTranscoder::new(config.features),
        config.stream.max_line_bytes,
        tracker,
    );

    Ok(Box::pin(stream))
}

/// Records how a stream ended once the pipeline is dropped. A tracker dropped
/// without a recorded outcome means the caller disconnected.
pub struct StreamTracker {
    log: Option<SharedExchangeLog>,
    requested_model: String,
    upstream_model: String,
    events: u64,
    ended: Option<(Outcome, Option<String>)>,
}

impl StreamTracker {
    pub fn new(log: SharedExchangeLog, requested_model: &str, upstream_model: &str) -> Self {
        Self {
            log: Some(log),
            requested_model: requested_model.to_string(),
            upstream_model: upstream_model.to_string(),
            events: 0,
            ended: None,
        }
    }

    /// A tracker that only emits tracing output.
    pub fn untracked() -> Self {
        Self {
            log: None,
            requested_model: String::new(),
            upstream_model: String::new(),
            events: 0,
            ended: None,
        }
    }

    fn finish(&mut self, outcome: Outcome, detail: Option<String>) {
        if self.ended.is_none() {
            self.ended = Some((outcome, detail));
        }
    }
}

impl Drop for StreamTracker {
    fn drop(&mut self) {
        let (outcome, detail) = self.ended.take().unwrap_or((Outcome::Cancelled, None));

        match outcome {
            Outcome::Cancelled => {
                tracing::info!(events = self.events, "Caller disconnected, upstream closed");
            }
            _ => tracing::info!(events = self.events, ?outcome, "Stream completed"),
        }

        if let Some(ref log) = self.log {
            let mut record = ExchangeRecord::new(
                std::mem::take(&mut self.requested_model),
                std::mem::take(&mut self.upstream_model),
                true,
                outcome,
            )
            .with_events(self.events);
            record.detail = detail;
            log.record(record);
        }
    }
}

/// Drive an upstream byte stream through line reassembly and event
/// transcoding.
///
/// The returned stream is pull-driven: the next upstream chunk is only read
/// when the caller polls for more output, and dropping it drops `byte_stream`
/// (closing the upstream connection). It ends after `[DONE]`, on upstream
/// close, on upstream error, or when a line exceeds `max_line_bytes`.
pub fn transcode_stream<S, E>(
    byte_stream: S,
    transcoder: EventTranscoder,
    max_line_bytes: usize,
    tracker: StreamTracker,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut tracker = tracker;
        let mut reassembler = LineReassembler::new(max_line_bytes);

        tokio::pin!(byte_stream);

        'read: while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream byte stream error");
                    tracker.finish(Outcome::Failed, Some(e.to_string()));
                    break;
                }
            };

            let lines = match reassembler.feed(&chunk) {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping upstream stream");
                    tracker.finish(Outcome::Failed, Some(e.to_string()));
                    break;
                }
            };

            for line in lines {
                match transcoder.transcode_line(&line) {
                    Disposition::Skip => {}
                    Disposition::Emit(bytes) => {
                        tracker.events += 1;
                        yield Ok(bytes);
                    }
                    Disposition::Done(bytes) => {
                        tracker.events += 1;
                        tracker.finish(Outcome::Completed, None);
                        yield Ok(bytes);
                        break 'read;
                    }
                }
            }
        }

        let discarded = reassembler.finish();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarding unterminated trailing line");
        }
        tracker.finish(Outcome::Completed, Some("upstream closed without [DONE]".to_string()));
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Features;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const LIMIT: usize = 64 * 1024;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = std::result::Result<Bytes, String>> {
        stream::iter(
            parts
                .iter()
                .copied()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(s: impl Stream<Item = std::result::Result<Bytes, Infallible>>) -> Vec<String> {
        s.map(|r| match r {
            Ok(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
            Err(never) => match never {},
        })
        .collect()
        .await
    }

    fn content_of(event: &str) -> String {
        let json = event
            .strip_prefix("data: ")
            .and_then(|e| e.strip_suffix("\n\n"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        value["choices"][0]["delta"]["content"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_events_reassembled_across_chunks() {
        let upstream = chunks(&[
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel",
            "lo\"}}]}\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"}}]}\n",
            "\ndata: [DO",
            "NE]\n\n",
        ]);

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::untracked(),
        ))
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(content_of(&out[0]), "Hello");
        assert_eq!(content_of(&out[1]), " world");
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_nothing_processed_after_done() {
        let upstream = chunks(&[
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::untracked(),
        ))
        .await;

        assert_eq!(out, vec!["data: [DONE]\n\n".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_events_do_not_break_stream() {
        let upstream = chunks(&[
            "data: {broken\n\n",
            ": comment\n",
            "data: {\"choices\":[]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        ]);

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::untracked(),
        ))
        .await;

        assert_eq!(out.len(), 1);
        assert_eq!(content_of(&out[0]), "ok");
    }

    #[tokio::test]
    async fn test_reasoning_merged_in_stream() {
        let upstream = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"World\",\"reasoning_content\":\"thinking...\"}}]}\n\n",
        ]);
        let transcoder = EventTranscoder::new(Features {
            show_reasoning: true,
            thinking_mode: false,
        });

        let out = collect(transcode_stream(upstream, transcoder, LIMIT, StreamTracker::untracked())).await;

        assert_eq!(content_of(&out[0]), "<think>thinking...</think>\n\nWorld");
    }

    #[tokio::test]
    async fn test_trailing_fragment_is_not_emitted() {
        let upstream = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}",
        ]);

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::untracked(),
        ))
        .await;

        assert_eq!(out.len(), 1);
        assert_eq!(content_of(&out[0]), "a");
    }

    #[tokio::test]
    async fn test_upstream_error_ends_stream() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n")),
        ]);
        let log = SharedExchangeLog::in_memory();

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::new(log.clone(), "gpt-4", "vendor/large"),
        ))
        .await;

        assert_eq!(out.len(), 1);
        let records = log.recent(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Failed);
        assert_eq!(records[0].events, 1);
        assert_eq!(records[0].detail.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_oversized_line_ends_stream() {
        let upstream = chunks(&["data: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"]);

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            16,
            StreamTracker::untracked(),
        ))
        .await;

        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_read_only_on_demand() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let upstream = stream::iter(0..100)
            .map(|i| {
                Ok::<_, String>(Bytes::from(format!(
                    "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{i}\"}}}}]}}\n\n"
                )))
            })
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let mut out = Box::pin(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::untracked(),
        ));

        let first = out.next().await.unwrap().unwrap();
        assert_eq!(content_of(std::str::from_utf8(&first).unwrap()), "0");
        assert_eq!(pulled.load(Ordering::SeqCst), 1);

        let _ = out.next().await;
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_output_closes_upstream() {
        let (mut tx, rx) = futures::channel::mpsc::channel::<std::result::Result<Bytes, String>>(4);
        let log = SharedExchangeLog::in_memory();

        let mut out = Box::pin(transcode_stream(
            rx,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::new(log.clone(), "gpt-4", "vendor/large"),
        ));

        tx.try_send(Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
        )))
        .unwrap();
        assert!(out.next().await.is_some());
        assert!(!tx.is_closed());

        drop(out);

        assert!(tx.is_closed());
        let records = log.recent(1);
        assert_eq!(records[0].outcome, Outcome::Cancelled);
        assert_eq!(records[0].events, 1);
    }

    #[tokio::test]
    async fn test_close_without_done_is_completed() {
        let log = SharedExchangeLog::in_memory();
        let upstream = chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"]);

        let out = collect(transcode_stream(
            upstream,
            EventTranscoder::default(),
            LIMIT,
            StreamTracker::new(log.clone(), "gpt-4", "vendor/large"),
        ))
        .await;

        assert_eq!(out.len(), 1);
        let records = log.recent(1);
        assert_eq!(records[0].outcome, Outcome::Completed);
        assert_eq!(
            records[0].detail.as_deref(),
            Some("upstream closed without [DONE]")
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 10), "short");
    }
}
