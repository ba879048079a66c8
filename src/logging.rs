//! Operator-facing exchange log.
//!
//! One JSON line per finished request, appended to a file, with the most
//! recent records also kept in memory. Nothing here is read back to serve a
//! request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_RECENT: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Upstream finished, with or without the `[DONE]` sentinel.
    Completed,
    /// Upstream failed before or during the response.
    Failed,
    /// Caller went away before the stream finished.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub timestamp: DateTime<Utc>,
    pub requested_model: String,
    pub upstream_model: String,
    pub stream: bool,
    pub outcome: Outcome,
    /// Events written to the caller (streaming only).
    #[serde(default)]
    pub events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExchangeRecord {
    pub fn new(
        requested_model: impl Into<String>,
        upstream_model: impl Into<String>,
        stream: bool,
        outcome: Outcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            requested_model: requested_model.into(),
            upstream_model: upstream_model.into(),
            stream,
            outcome,
            events: 0,
            detail: None,
        }
    }

    pub fn with_events(mut self, events: u64) -> Self {
        self.events = events;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub struct ExchangeLog {
    recent: VecDeque<ExchangeRecord>,
    writer: Option<BufWriter<File>>,
}

impl ExchangeLog {
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            recent: VecDeque::with_capacity(MAX_RECENT),
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A log that only keeps records in memory.
    pub fn in_memory() -> Self {
        Self {
            recent: VecDeque::with_capacity(MAX_RECENT),
            writer: None,
        }
    }

    pub fn record(&mut self, record: ExchangeRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{json}");
                let _ = writer.flush();
            }
        }
        if self.recent.len() >= MAX_RECENT {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExchangeRecord> {
        self.recent.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedExchangeLog(Arc<Mutex<ExchangeLog>>);

impl SharedExchangeLog {
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(ExchangeLog::open(file_path)?))))
    }

    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(ExchangeLog::in_memory())))
    }

    pub fn record(&self, record: ExchangeRecord) {
        if let Ok(mut log) = self.0.lock() {
            log.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<ExchangeRecord> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}
