//! Line reassembly for upstream SSE byte streams.
//!
//! Upstream chunks arrive with no alignment to line boundaries. The
//! [`LineReassembler`] is a plain state machine: feed it a chunk, get back the
//! lines completed by that chunk, and the unterminated tail stays buffered
//! until the next call. It knows nothing about transports or about what a line
//! means.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unterminated line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

#[derive(Debug)]
pub struct LineReassembler {
    pending: BytesMut,
    max_line_bytes: usize,
}

impl LineReassembler {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_line_bytes,
        }
    }

    /// Append `chunk` and return every line it completes, in arrival order,
    /// without their `\n`. The trailing fragment is retained.
    ///
    /// Fails once the retained fragment grows past the configured limit; the
    /// reassembler should not be fed again after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let line = if self.pending.is_empty() {
                Bytes::copy_from_slice(&rest[..pos])
            } else {
                self.pending.extend_from_slice(&rest[..pos]);
                self.pending.split().freeze()
            };
            lines.push(line);
            rest = &rest[pos + 1..];
        }

        self.pending.extend_from_slice(rest);
        if self.pending.len() > self.max_line_bytes {
            self.pending.clear();
            return Err(FrameError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }

        Ok(lines)
    }

    /// Bytes currently waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// End of input. An unterminated trailing fragment is dropped, never
    /// emitted; returns how many bytes were discarded.
    pub fn finish(self) -> usize {
        self.pending.len()
    }
}
