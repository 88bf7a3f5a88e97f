use std::ops::Range;

use fanout_core::{Error, Result};
use serde::Serialize;

use crate::state::{UploadEvent, UploadState};

/// Transfer state for one destination in one run. Never reused.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub destination: String,
    pub endpoint: String,
    /// Session id or URL handed out by INIT; `None` for single-shot.
    pub session: Option<String>,
    pub total_bytes: u64,
    /// Bytes the destination has committed. Never decreases.
    pub sent_bytes: u64,
    pub chunk_size_bytes: u64,
    pub state: UploadState,
    /// Chunks acknowledged so far; APPEND uses it as the segment index.
    pub chunks_acked: u32,
}

impl UploadSession {
    pub fn new(
        destination: impl Into<String>,
        endpoint: impl Into<String>,
        total_bytes: u64,
        chunk_size_bytes: u64,
    ) -> Self {
        Self {
            destination: destination.into(),
            endpoint: endpoint.into(),
            session: None,
            total_bytes,
            sent_bytes: 0,
            chunk_size_bytes: chunk_size_bytes.max(1),
            state: UploadState::Init,
            chunks_acked: 0,
        }
    }

    pub fn apply(&mut self, event: UploadEvent) -> Result<UploadState> {
        let next = self.state.transition(event)?;
        if next != self.state {
            tracing::debug!(
                destination = %self.destination,
                from = %self.state,
                to = %next,
                sent_bytes = self.sent_bytes,
                "upload state change"
            );
        }
        self.state = next;
        Ok(next)
    }

    /// Move the committed offset forward.
    ///
    /// A lower offset than already committed, or one past the end, means
    /// the destination contradicted itself and is a protocol error.
    pub fn advance_to(&mut self, offset: u64) -> Result<()> {
        if offset < self.sent_bytes {
            return Err(Error::upload_protocol(
                None,
                format!(
                    "destination reported offset {offset} below committed {}",
                    self.sent_bytes
                ),
            ));
        }
        if offset > self.total_bytes {
            return Err(Error::upload_protocol(
                None,
                format!("destination reported offset {offset} past total {}", self.total_bytes),
            ));
        }
        self.sent_bytes = offset;
        Ok(())
    }

    /// Byte range of the next chunk, or `None` when everything is committed.
    pub fn next_range(&self) -> Option<Range<u64>> {
        if self.is_complete() {
            return None;
        }
        let end = self
            .sent_bytes
            .saturating_add(self.chunk_size_bytes)
            .min(self.total_bytes);
        Some(self.sent_bytes..end)
    }

    pub fn is_complete(&self) -> bool {
        self.sent_bytes >= self.total_bytes
    }
}
