//! Drives one [`UploadProtocol`] through the upload state machine.
//!
//! Chunks go out strictly in order. A recoverable chunk failure moves the
//! session to `RESUMING`, asks the destination how much it committed and
//! continues from exactly that offset, so every byte is delivered once.

use std::time::Duration;

use bytes::Bytes;
use fanout_core::config::{DestinationConfig, UploadConfig};
use fanout_core::events::ProgressSender;
use fanout_core::{Error, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::payload::{ChunkBody, Payload};
use crate::protocol::{create_protocol, ChunkAck, FinalizeOutcome, ProcessingStatus, UploadProtocol};
use crate::session::UploadSession;
use crate::state::{UploadEvent, UploadState};

/// Proof of delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub destination: String,
    pub protocol: &'static str,
    /// Destination-reported id of the delivered artifact.
    pub artifact_id: Option<String>,
    pub total_bytes: u64,
    pub chunks_sent: u32,
    /// Successful offset recoveries.
    pub resumes: u32,
    pub status_polls: u32,
}

/// A failed upload with the last known progress.
#[derive(Debug, thiserror::Error)]
#[error("{error} (in {state} after {sent_bytes}/{total_bytes} bytes)")]
pub struct UploadFailure {
    #[source]
    pub error: Error,
    pub sent_bytes: u64,
    pub total_bytes: u64,
    /// State the session was in when the failure happened.
    pub state: UploadState,
}

impl From<UploadFailure> for Error {
    fn from(failure: UploadFailure) -> Self {
        failure.error
    }
}

#[derive(Debug, Default)]
struct Counters {
    chunks_sent: u32,
    resumes: u32,
    status_polls: u32,
    /// Failures since the last chunk that made progress.
    consecutive_failures: u32,
}

/// One upload engine per destination run.
#[derive(Debug)]
pub struct UploadEngine {
    protocol: Box<dyn UploadProtocol>,
    settings: UploadConfig,
    progress: ProgressSender,
    cancel: CancellationToken,
}

impl UploadEngine {
    pub fn new(
        protocol: Box<dyn UploadProtocol>,
        settings: UploadConfig,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            settings,
            progress,
            cancel,
        }
    }

    /// Engine for `destination` with its effective upload settings.
    pub fn for_destination(
        destination: &DestinationConfig,
        defaults: &UploadConfig,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let settings = destination.upload_settings(defaults);
        let protocol = create_protocol(destination, &settings)?;
        Ok(Self::new(protocol, settings, progress, cancel))
    }

    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    /// Deliver `payload`. On failure the session ends in `FAILED` and the
    /// returned [`UploadFailure`] carries how far it got.
    pub async fn upload(&self, payload: &Payload) -> std::result::Result<UploadReceipt, UploadFailure> {
        let total = payload.len();
        let chunk_size = self
            .protocol
            .chunk_size(self.settings.chunk_size_bytes, total);
        let mut session = UploadSession::new(
            self.progress.destination(),
            self.protocol.name(),
            total,
            chunk_size,
        );
        let mut counters = Counters::default();

        tracing::info!(
            destination = %session.destination,
            protocol = self.protocol.name(),
            total_bytes = total,
            chunk_size,
            "upload starting"
        );

        match self.drive(&mut session, payload, &mut counters).await {
            Ok(artifact_id) => {
                tracing::info!(
                    destination = %session.destination,
                    artifact_id = artifact_id.as_deref().unwrap_or("-"),
                    chunks = counters.chunks_sent,
                    resumes = counters.resumes,
                    "upload done"
                );
                Ok(UploadReceipt {
                    destination: session.destination,
                    protocol: self.protocol.name(),
                    artifact_id,
                    total_bytes: total,
                    chunks_sent: counters.chunks_sent,
                    resumes: counters.resumes,
                    status_polls: counters.status_polls,
                })
            }
            Err(error) => {
                let state = session.state;
                if !state.is_terminal() {
                    // Fail is legal from every non-terminal state.
                    let _ = session.apply(UploadEvent::Fail);
                }
                tracing::warn!(
                    destination = %session.destination,
                    state = %state,
                    sent_bytes = session.sent_bytes,
                    total_bytes = total,
                    error = %error,
                    "upload failed"
                );
                Err(UploadFailure {
                    error,
                    sent_bytes: session.sent_bytes,
                    total_bytes: total,
                    state,
                })
            }
        }
    }

    async fn drive(
        &self,
        session: &mut UploadSession,
        payload: &Payload,
        counters: &mut Counters,
    ) -> Result<Option<String>> {
        if self.protocol.needs_payload() && payload.is_empty() {
            return Err(Error::Validation("nothing to upload: payload is empty".into()));
        }
        self.check_cancelled()?;

        session.session = self.protocol.init(session.total_bytes).await?;
        session.apply(UploadEvent::SessionOpened)?;

        let (mut artifact_id, completed) = if self.protocol.needs_payload() {
            self.transfer(session, payload, counters).await?
        } else {
            self.request_pull(session, counters).await?
        };

        session.apply(UploadEvent::TransferComplete)?;
        self.progress.bytes(session.sent_bytes, session.total_bytes);

        if self.protocol.requires_finalize() || !completed {
            self.check_cancelled()?;
            match self.protocol.finalize(session).await? {
                FinalizeOutcome::Done { artifact_id: id } => {
                    artifact_id = id.or(artifact_id);
                }
                FinalizeOutcome::Pending => {
                    artifact_id = self.poll(session, counters).await?.or(artifact_id);
                }
            }
        }

        session.apply(UploadEvent::Finalized)?;
        Ok(artifact_id)
    }

    /// Send every chunk. Returns the artifact id, if the last chunk carried
    /// one, and whether the destination declared the transfer complete.
    async fn transfer(
        &self,
        session: &mut UploadSession,
        payload: &Payload,
        counters: &mut Counters,
    ) -> Result<(Option<String>, bool)> {
        while let Some(range) = session.next_range() {
            self.check_cancelled()?;

            let data = payload.chunk_body(range.start, range.end).await?;
            tracing::trace!(
                destination = %session.destination,
                start = range.start,
                end = range.end,
                "sending chunk"
            );

            let error = match self.protocol.send_chunk(session, range.start, data).await {
                Ok(ChunkAck::Complete { artifact_id }) => {
                    session.advance_to(session.total_bytes)?;
                    session.chunks_acked += 1;
                    counters.chunks_sent += 1;
                    session.apply(UploadEvent::ChunkAcked)?;
                    return Ok((artifact_id, true));
                }
                Ok(ChunkAck::Incomplete { committed }) if committed != session.sent_bytes => {
                    session.advance_to(committed)?;
                    session.chunks_acked += 1;
                    counters.chunks_sent += 1;
                    counters.consecutive_failures = 0;
                    session.apply(UploadEvent::ChunkAcked)?;
                    self.progress.bytes(session.sent_bytes, session.total_bytes);
                    continue;
                }
                Ok(ChunkAck::Incomplete { committed }) => Error::UploadChunk(format!(
                    "chunk at {} was not committed (destination holds {committed})",
                    range.start
                )),
                Err(e) => e,
            };

            if !error.is_recoverable() {
                return Err(error);
            }
            if !self.protocol.supports_offset_query() {
                tracing::warn!(
                    destination = %session.destination,
                    protocol = self.protocol.name(),
                    "chunk failed and the destination cannot report its offset"
                );
                return Err(error);
            }
            self.recover(session, error, counters).await?;
        }
        Ok((None, false))
    }

    /// URL-pull: one request, no bytes.
    async fn request_pull(
        &self,
        session: &mut UploadSession,
        counters: &mut Counters,
    ) -> Result<(Option<String>, bool)> {
        match self.protocol.send_chunk(session, 0, Bytes::new().into()).await? {
            ChunkAck::Complete { artifact_id } => {
                session.advance_to(session.total_bytes)?;
                counters.chunks_sent += 1;
                Ok((artifact_id, true))
            }
            ChunkAck::Incomplete { .. } => Err(Error::upload_protocol(
                None,
                "URL-pull request was not acknowledged as complete",
            )),
        }
    }

    /// `RESUMING`: query the committed offset until it is known or the
    /// retry budget runs out.
    async fn recover(
        &self,
        session: &mut UploadSession,
        mut last: Error,
        counters: &mut Counters,
    ) -> Result<()> {
        session.apply(UploadEvent::ChunkFailed)?;
        loop {
            counters.consecutive_failures += 1;
            if counters.consecutive_failures > self.settings.max_chunk_retries {
                return Err(last);
            }
            tracing::warn!(
                destination = %session.destination,
                attempt = counters.consecutive_failures,
                max = self.settings.max_chunk_retries,
                sent_bytes = session.sent_bytes,
                error = %last,
                "chunk failed; querying committed offset"
            );
            self.check_cancelled()?;

            match self.protocol.query_offset(session).await {
                Ok(offset) => {
                    session.advance_to(offset)?;
                    session.apply(UploadEvent::OffsetRecovered)?;
                    counters.resumes += 1;
                    tracing::info!(
                        destination = %session.destination,
                        offset,
                        total_bytes = session.total_bytes,
                        "resuming upload"
                    );
                    self.progress.bytes(session.sent_bytes, session.total_bytes);
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    last = e;
                    session.apply(UploadEvent::ChunkFailed)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `FINALIZING`: poll until the destination finishes processing.
    async fn poll(&self, session: &mut UploadSession, counters: &mut Counters) -> Result<Option<String>> {
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        for attempt in 1..=self.settings.max_poll_attempts {
            self.sleep(interval).await?;
            counters.status_polls += 1;
            match self.protocol.poll_status(session).await? {
                ProcessingStatus::InProgress => {
                    tracing::debug!(
                        destination = %session.destination,
                        attempt,
                        "destination still processing"
                    );
                    session.apply(UploadEvent::StillProcessing)?;
                }
                ProcessingStatus::Succeeded { artifact_id } => return Ok(artifact_id),
                ProcessingStatus::Failed { reason } => {
                    return Err(Error::upload_protocol(
                        None,
                        format!("destination processing failed: {reason}"),
                    ))
                }
            }
        }
        Err(Error::UploadTimeout {
            attempts: self.settings.max_poll_attempts,
        })
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
