//! The seam between the upload engine and a destination's wire protocol.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fanout_core::config::{DestinationConfig, EndpointConfig, UploadConfig};
use fanout_core::{Error, Result};

use crate::payload::ChunkBody;
use crate::protocols::{ChunkedProtocol, ResumableProtocol, SingleShotProtocol};
use crate::session::UploadSession;

/// Destination's answer to one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAck {
    /// Chunk accepted; the destination has committed `committed` bytes.
    Incomplete { committed: u64 },
    /// The whole transfer is complete.
    Complete { artifact_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Done { artifact_id: Option<String> },
    /// Accepted but still processing; poll [`UploadProtocol::poll_status`].
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingStatus {
    InProgress,
    Succeeded { artifact_id: Option<String> },
    Failed { reason: String },
}

/// One destination transfer protocol.
///
/// Implementations classify errors: transport-level chunk failures are
/// [`Error::UploadChunk`] (resumable when [`supports_offset_query`] is
/// true), rejections are [`Error::UploadProtocol`].
///
/// [`supports_offset_query`]: UploadProtocol::supports_offset_query
#[async_trait]
pub trait UploadProtocol: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether [`query_offset`](UploadProtocol::query_offset) can recover
    /// the committed offset after a chunk failure.
    fn supports_offset_query(&self) -> bool;

    /// Chunk size to use given the configured one.
    fn chunk_size(&self, configured: u64, _total_bytes: u64) -> u64 {
        configured
    }

    /// Whether chunks must carry payload bytes. URL-pull does not.
    fn needs_payload(&self) -> bool {
        true
    }

    /// Whether an explicit completion step follows the last chunk even when
    /// the chunk response already carried an artifact id.
    fn requires_finalize(&self) -> bool {
        false
    }

    /// Open a session. Returns the session id or URL, if any.
    async fn init(&self, total_bytes: u64) -> Result<Option<String>>;

    /// Send `data`, which starts at byte `start`.
    async fn send_chunk(&self, session: &UploadSession, start: u64, data: ChunkBody)
        -> Result<ChunkAck>;

    /// Ask the destination how many bytes it has committed.
    async fn query_offset(&self, session: &UploadSession) -> Result<u64>;

    async fn finalize(&self, session: &UploadSession) -> Result<FinalizeOutcome>;

    async fn poll_status(&self, session: &UploadSession) -> Result<ProcessingStatus>;
}

/// Build the protocol adapter for a destination.
pub fn create_protocol(
    destination: &DestinationConfig,
    settings: &UploadConfig,
) -> Result<Box<dyn UploadProtocol>> {
    let timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
    let credential = destination.credential.clone();

    let protocol: Box<dyn UploadProtocol> = match &destination.endpoint {
        EndpointConfig::SingleShot {
            url,
            source_url,
            id_field,
        } => Box::new(SingleShotProtocol::new(
            url.clone(),
            credential,
            source_url.clone(),
            id_field.clone(),
            timeout,
        )?),
        EndpointConfig::Chunked {
            url,
            media_type,
            media_category,
        } => Box::new(ChunkedProtocol::new(
            url.clone(),
            credential,
            media_type.clone(),
            media_category.clone(),
            timeout,
        )?),
        EndpointConfig::Resumable {
            session_url,
            initiate_url,
            id_field,
        } => {
            if session_url.is_none() && initiate_url.is_none() {
                return Err(Error::Validation(format!(
                    "destination '{}' has neither session_url nor initiate_url",
                    destination.name
                )));
            }
            Box::new(ResumableProtocol::new(
                session_url.clone(),
                initiate_url.clone(),
                credential,
                id_field.clone(),
                timeout,
            )?)
        }
    };
    Ok(protocol)
}
