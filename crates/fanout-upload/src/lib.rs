//! Resumable upload engine.
//!
//! [`UploadEngine`] walks an [`UploadSession`] through the [`UploadState`]
//! machine against one [`UploadProtocol`]:
//!
//! - [`SingleShotProtocol`]: one `PUT`, or a URL-pull `POST`
//! - [`ChunkedProtocol`]: INIT / APPEND / FINALIZE with STATUS polling
//! - [`ResumableProtocol`]: byte-range `PUT` with offset recovery

pub mod engine;
pub mod payload;
pub mod protocol;
pub mod protocols;
pub mod session;
pub mod state;

pub use engine::{UploadEngine, UploadFailure, UploadReceipt};
pub use payload::{ChunkBody, Payload};
pub use protocol::{
    create_protocol, ChunkAck, FinalizeOutcome, ProcessingStatus, UploadProtocol,
};
pub use protocols::{ChunkedProtocol, ResumableProtocol, SingleShotProtocol};
pub use session::UploadSession;
pub use state::{UploadEvent, UploadState};
