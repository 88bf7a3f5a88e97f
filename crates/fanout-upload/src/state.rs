//! Upload state machine.
//!
//! ```text
//! INIT -> UPLOADING <-> RESUMING
//!             |
//!             v
//!        FINALIZING -> DONE
//! ```
//!
//! Every non-terminal state may move to `FAILED`. Anything else is an
//! illegal transition and returns an error instead of silently continuing.

use std::fmt;

use fanout_core::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    Init,
    Uploading,
    Resuming,
    Finalizing,
    Done,
    Failed,
}

/// Inputs that drive [`UploadState::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent {
    /// INIT succeeded (possibly with no session for single-shot protocols).
    SessionOpened,
    /// A chunk was committed and more bytes remain.
    ChunkAcked,
    /// A chunk failed at the transport level.
    ChunkFailed,
    /// The server reported its committed offset.
    OffsetRecovered,
    /// Every byte is committed.
    TransferComplete,
    /// The destination is still processing.
    StillProcessing,
    /// The destination accepted the artifact.
    Finalized,
    Fail,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Next state for `event`, or an error for an illegal transition.
    pub fn transition(self, event: UploadEvent) -> Result<Self> {
        use UploadEvent as E;
        use UploadState as S;

        let next = match (self, event) {
            (s, E::Fail) if !s.is_terminal() => S::Failed,
            (S::Init, E::SessionOpened) => S::Uploading,
            (S::Uploading, E::ChunkAcked) => S::Uploading,
            (S::Uploading, E::ChunkFailed) => S::Resuming,
            (S::Resuming, E::ChunkFailed) => S::Resuming,
            (S::Resuming, E::OffsetRecovered) => S::Uploading,
            (S::Uploading, E::TransferComplete) => S::Finalizing,
            (S::Finalizing, E::StillProcessing) => S::Finalizing,
            (S::Finalizing, E::Finalized) => S::Done,
            (state, event) => {
                return Err(Error::Internal(format!(
                    "illegal upload transition: {state} on {event:?}"
                )))
            }
        };
        Ok(next)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Uploading => write!(f, "UPLOADING"),
            Self::Resuming => write!(f, "RESUMING"),
            Self::Finalizing => write!(f, "FINALIZING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
