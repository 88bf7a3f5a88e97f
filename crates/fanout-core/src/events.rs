//! Progress events for destination runs.
//!
//! Stages report through a [`ProgressSender`], which wraps a bounded
//! `tokio::sync::mpsc` channel that the caller drains. Frequent ticks
//! (encode progress, bytes sent) use `try_send` and are dropped when the
//! receiver falls behind; lifecycle events (stage changes, warnings,
//! terminal outcomes) are awaited so they are never lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// RunStage
// ---------------------------------------------------------------------------

/// Stage of a single destination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Probe,
    Resolve,
    Trim,
    Transcode,
    Package,
    Upload,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Resolve => write!(f, "resolve"),
            Self::Trim => write!(f, "trim"),
            Self::Transcode => write!(f, "transcode"),
            Self::Package => write!(f, "package"),
            Self::Upload => write!(f, "upload"),
            Self::Done => write!(f, "done"),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// What kind of update a [`ProgressEvent`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    /// A new stage started.
    Stage,
    /// Fractional progress within the current stage.
    Progress,
    /// Non-fatal issue (size cap still exceeded, trim fell back, ...).
    Warning,
    Completed,
    Failed,
}

/// One update from a destination run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub destination: String,
    pub stage: RunStage,
    pub kind: ProgressKind,
    /// Fraction of the current stage in `[0, 1]`, when known.
    pub fraction: Option<f32>,
    pub status: String,
    pub sent_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(destination: &str, stage: RunStage, kind: ProgressKind, status: String) -> Self {
        Self {
            destination: destination.to_string(),
            stage,
            kind,
            fraction: None,
            status,
            sent_bytes: None,
            total_bytes: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event ends the destination's run.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressKind::Completed | ProgressKind::Failed)
    }
}

// ---------------------------------------------------------------------------
// ProgressSender
// ---------------------------------------------------------------------------

/// Destination-scoped handle onto the progress channel.
///
/// Cheap to clone. A sender built with [`ProgressSender::noop`] discards
/// everything, which is what one-shot callers without a UI want.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    destination: String,
}

/// Create a bounded progress channel.
pub fn progress_channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSender {
            tx: Some(tx),
            destination: String::new(),
        },
        rx,
    )
}

impl ProgressSender {
    /// A sender that drops every event.
    pub fn noop() -> Self {
        Self {
            tx: None,
            destination: String::new(),
        }
    }

    /// Clone of this sender tagged with `destination`.
    pub fn for_destination(&self, destination: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Announce that `stage` has started.
    pub async fn stage(&self, stage: RunStage, status: impl Into<String>) {
        let event = ProgressEvent::new(&self.destination, stage, ProgressKind::Stage, status.into());
        self.send(event).await;
    }

    /// Report fractional progress. Dropped when the channel is full.
    pub fn progress(&self, stage: RunStage, fraction: f32, status: impl Into<String>) {
        let mut event =
            ProgressEvent::new(&self.destination, stage, ProgressKind::Progress, status.into());
        event.fraction = Some(fraction.clamp(0.0, 1.0));
        self.try_send(event);
    }

    /// Report upload byte progress. Dropped when the channel is full.
    pub fn bytes(&self, sent_bytes: u64, total_bytes: u64) {
        let mut event = ProgressEvent::new(
            &self.destination,
            RunStage::Upload,
            ProgressKind::Progress,
            format!("{sent_bytes}/{total_bytes} bytes"),
        );
        event.sent_bytes = Some(sent_bytes);
        event.total_bytes = Some(total_bytes);
        if total_bytes > 0 {
            event.fraction = Some((sent_bytes as f64 / total_bytes as f64) as f32);
        }
        self.try_send(event);
    }

    pub async fn warning(&self, stage: RunStage, message: impl Into<String>) {
        let event =
            ProgressEvent::new(&self.destination, stage, ProgressKind::Warning, message.into());
        self.send(event).await;
    }

    pub async fn completed(&self, status: impl Into<String>) {
        let mut event = ProgressEvent::new(
            &self.destination,
            RunStage::Done,
            ProgressKind::Completed,
            status.into(),
        );
        event.fraction = Some(1.0);
        self.send(event).await;
    }

    /// Terminal failure with the last known byte progress.
    pub async fn failed(
        &self,
        stage: RunStage,
        message: impl Into<String>,
        sent_bytes: Option<u64>,
        total_bytes: Option<u64>,
    ) {
        let mut event =
            ProgressEvent::new(&self.destination, stage, ProgressKind::Failed, message.into());
        event.sent_bytes = sent_bytes;
        event.total_bytes = total_bytes;
        self.send(event).await;
    }

    async fn send(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.tx {
            if tx.send(event).await.is_err() {
                tracing::trace!("progress receiver dropped");
            }
        }
    }

    fn try_send(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.tx {
            let _ = tx.try_send(event);
        }
    }
}
