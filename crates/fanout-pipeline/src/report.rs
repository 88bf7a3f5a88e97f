//! What a fan-out returns: one delivered report or one structured failure
//! per destination.

use bytes::Bytes;
use fanout_av::TrimMethod;
use fanout_core::events::RunStage;
use fanout_core::{DeliveryFormat, DestinationRunId, Error, RunId, SourceMedia};
use fanout_rules::Resolution;
use fanout_upload::UploadReceipt;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

/// How the delivered file was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Processing {
    /// The source went out unchanged.
    Original,
    Trimmed { method: TrimMethod },
    /// Trimming failed but the source already fit the size cap.
    TrimFallback,
    Transcoded { engine: String },
}

/// HLS artifacts the caller publishes alongside the uploaded payload.
#[derive(Debug, Clone, Serialize)]
pub struct HlsArtifacts {
    pub manifest: String,
    pub payload_uri: String,
    pub segment_count: usize,
    /// JPEG bytes of the representative frame.
    #[serde(skip)]
    pub thumbnail: Option<Bytes>,
    pub thumbnail_bytes: usize,
}

/// A destination that reached `DONE`.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationReport {
    pub run_id: DestinationRunId,
    pub destination: String,
    pub resolution: Resolution,
    pub processing: Processing,
    pub delivery: DeliveryFormat,
    pub output_duration_secs: f64,
    pub output_bytes: u64,
    pub artifact_id: Option<String>,
    pub upload: UploadReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls: Option<HlsArtifacts>,
    /// Non-fatal issues met along the way.
    pub warnings: Vec<String>,
}

/// A destination that failed, with the last known progress.
#[derive(Debug, thiserror::Error)]
#[error("destination '{destination}' failed during {stage}: {error}")]
pub struct RunFailure {
    pub destination: String,
    pub stage: RunStage,
    pub sent_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    #[source]
    pub error: Error,
}

impl RunFailure {
    pub fn new(destination: impl Into<String>, stage: RunStage, error: Error) -> Self {
        Self {
            destination: destination.into(),
            stage,
            sent_bytes: None,
            total_bytes: None,
            error,
        }
    }

    pub fn with_bytes(mut self, sent_bytes: u64, total_bytes: u64) -> Self {
        self.sent_bytes = Some(sent_bytes);
        self.total_bytes = Some(total_bytes);
        self
    }
}

impl Serialize for RunFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RunFailure", 6)?;
        s.serialize_field("destination", &self.destination)?;
        s.serialize_field("stage", &self.stage)?;
        s.serialize_field("kind", self.error.kind())?;
        s.serialize_field("message", &self.error.to_string())?;
        s.serialize_field("sent_bytes", &self.sent_bytes)?;
        s.serialize_field("total_bytes", &self.total_bytes)?;
        s.end()
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DestinationOutcome {
    Delivered(DestinationReport),
    Failed(RunFailure),
}

impl DestinationOutcome {
    pub fn destination(&self) -> &str {
        match self {
            Self::Delivered(r) => &r.destination,
            Self::Failed(f) => &f.destination,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

impl From<Result<DestinationReport, RunFailure>> for DestinationOutcome {
    fn from(result: Result<DestinationReport, RunFailure>) -> Self {
        match result {
            Ok(report) => Self::Delivered(report),
            Err(failure) => Self::Failed(failure),
        }
    }
}

/// Everything one fan-out produced, in configuration order.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub source: SourceMedia,
    pub destinations: Vec<DestinationOutcome>,
}

impl RunReport {
    pub fn delivered(&self) -> usize {
        self.destinations.iter().filter(|d| d.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.destinations.len() - self.delivered()
    }
}
