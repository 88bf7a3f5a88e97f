//! Everything one destination run owns.

use std::sync::{Arc, Mutex};

use fanout_core::config::{Config, DestinationConfig};
use fanout_core::events::{ProgressSender, RunStage};
use fanout_core::{DestinationRunId, SourceMedia};
use tokio_util::sync::CancellationToken;

/// Context for a single destination's run.
///
/// Nothing in here is shared mutably with other runs: the source and the
/// run configuration are read-only, and the progress sender and
/// cancellation token are per-run handles.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: DestinationRunId,
    /// Probed source, shared read-only by every destination.
    pub source: Arc<SourceMedia>,
    pub destination: DestinationConfig,
    /// Transcode, HLS and upload defaults.
    pub config: Arc<Config>,
    /// Sender already tagged with the destination name.
    pub progress: ProgressSender,
    pub cancellation: CancellationToken,
    pub stage: StageTracker,
}

impl RunContext {
    pub fn new(source: Arc<SourceMedia>, destination: DestinationConfig, config: Arc<Config>) -> Self {
        let progress = ProgressSender::noop().for_destination(destination.name.clone());
        Self {
            run_id: DestinationRunId::new(),
            source,
            destination,
            config,
            progress,
            cancellation: CancellationToken::new(),
            stage: StageTracker::default(),
        }
    }

    /// Builder: report through `progress`, re-tagged with this destination.
    pub fn with_progress(mut self, progress: &ProgressSender) -> Self {
        self.progress = progress.for_destination(self.destination.name.clone());
        self
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.destination.name
    }
}

/// Last stage a run entered. Clones share the value, so the orchestrator can
/// still read it after the run's task has died.
#[derive(Debug, Clone)]
pub struct StageTracker(Arc<Mutex<RunStage>>);

impl Default for StageTracker {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(RunStage::Resolve)))
    }
}

impl StageTracker {
    pub fn enter(&self, stage: RunStage) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = stage;
    }

    pub fn current(&self) -> RunStage {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
