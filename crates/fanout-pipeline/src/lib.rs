//! # fanout-pipeline
//!
//! Orchestration of one source video across many destinations.
//!
//! - **[`Orchestrator`]** -- probes the source once, then runs every
//!   destination concurrently and collects a [`RunReport`].
//! - **[`DestinationRun`]** -- one destination's sequential pass:
//!   resolve, trim or transcode, HLS packaging when requested, upload.
//! - **[`MediaProcessor`]** -- the seam to ffmpeg ([`FfmpegProcessor`]),
//!   replaceable by fakes in tests.
//! - **[`RunContext`]** -- what a single run owns: source, destination,
//!   settings, progress sender and cancellation token.

pub mod context;
pub mod orchestrator;
pub mod processor;
pub mod report;
pub mod run;

pub use context::{RunContext, StageTracker};
pub use orchestrator::{DestinationPlan, Orchestrator};
pub use processor::{FfmpegProcessor, MediaProcessor};
pub use report::{
    DestinationOutcome, DestinationReport, HlsArtifacts, Processing, RunFailure, RunReport,
};
pub use run::DestinationRun;
