//! Fans one source out to every configured destination.
//!
//! The source is probed once; each destination then gets its own
//! [`DestinationRun`] on a `JoinSet`, so destinations proceed concurrently
//! and a failing one never holds up the others.

use std::path::Path;
use std::sync::Arc;

use fanout_core::config::Config;
use fanout_core::events::{ProgressSender, RunStage};
use fanout_core::{Error, Result, RunId, SourceMedia};
use fanout_rules::{resolve, AudioTarget, Plan};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::processor::MediaProcessor;
use crate::report::{DestinationOutcome, RunFailure, RunReport};
use crate::run::DestinationRun;

/// A destination's resolution without doing any work.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationPlan {
    pub destination: String,
    #[serde(flatten)]
    pub plan: Plan,
}

pub struct Orchestrator {
    config: Arc<Config>,
    processor: Arc<dyn MediaProcessor>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, processor: Arc<dyn MediaProcessor>) -> Self {
        Self { config, processor }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn probe(&self, source: &Path) -> Result<SourceMedia> {
        let media = self.processor.probe(source).await?;
        tracing::info!(
            path = %source.display(),
            duration_secs = media.duration_secs,
            width = media.width,
            height = media.height,
            frame_rate = media.frame_rate.unwrap_or(0.0),
            byte_size = media.byte_size,
            codec = %media.video_codec,
            "source probed"
        );
        Ok(media)
    }

    /// Resolve every destination against an already probed source.
    pub fn plan(&self, media: &SourceMedia) -> Vec<DestinationPlan> {
        let audio = AudioTarget {
            bitrate_bps: self.config.transcode.audio_bitrate_bps,
            sample_rate_hz: self.config.transcode.audio_sample_rate_hz,
        };
        self.config
            .destinations
            .iter()
            .map(|d| DestinationPlan {
                destination: d.name.clone(),
                plan: resolve(media, &d.constraint, &audio),
            })
            .collect()
    }

    /// Probe `source` and run every destination.
    ///
    /// Fails only when the source cannot be probed; per-destination failures
    /// are reported inside the [`RunReport`].
    pub async fn run(
        &self,
        source: &Path,
        progress: &ProgressSender,
        cancellation: &CancellationToken,
    ) -> Result<RunReport> {
        if self.config.destinations.is_empty() {
            return Err(Error::Validation("no destinations configured".into()));
        }

        let media = match self.probe(source).await {
            Ok(media) => Arc::new(media),
            Err(e) => {
                for dest in &self.config.destinations {
                    progress
                        .for_destination(dest.name.clone())
                        .failed(RunStage::Probe, e.to_string(), None, None)
                        .await;
                }
                return Err(e);
            }
        };

        Ok(self.run_probed(media, progress, cancellation).await)
    }

    /// Run every destination against an already probed source.
    pub async fn run_probed(
        &self,
        media: Arc<SourceMedia>,
        progress: &ProgressSender,
        cancellation: &CancellationToken,
    ) -> RunReport {
        let run_id = RunId::new();
        tracing::info!(
            run_id = %run_id,
            destinations = self.config.destinations.len(),
            "fan-out starting"
        );

        let mut tasks = JoinSet::new();
        let mut stages = Vec::with_capacity(self.config.destinations.len());
        for (index, dest) in self.config.destinations.iter().enumerate() {
            let ctx = RunContext::new(Arc::clone(&media), dest.clone(), Arc::clone(&self.config))
                .with_progress(progress)
                .with_cancellation(cancellation.child_token());
            stages.push(ctx.stage.clone());
            let run = DestinationRun::new(ctx, Arc::clone(&self.processor));
            tasks.spawn(async move { (index, run.execute().await) });
        }

        let mut slots: Vec<Option<DestinationOutcome>> =
            (0..self.config.destinations.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result.into()),
                Err(e) => tracing::error!("destination task aborted: {e}"),
            }
        }

        // A task that died never sent its terminal event; send it here.
        let mut destinations = Vec::with_capacity(slots.len());
        for ((slot, dest), stage) in slots.into_iter().zip(&self.config.destinations).zip(&stages) {
            let outcome = match slot {
                Some(outcome) => outcome,
                None => {
                    let stage = stage.current();
                    let error = Error::Internal(format!("destination task panicked during {stage}"));
                    progress
                        .for_destination(dest.name.clone())
                        .failed(stage, error.to_string(), None, None)
                        .await;
                    DestinationOutcome::Failed(RunFailure::new(dest.name.clone(), stage, error))
                }
            };
            destinations.push(outcome);
        }

        let report = RunReport {
            run_id,
            source: media.as_ref().clone(),
            destinations,
        };
        tracing::info!(
            run_id = %run_id,
            delivered = report.delivered(),
            failed = report.failed(),
            "fan-out finished"
        );
        report
    }
}
