//! One destination's pass through resolve, trim or transcode, package and
//! upload. Stages run strictly in order, each consuming the previous
//! stage's output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fanout_av::{HlsOptions, JobControl, TranscodeRequest, TrimMethod, TrimOutcome, Workspace};
use fanout_core::events::RunStage;
use fanout_core::{DeliveryFormat, Error, Result, VideoCodec};
use fanout_rules::{resolve, AudioTarget, Plan, Resolution};
use fanout_upload::{Payload, UploadEngine};
use tracing::Instrument;

use crate::context::RunContext;
use crate::processor::MediaProcessor;
use crate::report::{DestinationReport, HlsArtifacts, Processing, RunFailure};

/// The file a processing stage produced for delivery.
struct Deliverable {
    path: PathBuf,
    codec: VideoCodec,
    duration_secs: f64,
    processing: Processing,
    /// Bitrate the HLS re-encode fallback should use.
    bitrate_kbps: Option<u32>,
}

pub struct DestinationRun {
    ctx: RunContext,
    processor: Arc<dyn MediaProcessor>,
}

impl DestinationRun {
    pub fn new(ctx: RunContext, processor: Arc<dyn MediaProcessor>) -> Self {
        Self { ctx, processor }
    }

    /// Run every stage. Terminal progress events are sent either way.
    pub async fn execute(self) -> std::result::Result<DestinationReport, RunFailure> {
        let span = tracing::info_span!(
            "destination",
            destination = %self.ctx.name(),
            run = %self.ctx.run_id.short(),
        );
        let result = self.run().instrument(span).await;

        let progress = &self.ctx.progress;
        match &result {
            Ok(report) => {
                let status = match report.artifact_id {
                    Some(ref id) => format!("delivered as {id}"),
                    None => "delivered".to_string(),
                };
                progress.completed(status).await;
            }
            Err(failure) => {
                progress
                    .failed(
                        failure.stage,
                        failure.error.to_string(),
                        failure.sent_bytes,
                        failure.total_bytes,
                    )
                    .await;
            }
        }
        result
    }

    async fn run(&self) -> std::result::Result<DestinationReport, RunFailure> {
        let ctx = &self.ctx;
        let mut warnings = Vec::new();

        self.enter(RunStage::Resolve, "resolving destination constraints").await;
        let plan = self.plan();
        for warning in &plan.warnings {
            self.warn(RunStage::Resolve, warning.clone(), &mut warnings).await;
        }
        tracing::info!(
            resolution = plan.resolution.name(),
            output_duration_secs = plan.output_duration_secs,
            estimated_size_bytes = plan.estimated_size_bytes,
            "constraints resolved"
        );
        if let Resolution::Reject { ref reason } = plan.resolution {
            return Err(self.failure(RunStage::Resolve, Error::Rejected(reason.clone())));
        }
        self.checkpoint(RunStage::Resolve)?;

        let control = JobControl::new(ctx.progress.clone(), ctx.cancellation.clone())
            .with_timeout(ctx.config.transcode.timeout_secs.map(Duration::from_secs));
        let mut workspace: Option<Workspace> = None;

        let deliverable = self
            .produce(&plan, &mut workspace, &control, &mut warnings)
            .await?;

        let (payload, hls) = match ctx.destination.delivery {
            DeliveryFormat::File => {
                let payload = Payload::from_file(&deliverable.path)
                    .await
                    .map_err(|e| self.failure(RunStage::Upload, e))?;
                (payload, None)
            }
            DeliveryFormat::Hls => {
                self.checkpoint(RunStage::Package)?;
                self.enter(RunStage::Package, "packaging HLS").await;
                let ws = ensure_workspace(&mut workspace, ctx.name())
                    .map_err(|e| self.failure(RunStage::Package, e))?;
                let options = HlsOptions {
                    segment_duration_secs: ctx.config.hls.segment_duration_secs,
                    thumbnail_at_secs: ctx.config.hls.thumbnail_at_secs,
                    bitrate_kbps: deliverable.bitrate_kbps,
                };
                let bundle = self
                    .processor
                    .package_hls(
                        &deliverable.path,
                        deliverable.codec,
                        deliverable.duration_secs,
                        &options,
                        ws,
                        &control,
                    )
                    .await
                    .map_err(|e| self.failure(RunStage::Package, e))?;
                if bundle.thumbnail.is_none() {
                    self.warn(RunStage::Package, "no thumbnail could be extracted", &mut warnings)
                        .await;
                }
                let artifacts = HlsArtifacts {
                    manifest: bundle.manifest.clone(),
                    payload_uri: bundle.payload_uri.clone(),
                    segment_count: bundle.segments.len(),
                    thumbnail_bytes: bundle.thumbnail.as_ref().map_or(0, |t| t.len()),
                    thumbnail: bundle.thumbnail.clone(),
                };
                (Payload::Memory(bundle.payload()), Some(artifacts))
            }
        };

        let output_bytes = payload.len();
        let cap = ctx.destination.constraint.max_file_size_bytes;
        if output_bytes > cap {
            self.warn(
                RunStage::Upload,
                format!("delivering {output_bytes} bytes, above the {cap} byte cap"),
                &mut warnings,
            )
            .await;
        }

        self.checkpoint(RunStage::Upload)?;
        self.enter(RunStage::Upload, "uploading").await;
        let engine = UploadEngine::for_destination(
            &ctx.destination,
            &ctx.config.upload,
            ctx.progress.clone(),
            ctx.cancellation.clone(),
        )
        .map_err(|e| self.failure(RunStage::Upload, e))?;
        let receipt = engine.upload(&payload).await.map_err(|f| {
            self.failure(RunStage::Upload, f.error)
                .with_bytes(f.sent_bytes, f.total_bytes)
        })?;

        // Intermediates go away with the workspace once the upload is done.
        drop(workspace);

        Ok(DestinationReport {
            run_id: ctx.run_id,
            destination: ctx.name().to_string(),
            resolution: plan.resolution,
            processing: deliverable.processing,
            delivery: ctx.destination.delivery,
            output_duration_secs: deliverable.duration_secs,
            output_bytes,
            artifact_id: receipt.artifact_id.clone(),
            upload: receipt,
            hls,
            warnings,
        })
    }

    fn plan(&self) -> Plan {
        let transcode = &self.ctx.config.transcode;
        let audio = AudioTarget {
            bitrate_bps: transcode.audio_bitrate_bps,
            sample_rate_hz: transcode.audio_sample_rate_hz,
        };
        resolve(&self.ctx.source, &self.ctx.destination.constraint, &audio)
    }

    /// Trim, transcode, or pass the source through.
    async fn produce(
        &self,
        plan: &Plan,
        workspace: &mut Option<Workspace>,
        control: &JobControl,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<Deliverable, RunFailure> {
        let ctx = &self.ctx;
        let source = ctx.source.as_ref();

        match plan.resolution {
            Resolution::NoAction | Resolution::Reject { .. } => Ok(Deliverable {
                path: source.path.clone(),
                codec: source.video_codec,
                duration_secs: source.duration_secs,
                processing: Processing::Original,
                bitrate_kbps: None,
            }),
            Resolution::TrimOnly { ref window } => {
                self.enter(RunStage::Trim, format!("trimming to {:.1}s", window.end_secs))
                    .await;
                let ws = ensure_workspace(workspace, ctx.name())
                    .map_err(|e| self.failure(RunStage::Trim, e))?;
                let outcome = self
                    .processor
                    .trim(
                        source,
                        window,
                        ctx.destination.constraint.max_file_size_bytes,
                        ws,
                        control,
                    )
                    .await
                    .map_err(|e| self.failure(RunStage::Trim, e))?;

                match outcome {
                    TrimOutcome::Trimmed { path, method } => Ok(Deliverable {
                        path,
                        codec: match method {
                            TrimMethod::StreamCopy => source.video_codec,
                            TrimMethod::Reencode => VideoCodec::H264,
                        },
                        duration_secs: plan.output_duration_secs,
                        processing: Processing::Trimmed { method },
                        bitrate_kbps: None,
                    }),
                    TrimOutcome::Original { reason } => {
                        self.warn(
                            RunStage::Trim,
                            format!("trim failed, delivering the original: {reason}"),
                            warnings,
                        )
                        .await;
                        Ok(Deliverable {
                            path: source.path.clone(),
                            codec: source.video_codec,
                            duration_secs: source.duration_secs,
                            processing: Processing::TrimFallback,
                            bitrate_kbps: None,
                        })
                    }
                }
            }
            Resolution::Transcode { ref profile } => {
                self.enter(
                    RunStage::Transcode,
                    format!("transcoding to {}x{}", profile.width, profile.height),
                )
                .await;
                let ws = ensure_workspace(workspace, ctx.name())
                    .map_err(|e| self.failure(RunStage::Transcode, e))?;
                let engine = self.processor.engine().await;
                let request = TranscodeRequest {
                    source,
                    profile,
                    preset: &ctx.config.transcode.preset,
                    keyframe_interval_secs: (ctx.destination.delivery == DeliveryFormat::Hls)
                        .then_some(ctx.config.hls.segment_duration_secs),
                };
                let path = self
                    .processor
                    .transcode(engine.as_ref(), request, ws, control)
                    .await
                    .map_err(|e| self.failure(RunStage::Transcode, e))?;
                Ok(Deliverable {
                    path,
                    codec: VideoCodec::H264,
                    duration_secs: plan.output_duration_secs,
                    processing: Processing::Transcoded {
                        engine: engine.name().to_string(),
                    },
                    bitrate_kbps: Some(profile.video_bitrate_kbps),
                })
            }
        }
    }

    async fn enter(&self, stage: RunStage, status: impl Into<String>) {
        let status = status.into();
        self.ctx.stage.enter(stage);
        tracing::info!(stage = %stage, "{status}");
        self.ctx.progress.stage(stage, status).await;
    }

    async fn warn(&self, stage: RunStage, message: impl Into<String>, warnings: &mut Vec<String>) {
        let message = message.into();
        tracing::warn!(stage = %stage, "{message}");
        self.ctx.progress.warning(stage, message.clone()).await;
        warnings.push(message);
    }

    fn checkpoint(&self, stage: RunStage) -> std::result::Result<(), RunFailure> {
        if self.ctx.cancellation.is_cancelled() {
            return Err(self.failure(stage, Error::Cancelled));
        }
        Ok(())
    }

    fn failure(&self, stage: RunStage, error: Error) -> RunFailure {
        RunFailure::new(self.ctx.name(), stage, error)
    }
}

fn ensure_workspace<'w>(slot: &'w mut Option<Workspace>, label: &str) -> Result<&'w Workspace> {
    if slot.is_none() {
        *slot = Some(Workspace::new(label)?);
    }
    slot.as_ref()
        .ok_or_else(|| Error::Internal("workspace was not created".into()))
}
