//! The media-processing seam between a destination run and ffmpeg.
//!
//! [`DestinationRun`](crate::DestinationRun) only talks to a
//! [`MediaProcessor`], so tests can swap the ffmpeg-backed
//! [`FfmpegProcessor`] for an in-memory fake.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fanout_av::{
    HlsOptions, JobControl, SoftwareEngine, ToolRegistry, TranscodeEngine, TranscodeRequest,
    TrimOutcome, Workspace,
};
use fanout_core::config::TranscodeConfig;
use fanout_core::{Error, Result, SourceMedia, TrimWindow, VideoCodec};
use fanout_media::HlsBundle;
use fanout_probe::{CompositeProber, HeaderProber, Prober};

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Read container metadata without decoding.
    async fn probe(&self, path: &Path) -> Result<SourceMedia>;

    /// A fresh encoding engine for one destination run.
    async fn engine(&self) -> Box<dyn TranscodeEngine>;

    async fn trim(
        &self,
        source: &SourceMedia,
        window: &TrimWindow,
        max_file_size_bytes: u64,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<TrimOutcome>;

    async fn transcode(
        &self,
        engine: &dyn TranscodeEngine,
        request: TranscodeRequest<'_>,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<PathBuf>;

    async fn package_hls(
        &self,
        input: &Path,
        codec: VideoCodec,
        duration_secs: f64,
        options: &HlsOptions,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<HlsBundle>;
}

/// Production processor: header prober with ffprobe behind it, ffmpeg for
/// everything else.
pub struct FfmpegProcessor {
    tools: Arc<ToolRegistry>,
    prober: Arc<CompositeProber>,
    transcode: TranscodeConfig,
}

impl FfmpegProcessor {
    pub fn new(tools: Arc<ToolRegistry>, transcode: TranscodeConfig) -> Self {
        let mut prober = CompositeProber::new(vec![Box::new(HeaderProber::new())]);
        match tools.require("ffprobe") {
            Ok(ffprobe) => prober.push(Box::new(fanout_av::FfprobeProber::new(
                ffprobe.path.clone(),
            ))),
            Err(_) => tracing::debug!("ffprobe not found; probing MP4 and Matroska headers only"),
        }
        Self {
            tools,
            prober: Arc::new(prober),
            transcode,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn probe(&self, path: &Path) -> Result<SourceMedia> {
        let prober = Arc::clone(&self.prober);
        let path = path.to_path_buf();
        let info = tokio::task::spawn_blocking(move || prober.probe(&path))
            .await
            .map_err(|e| Error::Internal(format!("probe task failed: {e}")))??;
        info.to_source_media()
    }

    async fn engine(&self) -> Box<dyn TranscodeEngine> {
        if self.tools.require("ffmpeg").is_err() {
            return Box::new(SoftwareEngine);
        }
        fanout_av::select_engine(&self.transcode, &self.tools).await
    }

    async fn trim(
        &self,
        source: &SourceMedia,
        window: &TrimWindow,
        max_file_size_bytes: u64,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<TrimOutcome> {
        fanout_av::trim(
            &self.tools,
            source,
            window,
            max_file_size_bytes,
            workspace,
            control,
        )
        .await
    }

    async fn transcode(
        &self,
        engine: &dyn TranscodeEngine,
        request: TranscodeRequest<'_>,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<PathBuf> {
        fanout_av::transcode(&self.tools, engine, request, workspace, control).await
    }

    async fn package_hls(
        &self,
        input: &Path,
        codec: VideoCodec,
        duration_secs: f64,
        options: &HlsOptions,
        workspace: &Workspace,
        control: &JobControl,
    ) -> Result<HlsBundle> {
        fanout_av::package_hls(
            &self.tools,
            input,
            codec,
            duration_secs,
            options,
            workspace,
            control,
        )
        .await
    }
}
