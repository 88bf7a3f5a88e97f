//! Full re-encode in three ordered stages.
//!
//! 1. audio: first audio stream decoded to 16-bit PCM at the target rate
//! 2. video: video-only re-encode at the target size, rate and bitrate
//! 3. mux: PCM encoded to AAC and muxed with the video into MP4
//!
//! Splitting audio out before the video pass keeps the two from drifting
//! when the encoder falls behind.

use std::path::{Path, PathBuf};

use fanout_core::events::RunStage;
use fanout_core::{Error, Result, SourceMedia, TranscodeProfile, TranscodeStage};

use super::{ffmpeg_command, keyframe_args, run_ffmpeg, window_args};
use crate::control::JobControl;
use crate::engine::{SoftwareEngine, TranscodeEngine};
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// Everything the transcoder needs besides tools and scratch space.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    pub source: &'a SourceMedia,
    pub profile: &'a TranscodeProfile,
    /// x264 preset; hardware engines ignore it.
    pub preset: &'a str,
    /// Force keyframes at this interval, for later HLS segmentation.
    pub keyframe_interval_secs: Option<u32>,
}

impl TranscodeRequest<'_> {
    fn window(&self) -> (f64, f64) {
        let start = self.profile.trim.map(|w| w.start_secs).unwrap_or(0.0);
        (start, self.profile.output_duration_secs(self.source.duration_secs))
    }
}

/// Transcode `request.source` into `<workspace>/transcoded.mp4`.
///
/// # Errors
///
/// [`Error::Transcode`] tagged with the stage that failed, or
/// [`Error::Cancelled`].
pub async fn transcode(
    tools: &ToolRegistry,
    engine: &dyn TranscodeEngine,
    request: TranscodeRequest<'_>,
    workspace: &Workspace,
    control: &JobControl,
) -> Result<PathBuf> {
    let (_, duration) = request.window();
    tracing::info!(
        engine = engine.name(),
        width = request.profile.width,
        height = request.profile.height,
        fps = request.profile.frame_rate,
        video_kbps = request.profile.video_bitrate_kbps,
        duration_secs = duration,
        "starting transcode"
    );

    let audio = if request.source.has_audio {
        let path = workspace.temp_file("audio.wav");
        extract_audio(tools, request, &path, control)
            .await
            .map_err(|e| tag(TranscodeStage::Audio, e))?;
        Some(path)
    } else {
        tracing::debug!("source has no audio, skipping audio stage");
        None
    };

    let video = workspace.temp_file("video.mp4");
    match encode_video(tools, engine, request, &video, control).await {
        Ok(()) => {}
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) if engine.is_hardware() => {
            tracing::warn!(engine = engine.name(), error = %e, "hardware encode failed, retrying in software");
            control
                .progress
                .warning(
                    RunStage::Transcode,
                    format!("{} failed, retrying with software encoder", engine.name()),
                )
                .await;
            encode_video(tools, &SoftwareEngine, request, &video, control)
                .await
                .map_err(|e| tag(TranscodeStage::Video, e))?;
        }
        Err(e) => return Err(tag(TranscodeStage::Video, e)),
    }

    let output = workspace.temp_file("transcoded.mp4");
    mux(tools, request, &video, audio.as_deref(), &output, control)
        .await
        .map_err(|e| tag(TranscodeStage::Mux, e))?;

    control.progress.progress(RunStage::Transcode, 1.0, "transcode complete");
    Ok(output)
}

fn tag(stage: TranscodeStage, err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        Error::Transcode { .. } => err,
        other => Error::transcode(stage, other.to_string()),
    }
}

async fn extract_audio(
    tools: &ToolRegistry,
    request: TranscodeRequest<'_>,
    output: &Path,
    control: &JobControl,
) -> Result<()> {
    let (start, duration) = request.window();
    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.args(window_args(start, duration))
        .arg("-i")
        .arg(request.source.path.to_string_lossy())
        .args(["-vn", "-map", "0:a:0", "-c:a", "pcm_s16le", "-ac", "2"])
        .args(["-ar", &request.profile.audio_sample_rate_hz.to_string()])
        .arg(output.to_string_lossy());
    run_ffmpeg(&cmd, control, RunStage::Transcode, duration, "normalizing audio").await
}

async fn encode_video(
    tools: &ToolRegistry,
    engine: &dyn TranscodeEngine,
    request: TranscodeRequest<'_>,
    output: &Path,
    control: &JobControl,
) -> Result<()> {
    let (start, duration) = request.window();
    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.args(engine.input_args())
        .args(window_args(start, duration))
        .arg("-i")
        .arg(request.source.path.to_string_lossy())
        .args(["-map", "0:v:0", "-an", "-sn"])
        .args(["-vf".to_string(), engine.video_filter(request.profile)])
        .args(engine.video_codec_args(request.profile, request.preset));
    if let Some(interval) = request.keyframe_interval_secs.filter(|i| *i > 0) {
        cmd.args(keyframe_args(interval));
    }
    cmd.arg(output.to_string_lossy());

    let status = format!("encoding video ({})", engine.name());
    run_ffmpeg(&cmd, control, RunStage::Transcode, duration, &status).await
}

async fn mux(
    tools: &ToolRegistry,
    request: TranscodeRequest<'_>,
    video: &Path,
    audio: Option<&Path>,
    output: &Path,
    control: &JobControl,
) -> Result<()> {
    let (_, duration) = request.window();
    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.arg("-i").arg(video.to_string_lossy());
    match audio {
        Some(audio) => {
            cmd.arg("-i")
                .arg(audio.to_string_lossy())
                .args(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac"])
                .args(["-b:a", &request.profile.audio_bitrate_bps.to_string()])
                .args(["-ar", &request.profile.audio_sample_rate_hz.to_string()])
                .arg("-shortest");
        }
        None => {
            cmd.args(["-map", "0:v:0", "-c:v", "copy"]);
        }
    }
    cmd.args(["-movflags", "+faststart"])
        .arg(output.to_string_lossy());
    run_ffmpeg(&cmd, control, RunStage::Transcode, duration, "muxing").await
}
