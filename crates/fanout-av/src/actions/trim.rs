//! Cutting a source down to a [`TrimWindow`].

use std::path::{Path, PathBuf};

use fanout_core::events::RunStage;
use fanout_core::{Error, Result, SourceMedia, TrimWindow};
use serde::Serialize;

use super::{ffmpeg_command, run_ffmpeg, window_args};
use crate::control::JobControl;
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimMethod {
    /// Packets copied; cut lands on the nearest keyframe.
    StreamCopy,
    /// Window re-encoded because stream copy was refused.
    Reencode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrimOutcome {
    Trimmed { path: PathBuf, method: TrimMethod },
    /// Trimming failed but the untrimmed source fits the size cap.
    Original { reason: String },
}

impl TrimOutcome {
    /// The file to hand to the next stage.
    pub fn path<'a>(&'a self, source: &'a SourceMedia) -> &'a Path {
        match self {
            Self::Trimmed { path, .. } => path,
            Self::Original { .. } => &source.path,
        }
    }
}

/// Trim `source` to `window`.
///
/// Tries a stream copy first, then a re-encode of the window. If both fail
/// and the source is already within `max_file_size_bytes`, the original is
/// returned. Cancellation is never degraded into a fallback.
pub async fn trim(
    tools: &ToolRegistry,
    source: &SourceMedia,
    window: &TrimWindow,
    max_file_size_bytes: u64,
    workspace: &Workspace,
    control: &JobControl,
) -> Result<TrimOutcome> {
    let output = workspace.temp_file("trimmed.mp4");
    let duration = window.duration_secs().min(source.duration_secs);

    let copy_error = match stream_copy(tools, source, window, duration, &output, control).await {
        Ok(()) => {
            tracing::info!(end_secs = window.end_secs, "trimmed with stream copy");
            return Ok(TrimOutcome::Trimmed {
                path: output,
                method: TrimMethod::StreamCopy,
            });
        }
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => e,
    };
    tracing::warn!(error = %copy_error, "stream-copy trim failed, re-encoding window");
    control
        .progress
        .warning(RunStage::Trim, format!("stream copy refused, re-encoding: {copy_error}"))
        .await;

    let reencode_error = match reencode(tools, source, window, duration, &output, control).await {
        Ok(()) => {
            return Ok(TrimOutcome::Trimmed {
                path: output,
                method: TrimMethod::Reencode,
            })
        }
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => e,
    };

    if source.byte_size <= max_file_size_bytes {
        let reason = format!("trim failed ({reencode_error}); delivering original");
        tracing::warn!(%reason, "falling back to untrimmed source");
        control.progress.warning(RunStage::Trim, reason.clone()).await;
        return Ok(TrimOutcome::Original { reason });
    }

    Err(Error::Trim(format!(
        "stream copy failed ({copy_error}); re-encode failed ({reencode_error})"
    )))
}

async fn stream_copy(
    tools: &ToolRegistry,
    source: &SourceMedia,
    window: &TrimWindow,
    duration: f64,
    output: &Path,
    control: &JobControl,
) -> Result<()> {
    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.args(window_args(window.start_secs, duration))
        .arg("-i")
        .arg(source.path.to_string_lossy())
        .args(["-map", "0:v:0", "-map", "0:a:0?", "-c", "copy"])
        .args(["-avoid_negative_ts", "make_zero", "-movflags", "+faststart"])
        .arg(output.to_string_lossy());
    run_ffmpeg(&cmd, control, RunStage::Trim, duration, "trimming (copy)").await?;
    ensure_written(output)
}

async fn reencode(
    tools: &ToolRegistry,
    source: &SourceMedia,
    window: &TrimWindow,
    duration: f64,
    output: &Path,
    control: &JobControl,
) -> Result<()> {
    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.args(window_args(window.start_secs, duration))
        .arg("-i")
        .arg(source.path.to_string_lossy())
        .args(["-map", "0:v:0", "-map", "0:a:0?"])
        .args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "20", "-pix_fmt", "yuv420p"])
        .args(["-c:a", "aac", "-b:a", "128k"])
        .args(["-movflags", "+faststart"])
        .arg(output.to_string_lossy());
    run_ffmpeg(&cmd, control, RunStage::Trim, duration, "trimming (re-encode)").await?;
    ensure_written(output)
}

fn ensure_written(path: &Path) -> Result<()> {
    let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(Error::tool("ffmpeg", format!("{} is empty", path.display())));
    }
    Ok(())
}
