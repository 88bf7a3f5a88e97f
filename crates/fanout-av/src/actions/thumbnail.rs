use std::path::Path;

use bytes::Bytes;
use fanout_core::events::RunStage;
use fanout_core::{Error, Result};

use super::{ffmpeg_command, run_ffmpeg};
use crate::control::JobControl;
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// Seek position for the thumbnail: the requested time, but never past the
/// middle of a short clip.
pub(crate) fn thumbnail_position(at_secs: f64, duration_secs: f64) -> f64 {
    let at = if at_secs.is_finite() { at_secs.max(0.0) } else { 0.0 };
    if duration_secs > 0.0 {
        at.min(duration_secs / 2.0)
    } else {
        0.0
    }
}

/// Grab one JPEG frame from `input`.
pub async fn extract_thumbnail(
    tools: &ToolRegistry,
    input: &Path,
    at_secs: f64,
    duration_secs: f64,
    workspace: &Workspace,
    control: &JobControl,
) -> Result<Bytes> {
    let output = workspace.temp_file("thumbnail.jpg");
    let position = thumbnail_position(at_secs, duration_secs);

    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.args(["-ss".to_string(), format!("{position:.3}")])
        .arg("-i")
        .arg(input.to_string_lossy())
        .args(["-frames:v", "1", "-q:v", "3", "-f", "image2"])
        .arg(output.to_string_lossy());
    run_ffmpeg(&cmd, control, RunStage::Package, 0.0, "extracting thumbnail").await?;

    let data = tokio::fs::read(&output).await?;
    if data.is_empty() {
        return Err(Error::Packaging("thumbnail is empty".into()));
    }
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_capped_at_half_duration() {
        assert_eq!(thumbnail_position(1.0, 180.0), 1.0);
        assert_eq!(thumbnail_position(10.0, 4.0), 2.0);
        assert_eq!(thumbnail_position(-3.0, 4.0), 0.0);
        assert_eq!(thumbnail_position(f64::NAN, 4.0), 0.0);
        assert_eq!(thumbnail_position(1.0, 0.0), 0.0);
    }
}
