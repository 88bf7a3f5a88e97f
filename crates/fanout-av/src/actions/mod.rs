//! ffmpeg-backed media actions: trimming, the three-stage transcode, HLS
//! segmentation and thumbnail extraction.

mod hls;
mod thumbnail;
mod transcode;
mod trim;

use fanout_core::events::RunStage;
use fanout_core::Result;

use crate::command::ToolCommand;
use crate::control::JobControl;
use crate::progress::ProgressParser;
use crate::tools::ToolRegistry;

pub use hls::{package_hls, segment_hls, HlsOptions, SegmentMode};
pub use thumbnail::extract_thumbnail;
pub use transcode::{transcode, TranscodeRequest};
pub use trim::{trim, TrimMethod, TrimOutcome};

/// An ffmpeg invocation preloaded with the flags every action uses.
pub(crate) fn ffmpeg_command(tools: &ToolRegistry, control: &JobControl) -> Result<ToolCommand> {
    let ffmpeg = tools.require("ffmpeg")?;
    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    cmd.args(["-hide_banner", "-nostdin", "-y", "-progress", "pipe:2", "-nostats"]);
    control.apply_timeout(&mut cmd);
    Ok(cmd)
}

/// Run ffmpeg, forwarding `-progress` blocks as fractional progress for
/// `stage`. Cancellation is checked between progress lines.
pub(crate) async fn run_ffmpeg(
    cmd: &ToolCommand,
    control: &JobControl,
    stage: RunStage,
    expected_duration_secs: f64,
    status: &str,
) -> Result<()> {
    tracing::debug!(stage = %stage, args = ?cmd.arg_list(), "running ffmpeg");
    let mut parser = ProgressParser::new(expected_duration_secs);
    cmd.execute_with_stderr_callback(
        |line| {
            if let Some(snapshot) = parser.feed(line) {
                control.progress.progress(stage, snapshot.fraction, status);
            }
        },
        Some(&control.cancel),
    )
    .await?;
    Ok(())
}

/// `-ss`/`-t` input options for a window, placed before `-i`.
pub(crate) fn window_args(start_secs: f64, duration_secs: f64) -> Vec<String> {
    let mut args = Vec::new();
    if start_secs > 0.0 {
        args.extend(["-ss".to_string(), format!("{start_secs:.3}")]);
    }
    args.extend(["-t".to_string(), format!("{duration_secs:.3}")]);
    args
}

/// Keyframes every `interval_secs` so HLS segments can cut on them.
pub(crate) fn keyframe_args(interval_secs: u32) -> [String; 2] {
    [
        "-force_key_frames".to_string(),
        format!("expr:gte(t,n_forced*{interval_secs})"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_args_skip_zero_start() {
        assert_eq!(window_args(0.0, 180.0), vec!["-t", "180.000"]);
        assert_eq!(window_args(2.5, 10.0), vec!["-ss", "2.500", "-t", "10.000"]);
    }

    #[test]
    fn keyframes_follow_segment_interval() {
        assert_eq!(keyframe_args(6)[1], "expr:gte(t,n_forced*6)");
    }

    #[test]
    fn ffmpeg_command_requires_tool() {
        let err = ffmpeg_command(&ToolRegistry::default(), &JobControl::detached()).unwrap_err();
        assert!(err.to_string().contains("ffmpeg"));
    }
}
