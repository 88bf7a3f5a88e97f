//! FFprobe-based [`fanout_probe::Prober`] implementation.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into [`fanout_probe::MediaInfo`]. ffprobe only
//! reads container headers for these sections, so no frames are decoded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fanout_core::{Container, Error, Result, VideoCodec};
use fanout_probe::{duration_from_secs, AudioTrack, MediaInfo, Prober, VideoTrack};
use serde::Deserialize;

use crate::command::ToolCommand;

const PROBE_ARGS: [&str; 6] = [
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
];

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Create a prober that finds ffprobe on `PATH`.
    pub fn from_path() -> Option<Self> {
        which::which("ffprobe").ok().map(Self::new)
    }

    /// Probe without blocking the runtime.
    pub async fn probe_async(&self, path: &Path) -> Result<MediaInfo> {
        let output = ToolCommand::new(self.ffprobe_path.clone())
            .args(PROBE_ARGS)
            .arg(path.to_string_lossy())
            .timeout(Duration::from_secs(60))
            .execute()
            .await
            .map_err(|e| Error::Probe(e.to_string()))?;
        parse_ffprobe_json(path, &output.stdout)
    }
}

impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    // The trait is synchronous; callers on a runtime wrap this in
    // spawn_blocking.
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = std::process::Command::new(&self.ffprobe_path)
            .args(PROBE_ARGS)
            .arg(path)
            .output()
            .map_err(|e| Error::Probe(format!("failed to run ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(Error::Probe(format!(
                "ffprobe exited with status {} for {}",
                output.status,
                path.display()
            )));
        }
        parse_ffprobe_json(path, &String::from_utf8_lossy(&output.stdout))
    }

    fn supports(&self, path: &Path) -> bool {
        path.is_file()
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    attached_pic: u8,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_ffprobe_json(path: &Path, json: &str) -> Result<MediaInfo> {
    let ff: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let duration = ff
        .format
        .duration
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(duration_from_secs)
        .transpose()?;

    let file_size = match ff.format.size.and_then(|s| s.parse::<u64>().ok()) {
        Some(size) => size,
        None => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
    };

    let mut video_tracks = Vec::new();
    let mut audio_tracks = Vec::new();

    for stream in ff.streams {
        match stream.codec_type.as_deref() {
            // Cover art shows up as a one-frame video stream.
            Some("video") if stream.disposition.attached_pic == 0 => {
                let frame_rate = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
                video_tracks.push(VideoTrack {
                    codec: VideoCodec::from_name(stream.codec_name.as_deref().unwrap_or("")),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    frame_rate,
                    default: stream.disposition.default == 1,
                });
            }
            Some("audio") => audio_tracks.push(AudioTrack {
                codec: stream.codec_name.unwrap_or_default(),
                channels: stream.channels.unwrap_or(2),
                sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                default: stream.disposition.default == 1,
            }),
            _ => {}
        }
    }

    Ok(MediaInfo {
        file_path: path.to_path_buf(),
        file_size,
        container: map_container(ff.format.format_name.as_deref().unwrap_or("")),
        duration,
        video_tracks,
        audio_tracks,
    })
}

/// Parse `"24000/1001"` or `"25"`. `0/0` (unknown) yields `None`.
pub fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let rate = match rate_str.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate_str.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn map_container(format_name: &str) -> Container {
    let lower = format_name.to_lowercase();
    if lower.contains("matroska") || lower.contains("webm") {
        Container::Mkv
    } else if lower.contains("mp4") || lower.contains("mov") {
        Container::Mp4
    } else {
        Container::Other
    }
}
