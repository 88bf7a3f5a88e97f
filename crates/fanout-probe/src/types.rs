//! Core types for media probe results.

use std::path::PathBuf;
use std::time::Duration;

use fanout_core::{Container, SourceMedia, VideoCodec};
use serde::{Deserialize, Serialize};

/// Convert a container-reported duration in seconds.
///
/// Values `Duration` cannot hold (absurd `mvhd` or ffprobe durations) are a
/// probe error rather than a panic.
pub fn duration_from_secs(secs: f64) -> fanout_core::Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| fanout_core::Error::Probe(format!("implausible duration {secs}s: {e}")))
}

/// Container-level metadata extracted by probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Path to the probed file.
    pub file_path: PathBuf,
    /// File size in bytes.
    pub file_size: u64,
    pub container: Container,
    /// Total duration (if determinable).
    pub duration: Option<Duration>,
    pub video_tracks: Vec<VideoTrack>,
    pub audio_tracks: Vec<AudioTrack>,
}

impl MediaInfo {
    /// Returns the primary video track.
    ///
    /// Prefers the first track marked as default; falls back to the first track.
    pub fn primary_video(&self) -> Option<&VideoTrack> {
        self.video_tracks
            .iter()
            .find(|t| t.default)
            .or_else(|| self.video_tracks.first())
    }

    /// Derive the pipeline's [`SourceMedia`] handle.
    ///
    /// Fails with a probe error when there is no video track, the duration
    /// is unknown, or the dimensions are zero.
    pub fn to_source_media(&self) -> fanout_core::Result<SourceMedia> {
        let video = self.primary_video().ok_or_else(|| {
            fanout_core::Error::Probe(format!(
                "no video track in {}",
                self.file_path.display()
            ))
        })?;
        let duration = self
            .duration
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                fanout_core::Error::Probe(format!(
                    "unknown duration for {}",
                    self.file_path.display()
                ))
            })?;
        if video.width == 0 || video.height == 0 {
            return Err(fanout_core::Error::Probe(format!(
                "video track has no dimensions in {}",
                self.file_path.display()
            )));
        }

        Ok(SourceMedia {
            path: self.file_path.clone(),
            duration_secs: duration.as_secs_f64(),
            width: video.width,
            height: video.height,
            frame_rate: video.frame_rate.filter(|f| f.is_finite() && *f > 0.0),
            byte_size: self.file_size,
            video_codec: video.codec,
            has_audio: !self.audio_tracks.is_empty(),
        })
    }
}

/// A video track within a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frame rate in frames per second.
    pub frame_rate: Option<f64>,
    /// Whether this is the default track.
    pub default: bool,
}

/// An audio track within a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Codec identifier as reported by the container (fourcc or codec id).
    pub codec: String,
    pub channels: u32,
    pub sample_rate: Option<u32>,
    pub default: bool,
}
