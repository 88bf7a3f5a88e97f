//! Media-domain types shared by every stage of a destination run.
//!
//! Enums serialize in lowercase and implement `Display` manually for a
//! consistent string representation in logs and reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Container formats the header prober understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
    /// Anything else; only ffprobe can describe it.
    Other,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "mp4"),
            Self::Mkv => write!(f, "mkv"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// VideoCodec
// ---------------------------------------------------------------------------

/// Rough video codec identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
    Vp9,
    Other,
}

impl VideoCodec {
    /// Map an MP4 sample entry fourcc to a codec.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Self {
        match fourcc {
            b"avc1" | b"avc3" => Self::H264,
            b"hvc1" | b"hev1" | b"dvh1" | b"dvhe" => Self::H265,
            b"av01" => Self::Av1,
            b"vp09" => Self::Vp9,
            _ => Self::Other,
        }
    }

    /// Map an ffprobe `codec_name` or Matroska codec id to a codec.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "h264" | "avc" | "v_mpeg4/iso/avc" => Self::H264,
            "hevc" | "h265" | "v_mpegh/iso/hevc" => Self::H265,
            "av1" | "v_av1" => Self::Av1,
            "vp9" | "v_vp9" => Self::Vp9,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::H265 => write!(f, "h265"),
            Self::Av1 => write!(f, "av1"),
            Self::Vp9 => write!(f, "vp9"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// TranscodeStage
// ---------------------------------------------------------------------------

/// The three ordered stages of a full re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeStage {
    Audio,
    Video,
    Mux,
}

impl fmt::Display for TranscodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
            Self::Mux => write!(f, "mux"),
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryFormat
// ---------------------------------------------------------------------------

/// What a destination receives: a single MP4 file or an HLS bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFormat {
    #[default]
    File,
    Hls,
}

impl fmt::Display for DeliveryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Hls => write!(f, "hls"),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceMedia
// ---------------------------------------------------------------------------

/// Read-only handle to the user's original video plus its probed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMedia {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// `None` when the container does not expose a frame rate.
    pub frame_rate: Option<f64>,
    pub byte_size: u64,
    pub video_codec: VideoCodec,
    pub has_audio: bool,
}

// ---------------------------------------------------------------------------
// DestinationConstraint
// ---------------------------------------------------------------------------

/// Numeric limits published by one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConstraint {
    #[serde(default)]
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub max_file_size_bytes: u64,
    pub max_width: u32,
    pub max_frame_rate: f64,
}

impl DestinationConstraint {
    /// Whether `media` already satisfies every limit.
    pub fn is_satisfied_by(&self, media: &SourceMedia) -> bool {
        media.duration_secs <= self.max_duration_secs
            && media.byte_size <= self.max_file_size_bytes
            && media.width <= self.max_width
            && media
                .frame_rate
                .map_or(true, |fps| fps <= self.max_frame_rate)
    }
}

// ---------------------------------------------------------------------------
// TrimWindow / TranscodeProfile
// ---------------------------------------------------------------------------

/// A cut of the source starting at `start_secs` and ending at `end_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl TrimWindow {
    /// Window starting at zero.
    pub fn leading(end_secs: f64) -> Self {
        Self {
            start_secs: 0.0,
            end_secs,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}

/// Derived encode target for one destination in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_bps: u32,
    pub audio_sample_rate_hz: u32,
    /// Set when the output must also be shortened.
    pub trim: Option<TrimWindow>,
}

impl TranscodeProfile {
    /// Duration the encoded output will have given the source duration.
    pub fn output_duration_secs(&self, source_duration_secs: f64) -> f64 {
        match self.trim {
            Some(w) => w.duration_secs().min(source_duration_secs),
            None => source_duration_secs,
        }
    }
}
