//! Maps source metadata and destination limits to the processing a
//! destination run needs.

use fanout_core::{DestinationConstraint, SourceMedia, TranscodeProfile, TrimWindow};
use serde::{Deserialize, Serialize};

use crate::math::{
    compute_bitrate_kbps, compute_dimensions, compute_frame_rate, estimate_size_bytes,
    MIN_VIDEO_BITRATE_KBPS,
};

/// Audio settings a transcode always uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTarget {
    pub bitrate_bps: u32,
    pub sample_rate_hz: u32,
}

impl Default for AudioTarget {
    fn default() -> Self {
        Self {
            bitrate_bps: 128_000,
            sample_rate_hz: 44_100,
        }
    }
}

impl AudioTarget {
    fn kbps(&self) -> f64 {
        self.bitrate_bps as f64 / 1000.0
    }
}

/// What a destination run must do to the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    NoAction,
    TrimOnly { window: TrimWindow },
    Transcode { profile: TranscodeProfile },
    Reject { reason: String },
}

impl Resolution {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::TrimOnly { .. } => "trim_only",
            Self::Transcode { .. } => "transcode",
            Self::Reject { .. } => "reject",
        }
    }
}

/// A resolution plus what it is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub resolution: Resolution,
    /// Duration of the delivered output. Always `min(source, max_duration)`
    /// unless rejected, in which case it is zero.
    pub output_duration_secs: f64,
    pub estimated_size_bytes: u64,
    /// Non-fatal issues (bitrate floor reached, size cap still exceeded).
    pub warnings: Vec<String>,
}

/// Decide between no-op, trim, transcode, or reject.
pub fn resolve(media: &SourceMedia, constraint: &DestinationConstraint, audio: &AudioTarget) -> Plan {
    let duration = media.duration_secs;

    if duration < constraint.min_duration_secs {
        return Plan {
            resolution: Resolution::Reject {
                reason: format!(
                    "duration {duration:.2}s is below the destination minimum of {:.2}s",
                    constraint.min_duration_secs
                ),
            },
            output_duration_secs: 0.0,
            estimated_size_bytes: 0,
            warnings: Vec::new(),
        };
    }

    if constraint.is_satisfied_by(media) {
        return Plan {
            resolution: Resolution::NoAction,
            output_duration_secs: duration,
            estimated_size_bytes: media.byte_size,
            warnings: Vec::new(),
        };
    }

    let output_duration = duration.min(constraint.max_duration_secs);
    let too_long = duration > constraint.max_duration_secs;
    let shape_ok = media.width <= constraint.max_width
        && media
            .frame_rate
            .map_or(true, |fps| fps <= constraint.max_frame_rate);

    if shape_ok && too_long {
        let trimmed_size = (media.byte_size as f64 * output_duration / duration).ceil() as u64;
        if trimmed_size <= constraint.max_file_size_bytes {
            return Plan {
                resolution: Resolution::TrimOnly {
                    window: TrimWindow::leading(output_duration),
                },
                output_duration_secs: output_duration,
                estimated_size_bytes: trimmed_size,
                warnings: Vec::new(),
            };
        }
    }

    let (width, height) = compute_dimensions(media.width, media.height, constraint.max_width);
    let video_bitrate_kbps =
        compute_bitrate_kbps(constraint.max_file_size_bytes, audio.kbps(), output_duration);
    let frame_rate = compute_frame_rate(media.frame_rate, constraint.max_frame_rate);
    let estimated = estimate_size_bytes(video_bitrate_kbps, audio.kbps(), output_duration);

    let mut warnings = Vec::new();
    if video_bitrate_kbps == MIN_VIDEO_BITRATE_KBPS {
        warnings.push(format!(
            "video bitrate clamped to the {MIN_VIDEO_BITRATE_KBPS} kbps floor"
        ));
    }
    if estimated > constraint.max_file_size_bytes {
        warnings.push(format!(
            "estimated output of {estimated} bytes exceeds the {} byte cap",
            constraint.max_file_size_bytes
        ));
    }

    Plan {
        resolution: Resolution::Transcode {
            profile: TranscodeProfile {
                width,
                height,
                frame_rate,
                video_bitrate_kbps,
                audio_bitrate_bps: audio.bitrate_bps,
                audio_sample_rate_hz: audio.sample_rate_hz,
                trim: too_long.then(|| TrimWindow::leading(output_duration)),
            },
        },
        output_duration_secs: output_duration,
        estimated_size_bytes: estimated,
        warnings,
    }
}
