//! HLS playlist types.

use serde::{Deserialize, Serialize};

/// A byte range within a single payload resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A single segment in a media playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment duration in seconds.
    pub duration: f64,
    /// URI for this segment.
    pub uri: String,
    /// Sub-range of `uri` holding this segment (`#EXT-X-BYTERANGE`).
    pub byte_range: Option<ByteRange>,
}

/// An HLS media playlist describing a sequence of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    /// Maximum segment duration in integer seconds (rounded up).
    pub target_duration: u32,
    /// Sequence number of the first segment.
    pub media_sequence: u64,
    /// Ordered list of segments.
    pub segments: Vec<Segment>,
    /// Whether the playlist is complete. If true, `#EXT-X-ENDLIST` is emitted.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Build a complete VOD playlist; the target duration is derived from the segments.
    pub fn vod(segments: Vec<Segment>) -> Self {
        let target_duration = segments
            .iter()
            .map(|s| s.duration.ceil() as u32)
            .max()
            .unwrap_or(0);
        Self {
            target_duration,
            media_sequence: 0,
            segments,
            ended: true,
        }
    }

    /// Sum of segment durations.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}
