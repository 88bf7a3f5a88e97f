//! Single-payload HLS bundles.
//!
//! Segments produced by the segmenter are concatenated into one payload and
//! addressed through `#EXT-X-BYTERANGE`, so a destination receives one
//! upload plus a manifest instead of one request per segment.

use bytes::{Bytes, BytesMut};
use fanout_core::{Error, Result};
use serde::Serialize;

use crate::hls::{generate_media_playlist, parse_media_playlist, ByteRange, MediaPlaylist, Segment};

/// Slack for container timestamps that overshoot a segment boundary by a few
/// milliseconds.
const DURATION_EPSILON_SECS: f64 = 0.001;

/// Segments a VOD of `duration_secs` must have at `segment_duration_secs` each.
pub fn expected_segment_count(duration_secs: f64, segment_duration_secs: f64) -> usize {
    if !(segment_duration_secs > 0.0) || !(duration_secs > 0.0) {
        return 1;
    }
    (((duration_secs - DURATION_EPSILON_SECS) / segment_duration_secs).ceil() as usize).max(1)
}

/// One segment of a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct HlsSegment {
    /// Position in playback order, contiguous from 0.
    pub index: usize,
    pub duration_secs: f64,
    /// Where this segment lives inside the payload.
    pub byte_range: ByteRange,
    #[serde(skip)]
    pub data: Bytes,
}

/// Manifest, ordered segments and thumbnail for one HLS delivery.
#[derive(Debug, Clone, Serialize)]
pub struct HlsBundle {
    pub manifest: String,
    /// URI the manifest uses for the concatenated payload.
    pub payload_uri: String,
    pub segments: Vec<HlsSegment>,
    #[serde(skip)]
    pub thumbnail: Option<Bytes>,
}

impl HlsBundle {
    /// Lay segments out back to back and write the byte-range manifest.
    pub fn assemble(
        parts: Vec<(f64, Bytes)>,
        payload_uri: impl Into<String>,
        thumbnail: Option<Bytes>,
    ) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::Packaging("no segments to bundle".into()));
        }
        let payload_uri = payload_uri.into();

        let mut offset = 0u64;
        let mut segments = Vec::with_capacity(parts.len());
        for (index, (duration_secs, data)) in parts.into_iter().enumerate() {
            if data.is_empty() {
                return Err(Error::Packaging(format!("segment {index} is empty")));
            }
            let length = data.len() as u64;
            segments.push(HlsSegment {
                index,
                duration_secs,
                byte_range: ByteRange { offset, length },
                data,
            });
            offset += length;
        }

        let playlist = MediaPlaylist::vod(
            segments
                .iter()
                .map(|s| Segment {
                    duration: s.duration_secs,
                    uri: payload_uri.clone(),
                    byte_range: Some(s.byte_range),
                })
                .collect(),
        );

        tracing::debug!(
            segments = segments.len(),
            total_bytes = offset,
            "assembled HLS bundle"
        );

        Ok(Self {
            manifest: generate_media_playlist(&playlist),
            payload_uri,
            segments,
            thumbnail,
        })
    }

    /// Total size of all segments.
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.byte_range.length).sum()
    }

    /// Sum of segment durations.
    pub fn duration_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_secs).sum()
    }

    /// The concatenated segment bytes, in playback order.
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_bytes() as usize);
        for segment in &self.segments {
            buf.extend_from_slice(&segment.data);
        }
        buf.freeze()
    }

    /// Check the bundle invariants.
    ///
    /// - indices are contiguous from 0
    /// - byte ranges tile the payload with no gap or overlap, and their sum
    ///   equals the payload size
    /// - the manifest lists the same ranges in the same order
    /// - the segment count matches the source duration
    pub fn verify(&self, duration_secs: f64, segment_duration_secs: f64) -> Result<()> {
        let mut expected_offset = 0u64;
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.index != i {
                return Err(Error::Packaging(format!(
                    "segment index {} at position {i}",
                    segment.index
                )));
            }
            if segment.byte_range.offset != expected_offset
                || segment.byte_range.length != segment.data.len() as u64
            {
                return Err(Error::Packaging(format!(
                    "segment {i} byte range {:?} does not match its data",
                    segment.byte_range
                )));
            }
            expected_offset = segment.byte_range.end();
        }
        if expected_offset != self.payload().len() as u64 {
            return Err(Error::Packaging("segment lengths do not sum to payload size".into()));
        }

        let manifest = parse_media_playlist(&self.manifest)?;
        let listed: Vec<Option<ByteRange>> =
            manifest.segments.iter().map(|s| s.byte_range).collect();
        let actual: Vec<Option<ByteRange>> =
            self.segments.iter().map(|s| Some(s.byte_range)).collect();
        if listed != actual {
            return Err(Error::Packaging(
                "manifest byte ranges do not match segment boundaries".into(),
            ));
        }

        let expected = expected_segment_count(duration_secs, segment_duration_secs);
        if manifest.segments.len() != expected {
            return Err(Error::Packaging(format!(
                "manifest has {} segments, expected {expected} for {duration_secs:.3}s at {segment_duration_secs}s",
                manifest.segments.len()
            )));
        }
        Ok(())
    }
}
