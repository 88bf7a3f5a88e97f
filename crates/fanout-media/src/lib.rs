//! fanout-media: HLS playlist handling and single-payload HLS bundles.

pub mod bundle;
pub mod hls;

pub use bundle::{expected_segment_count, HlsBundle, HlsSegment};
pub use hls::{ByteRange, MediaPlaylist, Segment};
