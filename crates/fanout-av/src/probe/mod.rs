//! Probe backends that shell out to external tools.

mod ffprobe;

pub use ffprobe::{parse_frame_rate, FfprobeProber};
