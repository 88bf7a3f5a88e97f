//! # fanout-av
//!
//! Everything that shells out to ffmpeg and ffprobe:
//!
//! - **Tool discovery** ([`ToolRegistry`]) and async execution with progress
//!   streaming and cancellation ([`ToolCommand`]).
//! - **Scratch space** per destination run ([`Workspace`]).
//! - **Probe backend** ([`FfprobeProber`]) for containers the header prober
//!   cannot read.
//! - **Encoding engines** ([`TranscodeEngine`]): software and hardware.
//! - **Actions** ([`actions`]): trim, three-stage transcode, HLS packaging
//!   and thumbnails.

pub mod actions;
pub mod command;
pub mod control;
pub mod engine;
pub mod probe;
pub mod progress;
pub mod tools;
pub mod workspace;

pub use actions::{
    extract_thumbnail, package_hls, segment_hls, transcode, trim, HlsOptions, SegmentMode,
    TranscodeRequest, TrimMethod, TrimOutcome,
};
pub use command::{ToolCommand, ToolOutput};
pub use control::JobControl;
pub use engine::{select_engine, HardwareEngine, HwAccel, SoftwareEngine, TranscodeEngine};
pub use probe::FfprobeProber;
pub use progress::{EncodeProgress, ProgressParser};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::Workspace;
