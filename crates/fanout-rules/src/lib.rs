//! # fanout-rules
//!
//! Destination constraint resolution.
//!
//! - [`resolve`] -- decides whether a source needs nothing, a stream-copy
//!   trim, a full transcode, or must be rejected outright.
//! - [`math`] -- the derivations behind a transcode target: even scaled
//!   dimensions, the clamped video bitrate, and the output frame rate.

pub mod math;
pub mod resolver;

pub use math::{compute_bitrate_kbps, compute_dimensions, compute_frame_rate};
pub use resolver::{resolve, AudioTarget, Plan, Resolution};
