//! # fanout-probe
//!
//! Container-level media probing. Nothing here decodes frames: MP4/MOV is
//! read by walking ISO BMFF boxes (skipping `mdat` with a seek), and
//! Matroska/WebM by reading segment info and track headers.
//!
//! ```no_run
//! use fanout_probe::{HeaderProber, Prober};
//! use std::path::Path;
//!
//! let info = HeaderProber::new().probe(Path::new("clip.mp4")).unwrap();
//! let media = info.to_source_media().unwrap();
//! println!("{}x{} for {:.1}s", media.width, media.height, media.duration_secs);
//! ```

pub mod boxes;
pub mod composite;
pub mod header;
pub mod mp4;
pub mod prober;
pub mod types;

pub use composite::CompositeProber;
pub use header::HeaderProber;
pub use prober::Prober;
pub use types::{duration_from_secs, AudioTrack, MediaInfo, VideoTrack};
