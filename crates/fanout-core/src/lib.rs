//! fanout-core: the vocabulary every other fanout crate speaks.
//!
//! - [`media`]: the probed source, a destination's limits, and the trim
//!   and transcode targets derived from them.
//! - [`error`]: one error enum for the whole pipeline.
//! - [`config`]: JSON configuration with per-destination endpoints.
//! - [`events`]: the bounded progress channel and run stages.
//! - [`ids`]: run identifiers.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

pub use error::{Error, Result};
pub use ids::{DestinationRunId, RunId};
pub use media::*;
