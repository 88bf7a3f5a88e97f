use std::path::Path;

use crate::types::MediaInfo;

/// Reads container metadata from a file on disk.
///
/// Probing is synchronous and may block on file IO; async callers run it
/// through `spawn_blocking`.
pub trait Prober: Send + Sync {
    /// Short tag used in logs and in composite error messages.
    fn name(&self) -> &'static str;

    fn probe(&self, path: &Path) -> fanout_core::Result<MediaInfo>;

    /// Cheap pre-check, usually by extension. `true` is no promise that
    /// [`Prober::probe`] succeeds.
    fn supports(&self, path: &Path) -> bool;
}
