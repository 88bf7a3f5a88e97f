//! Per-run scratch space.
//!
//! Every destination run owns one [`Workspace`]. Intermediates (trimmed
//! files, PCM audio, HLS segments) live in its temporary directory, which is
//! removed when the workspace is dropped.

use std::path::{Path, PathBuf};

use fanout_core::{Error, Result};
use tempfile::TempDir;

#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a workspace whose directory name starts with `label`.
    pub fn new(label: &str) -> Result<Self> {
        let prefix = format!("fanout-{}-", sanitize(label));
        let temp_dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir()
            .map_err(|e| Error::tool("workspace", format!("failed to create temp dir: {e}")))?;
        tracing::debug!(path = %temp_dir.path().display(), "workspace created");
        Ok(Self { temp_dir })
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path for a named file inside the workspace.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Create (if needed) and return a subdirectory.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(32)
        .collect()
}
