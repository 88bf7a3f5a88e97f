//! Shared fixtures for the CLI tests: a real MP4 header on disk and a
//! config file pointing destinations at a mock server.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

/// A scratch directory holding a 12 s 1280x720 MP4 with audio.
pub struct Fixture {
    pub dir: TempDir,
    pub video: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, fanout_probe::mp4::fixture::mp4(1280, 720, 12, true)).unwrap();
        Self { dir, video }
    }

    /// Write `config` as JSON next to the video.
    pub fn config(&self, config: &Value) -> PathBuf {
        let path = self.dir.path().join("fanout.json");
        std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Destination entry with the given limits and a single-shot endpoint.
pub fn single_shot_destination(name: &str, url: &str, max_duration_secs: f64, max_width: u32) -> Value {
    json!({
        "name": name,
        "credential": format!("{name}-token"),
        "constraint": {
            "min_duration_secs": 3.0,
            "max_duration_secs": max_duration_secs,
            "max_file_size_bytes": 512 * 1024 * 1024u64,
            "max_width": max_width,
            "max_frame_rate": 60.0
        },
        "endpoint": { "protocol": "single_shot", "url": url }
    })
}
