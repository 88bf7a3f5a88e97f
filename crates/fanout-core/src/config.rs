//! Run configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! tool paths, encode defaults, HLS settings, upload defaults, and the list
//! of destinations for a run. Every section defaults sensibly so a
//! completely empty `{}` file is valid (it simply has no destinations).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::{DeliveryFormat, DestinationConstraint};
use crate::Error;

/// Hardware acceleration methods understood by the transcoder.
pub const HW_ACCEL_METHODS: &[&str] = &["none", "videotoolbox", "nvenc", "vaapi", "qsv"];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub hls: HlsConfig,
    pub upload: UploadConfig,
    pub destinations: Vec<DestinationConfig>,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration from a file, failing on a missing or malformed file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(ref hw) = self.transcode.hw_accel {
            if !HW_ACCEL_METHODS.contains(&hw.as_str()) {
                warnings.push(format!(
                    "transcode.hw_accel '{}' is not a recognized method (valid: {})",
                    hw,
                    HW_ACCEL_METHODS.join(", ")
                ));
            }
        }

        if self.upload.chunk_size_bytes == 0 {
            warnings.push("upload.chunk_size_bytes is 0".into());
        }
        if self.hls.segment_duration_secs == 0 {
            warnings.push("hls.segment_duration_secs is 0".into());
        }

        for (i, dest) in self.destinations.iter().enumerate() {
            if dest.name.is_empty() {
                warnings.push(format!("destinations[{i}].name is empty"));
            }
            if dest.credential.is_empty() {
                warnings.push(format!("destinations[{i}].credential is empty"));
            }
            let c = &dest.constraint;
            if c.min_duration_secs > c.max_duration_secs {
                warnings.push(format!(
                    "destinations[{i}] min_duration_secs ({}) exceeds max_duration_secs ({})",
                    c.min_duration_secs, c.max_duration_secs
                ));
            }
            if c.max_width < 2 {
                warnings.push(format!("destinations[{i}].constraint.max_width is below 2"));
            }
            if let Some(ref o) = dest.upload {
                if o.chunk_size_bytes == Some(0) {
                    warnings.push(format!("destinations[{i}].upload.chunk_size_bytes is 0"));
                }
            }
            if dest.endpoint.url().is_empty() {
                warnings.push(format!("destinations[{i}].endpoint has no url"));
            }
        }

        let mut names: Vec<&str> = self.destinations.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        for pair in names.windows(2) {
            if pair[0] == pair[1] && !pair[0].is_empty() {
                warnings.push(format!("destination name '{}' is used more than once", pair[0]));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Re-encode defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Hardware acceleration method (none, videotoolbox, nvenc, vaapi, qsv).
    /// Falls back to libx264 when unset or unavailable.
    pub hw_accel: Option<String>,
    pub audio_bitrate_bps: u32,
    pub audio_sample_rate_hz: u32,
    pub preset: String,
    /// Per-invocation ffmpeg timeout. `None` means no limit.
    pub timeout_secs: Option<u64>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            hw_accel: None,
            audio_bitrate_bps: 128_000,
            audio_sample_rate_hz: 44_100,
            preset: "medium".into(),
            timeout_secs: None,
        }
    }
}

/// HLS packaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub segment_duration_secs: u32,
    pub thumbnail_at_secs: f64,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 6,
            thumbnail_at_secs: 1.0,
        }
    }
}

/// Upload engine defaults, overridable per destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_size_bytes: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub max_chunk_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 8 * 1024 * 1024,
            poll_interval_ms: 5_000,
            max_poll_attempts: 60,
            max_chunk_retries: 5,
            request_timeout_secs: 120,
        }
    }
}

/// Per-destination overrides of [`UploadConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOverrides {
    pub chunk_size_bytes: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
    pub max_chunk_retries: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// One publishing destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub name: String,
    pub constraint: DestinationConstraint,
    /// Bearer token, already issued and refreshed by the caller.
    pub credential: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub delivery: DeliveryFormat,
    #[serde(default)]
    pub upload: Option<UploadOverrides>,
}

impl DestinationConfig {
    /// Effective upload settings: `defaults` with this destination's overrides applied.
    pub fn upload_settings(&self, defaults: &UploadConfig) -> UploadConfig {
        let Some(ref o) = self.upload else {
            return defaults.clone();
        };
        UploadConfig {
            chunk_size_bytes: o.chunk_size_bytes.unwrap_or(defaults.chunk_size_bytes),
            poll_interval_ms: o.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            max_poll_attempts: o.max_poll_attempts.unwrap_or(defaults.max_poll_attempts),
            max_chunk_retries: o.max_chunk_retries.unwrap_or(defaults.max_chunk_retries),
            request_timeout_secs: o
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
        }
    }
}

/// Transfer protocol exposed by a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// One request carrying the whole payload, or a URL for the destination to fetch.
    SingleShot {
        url: String,
        /// When set, the destination pulls from this URL instead of receiving bytes.
        #[serde(default)]
        source_url: Option<String>,
        #[serde(default = "default_id_field")]
        id_field: String,
    },
    /// INIT / APPEND / FINALIZE with optional STATUS polling.
    Chunked {
        url: String,
        #[serde(default = "default_media_type")]
        media_type: String,
        #[serde(default = "default_media_category")]
        media_category: String,
    },
    /// Byte-range PUT against a session URL.
    Resumable {
        /// Pre-negotiated session URL. Used when `initiate_url` is unset.
        #[serde(default)]
        session_url: Option<String>,
        /// Endpoint that hands out a session URL via `Location`.
        #[serde(default)]
        initiate_url: Option<String>,
        #[serde(default = "default_id_field")]
        id_field: String,
    },
}

impl EndpointConfig {
    /// Primary URL of the endpoint, or an empty string when none is configured.
    pub fn url(&self) -> &str {
        match self {
            Self::SingleShot { url, .. } | Self::Chunked { url, .. } => url,
            Self::Resumable {
                session_url,
                initiate_url,
                ..
            } => initiate_url
                .as_deref()
                .or(session_url.as_deref())
                .unwrap_or(""),
        }
    }

    /// Short protocol tag for logs.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::SingleShot { .. } => "single_shot",
            Self::Chunked { .. } => "chunked",
            Self::Resumable { .. } => "resumable",
        }
    }
}

fn default_id_field() -> String {
    "id".into()
}
fn default_media_type() -> String {
    "video/mp4".into()
}
fn default_media_category() -> String {
    "video".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination_json() -> &'static str {
        r#"{
            "destinations": [{
                "name": "shorts",
                "credential": "tok",
                "constraint": {
                    "min_duration_secs": 3,
                    "max_duration_secs": 180,
                    "max_file_size_bytes": 536870912,
                    "max_width": 1920,
                    "max_frame_rate": 60
                },
                "endpoint": {"protocol": "resumable", "initiate_url": "https://up.example/init"},
                "delivery": "hls",
                "upload": {"chunk_size_bytes": 1048576}
            }]
        }"#
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.destinations.is_empty());
        assert_eq!(cfg.transcode.audio_bitrate_bps, 128_000);
        assert_eq!(cfg.transcode.audio_sample_rate_hz, 44_100);
        assert_eq!(cfg.transcode.preset, "medium");
        assert_eq!(cfg.hls.segment_duration_secs, 6);
        assert_eq!(cfg.upload.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(cfg.upload.max_poll_attempts, 60);
    }

    #[test]
    fn default_config_no_warnings() {
        let warnings = Config::default().validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.upload.poll_interval_ms, 5_000);
        assert!(cfg.transcode.hw_accel.is_none());
    }

    #[test]
    fn parse_destination() {
        let cfg = Config::from_json(destination_json()).unwrap();
        let dest = &cfg.destinations[0];
        assert_eq!(dest.name, "shorts");
        assert_eq!(dest.delivery, DeliveryFormat::Hls);
        assert_eq!(dest.constraint.max_width, 1920);
        assert_eq!(dest.endpoint.protocol_name(), "resumable");
        assert_eq!(dest.endpoint.url(), "https://up.example/init");
        match &dest.endpoint {
            EndpointConfig::Resumable { id_field, .. } => assert_eq!(id_field, "id"),
            other => panic!("unexpected endpoint: {other:?}"),
        }
    }

    #[test]
    fn upload_overrides_merge_over_defaults() {
        let cfg = Config::from_json(destination_json()).unwrap();
        let settings = cfg.destinations[0].upload_settings(&cfg.upload);
        assert_eq!(settings.chunk_size_bytes, 1_048_576);
        assert_eq!(settings.max_poll_attempts, cfg.upload.max_poll_attempts);
    }

    #[test]
    fn chunked_endpoint_defaults() {
        let json = r#"{"protocol": "chunked", "url": "https://up.example/media"}"#;
        let ep: EndpointConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            ep,
            EndpointConfig::Chunked {
                url: "https://up.example/media".into(),
                media_type: "video/mp4".into(),
                media_category: "video".into(),
            }
        );
    }

    #[test]
    fn invalid_hw_accel_warns() {
        let mut cfg = Config::default();
        cfg.transcode.hw_accel = Some("cuda".into());
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("hw_accel")));
    }

    #[test]
    fn inverted_duration_bounds_warn() {
        let mut cfg = Config::from_json(destination_json()).unwrap();
        cfg.destinations[0].constraint.min_duration_secs = 500.0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("min_duration_secs")));
    }

    #[test]
    fn empty_credential_and_duplicate_names_warn() {
        let mut cfg = Config::from_json(destination_json()).unwrap();
        let mut twin = cfg.destinations[0].clone();
        twin.credential.clear();
        cfg.destinations.push(twin);
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("credential is empty")));
        assert!(warnings.iter().any(|w| w.contains("more than once")));
    }

    #[test]
    fn parse_invalid_json_fails() {
        assert!(Config::from_json("{not json").is_err());
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert!(cfg.destinations.is_empty());
    }

    #[test]
    fn load_or_default_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/fanout.json")));
        assert_eq!(cfg.hls.segment_duration_secs, 6);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fanout.json");
        std::fs::write(&path, destination_json()).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.destinations.len(), 1);
    }
}
