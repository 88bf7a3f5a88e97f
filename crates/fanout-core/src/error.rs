//! Unified error type for fanout.
//!
//! All crates funnel their failures into [`Error`]. The variants follow the
//! pipeline's failure taxonomy: probe, constraint rejection, trim, transcode
//! (tagged with the failing stage), packaging, and the three upload failure
//! classes. [`Error::is_recoverable`] tells the upload engine which failures
//! it may retry locally.

use crate::media::TranscodeStage;

/// Unified error type covering all failure modes in fanout.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source container could not be parsed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The source can never satisfy the destination (e.g. too short).
    #[error("Constraint rejected: {0}")]
    Rejected(String),

    /// Cutting the source to its trim window failed.
    #[error("Trim error: {0}")]
    Trim(String),

    /// Re-encoding failed in one of the transcoder stages.
    #[error("Transcode error [{stage}]: {message}")]
    Transcode {
        /// The stage that failed.
        stage: TranscodeStage,
        /// Human-readable error description.
        message: String,
    },

    /// HLS segmentation or bundle assembly failed.
    #[error("Packaging error: {0}")]
    Packaging(String),

    /// A chunk could not be delivered because of a transport-level failure.
    #[error("Upload chunk error: {0}")]
    UploadChunk(String),

    /// The destination rejected the upload.
    #[error("Upload protocol error{}: {message}", status.map(|s| format!(" [{s}]")).unwrap_or_default())]
    UploadProtocol {
        /// HTTP status returned by the destination, if any.
        status: Option<u16>,
        /// Human-readable error description.
        message: String,
    },

    /// Destination-side processing did not finish within the polling budget.
    #[error("Upload timed out after {attempts} status polls")]
    UploadTimeout {
        /// Number of status polls issued before giving up.
        attempts: u32,
    },

    /// The run was cancelled cooperatively.
    #[error("Cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Input or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A pipeline step failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The pipeline step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure may be retried locally without surfacing it.
    ///
    /// Only chunk transport failures qualify; the upload engine still needs
    /// an offset query on the destination before it may resume.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::UploadChunk(_))
    }

    /// Stable snake_case tag used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Probe(_) => "probe",
            Error::Rejected(_) => "constraint_reject",
            Error::Trim(_) => "trim",
            Error::Transcode { .. } => "transcode",
            Error::Packaging(_) => "packaging",
            Error::UploadChunk(_) => "upload_chunk",
            Error::UploadProtocol { .. } => "upload_protocol",
            Error::UploadTimeout { .. } => "upload_timeout",
            Error::Cancelled => "cancelled",
            Error::Io { .. } => "io",
            Error::Tool { .. } => "tool",
            Error::Validation(_) => "validation",
            Error::Pipeline { .. } => "pipeline",
            Error::Internal(_) => "internal",
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Transcode`].
    pub fn transcode(stage: TranscodeStage, message: impl Into<String>) -> Self {
        Error::Transcode {
            stage,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::UploadProtocol`].
    pub fn upload_protocol(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::UploadProtocol {
            status,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_display() {
        let err = Error::Probe("corrupt header".into());
        assert_eq!(err.to_string(), "Probe error: corrupt header");
        assert_eq!(err.kind(), "probe");
    }

    #[test]
    fn rejected_display() {
        let err = Error::Rejected("2.0s is below the 3.0s minimum".into());
        assert_eq!(
            err.to_string(),
            "Constraint rejected: 2.0s is below the 3.0s minimum"
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn transcode_display_names_stage() {
        let err = Error::transcode(TranscodeStage::Mux, "no streams");
        assert_eq!(err.to_string(), "Transcode error [mux]: no streams");
        assert_eq!(err.kind(), "transcode");
    }

    #[test]
    fn upload_protocol_display_with_status() {
        let err = Error::upload_protocol(Some(413), "payload too large");
        assert_eq!(
            err.to_string(),
            "Upload protocol error [413]: payload too large"
        );
    }

    #[test]
    fn upload_protocol_display_without_status() {
        let err = Error::upload_protocol(None, "missing media_id");
        assert_eq!(err.to_string(), "Upload protocol error: missing media_id");
    }

    #[test]
    fn upload_timeout_display() {
        let err = Error::UploadTimeout { attempts: 60 };
        assert_eq!(err.to_string(), "Upload timed out after 60 status polls");
        assert_eq!(err.kind(), "upload_timeout");
    }

    #[test]
    fn only_chunk_errors_are_recoverable() {
        assert!(Error::UploadChunk("reset".into()).is_recoverable());
        assert!(!Error::UploadTimeout { attempts: 1 }.is_recoverable());
        assert!(!Error::upload_protocol(Some(400), "bad").is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
    }

    #[test]
    fn pipeline_display() {
        let err = Error::pipeline("upload", "session lost");
        assert_eq!(err.to_string(), "Pipeline error [upload]: session lost");
    }
}
