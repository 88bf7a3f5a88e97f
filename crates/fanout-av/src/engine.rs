//! Video encoding backends.
//!
//! The transcoder only talks to [`TranscodeEngine`]. [`SoftwareEngine`] is
//! always available; [`HardwareEngine`] wraps one of ffmpeg's accelerated
//! H.264 encoders and produces the same output format.

use std::fmt;

use fanout_core::config::TranscodeConfig;
use fanout_core::TranscodeProfile;

use crate::tools::ToolRegistry;

/// One way of producing the H.264 video stream.
pub trait TranscodeEngine: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn is_hardware(&self) -> bool;

    /// ffmpeg encoder name passed to `-c:v`.
    fn encoder(&self) -> &'static str;

    /// Decoder flags that must appear before `-i`.
    fn input_args(&self) -> Vec<String>;

    /// `-vf` chain that scales to the profile and fixes the frame rate.
    fn video_filter(&self, profile: &TranscodeProfile) -> String;

    /// Encoder and rate-control flags.
    fn video_codec_args(&self, profile: &TranscodeProfile, preset: &str) -> Vec<String>;
}

/// Rate control shared by every engine: target bitrate with a VBV cap so
/// the size estimate holds.
fn bitrate_args(profile: &TranscodeProfile) -> Vec<String> {
    let kbps = profile.video_bitrate_kbps;
    vec![
        "-b:v".into(),
        format!("{kbps}k"),
        "-maxrate".into(),
        format!("{kbps}k"),
        "-bufsize".into(),
        format!("{}k", kbps.saturating_mul(2)),
    ]
}

fn fps_value(frame_rate: f64) -> String {
    // ffmpeg accepts decimals; trim the noise off values like 29.97002997.
    let rounded = (frame_rate * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

// ---------------------------------------------------------------------------
// Software
// ---------------------------------------------------------------------------

/// libx264 on the CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareEngine;

impl TranscodeEngine for SoftwareEngine {
    fn name(&self) -> &str {
        "software"
    }

    fn is_hardware(&self) -> bool {
        false
    }

    fn encoder(&self) -> &'static str {
        "libx264"
    }

    fn input_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn video_filter(&self, profile: &TranscodeProfile) -> String {
        format!(
            "scale={}:{},fps={},format=yuv420p",
            profile.width,
            profile.height,
            fps_value(profile.frame_rate)
        )
    }

    fn video_codec_args(&self, profile: &TranscodeProfile, preset: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-c:v".into(),
            self.encoder().into(),
            "-profile:v".into(),
            "high".into(),
            "-preset".into(),
            preset.into(),
        ];
        args.extend(bitrate_args(profile));
        args
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// Supported acceleration methods, as named in `transcode.hw_accel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccel {
    VideoToolbox,
    Nvenc,
    Vaapi,
    Qsv,
}

impl HwAccel {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "videotoolbox" => Some(Self::VideoToolbox),
            "nvenc" => Some(Self::Nvenc),
            "vaapi" => Some(Self::Vaapi),
            "qsv" => Some(Self::Qsv),
            _ => None,
        }
    }
}

impl fmt::Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VideoToolbox => write!(f, "videotoolbox"),
            Self::Nvenc => write!(f, "nvenc"),
            Self::Vaapi => write!(f, "vaapi"),
            Self::Qsv => write!(f, "qsv"),
        }
    }
}

/// An accelerated H.264 encoder.
#[derive(Debug, Clone)]
pub struct HardwareEngine {
    method: HwAccel,
    name: String,
}

impl HardwareEngine {
    pub fn new(method: HwAccel) -> Self {
        Self {
            method,
            name: format!("hardware ({method})"),
        }
    }

    pub fn method(&self) -> HwAccel {
        self.method
    }
}

impl TranscodeEngine for HardwareEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_hardware(&self) -> bool {
        true
    }

    fn encoder(&self) -> &'static str {
        match self.method {
            HwAccel::VideoToolbox => "h264_videotoolbox",
            HwAccel::Nvenc => "h264_nvenc",
            HwAccel::Vaapi => "h264_vaapi",
            HwAccel::Qsv => "h264_qsv",
        }
    }

    fn input_args(&self) -> Vec<String> {
        let args: &[&str] = match self.method {
            HwAccel::VideoToolbox => &["-hwaccel", "videotoolbox"],
            HwAccel::Nvenc => &["-hwaccel", "cuda"],
            HwAccel::Vaapi => &["-hwaccel", "vaapi", "-hwaccel_output_format", "vaapi"],
            HwAccel::Qsv => &["-hwaccel", "qsv"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }

    fn video_filter(&self, profile: &TranscodeProfile) -> String {
        let fps = fps_value(profile.frame_rate);
        match self.method {
            // Frames stay on the GPU surface.
            HwAccel::Vaapi => format!(
                "fps={fps},scale_vaapi=w={}:h={}:format=nv12",
                profile.width, profile.height
            ),
            _ => format!(
                "scale={}:{},fps={fps},format=yuv420p",
                profile.width, profile.height
            ),
        }
    }

    // Hardware encoders ignore x264 presets.
    fn video_codec_args(&self, profile: &TranscodeProfile, _preset: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["-c:v".into(), self.encoder().into()];
        if self.method != HwAccel::Vaapi {
            args.extend(["-profile:v".to_string(), "high".to_string()]);
        }
        args.extend(bitrate_args(profile));
        args
    }
}

/// Pick the configured hardware engine when ffmpeg lists its encoder,
/// otherwise software.
pub async fn select_engine(
    config: &TranscodeConfig,
    tools: &ToolRegistry,
) -> Box<dyn TranscodeEngine> {
    let Some(requested) = config.hw_accel.as_deref().filter(|m| *m != "none") else {
        return Box::new(SoftwareEngine);
    };
    let Some(method) = HwAccel::parse(requested) else {
        tracing::warn!(hw_accel = requested, "unknown hardware acceleration method, using software");
        return Box::new(SoftwareEngine);
    };

    let engine = HardwareEngine::new(method);
    if tools.has_encoder(engine.encoder()).await {
        tracing::info!(encoder = engine.encoder(), "using hardware encoder");
        Box::new(engine)
    } else {
        tracing::warn!(
            encoder = engine.encoder(),
            "hardware encoder not available in ffmpeg, using software"
        );
        Box::new(SoftwareEngine)
    }
}
