//! Header-only prober for MP4/MOV and Matroska/WebM.
//!
//! MP4 goes through the in-crate box walker; Matroska goes through the
//! `matroska` crate, which reads segment info and track headers.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use fanout_core::{Container, VideoCodec};

use crate::mp4;
use crate::prober::Prober;
use crate::types::{duration_from_secs, AudioTrack, MediaInfo, VideoTrack};

/// Pure-Rust [`Prober`] that never decodes a frame.
pub struct HeaderProber;

impl HeaderProber {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HeaderProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for HeaderProber {
    fn name(&self) -> &'static str {
        "header"
    }

    fn supports(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => matches!(
                ext.to_lowercase().as_str(),
                "mp4" | "m4v" | "mov" | "mkv" | "webm"
            ),
            None => false,
        }
    }

    fn probe(&self, path: &Path) -> fanout_core::Result<MediaInfo> {
        match detect_container(path)? {
            Container::Mp4 => probe_mp4(path),
            Container::Mkv => probe_mkv(path),
            Container::Other => Err(fanout_core::Error::Probe(format!(
                "unsupported container: {}",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Container detection
// ---------------------------------------------------------------------------

/// Detect container format from file magic bytes, with extension fallback.
pub fn detect_container(path: &Path) -> fanout_core::Result<Container> {
    let mut file = File::open(path).map_err(|e| fanout_core::Error::Probe(e.to_string()))?;

    let mut magic = [0u8; 12];
    let n = file.read(&mut magic).unwrap_or(0);
    if n >= 8 {
        if magic[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
            return Ok(Container::Mkv);
        }
        if matches!(&magic[4..8], b"ftyp" | b"moov" | b"mdat" | b"free" | b"wide") {
            return Ok(Container::Mp4);
        }
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => match ext.to_lowercase().as_str() {
            "mkv" | "webm" => Ok(Container::Mkv),
            "mp4" | "m4v" | "mov" => Ok(Container::Mp4),
            _ => Ok(Container::Other),
        },
        None => Ok(Container::Other),
    }
}

// ---------------------------------------------------------------------------
// MP4 probing
// ---------------------------------------------------------------------------

fn probe_mp4(path: &Path) -> fanout_core::Result<MediaInfo> {
    let file = File::open(path).map_err(|e| fanout_core::Error::Probe(e.to_string()))?;
    let file_size = file
        .metadata()
        .map_err(|e| fanout_core::Error::Probe(e.to_string()))?
        .len();
    let mut reader = BufReader::new(file);

    let summary = mp4::read_moov(&mut reader)
        .map_err(|e| fanout_core::Error::Probe(format!("MP4 parse error: {e}")))?;

    let duration = summary
        .duration_secs()
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(duration_from_secs)
        .transpose()?;

    let mut video_tracks = Vec::new();
    let mut audio_tracks = Vec::new();
    for (idx, track) in summary.tracks.iter().enumerate() {
        if track.is_video() {
            video_tracks.push(VideoTrack {
                codec: track
                    .fourcc
                    .as_ref()
                    .map_or(VideoCodec::Other, VideoCodec::from_fourcc),
                width: track.width,
                height: track.height,
                frame_rate: track.frame_rate(),
                default: idx == 0,
            });
        } else if track.is_audio() {
            audio_tracks.push(AudioTrack {
                codec: track
                    .fourcc
                    .map(|f| String::from_utf8_lossy(&f).into_owned())
                    .unwrap_or_default(),
                channels: track.channels as u32,
                sample_rate: (track.sample_rate > 0).then_some(track.sample_rate),
                default: audio_tracks.is_empty(),
            });
        }
    }

    Ok(MediaInfo {
        file_path: path.to_path_buf(),
        file_size,
        container: Container::Mp4,
        duration,
        video_tracks,
        audio_tracks,
    })
}

// ---------------------------------------------------------------------------
// MKV probing
// ---------------------------------------------------------------------------

fn probe_mkv(path: &Path) -> fanout_core::Result<MediaInfo> {
    let file = File::open(path).map_err(|e| fanout_core::Error::Probe(e.to_string()))?;
    let file_size = file
        .metadata()
        .map_err(|e| fanout_core::Error::Probe(e.to_string()))?
        .len();
    let reader = BufReader::new(file);

    let mkv = matroska::Matroska::open(reader)
        .map_err(|e| fanout_core::Error::Probe(format!("MKV parse error: {e}")))?;

    let mut video_tracks = Vec::new();
    let mut audio_tracks = Vec::new();

    for track in &mkv.tracks {
        match &track.settings {
            matroska::Settings::Video(video) => {
                let frame_rate = track
                    .default_duration
                    .filter(|d| d.as_secs_f64() > 0.0)
                    .map(|d| 1.0 / d.as_secs_f64());

                video_tracks.push(VideoTrack {
                    codec: VideoCodec::from_name(&track.codec_id),
                    width: video.pixel_width as u32,
                    height: video.pixel_height as u32,
                    frame_rate,
                    default: track.default,
                });
            }
            matroska::Settings::Audio(audio) => {
                audio_tracks.push(AudioTrack {
                    codec: track.codec_id.clone(),
                    channels: audio.channels as u32,
                    sample_rate: Some(audio.sample_rate as u32),
                    default: track.default,
                });
            }
            matroska::Settings::None => {}
        }
    }

    Ok(MediaInfo {
        file_path: path.to_path_buf(),
        file_size,
        container: Container::Mkv,
        duration: mkv.info.duration,
        video_tracks,
        audio_tracks,
    })
}
