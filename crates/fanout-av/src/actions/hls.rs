//! HLS segmentation and bundle assembly.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use fanout_core::events::RunStage;
use fanout_core::{Error, Result, VideoCodec};
use fanout_media::hls::parse_media_playlist;
use fanout_media::{expected_segment_count, HlsBundle, MediaPlaylist};

use super::{ffmpeg_command, keyframe_args, run_ffmpeg};
use crate::actions::thumbnail::extract_thumbnail;
use crate::control::JobControl;
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// URI the bundle manifest uses for the concatenated payload.
const PAYLOAD_URI: &str = "payload.ts";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentMode {
    /// Repackage packets; needs H.264 with keyframes on segment boundaries.
    Copy,
    /// Re-encode with forced keyframes. `None` bitrate means CRF 20.
    Reencode { bitrate_kbps: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HlsOptions {
    pub segment_duration_secs: u32,
    pub thumbnail_at_secs: f64,
    /// Bitrate for the re-encode fallback.
    pub bitrate_kbps: Option<u32>,
}

/// Segment `input` into MPEG-TS files plus `index.m3u8` under `out_dir`.
/// Returns the playlist path.
pub async fn segment_hls(
    tools: &ToolRegistry,
    input: &Path,
    out_dir: &Path,
    segment_duration_secs: u32,
    mode: SegmentMode,
    duration_secs: f64,
    control: &JobControl,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let seg_pattern = out_dir.join("seg%05d.ts");
    let playlist = out_dir.join("index.m3u8");

    let mut cmd = ffmpeg_command(tools, control)?;
    cmd.arg("-i")
        .arg(input.to_string_lossy())
        .args(["-map", "0:v:0", "-map", "0:a:0?"]);
    match mode {
        SegmentMode::Copy => {
            cmd.args(["-c", "copy"]);
        }
        SegmentMode::Reencode { bitrate_kbps } => {
            cmd.args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"]);
            match bitrate_kbps {
                Some(kbps) => cmd.args(["-b:v".to_string(), format!("{kbps}k")]),
                None => cmd.args(["-crf", "20"]),
            };
            cmd.args(keyframe_args(segment_duration_secs))
                .args(["-sc_threshold", "0", "-c:a", "aac", "-b:a", "128k"]);
        }
    }
    cmd.args(["-f", "hls", "-hls_segment_type", "mpegts", "-hls_playlist_type", "vod"])
        .args(["-hls_time", &segment_duration_secs.to_string()])
        .args(["-hls_segment_filename", &seg_pattern.to_string_lossy()])
        .arg(playlist.to_string_lossy());

    tracing::info!(
        input = %input.display(),
        segment_duration_secs,
        mode = ?mode,
        "segmenting for HLS"
    );
    run_ffmpeg(&cmd, control, RunStage::Package, duration_secs, "segmenting").await?;
    Ok(playlist)
}

/// Segment, read back and bundle a transcoded file, with a thumbnail.
///
/// H.264 input is copied; when that is impossible or produces the wrong
/// number of segments the input is re-encoded with keyframes on every
/// boundary. The returned bundle has passed [`HlsBundle::verify`].
pub async fn package_hls(
    tools: &ToolRegistry,
    input: &Path,
    codec: VideoCodec,
    duration_secs: f64,
    options: &HlsOptions,
    workspace: &Workspace,
    control: &JobControl,
) -> Result<HlsBundle> {
    let seg = options.segment_duration_secs;
    if seg == 0 {
        return Err(Error::Packaging("segment duration must be positive".into()));
    }
    let expected = expected_segment_count(duration_secs, f64::from(seg));

    let mut copied = None;
    if codec == VideoCodec::H264 {
        let dir = workspace.subdir("hls-copy")?;
        match segment_and_parse(tools, input, &dir, seg, SegmentMode::Copy, duration_secs, control).await {
            Ok(playlist) if playlist.segments.len() == expected => copied = Some((dir, playlist)),
            Ok(playlist) => {
                let message = format!(
                    "copy segmentation produced {} segments, expected {expected}; re-encoding",
                    playlist.segments.len()
                );
                tracing::warn!(%message);
                control.progress.warning(RunStage::Package, message).await;
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => tracing::warn!(error = %e, "copy segmentation failed, re-encoding"),
        }
    }

    let (dir, playlist) = match copied {
        Some(found) => found,
        None => {
            let dir = workspace.subdir("hls-encode")?;
            let mode = SegmentMode::Reencode {
                bitrate_kbps: options.bitrate_kbps,
            };
            let playlist =
                segment_and_parse(tools, input, &dir, seg, mode, duration_secs, control).await?;
            if playlist.segments.len() != expected {
                return Err(Error::Packaging(format!(
                    "segmenter produced {} segments, expected {expected}",
                    playlist.segments.len()
                )));
            }
            (dir, playlist)
        }
    };

    let parts = read_segments(&dir, &playlist).await?;

    let thumbnail = match extract_thumbnail(
        tools,
        input,
        options.thumbnail_at_secs,
        duration_secs,
        workspace,
        control,
    )
    .await
    {
        Ok(jpeg) => Some(jpeg),
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            control
                .progress
                .warning(RunStage::Package, format!("thumbnail unavailable: {e}"))
                .await;
            None
        }
    };

    let bundle = HlsBundle::assemble(parts, PAYLOAD_URI, thumbnail)?;
    bundle.verify(duration_secs, f64::from(seg))?;
    tracing::info!(
        segments = bundle.segments.len(),
        total_bytes = bundle.total_bytes(),
        "HLS bundle ready"
    );
    Ok(bundle)
}

async fn segment_and_parse(
    tools: &ToolRegistry,
    input: &Path,
    dir: &Path,
    segment_duration_secs: u32,
    mode: SegmentMode,
    duration_secs: f64,
    control: &JobControl,
) -> Result<MediaPlaylist> {
    let playlist_path =
        segment_hls(tools, input, dir, segment_duration_secs, mode, duration_secs, control).await?;
    let text = tokio::fs::read_to_string(&playlist_path).await?;
    parse_media_playlist(&text)
}

/// Read segment files in playlist order.
pub(crate) async fn read_segments(dir: &Path, playlist: &MediaPlaylist) -> Result<Vec<(f64, Bytes)>> {
    let mut parts = Vec::with_capacity(playlist.segments.len());
    for segment in &playlist.segments {
        let path = dir.join(&segment.uri);
        let data = tokio::fs::read(&path).await.map_err(|e| {
            Error::Packaging(format!("cannot read segment {}: {e}", path.display()))
        })?;
        parts.push((segment.duration, Bytes::from(data)));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn segments_are_read_in_playlist_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seg00000.ts"), vec![0u8; 40]).unwrap();
        std::fs::write(dir.path().join("seg00001.ts"), vec![1u8; 30]).unwrap();
        let playlist = parse_media_playlist(
            "#EXTM3U\n#EXTINF:6.0,\nseg00000.ts\n#EXTINF:1.5,\nseg00001.ts\n#EXT-X-ENDLIST\n",
        )
        .unwrap();

        let parts = read_segments(dir.path(), &playlist).await.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1.len(), 40);
        assert_eq!(parts[1].0, 1.5);

        let bundle = HlsBundle::assemble(parts, PAYLOAD_URI, None).unwrap();
        bundle.verify(7.5, 6.0).unwrap();
        assert_eq!(bundle.total_bytes(), 70);
    }

    #[tokio::test]
    async fn missing_segment_is_packaging_error() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = parse_media_playlist("#EXTM3U\n#EXTINF:6.0,\nseg00000.ts\n").unwrap();
        let err = read_segments(dir.path(), &playlist).await.unwrap_err();
        assert_matches!(err, Error::Packaging(_));
    }

    #[tokio::test]
    async fn zero_segment_duration_is_rejected() {
        let ws = Workspace::new("hls-test").unwrap();
        let options = HlsOptions {
            segment_duration_secs: 0,
            thumbnail_at_secs: 1.0,
            bitrate_kbps: None,
        };
        let err = package_hls(
            &ToolRegistry::default(),
            Path::new("/nonexistent.mp4"),
            VideoCodec::H264,
            30.0,
            &options,
            &ws,
            &JobControl::detached(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Packaging(_));
    }

    #[tokio::test]
    async fn failing_segmenter_surfaces_error() {
        let ws = Workspace::new("hls-test").unwrap();
        let tools = ToolRegistry::with_paths([("ffmpeg", PathBuf::from("false"))]);
        let options = HlsOptions {
            segment_duration_secs: 6,
            thumbnail_at_secs: 1.0,
            bitrate_kbps: Some(4000),
        };
        let result = package_hls(
            &tools,
            Path::new("/nonexistent.mp4"),
            VideoCodec::H264,
            30.0,
            &options,
            &ws,
            &JobControl::detached(),
        )
        .await;
        assert!(result.is_err());
    }
}
