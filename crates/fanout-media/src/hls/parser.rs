//! Minimal media playlist parser for playlists written by ffmpeg's HLS muxer.

use fanout_core::{Error, Result};

use super::types::{ByteRange, MediaPlaylist, Segment};

/// Parse a media playlist.
///
/// Understands `#EXTINF`, `#EXT-X-BYTERANGE` (with or without an explicit
/// offset), `#EXT-X-TARGETDURATION`, `#EXT-X-MEDIA-SEQUENCE` and
/// `#EXT-X-ENDLIST`. Unknown tags are ignored.
pub fn parse_media_playlist(text: &str) -> Result<MediaPlaylist> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    if lines.next() != Some("#EXTM3U") {
        return Err(Error::Packaging("playlist does not start with #EXTM3U".into()));
    }

    let mut playlist = MediaPlaylist {
        target_duration: 0,
        media_sequence: 0,
        segments: Vec::new(),
        ended: false,
    };
    let mut pending_duration: Option<f64> = None;
    let mut pending_range: Option<ByteRange> = None;
    let mut next_offset: u64 = 0;

    for line in lines {
        if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = parse_num(v, "target duration")?;
        } else if let Some(v) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = parse_num(v, "media sequence")?;
        } else if let Some(v) = line.strip_prefix("#EXTINF:") {
            let duration = v.split(',').next().unwrap_or_default();
            pending_duration = Some(parse_num(duration, "segment duration")?);
        } else if let Some(v) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            let (length, offset) = match v.split_once('@') {
                Some((len, off)) => (parse_num(len, "byte range")?, parse_num(off, "byte range")?),
                None => (parse_num(v, "byte range")?, next_offset),
            };
            pending_range = Some(ByteRange { offset, length });
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if line.starts_with('#') {
            continue;
        } else {
            let duration = pending_duration.take().ok_or_else(|| {
                Error::Packaging(format!("segment '{line}' has no #EXTINF"))
            })?;
            let byte_range = pending_range.take();
            if let Some(r) = byte_range {
                next_offset = r.end();
            }
            playlist.segments.push(Segment {
                duration,
                uri: line.to_string(),
                byte_range,
            });
        }
    }

    Ok(playlist)
}

fn parse_num<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Packaging(format!("invalid {what}: '{value}'")))
}
