//! HLS playlist generation.

use super::types::MediaPlaylist;
use std::fmt::Write;

/// Generate an HLS media playlist (M3U8) from a [`MediaPlaylist`].
///
/// Output includes:
/// - `#EXTM3U` header and `#EXT-X-VERSION` (4 when byte ranges are used, else 3)
/// - `#EXT-X-TARGETDURATION` and `#EXT-X-MEDIA-SEQUENCE`
/// - `#EXT-X-PLAYLIST-TYPE:VOD` for ended playlists
/// - `#EXTINF` and optional `#EXT-X-BYTERANGE:<length>@<offset>` per segment
/// - `#EXT-X-ENDLIST` for ended playlists
pub fn generate_media_playlist(playlist: &MediaPlaylist) -> String {
    let mut out = String::new();
    let uses_ranges = playlist.segments.iter().any(|s| s.byte_range.is_some());

    // Writing to a String cannot fail.
    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-VERSION:{}", if uses_ranges { 4 } else { 3 });
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", playlist.target_duration);
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", playlist.media_sequence);
    if playlist.ended {
        let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD");
    }

    for segment in &playlist.segments {
        let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
        if let Some(range) = segment.byte_range {
            let _ = writeln!(out, "#EXT-X-BYTERANGE:{}@{}", range.length, range.offset);
        }
        let _ = writeln!(out, "{}", segment.uri);
    }

    if playlist.ended {
        let _ = writeln!(out, "#EXT-X-ENDLIST");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::types::{ByteRange, Segment};

    fn seg(duration: f64, uri: &str, range: Option<(u64, u64)>) -> Segment {
        Segment {
            duration,
            uri: uri.to_string(),
            byte_range: range.map(|(offset, length)| ByteRange { offset, length }),
        }
    }

    #[test]
    fn vod_playlist_with_files() {
        let playlist = MediaPlaylist::vod(vec![
            seg(5.5, "seg0.ts", None),
            seg(6.0, "seg1.ts", None),
            seg(3.2, "seg2.ts", None),
        ]);

        let m3u8 = generate_media_playlist(&playlist);

        assert!(m3u8.starts_with("#EXTM3U\n"));
        assert!(m3u8.contains("#EXT-X-VERSION:3"));
        assert!(m3u8.contains("#EXT-X-TARGETDURATION:6"));
        assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(m3u8.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(m3u8.contains("#EXTINF:5.500000,\nseg0.ts"));
        assert!(m3u8.contains("#EXTINF:3.200000,\nseg2.ts"));
        assert!(m3u8.ends_with("#EXT-X-ENDLIST\n"));
        assert!(!m3u8.contains("BYTERANGE"));
    }

    #[test]
    fn byte_range_playlist() {
        let playlist = MediaPlaylist::vod(vec![
            seg(6.0, "video.ts", Some((0, 1000))),
            seg(2.0, "video.ts", Some((1000, 400))),
        ]);

        let m3u8 = generate_media_playlist(&playlist);

        assert!(m3u8.contains("#EXT-X-VERSION:4"));
        assert!(m3u8.contains("#EXTINF:6.000000,\n#EXT-X-BYTERANGE:1000@0\nvideo.ts"));
        assert!(m3u8.contains("#EXT-X-BYTERANGE:400@1000\nvideo.ts"));
    }

    #[test]
    fn open_playlist_has_no_endlist() {
        let playlist = MediaPlaylist {
            target_duration: 4,
            media_sequence: 100,
            segments: vec![seg(4.0, "seg100.ts", None)],
            ended: false,
        };

        let m3u8 = generate_media_playlist(&playlist);

        assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:100"));
        assert!(!m3u8.contains("#EXT-X-PLAYLIST-TYPE"));
        assert!(!m3u8.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn empty_vod_playlist() {
        let m3u8 = generate_media_playlist(&MediaPlaylist::vod(vec![]));
        assert!(m3u8.contains("#EXT-X-TARGETDURATION:0"));
        assert!(!m3u8.contains("#EXTINF"));
    }
}
