//! MP4/MOV `moov` walker.
//!
//! Reads just enough of the movie header and each track's media header,
//! handler, sample description and time-to-sample table to describe the
//! file. Sample data is never touched.

use std::io::{self, Read, Seek, SeekFrom};

use crate::boxes::{child_boxes, find, invalid, skip, Child, ReadBe};

/// Movie-level summary of an MP4 file.
#[derive(Debug, Clone)]
pub struct Mp4Summary {
    pub timescale: u32,
    pub duration: u64,
    pub tracks: Vec<Mp4Track>,
}

impl Mp4Summary {
    /// Movie duration, falling back to the longest track when `mvhd` says zero.
    pub fn duration_secs(&self) -> Option<f64> {
        if self.timescale > 0 && self.duration > 0 {
            return Some(self.duration as f64 / self.timescale as f64);
        }
        self.tracks
            .iter()
            .filter_map(Mp4Track::duration_secs)
            .fold(None, |acc, d| Some(acc.map_or(d, |a: f64| a.max(d))))
    }
}

/// One `trak` box.
#[derive(Debug, Clone)]
pub struct Mp4Track {
    pub track_id: u32,
    pub handler: [u8; 4],
    pub timescale: u32,
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    /// Sample entry type from `stsd`, e.g. `avc1` or `mp4a`.
    pub fourcc: Option<[u8; 4]>,
    /// Total samples according to `stts`.
    pub sample_count: u64,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Mp4Track {
    pub fn is_video(&self) -> bool {
        &self.handler == b"vide"
    }

    pub fn is_audio(&self) -> bool {
        &self.handler == b"soun"
    }

    pub fn duration_secs(&self) -> Option<f64> {
        (self.timescale > 0 && self.duration > 0)
            .then(|| self.duration as f64 / self.timescale as f64)
    }

    /// Average frame rate derived from the sample count over the media duration.
    pub fn frame_rate(&self) -> Option<f64> {
        if self.sample_count == 0 {
            return None;
        }
        self.duration_secs().map(|d| self.sample_count as f64 / d)
    }
}

/// Locate and parse the `moov` box.
pub fn read_moov<R: Read + Seek>(reader: &mut R) -> io::Result<Mp4Summary> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let top = child_boxes(reader, 0, file_size)?;
    let moov = find(&top, b"moov").ok_or_else(|| invalid("no moov box found"))?;
    let moov_kids = child_boxes(reader, moov.offset, moov.header.content_size())?;

    let mvhd = find(&moov_kids, b"mvhd").ok_or_else(|| invalid("no mvhd in moov"))?;
    reader.seek(SeekFrom::Start(mvhd.offset))?;
    let (timescale, duration) = read_time_header(reader)?;

    let mut tracks = Vec::new();
    for trak in moov_kids.iter().filter(|c| &c.header.box_type == b"trak") {
        match parse_trak(reader, trak) {
            Ok(Some(track)) => tracks.push(track),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "skipping unreadable trak"),
        }
    }

    Ok(Mp4Summary {
        timescale,
        duration,
        tracks,
    })
}

fn parse_trak<R: Read + Seek>(reader: &mut R, trak: &Child) -> io::Result<Option<Mp4Track>> {
    let kids = child_boxes(reader, trak.offset, trak.header.content_size())?;
    let (Some(tkhd), Some(mdia)) = (find(&kids, b"tkhd"), find(&kids, b"mdia")) else {
        return Ok(None);
    };

    reader.seek(SeekFrom::Start(tkhd.offset))?;
    let (track_id, tkhd_width, tkhd_height) = parse_tkhd(reader)?;

    let mdia_kids = child_boxes(reader, mdia.offset, mdia.header.content_size())?;
    let (Some(mdhd), Some(hdlr)) = (find(&mdia_kids, b"mdhd"), find(&mdia_kids, b"hdlr")) else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Start(mdhd.offset))?;
    let (timescale, duration) = read_time_header(reader)?;
    reader.seek(SeekFrom::Start(hdlr.offset))?;
    let handler = parse_hdlr(reader)?;

    let mut track = Mp4Track {
        track_id,
        handler,
        timescale,
        duration,
        width: tkhd_width,
        height: tkhd_height,
        fourcc: None,
        sample_count: 0,
        channels: 0,
        sample_rate: 0,
    };

    let Some(stbl) = find_path(reader, &mdia_kids, &[b"minf", b"stbl"])? else {
        return Ok(Some(track));
    };
    let stbl_kids = child_boxes(reader, stbl.offset, stbl.header.content_size())?;

    if let Some(stsd) = find(&stbl_kids, b"stsd") {
        reader.seek(SeekFrom::Start(stsd.offset))?;
        parse_stsd(reader, &mut track)?;
    }
    if let Some(stts) = find(&stbl_kids, b"stts") {
        reader.seek(SeekFrom::Start(stts.offset))?;
        track.sample_count = parse_stts(reader)?;
    }

    Ok(Some(track))
}

/// Descend through nested containers, e.g. `minf` then `stbl`.
fn find_path<R: Read + Seek>(
    reader: &mut R,
    children: &[Child],
    path: &[&[u8; 4]],
) -> io::Result<Option<Child>> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(None);
    };
    let Some(found) = find(children, first) else {
        return Ok(None);
    };
    if rest.is_empty() {
        return Ok(Some(found.clone()));
    }
    let kids = child_boxes(reader, found.offset, found.header.content_size())?;
    find_path(reader, &kids, rest)
}

/// Parse an `mvhd`/`mdhd` body, returning (timescale, duration).
fn read_time_header<R: Read>(reader: &mut R) -> io::Result<(u32, u64)> {
    let (version, _flags) = reader.full_box()?;
    if version == 1 {
        let _creation = reader.be_u64()?;
        let _modification = reader.be_u64()?;
        let timescale = reader.be_u32()?;
        let duration = reader.be_u64()?;
        Ok((timescale, duration))
    } else {
        let _creation = reader.be_u32()?;
        let _modification = reader.be_u32()?;
        let timescale = reader.be_u32()?;
        let duration = reader.be_u32()? as u64;
        Ok((timescale, duration))
    }
}

/// Parse tkhd, return (track_id, width, height). Width/height are 16.16 fixed point.
fn parse_tkhd<R: Read + Seek>(reader: &mut R) -> io::Result<(u32, u32, u32)> {
    let (version, _flags) = reader.full_box()?;
    let track_id = if version == 1 {
        skip(reader, 16)?;
        let id = reader.be_u32()?;
        skip(reader, 4 + 8)?;
        id
    } else {
        skip(reader, 8)?;
        let id = reader.be_u32()?;
        skip(reader, 4 + 4)?;
        id
    };
    // reserved(8) + layer(2) + alt_group(2) + volume(2) + reserved(2) + matrix(36)
    skip(reader, 52)?;
    let width = reader.be_u32()? >> 16;
    let height = reader.be_u32()? >> 16;
    Ok((track_id, width, height))
}

fn parse_hdlr<R: Read>(reader: &mut R) -> io::Result<[u8; 4]> {
    let (_version, _flags) = reader.full_box()?;
    let _pre_defined = reader.be_u32()?;
    let mut handler = [0u8; 4];
    reader.read_exact(&mut handler)?;
    Ok(handler)
}

/// Read the first sample entry: its fourcc plus coded size or audio format.
fn parse_stsd<R: Read + Seek>(reader: &mut R, track: &mut Mp4Track) -> io::Result<()> {
    let (_version, _flags) = reader.full_box()?;
    if reader.be_u32()? == 0 {
        return Ok(());
    }
    let Some(entry) = reader.box_header()? else {
        return Ok(());
    };
    track.fourcc = Some(entry.box_type);

    if track.is_video() {
        // SampleEntry(8) + pre_defined(2) + reserved(2) + pre_defined(12)
        skip(reader, 24)?;
        let width = reader.be_u16()? as u32;
        let height = reader.be_u16()? as u32;
        if track.width == 0 || track.height == 0 {
            track.width = width;
            track.height = height;
        }
    } else if track.is_audio() {
        // SampleEntry(8) + reserved(8)
        skip(reader, 16)?;
        track.channels = reader.be_u16()?;
        let _sample_size = reader.be_u16()?;
        let _pre_defined = reader.be_u16()?;
        let _reserved = reader.be_u16()?;
        track.sample_rate = reader.be_u32()? >> 16;
    }
    Ok(())
}

/// Sum the sample counts of every `stts` run.
fn parse_stts<R: Read>(reader: &mut R) -> io::Result<u64> {
    let (_version, _flags) = reader.full_box()?;
    let entries = reader.be_u32()?;
    let mut total = 0u64;
    for _ in 0..entries {
        let count = reader.be_u32()?;
        let _delta = reader.be_u32()?;
        total += count as u64;
    }
    Ok(total)
}

/// Synthetic MP4 files for tests.
#[cfg(any(test, feature = "fixtures"))]
pub mod fixture {
    pub fn boxed(kind: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(content.len() + 8);
        out.extend_from_slice(&((content.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(content);
        out
    }

    fn time_header(timescale: u32, duration: u32) -> Vec<u8> {
        let mut c = vec![0u8; 4];
        c.extend_from_slice(&[0u8; 8]);
        c.extend_from_slice(&timescale.to_be_bytes());
        c.extend_from_slice(&duration.to_be_bytes());
        c.extend_from_slice(&[0u8; 4]);
        c
    }

    fn tkhd(id: u32, width: u32, height: u32) -> Vec<u8> {
        let mut c = vec![0u8; 4];
        c.extend_from_slice(&[0u8; 8]);
        c.extend_from_slice(&id.to_be_bytes());
        c.extend_from_slice(&[0u8; 8]);
        c.extend_from_slice(&[0u8; 52]);
        c.extend_from_slice(&(width << 16).to_be_bytes());
        c.extend_from_slice(&(height << 16).to_be_bytes());
        boxed(b"tkhd", &c)
    }

    fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
        let mut c = vec![0u8; 8];
        c.extend_from_slice(handler);
        c.extend_from_slice(&[0u8; 13]);
        boxed(b"hdlr", &c)
    }

    fn stsd_video(fourcc: &[u8; 4], width: u16, height: u16) -> Vec<u8> {
        let mut entry = vec![0u8; 24];
        entry.extend_from_slice(&width.to_be_bytes());
        entry.extend_from_slice(&height.to_be_bytes());
        entry.extend_from_slice(&[0u8; 50]);
        let mut c = vec![0u8; 4];
        c.extend_from_slice(&1u32.to_be_bytes());
        c.extend_from_slice(&boxed(fourcc, &entry));
        boxed(b"stsd", &c)
    }

    fn stsd_audio(channels: u16, rate: u32) -> Vec<u8> {
        let mut entry = vec![0u8; 16];
        entry.extend_from_slice(&channels.to_be_bytes());
        entry.extend_from_slice(&16u16.to_be_bytes());
        entry.extend_from_slice(&[0u8; 4]);
        entry.extend_from_slice(&(rate << 16).to_be_bytes());
        let mut c = vec![0u8; 4];
        c.extend_from_slice(&1u32.to_be_bytes());
        c.extend_from_slice(&boxed(b"mp4a", &entry));
        boxed(b"stsd", &c)
    }

    fn stts(runs: &[(u32, u32)]) -> Vec<u8> {
        let mut c = vec![0u8; 4];
        c.extend_from_slice(&(runs.len() as u32).to_be_bytes());
        for (count, delta) in runs {
            c.extend_from_slice(&count.to_be_bytes());
            c.extend_from_slice(&delta.to_be_bytes());
        }
        boxed(b"stts", &c)
    }

    fn trak(id: u32, tkhd_dims: (u32, u32), handler: &[u8; 4], timescale: u32, duration: u32, stbl: Vec<u8>) -> Vec<u8> {
        let minf = boxed(b"minf", &boxed(b"stbl", &stbl));
        let mut mdia = boxed(b"mdhd", &time_header(timescale, duration));
        mdia.extend_from_slice(&hdlr(handler));
        mdia.extend_from_slice(&minf);
        let mut t = tkhd(id, tkhd_dims.0, tkhd_dims.1);
        t.extend_from_slice(&boxed(b"mdia", &mdia));
        boxed(b"trak", &t)
    }

    /// An MP4 with an `mdat` before `moov`, one H.264 video track and one AAC track.
    ///
    /// Video: `width`x`height`, 30 fps over `secs` seconds.
    pub fn mp4(width: u32, height: u32, secs: u32, with_audio: bool) -> Vec<u8> {
        let mut out = boxed(b"ftyp", b"isom\0\0\x02\0isomavc1");
        out.extend_from_slice(&boxed(b"mdat", &vec![0xEE; 4096]));

        let mut video_stbl = stsd_video(b"avc1", width as u16, height as u16);
        video_stbl.extend_from_slice(&stts(&[(secs * 30, 512)]));
        let mut moov = boxed(b"mvhd", &time_header(1000, secs * 1000));
        moov.extend_from_slice(&trak(1, (width, height), b"vide", 15_360, secs * 15_360, video_stbl));
        if with_audio {
            let mut audio_stbl = stsd_audio(2, 48_000);
            audio_stbl.extend_from_slice(&stts(&[(secs * 47, 1024)]));
            moov.extend_from_slice(&trak(2, (0, 0), b"soun", 48_000, secs * 48_000, audio_stbl));
        }
        out.extend_from_slice(&boxed(b"moov", &moov));
        out
    }
}
