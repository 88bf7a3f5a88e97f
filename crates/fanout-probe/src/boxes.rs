//! ISO BMFF box header parsing and navigation.
//!
//! Children are located by seeking over each sibling's declared size, so a
//! multi-gigabyte `mdat` costs one seek rather than a read.

use std::io::{self, Read, Seek, SeekFrom};

/// A parsed box header.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    /// 4-byte box type (e.g. b"moov").
    pub box_type: [u8; 4],
    /// Total size of the box including the header. `0` means "to end of parent".
    pub size: u64,
    /// Size of the header itself (8 or 16 for extended-size boxes).
    pub header_size: u64,
}

impl BoxHeader {
    /// Size of the box content (size - header_size).
    pub fn content_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size)
    }
}

/// A child box located inside a parent.
#[derive(Debug, Clone)]
pub struct Child {
    pub header: BoxHeader,
    /// Absolute offset of the first content byte.
    pub offset: u64,
}

/// Big-endian field reads used by every box parser.
pub trait ReadBe: Read {
    fn be_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn be_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn be_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// FullBox prefix: 8-bit version, 24-bit flags.
    fn full_box(&mut self) -> io::Result<(u8, u32)> {
        let word = self.be_u32()?;
        Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
    }

    /// Box header at the current position; `None` at a clean EOF.
    fn box_header(&mut self) -> io::Result<Option<BoxHeader>> {
        let mut buf = [0u8; 8];
        match self.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let box_type = [buf[4], buf[5], buf[6], buf[7]];
        let (size, header_size) = match u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) {
            1 => (self.be_u64()?, 16),
            small => (u64::from(small), 8),
        };
        Ok(Some(BoxHeader {
            box_type,
            size,
            header_size,
        }))
    }
}

impl<R: Read + ?Sized> ReadBe for R {}

/// List the boxes contained in `len` bytes starting at `start`.
///
/// A zero-size box is resolved to the remainder of the parent. A box that
/// claims to extend past its parent is an error.
pub fn child_boxes<R: Read + Seek>(reader: &mut R, start: u64, len: u64) -> io::Result<Vec<Child>> {
    let end = start
        .checked_add(len)
        .ok_or_else(|| invalid(format!("box range at offset {start} overflows")))?;
    let mut pos = start;
    let mut children = Vec::new();

    // pos <= end holds throughout, so the remainder never underflows.
    while end - pos >= 8 {
        reader.seek(SeekFrom::Start(pos))?;
        let Some(mut header) = reader.box_header()? else {
            break;
        };
        if header.size == 0 {
            header.size = end - pos;
        }
        if header.size < header.header_size || header.size > end - pos {
            return Err(invalid(format!(
                "box '{}' at offset {pos} overruns its parent",
                fourcc_str(&header.box_type)
            )));
        }
        let size = header.size;
        children.push(Child {
            offset: pos + header.header_size,
            header,
        });
        pos += size;
    }

    Ok(children)
}

/// First child of the given type.
pub fn find<'a>(children: &'a [Child], target: &[u8; 4]) -> Option<&'a Child> {
    children.iter().find(|c| &c.header.box_type == target)
}

/// Seek forward over `n` bytes.
pub fn skip<R: Seek>(reader: &mut R, n: i64) -> io::Result<()> {
    reader.seek(SeekFrom::Current(n)).map(|_| ())
}

pub(crate) fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

pub(crate) fn fourcc_str(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn huge_largesize_after_first_box_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"ftypisom\0\0\0\0");
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"free");
        data.extend_from_slice(&u64::MAX.to_be_bytes());

        let len = data.len() as u64;
        let err = child_boxes(&mut Cursor::new(&data), 0, len).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("'free'"));
    }

    #[test]
    fn range_past_u64_is_rejected() {
        let err = child_boxes(&mut Cursor::new(&[0u8; 8]), u64::MAX - 4, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn plain_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 92]);

        let mut cursor = Cursor::new(&data);
        let header = cursor.box_header().unwrap().unwrap();
        assert_eq!(header.box_type, *b"moov");
        assert_eq!(header.size, 100);
        assert_eq!(header.content_size(), 92);
    }

    #[test]
    fn extended_size_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&(5_000_000_000u64).to_be_bytes());
        let mut cursor = Cursor::new(&data);
        let header = cursor.box_header().unwrap().unwrap();
        assert_eq!(header.size, 5_000_000_000);
        assert_eq!(header.header_size, 16);
    }

    #[test]
    fn clean_eof_is_none() {
        let mut cursor = Cursor::new([0u8; 4]);
        assert!(cursor.box_header().unwrap().is_none());
    }

    #[test]
    fn child_boxes_lists_siblings() {
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&20u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0xAA; 12]);

        let mut cursor = Cursor::new(&data);
        let kids = child_boxes(&mut cursor, 0, data.len() as u64).unwrap();
        assert_eq!(kids.len(), 2);
        let moov = find(&kids, b"moov").unwrap();
        assert_eq!(moov.offset, 24);
        assert_eq!(moov.header.content_size(), 12);
    }

    #[test]
    fn zero_size_box_extends_to_parent_end() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 32]);
        let mut cursor = Cursor::new(&data);
        let kids = child_boxes(&mut cursor, 0, data.len() as u64).unwrap();
        assert_eq!(kids[0].header.size, 40);
    }

    #[test]
    fn overrunning_box_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&500u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 8]);
        let mut cursor = Cursor::new(&data);
        assert!(child_boxes(&mut cursor, 0, data.len() as u64).is_err());
    }
}
