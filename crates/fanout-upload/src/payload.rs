use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use fanout_core::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// File ranges longer than this are streamed from disk instead of read into
/// memory, so a whole-file `PUT` never buffers the file.
pub const STREAM_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Bytes to deliver: a file on disk or an in-memory buffer such as an HLS
/// bundle payload.
#[derive(Debug, Clone)]
pub enum Payload {
    File { path: PathBuf, len: u64 },
    Memory(Bytes),
}

impl Payload {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let len = tokio::fs::metadata(path).await?.len();
        Ok(Self::File {
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `start..end`. Each call opens the file afresh so a failed chunk
    /// leaves nothing half-consumed.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        if start > end || end > self.len() {
            return Err(Error::Internal(format!(
                "range {start}..{end} outside payload of {} bytes",
                self.len()
            )));
        }
        match self {
            Self::Memory(bytes) => Ok(bytes.slice(start as usize..end as usize)),
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; (end - start) as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Request body for `start..end`: an in-memory slice, or a file stream
    /// when the range is longer than [`STREAM_THRESHOLD`].
    pub async fn chunk_body(&self, start: u64, end: u64) -> Result<ChunkBody> {
        match self {
            Self::File { path, .. } if end.saturating_sub(start) > STREAM_THRESHOLD => {
                if end > self.len() {
                    return Err(Error::Internal(format!(
                        "range {start}..{end} outside payload of {} bytes",
                        self.len()
                    )));
                }
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                Ok(ChunkBody::Streamed {
                    file,
                    len: end - start,
                })
            }
            _ => self.read_range(start, end).await.map(ChunkBody::Buffered),
        }
    }
}

/// The bytes of one upload request.
#[derive(Debug)]
pub enum ChunkBody {
    Buffered(Bytes),
    /// `len` bytes read from the file's current position.
    Streamed { file: tokio::fs::File, len: u64 },
}

impl ChunkBody {
    pub fn len(&self) -> u64 {
        match self {
            Self::Buffered(bytes) => bytes.len() as u64,
            Self::Streamed { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_body(self) -> reqwest::Body {
        match self {
            Self::Buffered(bytes) => reqwest::Body::from(bytes),
            Self::Streamed { file, len } => {
                reqwest::Body::wrap_stream(ReaderStream::new(file.take(len)))
            }
        }
    }

    /// Collect the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Buffered(bytes) => Ok(bytes),
            Self::Streamed { file, len } => {
                let mut buf = Vec::new();
                file.take(len).read_to_end(&mut buf).await?;
                if (buf.len() as u64) < len {
                    return Err(Error::Internal(format!(
                        "file ended after {} of {len} bytes",
                        buf.len()
                    )));
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl From<Bytes> for ChunkBody {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_ranges_match_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let contents: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &contents).unwrap();

        let payload = Payload::from_file(&path).await.unwrap();
        assert_eq!(payload.len(), 1000);
        let chunk = payload.read_range(300, 420).await.unwrap();
        assert_eq!(&chunk[..], &contents[300..420]);
    }

    #[tokio::test]
    async fn memory_ranges_are_slices() {
        let payload = Payload::Memory(Bytes::from_static(b"0123456789"));
        assert_eq!(&payload.read_range(2, 5).await.unwrap()[..], b"234");
        assert!(payload.read_range(5, 11).await.is_err());
        assert!(payload.read_range(6, 5).await.is_err());
    }

    #[tokio::test]
    async fn long_file_ranges_stream_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mp4");
        let len = STREAM_THRESHOLD + 4096;
        let contents: Vec<u8> = (0..=250u8).cycle().take(len as usize).collect();
        std::fs::write(&path, &contents).unwrap();
        let payload = Payload::from_file(&path).await.unwrap();

        let body = payload.chunk_body(0, len).await.unwrap();
        assert!(matches!(body, ChunkBody::Streamed { len: l, .. } if l == len));
        assert_eq!(&body.into_bytes().await.unwrap()[..], &contents[..]);

        let tail = payload.chunk_body(100, len).await.unwrap();
        assert!(matches!(tail, ChunkBody::Streamed { .. }));
        assert_eq!(&tail.into_bytes().await.unwrap()[..], &contents[100..]);

        let small = payload.chunk_body(10, 20).await.unwrap();
        assert!(matches!(small, ChunkBody::Buffered(_)));
        assert_eq!(&small.into_bytes().await.unwrap()[..], &contents[10..20]);

        assert!(payload.chunk_body(0, len + 1).await.is_err());
    }

    #[tokio::test]
    async fn memory_payload_is_never_streamed() {
        let payload = Payload::Memory(Bytes::from(vec![7u8; 64]));
        let body = payload.chunk_body(0, 64).await.unwrap();
        assert!(matches!(body, ChunkBody::Buffered(ref b) if b.len() == 64));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = Payload::from_file(Path::new("/nonexistent/xyz.mp4")).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
