//! Document framing codec.
//!
//! Frames the native binary document format used by the database: a 4-byte
//! little-endian unsigned length `L` naming the document's total size
//! (inclusive of the length prefix itself), followed by `L-4` bytes of
//! payload. `L < 5` is invalid. [`read_next`] is single-pass and never reads
//! ahead past one document.

use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("invalid document: length prefix {0} is less than 5 bytes")]
    InvalidDocument(u32),
    #[error("broken document: stream ended after {read} of {expected} expected bytes")]
    TruncatedDocument { read: usize, expected: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Minimal byte source abstraction that both the decompression adapter and a
/// plain [`tokio::io::AsyncRead`] can satisfy, so that the framing algorithm
/// can be exercised directly in tests without going through compression.
pub trait ByteSource {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = std::io::Result<usize>> + Send;
}

/// Adapts any [`tokio::io::AsyncRead`] into a [`ByteSource`].
pub struct AsyncReadSource<R>(pub R);

impl<R: tokio::io::AsyncRead + Unpin + Send> ByteSource for AsyncReadSource<R> {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        tokio::io::AsyncReadExt::read(&mut self.0, buf).await
    }
}

/// Reads every available byte into `buf`, returning `Ok(n)` with `n < buf.len()`
/// only at a clean end-of-stream. A zero-byte read at offset 0 is a clean
/// EOF; any other short read is a caller-visible error via the returned count.
async fn fill_as_much_as_possible<S: ByteSource>(
    src: &mut S,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        let n = src.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

/// Reads one length-prefixed document from `src`.
///
/// Returns `Ok(None)` on a clean end-of-stream at a document boundary (no
/// bytes of a new document have been read yet). Returns the full `L`-byte
/// buffer (length prefix included) on success.
pub async fn read_next<S: ByteSource>(src: &mut S) -> Result<Option<Vec<u8>>, FramingError> {
    let mut len_bytes = [0u8; 4];
    let read = fill_as_much_as_possible(src, &mut len_bytes).await?;
    if read == 0 {
        return Ok(None);
    }
    if read < 4 {
        return Err(FramingError::TruncatedDocument {
            read,
            expected: 4,
        });
    }

    let len = u32::from_le_bytes(len_bytes);
    if len < 5 {
        return Err(FramingError::InvalidDocument(len));
    }

    let mut buf = vec![0u8; len as usize];
    buf[..4].copy_from_slice(&len_bytes);
    let payload_len = len as usize - 4;
    let read = fill_as_much_as_possible(src, &mut buf[4..]).await?;
    if read < payload_len {
        return Err(FramingError::TruncatedDocument {
            read: read + 4,
            expected: len as usize,
        });
    }

    Ok(Some(buf))
}

/// Writes an already-framed document verbatim. Length validation is the
/// caller's responsibility: this never inspects `frame`'s contents.
pub async fn write_raw<W: AsyncWrite + Unpin>(
    dst: &mut W,
    frame: &[u8],
) -> std::io::Result<()> {
    dst.write_all(frame).await
}
