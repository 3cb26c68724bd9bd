//! Streaming compression adapter wrapping an underlying byte stream with the
//! Snappy block codec.
//!
//! Neither side requires the uncompressed size up front: [`CompressWriter`]
//! buffers incoming bytes up to [`BLOCK_SIZE`] before compressing and
//! emitting a block, and [`DecompressReader`] pulls and decompresses blocks
//! on demand. Blocks are a pure wire-level detail of this adapter; callers
//! only ever see the logical, uncompressed byte stream.

use crate::framing::ByteSource;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes buffered before a block is compressed and flushed downstream.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// A 4-byte block length prefix of `u32::MAX` would imply a ludicrous,
/// almost certainly corrupt artifact; refuse to allocate for it.
const MAX_BLOCK_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("snappy compression failed: {0}")]
    Compress(#[from] snap::Error),
    #[error("compressed block length {0} exceeds sanity limit")]
    BlockTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CompressionError> for std::io::Error {
    fn from(e: CompressionError) -> Self {
        match e {
            CompressionError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Wraps an [`AsyncWrite`] with a streaming Snappy compressor.
pub struct CompressWriter<W> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> CompressWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    /// Buffers `data`, flushing full blocks to the underlying writer as the
    /// buffer fills. Byte-granular: callers need not align writes to block
    /// or document boundaries.
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<(), CompressionError> {
        while !data.is_empty() {
            let take = (BLOCK_SIZE - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == BLOCK_SIZE {
                self.flush_block().await?;
            }
        }
        Ok(())
    }

    async fn flush_block(&mut self) -> Result<(), CompressionError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut encoder = snap::raw::Encoder::new();
        let compressed = encoder.compress_vec(&self.buf)?;
        self.buf.clear();

        self.inner
            .write_u32_le(compressed.len() as u32)
            .await?;
        self.inner.write_all(&compressed).await?;
        Ok(())
    }

    /// Flushes any pending block, then closes the underlying writer so the
    /// reader side observes a clean EOF. If both the flush and the close
    /// fail, the flush error is returned (it is the one that indicates data
    /// loss).
    pub async fn close(mut self) -> Result<(), CompressionError> {
        let flush_result = self.flush_block().await;
        let shutdown_result = self.inner.shutdown().await.map_err(CompressionError::from);
        flush_result.and(shutdown_result)
    }
}

/// Wraps an [`AsyncRead`] with a streaming Snappy decompressor. Implements
/// [`ByteSource`] directly so it can be handed straight to
/// [`crate::framing::read_next`].
pub struct DecompressReader<R> {
    inner: R,
    residual: VecDeque<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> DecompressReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            residual: VecDeque::new(),
            eof: false,
        }
    }

    /// Closes the decompression wrapper by dropping the underlying reader.
    pub fn close(self) {
        drop(self.inner);
    }

    async fn fill(&mut self) -> Result<(), CompressionError> {
        if self.eof {
            return Ok(());
        }

        let mut len_bytes = [0u8; 4];
        let read = read_fully_or_eof(&mut self.inner, &mut len_bytes).await?;
        if read == 0 {
            self.eof = true;
            return Ok(());
        }
        if read < 4 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "compressed stream ended mid block-length prefix",
            )
            .into());
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_BLOCK_LEN {
            return Err(CompressionError::BlockTooLarge(len));
        }

        let mut block = vec![0u8; len];
        self.inner.read_exact(&mut block).await?;

        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder.decompress_vec(&block)?;
        self.residual.extend(decompressed);
        Ok(())
    }
}

async fn read_fully_or_eof<R: AsyncRead + Unpin>(
    src: &mut R,
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

impl<R: AsyncRead + Unpin + Send> ByteSource for DecompressReader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.residual.is_empty() {
            self.fill().await?;
        }
        let n = self.residual.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.residual.pop_front().unwrap();
        }
        Ok(n)
    }
}
