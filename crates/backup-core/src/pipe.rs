//! In-memory pipe coordinator.
//!
//! Creates a paired (reader, writer) over an in-memory, backpressured byte
//! pipe, and layers the [`compression`](crate::compression) adapter on
//! whichever side the direction calls for: the write side for an upload (so
//! compressed bytes emerge from the read side toward the object store), or
//! the read side for a download (so the object store's compressed bytes are
//! decompressed as they are consumed).
//!
//! Closing either side of the pair must happen at most once; see
//! [`crate::engine`] for the close ordering contract.

use crate::compression::{CompressWriter, DecompressReader};
use tokio::io::DuplexStream;

/// Bytes the pipe can hold before a writer blocks waiting for a reader to
/// drain it. Mirrors an OS pipe's bounded-buffer backpressure.
const PIPE_CAPACITY: usize = 64 * 1024;

pub type UploadWriter = CompressWriter<DuplexStream>;
pub type UploadReader = DuplexStream;

/// Creates the pipe pair used by a backup: the caller writes raw frames into
/// the returned [`UploadWriter`], and compressed bytes are available to read
/// from the returned [`UploadReader`] for upload to the object store.
pub fn upload_pipe() -> (UploadWriter, UploadReader) {
    let (write_side, read_side) = tokio::io::duplex(PIPE_CAPACITY);
    (CompressWriter::new(write_side), read_side)
}

pub type DownloadWriter = DuplexStream;
pub type DownloadReader = DecompressReader<DuplexStream>;

/// Creates the pipe pair used by a restore: the object store download
/// writes compressed bytes into the returned [`DownloadWriter`], and the
/// caller reads decompressed document bytes from the returned
/// [`DownloadReader`].
pub fn download_pipe() -> (DownloadWriter, DownloadReader) {
    let (write_side, read_side) = tokio::io::duplex(PIPE_CAPACITY);
    (write_side, DecompressReader::new(read_side))
}
