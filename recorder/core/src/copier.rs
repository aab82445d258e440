//! Stream Copier
//!
//! Moves bytes from a tap socket into its recording file. The copy is
//! byte-exact and order-preserving: each chunk read is written in full and
//! flushed before the next read, so a recording can be tailed while live.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::StreamError;

/// Default chunk size for a single read (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest accepted chunk size (64 MiB)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Copy `source` into `sink` until `source` reports end-of-stream.
///
/// `chunk_size` is clamped to `1..=MAX_CHUNK_SIZE`.
///
/// Returns the number of bytes transferred. The first failed read or write
/// ends the copy and is returned to the caller; nothing is retried.
pub async fn copy_stream<R, W>(
    source: &mut R,
    sink: &mut W,
    chunk_size: usize,
) -> Result<u64, StreamError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.clamp(1, MAX_CHUNK_SIZE)];
    let mut total: u64 = 0;

    loop {
        let n = source.read(&mut buf).await.map_err(StreamError::Read)?;
        if n == 0 {
            sink.flush().await.map_err(StreamError::Write)?;
            return Ok(total);
        }

        sink.write_all(&buf[..n]).await.map_err(StreamError::Write)?;
        sink.flush().await.map_err(StreamError::Write)?;
        total += n as u64;
    }
}
