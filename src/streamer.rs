//! Chunked byte streaming from a source into a connection sink.
//!
//! Both the HTTP response body and the throughput payload go through
//! [`BoundedStreamer`]. Memory use is bounded by one chunk per transfer
//! regardless of payload size.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::DEFAULT_CHUNK_SIZE;

/// Transfer failure, split by which end broke
#[derive(Debug)]
pub enum StreamError {
    /// Reading from the source failed
    Read(io::Error),
    /// Writing to the sink failed (e.g. peer closed the connection)
    Write(io::Error),
    /// The source ran dry before the declared length was sent
    Truncated { sent: u64, expected: u64 },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Read(e) => write!(f, "source read failed: {e}"),
            StreamError::Write(e) => write!(f, "sink write failed: {e}"),
            StreamError::Truncated { sent, expected } => {
                write!(f, "source ended after {sent} of {expected} bytes")
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Read(e) | StreamError::Write(e) => Some(e),
            StreamError::Truncated { .. } => None,
        }
    }
}

/// Copies a source into a sink one fixed-size chunk at a time.
#[derive(Debug, Clone, Copy)]
pub struct BoundedStreamer {
    chunk_size: usize,
}

impl Default for BoundedStreamer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl BoundedStreamer {
    /// Create a streamer. A zero chunk size is bumped to one byte.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Forward `source` into `sink` until the source is exhausted.
    ///
    /// Returns the number of bytes written. The sink is flushed but not
    /// shut down; closing both ends is the caller's job.
    pub async fn stream<R, W>(&self, source: &mut R, sink: &mut W) -> Result<u64, StreamError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut sent = 0u64;

        loop {
            let n = source.read(&mut buffer).await.map_err(StreamError::Read)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buffer[..n])
                .await
                .map_err(StreamError::Write)?;
            sent += n as u64;
            trace!(chunk = n, sent, "Chunk forwarded");
        }

        sink.flush().await.map_err(StreamError::Write)?;
        Ok(sent)
    }

    /// Forward exactly `total` bytes from `source` into `sink`.
    ///
    /// Stops once `total` is reached even if the source has more. A source
    /// that ends early yields [`StreamError::Truncated`].
    pub async fn stream_exact<R, W>(
        &self,
        source: &mut R,
        sink: &mut W,
        total: u64,
    ) -> Result<u64, StreamError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut sent = 0u64;

        while sent < total {
            let want = (total - sent).min(self.chunk_size as u64) as usize;
            let n = source
                .read(&mut buffer[..want])
                .await
                .map_err(StreamError::Read)?;
            if n == 0 {
                return Err(StreamError::Truncated {
                    sent,
                    expected: total,
                });
            }
            sink.write_all(&buffer[..n])
                .await
                .map_err(StreamError::Write)?;
            sent += n as u64;
            trace!(chunk = n, sent, total, "Chunk forwarded");
        }

        sink.flush().await.map_err(StreamError::Write)?;
        Ok(sent)
    }
}
