//! Server side of a throughput test.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::header;
use super::payload::Payload;
use crate::server::HandlerResult;
use crate::stats::TransferStats;
use crate::streamer::BoundedStreamer;

/// Sends one freshly generated payload per connection.
#[derive(Debug, Clone)]
pub struct SpeedSession {
    payload_size: u64,
    streamer: BoundedStreamer,
    /// Where payload files are created; system temp dir when unset
    scratch_dir: Option<PathBuf>,
}

impl SpeedSession {
    pub fn new(payload_size: u64, chunk_size: usize) -> Self {
        Self {
            payload_size,
            streamer: BoundedStreamer::new(chunk_size),
            scratch_dir: None,
        }
    }

    /// Create payload files in `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    /// Run one test: header, then the full payload, then close.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> HandlerResult
    where
        S: AsyncWrite + Unpin,
    {
        info!(peer = %peer, "Connection from client");

        let payload = match &self.scratch_dir {
            Some(dir) => Payload::generate_in(dir, self.payload_size).await?,
            None => Payload::generate(self.payload_size).await?,
        };
        let mut source = payload.open()?;
        debug!(
            peer = %peer,
            path = %payload.path().display(),
            size = payload.size(),
            "Payload ready"
        );

        let start = Instant::now();
        stream.write_all(&header::encode(payload.size())).await?;
        let sent = self
            .streamer
            .stream_exact(&mut source, &mut stream, payload.size())
            .await?;
        stream.shutdown().await?;

        let stats = TransferStats::since(start, sent);
        info!(peer = %peer, bytes = sent, result = %stats, "Test completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_sends_header_then_payload() {
        let dir = tempfile::tempdir().unwrap();
        let session = SpeedSession::new(10_000, 1024).with_scratch_dir(dir.path().to_path_buf());
        let (mut client, server_end) = tokio::io::duplex(4096);

        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let (result, received) = tokio::join!(session.handle_connection(server_end, peer), async {
            let mut buf = Vec::new();
            client.read_to_end(&mut buf).await.unwrap();
            buf
        });
        result.unwrap();

        assert_eq!(received.len(), header::HEADER_LEN + 10_000);
        assert_eq!(header::decode(&received), Some(10_000));

        // Payload file is gone once the session finishes
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            SpeedSession::new(1024 * 1024, 8192).with_scratch_dir(dir.path().to_path_buf());
        let (client, server_end) = tokio::io::duplex(1024);
        drop(client);

        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert!(session.handle_connection(server_end, peer).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
