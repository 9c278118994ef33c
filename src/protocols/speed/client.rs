//! Client side of a throughput test.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::header;
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::stats::TransferStats;

/// Client-side failures
#[derive(Debug)]
pub enum ClientError {
    /// Host name could not be resolved
    Resolve { host: String, source: io::Error },
    /// Every resolved address refused the connection
    Refused { host: String, port: u16 },
    /// Connecting failed for another reason
    Connect { addr: SocketAddr, source: io::Error },
    /// The length header never arrived in full
    Header(io::Error),
    /// The server closed before sending the declared length
    ConnectionClosed { received: u64, expected: u64 },
    Io(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Resolve { host, source } => write!(
                f,
                "Unable to connect to {host} ({source}). \
                 Please check the IP address and ensure the server is running."
            ),
            ClientError::Refused { host, port } => write!(
                f,
                "Connection refused. Please ensure the server is running on {host}:{port}"
            ),
            ClientError::Connect { addr, source } => {
                write!(f, "Unable to connect to {addr}: {source}")
            }
            ClientError::Header(e) => write!(f, "Failed to read payload size: {e}"),
            ClientError::ConnectionClosed { received, expected } => write!(
                f,
                "Connection closed after {received} of {expected} bytes"
            ),
            ClientError::Io(e) => write!(f, "Transfer failed: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Resolve { source, .. } | ClientError::Connect { source, .. } => {
                Some(source)
            }
            ClientError::Header(e) | ClientError::Io(e) => Some(e),
            ClientError::Refused { .. } | ClientError::ConnectionClosed { .. } => None,
        }
    }
}

/// Connects to a speed-test server and measures one download.
#[derive(Debug, Clone)]
pub struct SpeedClient {
    host: String,
    port: u16,
    chunk_size: usize,
}

impl SpeedClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Resolve the host and open a connection, trying each address once.
    pub async fn connect(&self) -> Result<TcpStream, ClientError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| ClientError::Resolve {
                host: self.host.clone(),
                source,
            })?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(addr = %addr, "Connected");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Connect attempt failed");
                    last_error = Some((addr, e));
                }
            }
        }

        Err(match last_error {
            Some((addr, e)) if e.kind() != io::ErrorKind::ConnectionRefused => {
                ClientError::Connect { addr, source: e }
            }
            _ => ClientError::Refused {
                host: self.host.clone(),
                port: self.port,
            },
        })
    }

    /// Connect and receive one payload. `progress` is called with
    /// `(received, expected)` after every chunk and once with the size
    /// before the first chunk.
    pub async fn run<F>(&self, progress: F) -> Result<TransferStats, ClientError>
    where
        F: FnMut(u64, u64),
    {
        let mut stream = self.connect().await?;
        receive(&mut stream, self.chunk_size, progress).await
    }
}

/// Read a length header, then exactly that many bytes.
///
/// Timing starts after the header and stops after the last byte. A
/// connection that ends early is an error, never a silent stall.
pub async fn receive<R, F>(
    reader: &mut R,
    chunk_size: usize,
    mut progress: F,
) -> Result<TransferStats, ClientError>
where
    R: AsyncRead + Unpin + ?Sized,
    F: FnMut(u64, u64),
{
    let expected = header::read(reader).await.map_err(ClientError::Header)?;
    progress(0, expected);

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut received = 0u64;
    let start = Instant::now();

    while received < expected {
        let want = (expected - received).min(buffer.len() as u64) as usize;
        let n = reader
            .read(&mut buffer[..want])
            .await
            .map_err(ClientError::Io)?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed { received, expected });
        }
        received += n as u64;
        progress(received, expected);
    }

    Ok(TransferStats::since(start, received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::speed::SpeedSession;
    use crate::server::Server;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_receive_full_payload() {
        let mut wire = header::encode(5000).to_vec();
        wire.extend(std::iter::repeat(7u8).take(5000));
        let mut reader: &[u8] = &wire;

        let mut updates = Vec::new();
        let stats = receive(&mut reader, 1024, |received, expected| {
            updates.push((received, expected))
        })
        .await
        .unwrap();

        assert_eq!(stats.bytes, 5000);
        assert_eq!(updates.first(), Some(&(0, 5000)));
        assert_eq!(updates.last(), Some(&(5000, 5000)));
        assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_premature_close_is_an_error() {
        let (mut server_end, mut client_end) = tokio::io::duplex(1024);
        server_end.write_all(&header::encode(100)).await.unwrap();
        server_end.write_all(&[1u8; 40]).await.unwrap();
        drop(server_end);

        match receive(&mut client_end, 16, |_, _| {}).await {
            Err(ClientError::ConnectionClosed { received, expected }) => {
                assert_eq!(received, 40);
                assert_eq!(expected, 100);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_header_is_an_error() {
        let mut reader: &[u8] = &[0, 1];
        assert!(matches!(
            receive(&mut reader, 16, |_, _| {}).await,
            Err(ClientError::Header(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_payload() {
        let wire = header::encode(0);
        let mut reader: &[u8] = &wire;
        let stats = receive(&mut reader, 16, |_, _| {}).await.unwrap();
        assert_eq!(stats.bytes, 0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = SpeedClient::new("127.0.0.1", port);
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Refused { .. })
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let client = SpeedClient::new("no-such-host.invalid", 12345);
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Resolve { .. })
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_one_mebibyte() {
        const SIZE: u64 = 1024 * 1024;

        let scratch = tempfile::tempdir().unwrap();
        let session = std::sync::Arc::new(
            SpeedSession::new(SIZE, 8192).with_scratch_dir(scratch.path().to_path_buf()),
        );
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let port = server.local_addr().port();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handler = move |stream: TcpStream, peer: SocketAddr| {
            let session = std::sync::Arc::clone(&session);
            async move { session.handle_connection(stream, peer).await }
        };
        let server_task = tokio::spawn(server.run(handler, shutdown_rx));

        let client = SpeedClient::new("127.0.0.1", port);
        let stats = client.run(|_, _| {}).await.unwrap();

        assert_eq!(stats.bytes, SIZE);
        assert!(stats.elapsed.as_secs_f64() > 0.0);
        let expected_rate = SIZE as f64 / stats.elapsed.as_secs_f64();
        assert!((stats.bytes_per_sec() - expected_rate).abs() <= expected_rate * 1e-9);

        shutdown_tx.send(true).unwrap();
        server_task.await.unwrap().unwrap();
    }
}
