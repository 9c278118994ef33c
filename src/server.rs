//! Bounded-concurrency TCP accept loop.
//!
//! Accepts connections and hands each one to its own task. A semaphore
//! caps how many handlers run at once; connections beyond the cap wait in
//! the listen backlog until a slot frees. The accept loop never waits on
//! a handler to finish.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

use crate::net;

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Error type crossing the handler boundary
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one connection handler
pub type HandlerResult = Result<(), BoxError>;

/// Server instance owning the listening socket
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    connection_limit: Arc<Semaphore>,
    max_workers: usize,
}

impl Server {
    /// Bind the listener. `max_workers` is clamped to at least one.
    pub fn bind(addr: SocketAddr, max_workers: usize) -> io::Result<Self> {
        let listener = net::create_listener(addr)?;
        let local_addr = listener.local_addr()?;
        let max_workers = max_workers.max(1);

        Ok(Server {
            listener,
            local_addr,
            connection_limit: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` flips to `true`.
    ///
    /// `handler` is called once per connection and its future is spawned.
    /// Handler errors are logged and never stop the loop. The listening
    /// socket is closed before this returns; spawned handlers keep running.
    pub async fn run<H, Fut>(
        self,
        handler: H,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()>
    where
        H: Fn(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let Server {
            listener,
            local_addr,
            connection_limit,
            max_workers,
        } = self;
        info!(address = %local_addr, workers = max_workers, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                permit = Arc::clone(&connection_limit).acquire_owned() => {
                    permit.map_err(io::Error::other)?
                }
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        accept_failed(&e).await;
                        continue;
                    }
                },
            };

            debug!(peer = %peer, "New connection");
            let connection = handler(stream, peer);

            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(peer = %peer, error = %e, "Connection error");
                }
                drop(permit);
            });
        }

        drop(listener);
        info!(address = %local_addr, "Listener closed");
        Ok(())
    }
}

/// Log a failed accept and pause. Errors like EMFILE persist, so
/// retrying at once would spin the loop.
async fn accept_failed(e: &io::Error) {
    error!(error = %e, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Resolves once shutdown is signalled. A dropped sender means nobody can
/// ask for shutdown anymore, so this then never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[derive(Default)]
    struct Counters {
        active: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    async fn slow_reply(mut stream: TcpStream, counters: Arc<Counters>) -> HandlerResult {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        counters.active.fetch_sub(1, Ordering::SeqCst);
        counters.done.fetch_add(1, Ordering::SeqCst);
        stream.write_all(b"ok").await?;
        Ok(())
    }

    async fn echo_one_byte(mut stream: TcpStream) -> HandlerResult {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        stream.write_all(&byte).await?;
        Ok(())
    }

    async fn drain(mut stream: TcpStream) -> HandlerResult {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        Ok(())
    }

    async fn failing(calls: Arc<AtomicUsize>) -> HandlerResult {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("handler failed".into())
    }

    #[tokio::test]
    async fn test_worker_limit_is_respected() {
        const WORKERS: usize = 3;
        const CLIENTS: usize = 12;

        let server = Server::bind(loopback(), WORKERS).unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let handler = {
            let counters = Arc::clone(&counters);
            move |stream: TcpStream, _peer: SocketAddr| slow_reply(stream, Arc::clone(&counters))
        };
        let server_task = tokio::spawn(server.run(handler, shutdown_rx));

        let mut clients = Vec::new();
        for _ in 0..CLIENTS {
            clients.push(tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let mut reply = Vec::new();
                stream.read_to_end(&mut reply).await.unwrap();
                reply
            }));
        }

        for client in clients {
            let reply = timeout(Duration::from_secs(10), client)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply, b"ok");
        }

        assert_eq!(counters.done.load(Ordering::SeqCst), CLIENTS);
        assert!(counters.peak.load(Ordering::SeqCst) <= WORKERS);

        shutdown_tx.send(true).unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_others() {
        let server = Server::bind(loopback(), 4).unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // A client that never writes stalls its own handler only
        let handler = |stream: TcpStream, _peer: SocketAddr| echo_one_byte(stream);
        let server_task = tokio::spawn(server.run(handler, shutdown_rx));

        let _stalled = TcpStream::connect(addr).await.unwrap();

        let mut active = TcpStream::connect(addr).await.unwrap();
        active.write_all(b"x").await.unwrap();
        let mut reply = [0u8; 1];
        timeout(Duration::from_secs(5), active.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"x");

        shutdown_tx.send(true).unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_keeps_loop_alive() {
        let server = Server::bind(loopback(), 2).unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let calls = Arc::new(AtomicUsize::new(0));

        let handler = {
            let calls = Arc::clone(&calls);
            move |_stream: TcpStream, _peer: SocketAddr| failing(Arc::clone(&calls))
        };
        let server_task = tokio::spawn(server.run(handler, shutdown_rx));

        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut buf = Vec::new();
            timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        shutdown_tx.send(true).unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let server = Server::bind(loopback(), 1).unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handler = |stream: TcpStream, _peer: SocketAddr| drain(stream);
        let server_task = tokio::spawn(server.run(handler, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), server_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let rebound = Server::bind(addr, 1).unwrap();
        assert_eq!(rebound.local_addr(), addr);
    }

    #[tokio::test]
    async fn test_shutdown_while_all_workers_busy() {
        let server = Server::bind(loopback(), 1).unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handler = |stream: TcpStream, _peer: SocketAddr| drain(stream);
        let server_task = tokio::spawn(server.run(handler, shutdown_rx));

        // Occupies the only slot until dropped
        let busy = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), server_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        drop(busy);
    }

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let start = std::time::Instant::now();
        accept_failed(&io::Error::from_raw_os_error(24)).await;
        assert!(start.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }
}
