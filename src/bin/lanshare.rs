//! lanshare: share a directory over HTTP on the local network.
//!
//! Features:
//! - Directory listings and file downloads from any browser
//! - Bounded number of concurrently served connections
//! - Configuration via CLI arguments or TOML file

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use lanshare::config::ShareConfig;
use lanshare::protocols::http::FileServer;
use lanshare::server::Server;
use lanshare::{logging, net, shutdown};
use tokio::net::TcpStream;
use tracing::info;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = match ShareConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    logging::init(&config.log_level);

    println!("Sharing directory: {}", config.directory.display());

    let server = Server::bind(config.listen_addr(), config.workers)?;
    let port = server.local_addr().port();
    let local_ip = net::local_ip();

    info!(
        address = %server.local_addr(),
        directory = %config.directory.display(),
        workers = config.workers,
        chunk_size = config.chunk_size,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Starting lanshare"
    );

    println!("Server started at port {port}");
    println!("Sharing folder: {}", config.directory.display());
    println!("Access the shared folder at:");
    println!("  Local access: http://localhost:{port}");
    println!("  Network access: http://{local_ip}:{port}");
    println!("Press Ctrl+C to stop the server.");

    let (trigger, shutdown_rx) = shutdown::channel();
    shutdown::on_ctrl_c(trigger);

    let files = FileServer::new(&config.directory, config.chunk_size)?
        .with_request_timeout(config.request_timeout);
    let files = Arc::new(files);
    let handler = move |stream: TcpStream, peer: SocketAddr| {
        let files = Arc::clone(&files);
        async move { files.handle_connection(stream, peer).await }
    };

    let result = server.run(handler, shutdown_rx).await;
    println!("\nServer stopped.");
    result?;

    Ok(ExitCode::SUCCESS)
}
