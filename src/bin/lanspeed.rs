//! lanspeed: measure raw TCP throughput between two machines.
//!
//! One side runs `--server` and streams a random payload to every client;
//! the other runs `--client SERVER_IP` and reports the transfer speed.

use std::io::Write;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use lanshare::config::{ConfigError, Role, SpeedConfig};
use lanshare::protocols::speed::{SpeedClient, SpeedSession};
use lanshare::server::Server;
use lanshare::stats::{format_bytes, format_rate};
use lanshare::{logging, net, shutdown};
use tokio::net::TcpStream;
use tracing::info;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = match SpeedConfig::load() {
        Ok(config) => config,
        Err(ConfigError::MissingRole) => {
            let program = std::env::args().next().unwrap_or_else(|| "lanspeed".to_string());
            eprintln!("{}", ConfigError::MissingRole);
            eprintln!("Example server: {program} --server");
            eprintln!("Example client: {program} --client SERVER_IP");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    logging::init(&config.log_level);

    match &config.role {
        Role::Server => run_server(&config).await,
        Role::Client { host } => Ok(run_client(&config, host).await),
    }
}

async fn run_server(config: &SpeedConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let server = Server::bind(config.listen_addr(), config.sessions)?;
    let port = server.local_addr().port();
    let local_ip = net::local_ip();

    info!(
        address = %server.local_addr(),
        payload_size = config.payload_size,
        sessions = config.sessions,
        "Starting lanspeed server"
    );

    let program = std::env::args().next().unwrap_or_else(|| "lanspeed".to_string());
    println!("Server listening on {local_ip}:{port}");
    println!("Payload size: {}", format_bytes(config.payload_size));
    println!("Run the client using: {program} --client {local_ip} --port {port}");

    let (trigger, shutdown_rx) = shutdown::channel();
    shutdown::on_ctrl_c(trigger);

    let session = Arc::new(SpeedSession::new(config.payload_size, config.chunk_size));
    let handler = move |stream: TcpStream, peer: SocketAddr| {
        let session = Arc::clone(&session);
        async move { session.handle_connection(stream, peer).await }
    };

    let result = server.run(handler, shutdown_rx).await;
    println!("\nServer stopped.");
    result?;

    Ok(ExitCode::SUCCESS)
}

async fn run_client(config: &SpeedConfig, host: &str) -> ExitCode {
    let client = SpeedClient::new(host, config.port).with_chunk_size(config.chunk_size);

    // Only redraw when the percentage visibly changes
    let mut last_shown = None;
    let progress = |received: u64, expected: u64| {
        if received == 0 {
            println!("Receiving file of size: {}", format_bytes(expected));
        }
        let basis_points = if expected == 0 {
            10_000
        } else {
            received * 10_000 / expected
        };
        if last_shown != Some(basis_points) {
            last_shown = Some(basis_points);
            print!("\rProgress: {:.2}%", basis_points as f64 / 100.0);
            let _ = std::io::stdout().flush();
        }
    };

    match client.run(progress).await {
        Ok(stats) => {
            println!();
            println!("Transfer completed in {:.2} seconds", stats.elapsed.as_secs_f64());
            println!("Average speed: {}", format_rate(stats.bytes_per_sec()));
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!();
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
