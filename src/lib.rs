//! lanshare: LAN file sharing and throughput testing.
//!
//! Two tools share one connection-handling core:
//! - `lanshare` serves a directory over HTTP
//! - `lanspeed` streams a random payload and reports transfer speed
//!
//! Both accept connections through [`server::Server`], which runs each
//! connection in its own task under a fixed concurrency cap, and move
//! bytes with [`streamer::BoundedStreamer`].

pub mod config;
pub mod logging;
pub mod net;
pub mod protocols;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod streamer;
