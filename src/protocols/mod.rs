//! Protocol implementations.
//!
//! Each protocol provides a per-connection handler driven by the
//! accept loop in [`crate::server`].
//!
//! - `http`: read-only HTTP file sharing
//! - `speed`: length-prefixed throughput test

pub mod http;
pub mod speed;
