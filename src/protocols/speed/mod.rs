//! Raw TCP throughput test protocol.
//!
//! The server pushes one random payload per connection; the client
//! times how long it takes to arrive.
//!
//! ## Protocol Format
//!
//! ```text
//! Server -> Client:  <length: u64 big-endian, 8 bytes><length bytes of payload>
//! ```
//!
//! There are no client-to-server messages. The server closes the
//! connection after the last payload byte. A client that sees the
//! connection close before `length` bytes arrived reports an error.

pub mod client;
pub mod header;
pub mod payload;
pub mod session;

pub use client::{ClientError, SpeedClient};
pub use session::SpeedSession;
