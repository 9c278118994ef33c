//! HTTP file-share protocol.
//!
//! A read-only subset of HTTP/1.1 for browsing a shared directory:
//! - `GET` returns file bytes or an HTML directory listing
//! - `HEAD` returns the same headers without a body
//! - anything else is answered with `501 Not Implemented`
//!
//! ## Request Handling
//!
//! ```text
//! Request:  GET /docs/report.pdf HTTP/1.1\r\n
//!           Host: 192.168.1.20:8000\r\n
//!           \r\n
//! Response: HTTP/1.1 200 OK\r\n
//!           Content-Type: application/pdf\r\n
//!           Content-Length: 48213\r\n
//!           Connection: close\r\n
//!           \r\n
//!           <file bytes>
//! ```
//!
//! Paths are resolved beneath the shared root only. A `..` segment or a
//! symlink leading outside the root yields `403 Forbidden`.

pub mod handler;
pub mod listing;
pub mod parser;
pub mod response;

pub use handler::{FileServer, ResolveError};
