//! Per-connection file serving for the share server.
//!
//! Reads one request, resolves its path beneath the shared root and
//! answers with the file, a directory listing or an error page. The
//! connection is closed after the response.

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::listing;
use super::parser::{self, Method, ParseError, ParseResult, Request};
use super::response::{error_response, http_date, parse_http_date, ResponseHead, Status};
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::server::{BoxError, HandlerResult};
use crate::streamer::BoundedStreamer;

/// Files tried, in order, when a directory is requested
const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

/// Why a request path could not be mapped to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The path escapes the shared root or is not readable
    Forbidden,
    NotFound,
}

impl ResolveError {
    fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => ResolveError::Forbidden,
            _ => ResolveError::NotFound,
        }
    }
}

/// What came in on the connection before any response was written
enum Incoming {
    Request(Request),
    Invalid(ParseError),
    /// Peer closed without sending anything
    Closed,
    /// No complete request head within the request timeout
    TimedOut,
}

/// Serves a read-only directory tree. Shared across all connections.
#[derive(Debug, Clone)]
pub struct FileServer {
    root: PathBuf,
    streamer: BoundedStreamer,
    /// How long a client may take to send its request head
    request_timeout: Duration,
}

impl FileServer {
    /// Create a server for `root`, which is canonicalized here.
    pub fn new(root: &Path, chunk_size: usize) -> io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
            streamer: BoundedStreamer::new(chunk_size),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a decoded URL path to a canonical path inside the root.
    ///
    /// `..` segments are refused outright; symlinks are followed and the
    /// result must still lie beneath the root.
    pub async fn resolve(&self, url_path: &str) -> Result<PathBuf, ResolveError> {
        let mut path = self.root.clone();
        for segment in url_path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(ResolveError::Forbidden),
                s if !is_plain_segment(s) => return Err(ResolveError::Forbidden),
                s => path.push(s),
            }
        }
        self.contain(&path).await
    }

    /// Canonicalize `path` and check it stays under the root.
    async fn contain(&self, path: &Path) -> Result<PathBuf, ResolveError> {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| ResolveError::from_io(&e))?;
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(ResolveError::Forbidden)
        }
    }

    /// Handle one connection: read a request, write a response, close.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> HandlerResult
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let read = tokio::time::timeout(self.request_timeout, read_request(&mut stream));
        let incoming = match read.await {
            Ok(incoming) => incoming?,
            Err(_) => Incoming::TimedOut,
        };

        let status = match incoming {
            Incoming::Request(request) => {
                let status = self.respond(&mut stream, &request).await?;
                info!(
                    peer = %peer,
                    method = request.method.as_str(),
                    target = %request.target,
                    status = status.code(),
                    "Request served"
                );
                status
            }
            Incoming::Invalid(e) => {
                warn!(peer = %peer, error = %e, "Rejected malformed request");
                send_error(&mut stream, Status::BadRequest, &e.to_string(), true).await?
            }
            Incoming::TimedOut => {
                debug!(peer = %peer, "No request before timeout");
                send_error(&mut stream, Status::RequestTimeout, "Request timed out", true).await?
            }
            Incoming::Closed => {
                debug!(peer = %peer, "Connection closed before request");
                return Ok(());
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!(
                peer = %peer,
                status = status.code(),
                error = %e,
                "Shutdown after response failed"
            );
        }
        Ok(())
    }

    async fn respond<S>(&self, stream: &mut S, request: &Request) -> Result<Status, BoxError>
    where
        S: AsyncWrite + Unpin,
    {
        let send_body = match &request.method {
            Method::Get => true,
            Method::Head => false,
            Method::Other(method) => {
                let message = format!("Unsupported method ({method})");
                return send_error(stream, Status::NotImplemented, &message, true).await;
            }
        };

        let path = match self.resolve(&request.path).await {
            Ok(path) => path,
            Err(e) => return send_resolve_error(stream, e, send_body).await,
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                return send_resolve_error(stream, ResolveError::from_io(&e), send_body).await;
            }
        };

        if !metadata.is_dir() {
            // A trailing slash names a directory, never a file
            if request.path.ends_with('/') {
                return send_resolve_error(stream, ResolveError::NotFound, send_body).await;
            }
            return self.send_file(stream, &path, request, send_body).await;
        }

        if !request.path.ends_with('/') {
            let mut location = format!("{}/", request.raw_path());
            if let Some(query) = request.query() {
                location.push('?');
                location.push_str(query);
            }
            let head = ResponseHead::new(Status::MovedPermanently)
                .header("Location", location)
                .header("Content-Length", "0");
            stream.write_all(&head.to_bytes()).await?;
            stream.flush().await?;
            return Ok(head.status());
        }

        for index in INDEX_FILES {
            let Ok(candidate) = self.contain(&path.join(index)).await else {
                continue;
            };
            let is_file = tokio::fs::metadata(&candidate)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if is_file {
                return self.send_file(stream, &candidate, request, send_body).await;
            }
        }

        self.send_listing(stream, &path, request, send_body).await
    }

    async fn send_file<S>(
        &self,
        stream: &mut S,
        path: &Path,
        request: &Request,
        send_body: bool,
    ) -> Result<Status, BoxError>
    where
        S: AsyncWrite + Unpin,
    {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                return send_resolve_error(stream, ResolveError::from_io(&e), send_body).await;
            }
        };
        let metadata = file.metadata().await?;
        let length = metadata.len();
        let modified = metadata.modified().ok();

        if let Some(modified) = modified {
            if not_modified_since(request, modified) {
                let head = ResponseHead::new(Status::NotModified)
                    .header("Last-Modified", http_date(modified));
                stream.write_all(&head.to_bytes()).await?;
                stream.flush().await?;
                return Ok(head.status());
            }
        }

        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let mut head = ResponseHead::new(Status::Ok)
            .header("Content-Type", content_type.essence_str())
            .header("Content-Length", length.to_string());
        if let Some(modified) = modified {
            head = head.header("Last-Modified", http_date(modified));
        }

        stream.write_all(&head.to_bytes()).await?;
        if send_body {
            self.streamer.stream_exact(&mut file, stream, length).await?;
        } else {
            stream.flush().await?;
        }
        Ok(head.status())
    }

    async fn send_listing<S>(
        &self,
        stream: &mut S,
        dir: &Path,
        request: &Request,
        send_body: bool,
    ) -> Result<Status, BoxError>
    where
        S: AsyncWrite + Unpin,
    {
        let entries = match listing::read_entries(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Directory not listable");
                let message = "No permission to list directory";
                return send_error(stream, Status::NotFound, message, send_body).await;
            }
        };

        let body = listing::render(&request.path, &entries);
        let head = ResponseHead::new(Status::Ok)
            .header("Content-Type", "text/html; charset=utf-8")
            .header("Content-Length", body.len().to_string());

        stream.write_all(&head.to_bytes()).await?;
        if send_body {
            stream.write_all(body.as_bytes()).await?;
        }
        stream.flush().await?;
        Ok(head.status())
    }
}

/// A path segment that can only ever name one entry inside its parent
fn is_plain_segment(segment: &str) -> bool {
    if segment.contains('\\') || segment.contains('\0') {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// True when the client's cached copy is still current.
fn not_modified_since(request: &Request, modified: std::time::SystemTime) -> bool {
    // An entity tag takes precedence over the date
    if request.header("If-None-Match").is_some() {
        return false;
    }
    match request.header("If-Modified-Since").and_then(parse_http_date) {
        Some(since) => DateTime::<Utc>::from(modified).timestamp() <= since.timestamp(),
        None => false,
    }
}

/// Read until a full request head is buffered.
async fn read_request<S>(stream: &mut S) -> io::Result<Incoming>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(1024);

    loop {
        match parser::parse(&buffer) {
            ParseResult::Complete(request, _) => return Ok(Incoming::Request(request)),
            ParseResult::Error(e) => return Ok(Incoming::Invalid(e)),
            ParseResult::Incomplete => {}
        }

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return Ok(if buffer.is_empty() {
                Incoming::Closed
            } else {
                Incoming::Invalid(ParseError::MalformedRequestLine)
            });
        }
    }
}

async fn send_resolve_error<S>(
    stream: &mut S,
    error: ResolveError,
    send_body: bool,
) -> Result<Status, BoxError>
where
    S: AsyncWrite + Unpin,
{
    let (status, message) = match error {
        ResolveError::Forbidden => (Status::Forbidden, "Access denied"),
        ResolveError::NotFound => (Status::NotFound, "File not found"),
    };
    send_error(stream, status, message, send_body).await
}

async fn send_error<S>(
    stream: &mut S,
    status: Status,
    message: &str,
    send_body: bool,
) -> Result<Status, BoxError>
where
    S: AsyncWrite + Unpin,
{
    let (head, body) = error_response(status, message);
    stream.write_all(&head.to_bytes()).await?;
    if send_body {
        stream.write_all(&body).await?;
    }
    stream.flush().await?;
    Ok(status)
}
