//! HTTP response heads, error pages and date handling.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Value of the `Server` header
pub const SERVER_NAME: &str = concat!("lanshare/", env!("CARGO_PKG_VERSION"));

/// Response status codes the share server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    MovedPermanently,
    NotModified,
    BadRequest,
    Forbidden,
    NotFound,
    RequestTimeout,
    NotImplemented,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::MovedPermanently => 301,
            Status::NotModified => 304,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::RequestTimeout => 408,
            Status::NotImplemented => 501,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::MovedPermanently => "Moved Permanently",
            Status::NotModified => "Not Modified",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::RequestTimeout => "Request Timeout",
            Status::NotImplemented => "Not Implemented",
        }
    }
}

/// Status line plus headers. Bodies are written separately so large
/// files can be streamed after the head.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: Status,
    headers: Vec<(&'static str, String)>,
}

impl ResponseHead {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Serialize the head. `Server`, `Date` and `Connection: close` are
    /// always included.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(256);
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status.code(), self.status.reason()).as_bytes(),
        );
        push_header(&mut out, "Server", SERVER_NAME);
        push_header(&mut out, "Date", &http_date(SystemTime::now()));
        for (name, value) in &self.headers {
            push_header(&mut out, name, value);
        }
        push_header(&mut out, "Connection", "close");
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn push_header(out: &mut BytesMut, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Build an error response with a short HTML explanation.
pub fn error_response(status: Status, message: &str) -> (ResponseHead, Bytes) {
    let body = format!(
        "<!DOCTYPE HTML>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>Error response</title>\n\
         </head>\n\
         <body>\n\
         <h1>Error response</h1>\n\
         <p>Error code: {}</p>\n\
         <p>Message: {}.</p>\n\
         </body>\n\
         </html>\n",
        status.code(),
        escape_html(message)
    );

    let head = ResponseHead::new(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Content-Length", body.len().to_string());
    (head, Bytes::from(body))
}

/// Format a timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date header value.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Escape text for inclusion in HTML content or attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_head_serialization() {
        let head = ResponseHead::new(Status::Ok)
            .header("Content-Type", "text/plain")
            .header("Content-Length", "10");
        let bytes = head.to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("\r\nContent-Type: text/plain\r\n"));
        assert!(text.contains("\r\nContent-Length: 10\r\n"));
        assert!(text.contains("\r\nConnection: close\r\n"));
        assert!(text.contains(&format!("\r\nServer: {SERVER_NAME}\r\n")));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_error_response() {
        let (head, body) = error_response(Status::NotFound, "File not found");
        assert_eq!(head.status(), Status::NotFound);

        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("Error code: 404"));
        assert!(body.contains("Message: File not found."));

        let head = head.to_bytes();
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn test_http_date_round_trip() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(784111777);
        let formatted = http_date(time);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");

        let parsed = parse_http_date(&formatted).unwrap();
        assert_eq!(parsed.timestamp(), 784111777);
    }

    #[test]
    fn test_parse_http_date_rejects_garbage() {
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">Tom & Jerry's</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#x27;s&lt;/a&gt;"
        );
    }
}
