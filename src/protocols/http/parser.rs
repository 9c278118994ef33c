//! HTTP/1.x request head parser.

use std::fmt;

/// Largest request head (request line + headers) accepted
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Request method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    /// Anything else; answered with 501
    Other(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Other(token) => token,
        }
    }
}

/// Parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Request target exactly as sent, e.g. `/docs/a%20b.txt?x=1`
    pub target: String,
    /// Percent-decoded path with query and fragment removed
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Still-encoded path portion of the target
    pub fn raw_path(&self) -> &str {
        split_target(&self.target).0
    }

    /// Query string, without the leading `?`
    pub fn query(&self) -> Option<&str> {
        split_target(&self.target).1
    }
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Complete head and the number of bytes it occupied
    Complete(Request, usize),
    /// Need more data
    Incomplete,
    Error(ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    HeadTooLarge,
    MalformedRequestLine,
    MalformedHeader,
    InvalidEncoding,
    UnsupportedVersion,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ParseError::HeadTooLarge => "Request header too large",
            ParseError::MalformedRequestLine => "Bad request syntax",
            ParseError::MalformedHeader => "Bad header line",
            ParseError::InvalidEncoding => "Bad percent-encoding in path",
            ParseError::UnsupportedVersion => "Bad request version",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a request head from the input buffer.
pub fn parse(input: &[u8]) -> ParseResult {
    let head_end = match find_head_end(input) {
        Some(pos) => pos,
        None if input.len() > MAX_HEAD_SIZE => return ParseResult::Error(ParseError::HeadTooLarge),
        None => return ParseResult::Incomplete,
    };
    if head_end > MAX_HEAD_SIZE {
        return ParseResult::Error(ParseError::HeadTooLarge);
    }

    let head = match std::str::from_utf8(&input[..head_end]) {
        Ok(head) => head,
        Err(_) => return ParseResult::Error(ParseError::MalformedRequestLine),
    };

    match parse_head(head) {
        Ok(request) => ParseResult::Complete(request, head_end + 4),
        Err(e) => ParseResult::Error(e),
    }
}

fn parse_head(head: &str) -> Result<Request, ParseError> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split(' ');
    let fields = (parts.next(), parts.next(), parts.next(), parts.next());
    let (method, target, version) = match fields {
        (Some(method), Some(target), Some(version), None) if !method.is_empty() => {
            (method, target, version)
        }
        _ => return Err(ParseError::MalformedRequestLine),
    };

    if !target.starts_with('/') {
        return Err(ParseError::MalformedRequestLine);
    }
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::UnsupportedVersion);
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(ParseError::MalformedHeader)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::MalformedHeader);
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(Request {
        method: Method::from_token(method),
        target: target.to_string(),
        path: decode_path(target)?,
        version: version.to_string(),
        headers,
    })
}

/// Percent-decode the path portion of a request target.
pub fn decode_path(target: &str) -> Result<String, ParseError> {
    let (raw, _) = split_target(target);
    urlencoding::decode(raw)
        .map(|path| path.into_owned())
        .map_err(|_| ParseError::InvalidEncoding)
}

/// Split a target into path and query, dropping any fragment.
fn split_target(target: &str) -> (&str, Option<&str>) {
    let target = target.split_once('#').map_or(target, |(before, _)| before);
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}
