//! Request head reading and validation.
//!
//! # Responsibilities
//! - Read the request line and header block from the client, bounded by
//!   line-length and header-count limits
//! - Validate method, request target and protocol version
//! - Keep header lines byte-exact for forwarding
//!
//! # Design Decisions
//! - The whole head is read before any validation so an error reply is
//!   never written while the client is still sending
//! - Bare `LF` terminators are accepted; stored lines carry no terminator

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::config::LimitsConfig;
use crate::error::{ProxyError, Result};
use crate::http::target::RequestTarget;

/// One raw header line, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine(Vec<u8>);

impl HeaderLine {
    pub fn new(line: impl Into<Vec<u8>>) -> Self {
        Self(line.into())
    }

    /// Header name with surrounding whitespace removed.
    pub fn name(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == b':').unwrap_or(self.0.len());
        trim_whitespace(&self.0[..end])
    }

    /// Case-insensitive header name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Request line and headers exactly as received.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<HeaderLine>,
}

/// A validated GET request ready for cache lookup and rewriting.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target: RequestTarget,
    pub headers: Vec<HeaderLine>,
}

impl RequestHead {
    /// Split a request line into method, target and version.
    pub fn parse_request_line(line: &[u8]) -> Result<(String, String, String)> {
        let line = std::str::from_utf8(line)
            .map_err(|_| ProxyError::MalformedRequest("request line is not valid UTF-8".into()))?;
        let mut parts = line.split_ascii_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version), None) => {
                Ok((method.to_string(), target.to_string(), version.to_string()))
            }
            _ => Err(ProxyError::MalformedRequest(format!(
                "request line '{}' is not 'METHOD target HTTP-version'",
                line.trim()
            ))),
        }
    }

    /// Validate the head into a forwardable GET request.
    ///
    /// The method is checked first: a non-GET request is rejected without
    /// looking at its target.
    pub fn into_proxy_request(self) -> Result<ProxyRequest> {
        if !self.method.eq_ignore_ascii_case("GET") {
            return Err(ProxyError::UnsupportedMethod(self.method));
        }
        let version_ok = self
            .version
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("HTTP/"));
        if !version_ok {
            return Err(ProxyError::MalformedRequest(format!(
                "unknown protocol version '{}'",
                self.version
            )));
        }
        let target = RequestTarget::parse(&self.target)?;
        Ok(ProxyRequest {
            target,
            headers: self.headers,
        })
    }
}

/// Read one request head from the client.
///
/// Returns `Ok(None)` when the client closes before sending anything.
pub async fn read_request_head<R>(reader: &mut R, limits: &LimitsConfig) -> Result<Option<RequestHead>>
where
    R: AsyncBufRead + AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(256);

    if !read_line(reader, limits.max_line_length, &mut line).await? {
        return Ok(None);
    }
    let (method, target, version) = RequestHead::parse_request_line(&line)?;

    let mut headers = Vec::new();
    loop {
        if !read_line(reader, limits.max_line_length, &mut line).await? {
            return Err(ProxyError::MalformedRequest(
                "connection closed before end of headers".into(),
            ));
        }
        if line.is_empty() {
            break;
        }
        if headers.len() == limits.max_header_lines {
            return Err(ProxyError::MalformedRequest(format!(
                "more than {} header lines",
                limits.max_header_lines
            )));
        }
        headers.push(HeaderLine::new(line.as_slice()));
    }

    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers,
    }))
}

/// Read a single line into `buf` without its terminator.
///
/// Returns `false` on a clean EOF before any byte of the line.
async fn read_line<R>(reader: &mut R, max_len: usize, buf: &mut Vec<u8>) -> Result<bool>
where
    R: AsyncBufRead + AsyncRead + Unpin,
{
    buf.clear();
    // Room for the content plus CRLF; anything longer cannot be a valid line.
    let limit = max_len as u64 + 2;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if read == 0 {
        return Ok(false);
    }
    if buf.last() != Some(&b'\n') {
        return Err(if read as u64 == limit {
            ProxyError::MalformedRequest(format!("line longer than {} bytes", max_len))
        } else {
            ProxyError::MalformedRequest("connection closed mid-line".into())
        });
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > max_len {
        return Err(ProxyError::MalformedRequest(format!(
            "line longer than {} bytes",
            max_len
        )));
    }
    Ok(true)
}
