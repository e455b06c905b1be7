//! Response-side helpers.
//!
//! # Responsibilities
//! - Render the proxy's own error replies
//! - Locate and inspect the origin response head while it streams past,
//!   so the relay can frame the body and decide cacheability
//!
//! # Design Decisions
//! - Origin bytes are never rewritten; only the head is parsed, read-only
//! - A head that cannot be parsed is relayed unchanged and never cached

use bytes::Bytes;

use crate::error::ProxyError;

/// Render a complete HTTP/1.0 error reply.
///
/// `cause` is the offending input (method, target, origin) and is escaped
/// before it is placed in the HTML body.
pub fn error_response(code: u16, reason: &str, cause: &str, detail: &str) -> Bytes {
    let body = format!(
        "<html><title>Proxy Error</title><body bgcolor=\"ffffff\">\r\n\
         {code}: {reason}\r\n\
         <p>{detail}: {cause}\r\n\
         <hr><em>Proxy Server</em>\r\n",
        cause = escape_html(cause),
        detail = escape_html(detail),
    );
    let head = format!(
        "HTTP/1.0 {code} {reason}\r\n\
         Content-type: text/html\r\n\
         Content-length: {}\r\n\r\n",
        body.len()
    );

    let mut reply = Vec::with_capacity(head.len() + body.len());
    reply.extend_from_slice(head.as_bytes());
    reply.extend_from_slice(body.as_bytes());
    Bytes::from(reply)
}

/// Error reply for `err`, or `None` when the client can no longer be
/// answered.
pub fn error_page(err: &ProxyError) -> Option<Bytes> {
    let (code, reason) = err.status()?;
    let (cause, detail) = match err {
        ProxyError::MalformedRequest(why) => (why.as_str(), "Proxy could not parse the request"),
        ProxyError::RequestTimeout => ("request head", "Client did not send a complete request"),
        ProxyError::UnsupportedMethod(method) => (method.as_str(), "Only GET method is implemented"),
        ProxyError::OriginUnreachable { origin, .. } => (origin.as_str(), "Proxy could not reach the origin"),
        ProxyError::OriginTimeout { origin, .. } => (origin.as_str(), "Origin did not respond in time"),
        ProxyError::ClientDisconnected(_) | ProxyError::Io(_) => return None,
    };
    Some(error_response(code, reason, cause, detail))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// What the relay needs to know about an origin response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code, if the status line was well formed.
    pub status: Option<u16>,
    /// Declared body length, if present and valid.
    pub content_length: Option<u64>,
}

impl ResponseHead {
    pub fn is_ok(&self) -> bool {
        self.status == Some(200)
    }
}

/// Offset just past the blank line ending the head, if it is in `buf`.
///
/// Accepts both `CRLF CRLF` and bare `LF LF`.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while let Some(offset) = buf[i..].iter().position(|&b| b == b'\n') {
        let nl = i + offset;
        let rest = &buf[nl + 1..];
        if rest.first() == Some(&b'\n') {
            return Some(nl + 2);
        }
        if rest.starts_with(b"\r\n") {
            return Some(nl + 3);
        }
        i = nl + 1;
    }
    None
}

/// Inspect a complete response head (as located by [`find_head_end`]).
pub fn parse_response_head(head: &[u8]) -> ResponseHead {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let status = lines.next().and_then(|status_line| {
        let mut parts = status_line.split_ascii_whitespace();
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        let code = parts.next()?;
        if code.len() != 3 {
            return None;
        }
        code.parse::<u16>().ok()
    });

    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            match value.trim().parse::<u64>() {
                // Conflicting lengths make the framing unknowable.
                Ok(len) if content_length.map_or(true, |prev| prev == len) => content_length = Some(len),
                _ => {
                    return ResponseHead {
                        status,
                        content_length: None,
                    }
                }
            }
        }
    }

    ResponseHead {
        status,
        content_length,
    }
}
