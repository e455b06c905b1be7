//! Origin request construction.
//!
//! Rewrites a validated client request into the request sent upstream:
//!
//! ```text
//! GET <path> HTTP/1.0
//! Host: ...                  (client's, hoisted first, or synthesized)
//! <client headers>           (User-Agent replaced, Connection forced to
//!                             close, Proxy-Connection dropped)
//! User-Agent: ...            (only if the client sent none)
//! Connection: close          (only if the client sent none)
//! Proxy-Connection: close
//! <blank line>
//! ```
//!
//! A synthesized `Host` carries `:port` whenever the target port is not 80,
//! so origins on other ports see the authority the client asked for. A
//! client-sent `Host` is hoisted unchanged.
//!
//! HTTP/1.0 with `Connection: close` makes the origin end the connection
//! after one response, which is what delimits the relay.

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::request::{HeaderLine, ProxyRequest};
use crate::http::target::RequestTarget;

/// Fixed User-Agent presented to every origin.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3";

const CRLF: &[u8] = b"\r\n";

/// Complete outbound request (request line, headers, blank line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    bytes: Bytes,
}

impl ForwardRequest {
    pub fn from_request(request: &ProxyRequest) -> Self {
        Self::build(&request.target, &request.headers)
    }

    /// Build the outbound request for `target` from the client's headers.
    pub fn build(target: &RequestTarget, headers: &[HeaderLine]) -> Self {
        let mut buf = RequestBuilder::with_capacity(
            64 + target.path.len() + headers.iter().map(|h| h.as_bytes().len() + 2).sum::<usize>(),
        );

        buf.line_parts(&[b"GET ", target.path.as_bytes(), b" HTTP/1.0"]);

        let client_host = headers.iter().position(|h| h.is("Host"));
        match client_host {
            Some(index) => buf.line(headers[index].as_bytes()),
            None => buf.line_parts(&[b"Host: ", target.authority().as_bytes()]),
        }

        let mut saw_user_agent = false;
        let mut saw_connection = false;
        for header in headers {
            if header.is("Host") {
                // First one already written; duplicates are dropped.
                continue;
            }
            if header.is("User-Agent") {
                saw_user_agent = true;
                buf.line_parts(&[b"User-Agent: ", USER_AGENT.as_bytes()]);
            } else if header.is("Connection") {
                saw_connection = true;
                buf.line(b"Connection: close");
            } else if header.is("Proxy-Connection") {
                continue;
            } else {
                buf.line(header.as_bytes());
            }
        }

        if !saw_user_agent {
            buf.line_parts(&[b"User-Agent: ", USER_AGENT.as_bytes()]);
        }
        if !saw_connection {
            buf.line(b"Connection: close");
        }
        buf.line(b"Proxy-Connection: close");
        buf.line(b"");

        Self { bytes: buf.finish() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Append-only CRLF line builder.
struct RequestBuilder {
    buf: BytesMut,
}

impl RequestBuilder {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    fn line(&mut self, content: &[u8]) {
        self.buf.put_slice(content);
        self.buf.put_slice(CRLF);
    }

    fn line_parts(&mut self, parts: &[&[u8]]) {
        for part in parts {
            self.buf.put_slice(part);
        }
        self.buf.put_slice(CRLF);
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
