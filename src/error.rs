//! Per-connection error taxonomy.
//!
//! Every failure a connection worker can hit maps to one variant. Variants
//! that still allow a reply carry the status line they are reported with;
//! the rest only close the connection.

use std::io;

use thiserror::Error;

/// Failure while serving a single proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Request line, target or header block could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Client did not deliver its request head in time.
    #[error("client did not send a complete request in time")]
    RequestTimeout,

    /// Anything other than GET.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Origin refused, could not be resolved, or reset before responding.
    #[error("origin {origin} unreachable: {source}")]
    OriginUnreachable {
        origin: String,
        #[source]
        source: io::Error,
    },

    /// Origin connect or first read exceeded its deadline.
    #[error("origin {origin} timed out during {phase}")]
    OriginTimeout { origin: String, phase: &'static str },

    /// Writing to the client failed; nothing more can be sent.
    #[error("client disconnected: {0}")]
    ClientDisconnected(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Status code and reason phrase reported to the client, if a reply is
    /// still possible.
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            ProxyError::MalformedRequest(_) => Some((400, "Bad Request")),
            ProxyError::RequestTimeout => Some((408, "Request Timeout")),
            ProxyError::UnsupportedMethod(_) => Some((501, "Not Implemented")),
            ProxyError::OriginUnreachable { .. } => Some((502, "Bad Gateway")),
            ProxyError::OriginTimeout { .. } => Some((504, "Gateway Timeout")),
            ProxyError::ClientDisconnected(_) | ProxyError::Io(_) => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::RequestTimeout => "request_timeout",
            ProxyError::UnsupportedMethod(_) => "unsupported_method",
            ProxyError::OriginUnreachable { .. } => "origin_unreachable",
            ProxyError::OriginTimeout { .. } => "origin_timeout",
            ProxyError::ClientDisconnected(_) => "client_disconnected",
            ProxyError::Io(_) => "io",
        }
    }
}

/// Convenience Result type for connection handling.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_failures_map_to_5xx() {
        let unreachable = ProxyError::OriginUnreachable {
            origin: "example.com:80".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(unreachable.status(), Some((502, "Bad Gateway")));

        let timeout = ProxyError::OriginTimeout {
            origin: "example.com:80".into(),
            phase: "connect",
        };
        assert_eq!(timeout.status(), Some((504, "Gateway Timeout")));
    }

    #[test]
    fn client_side_failures_have_no_reply() {
        let err = ProxyError::ClientDisconnected(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.status(), None);
        assert_eq!(err.label(), "client_disconnected");
    }

    #[test]
    fn request_errors_map_to_4xx_and_501() {
        assert_eq!(
            ProxyError::MalformedRequest("x".into()).status(),
            Some((400, "Bad Request"))
        );
        assert_eq!(
            ProxyError::UnsupportedMethod("POST".into()).status(),
            Some((501, "Not Implemented"))
        );
    }
}
