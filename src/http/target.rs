//! Absolute-URI request targets.
//!
//! A forward proxy receives `http://host[:port][/path]` in the request line.
//! The host ends at the first `:` or `/` (or the closing `]` of a bracketed
//! IPv6 literal); the port defaults to 80 and the path to `/`.

use std::fmt;

use crate::error::{ProxyError, Result};

const SCHEME: &str = "http://";
const DEFAULT_PORT: u16 = 80;

/// Parsed `http://host[:port][/path]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Lowercased host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// Path and query, always starting with `/`.
    pub path: String,
}

impl RequestTarget {
    /// Parse an absolute-URI request target.
    pub fn parse(target: &str) -> Result<Self> {
        let rest = match target.get(..SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => &target[SCHEME.len()..],
            _ => {
                return Err(ProxyError::MalformedRequest(format!(
                    "request target '{}' is not an absolute http:// URI",
                    target
                )))
            }
        };

        let (host, after_host) = if let Some(bracketed) = rest.strip_prefix('[') {
            let close = bracketed.find(']').ok_or_else(|| {
                ProxyError::MalformedRequest(format!("unterminated IPv6 literal in '{}'", target))
            })?;
            (&bracketed[..close], &bracketed[close + 1..])
        } else {
            let end = rest.find([':', '/']).unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        };

        if host.is_empty() {
            return Err(ProxyError::MalformedRequest(format!(
                "request target '{}' has no host",
                target
            )));
        }

        let (port, path) = match after_host.strip_prefix(':') {
            Some(port_and_path) => {
                let end = port_and_path.find('/').unwrap_or(port_and_path.len());
                let port = parse_port(&port_and_path[..end], target)?;
                (port, &port_and_path[end..])
            }
            None if after_host.is_empty() || after_host.starts_with('/') => {
                (DEFAULT_PORT, after_host)
            }
            None => {
                return Err(ProxyError::MalformedRequest(format!(
                    "unexpected characters after host in '{}'",
                    target
                )))
            }
        };

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        })
    }

    /// Host as it appears in a URI or `Host` header (IPv6 re-bracketed).
    pub fn host_for_uri(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `Host` header value: the port is omitted when it is the default.
    pub fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host_for_uri()
        } else {
            format!("{}:{}", self.host_for_uri(), self.port)
        }
    }

    /// Normalized cache key: scheme, host, explicit port and path.
    ///
    /// Parsing a key yields a target with the same key.
    pub fn cache_key(&self) -> String {
        format!("http://{}:{}{}", self.host_for_uri(), self.port, self.path)
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_for_uri(), self.port)
    }
}

fn parse_port(port: &str, target: &str) -> Result<u16> {
    if port.is_empty() {
        return Ok(DEFAULT_PORT);
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(ProxyError::MalformedRequest(format!(
            "invalid port '{}' in '{}'",
            port, target
        ))),
        Ok(port) => Ok(port),
    }
}
