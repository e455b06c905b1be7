//! Origin fetch and relay.
//!
//! # Responsibilities
//! - Connect to the origin under the connect deadline
//! - Send the rewritten request
//! - Stream the response to the client byte-for-byte as it arrives
//! - Accumulate a copy for the cache while it stays under the object limit
//!
//! # Design Decisions
//! - Reads are raw chunks, never lines; binary bodies pass through intact
//! - A `Content-Length` in the response head bounds the relay, so an origin
//!   that keeps the socket open cannot stall a finished response
//! - Failures before the first relayed byte become error replies; failures
//!   after it only end the relay and make the response uncacheable

use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ProxyError, Result};
use crate::http::{find_head_end, parse_response_head, ForwardRequest, RequestTarget, ResponseHead};
use crate::observability::metrics;
use crate::resilience::{with_deadline, Timeouts};

const READ_CHUNK: usize = 16 * 1024;

/// Response heads larger than this are relayed without inspection.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Result of one relayed origin response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Bytes written to the client.
    pub bytes_relayed: u64,
    /// Parsed response head, if one was found.
    pub head: Option<ResponseHead>,
    /// The response ended where its framing said it would.
    pub complete: bool,
    /// Accumulated copy, present only if it stayed under the object limit.
    pub payload: Option<Bytes>,
}

impl FetchOutcome {
    /// Complete `200` responses small enough to keep.
    pub fn is_cacheable(&self) -> bool {
        self.complete && self.head.is_some_and(|h| h.is_ok()) && self.payload.is_some()
    }

    pub fn into_cacheable(self) -> Option<Bytes> {
        if self.is_cacheable() {
            self.payload
        } else {
            None
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.head.and_then(|h| h.status)
    }
}

/// Fetches from origins and relays to clients.
#[derive(Debug, Clone)]
pub struct OriginFetcher {
    timeouts: Timeouts,
    max_object_size: usize,
}

impl OriginFetcher {
    pub fn new(timeouts: Timeouts, max_object_size: usize) -> Self {
        Self {
            timeouts,
            max_object_size,
        }
    }

    /// Connect to `target`, send `request` and relay the reply to `client`.
    pub async fn fetch<W>(&self, target: &RequestTarget, request: &ForwardRequest, client: &mut W) -> Result<FetchOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let origin = target.to_string();
        let connect = TcpStream::connect((target.host.as_str(), target.port));

        let upstream = match with_deadline(self.timeouts.connect, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ProxyError::OriginUnreachable { origin, source }),
            Err(_) => {
                return Err(ProxyError::OriginTimeout {
                    origin,
                    phase: "connect",
                })
            }
        };
        if let Err(e) = upstream.set_nodelay(true) {
            tracing::debug!(error = %e, "set_nodelay failed");
        }

        tracing::debug!(origin = %origin, "Connected to origin");
        self.relay(&origin, upstream, request, client).await
    }

    /// Send `request` over an established origin stream and relay the reply.
    pub async fn relay<O, W>(&self, origin: &str, mut upstream: O, request: &ForwardRequest, client: &mut W) -> Result<FetchOutcome>
    where
        O: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();

        if let Err(source) = upstream.write_all(request.as_bytes()).await {
            return Err(ProxyError::OriginUnreachable {
                origin: origin.to_string(),
                source,
            });
        }

        let mut chunk = vec![0u8; READ_CHUNK];
        let mut framing = Framing::default();
        let mut copy = Accumulator::new(self.max_object_size);
        let mut relayed: u64 = 0;

        let complete = loop {
            let read = with_deadline(self.timeouts.read, upstream.read(&mut chunk)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(source)) if relayed == 0 => {
                    return Err(ProxyError::OriginUnreachable {
                        origin: origin.to_string(),
                        source,
                    })
                }
                Err(_) if relayed == 0 => {
                    return Err(ProxyError::OriginTimeout {
                        origin: origin.to_string(),
                        phase: "first read",
                    })
                }
                Ok(Err(e)) => {
                    tracing::warn!(origin, relayed, error = %e, "Origin read failed mid-response");
                    break false;
                }
                Err(_) => {
                    tracing::warn!(origin, relayed, "Origin stalled mid-response");
                    break false;
                }
            };

            if n == 0 {
                if relayed == 0 {
                    return Err(ProxyError::OriginUnreachable {
                        origin: origin.to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "origin closed without responding",
                        ),
                    });
                }
                break framing.complete_at_eof(relayed);
            }

            let data = &chunk[..framing.admit(&chunk[..n], relayed)];

            client
                .write_all(data)
                .await
                .map_err(ProxyError::ClientDisconnected)?;
            copy.push(data);
            relayed += data.len() as u64;

            if framing.is_done(relayed) {
                break true;
            }
        };

        client.flush().await.map_err(ProxyError::ClientDisconnected)?;
        metrics::record_origin_fetch(relayed, start);

        Ok(FetchOutcome {
            bytes_relayed: relayed,
            head: framing.head(),
            complete,
            payload: copy.finish(),
        })
    }
}

/// Tracks the response head and, once known, where the response ends.
#[derive(Debug)]
enum Framing {
    /// Still collecting the head.
    Pending(Vec<u8>),
    /// Head too large or never terminated; relay until close.
    Opaque,
    /// Head parsed; `end` is set when it declared a body length.
    Known { head: ResponseHead, end: Option<u64> },
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Pending(Vec::new())
    }
}

impl Framing {
    /// Inspect `data` arriving at offset `relayed` and return how many of
    /// its bytes belong to the response.
    fn admit(&mut self, data: &[u8], relayed: u64) -> usize {
        if let Framing::Pending(probe) = self {
            probe.extend_from_slice(data);
            if let Some(head_len) = find_head_end(probe) {
                let head = parse_response_head(&probe[..head_len]);
                let end = head.content_length.map(|len| head_len as u64 + len);
                *self = Framing::Known { head, end };
            } else if probe.len() > MAX_HEAD_BYTES {
                *self = Framing::Opaque;
            }
        }

        match self {
            Framing::Known { end: Some(end), .. } => {
                let remaining = end.saturating_sub(relayed);
                data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            _ => data.len(),
        }
    }

    fn is_done(&self, relayed: u64) -> bool {
        matches!(self, Framing::Known { end: Some(end), .. } if relayed >= *end)
    }

    /// Whether a close after `relayed` bytes ends the response cleanly.
    fn complete_at_eof(&self, relayed: u64) -> bool {
        match self {
            Framing::Known { end: Some(end), .. } => relayed >= *end,
            Framing::Known { end: None, .. } => true,
            Framing::Pending(_) | Framing::Opaque => false,
        }
    }

    fn head(&self) -> Option<ResponseHead> {
        match self {
            Framing::Known { head, .. } => Some(*head),
            _ => None,
        }
    }
}

/// Cache copy of the relayed bytes, abandoned once it reaches the limit or
/// memory for it cannot be reserved.
#[derive(Debug)]
struct Accumulator {
    buf: Option<Vec<u8>>,
    limit: usize,
}

impl Accumulator {
    fn new(limit: usize) -> Self {
        Self {
            buf: Some(Vec::new()),
            limit,
        }
    }

    fn push(&mut self, data: &[u8]) {
        let Some(buf) = self.buf.as_mut() else {
            return;
        };
        if buf.len() + data.len() >= self.limit {
            tracing::debug!(limit = self.limit, "Response exceeds object limit; not caching");
            self.buf = None;
            return;
        }
        if buf.try_reserve(data.len()).is_err() {
            tracing::debug!(size = buf.len() + data.len(), "Could not reserve cache copy; not caching");
            self.buf = None;
            return;
        }
        buf.extend_from_slice(data);
    }

    fn finish(self) -> Option<Bytes> {
        self.buf.map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    fn fetcher(max_object_size: usize) -> OriginFetcher {
        OriginFetcher::new(
            Timeouts {
                connect: Duration::from_millis(200),
                read: Duration::from_millis(200),
                client_read: Duration::from_millis(200),
            },
            max_object_size,
        )
    }

    fn request() -> ForwardRequest {
        let target = RequestTarget::parse("http://origin.test/a").unwrap();
        ForwardRequest::build(&target, &[])
    }

    /// Spawn a scripted origin on one end of a duplex pipe.
    fn origin(script: Vec<Vec<u8>>, hold_open: bool) -> tokio::io::DuplexStream {
        let (proxy_side, mut origin_side) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut request = vec![0u8; 4096];
            let _ = origin_side.read(&mut request).await;
            for part in script {
                if origin_side.write_all(&part).await.is_err() {
                    return;
                }
            }
            if hold_open {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
        proxy_side
    }

    #[tokio::test]
    async fn relays_and_caches_complete_ok_response() {
        let response = b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let mut client = Vec::new();

        let outcome = fetcher(1024)
            .relay("origin.test:80", origin(vec![response.clone()], false), &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(client, response);
        assert_eq!(outcome.bytes_relayed, response.len() as u64);
        assert_eq!(outcome.status(), Some(200));
        assert!(outcome.complete);
        assert_eq!(outcome.into_cacheable().unwrap(), Bytes::from(response));
    }

    #[tokio::test]
    async fn binary_body_passes_through_intact() {
        let mut response = b"HTTP/1.0 200 OK\r\nContent-Length: 256\r\n\r\n".to_vec();
        response.extend((0..=255u8).collect::<Vec<_>>());
        let mut client = Vec::new();

        let outcome = fetcher(4096)
            .relay("o:80", origin(vec![response.clone()], false), &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(client, response);
        assert!(outcome.is_cacheable());
    }

    #[tokio::test]
    async fn content_length_ends_relay_while_origin_stays_open() {
        let head = b"HTTP/1.0 200 OK\r\nContent-Length: 4\r\n\r\n".to_vec();
        let mut client = Vec::new();

        let outcome = fetcher(1024)
            .relay("o:80", origin(vec![head.clone(), b"da".to_vec(), b"taEXTRA".to_vec()], true), &request(), &mut client)
            .await
            .unwrap();

        let mut expected = head;
        expected.extend_from_slice(b"data");
        assert_eq!(client, expected);
        assert!(outcome.complete);
    }

    #[tokio::test]
    async fn short_body_is_truncated_and_not_cached() {
        let mut client = Vec::new();
        let outcome = fetcher(1024)
            .relay("o:80", origin(vec![b"HTTP/1.0 200 OK\r\nContent-Length: 10\r\n\r\nabc".to_vec()], false), &request(), &mut client)
            .await
            .unwrap();

        assert!(!outcome.complete);
        assert!(outcome.into_cacheable().is_none());
    }

    #[tokio::test]
    async fn unframed_response_completes_at_close() {
        let response = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil close".to_vec();
        let mut client = Vec::new();
        let outcome = fetcher(1024)
            .relay("o:80", origin(vec![response.clone()], false), &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(client, response);
        assert!(outcome.is_cacheable());
    }

    #[tokio::test]
    async fn non_ok_status_is_relayed_but_not_cached() {
        let response = b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec();
        let mut client = Vec::new();
        let outcome = fetcher(1024)
            .relay("o:80", origin(vec![response.clone()], false), &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(client, response);
        assert!(outcome.complete);
        assert!(!outcome.is_cacheable());
    }

    #[tokio::test]
    async fn object_at_limit_is_relayed_but_not_cached() {
        let response = b"HTTP/1.0 200 OK\r\n\r\n0123456789".to_vec();
        let mut client = Vec::new();
        let outcome = fetcher(response.len())
            .relay("o:80", origin(vec![response.clone()], false), &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(client, response);
        assert!(outcome.complete);
        assert!(outcome.payload.is_none());

        let mut client = Vec::new();
        let outcome = fetcher(response.len() + 1)
            .relay("o:80", origin(vec![response.clone()], false), &request(), &mut client)
            .await
            .unwrap();
        assert!(outcome.is_cacheable());
    }

    #[tokio::test]
    async fn silent_close_is_unreachable() {
        let mut client = Vec::new();
        let err = fetcher(1024)
            .relay("o:80", origin(vec![], false), &request(), &mut client)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::OriginUnreachable { .. }));
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn silent_origin_times_out() {
        let mut client = Vec::new();
        let err = fetcher(1024)
            .relay("o:80", origin(vec![], true), &request(), &mut client)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::OriginTimeout { phase: "first read", .. }));
    }

    #[tokio::test]
    async fn stall_after_first_byte_ends_relay() {
        let mut client = Vec::new();
        let outcome = fetcher(1024)
            .relay("o:80", origin(vec![b"HTTP/1.0 200 OK\r\n".to_vec()], true), &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(client, b"HTTP/1.0 200 OK\r\n");
        assert!(!outcome.complete);
        assert!(outcome.head.is_none());
    }

    #[tokio::test]
    async fn origin_receives_rewritten_request() {
        let (proxy_side, mut origin_side) = duplex(4096);
        let seen = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let n = origin_side.read(&mut buf).await.unwrap();
            origin_side.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
            buf.truncate(n);
            buf
        });

        let mut client = Vec::new();
        fetcher(1024)
            .relay("o:80", proxy_side, &request(), &mut client)
            .await
            .unwrap();

        assert_eq!(seen.await.unwrap(), request().as_bytes());
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = RequestTarget::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let mut client = Vec::new();
        let err = fetcher(1024)
            .fetch(&target, &ForwardRequest::build(&target, &[]), &mut client)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::OriginUnreachable { .. }));
    }
}
