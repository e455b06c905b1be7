//! Per-connection request handling.
//!
//! One worker call serves one client connection: read a single request,
//! answer it from the cache or the origin, then close. Every error that
//! still allows a reply is reported to the client with an error page.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::cache::SharedCache;
use crate::config::{LimitsConfig, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::http::{error_page, read_request_head, ForwardRequest};
use crate::origin::OriginFetcher;
use crate::resilience::{with_deadline, Timeouts};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Origin,
}

/// How a connection ended.
#[derive(Debug)]
pub enum Outcome {
    /// A response was relayed to the client.
    Served {
        source: Source,
        bytes: u64,
        /// The response reached its declared end.
        complete: bool,
        /// The response was stored in the cache.
        cached: bool,
    },
    /// An error page was sent instead of a response.
    ErrorResponse { status: u16, error: ProxyError },
    /// The client closed without sending a request.
    Closed,
}

impl Outcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Served { source: Source::Cache, .. } => "cache_hit",
            Outcome::Served { complete: false, .. } => "origin_incomplete",
            Outcome::Served { .. } => "origin",
            Outcome::ErrorResponse { error, .. } => error.label(),
            Outcome::Closed => "closed",
        }
    }
}

/// Serves proxied connections. Cheap to share across tasks.
#[derive(Debug, Clone)]
pub struct ConnectionWorker {
    cache: SharedCache,
    fetcher: OriginFetcher,
    limits: LimitsConfig,
    client_read: Duration,
    coalesce_wait: Option<Duration>,
}

impl ConnectionWorker {
    pub fn new(config: &ProxyConfig, cache: SharedCache) -> Self {
        let timeouts = Timeouts::from_config(&config.timeouts);
        let coalesce_wait = config
            .cache
            .coalesce
            .then(|| Duration::from_secs(config.cache.coalesce_wait_secs));
        Self {
            fetcher: OriginFetcher::new(timeouts, cache.max_object_size()),
            cache,
            limits: config.limits.clone(),
            client_read: timeouts.client_read,
            coalesce_wait,
        }
    }

    /// Override the configured deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.fetcher = OriginFetcher::new(timeouts, self.cache.max_object_size());
        self.client_read = timeouts.client_read;
        self
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Serve one client connection to completion.
    ///
    /// Returns `Err` only when the client can no longer be written to.
    pub async fn handle<S>(&self, stream: S) -> Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let outcome = match self.serve(&mut reader, &mut writer).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => match error_page(&error) {
                Some(page) => self.send_error(&mut writer, page, error).await,
                None => Err(error),
            },
        };

        if let Err(e) = writer.shutdown().await {
            tracing::trace!(error = %e, "Client shutdown failed");
        }
        outcome
    }

    async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<Outcome>
    where
        R: AsyncBufRead + AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let head = with_deadline(self.client_read, read_request_head(reader, &self.limits))
            .await
            .map_err(|_| ProxyError::RequestTimeout)??;
        let Some(head) = head else {
            return Ok(Outcome::Closed);
        };
        tracing::debug!(method = %head.method, target = %head.target, "Request received");

        let request = head.into_proxy_request()?;
        let key = request.target.cache_key();

        if let Some(payload) = self.cache.lookup(&key) {
            tracing::debug!(key = %key, "Cache hit");
            return write_cached(writer, payload).await;
        }
        tracing::debug!(key = %key, "Cache miss");

        // Held until the response is cached so queued requests find it.
        let _fetch_guard = match self.coalesce_wait {
            Some(wait) => match with_deadline(wait, self.cache.begin_fetch(&key)).await {
                Ok(guard) if guard.waited() => {
                    // Released before writing: a slow reader must not hold up the queue.
                    let hit = self.cache.lookup(&key);
                    drop(guard);
                    if let Some(payload) = hit {
                        tracing::debug!(key = %key, "Cache hit after coalesced fetch");
                        return write_cached(writer, payload).await;
                    }
                    None
                }
                Ok(guard) => Some(guard),
                Err(_) => {
                    tracing::debug!(key = %key, "Coalesce wait expired; fetching directly");
                    None
                }
            },
            None => None,
        };

        let forward = ForwardRequest::from_request(&request);
        let fetched = self.fetcher.fetch(&request.target, &forward, writer).await?;

        let bytes = fetched.bytes_relayed;
        let complete = fetched.complete;
        let status = fetched.status();
        let cached = match fetched.into_cacheable() {
            Some(payload) => self.cache.insert(key.clone(), payload).is_stored(),
            None => false,
        };

        tracing::info!(
            key = %key,
            status = ?status,
            bytes,
            complete,
            cached,
            "Origin fetch completed"
        );

        Ok(Outcome::Served {
            source: Source::Origin,
            bytes,
            complete,
            cached,
        })
    }

    async fn send_error<W>(&self, writer: &mut W, page: Bytes, error: ProxyError) -> Result<Outcome>
    where
        W: AsyncWrite + Unpin,
    {
        let status = error.status().map_or(500, |(code, _)| code);
        tracing::warn!(status, error = %error, "Sending error response");

        writer
            .write_all(&page)
            .await
            .map_err(ProxyError::ClientDisconnected)?;
        writer.flush().await.map_err(ProxyError::ClientDisconnected)?;
        Ok(Outcome::ErrorResponse { status, error })
    }
}

async fn write_cached<W>(writer: &mut W, payload: Bytes) -> Result<Outcome>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&payload)
        .await
        .map_err(ProxyError::ClientDisconnected)?;
    writer.flush().await.map_err(ProxyError::ClientDisconnected)?;
    Ok(Outcome::Served {
        source: Source::Cache,
        bytes: payload.len() as u64,
        complete: true,
        cached: true,
    })
}
