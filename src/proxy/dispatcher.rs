//! Accept loop.
//!
//! Takes connections off the bounded listener and runs each in its own
//! task with its connection permit, tracker guard and tracing span. A
//! panicking worker is caught and logged; only its connection closes.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cache::SharedCache;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::proxy::worker::ConnectionWorker;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Runs the proxy on a bound listener until shutdown.
pub struct Dispatcher {
    listener: Listener,
    worker: Arc<ConnectionWorker>,
    tracker: ConnectionTracker,
    grace: Duration,
}

impl Dispatcher {
    pub fn new(listener: Listener, config: &ProxyConfig, cache: SharedCache) -> Self {
        Self::with_worker(listener, ConnectionWorker::new(config, cache), config)
    }

    pub fn with_worker(listener: Listener, worker: ConnectionWorker, config: &ProxyConfig) -> Self {
        Self {
            listener,
            worker: Arc::new(worker),
            tracker: ConnectionTracker::new(),
            grace: Duration::from_secs(config.lifecycle.shutdown_grace_secs),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn cache(&self) -> &SharedCache {
        self.worker.cache()
    }

    /// Accept and serve connections until `shutdown` fires, then wait for
    /// in-flight connections to drain.
    ///
    /// Returns the number of connections still live when the grace period
    /// ran out.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        tracing::info!(
            max_connections = self.listener.max_connections(),
            "Proxy accepting connections"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, grace_secs = self.grace.as_secs(), "Draining connections");
        }
        let remaining = self.tracker.wait_idle(self.grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Grace period expired with connections still open");
        } else {
            tracing::info!("All connections drained");
        }
        remaining
    }

    fn spawn(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let worker = Arc::clone(&self.worker);
        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                tracing::debug!("Connection accepted");

                match AssertUnwindSafe(worker.handle(stream)).catch_unwind().await {
                    Ok(Ok(outcome)) => {
                        metrics::record_request(outcome.label());
                        tracing::debug!(outcome = outcome.label(), "Connection finished");
                    }
                    Ok(Err(ProxyError::ClientDisconnected(e))) => {
                        metrics::record_request("client_disconnected");
                        tracing::debug!(error = %e, "Client went away");
                    }
                    Ok(Err(e)) => {
                        metrics::record_request(e.label());
                        tracing::error!(error = %e, "Connection failed");
                    }
                    Err(panic) => {
                        metrics::record_request("panic");
                        tracing::error!(panic = panic_message(&*panic), "Connection worker panicked");
                    }
                }
            }
            .instrument(span),
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
