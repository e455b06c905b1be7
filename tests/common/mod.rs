//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use forward_proxy::cache::SharedCache;
use forward_proxy::config::ProxyConfig;
use forward_proxy::net::Listener;
use forward_proxy::proxy::Dispatcher;

/// Number of connections an origin accepted.
#[derive(Debug, Clone, Default)]
pub struct HitCounter(Arc<AtomicUsize>);

impl HitCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// A running origin server.
pub struct MockOrigin {
    pub addr: SocketAddr,
    pub hits: HitCounter,
    /// Connections whose reply write failed because the peer went away.
    pub aborted: HitCounter,
    /// Raw requests received, in arrival order.
    pub requests: Arc<tokio::sync::Mutex<Vec<Vec<u8>>>>,
}

impl MockOrigin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn last_request(&self) -> Option<String> {
        let requests = self.requests.lock().await;
        requests.last().map(|r| String::from_utf8_lossy(r).into_owned())
    }
}

/// Read until the blank line ending a request head.
async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return buf;
                }
            }
        }
    }
}

/// Start an origin whose reply is produced per connection by `f`, given
/// the 0-based connection index.
pub async fn start_programmable_origin<F, Fut>(f: F) -> MockOrigin
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = HitCounter::default();
    let aborted = HitCounter::default();
    let requests = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let f = Arc::new(f);

    {
        let hits = hits.clone();
        let aborted = aborted.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let index = hits.bump();
                let f = f.clone();
                let aborted = aborted.clone();
                let requests = requests.clone();
                tokio::spawn(async move {
                    let head = read_head(&mut socket).await;
                    requests.lock().await.push(head);
                    let reply = f(index).await;
                    if socket.write_all(&reply).await.is_err() {
                        aborted.bump();
                        return;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });
    }

    MockOrigin {
        addr,
        hits,
        aborted,
        requests,
    }
}

/// Start an origin that always returns `200 OK` with `body`.
pub async fn start_mock_origin(body: &'static str) -> MockOrigin {
    start_programmable_origin(move |_| async move { ok_response(body.as_bytes()) }).await
}

/// Start an origin that returns `body` after `delay`.
pub async fn start_slow_origin(body: &'static str, delay: Duration) -> MockOrigin {
    start_programmable_origin(move |_| async move {
        tokio::time::sleep(delay).await;
        ok_response(body.as_bytes())
    })
    .await
}

/// Start an origin that accepts and reads the request but never answers.
pub async fn start_silent_origin() -> MockOrigin {
    start_programmable_origin(|_| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Vec::new()
    })
    .await
}

/// Start an origin that writes `parts` with `gap` between them.
pub async fn start_streaming_origin(parts: Vec<Vec<u8>>, gap: Duration) -> MockOrigin {
    let parts = Arc::new(parts);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = HitCounter::default();
    let aborted = HitCounter::default();
    let requests = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    {
        let hits = hits.clone();
        let aborted = aborted.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                hits.bump();
                let parts = parts.clone();
                let aborted = aborted.clone();
                let requests = requests.clone();
                tokio::spawn(async move {
                    let head = read_head(&mut socket).await;
                    requests.lock().await.push(head);
                    for (i, part) in parts.iter().enumerate() {
                        if i > 0 {
                            tokio::time::sleep(gap).await;
                        }
                        if socket.write_all(part).await.is_err() {
                            aborted.bump();
                            return;
                        }
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });
    }

    MockOrigin {
        addr,
        hits,
        aborted,
        requests,
    }
}

/// `200 OK` response with an exact `Content-Length`.
pub fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut reply = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    reply.extend_from_slice(body);
    reply
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A proxy running in the background on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub cache: SharedCache,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<u64>,
}

impl TestProxy {
    pub async fn start(mut config: ProxyConfig) -> Self {
        config.listener.bind_address = "127.0.0.1".into();
        config.listener.port = 0;

        let listener = Listener::bind(&config.listener).await.unwrap();
        let cache = SharedCache::from_config(&config.cache);
        let dispatcher = Dispatcher::new(listener, &config, cache.clone());
        let addr = dispatcher.local_addr().unwrap();

        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.run(rx));
        Self {
            addr,
            cache,
            shutdown,
            handle,
        }
    }

    /// Send raw request bytes and read the reply until the proxy closes.
    pub async fn send(&self, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reply = Vec::new();
        let _ = stream.read_to_end(&mut reply).await;
        reply
    }

    /// `GET <url> HTTP/1.1` with the given extra header lines.
    pub async fn get(&self, url: &str, headers: &[&str]) -> Vec<u8> {
        let mut request = format!("GET {} HTTP/1.1\r\n", url);
        for header in headers {
            request.push_str(header);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        self.send(request.as_bytes()).await
    }

    /// Stop accepting and return the connections left after the grace period.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap()
    }
}

/// Default config with short deadlines for tests.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.timeouts.connect_secs = 1;
    config.timeouts.read_secs = 1;
    config.timeouts.client_read_secs = 1;
    config.lifecycle.shutdown_grace_secs = 1;
    config
}

/// Status line of a raw reply.
pub fn status_line(reply: &[u8]) -> String {
    let end = reply
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(reply.len());
    String::from_utf8_lossy(&reply[..end]).into_owned()
}
