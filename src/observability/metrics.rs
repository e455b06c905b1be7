//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): finished connections by outcome
//! - `proxy_cache_lookups_total` (counter): cache lookups by result
//! - `proxy_cache_evictions_total` (counter): LRU evictions
//! - `proxy_cache_bytes` / `proxy_cache_entries` (gauge): cache occupancy
//! - `proxy_origin_bytes_total` (counter): bytes relayed from origins
//! - `proxy_origin_fetch_duration_seconds` (histogram): origin fetch latency
//! - `proxy_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is only installed when enabled in config

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished connection.
pub fn record_request(outcome: &'static str) {
    counter!("proxy_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_evictions(count: usize) {
    if count > 0 {
        counter!("proxy_cache_evictions_total").increment(count as u64);
    }
}

pub fn record_cache_size(entries: usize, bytes: usize) {
    gauge!("proxy_cache_entries").set(entries as f64);
    gauge!("proxy_cache_bytes").set(bytes as f64);
}

/// Record a completed origin fetch.
pub fn record_origin_fetch(bytes: u64, start: Instant) {
    counter!("proxy_origin_bytes_total").increment(bytes);
    histogram!("proxy_origin_fetch_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_active_connections(count: u64) {
    gauge!("proxy_active_connections").set(count as f64);
}
