//! Origin side of the proxy: connect, forward, relay.

pub mod fetcher;

pub use fetcher::{FetchOutcome, OriginFetcher};
