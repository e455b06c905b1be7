//! Timeout enforcement.
//!
//! # Responsibilities
//! - Turn the configured timeout seconds into durations
//! - Wrap client and origin I/O with a deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; a timed-out future is dropped
//! - Timeout errors are distinct from I/O errors so callers can map them
//!   to 408 or 504

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;

/// Deadlines applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Establishing the origin TCP connection.
    pub connect: Duration,
    /// Waiting for each read from the origin.
    pub read: Duration,
    /// Receiving the complete request head from the client.
    pub client_read: Duration,
}

impl Timeouts {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            read: Duration::from_secs(config.read_secs),
            client_read: Duration::from_secs(config.client_read_secs),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

/// The deadline passed before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// Run `fut` with a deadline.
pub async fn with_deadline<F: Future>(limit: Duration, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(limit, fut).await.map_err(|_| Elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_config() {
        let timeouts = Timeouts::from_config(&TimeoutConfig {
            connect_secs: 1,
            read_secs: 2,
            client_read_secs: 3,
        });
        assert_eq!(timeouts.connect, Duration::from_secs(1));
        assert_eq!(timeouts.read, Duration::from_secs(2));
        assert_eq!(timeouts.client_read, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn deadline_expires() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert_eq!(with_deadline(Duration::from_millis(10), slow).await, Err(Elapsed));
        assert_eq!(with_deadline(Duration::from_secs(1), async { 7 }).await, Ok(7));
    }
}
