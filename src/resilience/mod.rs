//! Resilience subsystem.
//!
//! Every external wait (client head, origin connect, origin read) runs
//! under a deadline from `timeouts.rs`.

pub mod timeouts;

pub use timeouts::{with_deadline, Elapsed, Timeouts};
