//! Proxy core: the accept loop and the per-connection worker.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → dispatcher.rs (permit, tracker guard, span, panic containment)
//!     → worker.rs (request head → cache lookup → origin fetch → cache insert)
//! ```

pub mod dispatcher;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use worker::{ConnectionWorker, Outcome, Source};
