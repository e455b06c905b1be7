//! HTTP/1.x handling for the forward proxy.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → request.rs (read head, validate method/version)
//!     → target.rs  (absolute URI → host, port, path, cache key)
//!     → rewrite.rs (origin request with rewritten headers)
//!     → [origin fetcher relays the reply]
//!     → response.rs (head inspection, error replies)
//! ```

pub mod request;
pub mod response;
pub mod rewrite;
pub mod target;

pub use request::{read_request_head, HeaderLine, ProxyRequest, RequestHead};
pub use response::{error_page, error_response, find_head_end, parse_response_head, ResponseHead};
pub use rewrite::{ForwardRequest, USER_AGENT};
pub use target::RequestTarget;
