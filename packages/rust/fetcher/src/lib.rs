//! Rate-limited outbound access shared by every pipeline stage.
//!
//! - [`RateLimitedFetcher`] paces calls per target and classifies block signals
//! - [`guard`] refuses private and non-HTTP targets before any I/O

pub mod fetcher;
pub mod guard;

pub use fetcher::{FetchResult, RateLimitedFetcher, is_connection_refused};
pub use guard::{is_private_ip, is_ssrf_target, target_key};
