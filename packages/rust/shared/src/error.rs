//! Error types for the lead-generation pipeline.
//!
//! Library crates use [`LeadGenError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// Top-level error type for all lead-generation operations.
#[derive(Debug, thiserror::Error)]
pub enum LeadGenError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Bad submission input. Surfaced immediately; no job is created.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Outbound HTTP/SMTP call failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Map-search provider unreachable or blocked after the retry budget.
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// Destination unreachable or rejected the write.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Provider/destination payload could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Referenced job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadGenError>;

impl LeadGenError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// Classification of a failed outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Target signalled throttling or anti-automation (429, CAPTCHA, refused
    /// connection), or is still inside its cooldown window.
    Blocked,
    /// Call exceeded its timeout.
    Timeout,
    /// Non-success HTTP status other than a block signal.
    Status(u16),
    /// Transport-level failure (DNS, TLS, reset, body read).
    Network,
    /// URL/host refused before any I/O (bad scheme, private address).
    InvalidTarget,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Timeout => write!(f, "timeout"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Network => write!(f, "network"),
            Self::InvalidTarget => write!(f, "invalid target"),
        }
    }
}

/// Error raised by the rate-limited fetcher.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fetch {kind} for {target}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    /// Host (or provider name) the call was addressed to.
    pub target: String,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn blocked(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Blocked, target, message)
    }

    pub fn is_blocked(&self) -> bool {
        self.kind == FetchErrorKind::Blocked
    }
}
