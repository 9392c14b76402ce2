//! Domain-specific error types for the PepTalk control link.
//!
//! All fallible operations return `Result<T, PepTalkError>`.
//! Nothing in this crate panics on bad wire input; malformed frames
//! surface as [`FrameError`] and are dropped by the caller.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the control link.
#[derive(Debug, Error)]
pub enum PepTalkError {
    // ── Framing Errors ───────────────────────────────────────────
    /// A single frame could not be tokenized.
    #[error("frame parse error: {0}")]
    Frame(#[from] FrameError),

    /// A line exceeded the codec limit without a terminator.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A command was issued while no session is open.
    #[error("not connected")]
    NotConnected,

    /// An mpsc or oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Command Errors ───────────────────────────────────────────
    /// The engine answered a request with `error`.
    #[error("command {request_id} failed: {message}")]
    CommandFailed { request_id: u64, message: String },

    /// The configuration is unusable (e.g. empty host).
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── FrameError ────────────────────────────────────────────────────

/// Why a single wire frame was rejected.
///
/// Scoped to one frame: the reader skips the frame and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// `{` without a matching `}`.
    #[error("unterminated literal at byte {offset}")]
    UnterminatedLiteral { offset: usize },

    /// The text between `{` and `}` is not a decimal length.
    #[error("invalid literal length {0:?}")]
    InvalidLiteralLength(String),

    /// The literal declares more bytes than the frame holds.
    #[error("literal declares {declared} bytes but only {available} remain")]
    TruncatedLiteral { declared: usize, available: usize },

    /// A frame needs at least a request id and a message type.
    #[error("expected at least 2 fields, got {0}")]
    MissingFields(usize),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for PepTalkError {
    fn from(s: String) -> Self {
        PepTalkError::Other(s)
    }
}

impl From<&str> for PepTalkError {
    fn from(s: &str) -> Self {
        PepTalkError::Other(s.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for PepTalkError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        PepTalkError::ChannelClosed
    }
}
