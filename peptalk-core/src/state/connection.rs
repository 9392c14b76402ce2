//! Connection status state machine for the engine link.
//!
//! Provides a `ConnectionStatus` enum that models the lifecycle of one
//! control link, with validated transitions that return `Result`
//! instead of panicking.

use std::time::Instant;

use crate::error::PepTalkError;

// ── ConnectionStatus ─────────────────────────────────────────────

/// The current status of the control link.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲   ▲            │              │
///       │   │            ▼              ▼
///       │   └──────── Error ◄───────────┘
///       │               │ (timed reconnect)
///       └───────────────┴──────► Connecting
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No session. Initial state and the result of an explicit disconnect.
    #[default]
    Disconnected,

    /// TCP connection initiated but not yet established.
    Connecting,

    /// Socket open; commands can be written.
    Connected {
        /// When the link entered the `Connected` state.
        since: Instant,
    },

    /// The link failed or closed unexpectedly.
    Error {
        /// Human-readable cause.
        message: String,
    },
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConnectionStatus {
    /// Lowercase name as shown to collaborators.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// `true` while a session exists or is being set up.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected { .. })
    }

    /// The failure cause when in `Error`.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }

    /// How long the link has been in the `Connected` state.
    ///
    /// Returns `None` for any other status.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Error`.
    pub fn begin_connect(&mut self) -> Result<(), PepTalkError> {
        match self {
            Self::Disconnected | Self::Error { .. } => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(PepTalkError::Other(format!(
                "cannot connect: link is {self}"
            ))),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), PepTalkError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(PepTalkError::Other(format!(
                "cannot complete connect: link is {self}"
            ))),
        }
    }

    /// Record a failure. Valid from any status.
    pub fn fail(&mut self, message: impl Into<String>) {
        *self = Self::Error {
            message: message.into(),
        };
    }

    /// Force-reset to `Disconnected` regardless of current status.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
