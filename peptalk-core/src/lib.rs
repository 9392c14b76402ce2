//! # peptalk-core
//!
//! Control-link client for on-air graphics engines speaking the
//! line-oriented PepTalk protocol.
//!
//! This crate contains:
//! - **Frame**: `tokenize` / `parse_message` for bare tokens and `{N}` literals
//! - **Event**: `interpret` turning messages into typed `ProtocolEvent`s
//! - **State**: `OnAirState` tracker, `ConnectionStatus`, `PendingRequests`
//! - **Codec**: `PepTalkCodec` for line-framed TCP I/O via `tokio_util`
//! - **Network**: `Session` reader/writer tasks and `ConnectionConfig`
//! - **Client**: `EngineClient`, handshake, command ids and auto-reconnect
//! - **Error**: `PepTalkError`: typed, `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod error;
pub mod event;
pub mod frame;
pub mod network;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{EngineClient, HANDSHAKE_COMMAND, STATE_QUERY_COMMAND};
pub use codec::{MAX_FRAME_SIZE, PepTalkCodec};
pub use error::{FrameError, PepTalkError};
pub use event::{ElementPath, ProtocolEvent, interpret};
pub use frame::{Field, Message, encode_field, parse_message, tokenize};
pub use network::{ClientOptions, ConnectionConfig, DEFAULT_PORT, Session};
pub use state::{
    CommandReply, ConnectionStatus, OnAirState, PendingRequests, PlayingElement, feed_key,
};
