pub mod connection;
pub mod on_air;
pub mod pending;

pub use connection::ConnectionStatus;
pub use on_air::{OnAirState, PlayingElement, feed_key};
pub use pending::{CommandReply, PendingRequests, ReplyResult, TrackedRequest};
