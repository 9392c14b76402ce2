pub mod connection;

pub use connection::{ClientOptions, ConnectionConfig, DEFAULT_PORT, Inbound, Session};
