use std::fmt;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::PepTalkCodec;
use crate::error::PepTalkError;

/// Default control port of on-air graphics engines.
pub const DEFAULT_PORT: u16 = 6100;

/// What the reader task hands to the client for each inbound frame.
pub type Inbound = Result<Bytes, PepTalkError>;

// ── ConnectionConfig ─────────────────────────────────────────────

/// Where the engine lives and whether the link should be up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Gates automatic (re)connection.
    pub enabled: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            enabled: true,
        }
    }

    /// `true` when `other` points at a different engine.
    pub fn endpoint_differs(&self, other: &Self) -> bool {
        self.host != other.host || self.port != other.port
    }

    pub fn validate(&self) -> Result<(), PepTalkError> {
        if self.host.trim().is_empty() {
            return Err(PepTalkError::InvalidConfig("host is empty".into()));
        }
        if self.port == 0 {
            return Err(PepTalkError::InvalidConfig("port is 0".into()));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            enabled: true,
        }
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── ClientOptions ────────────────────────────────────────────────

/// Timing and buffering knobs for [`EngineClient`](crate::EngineClient).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Fixed delay before each automatic reconnect.
    pub reconnect_delay: Duration,
    /// Upper bound on the TCP connect.
    pub connect_timeout: Duration,
    /// How long `request` waits for `ok`/`error`.
    pub request_timeout: Duration,
    /// Capacity of the outbound line queue.
    pub write_queue: usize,
    /// Capacity of the protocol event broadcast.
    pub event_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            write_queue: 128,
            event_buffer: 256,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// One open TCP link: a writer task fed by a bounded queue and a reader
/// task that forwards decoded frames.
#[derive(Debug)]
pub struct Session {
    // Channel to send lines to the background writer task
    tx: mpsc::Sender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Wrap an established stream. Inbound frames (and a final error,
    /// if the link fails) arrive on the returned receiver; it closes
    /// when the engine hangs up.
    pub fn new(stream: TcpStream, write_queue: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let (mut net_writer, mut net_reader) = Framed::new(stream, PepTalkCodec::new()).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<String>(write_queue.max(1));

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(write_queue.max(1));
        let writer_err_tx = network_tx.clone();

        // Writer task: User -> Network
        let writer = tokio::spawn(async move {
            while let Some(line) = network_rx.recv().await {
                debug!(line = %line, "tx");
                if let Err(e) = net_writer.send(line).await {
                    warn!("network write error: {e}");
                    let _ = writer_err_tx.send(Err(e)).await;
                    return;
                }
            }
            // Queue dropped: flush and shut down our half.
            if let Err(e) = net_writer.close().await {
                debug!("close error: {e}");
            }
        });

        // Reader task: Network -> User
        let reader = tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                let failed = result.is_err();
                if network_tx.send(result).await.is_err() {
                    // user_rx was dropped, stop reading
                    return;
                }
                if failed {
                    return; // Stop on codec/network errors
                }
            }
            // The writer holds a sender clone; EOF has to arrive as an item.
            let closed = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by engine");
            let _ = network_tx.send(Err(closed.into())).await;
        });

        (
            Self {
                tx: user_tx,
                reader,
                writer,
            },
            user_rx,
        )
    }

    /// Open a TCP connection to `config`, bounded by `timeout`.
    pub async fn connect(
        config: &ConnectionConfig,
        timeout: Duration,
        write_queue: usize,
    ) -> Result<(Self, mpsc::Receiver<Inbound>), PepTalkError> {
        config.validate()?;
        let addr = config.to_string();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| PepTalkError::Timeout(timeout))??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, write_queue))
    }

    /// Queue a line without waiting.
    pub fn try_send(&self, line: String) -> Result<(), PepTalkError> {
        use mpsc::error::TrySendError;
        match self.tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(PepTalkError::NotConnected),
            Err(TrySendError::Full(_)) => Err(PepTalkError::Other("outbound queue full".into())),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Graceful close: drain queued lines, shut down the write half,
    /// stop reading.
    pub async fn close(self, grace: Duration) {
        let Self { tx, reader, writer } = self;
        drop(tx);
        let abort = writer.abort_handle();
        if tokio::time::timeout(grace, writer).await.is_err() {
            abort.abort();
        }
        reader.abort();
    }

    /// Tear down both tasks immediately; the socket is dropped.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}
