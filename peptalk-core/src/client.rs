//! Connection manager for one graphics engine.
//!
//! `EngineClient` owns the socket lifecycle: connect, handshake, command
//! dispatch with correlation ids, failure handling and the fixed-delay
//! reconnect timer. Inbound frames flow through the tokenizer and the
//! interpreter into the shared [`OnAirState`]; callers query that state
//! from any task.
//!
//! Each session is tagged with a generation number. An explicit
//! disconnect or a new connect bumps it, so late events from a torn-down
//! session are ignored instead of clobbering the current one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PepTalkError;
use crate::event::{ProtocolEvent, interpret};
use crate::frame::parse_message;
use crate::network::{ClientOptions, ConnectionConfig, Inbound, Session};
use crate::state::{CommandReply, ConnectionStatus, OnAirState, PendingRequests, ReplyResult};

/// First command of every session.
pub const HANDSHAKE_COMMAND: &str = "protocol peptalk";

/// Sent once the handshake is acknowledged, to learn what is on air.
pub const STATE_QUERY_COMMAND: &str = "get /storage/shows 2";

/// How long an explicit disconnect waits for queued lines to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Internal bookkeeping ─────────────────────────────────────────

struct ActiveSession {
    generation: u64,
    session: Session,
    dispatch: JoinHandle<()>,
}

struct ReconnectTimer {
    token: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    config: Mutex<ConnectionConfig>,
    options: ClientOptions,
    status: watch::Sender<ConnectionStatus>,
    last_error: Mutex<Option<String>>,
    on_air: Arc<OnAirState>,
    pending: PendingRequests,
    events: broadcast::Sender<ProtocolEvent>,
    next_id: AtomicU64,
    generation: AtomicU64,
    handshake_done: AtomicBool,
    session: Mutex<Option<ActiveSession>>,
    reconnect: Mutex<Option<ReconnectTimer>>,
    reconnect_token: AtomicU64,
}

// ── EngineClient ─────────────────────────────────────────────────

/// Handle to one engine control link. Cheap to clone; all clones share
/// the same socket, id counter and on-air state.
#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("config", &*lock(&self.inner.config))
            .field("status", &*self.inner.status.borrow())
            .field("on_air", &self.inner.on_air.len())
            .finish()
    }
}

impl EngineClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(config: ConnectionConfig, options: ClientOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                options,
                status,
                last_error: Mutex::new(None),
                on_air: Arc::new(OnAirState::new()),
                pending: PendingRequests::new(),
                events,
                next_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                handshake_done: AtomicBool::new(false),
                session: Mutex::new(None),
                reconnect: Mutex::new(None),
                reconnect_token: AtomicU64::new(0),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open a fresh session and send the handshake.
    ///
    /// Any previous session is closed first and the on-air state starts
    /// empty. On failure the link moves to `Error` and, when enabled, a
    /// reconnect is scheduled.
    pub async fn connect(&self) -> Result<(), PepTalkError> {
        let inner = &self.inner;
        inner.cancel_reconnect();

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = lock(&inner.session).take();
        if let Some(old) = previous {
            old.dispatch.abort();
            old.session.close(CLOSE_GRACE).await;
        }

        inner.reset_session_state();
        inner.status.send_modify(|s| {
            if s.is_active() {
                s.force_disconnect();
            }
            let _ = s.begin_connect();
        });

        let config = inner.config();
        info!(engine = %config, generation, "connecting");

        let opened = Session::connect(
            &config,
            inner.options.connect_timeout,
            inner.options.write_queue,
        )
        .await;

        let (session, inbound) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                inner.handle_failure(generation, format!("connect to {config} failed: {e}"));
                return Err(e);
            }
        };

        {
            let mut slot = lock(&inner.session);
            if inner.generation.load(Ordering::SeqCst) != generation {
                // Superseded by a disconnect or another connect meanwhile.
                session.abort();
                debug!(generation, "dropping superseded session");
                return Err(PepTalkError::NotConnected);
            }
            let dispatch = tokio::spawn(dispatch_loop(Arc::clone(inner), generation, inbound));
            *slot = Some(ActiveSession {
                generation,
                session,
                dispatch,
            });
            *lock(&inner.last_error) = None;
            inner.status.send_modify(|s| {
                let _ = s.complete_connect();
            });
        }
        info!(engine = %config, "connected");

        inner.send(HANDSHAKE_COMMAND, false).map(|_| ())
    }

    /// Close the link on purpose. Cancels any pending reconnect; no
    /// automatic reconnect follows.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.cancel_reconnect();
        inner.generation.fetch_add(1, Ordering::SeqCst);

        let active = lock(&inner.session).take();
        if let Some(active) = active {
            active.dispatch.abort();
            active.session.close(CLOSE_GRACE).await;
        }

        inner.reset_session_state();
        inner.status.send_modify(ConnectionStatus::force_disconnect);
        info!("disconnected");
    }

    /// Replace the configuration.
    ///
    /// A new host or port while connected or connecting forces a
    /// disconnect and reconnect. Disabling disconnects; enabling an idle
    /// client connects.
    pub async fn reconfigure(&self, config: ConnectionConfig) -> Result<(), PepTalkError> {
        let previous = std::mem::replace(&mut *lock(&self.inner.config), config.clone());
        let status = self.status();
        let moved = previous.endpoint_differs(&config);

        if !config.enabled {
            if !status.is_disconnected() {
                self.disconnect().await;
            }
            return Ok(());
        }

        if moved && status.is_active() {
            info!(from = %previous, to = %config, "engine endpoint changed");
            self.disconnect().await;
            return self.connect().await;
        }

        let idle = matches!(
            status,
            ConnectionStatus::Disconnected | ConnectionStatus::Error { .. }
        );
        let retrying = matches!(status, ConnectionStatus::Error { .. }) && moved;
        if idle && (!previous.enabled || retrying) {
            return self.connect().await;
        }
        Ok(())
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Write `"<id> <body>"` and return the id.
    ///
    /// Never blocks. Without an open session nothing is written and
    /// `Err(NotConnected)` comes back.
    pub fn send_command(&self, body: &str) -> Result<u64, PepTalkError> {
        self.inner.send(body, false).map(|(id, _)| id)
    }

    /// Send a command and wait for the engine's `ok` or `error`.
    pub async fn request(&self, body: &str) -> Result<CommandReply, PepTalkError> {
        let (id, rx) = self.inner.send(body, true)?;
        let Some(rx) = rx else {
            return Err(PepTalkError::Other("request was not tracked".into()));
        };

        let timeout = self.inner.options.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(reply) => reply?,
            Err(_) => {
                self.inner.pending.cancel(id);
                Err(PepTalkError::Timeout(timeout))
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Receiver for every interpreted inbound event.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.inner.events.subscribe()
    }

    /// Cause of the most recent failure, cleared on a successful connect.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    pub fn config(&self) -> ConnectionConfig {
        self.inner.config()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Shared on-air state, for callers that want more than the
    /// convenience queries below.
    pub fn on_air(&self) -> Arc<OnAirState> {
        Arc::clone(&self.inner.on_air)
    }

    pub fn is_element_playing(&self, element_id: &str) -> bool {
        self.inner.on_air.is_playing(element_id)
    }

    pub fn get_playing_element_id(&self, show_name: &str, playlist_name: Option<&str>) -> Option<String> {
        self.inner.on_air.find_element_id(show_name, playlist_name)
    }

    pub fn get_all_playing_element_ids(&self) -> HashSet<String> {
        self.inner.on_air.all_playing_element_ids()
    }

    /// `true` while a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.reconnect).is_some()
    }

    /// Number of `request` calls still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.pending_count()
    }
}

// ── Inner ────────────────────────────────────────────────────────

impl Inner {
    fn config(&self) -> ConnectionConfig {
        lock(&self.config).clone()
    }

    fn reset_session_state(&self) {
        self.on_air.reset();
        self.handshake_done.store(false, Ordering::SeqCst);
        let failed = self.pending.fail_all();
        if failed > 0 {
            debug!(failed, "abandoned pending requests");
        }
    }

    /// Allocate an id and queue the line. The session lock is held
    /// across both steps so lines hit the socket in id order.
    fn send(
        &self,
        body: &str,
        track: bool,
    ) -> Result<(u64, Option<oneshot::Receiver<ReplyResult>>), PepTalkError> {
        let slot = lock(&self.session);
        let Some(active) = slot.as_ref() else {
            return Err(PepTalkError::NotConnected);
        };
        if !active.session.is_open() {
            return Err(PepTalkError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = track.then(|| self.pending.track(id, body));
        if let Err(e) = active.session.try_send(format!("{id} {body}")) {
            if track {
                self.pending.cancel(id);
            }
            warn!(id, "command not written: {e}");
            return Err(e);
        }
        debug!(id, body, "command queued");
        Ok((id, rx))
    }

    fn handle_frame(&self, generation: u64, frame: &[u8]) {
        let msg = match parse_message(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(frame = %String::from_utf8_lossy(frame), "dropping frame: {e}");
                return;
            }
        };
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let event = interpret(&msg);
        debug!(event = event.name(), request_id = %msg.request_id, "rx");

        match &event {
            ProtocolEvent::ProtocolAck { capabilities } => {
                if !self.handshake_done.swap(true, Ordering::SeqCst) {
                    info!(capabilities = %capabilities.join(" "), "handshake complete");
                    if let Err(e) = self.send(STATE_QUERY_COMMAND, false) {
                        warn!("state query not sent: {e}");
                    }
                }
            }
            ProtocolEvent::CommandAck { request_id, extra } => {
                if let Ok(id) = request_id.parse() {
                    self.pending.resolve(id, extra.clone());
                }
            }
            ProtocolEvent::CommandError {
                request_id,
                message,
            } => {
                warn!(request_id = %request_id, "engine error: {message}");
                if let Ok(id) = request_id.parse() {
                    self.pending.reject(id, message.clone());
                }
            }
            ProtocolEvent::Unrecognized => {}
            _ => {
                if self.on_air.apply(&event) {
                    debug!(on_air = self.on_air.len(), "{event}");
                }
            }
        }

        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Socket error or unexpected close on session `generation`.
    fn handle_failure(self: &Arc<Self>, generation: u64, cause: String) {
        let active = {
            let mut slot = lock(&self.session);
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if slot.as_ref().is_some_and(|a| a.generation != generation) {
                return;
            }
            let active = slot.take();
            self.status.send_modify(|s| s.fail(cause.clone()));
            active
        };
        if let Some(active) = active {
            active.session.abort();
        }

        warn!(generation, "link down: {cause}");
        *lock(&self.last_error) = Some(cause);
        self.reset_session_state();

        if self.config().enabled {
            self.schedule_reconnect();
        }
    }

    /// Arm the single-shot reconnect timer, replacing any armed one.
    fn schedule_reconnect(self: &Arc<Self>) {
        let token = self.reconnect_token.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.options.reconnect_delay;
        let inner = Arc::clone(self);

        let mut slot = lock(&self.reconnect);
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = lock(&inner.reconnect);
                if slot.as_ref().map(|t| t.token) != Some(token) {
                    return;
                }
                *slot = None;
            }
            if !inner.config().enabled {
                return;
            }
            info!(?delay, "reconnecting");
            // Failures re-arm the timer inside connect.
            let _ = EngineClient { inner }.connect().await;
        });

        *slot = Some(ReconnectTimer { token, handle });
        info!(?delay, "reconnect scheduled");
    }

    fn cancel_reconnect(&self) {
        if let Some(timer) = lock(&self.reconnect).take() {
            timer.handle.abort();
            debug!("reconnect cancelled");
        }
    }
}

/// Pump frames from the reader task until the session ends.
async fn dispatch_loop(inner: Arc<Inner>, generation: u64, mut inbound: mpsc::Receiver<Inbound>) {
    while let Some(item) = inbound.recv().await {
        match item {
            Ok(frame) => inner.handle_frame(generation, &frame),
            Err(e) => {
                inner.handle_failure(generation, e.to_string());
                return;
            }
        }
    }
    inner.handle_failure(generation, "connection closed by engine".into());
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> EngineClient {
        EngineClient::new(ConnectionConfig::new("127.0.0.1", 1))
    }

    #[test]
    fn starts_disconnected_and_empty() {
        let c = client();
        assert!(c.status().is_disconnected());
        assert!(c.last_error().is_none());
        assert!(c.get_all_playing_element_ids().is_empty());
        assert!(!c.reconnect_pending());
    }

    #[test]
    fn send_without_session_is_rejected() {
        let c = client();
        assert!(matches!(c.send_command("get /"), Err(PepTalkError::NotConnected)));
        // Rejected sends do not burn ids.
        assert_eq!(c.inner.next_id.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_without_session_is_rejected() {
        let c = client();
        assert!(matches!(c.request("get /").await, Err(PepTalkError::NotConnected)));
        assert_eq!(c.pending_requests(), 0);
    }

    #[test]
    fn frames_feed_the_on_air_state() {
        let c = client();
        let generation = c.inner.generation.load(Ordering::SeqCst);
        c.inner.handle_frame(
            generation,
            b"* set /storage/shows/NewsAM/playlists/Main/elements/E1 carousel_status run",
        );
        c.inner.handle_frame(generation, b"* set /carousel1 active_feedA E7");
        c.inner.handle_frame(generation, b"* set {5}ab");
        assert!(c.is_element_playing("E1"));
        assert!(c.is_element_playing("E7"));
        assert_eq!(c.get_playing_element_id("NewsAM", Some("Main")), Some("E1".into()));

        c.inner.handle_frame(generation, b"* changed E7 carousel_status");
        assert!(!c.is_element_playing("E7"));
        assert_eq!(c.get_all_playing_element_ids(), HashSet::from(["E1".to_string()]));
    }

    #[test]
    fn stale_generation_is_ignored() {
        let c = client();
        c.inner.handle_frame(99, b"* set /a/elements/E1 carousel_status run");
        assert!(!c.is_element_playing("E1"));
    }

    #[test]
    fn events_are_broadcast() {
        let c = client();
        let mut rx = c.subscribe();
        c.inner.handle_frame(0, b"* insert /storage/x {4}<a/>");
        c.inner.handle_frame(0, b"* unknown thing");
        assert_eq!(
            rx.try_recv().unwrap(),
            ProtocolEvent::Insert {
                path: "/storage/x".into(),
                payload: "<a/>".into()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), ProtocolEvent::Unrecognized);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_harmless() {
        let c = client();
        c.disconnect().await;
        assert!(c.status().is_disconnected());
        assert!(!c.reconnect_pending());
    }

    #[tokio::test]
    async fn failed_connect_sets_error_and_schedules_retry() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let c = EngineClient::new(ConnectionConfig::new("127.0.0.1", port));
        assert!(c.connect().await.is_err());
        assert_eq!(c.status().as_str(), "error");
        assert!(c.last_error().is_some());
        assert!(c.reconnect_pending());

        c.disconnect().await;
        assert!(!c.reconnect_pending());
        assert!(c.status().is_disconnected());
    }

    #[tokio::test]
    async fn disabled_client_does_not_schedule_retry() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut cfg = ConnectionConfig::new("127.0.0.1", port);
        cfg.enabled = false;
        let c = EngineClient::new(cfg);
        assert!(c.connect().await.is_err());
        assert!(!c.reconnect_pending());
    }
}
