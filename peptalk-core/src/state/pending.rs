//! Correlation of command ids with their `ok` / `error` replies.
//!
//! The id handed out by the client is the key. Timeouts are enforced by
//! the waiting caller, which cancels its entry when it gives up.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::PepTalkError;

/// Successful reply to a correlated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub request_id: u64,
    /// Fields following `ok`.
    pub values: Vec<String>,
}

pub type ReplyResult = Result<CommandReply, PepTalkError>;

// ── TrackedRequest ────────────────────────────────────────────────

/// A pending request waiting for its reply.
#[derive(Debug)]
pub struct TrackedRequest {
    /// Command body as written (without the id).
    pub body: String,
    /// When the request was submitted.
    pub sent_at: Instant,
    responder: oneshot::Sender<ReplyResult>,
}

impl TrackedRequest {
    /// How long this request has been in-flight.
    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

// ── PendingRequests ──────────────────────────────────────────────

/// Outstanding requests keyed by request id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    requests: Mutex<HashMap<u64, TrackedRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TrackedRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `request_id` and return the receiver its reply lands on.
    pub fn track(
        &self,
        request_id: u64,
        body: impl Into<String>,
    ) -> oneshot::Receiver<ReplyResult> {
        let (responder, rx) = oneshot::channel();
        self.lock().insert(
            request_id,
            TrackedRequest {
                body: body.into(),
                sent_at: Instant::now(),
                responder,
            },
        );
        rx
    }

    /// Complete a request with `ok`. Returns `false` when nobody waits
    /// for `request_id`.
    pub fn resolve(&self, request_id: u64, values: Vec<String>) -> bool {
        self.complete(
            request_id,
            Ok(CommandReply {
                request_id,
                values,
            }),
        )
    }

    /// Complete a request with the engine's `error` text.
    pub fn reject(&self, request_id: u64, message: impl Into<String>) -> bool {
        self.complete(
            request_id,
            Err(PepTalkError::CommandFailed {
                request_id,
                message: message.into(),
            }),
        )
    }

    fn complete(&self, request_id: u64, result: ReplyResult) -> bool {
        match self.lock().remove(&request_id) {
            Some(req) => {
                debug!(
                    request_id,
                    elapsed_ms = req.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "request completed"
                );
                // The caller may have given up already.
                let _ = req.responder.send(result);
                true
            }
            None => false,
        }
    }

    /// Forget a request without answering it.
    pub fn cancel(&self, request_id: u64) -> Option<TrackedRequest> {
        self.lock().remove(&request_id)
    }

    /// Fail every outstanding request with `NotConnected`.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<TrackedRequest> = self.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for req in drained {
            let _ = req.responder.send(Err(PepTalkError::NotConnected));
        }
        count
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Check if a specific request is pending.
    pub fn is_pending(&self, request_id: u64) -> bool {
        self.lock().contains_key(&request_id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn track_and_resolve() {
        let pending = PendingRequests::new();
        let rx = pending.track(42, "get /storage");
        assert_eq!(pending.pending_count(), 1);
        assert!(pending.is_pending(42));

        assert!(pending.resolve(42, vec!["a".into()]));
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.request_id, 42);
        assert_eq!(reply.values, vec!["a".to_string()]);
        assert_eq!(pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn reject_carries_message() {
        let pending = PendingRequests::new();
        let rx = pending.track(3, "set /x y z");
        assert!(pending.reject(3, "no such node"));
        match rx.await.unwrap() {
            Err(PepTalkError::CommandFailed {
                request_id,
                message,
            }) => {
                assert_eq!(request_id, 3);
                assert_eq!(message, "no such node");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resolve_missing_returns_false() {
        let pending = PendingRequests::new();
        assert!(!pending.resolve(999, Vec::new()));
    }

    #[tokio::test]
    async fn fail_all_answers_everyone() {
        let pending = PendingRequests::new();
        let a = pending.track(1, "a");
        let b = pending.track(2, "b");
        assert_eq!(pending.fail_all(), 2);
        assert!(matches!(a.await.unwrap(), Err(PepTalkError::NotConnected)));
        assert!(matches!(b.await.unwrap(), Err(PepTalkError::NotConnected)));
    }

    #[test]
    fn cancel_returns_tracked_request() {
        let pending = PendingRequests::new();
        let _rx = pending.track(10, "get /");
        let req = pending.cancel(10).unwrap();
        assert_eq!(req.body, "get /");
        assert!(req.elapsed() < Duration::from_secs(1));
    }
}
