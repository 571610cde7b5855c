//! Connection registry: tracks all live sessions per user and fans events out
//! to them.
//!
//! A user can have several concurrent sessions (devices/tabs). Each session
//! owns a bounded outbound queue; the registry holds the only sender for it,
//! so removing a session from the registry closes its queue and lets the
//! session's write loop finish.
//!
//! Topology changes for a user happen under that user's DashMap shard write
//! lock. Broadcasts take the shard read lock only for the lookup and the
//! non-blocking `try_send`, never across socket I/O.

use axum::extract::ws::{Message, Utf8Bytes};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ws::events::ChatEvent;

pub type SessionId = u64;

/// Receiving half of a session's outbound queue, drained by its write loop.
pub type OutboundReceiver = mpsc::Receiver<Message>;

/// Identifies one registered session. Returned by `register`, consumed by
/// `unregister`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: String,
}

#[derive(Debug)]
struct SessionEntry {
    id: SessionId,
    tx: mpsc::Sender<Message>,
}

struct RegistryInner {
    sessions: DashMap<String, Vec<SessionEntry>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

/// Shared, explicitly constructed registry handle. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry whose sessions buffer at most
    /// `queue_capacity` pending events each.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Add a new session for `user_id` and return its handle together with
    /// the receiving end of its outbound queue.
    pub fn register(&self, user_id: &str) -> (SessionHandle, OutboundReceiver) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);

        let count = {
            let mut entry = self.inner.sessions.entry(user_id.to_string()).or_default();
            entry.push(SessionEntry { id, tx });
            entry.len()
        };

        tracing::debug!(
            user_id = %user_id,
            session_id = id,
            sessions = count,
            "Session registered"
        );

        (
            SessionHandle {
                id,
                user_id: user_id.to_string(),
            },
            rx,
        )
    }

    /// Remove exactly this session. Drops the user's entry when it was the
    /// last one. Returns false if the session was already gone.
    pub fn unregister(&self, handle: &SessionHandle) -> bool {
        let removed = match self.inner.sessions.get_mut(&handle.user_id) {
            Some(mut sessions) => {
                let before = sessions.len();
                sessions.retain(|s| s.id != handle.id);
                sessions.len() != before
            }
            None => false,
        };

        // Re-checked under the write lock so a concurrent register survives
        self.inner
            .sessions
            .remove_if(&handle.user_id, |_, sessions| sessions.is_empty());

        if removed {
            tracing::debug!(
                user_id = %handle.user_id,
                session_id = handle.id,
                "Session unregistered"
            );
        }
        removed
    }

    /// Push an event to every live session of `user_id`. Best-effort: a full
    /// queue drops the event for that session only. Returns how many
    /// sessions accepted it.
    pub fn broadcast_to_user(&self, user_id: &str, event: &ChatEvent) -> usize {
        match encode(event) {
            Some(frame) => self.send_frame(user_id, &frame, event.kind()),
            None => 0,
        }
    }

    /// Push one event to several users, serializing it once.
    pub fn broadcast_to_users(&self, user_ids: &[&str], event: &ChatEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        user_ids
            .iter()
            .map(|user_id| self.send_frame(user_id, &frame, event.kind()))
            .sum()
    }

    fn send_frame(&self, user_id: &str, frame: &Utf8Bytes, kind: &'static str) -> usize {
        let Some(sessions) = self.inner.sessions.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for session in sessions.iter() {
            match session.tx.try_send(Message::Text(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(
                        user_id = %user_id,
                        session_id = session.id,
                        event = kind,
                        "Outbound queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Writer already gone; its read loop will unregister it
                }
            }
        }
        delivered
    }

    /// Number of live sessions for a user.
    pub fn session_count(&self, user_id: &str) -> usize {
        self.inner
            .sessions
            .get(user_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.session_count(user_id) > 0
    }

    /// Number of users with at least one session.
    pub fn user_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Drop every session. Each write loop sees its queue close, sends a
    /// close frame and exits. Used on server shutdown.
    pub fn close_all(&self) {
        let users = self.inner.sessions.len();
        self.inner.sessions.clear();
        tracing::info!(users, "Closed all sessions");
    }
}

fn encode(event: &ChatEvent) -> Option<Utf8Bytes> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Utf8Bytes::from(json)),
        Err(e) => {
            tracing::error!(event = event.kind(), error = %e, "Failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing_event() -> ChatEvent {
        ChatEvent::TypingStatus {
            thread_id: "t-1".into(),
            user_id: "bob".into(),
            is_typing: true,
        }
    }

    fn text_of(msg: Message) -> String {
        match msg {
            Message::Text(text) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session_of_user() {
        let registry = ConnectionRegistry::new(8);
        let (_h1, mut rx1) = registry.register("alice");
        let (_h2, mut rx2) = registry.register("alice");
        let (_h3, mut rx3) = registry.register("bob");

        let delivered = registry.broadcast_to_user("alice", &typing_event());
        assert_eq!(delivered, 2);

        let first = text_of(rx1.recv().await.unwrap());
        let second = text_of(rx2.recv().await.unwrap());
        assert_eq!(first, second);
        assert!(first.contains("\"type\":\"TYPING_STATUS\""));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_for_that_session() {
        let registry = ConnectionRegistry::new(1);
        let (_saturated, mut rx_saturated) = registry.register("alice");
        let (_healthy, mut rx_healthy) = registry.register("alice");

        // Fill both, then drain only the healthy one
        assert_eq!(registry.broadcast_to_user("alice", &typing_event()), 2);
        rx_healthy.recv().await.unwrap();

        let delivered = registry.broadcast_to_user(
            "alice",
            &ChatEvent::MessageDeleted { message_id: 7 },
        );
        assert_eq!(delivered, 1);

        assert!(text_of(rx_healthy.recv().await.unwrap()).contains("MESSAGE_DELETED"));
        // Saturated session still holds only the first event
        assert!(text_of(rx_saturated.recv().await.unwrap()).contains("TYPING_STATUS"));
        assert!(rx_saturated.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_is_idempotent() {
        let registry = ConnectionRegistry::new(4);
        let (h1, mut rx1) = registry.register("alice");
        let (h2, _rx2) = registry.register("alice");

        assert!(registry.unregister(&h1));
        assert!(!registry.unregister(&h1));
        assert_eq!(registry.session_count("alice"), 1);
        // Registry held the only sender
        assert!(rx1.recv().await.is_none());

        assert!(registry.unregister(&h2));
        assert!(!registry.is_online("alice"));
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn test_broadcast_to_offline_user_is_silent() {
        let registry = ConnectionRegistry::new(4);
        assert_eq!(registry.broadcast_to_user("nobody", &typing_event()), 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_users_serializes_once_for_all() {
        let registry = ConnectionRegistry::new(4);
        let (_a, mut rx_a) = registry.register("alice");
        let (_b, mut rx_b) = registry.register("bob");

        let delivered = registry.broadcast_to_users(
            &["alice", "bob", "carol"],
            &ChatEvent::MessageDeleted { message_id: 1 },
        );
        assert_eq!(delivered, 2);
        assert_eq!(
            text_of(rx_a.recv().await.unwrap()),
            text_of(rx_b.recv().await.unwrap())
        );
    }

    #[tokio::test]
    async fn test_close_all_ends_every_queue() {
        let registry = ConnectionRegistry::new(4);
        let (_a, mut rx_a) = registry.register("alice");
        let (_b, mut rx_b) = registry.register("bob");

        registry.close_all();
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        assert_eq!(registry.user_count(), 0);
    }
}
