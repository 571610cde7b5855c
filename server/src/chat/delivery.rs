//! Delivery state machine transitions.
//!
//! `sent -> delivered` happens in the background after a recipient fetches a
//! thread page. Jobs go through a bounded queue and a dispatcher that caps how
//! many sweeps touch the store at once. `delivered -> read` is an explicit,
//! synchronous action with no live push.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};

use crate::auth::Caller;
use crate::chat::store::ThreadStore;
use crate::chat::ChatService;
use crate::db::models::MessageStatus;
use crate::error::ChatError;
use crate::ws::{ChatEvent, ConnectionRegistry};

#[derive(Debug)]
struct SweepJob {
    thread_id: String,
    fetcher: String,
}

/// Handle for queueing delivery sweeps. Cloning is cheap.
#[derive(Clone)]
pub struct DeliverySweeper {
    tx: mpsc::Sender<SweepJob>,
}

impl DeliverySweeper {
    /// Start the dispatcher task. It runs until every sweeper handle is dropped.
    pub fn spawn(
        store: ThreadStore,
        registry: ConnectionRegistry,
        concurrency: usize,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        tokio::spawn(dispatch(rx, store, registry, permits));
        Self { tx }
    }

    /// Queue a sweep of `thread_id` on behalf of `fetcher`. Returns false if
    /// the queue is full; the next fetch of the thread queues it again.
    pub fn schedule(&self, thread_id: &str, fetcher: &str) -> bool {
        let job = SweepJob {
            thread_id: thread_id.to_string(),
            fetcher: fetcher.to_string(),
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!(thread_id = %job.thread_id, "Sweep queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<SweepJob>,
    store: ThreadStore,
    registry: ConnectionRegistry,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let store = store.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = sweep_thread(&store, &registry, &job.thread_id, &job.fetcher).await {
                tracing::warn!(thread_id = %job.thread_id, error = %e, "Delivery sweep failed");
            }
        });
    }
    tracing::debug!("Delivery sweep dispatcher stopped");
}

/// Mark everything `fetcher` has been sent in the thread as delivered and
/// tell each original sender. Only rows that actually moved are reported,
/// so repeated sweeps are silent.
pub async fn sweep_thread(
    store: &ThreadStore,
    registry: &ConnectionRegistry,
    thread_id: &str,
    fetcher: &str,
) -> Result<usize, ChatError> {
    let changed = store.mark_delivered(thread_id, fetcher, Utc::now()).await?;
    for (message_id, sender_id) in &changed {
        registry.broadcast_to_user(
            sender_id,
            &ChatEvent::MessageStatusUpdate {
                message_id: *message_id,
                status: MessageStatus::Delivered,
            },
        );
    }
    if !changed.is_empty() {
        tracing::debug!(thread_id = %thread_id, count = changed.len(), "Messages delivered");
    }
    Ok(changed.len())
}

impl ChatService {
    pub(crate) fn schedule_delivery_sweep(&self, thread_id: &str, fetcher: &str) {
        self.sweeper.schedule(thread_id, fetcher);
    }

    /// Mark every message the caller received in the thread as read.
    /// Returns how many messages changed.
    pub async fn mark_thread_read(&self, caller: &Caller, thread_id: &str) -> Result<usize, ChatError> {
        let thread = self.load_thread_for(caller, thread_id).await?;
        let updated = self
            .store
            .mark_read(&thread.id, &caller.user_id, Utc::now())
            .await?;
        tracing::debug!(thread_id = %thread.id, user_id = %caller.user_id, updated, "Thread marked read");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::{drain, service};
    use std::time::Duration;

    async fn wait_for_status(
        service: &ChatService,
        message_id: i64,
        status: MessageStatus,
    ) -> bool {
        for _ in 0..100 {
            let msg = service.store().get_message(message_id).await.unwrap().unwrap();
            if msg.status == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_sweep_notifies_sender_once() {
        let (service, registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, message, _) = service
            .start_thread(&alice, "bob", None, "hello")
            .await
            .unwrap();

        let (_handle, mut rx) = registry.register("alice");
        let swept = sweep_thread(service.store(), &registry, &thread.id, "bob").await.unwrap();
        assert_eq!(swept, 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "MESSAGE_STATUS_UPDATE");
        assert_eq!(events[0]["message_id"], message.id);
        assert_eq!(events[0]["status"], "delivered");

        // Idempotent: nothing left at `sent`, nothing pushed
        assert_eq!(
            sweep_thread(service.store(), &registry, &thread.id, "bob").await.unwrap(),
            0
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_recipient_fetch_then_read() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let bob = Caller::new("bob", "seeker");
        let (thread, message, created) = service
            .start_thread(&alice, "bob", None, "hello")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(message.status, MessageStatus::Sent);

        let page = service.fetch_messages(&bob, &thread.id, None, None).await.unwrap();
        assert_eq!(page.messages[0].id, message.id);
        assert!(wait_for_status(&service, message.id, MessageStatus::Delivered).await);

        assert_eq!(service.mark_thread_read(&bob, &thread.id).await.unwrap(), 1);
        let stored = service.store().get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
        assert!(stored.read_at.is_some());
        assert!(stored.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_sender_fetch_does_not_deliver() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, message, _) = service
            .start_thread(&alice, "bob", None, "hello")
            .await
            .unwrap();

        service.fetch_messages(&alice, &thread.id, None, None).await.unwrap();
        assert_eq!(
            sweep_thread(service.store(), &service.registry, &thread.id, "alice").await.unwrap(),
            0
        );
        let stored = service.store().get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_mark_read_requires_participant() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, _, _) = service
            .start_thread(&alice, "bob", None, "hello")
            .await
            .unwrap();

        let mallory = Caller::new("mallory", "seeker");
        assert!(matches!(
            service.mark_thread_read(&mallory, &thread.id).await,
            Err(ChatError::Forbidden)
        ));
        assert!(matches!(
            service.mark_thread_read(&alice, "missing").await,
            Err(ChatError::NotFound)
        ));
    }

    #[test]
    fn test_full_sweep_queue_drops_jobs() {
        // No dispatcher draining the queue
        let (tx, _rx) = mpsc::channel(1);
        let sweeper = DeliverySweeper { tx };
        assert!(sweeper.schedule("t1", "bob"));
        assert!(!sweeper.schedule("t2", "bob"));
    }
}
