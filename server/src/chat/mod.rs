//! Chat business logic.
//!
//! `ChatService` owns no state of its own: it validates the caller against the
//! durable `ThreadStore`, persists the change, and then hands the resulting
//! event to the `ConnectionRegistry`. Live push never affects the outcome of
//! an operation.

pub mod delivery;
pub mod handlers;
pub mod messages;
pub mod search;
pub mod store;
pub mod threads;
pub mod typing;

use std::sync::Arc;

use crate::auth::Caller;
use crate::config::ChatConfig;
use crate::db::models::Thread;
use crate::error::ChatError;
use crate::ws::{ChatEvent, ConnectionRegistry};

use self::delivery::DeliverySweeper;
use self::store::ThreadStore;

#[derive(Clone)]
pub struct ChatService {
    store: ThreadStore,
    registry: ConnectionRegistry,
    sweeper: DeliverySweeper,
    config: Arc<ChatConfig>,
}

impl ChatService {
    /// Build the service and start its delivery sweep dispatcher.
    /// Must be called from within a tokio runtime.
    pub fn new(store: ThreadStore, registry: ConnectionRegistry, config: Arc<ChatConfig>) -> Self {
        let sweeper = DeliverySweeper::spawn(
            store.clone(),
            registry.clone(),
            config.sweep_concurrency,
            config.sweep_queue_capacity,
        );
        Self {
            store,
            registry,
            sweeper,
            config,
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    /// Resolve a thread the caller participates in.
    async fn load_thread_for(&self, caller: &Caller, thread_id: &str) -> Result<Thread, ChatError> {
        let thread = self
            .store
            .get_thread(thread_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        if !thread.is_participant(&caller.user_id) {
            return Err(ChatError::Forbidden);
        }
        Ok(thread)
    }

    /// Push to both participants of a thread.
    fn push_to_thread(&self, thread: &Thread, event: &ChatEvent) {
        let reached = self.registry.broadcast_to_users(
            &[thread.participant_a.as_str(), thread.participant_b.as_str()],
            event,
        );
        tracing::debug!(thread_id = %thread.id, event = event.kind(), reached, "Pushed thread event");
    }
}

/// Trim and bound user-supplied message text.
pub(crate) fn validate_content(content: &str, max_len: usize) -> Result<String, ChatError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ChatError::invalid("Message content is required"));
    }
    if trimmed.chars().count() > max_len {
        return Err(ChatError::invalid(format!(
            "Message content exceeds {} characters",
            max_len
        )));
    }
    Ok(trimmed.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_is_trimmed_and_bounded() {
        assert_eq!(validate_content("  hi  ", 10).unwrap(), "hi");
        assert!(matches!(
            validate_content("   ", 10),
            Err(ChatError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_content("abcdef", 5),
            Err(ChatError::InvalidArgument(_))
        ));
        // Length counts characters, not bytes
        assert!(validate_content("ééééé", 5).is_ok());
    }
}
