//! Thread lookup and idempotent creation.

use chrono::Utc;

use crate::auth::Caller;
use crate::chat::{validate_content, ChatService};
use crate::db::models::{Message, Thread, ThreadSummary};
use crate::error::ChatError;
use crate::ws::ChatEvent;

/// Empty property references mean "no property".
fn normalize_property_ref(property_ref: Option<&str>) -> Option<&str> {
    property_ref.map(str::trim).filter(|p| !p.is_empty())
}

fn validate_target<'a>(caller: &Caller, target_id: &'a str) -> Result<&'a str, ChatError> {
    let target_id = target_id.trim();
    if target_id.is_empty() {
        return Err(ChatError::invalid("Target user is required"));
    }
    if target_id == caller.user_id {
        return Err(ChatError::invalid("Cannot start a thread with yourself"));
    }
    Ok(target_id)
}

impl ChatService {
    /// The caller's threads, most recently active first, with unread counts.
    pub async fn list_threads(&self, caller: &Caller) -> Result<Vec<ThreadSummary>, ChatError> {
        self.store.list_threads(&caller.user_id).await
    }

    /// Resolve the thread between the caller and `target_id` for the given
    /// scope, creating it if needed. Pair order does not matter.
    pub async fn find_or_create_thread(
        &self,
        caller: &Caller,
        target_id: &str,
        property_ref: Option<&str>,
    ) -> Result<(Thread, bool), ChatError> {
        let target_id = validate_target(caller, target_id)?;
        self.store
            .find_or_create_thread(
                &caller.user_id,
                target_id,
                normalize_property_ref(property_ref),
                Utc::now(),
            )
            .await
    }

    /// Create or continue a thread with its next message. Both participants
    /// receive `NEW_MESSAGE`.
    pub async fn start_thread(
        &self,
        caller: &Caller,
        target_id: &str,
        property_ref: Option<&str>,
        content: &str,
    ) -> Result<(Thread, Message, bool), ChatError> {
        let target_id = validate_target(caller, target_id)?;
        let content = validate_content(content, self.config.max_content_length)?;

        let (thread, message, created) = self
            .store
            .start_thread(
                &caller.user_id,
                target_id,
                normalize_property_ref(property_ref),
                &content,
                Utc::now(),
            )
            .await?;

        tracing::info!(
            thread_id = %thread.id,
            sender = %caller.user_id,
            created,
            "Thread message sent"
        );

        self.push_to_thread(
            &thread,
            &ChatEvent::NewMessage {
                thread: thread.clone(),
                message: message.clone(),
            },
        );

        Ok((thread, message, created))
    }
}
