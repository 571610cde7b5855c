//! Message paging, send, edit and soft-delete.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::auth::Caller;
use crate::chat::{validate_content, ChatService};
use crate::db::models::{Message, Thread};
use crate::error::ChatError;
use crate::ws::ChatEvent;

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePageResponse {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

/// Edits are allowed while `now - created_at <= window`, boundary inclusive.
pub fn within_edit_window(created_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(created_at) <= window
}

/// Validate client paging input. `None` falls back to the defaults; values
/// below 1 are rejected and oversized limits are capped.
pub fn resolve_paging(
    page: Option<i64>,
    limit: Option<i64>,
    default_limit: u32,
    max_limit: u32,
) -> Result<(u32, u32), ChatError> {
    let page = page.unwrap_or(1);
    if page < 1 || page > i64::from(u32::MAX) {
        return Err(ChatError::invalid("page must be a positive integer"));
    }
    let limit = limit.unwrap_or(i64::from(default_limit));
    if limit < 1 {
        return Err(ChatError::invalid("limit must be a positive integer"));
    }
    let limit = limit.min(i64::from(max_limit.max(1)));
    Ok((page as u32, limit as u32))
}

fn page_count(total: i64, limit: u32) -> i64 {
    let limit = i64::from(limit.max(1));
    (total + limit - 1) / limit
}

impl ChatService {
    /// Load the message and its thread, requiring the caller to be a
    /// participant.
    async fn load_message_for(
        &self,
        caller: &Caller,
        message_id: i64,
    ) -> Result<(Message, Thread), ChatError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        let thread = self.load_thread_for(caller, &message.thread_id).await?;
        Ok((message, thread))
    }

    /// One page of the thread, newest first. Returns the rows as stored and
    /// queues a delivery sweep for the caller in the background.
    pub async fn fetch_messages(
        &self,
        caller: &Caller,
        thread_id: &str,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<MessagePageResponse, ChatError> {
        let (page, limit) = resolve_paging(
            page,
            limit,
            self.config.default_page_size,
            self.config.max_page_size,
        )?;
        let thread = self.load_thread_for(caller, thread_id).await?;

        let result = self.store.page_messages(&thread.id, page, limit).await?;
        self.schedule_delivery_sweep(&thread.id, &caller.user_id);

        Ok(MessagePageResponse {
            pagination: Pagination {
                page,
                limit,
                total: result.total,
                pages: page_count(result.total, limit),
            },
            messages: result.messages,
        })
    }

    /// Append a message to an existing thread.
    pub async fn send_message(
        &self,
        caller: &Caller,
        thread_id: &str,
        content: &str,
        reply_to_id: Option<i64>,
    ) -> Result<Message, ChatError> {
        let content = validate_content(content, self.config.max_content_length)?;
        let thread = self.load_thread_for(caller, thread_id).await?;

        if let Some(reply_to) = reply_to_id {
            let parent = self.store.get_message(reply_to).await?;
            if !parent.is_some_and(|p| p.thread_id == thread.id) {
                return Err(ChatError::invalid("reply_to_id must reference a message in this thread"));
            }
        }

        let (thread, message) = self
            .store
            .insert_message(&thread.id, &caller.user_id, &content, reply_to_id, Utc::now())
            .await?;

        tracing::debug!(thread_id = %thread.id, message_id = message.id, "Message sent");

        self.push_to_thread(
            &thread,
            &ChatEvent::NewMessage {
                thread: thread.clone(),
                message: message.clone(),
            },
        );
        Ok(message)
    }

    /// Rewrite a message's content. Only the sender may edit, only within the
    /// edit window, and never after deletion.
    pub async fn edit_message(
        &self,
        caller: &Caller,
        message_id: i64,
        content: &str,
    ) -> Result<Message, ChatError> {
        let content = validate_content(content, self.config.max_content_length)?;
        let (message, thread) = self.load_message_for(caller, message_id).await?;

        if message.sender_id != caller.user_id {
            return Err(ChatError::Forbidden);
        }
        if message.is_deleted {
            return Err(ChatError::NotFound);
        }

        let now = Utc::now();
        let window = self.config.edit_window();
        if !within_edit_window(message.created_at, now, window) {
            return Err(ChatError::WindowExpired);
        }

        // The store re-checks the guard so a concurrent delete wins
        let updated = match self
            .store
            .update_content(message.id, &caller.user_id, &content, now - window, now)
            .await?
        {
            Some(updated) => updated,
            None => return Err(self.edit_rejection(message.id).await?),
        };

        self.push_to_thread(
            &thread,
            &ChatEvent::MessageEdited {
                message_id: updated.id,
                content: updated.content.clone(),
                edited_at: updated.edited_at.unwrap_or(now),
            },
        );
        Ok(updated)
    }

    /// Why a guarded update matched no row: gone or deleted is NotFound,
    /// anything else means the window closed in the meantime.
    async fn edit_rejection(&self, message_id: i64) -> Result<ChatError, ChatError> {
        Ok(match self.store.get_message(message_id).await? {
            Some(current) if !current.is_deleted => ChatError::WindowExpired,
            _ => ChatError::NotFound,
        })
    }

    /// Tombstone a message. Deleting an already deleted message succeeds
    /// without pushing anything. Returns whether this call deleted it.
    pub async fn delete_message(&self, caller: &Caller, message_id: i64) -> Result<bool, ChatError> {
        let (message, thread) = self.load_message_for(caller, message_id).await?;
        if message.sender_id != caller.user_id {
            return Err(ChatError::Forbidden);
        }

        let deleted = self.store.soft_delete(message.id, Utc::now()).await?;
        if deleted {
            self.push_to_thread(&thread, &ChatEvent::MessageDeleted { message_id: message.id });
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::{drain, service};

    #[test]
    fn test_edit_window_boundaries() {
        let window = Duration::minutes(15);
        let created = Utc::now();
        assert!(within_edit_window(created, created + Duration::seconds(899), window));
        assert!(within_edit_window(created, created + window, window));
        assert!(!within_edit_window(created, created + Duration::seconds(901), window));
    }

    #[test]
    fn test_paging_defaults_and_caps() {
        assert_eq!(resolve_paging(None, None, 50, 100).unwrap(), (1, 50));
        assert_eq!(resolve_paging(Some(3), Some(500), 50, 100).unwrap(), (3, 100));
        assert!(resolve_paging(Some(0), None, 50, 100).is_err());
        assert!(resolve_paging(Some(1), Some(-5), 50, 100).is_err());
    }

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(page_count(0, 50), 0);
        assert_eq!(page_count(50, 50), 1);
        assert_eq!(page_count(51, 50), 2);
    }

    async fn thread_with_backdated(
        service: &ChatService,
        age: Duration,
    ) -> (Thread, Message) {
        let (thread, _) = service
            .find_or_create_thread(&Caller::new("alice", "seeker"), "bob", None)
            .await
            .unwrap();
        service
            .store()
            .insert_message(&thread.id, "alice", "original", None, Utc::now() - age)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_edit_just_inside_window() {
        let (service, registry) = service();
        let (_b, mut bob_rx) = registry.register("bob");
        let (_, message) =
            thread_with_backdated(&service, Duration::minutes(14) + Duration::seconds(59)).await;

        let alice = Caller::new("alice", "seeker");
        let edited = service.edit_message(&alice, message.id, "revised").await.unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "revised");
        assert!(edited.edited_at.is_some());

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "MESSAGE_EDITED");
        assert_eq!(events[0]["content"], "revised");
    }

    #[tokio::test]
    async fn test_edit_just_outside_window() {
        let (service, _registry) = service();
        let (_, message) =
            thread_with_backdated(&service, Duration::minutes(15) + Duration::seconds(1)).await;

        let alice = Caller::new("alice", "seeker");
        assert!(matches!(
            service.edit_message(&alice, message.id, "revised").await,
            Err(ChatError::WindowExpired)
        ));
        let stored = service.store().get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "original");
        assert!(!stored.is_edited);
    }

    #[tokio::test]
    async fn test_window_closing_before_update_is_window_expired() {
        let (service, _registry) = service();
        let (_, message) = thread_with_backdated(&service, Duration::minutes(14)).await;

        // The guard runs with a cutoff past creation, as if the window
        // closed between the service check and the write
        let now = Utc::now();
        let missed = service
            .store()
            .update_content(message.id, "alice", "late", now, now)
            .await
            .unwrap();
        assert!(missed.is_none());
        assert!(matches!(
            service.edit_rejection(message.id).await.unwrap(),
            ChatError::WindowExpired
        ));

        service.store().soft_delete(message.id, now).await.unwrap();
        assert!(matches!(
            service.edit_rejection(message.id).await.unwrap(),
            ChatError::NotFound
        ));
        assert!(matches!(
            service.edit_rejection(message.id + 1000).await.unwrap(),
            ChatError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_only_sender_edits_or_deletes() {
        let (service, _registry) = service();
        let (_, message) = thread_with_backdated(&service, Duration::zero()).await;

        let bob = Caller::new("bob", "owner");
        assert!(matches!(
            service.edit_message(&bob, message.id, "hijack").await,
            Err(ChatError::Forbidden)
        ));
        assert!(matches!(
            service.delete_message(&bob, message.id).await,
            Err(ChatError::Forbidden)
        ));

        let mallory = Caller::new("mallory", "seeker");
        assert!(matches!(
            service.delete_message(&mallory, message.id).await,
            Err(ChatError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_double_delete_is_noop() {
        let (service, registry) = service();
        let (_, message) = thread_with_backdated(&service, Duration::zero()).await;
        let (_b, mut bob_rx) = registry.register("bob");

        let alice = Caller::new("alice", "seeker");
        assert!(service.delete_message(&alice, message.id).await.unwrap());
        assert!(!service.delete_message(&alice, message.id).await.unwrap());

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "MESSAGE_DELETED");

        // Deleted messages cannot be edited
        assert!(matches!(
            service.edit_message(&alice, message.id, "back").await,
            Err(ChatError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_reply_must_stay_in_thread() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, first, _) = service.start_thread(&alice, "bob", None, "one").await.unwrap();
        let (_, elsewhere, _) = service.start_thread(&alice, "carol", None, "other").await.unwrap();

        let reply = service
            .send_message(&alice, &thread.id, "two", Some(first.id))
            .await
            .unwrap();
        assert_eq!(reply.reply_to_id, Some(first.id));

        assert!(matches!(
            service.send_message(&alice, &thread.id, "three", Some(elsewhere.id)).await,
            Err(ChatError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.send_message(&alice, &thread.id, "four", Some(9999)).await,
            Err(ChatError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_outsider_cannot_send_or_fetch() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, _, _) = service.start_thread(&alice, "bob", None, "hi").await.unwrap();

        let mallory = Caller::new("mallory", "seeker");
        assert!(matches!(
            service.send_message(&mallory, &thread.id, "psst", None).await,
            Err(ChatError::Forbidden)
        ));
        assert!(matches!(
            service.fetch_messages(&mallory, &thread.id, None, None).await,
            Err(ChatError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_fetch_pagination_metadata() {
        let (service, _registry) = service();
        let alice = Caller::new("alice", "seeker");
        let (thread, _, _) = service.start_thread(&alice, "bob", None, "m0").await.unwrap();
        for i in 1..5 {
            service
                .send_message(&alice, &thread.id, &format!("m{}", i), None)
                .await
                .unwrap();
        }

        let page = service
            .fetch_messages(&alice, &thread.id, Some(2), Some(2))
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.pages, 3);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].content, "m2");
        assert_eq!(page.messages[1].content, "m1");
    }
}
