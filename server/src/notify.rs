//! Notification bridge.
//!
//! Non-chat events (listing approved, payment received, ...) are stored as
//! plain records and pushed through the same registry path chat uses, as a
//! `NOTIFICATION` event.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::auth::Caller;
use crate::chat::store::ThreadStore;
use crate::db::models::Notification;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::{ChatEvent, ConnectionRegistry};

#[derive(Clone)]
pub struct NotificationBridge {
    store: ThreadStore,
    registry: ConnectionRegistry,
}

impl NotificationBridge {
    pub fn new(store: ThreadStore, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    /// Persist a notification for `user_id` and push it to their sessions.
    pub async fn notify(&self, user_id: &str, kind: &str, content: &str) -> Result<Notification, ChatError> {
        let user_id = user_id.trim();
        let kind = kind.trim();
        if user_id.is_empty() || kind.is_empty() {
            return Err(ChatError::invalid("user_id and kind are required"));
        }

        let notification = self
            .store
            .insert_notification(user_id, kind, content, Utc::now())
            .await?;

        let reached = self.registry.broadcast_to_user(
            user_id,
            &ChatEvent::Notification {
                notification: notification.clone(),
            },
        );
        tracing::debug!(user_id = %user_id, kind = %kind, reached, "Notification sent");
        Ok(notification)
    }

    pub async fn list(&self, caller: &Caller) -> Result<Vec<Notification>, ChatError> {
        self.store.list_notifications(&caller.user_id).await
    }

    /// Mark one of the caller's notifications read. Someone else's id is
    /// indistinguishable from a missing one.
    pub async fn mark_read(&self, caller: &Caller, notification_id: i64) -> Result<(), ChatError> {
        let updated = self
            .store
            .mark_notifications_read(&caller.user_id, Some(notification_id))
            .await?;
        if updated == 0 {
            return Err(ChatError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, caller: &Caller) -> Result<usize, ChatError> {
        self.store.mark_notifications_read(&caller.user_id, None).await
    }
}

// --- REST endpoints ---

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub user_id: String,
    pub kind: String,
    #[serde(default)]
    pub content: String,
}

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Notification>>, ChatError> {
    Ok(Json(state.notifications.list(&caller).await?))
}

/// POST /api/notifications -- Admin only.
pub async fn create_notification(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Notification>), ChatError> {
    if !caller.is_admin() {
        return Err(ChatError::Forbidden);
    }
    let notification = state
        .notifications
        .notify(&body.user_id, &body.kind, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// PATCH /api/notifications/{id}/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    caller: Caller,
    Path(notification_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ChatError> {
    state.notifications.mark_read(&caller, notification_id).await?;
    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// POST /api/notifications/read-all
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ChatError> {
    let updated = state.notifications.mark_all_read(&caller).await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "updated": updated,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::drain;
    use crate::db::init_memory_db;

    fn bridge() -> (NotificationBridge, ConnectionRegistry) {
        let registry = ConnectionRegistry::new(16);
        let store = ThreadStore::new(init_memory_db().unwrap());
        (NotificationBridge::new(store, registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_notify_persists_and_pushes() {
        let (bridge, registry) = bridge();
        let (_h, mut rx) = registry.register("owner-1");

        let created = bridge
            .notify("owner-1", "property_approved", "Your listing is live")
            .await
            .unwrap();
        assert!(!created.is_read);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "NOTIFICATION");
        assert_eq!(events[0]["notification"]["kind"], "property_approved");

        let listed = bridge.list(&Caller::new("owner-1", "owner")).await.unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn test_offline_user_still_gets_record() {
        let (bridge, _registry) = bridge();
        bridge.notify("seeker-1", "payment", "Received").await.unwrap();
        let listed = bridge.list(&Caller::new("seeker-1", "seeker")).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_scoped_to_owner() {
        let (bridge, _registry) = bridge();
        let n = bridge.notify("owner-1", "payment", "Received").await.unwrap();
        bridge.notify("owner-1", "payment", "Received again").await.unwrap();

        let stranger = Caller::new("owner-2", "owner");
        assert!(matches!(
            bridge.mark_read(&stranger, n.id).await,
            Err(ChatError::NotFound)
        ));

        let owner = Caller::new("owner-1", "owner");
        bridge.mark_read(&owner, n.id).await.unwrap();
        assert_eq!(bridge.mark_all_read(&owner).await.unwrap(), 2);
        assert!(bridge.list(&owner).await.unwrap().iter().all(|n| n.is_read));
    }
}
