//! Push-channel envelope.
//!
//! Every event is a JSON object `{"type": <EVENT_TYPE>, ...payload}` sent as a
//! WebSocket text frame. The client never sends events; inbound frames only
//! keep the session alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Message, MessageStatus, Notification, Thread};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatEvent {
    NewMessage {
        thread: Thread,
        message: Message,
    },
    MessageEdited {
        message_id: i64,
        content: String,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        message_id: i64,
    },
    MessageStatusUpdate {
        message_id: i64,
        status: MessageStatus,
    },
    TypingStatus {
        thread_id: String,
        user_id: String,
        is_typing: bool,
    },
    Notification {
        notification: Notification,
    },
}

impl ChatEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "NEW_MESSAGE",
            Self::MessageEdited { .. } => "MESSAGE_EDITED",
            Self::MessageDeleted { .. } => "MESSAGE_DELETED",
            Self::MessageStatusUpdate { .. } => "MESSAGE_STATUS_UPDATE",
            Self::TypingStatus { .. } => "TYPING_STATUS",
            Self::Notification { .. } => "NOTIFICATION",
        }
    }
}
