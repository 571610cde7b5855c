/// Database row types for the chat tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs,
/// and double as the JSON shapes pushed to clients and returned over REST.
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-message delivery status. Ordered: `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A status column holding something other than sent/delivered/read.
#[derive(Debug, Error)]
#[error("unknown message status {0:?}")]
pub struct UnknownStatus(pub String);

/// Which side of a normalized participant pair a user occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantSlot {
    A,
    B,
}

/// Conversation between exactly two users, optionally scoped to a property.
/// `participant_a < participant_b` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub property_ref: Option<String>,
    pub last_message: String,
    pub typing_a: bool,
    pub typing_b: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub const COLUMNS: &'static str = "id, participant_a, participant_b, property_ref, last_message, \
         typing_a, typing_b, created_at, updated_at";
    /// Number of columns in `COLUMNS`.
    pub const WIDTH: usize = 9;

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::from_row_at(row, 0)
    }

    /// Map a row whose thread columns start at index `base` (for joins).
    pub fn from_row_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(base)?,
            participant_a: row.get(base + 1)?,
            participant_b: row.get(base + 2)?,
            property_ref: row.get(base + 3)?,
            last_message: row.get(base + 4)?,
            typing_a: row.get(base + 5)?,
            typing_b: row.get(base + 6)?,
            created_at: millis_to_datetime(row.get(base + 7)?),
            updated_at: millis_to_datetime(row.get(base + 8)?),
        })
    }

    pub fn slot_of(&self, user_id: &str) -> Option<ParticipantSlot> {
        if self.participant_a == user_id {
            Some(ParticipantSlot::A)
        } else if self.participant_b == user_id {
            Some(ParticipantSlot::B)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.slot_of(user_id).is_some()
    }

    /// The participant that is not `user_id`. Callers check membership first.
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.participant_a == user_id {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }
}

/// Thread row annotated for the caller's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub thread: Thread,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub reply_to_id: Option<i64>,
}

impl Message {
    pub const COLUMNS: &'static str = "id, thread_id, sender_id, content, status, created_at, \
         delivered_at, read_at, edited_at, deleted_at, is_edited, is_deleted, reply_to_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(4)?;
        let status = MessageStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(UnknownStatus(status)))
        })?;
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            sender_id: row.get(2)?,
            content: row.get(3)?,
            status,
            created_at: millis_to_datetime(row.get(5)?),
            delivered_at: row.get::<_, Option<i64>>(6)?.map(millis_to_datetime),
            read_at: row.get::<_, Option<i64>>(7)?.map(millis_to_datetime),
            edited_at: row.get::<_, Option<i64>>(8)?.map(millis_to_datetime),
            deleted_at: row.get::<_, Option<i64>>(9)?.map(millis_to_datetime),
            is_edited: row.get(10)?,
            is_deleted: row.get(11)?,
            reply_to_id: row.get(12)?,
        })
    }
}

/// System notification record (non-chat events such as listing approval).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            content: row.get(3)?,
            is_read: row.get(4)?,
            created_at: millis_to_datetime(row.get(5)?),
        })
    }
}

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Read);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&MessageStatus::Delivered).unwrap(),
            "\"delivered\""
        );
        assert_eq!(MessageStatus::parse("read"), Some(MessageStatus::Read));
        assert_eq!(MessageStatus::parse("bogus"), None);
    }

    #[test]
    fn test_thread_participants() {
        let now = Utc::now();
        let thread = Thread {
            id: "t1".into(),
            participant_a: "alice".into(),
            participant_b: "bob".into(),
            property_ref: None,
            last_message: String::new(),
            typing_a: false,
            typing_b: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(thread.slot_of("alice"), Some(ParticipantSlot::A));
        assert_eq!(thread.slot_of("bob"), Some(ParticipantSlot::B));
        assert!(!thread.is_participant("mallory"));
        assert_eq!(thread.other_participant("bob"), "alice");
    }
}
