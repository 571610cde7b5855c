use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Chat threads and messages

CREATE TABLE chat_threads (
    id TEXT PRIMARY KEY,
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    property_ref TEXT,
    last_message TEXT NOT NULL DEFAULT '',
    typing_a INTEGER NOT NULL DEFAULT 0,
    typing_b INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (participant_a < participant_b)
);

-- One thread per unordered pair and property scope (absent scope included)
CREATE UNIQUE INDEX idx_chat_threads_scope
    ON chat_threads(participant_a, participant_b, IFNULL(property_ref, ''));
CREATE INDEX idx_chat_threads_a ON chat_threads(participant_a, updated_at);
CREATE INDEX idx_chat_threads_b ON chat_threads(participant_b, updated_at);

CREATE TABLE chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'sent',
    created_at INTEGER NOT NULL,
    delivered_at INTEGER,
    read_at INTEGER,
    edited_at INTEGER,
    deleted_at INTEGER,
    is_edited INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    reply_to_id INTEGER,
    FOREIGN KEY (thread_id) REFERENCES chat_threads(id),
    FOREIGN KEY (reply_to_id) REFERENCES chat_messages(id)
);

CREATE INDEX idx_chat_messages_thread_time ON chat_messages(thread_id, created_at);
CREATE INDEX idx_chat_messages_thread_status ON chat_messages(thread_id, status);
",
        ),
        M::up(
            "-- Migration 2: Non-chat notifications

CREATE TABLE notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX idx_notifications_user ON notifications(user_id, created_at);
",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }
}
