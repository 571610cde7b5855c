//! Durable thread/message records.
//!
//! rusqlite is synchronous, so every call hops onto the blocking pool and
//! holds the connection lock only for its own statements. Multi-statement
//! writes run inside a transaction so a rejected or failed operation leaves
//! nothing behind.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::db::models::{Message, MessageStatus, Notification, ParticipantSlot, Thread, ThreadSummary};
use crate::db::DbPool;
use crate::error::ChatError;

/// Order an unordered pair so the smaller id is participant A.
pub fn normalize_pair<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// Escape LIKE metacharacters so user input only ever matches literally.
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A page of a thread's visible messages, newest first.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: i64,
}

#[derive(Clone)]
pub struct ThreadStore {
    db: DbPool,
}

impl ThreadStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| ChatError::Internal("database lock poisoned".into()))?;
            f(&mut *conn)
        })
        .await?
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, ChatError> {
        let thread_id = thread_id.to_string();
        self.run(move |conn| Ok(select_thread(conn, &thread_id)?)).await
    }

    /// Resolve the thread for `{x, y}` scoped to `property_ref`, creating it
    /// if absent. Returns the thread and whether this call created it.
    pub async fn find_or_create_thread(
        &self,
        x: &str,
        y: &str,
        property_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Thread, bool), ChatError> {
        let (a, b) = normalize_pair(x, y);
        let (a, b) = (a.to_string(), b.to_string());
        let property_ref = property_ref.map(str::to_string);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let resolved = resolve_or_insert_thread(&tx, &a, &b, property_ref.as_deref(), now)?;
            tx.commit()?;
            Ok(resolved)
        })
        .await
    }

    /// Find-or-create the scoped thread and append its opening message in
    /// one transaction.
    pub async fn start_thread(
        &self,
        sender_id: &str,
        target_id: &str,
        property_ref: Option<&str>,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(Thread, Message, bool), ChatError> {
        let (a, b) = normalize_pair(sender_id, target_id);
        let (a, b) = (a.to_string(), b.to_string());
        let sender_id = sender_id.to_string();
        let property_ref = property_ref.map(str::to_string);
        let content = content.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let (thread, created) =
                resolve_or_insert_thread(&tx, &a, &b, property_ref.as_deref(), now)?;
            let message = insert_message_tx(&tx, &thread.id, &sender_id, &content, None, now)?;
            let thread = select_thread(&tx, &thread.id)?
                .ok_or_else(|| ChatError::Internal("thread vanished after insert".into()))?;
            tx.commit()?;
            Ok((thread, message, created))
        })
        .await
    }

    /// Append a message and bump the thread's snippet and `updated_at`.
    pub async fn insert_message(
        &self,
        thread_id: &str,
        sender_id: &str,
        content: &str,
        reply_to_id: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Result<(Thread, Message), ChatError> {
        let thread_id = thread_id.to_string();
        let sender_id = sender_id.to_string();
        let content = content.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let message =
                insert_message_tx(&tx, &thread_id, &sender_id, &content, reply_to_id, created_at)?;
            let thread = select_thread(&tx, &thread_id)?.ok_or(ChatError::NotFound)?;
            tx.commit()?;
            Ok((thread, message))
        })
        .await
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Option<Message>, ChatError> {
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM chat_messages WHERE id = ?1", Message::COLUMNS);
            Ok(conn
                .query_row(&sql, params![message_id], Message::from_row)
                .optional()?)
        })
        .await
    }

    /// Threads `user_id` participates in, most recently active first, each
    /// with the number of messages from the other side not yet read.
    pub async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>, ChatError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {}, (SELECT COUNT(*) FROM chat_messages m
                             WHERE m.thread_id = t.id AND m.sender_id != ?1 AND m.status != 'read')
                 FROM chat_threads t
                 WHERE t.participant_a = ?1 OR t.participant_b = ?1
                 ORDER BY t.updated_at DESC, t.id DESC",
                prefixed(Thread::COLUMNS, "t")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(ThreadSummary {
                        thread: Thread::from_row(row)?,
                        unread_count: row.get(Thread::WIDTH)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// One page of non-deleted messages, newest first. `page` is 1-based.
    pub async fn page_messages(
        &self,
        thread_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, ChatError> {
        let thread_id = thread_id.to_string();
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM chat_messages
                 WHERE thread_id = ?1 AND is_deleted = 0
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
                Message::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(params![thread_id, limit, offset], Message::from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE thread_id = ?1 AND is_deleted = 0",
                params![thread_id],
                |row| row.get(0),
            )?;

            Ok(MessagePage { messages, total })
        })
        .await
    }

    /// Move every `sent` message in the thread not written by `fetcher` to
    /// `delivered`. Rows already past `sent` are untouched. Returns the
    /// `(message_id, sender_id)` pairs that actually changed.
    pub async fn mark_delivered(
        &self,
        thread_id: &str,
        fetcher: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, String)>, ChatError> {
        let thread_id = thread_id.to_string();
        let fetcher = fetcher.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "UPDATE chat_messages SET status = 'delivered', delivered_at = ?3
                 WHERE thread_id = ?1 AND sender_id != ?2 AND status = 'sent'
                 RETURNING id, sender_id",
            )?;
            let changed = stmt
                .query_map(params![thread_id, fetcher, now.timestamp_millis()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(changed)
        })
        .await
    }

    /// Move every message in the thread not written by `reader` to `read`.
    pub async fn mark_read(
        &self,
        thread_id: &str,
        reader: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, ChatError> {
        let thread_id = thread_id.to_string();
        let reader = reader.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE chat_messages
                 SET status = 'read', read_at = ?3, delivered_at = COALESCE(delivered_at, ?3)
                 WHERE thread_id = ?1 AND sender_id != ?2 AND status != 'read'",
                params![thread_id, reader, now.timestamp_millis()],
            )?;
            Ok(changed)
        })
        .await
    }

    /// Rewrite content if the message is still the sender's, not deleted and
    /// created at or after `not_before`. Returns the updated row, or `None`
    /// when the guard no longer holds.
    pub async fn update_content(
        &self,
        message_id: i64,
        sender_id: &str,
        content: &str,
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, ChatError> {
        let sender_id = sender_id.to_string();
        let content = content.to_string();
        self.run(move |conn| {
            let sql = format!(
                "UPDATE chat_messages SET content = ?3, is_edited = 1, edited_at = ?4
                 WHERE id = ?1 AND sender_id = ?2 AND is_deleted = 0 AND created_at >= ?5
                 RETURNING {}",
                Message::COLUMNS
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![
                        message_id,
                        sender_id,
                        content,
                        now.timestamp_millis(),
                        not_before.timestamp_millis()
                    ],
                    Message::from_row,
                )
                .optional()?)
        })
        .await
    }

    /// Tombstone a message. Returns false if it was already deleted.
    pub async fn soft_delete(&self, message_id: i64, now: DateTime<Utc>) -> Result<bool, ChatError> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE chat_messages SET is_deleted = 1, deleted_at = ?2
                 WHERE id = ?1 AND is_deleted = 0",
                params![message_id, now.timestamp_millis()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn set_typing(
        &self,
        thread_id: &str,
        slot: ParticipantSlot,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let thread_id = thread_id.to_string();
        self.run(move |conn| {
            let sql = match slot {
                ParticipantSlot::A => "UPDATE chat_threads SET typing_a = ?2 WHERE id = ?1",
                ParticipantSlot::B => "UPDATE chat_threads SET typing_b = ?2 WHERE id = ?1",
            };
            let changed = conn.execute(sql, params![thread_id, is_typing])?;
            if changed == 0 {
                return Err(ChatError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Case-insensitive substring search over the non-deleted messages of
    /// threads `user_id` participates in, newest first.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<(Message, Thread)>, ChatError> {
        let user_id = user_id.to_string();
        let pattern = like_pattern(&query.to_lowercase());
        self.run(move |conn| {
            let sql = format!(
                "SELECT {}, {}
                 FROM chat_messages m
                 JOIN chat_threads t ON m.thread_id = t.id
                 WHERE (t.participant_a = ?1 OR t.participant_b = ?1)
                   AND m.is_deleted = 0
                   AND casefold(m.content) LIKE ?2 ESCAPE '\\'
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3",
                prefixed(Message::COLUMNS, "m"),
                prefixed(Thread::COLUMNS, "t"),
            );
            let mut stmt = conn.prepare(&sql)?;
            let message_width = Message::COLUMNS.split(',').count();
            let rows = stmt
                .query_map(params![user_id, pattern, limit], |row| {
                    Ok((Message::from_row(row)?, Thread::from_row_at(row, message_width)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // --- Notifications ---

    pub async fn insert_notification(
        &self,
        user_id: &str,
        kind: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Notification, ChatError> {
        let user_id = user_id.to_string();
        let kind = kind.to_string();
        let content = content.to_string();
        self.run(move |conn| {
            Ok(conn.query_row(
                "INSERT INTO notifications (user_id, kind, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id, user_id, kind, content, is_read, created_at",
                params![user_id, kind, content, now.timestamp_millis()],
                Notification::from_row,
            )?)
        })
        .await
    }

    pub async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>, ChatError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, kind, content, is_read, created_at FROM notifications
                 WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(params![user_id], Notification::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Mark one (or, with `None`, every) notification of the user read.
    /// Returns the number of rows touched.
    pub async fn mark_notifications_read(
        &self,
        user_id: &str,
        notification_id: Option<i64>,
    ) -> Result<usize, ChatError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let changed = match notification_id {
                Some(id) => conn.execute(
                    "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )?,
                None => conn.execute(
                    "UPDATE notifications SET is_read = 1 WHERE user_id = ?1",
                    params![user_id],
                )?,
            };
            Ok(changed)
        })
        .await
    }
}

fn select_thread(conn: &Connection, thread_id: &str) -> rusqlite::Result<Option<Thread>> {
    let sql = format!("SELECT {} FROM chat_threads WHERE id = ?1", Thread::COLUMNS);
    conn.query_row(&sql, params![thread_id], Thread::from_row)
        .optional()
}

fn select_scoped_thread(
    conn: &Connection,
    a: &str,
    b: &str,
    property_ref: Option<&str>,
) -> rusqlite::Result<Option<Thread>> {
    let sql = format!(
        "SELECT {} FROM chat_threads
         WHERE participant_a = ?1 AND participant_b = ?2 AND property_ref IS ?3",
        Thread::COLUMNS
    );
    conn.query_row(&sql, params![a, b, property_ref], Thread::from_row)
        .optional()
}

/// Lookup, then insert guarded by the scope unique index. When a concurrent
/// writer wins the insert, re-resolve to its row.
fn resolve_or_insert_thread(
    tx: &Transaction<'_>,
    a: &str,
    b: &str,
    property_ref: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Thread, bool), ChatError> {
    if let Some(existing) = select_scoped_thread(tx, a, b, property_ref)? {
        return Ok((existing, false));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO chat_threads
             (id, participant_a, participant_b, property_ref, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, a, b, property_ref, now.timestamp_millis()],
    )?;

    let thread = select_scoped_thread(tx, a, b, property_ref)?
        .ok_or_else(|| ChatError::Internal("thread insert ignored without a winner".into()))?;

    if inserted == 1 {
        tracing::debug!(thread_id = %thread.id, "Thread created");
    }
    Ok((thread, inserted == 1))
}

fn insert_message_tx(
    tx: &Transaction<'_>,
    thread_id: &str,
    sender_id: &str,
    content: &str,
    reply_to_id: Option<i64>,
    created_at: DateTime<Utc>,
) -> Result<Message, ChatError> {
    let sql = format!(
        "INSERT INTO chat_messages (thread_id, sender_id, content, status, created_at, reply_to_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         RETURNING {}",
        Message::COLUMNS
    );
    let message = tx.query_row(
        &sql,
        params![
            thread_id,
            sender_id,
            content,
            MessageStatus::Sent.as_str(),
            created_at.timestamp_millis(),
            reply_to_id
        ],
        Message::from_row,
    )?;

    tx.execute(
        "UPDATE chat_threads SET last_message = ?2, updated_at = ?3 WHERE id = ?1",
        params![thread_id, content, created_at.timestamp_millis()],
    )?;

    Ok(message)
}
