use serde::Serialize;

use crate::auth::Caller;
use crate::chat::ChatService;
use crate::db::models::{Message, Thread};
use crate::error::ChatError;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message: Message,
    pub thread: Thread,
}

impl ChatService {
    /// Case-insensitive substring search across the caller's threads,
    /// newest first, capped at the configured limit.
    pub async fn search_messages(&self, caller: &Caller, query: &str) -> Result<Vec<SearchHit>, ChatError> {
        // Whitespace-only is rejected, but the query itself matches verbatim
        if query.trim().is_empty() {
            return Err(ChatError::invalid("Search query is required"));
        }

        let hits = self
            .store
            .search(&caller.user_id, query, self.config.search_limit.max(1))
            .await?;
        Ok(hits
            .into_iter()
            .map(|(message, thread)| SearchHit { message, thread })
            .collect())
    }
}
