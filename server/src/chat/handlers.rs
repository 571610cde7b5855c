//! REST endpoints for chat. Handlers only extract, delegate to `ChatService`
//! and shape the JSON; every rule lives in the service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::chat::messages::MessagePageResponse;
use crate::chat::search::SearchHit;
use crate::db::models::{Message, Thread, ThreadSummary};
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    pub target_user_id: String,
    pub property_ref: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreateThreadResponse {
    pub thread: Thread,
    pub message: Message,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub reply_to_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /api/chat/threads -- Caller's threads with unread counts.
pub async fn list_threads(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<ThreadSummary>>, ChatError> {
    Ok(Json(state.chat.list_threads(&caller).await?))
}

/// POST /api/chat/threads -- Create or continue a thread with a first message.
pub async fn create_thread(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateThreadRequest>,
) -> Result<(StatusCode, Json<CreateThreadResponse>), ChatError> {
    let (thread, message, created) = state
        .chat
        .start_thread(
            &caller,
            &body.target_user_id,
            body.property_ref.as_deref(),
            &body.message,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateThreadResponse {
            thread,
            message,
            created,
        }),
    ))
}

/// GET /api/chat/threads/{id}?page&limit -- Page of messages, newest first.
pub async fn get_thread_messages(
    State(state): State<AppState>,
    caller: Caller,
    Path(thread_id): Path<String>,
    Query(params): Query<PageQuery>,
) -> Result<Json<MessagePageResponse>, ChatError> {
    let page = state
        .chat
        .fetch_messages(&caller, &thread_id, params.page, params.limit)
        .await?;
    Ok(Json(page))
}

/// POST /api/chat/threads/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(thread_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let message = state
        .chat
        .send_message(&caller, &thread_id, &body.content, body.reply_to_id)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/chat/threads/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    caller: Caller,
    Path(thread_id): Path<String>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let updated = state.chat.mark_thread_read(&caller, &thread_id).await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "updated": updated,
    })))
}

/// POST /api/chat/threads/{id}/typing
pub async fn set_typing(
    State(state): State<AppState>,
    caller: Caller,
    Path(thread_id): Path<String>,
    Json(body): Json<TypingRequest>,
) -> Result<Json<serde_json::Value>, ChatError> {
    state
        .chat
        .set_typing(&caller, &thread_id, body.is_typing)
        .await?;
    Ok(Json(serde_json::json!({ "status": "updated" })))
}

/// PUT /api/chat/messages/{id}
pub async fn edit_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(message_id): Path<i64>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<Message>, ChatError> {
    let message = state
        .chat
        .edit_message(&caller, message_id, &body.content)
        .await?;
    Ok(Json(message))
}

/// DELETE /api/chat/messages/{id} -- Soft delete. Repeat deletes succeed.
pub async fn delete_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(message_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ChatError> {
    state.chat.delete_message(&caller, message_id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// GET /api/chat/search?q=
pub async fn search(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ChatError> {
    Ok(Json(state.chat.search_messages(&caller, &params.q).await?))
}
