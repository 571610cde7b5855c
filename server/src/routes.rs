use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::auth::middleware::JwtSecret;
use crate::chat::handlers as chat;
use crate::notify;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Caller extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Chat routes (JWT required, Caller extractor validates token)
    let chat_routes = Router::new()
        .route(
            "/api/chat/threads",
            get(chat::list_threads).post(chat::create_thread),
        )
        .route("/api/chat/threads/{id}", get(chat::get_thread_messages))
        .route("/api/chat/threads/{id}/messages", post(chat::send_message))
        .route("/api/chat/threads/{id}/read", post(chat::mark_read))
        .route("/api/chat/threads/{id}/typing", post(chat::set_typing))
        .route(
            "/api/chat/messages/{id}",
            axum::routing::put(chat::edit_message).delete(chat::delete_message),
        )
        .route("/api/chat/search", get(chat::search));

    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            get(notify::list_notifications).post(notify::create_notification),
        )
        .route(
            "/api/notifications/{id}/read",
            patch(notify::mark_notification_read),
        )
        .route(
            "/api/notifications/read-all",
            post(notify::mark_all_notifications_read),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(chat_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
