use std::sync::Arc;

use crate::chat::ChatService;
use crate::config::ChatConfig;
use crate::db::DbPool;
use crate::notify::NotificationBridge;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// JWT verification secret (256-bit key shared with the identity service)
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket sessions per user
    pub connections: ConnectionRegistry,
    pub chat: ChatService,
    pub notifications: NotificationBridge,
    /// Chat tuning
    pub config: Arc<ChatConfig>,
}

impl AppState {
    /// Wire the registry, store and services around one database handle.
    /// Spawns the delivery sweep dispatcher, so it needs a running runtime.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, config: ChatConfig) -> Self {
        let config = Arc::new(config);
        let connections = ConnectionRegistry::new(config.outbound_queue_capacity);
        let store = crate::chat::store::ThreadStore::new(db);
        let chat = ChatService::new(store.clone(), connections.clone(), config.clone());
        let notifications = NotificationBridge::new(store, connections.clone());
        Self {
            jwt_secret,
            connections,
            chat,
            notifications,
            config,
        }
    }
}
