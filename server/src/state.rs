use std::sync::Arc;

use crate::config::RuntimeSettings;
use crate::db::DbPool;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// HS256 signing secret for administrator tokens (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket connections and the selection overlay
    pub registry: Arc<ConnectionRegistry>,
    /// Runtime-mutable cooldown window and field dimensions
    pub settings: Arc<RuntimeSettings>,
}
