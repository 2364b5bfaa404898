use std::sync::Arc;

use tracing::error;

use murmur_cache::RecentCache;
use murmur_db::Database;
use murmur_ingest::MessageProducer;

use crate::error::ApiError;
use crate::middleware::AuthGate;
use crate::session::SessionManager;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionManager,
    pub gate: AuthGate,
    pub recent: RecentCache,
    pub producer: MessageProducer,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(e.to_string())
            })?
            .map_err(ApiError::from)
    }
}
