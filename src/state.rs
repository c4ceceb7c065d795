//! Application state shared across web handlers.

use crate::ranking::RankingApi;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub ranking_api: Arc<RankingApi>,
    /// Single-flight guard for the refresh job. A second trigger while a
    /// refresh is in progress is rejected instead of queued.
    pub refresh_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db_pool: PgPool, ranking_api: Arc<RankingApi>) -> Self {
        Self {
            db_pool,
            ranking_api,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }
}
