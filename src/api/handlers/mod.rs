pub mod query;
pub mod status;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::services::database::{PoolFactory, PostgresPoolFactory};
use crate::services::{ConnectionPoolManager, QueryService};

/// Application state
pub struct AppState<F: PoolFactory = PostgresPoolFactory> {
    pub config: Arc<Config>,
    pub pool_manager: Arc<ConnectionPoolManager<F>>,
    pub query_service: QueryService<F>,
    /// One permit per query in flight, held until its body is fully streamed
    pub query_slots: Arc<Semaphore>,
    pub started_at: DateTime<Utc>,
    /// Parent of every per-request cancellation token; cancelled on shutdown
    pub requests: CancellationToken,
}

impl<F: PoolFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            pool_manager: Arc::clone(&self.pool_manager),
            query_service: self.query_service.clone(),
            query_slots: Arc::clone(&self.query_slots),
            started_at: self.started_at,
            requests: self.requests.clone(),
        }
    }
}

impl<F: PoolFactory> AppState<F> {
    pub fn new(
        config: Arc<Config>,
        pool_manager: Arc<ConnectionPoolManager<F>>,
        requests: CancellationToken,
    ) -> Self {
        let query_service = QueryService::new(Arc::clone(&config), Arc::clone(&pool_manager));
        let query_slots = Arc::new(Semaphore::new(config.pgrest.max_concurrent_requests));
        Self {
            config,
            pool_manager,
            query_service,
            query_slots,
            started_at: Utc::now(),
            requests,
        }
    }
}
