use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;
use crate::services::database::{PoolFactory, PoolStatus, PostgresPoolFactory, QuerySource};

/// Interval between two idle sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct PoolEntry<P> {
    pool: P,
    last_used: Instant,
}

/// Connection pool registry keyed by connection profile name.
///
/// One pool per name, created on first use and closed by the idle sweep once
/// it has not been acquired for longer than the idle timeout. Acquire, sweep and
/// shutdown all go through the same mutex, so a name is never built twice.
pub struct ConnectionPoolManager<F: PoolFactory = PostgresPoolFactory> {
    factory: F,
    pools: Mutex<HashMap<String, PoolEntry<F::Pool>>>,
    idle_timeout: Duration,
    sweep_token: CancellationToken,
}

impl ConnectionPoolManager<PostgresPoolFactory> {
    /// Registry backed by deadpool-postgres pools of at most `max_pool_size` connections
    pub fn with_config(max_pool_size: usize, idle_timeout: Duration) -> Self {
        Self::with_factory(PostgresPoolFactory::new(max_pool_size), idle_timeout)
    }
}

impl<F: PoolFactory> ConnectionPoolManager<F> {
    pub fn with_factory(factory: F, idle_timeout: Duration) -> Self {
        Self {
            factory,
            pools: Mutex::new(HashMap::new()),
            idle_timeout,
            sweep_token: CancellationToken::new(),
        }
    }

    /// Get the pool registered under `name`, creating it on first use.
    pub async fn acquire(&self, name: &str, connection_string: &str) -> Result<F::Pool, AppError> {
        let mut pools = self.pools.lock().await;

        if let Some(entry) = pools.get_mut(name) {
            entry.last_used = Instant::now();
            tracing::debug!("Using existing connection pool for '{}'", name);
            return Ok(entry.pool.clone());
        }

        tracing::info!(
            "Creating new connection pool for '{}': {}",
            name,
            mask_credentials(connection_string)
        );

        let pool = self.factory.create(name, connection_string).await.map_err(|e| {
            tracing::error!("Failed to create connection pool for '{}': {}", name, e);
            e
        })?;

        pools.insert(
            name.to_string(),
            PoolEntry {
                pool: pool.clone(),
                last_used: Instant::now(),
            },
        );

        Ok(pool)
    }

    /// Close and remove every pool unused for longer than the idle timeout.
    /// Returns the number of pools closed.
    pub async fn evict_idle(&self) -> usize {
        let mut pools = self.pools.lock().await;
        let idle: Vec<String> = pools
            .iter()
            .filter(|(_, entry)| entry.last_used.elapsed() > self.idle_timeout)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &idle {
            if let Some(entry) = pools.remove(name) {
                self.factory.close(&entry.pool);
                tracing::info!("Closed idle connection pool for '{}'", name);
            }
        }

        idle.len()
    }

    /// Spawn the background sweep. It stops when `close_all` runs.
    pub fn start_idle_sweep(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let token = self.sweep_token.clone();
        let manager = self;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Idle pool sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let closed = manager.evict_idle().await;
                        if closed > 0 {
                            tracing::debug!("Idle pool sweep closed {} pool(s)", closed);
                        }
                    }
                }
            }
        })
    }

    /// Stop the sweep, close every pool and clear the registry.
    pub async fn close_all(&self) {
        self.sweep_token.cancel();

        let mut pools = self.pools.lock().await;
        for (name, entry) in pools.drain() {
            self.factory.close(&entry.pool);
            tracing::info!("Closed connection pool for '{}'", name);
        }
    }

    /// Get the number of registered pools
    pub async fn pool_count(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Get pool statistics for a registered connection
    pub async fn pool_status(&self, name: &str) -> Option<PoolStatus> {
        self.pools.lock().await.get(name).map(|entry| entry.pool.status())
    }

    /// Statistics of every registered pool, by name
    pub async fn pool_statuses(&self) -> BTreeMap<String, PoolStatus> {
        self.pools
            .lock()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.pool.status()))
            .collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.pools.lock().await.contains_key(name)
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

/// Mask credentials in connection URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}
