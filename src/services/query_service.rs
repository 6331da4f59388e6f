use std::sync::Arc;
use std::time::Instant;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::connection_pool::ConnectionPoolManager;
use crate::services::database::{PoolFactory, PostgresPoolFactory, QuerySource, ResultCursor};

/// Opens streaming cursors for named connections.
pub struct QueryService<F: PoolFactory = PostgresPoolFactory> {
    config: Arc<Config>,
    pool_manager: Arc<ConnectionPoolManager<F>>,
}

impl<F: PoolFactory> Clone for QueryService<F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            pool_manager: Arc::clone(&self.pool_manager),
        }
    }
}

impl<F: PoolFactory> QueryService<F> {
    pub fn new(config: Arc<Config>, pool_manager: Arc<ConnectionPoolManager<F>>) -> Self {
        Self {
            config,
            pool_manager,
        }
    }

    /// Run `query` verbatim against the connection called `connection_name`.
    ///
    /// Rows are not fetched here; the returned cursor streams them and holds its
    /// pooled connection until dropped.
    pub async fn execute(&self, connection_name: &str, query: &str) -> Result<ResultCursor, AppError> {
        let start_time = Instant::now();

        let profile = self.config.connection(connection_name).ok_or_else(|| {
            AppError::bad_request(format!("Requested connection '{}' not found", connection_name))
        })?;

        let pool = self
            .pool_manager
            .acquire(&profile.name, &profile.connection_string)
            .await
            .map_err(|e| connection_failure(connection_name, e))?;

        let cursor = pool.open_cursor(query).await.map_err(|e| match e {
            AppError::Connection(_) => connection_failure(connection_name, e),
            other => other,
        })?;

        tracing::debug!(
            connection = connection_name,
            columns = cursor.columns.len(),
            "Query opened in {} ms",
            start_time.elapsed().as_millis()
        );

        Ok(cursor)
    }
}

fn connection_failure(connection_name: &str, cause: AppError) -> AppError {
    tracing::error!("Error connecting to database '{}': {}", connection_name, cause);
    AppError::internal(format!("Error connecting to database: {}", connection_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::testing::CountingFactory;
    use axum::http::StatusCode;
    use futures::TryStreamExt;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const CONFIG: &str = r#"{
        "pgrest": {},
        "connections": [
            { "name": "default", "auth": "public", "connectionString": "postgres://u:p@localhost/db" }
        ]
    }"#;

    fn service(factory: CountingFactory) -> QueryService<CountingFactory> {
        let config = Arc::new(Config::from_json_str(CONFIG).unwrap());
        let manager = Arc::new(ConnectionPoolManager::with_factory(factory, Duration::from_secs(60)));
        QueryService::new(config, manager)
    }

    #[tokio::test]
    async fn test_execute_streams_rows() {
        let service = service(CountingFactory::default());
        let cursor = service.execute("default", "SELECT 1").await.unwrap();

        let names: Vec<_> = cursor.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "score"]);
        let rows: Vec<_> = cursor.rows.try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_bad_request() {
        let service = service(CountingFactory::default());
        let err = service.execute("missing", "SELECT 1").await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Requested connection 'missing' not found");
        assert_eq!(service.pool_manager.factory().created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pool_failure_is_internal_error() {
        let factory = CountingFactory::default();
        factory.fail.store(true, Ordering::SeqCst);
        let service = service(factory);

        let err = service.execute("default", "SELECT 1").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_api_error().error, "Error connecting to database: default");
    }

    #[tokio::test]
    async fn test_query_failure_carries_backend_details() {
        let service = service(CountingFactory::default());
        let err = service.execute("default", "FAIL").await.unwrap_err();

        let envelope = err.to_api_error();
        assert_eq!(envelope.status, 400);
        assert_eq!(envelope.error, "Error executing query");
        assert!(envelope.details.unwrap().contains("SQLSTATE 42601"));
    }
}
