// Backend abstraction: how pools are built and how a pool opens a result cursor
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, Row};
use futures::stream::BoxStream;
use serde::Serialize;

/// Forward-only stream of decoded rows plus the result's column layout.
///
/// The stream owns whatever backend resources it reads from; dropping it releases them.
pub struct ResultCursor {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: BoxStream<'static, Result<Row, AppError>>,
}

impl ResultCursor {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: BoxStream<'static, Result<Row, AppError>>) -> Self {
        Self { columns, rows }
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Connection counts of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub max_size: usize,
}

/// A pooled connection group that can run a query.
#[async_trait::async_trait]
pub trait QuerySource: Send + Sync {
    /// Submit `sql` verbatim and return a cursor over its result without fetching rows.
    async fn open_cursor(&self, sql: &str) -> Result<ResultCursor, AppError>;

    fn status(&self) -> PoolStatus;
}

/// Builds and tears down pooled connection groups for the registry.
#[async_trait::async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: QuerySource + Clone + Send + Sync + 'static;

    /// Construct a pool for `name` and verify the backend is reachable.
    ///
    /// On failure nothing must be left open.
    async fn create(&self, name: &str, connection_string: &str) -> Result<Self::Pool, AppError>;

    /// Close every connection held by `pool`.
    fn close(&self, pool: &Self::Pool);
}
