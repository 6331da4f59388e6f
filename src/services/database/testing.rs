// In-memory backend used by unit tests
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, ColumnKind, Row, Value};
use crate::services::database::adapter::{PoolFactory, PoolStatus, QuerySource, ResultCursor};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Three columns, two rows.
pub fn sample_result() -> (Vec<ColumnDescriptor>, Vec<Row>) {
    let columns = vec![
        ColumnDescriptor::new("id", "int4", ColumnKind::Int32),
        ColumnDescriptor::new("name", "text", ColumnKind::Text),
        ColumnDescriptor::new("score", "float8", ColumnKind::Float64),
    ];
    let rows = vec![
        vec![Value::Int32(1), Value::Text("alice".into()), Value::Float64(1.5)],
        vec![Value::Int32(2), Value::Null, Value::Float64(-2.25)],
    ];
    (columns, rows)
}

pub fn cursor_from(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> ResultCursor {
    ResultCursor::new(columns, futures::stream::iter(rows.into_iter().map(Ok)).boxed())
}

/// Factory that counts how many pools it built and closed.
#[derive(Default)]
pub struct CountingFactory {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail: AtomicBool,
    create_delay: Duration,
    query_delay: Duration,
}

impl CountingFactory {
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::default()
        }
    }

    pub fn with_query_delay(delay: Duration) -> Self {
        Self {
            query_delay: delay,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct StubPool {
    id: usize,
    query_delay: Duration,
}

impl StubPool {
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait::async_trait]
impl PoolFactory for CountingFactory {
    type Pool = StubPool;

    async fn create(&self, name: &str, _connection_string: &str) -> Result<StubPool, AppError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Connection(format!("error connecting to database '{}'", name)));
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StubPool {
            id,
            query_delay: self.query_delay,
        })
    }

    fn close(&self, _pool: &StubPool) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Queries starting with `FAIL` are rejected like a syntax error and `ENDLESS` repeats the
/// first sample row forever; anything else yields the sample result.
#[async_trait::async_trait]
impl QuerySource for StubPool {
    async fn open_cursor(&self, sql: &str) -> Result<ResultCursor, AppError> {
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        if sql.starts_with("FAIL") {
            return Err(AppError::bad_request_with_details(
                "Error executing query",
                "ERROR: syntax error at or near \"FAIL\" (SQLSTATE 42601)",
            ));
        }
        let (columns, rows) = sample_result();
        if sql.starts_with("ENDLESS") {
            let row = rows[0].clone();
            let endless = futures::stream::repeat_with(move || Ok(row.clone())).boxed();
            return Ok(ResultCursor::new(columns, endless));
        }
        Ok(cursor_from(columns, rows))
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: 1,
            available: 1,
            max_size: 4,
        }
    }
}
