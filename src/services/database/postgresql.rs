// PostgreSQL backend: deadpool-postgres pools and streaming result cursors
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, ColumnKind, Row, Value};
use crate::services::database::adapter::{PoolFactory, PoolStatus, QuerySource, ResultCursor};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{NoTls, RowStream};

/// Builds one deadpool-postgres pool per connection profile.
pub struct PostgresPoolFactory {
    max_pool_size: usize,
}

impl PostgresPoolFactory {
    pub fn new(max_pool_size: usize) -> Self {
        Self { max_pool_size }
    }
}

impl Default for PostgresPoolFactory {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait::async_trait]
impl PoolFactory for PostgresPoolFactory {
    type Pool = PostgresPool;

    async fn create(&self, name: &str, connection_string: &str) -> Result<PostgresPool, AppError> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                AppError::Connection(format!("error connecting to database '{}': {}", name, e))
            })?;
        pool.resize(self.max_pool_size);

        // Liveness probe; a pool that cannot reach its backend is never registered
        if let Err(e) = ping(&pool).await {
            pool.close();
            return Err(AppError::Connection(format!(
                "error connecting to database '{}': {}",
                name, e
            )));
        }

        Ok(PostgresPool { pool })
    }

    fn close(&self, pool: &PostgresPool) {
        pool.pool.close();
    }
}

async fn ping(pool: &Pool) -> Result<(), String> {
    let client = pool.get().await.map_err(|e| e.to_string())?;
    client
        .execute("SELECT 1", &[])
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Handle to one pooled connection group. Cheap to clone.
#[derive(Clone)]
pub struct PostgresPool {
    pool: Pool,
}

#[async_trait::async_trait]
impl QuerySource for PostgresPool {
    async fn open_cursor(&self, sql: &str) -> Result<ResultCursor, AppError> {
        let client = self.pool.get().await.map_err(|e| {
            AppError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        let statement = client.prepare(sql).await.map_err(query_error)?;
        let columns: Vec<ColumnDescriptor> = statement
            .columns()
            .iter()
            .map(|c| ColumnDescriptor::new(c.name(), c.type_().name(), column_kind(c.type_())))
            .collect();
        let kinds: Arc<[ColumnKind]> = columns.iter().map(|c| c.kind).collect();

        let rows = client
            .query_raw(&statement, std::iter::empty::<&(dyn ToSql + Sync)>())
            .await
            .map_err(query_error)?;

        let stream = PgRowStream {
            rows: Box::pin(rows),
            kinds,
            _client: client,
        };

        Ok(ResultCursor::new(columns, stream.boxed()))
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            max_size: status.max_size,
        }
    }
}

/// Backend errors keep the server's message so the caller can fix the query.
fn query_error(e: tokio_postgres::Error) -> AppError {
    let details = match e.as_db_error() {
        Some(db_error) => format!(
            "{}: {} (SQLSTATE {})",
            db_error.severity(),
            db_error.message(),
            db_error.code().code()
        ),
        None => e.to_string(),
    };
    AppError::bad_request_with_details("Error executing query", details)
}

/// Map a PostgreSQL type to the decoder used for its values.
pub fn column_kind(ty: &Type) -> ColumnKind {
    match *ty {
        Type::BOOL => ColumnKind::Bool,
        Type::INT2 => ColumnKind::Int16,
        Type::INT4 => ColumnKind::Int32,
        Type::INT8 => ColumnKind::Int64,
        Type::FLOAT4 => ColumnKind::Float32,
        Type::FLOAT8 => ColumnKind::Float64,
        Type::NUMERIC => ColumnKind::Numeric,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => ColumnKind::Text,
        Type::JSON | Type::JSONB => ColumnKind::Json,
        Type::UUID => ColumnKind::Uuid,
        Type::DATE => ColumnKind::Date,
        Type::TIMESTAMP => ColumnKind::Timestamp,
        Type::TIMESTAMPTZ => ColumnKind::TimestampTz,
        Type::BYTEA => ColumnKind::Bytes,
        _ => ColumnKind::Unsupported,
    }
}

/// Streams decoded rows and keeps the pooled client checked out until dropped.
struct PgRowStream {
    rows: Pin<Box<RowStream>>,
    kinds: Arc<[ColumnKind]>,
    _client: Object,
}

impl Stream for PgRowStream {
    type Item = Result<Row, AppError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rows.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(decode_row(&row, &this.kinds))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(AppError::internal_with_details(
                "Error reading row values",
                e.to_string(),
            )))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn decode_row(row: &tokio_postgres::Row, kinds: &[ColumnKind]) -> Result<Row, AppError> {
    kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| {
            decode_value(row, idx, *kind).map_err(|e| {
                AppError::internal_with_details(
                    "Error reading row values",
                    format!("column '{}': {}", row.columns()[idx].name(), e),
                )
            })
        })
        .collect()
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    kind: ColumnKind,
) -> Result<Value, tokio_postgres::Error> {
    let value = match kind {
        ColumnKind::Bool => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        ColumnKind::Int16 => row.try_get::<_, Option<i16>>(idx)?.map(Value::Int16),
        ColumnKind::Int32 => row.try_get::<_, Option<i32>>(idx)?.map(Value::Int32),
        ColumnKind::Int64 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int64),
        ColumnKind::Float32 => row.try_get::<_, Option<f32>>(idx)?.map(Value::Float32),
        ColumnKind::Float64 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float64),
        ColumnKind::Numeric => row
            .try_get::<_, Option<PgNumeric>>(idx)?
            .map(|n| Value::Float64(n.0)),
        ColumnKind::Text => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        ColumnKind::Json => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::Json),
        ColumnKind::Uuid => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|u| Value::Text(u.to_string())),
        ColumnKind::Date => row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date),
        ColumnKind::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::Timestamp),
        ColumnKind::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(Value::TimestampTz),
        ColumnKind::Bytes => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        ColumnKind::Unsupported => {
            // No decoder: show the type name as a placeholder
            row.try_get::<_, Option<AnyValue>>(idx)?
                .map(|_| Value::Text(format!("<{}>", row.columns()[idx].type_().name())))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Accepts any type without decoding it; only used to tell NULL apart.
struct AnyValue;

impl<'a> FromSql<'a> for AnyValue {
    fn from_sql(_: &Type, _: &'a [u8]) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(AnyValue)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// NUMERIC decoded from its binary form (base-10000 digits) into a double.
struct PgNumeric(f64);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("invalid numeric header".into());
        }
        let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
        let sign = u16::from_be_bytes([raw[4], raw[5]]);

        match sign {
            NUMERIC_NAN => return Ok(PgNumeric(f64::NAN)),
            NUMERIC_PINF => return Ok(PgNumeric(f64::INFINITY)),
            NUMERIC_NINF => return Ok(PgNumeric(f64::NEG_INFINITY)),
            _ => {}
        }

        let digits = &raw[8..];
        if digits.len() < ndigits * 2 {
            return Err("invalid numeric digits".into());
        }

        let mut value = 0f64;
        for (i, chunk) in digits.chunks_exact(2).take(ndigits).enumerate() {
            let digit = u16::from_be_bytes([chunk[0], chunk[1]]) as f64;
            value += digit * 10000f64.powi(weight - i as i32);
        }
        if sign == NUMERIC_NEG {
            value = -value;
        }
        Ok(PgNumeric(value))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_bytes(weight: i16, sign: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&0u16.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_column_kind_mapping() {
        assert_eq!(column_kind(&Type::INT8), ColumnKind::Int64);
        assert_eq!(column_kind(&Type::VARCHAR), ColumnKind::Text);
        assert_eq!(column_kind(&Type::JSONB), ColumnKind::Json);
        assert_eq!(column_kind(&Type::TIMESTAMPTZ), ColumnKind::TimestampTz);
        assert_eq!(column_kind(&Type::NUMERIC), ColumnKind::Numeric);
        assert_eq!(column_kind(&Type::INTERVAL), ColumnKind::Unsupported);
    }

    #[test]
    fn test_numeric_decoding() {
        let raw = numeric_bytes(0, 0, &[123, 4500]);
        let n = PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap();
        assert!((n.0 - 123.45).abs() < 1e-9);

        let raw = numeric_bytes(-1, NUMERIC_NEG, &[5000]);
        let n = PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap();
        assert!((n.0 + 0.5).abs() < 1e-12);

        let raw = numeric_bytes(1, 0, &[1, 0]);
        let n = PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap();
        assert_eq!(n.0, 10000.0);

        let raw = numeric_bytes(0, NUMERIC_NAN, &[]);
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap().0.is_nan());
    }

    #[test]
    fn test_numeric_rejects_truncated_input() {
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &[0, 1]).is_err());
        let mut raw = numeric_bytes(0, 0, &[1, 2]);
        raw.truncate(raw.len() - 1);
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &raw).is_err());
    }
}
