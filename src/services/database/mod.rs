// Backend seam: pool construction and streaming cursors
pub mod adapter;
pub mod postgresql;

#[cfg(test)]
pub mod testing;

pub use adapter::{PoolFactory, PoolStatus, QuerySource, ResultCursor};
pub use postgresql::{column_kind, PostgresPool, PostgresPoolFactory};
