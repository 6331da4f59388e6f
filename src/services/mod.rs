pub mod auth_service;
pub mod connection_pool;
pub mod database; // Backend seam and PostgreSQL pools
pub mod encoder; // Streaming result formats
pub mod lifecycle;
pub mod query_service;

pub use connection_pool::*;
pub use lifecycle::RequestLifecycle;
pub use query_service::*;
