pub mod connection;
pub mod query;
pub mod row;

pub use connection::*;
pub use query::*;
pub use row::*;
