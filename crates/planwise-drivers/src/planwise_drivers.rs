//! Planwise Drivers - live connections for the advisor
//!
//! Concrete `Connection` implementations for the two supported engines and
//! the queries that snapshot index usage counters from them.

mod connect;
mod mysql;
mod postgres;
mod usage;

pub use connect::*;
pub use mysql::MySqlConnection;
pub use postgres::PostgresConnection;
pub use usage::*;
