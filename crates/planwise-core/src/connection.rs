//! Connection trait implemented by the connection provider

use crate::{EngineKind, QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// A live database connection.
///
/// Credential resolution and pooling belong to whoever hands out the
/// connection. The advisor only needs to run statements and read rows back.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name ("postgresql" or "mysql")
    fn driver_name(&self) -> &str;

    /// The engine this connection talks to
    fn engine(&self) -> EngineKind;

    /// Execute a statement that returns no rows (DDL, ANALYZE, DML)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a statement that returns rows (SELECT, EXPLAIN)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}
