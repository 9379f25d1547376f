//! PostgreSQL connection

use async_trait::async_trait;
use planwise_core::{
    ColumnMeta, Connection, EngineKind, PlanwiseError, QueryResult, Result, Row, StatementResult,
    Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row as PgRow};

fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();
    if let Some(detail) = db_error.detail()
        && !detail.trim().is_empty()
    {
        message.push_str(&format!(" (detail: {detail})"));
    }
    if let Some(hint) = db_error.hint()
        && !hint.trim().is_empty()
    {
        message.push_str(&format!(" (hint: {hint})"));
    }

    match db_error.code().code() {
        "42P07" => format!("object already exists: {message}"),
        "42704" => format!("undefined object: {message}"),
        "42501" => format!("insufficient privilege: {message}"),
        "57014" => format!("statement cancelled: {message}"),
        code => format!("{message} (code: {code})"),
    }
}

/// One PostgreSQL session.
///
/// Statements are serialized through a mutex so the harness's
/// BEGIN/ROLLBACK wrapping always lands on the session it meant.
pub struct PostgresConnection {
    client: Arc<Mutex<Client>>,
    closed: Arc<AtomicBool>,
}

impl PostgresConnection {
    /// Connect with a `postgres://` URL or a libpq key/value string
    pub async fn connect(url: &str) -> Result<Self> {
        let config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| PlanwiseError::Configuration(format!("invalid PostgreSQL URL: {e}")))?;
        tracing::info!(
            hosts = ?config.get_hosts(),
            database = ?config.get_dbname(),
            "connecting to PostgreSQL database"
        );

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            PlanwiseError::Connection(format!(
                "Failed to connect to PostgreSQL: {}",
                format_postgres_error(&e)
            ))
        })?;

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
            closed_flag.store(true, Ordering::SeqCst);
        });

        tracing::info!("PostgreSQL connection established");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            closed,
        })
    }
}

/// Parameters as tokio-postgres wants them. Everything the advisor binds is
/// a name or a number, so no type coercion against the statement is needed.
fn to_pg_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync + Send> {
            match value {
                Value::Null => Box::new(Option::<String>::None),
                Value::Bool(v) => Box::new(*v),
                Value::Int32(v) => Box::new(*v),
                Value::Int64(v) => Box::new(*v),
                Value::Float64(v) => Box::new(*v),
                Value::Decimal(v) | Value::String(v) => Box::new(v.clone()),
                Value::Bytes(v) => Box::new(v.clone()),
                Value::Json(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

/// Reads any column as UTF-8, for types without a dedicated mapping
struct PgFallbackString(String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Option<T> {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    match row.columns()[idx].type_().name() {
        "bool" => get::<bool>(row, idx).map(Value::Bool),
        "int2" => get::<i16>(row, idx).map(|v| Value::Int32(i32::from(v))),
        "int4" => get::<i32>(row, idx).map(Value::Int32),
        "int8" => get::<i64>(row, idx).map(Value::Int64),
        "oid" => get::<u32>(row, idx).map(|v| Value::Int64(i64::from(v))),
        "float4" => get::<f32>(row, idx).map(|v| Value::Float64(f64::from(v))),
        "float8" => get::<f64>(row, idx).map(Value::Float64),
        "bytea" => get::<Vec<u8>>(row, idx).map(Value::Bytes),
        "json" | "jsonb" => get::<serde_json::Value>(row, idx).map(Value::Json),
        "text" | "varchar" | "bpchar" | "name" => get::<String>(row, idx).map(Value::String),
        _ => get::<PgFallbackString>(row, idx).map(|v| Value::String(v.0)),
    }
    .unwrap_or(Value::Null)
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgresql"
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Postgresql
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let start_time = Instant::now();
        let client = self.client.lock().await;

        let outcome = if params.is_empty() {
            // Simple protocol: utility statements such as ANALYZE need no prepare
            client.batch_execute(sql).await.map(|()| 0)
        } else {
            let pg_params = to_pg_params(params);
            let param_refs: Vec<&(dyn ToSql + Sync)> = pg_params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            client.execute(sql, &param_refs).await
        };
        let affected_rows = outcome.map_err(|e| {
            PlanwiseError::Query(format!(
                "Failed to execute statement: {}",
                format_postgres_error(&e)
            ))
        })?;

        tracing::debug!(affected_rows, "statement executed");
        Ok(StatementResult::command(
            affected_rows,
            start_time.elapsed().as_secs_f64() * 1000.0,
        ))
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = Instant::now();
        let client = self.client.lock().await;

        let statement = client.prepare(sql).await.map_err(|e| {
            PlanwiseError::Query(format!(
                "Failed to prepare query: {}",
                format_postgres_error(&e)
            ))
        })?;
        let pg_params = to_pg_params(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = pg_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let pg_rows = client.query(&statement, &param_refs).await.map_err(|e| {
            PlanwiseError::Query(format!(
                "Failed to execute query: {}",
                format_postgres_error(&e)
            ))
        })?;

        let column_names: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let columns = statement
            .columns()
            .iter()
            .enumerate()
            .map(|(ordinal, col)| ColumnMeta {
                name: col.name().to_string(),
                data_type: col.type_().name().to_string(),
                ordinal,
            })
            .collect();
        let rows: Vec<Row> = pg_rows
            .iter()
            .map(|pg_row| {
                let values = (0..column_names.len())
                    .map(|idx| postgres_to_value(pg_row, idx))
                    .collect();
                Row::new(column_names.clone(), values)
            })
            .collect();

        let execution_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        let result = QueryResult {
            columns,
            rows,
            execution_time_ms,
            ..QueryResult::empty()
        };
        tracing::debug!(
            query_id = %result.id,
            row_count = result.rows.len(),
            execution_time_ms,
            "query executed"
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing PostgreSQL connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
