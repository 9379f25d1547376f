//! MySQL connection

use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row as MySqlRow};
use planwise_core::{
    ColumnMeta, Connection, EngineKind, PlanwiseError, QueryResult, Result, Row, StatementResult,
    Value,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// One MySQL session.
///
/// The pool is pinned to a single connection that is never reset between
/// checkouts, so a transaction opened by one statement is still open for
/// the next.
pub struct MySqlConnection {
    pool: Pool,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Connect with a `mysql://` URL
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| PlanwiseError::Configuration(format!("invalid MySQL URL: {e}")))?;
        tracing::info!(
            host = %opts.ip_or_hostname(),
            port = opts.tcp_port(),
            database = ?opts.db_name(),
            "connecting to MySQL database"
        );

        let constraints = PoolConstraints::new(1, 1).ok_or_else(|| {
            PlanwiseError::Connection(
                "Failed to configure MySQL pool constraints (min=1, max=1)".into(),
            )
        })?;
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            .with_reset_connection(false);
        let pool = Pool::new(OptsBuilder::from_opts(opts).pool_opts(pool_opts));

        // Fail here rather than on the first statement
        drop(pool.get_conn().await.map_err(|e| {
            PlanwiseError::Connection(format!("Failed to connect to MySQL: {e}"))
        })?);

        tracing::info!("MySQL connection established");
        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }

    async fn get_conn(&self) -> Result<Conn> {
        if self.is_closed() {
            return Err(PlanwiseError::Connection("connection is closed".into()));
        }
        self.pool
            .get_conn()
            .await
            .map_err(|e| PlanwiseError::Connection(format!("Failed to get MySQL connection: {e}")))
    }
}

fn to_mysql_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|value| match value {
                Value::Null => mysql_async::Value::NULL,
                Value::Bool(v) => mysql_async::Value::Int(i64::from(*v)),
                Value::Int32(v) => mysql_async::Value::Int(i64::from(*v)),
                Value::Int64(v) => mysql_async::Value::Int(*v),
                Value::Float64(v) => mysql_async::Value::Double(*v),
                Value::Decimal(v) | Value::String(v) => mysql_async::Value::Bytes(v.clone().into_bytes()),
                Value::Bytes(v) => mysql_async::Value::Bytes(v.clone()),
                Value::Json(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
            })
            .collect(),
    )
}

/// Converts a MySQL value, using the column type to interpret the byte
/// strings of the text protocol
fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int64(i),
            Err(_) => Value::Decimal(u.to_string()),
        },
        mysql_async::Value::Float(f) => Value::Float64(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                Value::String(format!("{year:04}-{month:02}-{day:02}"))
            } else {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{min:02}:{sec:02}"
                ))
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = days * 24 + u32::from(hours);
            let sign = if negative { "-" } else { "" };
            Value::String(format!(
                "{sign}{total_hours:02}:{mins:02}:{secs:02}.{micros:06}"
            ))
        }
    }
}

fn convert_rows(mysql_rows: Vec<MySqlRow>) -> (Vec<ColumnMeta>, Vec<Row>) {
    let Some(first_row) = mysql_rows.first() else {
        return (Vec::new(), Vec::new());
    };
    let column_names: Vec<String> = first_row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let column_types: Vec<ColumnType> = first_row
        .columns_ref()
        .iter()
        .map(|c| c.column_type())
        .collect();
    let columns = first_row
        .columns_ref()
        .iter()
        .enumerate()
        .map(|(ordinal, col)| ColumnMeta {
            name: col.name_str().to_string(),
            data_type: format!("{:?}", col.column_type()),
            ordinal,
        })
        .collect();

    let rows = mysql_rows
        .into_iter()
        .map(|mysql_row| {
            let values = column_types
                .iter()
                .enumerate()
                .map(|(idx, col_type)| {
                    let val = mysql_row.get(idx).unwrap_or(mysql_async::Value::NULL);
                    mysql_value_to_value(val, *col_type)
                })
                .collect();
            Row::new(column_names.clone(), values)
        })
        .collect();
    (columns, rows)
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Mysql
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let start_time = Instant::now();
        let mut conn = self.get_conn().await?;

        let outcome = if params.is_empty() {
            conn.query_drop(sql).await
        } else {
            conn.exec_drop(sql, to_mysql_params(params)).await
        };
        outcome.map_err(|e| PlanwiseError::Query(format!("Failed to execute statement: {e}")))?;

        let affected_rows = conn.affected_rows();
        tracing::debug!(affected_rows, "statement executed");
        Ok(StatementResult::command(
            affected_rows,
            start_time.elapsed().as_secs_f64() * 1000.0,
        ))
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = Instant::now();
        let mut conn = self.get_conn().await?;

        // EXPLAIN FORMAT=JSON is not preparable, so only bound queries use
        // the binary protocol.
        let outcome: std::result::Result<Vec<MySqlRow>, _> = if params.is_empty() {
            conn.query(sql).await
        } else {
            conn.exec(sql, to_mysql_params(params)).await
        };
        let mysql_rows =
            outcome.map_err(|e| PlanwiseError::Query(format!("Failed to execute query: {e}")))?;

        let (columns, rows) = convert_rows(mysql_rows);
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
        tracing::info!("closing MySQL connection pool");
        self.closed.store(true, Ordering::SeqCst);
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| PlanwiseError::Connection(format!("Failed to close MySQL connection: {e}")))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
