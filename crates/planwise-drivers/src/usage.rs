//! Index usage snapshots
//!
//! Counters are cumulative since the engine last reset its statistics, so
//! a zero only means "unused since then". Every index is returned; deciding
//! what is unused belongs to the rules.

use chrono::Utc;
use planwise_core::{Connection, EngineKind, IndexUsage, QueryResult, Result, Row, Value};

const POSTGRES_USAGE_QUERY: &str = "\
SELECT s.schemaname::text AS schema_name,
       s.relname::text AS table_name,
       s.indexrelname::text AS index_name,
       s.idx_scan AS times_used,
       pg_relation_size(s.indexrelid) AS size_bytes,
       i.indisunique AS is_unique,
       i.indisprimary AS is_primary
FROM pg_stat_user_indexes s
JOIN pg_index i ON i.indexrelid = s.indexrelid
ORDER BY s.schemaname, s.relname, s.indexrelname";

const MYSQL_USAGE_QUERY: &str = "\
SELECT io.object_schema AS schema_name,
       io.object_name AS table_name,
       io.index_name AS index_name,
       io.count_star AS times_used,
       MAX(ist.stat_value) * @@innodb_page_size AS size_bytes,
       MIN(st.non_unique) = 0 AS is_unique,
       io.index_name = 'PRIMARY' AS is_primary
FROM performance_schema.table_io_waits_summary_by_index_usage io
JOIN information_schema.statistics st
  ON st.table_schema = io.object_schema
 AND st.table_name = io.object_name
 AND st.index_name = io.index_name
LEFT JOIN mysql.innodb_index_stats ist
  ON ist.database_name = io.object_schema
 AND ist.table_name = io.object_name
 AND ist.index_name = io.index_name
 AND ist.stat_name = 'size'
WHERE io.index_name IS NOT NULL
  AND io.object_schema = DATABASE()
GROUP BY io.object_schema, io.object_name, io.index_name, io.count_star
ORDER BY io.object_schema, io.object_name, io.index_name";

/// The snapshot query for an engine
pub fn usage_query(engine: EngineKind) -> &'static str {
    match engine {
        EngineKind::Postgresql => POSTGRES_USAGE_QUERY,
        EngineKind::Mysql => MYSQL_USAGE_QUERY,
    }
}

/// Reads usage counters for every user index the connection can see
#[tracing::instrument(skip(connection), fields(engine = %connection.engine()))]
pub async fn collect_index_usage(connection: &dyn Connection) -> Result<Vec<IndexUsage>> {
    let result = connection
        .query(usage_query(connection.engine()), &[])
        .await?;
    let usage = usage_from_result(&result);
    tracing::info!(
        indexes = usage.len(),
        unused = usage.iter().filter(|u| u.times_used == 0).count(),
        "collected index usage"
    );
    Ok(usage)
}

/// Maps snapshot rows to records, skipping rows without a table or index name
pub fn usage_from_result(result: &QueryResult) -> Vec<IndexUsage> {
    let observed_at = Utc::now();
    result
        .rows
        .iter()
        .filter_map(usage_from_row)
        .map(|mut usage| {
            usage.observed_at = Some(observed_at);
            usage
        })
        .collect()
}

fn usage_from_row(row: &Row) -> Option<IndexUsage> {
    let table = row.get_str("table_name")?;
    let index = row.get_str("index_name")?;
    let times_used = row
        .get_by_name("times_used")
        .and_then(Value::as_i64)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);

    let mut usage = IndexUsage::new(table, index, times_used);
    if let Some(schema) = row.get_str("schema_name") {
        usage = usage.with_schema(schema);
    }
    if let Some(size) = row
        .get_by_name("size_bytes")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .and_then(|n| u64::try_from(n).ok())
    {
        usage = usage.with_size_bytes(size);
    }
    if flag(row, "is_primary") {
        usage = usage.primary();
    } else if flag(row, "is_unique") {
        usage = usage.unique();
    }
    Some(usage)
}

fn flag(row: &Row, column: &str) -> bool {
    row.get_by_name(column)
        .and_then(|v| v.as_bool().or_else(|| v.as_i64().map(|n| n != 0)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests;
