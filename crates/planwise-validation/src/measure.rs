//! Running the analyzed query and capturing its plan and timing

use crate::error::HarnessErrorKind;
use planwise_analyzer::{PlanTree, RawPlan, TimingSample, normalize};
use planwise_core::{Connection, EngineKind, Value};
use std::time::Instant;

/// One run of the query
#[derive(Debug, Clone)]
pub struct Measurement {
    pub plan: PlanTree,
    pub elapsed_ms: f64,
}

/// Every run of one phase, with the plan of the first
#[derive(Debug, Clone)]
pub struct MeasurementSeries {
    pub plan: PlanTree,
    pub timing: TimingSample,
}

/// The EXPLAIN statement used to capture a plan for `sql`
pub fn explain_statement(engine: EngineKind, sql: &str) -> String {
    let sql = sql.trim().trim_end_matches(';');
    match engine {
        EngineKind::Postgresql => format!("EXPLAIN (ANALYZE, FORMAT JSON) {sql}"),
        EngineKind::Mysql => format!("EXPLAIN FORMAT=JSON {sql}"),
    }
}

/// Runs the query once.
///
/// PostgreSQL reports the execution time inside its EXPLAIN ANALYZE
/// output. MySQL's EXPLAIN does not execute, so the query itself is timed
/// on the wall clock. Statements that write are wrapped in a transaction
/// that is always rolled back.
pub async fn measure_once(
    connection: &dyn Connection,
    sql: &str,
    read_only: bool,
) -> Result<Measurement, HarnessErrorKind> {
    if read_only {
        return run_measurement(connection, sql).await;
    }

    connection
        .execute("BEGIN", &[])
        .await
        .map_err(|e| HarnessErrorKind::statement("BEGIN", e))?;
    let measured = run_measurement(connection, sql).await;
    let rolled_back = connection
        .execute("ROLLBACK", &[])
        .await
        .map_err(|e| HarnessErrorKind::statement("ROLLBACK", e));
    let measurement = measured?;
    rolled_back?;
    Ok(measurement)
}

async fn run_measurement(
    connection: &dyn Connection,
    sql: &str,
) -> Result<Measurement, HarnessErrorKind> {
    let engine = connection.engine();
    let explain = explain_statement(engine, sql);
    let result = connection
        .query(&explain, &[])
        .await
        .map_err(|e| HarnessErrorKind::statement(&explain, e))?;
    let plan = normalize(engine, &RawPlan::from_query_result(&result)?)?;

    let elapsed_ms = match (engine, plan.execution_time_ms) {
        (EngineKind::Postgresql, Some(ms)) => ms,
        (EngineKind::Postgresql, None) => result.execution_time_ms,
        (EngineKind::Mysql, _) => {
            let started = Instant::now();
            connection
                .query(sql, &[])
                .await
                .map_err(|e| HarnessErrorKind::statement(sql, e))?;
            started.elapsed().as_secs_f64() * 1000.0
        }
    };

    Ok(Measurement { plan, elapsed_ms })
}

/// Runs the query `runs` times, keeping the first plan and every timing
#[tracing::instrument(skip(connection, sql), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
pub async fn measure_series(
    connection: &dyn Connection,
    sql: &str,
    read_only: bool,
    runs: u32,
) -> Result<MeasurementSeries, HarnessErrorKind> {
    let first = measure_once(connection, sql, read_only).await?;
    let mut timings = vec![first.elapsed_ms];
    for _ in 1..runs.max(1) {
        timings.push(measure_once(connection, sql, read_only).await?.elapsed_ms);
    }
    tracing::debug!(runs = timings.len(), first_ms = first.elapsed_ms, "measured");

    let timing = TimingSample::from_runs(&timings).unwrap_or(TimingSample {
        first_run_ms: first.elapsed_ms,
        mean_ms: first.elapsed_ms,
        runs: 1,
    });
    Ok(MeasurementSeries {
        plan: first.plan,
        timing,
    })
}

/// Reads the statement that recreates an existing index.
///
/// PostgreSQL stores it verbatim in `pg_indexes`. MySQL has no such column,
/// so the statement is rebuilt from `information_schema.statistics`. Without
/// a `schema` the lookup is limited to the search path (PostgreSQL) or the
/// current database (MySQL).
pub async fn index_definition(
    connection: &dyn Connection,
    schema: Option<&str>,
    table: &str,
    index: &str,
) -> Result<String, HarnessErrorKind> {
    let engine = connection.engine();
    let mut params = vec![Value::String(table.to_string()), Value::String(index.to_string())];
    if let Some(schema) = schema {
        params.push(Value::String(schema.to_string()));
    }
    let qualified_table = match schema {
        Some(schema) => format!("{}.{}", engine.quote_ident(schema), engine.quote_ident(table)),
        None => engine.quote_ident(table),
    };
    let missing = || HarnessErrorKind::MissingDefinition {
        table: qualified_table.clone(),
        index: index.to_string(),
    };

    match engine {
        EngineKind::Postgresql => {
            let sql = match schema {
                Some(_) => {
                    "SELECT indexdef FROM pg_indexes \
                     WHERE tablename = $1 AND indexname = $2 AND schemaname = $3"
                }
                None => {
                    "SELECT indexdef FROM pg_indexes \
                     WHERE tablename = $1 AND indexname = $2 \
                     AND schemaname = ANY (current_schemas(false))"
                }
            };
            let result = connection
                .query(sql, &params)
                .await
                .map_err(|e| HarnessErrorKind::statement(sql, e))?;
            result
                .first_value()
                .and_then(Value::as_str)
                .map(|def| format!("{def};"))
                .ok_or_else(missing)
        }
        EngineKind::Mysql => {
            let sql = match schema {
                Some(_) => {
                    "SELECT column_name, sub_part, non_unique, index_type \
                     FROM information_schema.statistics \
                     WHERE table_name = ? AND index_name = ? AND table_schema = ? \
                     ORDER BY seq_in_index"
                }
                None => {
                    "SELECT column_name, sub_part, non_unique, index_type \
                     FROM information_schema.statistics \
                     WHERE table_name = ? AND index_name = ? AND table_schema = DATABASE() \
                     ORDER BY seq_in_index"
                }
            };
            let result = connection
                .query(sql, &params)
                .await
                .map_err(|e| HarnessErrorKind::statement(sql, e))?;
            let first = result.rows.first().ok_or_else(missing)?;

            let columns: Vec<String> = result
                .rows
                .iter()
                .filter_map(|row| {
                    let column = engine.quote_ident(row.get_str("column_name")?);
                    Some(match row.get_by_name("sub_part").and_then(Value::as_i64) {
                        Some(prefix) => format!("{column}({prefix})"),
                        None => column,
                    })
                })
                .collect();
            if columns.is_empty() {
                return Err(missing());
            }

            let kind = match first.get_str("index_type") {
                Some(t) if t.eq_ignore_ascii_case("FULLTEXT") => "FULLTEXT ",
                Some(t) if t.eq_ignore_ascii_case("SPATIAL") => "SPATIAL ",
                _ => match first.get_by_name("non_unique").and_then(Value::as_i64) {
                    Some(0) => "UNIQUE ",
                    _ => "",
                },
            };
            Ok(format!(
                "CREATE {kind}INDEX {} ON {} ({});",
                engine.quote_ident(index),
                qualified_table,
                columns.join(", ")
            ))
        }
    }
}
