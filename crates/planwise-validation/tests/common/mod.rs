//! An in-memory stand-in for a database the harness can trial changes on

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use planwise_analyzer::{
    Category, Evidence, Finding, MISSING_INDEX_RULE, SchemaChange, Target, UNUSED_INDEX_RULE,
};
use planwise_core::{Connection, EngineKind, PlanwiseError, QueryResult, StatementResult, Value};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

pub const ORDERS_QUERY: &str = "SELECT * FROM orders WHERE customer_id = 42";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIndex {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub definition: String,
}

/// Tracks indexes, records every statement and fails statements on request.
///
/// Indexes created in a named schema are keyed `schema.name`. EXPLAIN
/// reports a sequential scan of `orders` until an index exists on it, then
/// an index scan.
pub struct FakeDatabase {
    engine: EngineKind,
    indexes: Mutex<BTreeMap<String, FakeIndex>>,
    log: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    failing_while_indexed: Mutex<Vec<String>>,
    cancel_on_apply: Mutex<Option<CancellationToken>>,
    stall_while_indexed: AtomicBool,
    hold_drops: AtomicBool,
}

impl FakeDatabase {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            indexes: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            failing_while_indexed: Mutex::new(Vec::new()),
            cancel_on_apply: Mutex::new(None),
            stall_while_indexed: AtomicBool::new(false),
            hold_drops: AtomicBool::new(false),
        }
    }

    pub fn with_index(self, name: &str, table: &str, columns: &[&str]) -> Self {
        self.insert_index(None, name, table, columns)
    }

    /// An index on `schema.table`
    pub fn with_index_in(self, schema: &str, name: &str, table: &str, columns: &[&str]) -> Self {
        self.insert_index(Some(schema), name, table, columns)
    }

    fn insert_index(self, schema: Option<&str>, name: &str, table: &str, columns: &[&str]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let relation = match schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table.to_string(),
        };
        let definition = format!("CREATE INDEX {name} ON {relation} ({})", columns.join(", "));
        self.indexes.lock().insert(
            index_key(schema, name),
            FakeIndex {
                schema: schema.map(str::to_string),
                table: table.to_string(),
                columns,
                definition,
            },
        );
        self
    }

    /// Every statement containing `pattern` fails from now on
    pub fn fail_on(&self, pattern: &str) {
        self.failing.lock().push(pattern.to_string());
    }

    /// Statements containing `pattern` fail while `orders` has an index
    pub fn fail_while_indexed(&self, pattern: &str) {
        self.failing_while_indexed.lock().push(pattern.to_string());
    }

    /// Queries never return while `orders` has an index
    pub fn stall_while_indexed(&self) {
        self.stall_while_indexed.store(true, Ordering::SeqCst);
    }

    /// DROP INDEX statements wait until [`FakeDatabase::release_drops`]
    pub fn hold_drops(&self) {
        self.hold_drops.store(true, Ordering::SeqCst);
    }

    pub fn release_drops(&self) {
        self.hold_drops.store(false, Ordering::SeqCst);
    }

    /// Cancels `token` as soon as a CREATE INDEX succeeds
    pub fn cancel_on_apply(&self, token: CancellationToken) {
        *self.cancel_on_apply.lock() = Some(token);
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.lock().keys().cloned().collect()
    }

    pub fn schema(&self) -> BTreeMap<String, FakeIndex> {
        self.indexes.lock().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Statements that changed (or tried to change) the schema
    pub fn ddl(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("CREATE") || s.starts_with("DROP"))
            .collect()
    }

    fn check_failure(&self, sql: &str) -> Result<(), PlanwiseError> {
        if self.failing.lock().iter().any(|p| sql.contains(p.as_str())) {
            return Err(PlanwiseError::Query(format!("injected failure: {sql}")));
        }
        let indexed = self.orders_index().is_some();
        if indexed
            && self
                .failing_while_indexed
                .lock()
                .iter()
                .any(|p| sql.contains(p.as_str()))
        {
            return Err(PlanwiseError::Query(format!("injected failure: {sql}")));
        }
        Ok(())
    }

    fn create_index(&self, sql: &str) -> Result<(), PlanwiseError> {
        let head = sql.split('(').next().unwrap_or_default();
        let words: Vec<&str> = head.split_whitespace().collect();
        let on = words
            .iter()
            .position(|w| w.eq_ignore_ascii_case("ON"))
            .ok_or_else(|| PlanwiseError::Query(format!("syntax error: {sql}")))?;
        let name = unquote(words[on - 1]);
        let (schema, table) = split_qualified(words.get(on + 1).copied().unwrap_or_default());
        let columns = sql
            .split_once('(')
            .and_then(|(_, rest)| rest.rsplit_once(')'))
            .map(|(cols, _)| cols.split(',').map(|c| unquote(c.trim())).collect())
            .unwrap_or_default();

        let key = index_key(schema.as_deref(), &name);
        let mut indexes = self.indexes.lock();
        if indexes.contains_key(&key) {
            return Err(PlanwiseError::Query(format!(
                "relation \"{key}\" already exists"
            )));
        }
        indexes.insert(
            key,
            FakeIndex {
                schema,
                table,
                columns,
                definition: sql.trim_end_matches(';').to_string(),
            },
        );
        Ok(())
    }

    /// `DROP INDEX [schema.]name` or `DROP INDEX name ON [schema.]table`
    fn drop_index(&self, sql: &str) -> Result<(), PlanwiseError> {
        let words: Vec<&str> = sql.trim_end_matches(';').split_whitespace().collect();
        let (schema, name) = split_qualified(words.get(2).copied().unwrap_or_default());
        let schema = schema.or_else(|| {
            words
                .get(4)
                .and_then(|table| split_qualified(table).0)
        });
        let key = index_key(schema.as_deref(), &name);
        self.indexes
            .lock()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| PlanwiseError::Query(format!("index \"{key}\" does not exist")))
    }

    fn orders_index(&self) -> Option<String> {
        self.indexes
            .lock()
            .iter()
            .find(|(_, idx)| idx.table == "orders")
            .map(|(name, _)| name.clone())
    }

    fn explain(&self) -> QueryResult {
        let index = self.orders_index();
        let payload = match (self.engine, index) {
            (EngineKind::Postgresql, None) => json!([{
                "Plan": {
                    "Node Type": "Seq Scan",
                    "Relation Name": "orders",
                    "Alias": "orders",
                    "Startup Cost": 0.0,
                    "Total Cost": 1887.0,
                    "Plan Rows": 10,
                    "Actual Rows": 10,
                    "Actual Loops": 1,
                    "Filter": "(customer_id = 42)",
                    "Rows Removed by Filter": 99990
                },
                "Planning Time": 0.1,
                "Execution Time": 10.0
            }]),
            (EngineKind::Postgresql, Some(index)) => json!([{
                "Plan": {
                    "Node Type": "Index Scan",
                    "Relation Name": "orders",
                    "Alias": "orders",
                    "Index Name": index,
                    "Startup Cost": 0.29,
                    "Total Cost": 8.45,
                    "Plan Rows": 10,
                    "Actual Rows": 10,
                    "Actual Loops": 1,
                    "Index Cond": "(customer_id = 42)"
                },
                "Planning Time": 0.1,
                "Execution Time": 2.0
            }]),
            (EngineKind::Mysql, None) => json!({
                "query_block": {
                    "select_id": 1,
                    "cost_info": { "query_cost": "10075.25" },
                    "table": {
                        "table_name": "orders",
                        "access_type": "ALL",
                        "rows_examined_per_scan": 100000,
                        "filtered": "0.01",
                        "cost_info": { "read_cost": "75.25", "eval_cost": "10000.00" },
                        "attached_condition": "(`shop`.`orders`.`customer_id` = 42)"
                    }
                }
            }),
            (EngineKind::Mysql, Some(index)) => json!({
                "query_block": {
                    "select_id": 1,
                    "cost_info": { "query_cost": "3.50" },
                    "table": {
                        "table_name": "orders",
                        "access_type": "ref",
                        "key": index,
                        "used_key_parts": ["customer_id"],
                        "rows_examined_per_scan": 10,
                        "filtered": "100.00",
                        "cost_info": { "read_cost": "2.50", "eval_cost": "1.00" }
                    }
                }
            }),
        };
        let cell = match self.engine {
            EngineKind::Postgresql => Value::Json(payload),
            EngineKind::Mysql => Value::String(payload.to_string()),
        };
        QueryResult::from_rows(vec!["EXPLAIN".to_string()], vec![vec![cell]])
    }

    /// Like the catalogs, an unfiltered lookup returns whichever schema's
    /// index comes first
    fn definition_rows(&self, params: &[Value]) -> QueryResult {
        let name = params.get(1).and_then(Value::as_str).unwrap_or_default();
        let schema = params.get(2).and_then(Value::as_str);
        let indexes = self.indexes.lock();
        let found = indexes.iter().find(|(key, index)| {
            key.rsplit('.').next() == Some(name)
                && schema.is_none_or(|s| index.schema.as_deref() == Some(s))
        });
        let Some((_, index)) = found else {
            return QueryResult::empty();
        };
        match self.engine {
            EngineKind::Postgresql => QueryResult::from_rows(
                vec!["indexdef".to_string()],
                vec![vec![Value::String(index.definition.clone())]],
            ),
            EngineKind::Mysql => QueryResult::from_rows(
                ["column_name", "sub_part", "non_unique", "index_type"]
                    .map(String::from)
                    .to_vec(),
                index
                    .columns
                    .iter()
                    .map(|c| {
                        vec![
                            Value::String(c.clone()),
                            Value::Null,
                            Value::Int64(1),
                            Value::String("BTREE".to_string()),
                        ]
                    })
                    .collect(),
            ),
        }
    }
}

fn index_key(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{schema}.{name}"),
        None => name.to_string(),
    }
}

fn split_qualified(ident: &str) -> (Option<String>, String) {
    match ident.split_once('.') {
        Some((schema, name)) => (Some(unquote(schema)), unquote(name)),
        None => (None, unquote(ident)),
    }
}

fn unquote(ident: &str) -> String {
    ident
        .trim_matches(|c| c == '"' || c == '`' || c == ';')
        .to_string()
}

#[async_trait]
impl Connection for FakeDatabase {
    fn driver_name(&self) -> &str {
        self.engine.id()
    }

    fn engine(&self) -> EngineKind {
        self.engine
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> planwise_core::Result<StatementResult> {
        tokio::task::yield_now().await;
        self.log.lock().push(sql.to_string());
        self.check_failure(sql)?;

        let upper = sql.trim_start().to_uppercase();
        if upper.starts_with("CREATE") {
            self.create_index(sql)?;
            if let Some(token) = self.cancel_on_apply.lock().as_ref() {
                token.cancel();
            }
        } else if upper.starts_with("DROP INDEX") {
            while self.hold_drops.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            self.drop_index(sql)?;
        }
        Ok(StatementResult::command(0, 0.5))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> planwise_core::Result<QueryResult> {
        tokio::task::yield_now().await;
        self.log.lock().push(sql.to_string());
        self.check_failure(sql)?;
        if self.stall_while_indexed.load(Ordering::SeqCst) && self.orders_index().is_some() {
            std::future::pending::<()>().await;
        }

        if sql.starts_with("EXPLAIN") {
            Ok(self.explain())
        } else if sql.contains("pg_indexes") || sql.contains("information_schema.statistics") {
            Ok(self.definition_rows(params))
        } else {
            Ok(QueryResult::empty())
        }
    }

    async fn close(&self) -> planwise_core::Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

pub fn finding(rule_id: &str, category: Category, target: Target, change: SchemaChange) -> Finding {
    Finding {
        rule_id: rule_id.to_string(),
        category,
        target,
        rationale: String::new(),
        suggested_action: String::new(),
        change,
        node_id: Some(0),
        evidence: Evidence::default(),
        caveats: Vec::new(),
    }
}

pub fn create_index_finding(engine: EngineKind) -> Finding {
    let change = SchemaChange::create_index("orders", vec!["customer_id".to_string()]);
    let mut finding = finding(
        MISSING_INDEX_RULE,
        Category::MissingIndex,
        Target::columns("orders", vec!["customer_id".to_string()]),
        change,
    );
    finding.suggested_action = finding.change.to_sql(engine);
    finding
}

pub fn drop_index_finding(name: &str) -> Finding {
    schema_drop_index_finding(None, name)
}

pub fn schema_drop_index_finding(schema: Option<&str>, name: &str) -> Finding {
    let mut finding = finding(
        UNUSED_INDEX_RULE,
        Category::UnusedIndexCandidate,
        Target::index("orders", name),
        SchemaChange::DropIndex {
            name: name.to_string(),
            table: "orders".to_string(),
            schema: schema.map(str::to_string),
            definition: None,
        },
    );
    finding.node_id = None;
    finding
}
