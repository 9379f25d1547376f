use super::*;
use pretty_assertions::assert_eq;

fn columns() -> Vec<String> {
    [
        "schema_name",
        "table_name",
        "index_name",
        "times_used",
        "size_bytes",
        "is_unique",
        "is_primary",
    ]
    .map(String::from)
    .to_vec()
}

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}

#[test]
fn test_postgres_rows() {
    let result = QueryResult::from_rows(
        columns(),
        vec![
            vec![
                text("public"),
                text("orders"),
                text("idx_orders_status"),
                Value::Int64(0),
                Value::Int64(16_777_216),
                Value::Bool(false),
                Value::Bool(false),
            ],
            vec![
                text("public"),
                text("orders"),
                text("orders_pkey"),
                Value::Int64(0),
                Value::Int64(8192),
                Value::Bool(true),
                Value::Bool(true),
            ],
        ],
    );

    let usage = usage_from_result(&result);
    assert_eq!(usage.len(), 2);

    let status = &usage[0];
    assert_eq!(status.schema.as_deref(), Some("public"));
    assert_eq!(status.index, "idx_orders_status");
    assert_eq!(status.times_used, 0);
    assert_eq!(status.size_bytes, Some(16_777_216));
    assert!(!status.is_constraint());
    assert!(status.observed_at.is_some());

    assert!(usage[1].is_primary);
    assert!(usage[1].is_constraint());
}

#[test]
fn test_mysql_rows_arrive_as_integers_and_text() {
    let result = QueryResult::from_rows(
        columns(),
        vec![
            vec![
                text("shop"),
                text("users"),
                text("uq_users_email"),
                Value::Int64(12),
                Value::Decimal("49152".into()),
                Value::Int64(1),
                Value::Int64(0),
            ],
            vec![
                text("shop"),
                text("users"),
                text("idx_users_created"),
                Value::Int64(0),
                Value::Null,
                Value::Int64(0),
                Value::Int64(0),
            ],
        ],
    );

    let usage = usage_from_result(&result);
    assert_eq!(usage[0].size_bytes, Some(49152));
    assert!(usage[0].is_unique);
    assert!(!usage[0].is_primary);
    assert_eq!(usage[1].size_bytes, None);
    assert!(!usage[1].is_constraint());
}

#[test]
fn test_rows_without_names_are_skipped() {
    let result = QueryResult::from_rows(
        columns(),
        vec![vec![
            text("shop"),
            Value::Null,
            text("idx"),
            Value::Int64(0),
            Value::Null,
            Value::Null,
            Value::Null,
        ]],
    );
    assert!(usage_from_result(&result).is_empty());
}

#[test]
fn test_queries_do_not_filter_on_usage() {
    assert!(!usage_query(EngineKind::Postgresql).contains("idx_scan = 0"));
    assert!(usage_query(EngineKind::Mysql).contains("count_star AS times_used"));
}
