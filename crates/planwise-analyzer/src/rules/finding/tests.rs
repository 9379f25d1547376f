use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_create_index_sql_per_engine() {
    let change = SchemaChange::create_index("orders", vec!["customer_id".into(), "status".into()]);
    assert_eq!(
        change.to_sql(EngineKind::Postgresql),
        "CREATE INDEX idx_orders_customer_id_status ON orders (customer_id, status);"
    );
    assert_eq!(
        change.to_sql(EngineKind::Mysql),
        "CREATE INDEX idx_orders_customer_id_status ON orders (customer_id, status);"
    );
    assert_eq!(change.table(), "orders");
    assert!(change.is_reversible());
}

#[test]
fn test_drop_index_syntax_differs() {
    let change = SchemaChange::DropIndex {
        name: "idx_old".into(),
        table: "orders".into(),
        schema: None,
        definition: None,
    };
    assert_eq!(change.to_sql(EngineKind::Postgresql), "DROP INDEX idx_old;");
    assert_eq!(change.to_sql(EngineKind::Mysql), "DROP INDEX idx_old ON orders;");
}

#[test]
fn test_drop_index_is_schema_qualified() {
    let change = SchemaChange::DropIndex {
        name: "idx_old".into(),
        table: "orders".into(),
        schema: Some("billing".into()),
        definition: None,
    };
    assert_eq!(change.to_sql(EngineKind::Postgresql), "DROP INDEX billing.idx_old;");
    assert_eq!(
        change.to_sql(EngineKind::Mysql),
        "DROP INDEX idx_old ON billing.orders;"
    );
}

#[test]
fn test_drop_index_without_schema_deserializes() {
    let change: SchemaChange = serde_json::from_str(
        r#"{"kind":"drop_index","name":"idx_old","table":"orders","definition":null}"#,
    )
    .unwrap();
    assert_eq!(
        change,
        SchemaChange::DropIndex {
            name: "idx_old".into(),
            table: "orders".into(),
            schema: None,
            definition: None,
        }
    );
}

#[test]
fn test_analyze_is_not_reversible() {
    let change = SchemaChange::Analyze {
        tables: vec!["orders".into(), "customers".into()],
    };
    assert_eq!(change.to_sql(EngineKind::Postgresql), "ANALYZE orders, customers;");
    assert_eq!(change.to_sql(EngineKind::Mysql), "ANALYZE TABLE orders, customers;");
    assert!(!change.is_reversible());
}

#[test]
fn test_identifiers_needing_quotes() {
    let change = SchemaChange::create_index("Order Items", vec!["SKU".into()]);
    assert_eq!(
        change.to_sql(EngineKind::Mysql),
        "CREATE INDEX `idx_Order Items_SKU` ON `Order Items` (`SKU`);"
    );
}

#[test]
fn test_index_name_is_truncated() {
    let columns = vec!["a_really_long_column_name".to_string(); 4];
    let name = index_name("some_table", &columns);
    assert_eq!(name.len(), 63);
    assert!(name.starts_with("idx_some_table_a_really_long_column_name_"));
}

#[test]
fn test_target_display() {
    assert_eq!(
        Target::columns("orders", vec!["customer_id".into()]).to_string(),
        "orders(customer_id)"
    );
    assert_eq!(Target::index("orders", "idx_old").to_string(), "idx_old on orders");
    assert_eq!(Target::columns("orders", vec![]).to_string(), "orders");
}
