use super::*;
use planwise_analyzer::{
    Assessment, Category, Evidence, Finding, ImpactTier, MISSING_INDEX_RULE, PlanSummary,
    SchemaChange, Target, TimingSample,
};
use planwise_core::EngineKind;

fn scored() -> ScoredFinding {
    let change = SchemaChange::create_index("orders", vec!["customer_id".to_string()]);
    ScoredFinding {
        finding: Finding {
            rule_id: MISSING_INDEX_RULE.to_string(),
            category: Category::MissingIndex,
            target: Target::columns("orders", vec!["customer_id".to_string()]),
            rationale: String::new(),
            suggested_action: change.to_sql(EngineKind::Postgresql),
            change,
            node_id: Some(0),
            evidence: Evidence::default(),
            caveats: Vec::new(),
        },
        confidence: 0.874,
        impact: ImpactTier::High,
        cost_share: Some(1.0),
        notes: Vec::new(),
    }
}

fn summary(total_cost: f64) -> PlanSummary {
    PlanSummary {
        root: "Seq Scan".to_string(),
        total_cost,
        node_count: 1,
        scans: Vec::new(),
        execution_time_ms: None,
        malformed: false,
    }
}

#[test]
fn test_findings_table() {
    let rendered = findings_table(&[scored()]).to_string();
    assert!(rendered.contains("HIGH"));
    assert!(rendered.contains("0.87"));
    assert!(rendered.contains("orders(customer_id)"));
    assert!(rendered.contains("MISSING_INDEX_001"));
}

#[test]
fn test_usage_table_marks_constraints() {
    let usage = vec![
        IndexUsage::new("orders", "orders_pkey", 0)
            .with_schema("public")
            .primary(),
        IndexUsage::new("orders", "idx_orders_status", 0).with_size_bytes(16 * 1024 * 1024),
    ];
    let rendered = usage_table(&usage).to_string();
    assert!(rendered.contains("public.orders"));
    assert!(rendered.contains("primary"));
    assert!(rendered.contains("16 MB"));
}

#[test]
fn test_evidence_table_shows_both_phases() {
    let evidence = ValidatedEvidence {
        rule_id: MISSING_INDEX_RULE.to_string(),
        applied: "CREATE INDEX idx_orders_customer_id ON orders (customer_id);".to_string(),
        reverted_with: "DROP INDEX idx_orders_customer_id;".to_string(),
        before: summary(1887.0),
        after: summary(8.45),
        before_time: TimingSample {
            first_run_ms: 11.0,
            mean_ms: 10.0,
            runs: 3,
        },
        after_time: TimingSample {
            first_run_ms: 2.5,
            mean_ms: 2.0,
            runs: 3,
        },
        improvement_pct: 80.0,
        cost_change_pct: Some(99.55),
        plan_improved: true,
        assessment: Assessment::Excellent,
        reverted: true,
    };
    let rendered = evidence_table(&evidence).to_string();
    assert!(rendered.contains("before"));
    assert!(rendered.contains("10.000"));
    assert!(rendered.contains("8.45"));
}
