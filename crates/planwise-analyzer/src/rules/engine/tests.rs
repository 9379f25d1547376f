use super::*;
use crate::explain::NodeKind;
use crate::features::extract_features;
use crate::rules::{MISSING_INDEX_RULE, MISSING_STATS_RULE, UNUSED_INDEX_RULE};
use pretty_assertions::assert_eq;

fn scan(table: &str, estimated: u64, actual: u64) -> PlanNode {
    PlanNode::new(NodeKind::SeqScan, "Seq Scan")
        .with_relation(table)
        .with_cost(0.0, 500.0)
        .with_rows(estimated)
        .with_actual_rows(actual)
}

fn two_scan_plan() -> PlanTree {
    let root = PlanNode::new(NodeKind::Append, "Append")
        .with_cost(0.0, 1000.0)
        .with_rows(2)
        .with_actual_rows(2)
        .with_child(scan("orders", 1, 900))
        .with_child(scan("orders", 1, 900));
    PlanTree::new(EngineKind::Postgresql, root)
}

#[test]
fn test_findings_follow_rule_declaration_order() {
    let features = extract_features("SELECT * FROM orders WHERE status = 'x'").unwrap();
    let findings = evaluate_rules(&two_scan_plan(), &features);

    let ids: Vec<&str> = findings.iter().map(|f| f.rule_id.as_str()).collect();
    assert_eq!(ids, vec![MISSING_INDEX_RULE, MISSING_STATS_RULE]);
}

#[test]
fn test_duplicate_actions_are_collapsed() {
    let features = extract_features("SELECT * FROM orders WHERE status = 'x'").unwrap();
    let findings = evaluate_rules(&two_scan_plan(), &features);

    let missing: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.rule_id == MISSING_INDEX_RULE)
        .collect();
    assert_eq!(missing.len(), 1);
    // the first scan in pre-order wins
    assert_eq!(missing[0].node_id, Some(1));
}

#[test]
fn test_evaluation_is_deterministic() {
    let features = extract_features("SELECT * FROM orders WHERE status = 'x'").unwrap();
    let plan = two_scan_plan();
    assert_eq!(evaluate_rules(&plan, &features), evaluate_rules(&plan, &features));
}

#[test]
fn test_disabled_rules_do_not_run() {
    let config = AdvisorConfig::new().with_disabled_rule(MISSING_STATS_RULE);
    let engine = RulesEngine::new(config);
    assert_eq!(
        engine.rule_ids(),
        vec!["MISSING_INDEX_001", "INEFFICIENT_SORT_001", "NESTED_LOOP_001"]
    );

    let features = extract_features("SELECT * FROM orders WHERE status = 'x'").unwrap();
    let findings = engine.evaluate(&two_scan_plan(), &features);
    assert!(findings.iter().all(|f| f.rule_id != MISSING_STATS_RULE));
}

#[test]
fn test_custom_rule_set() {
    struct EveryScan;

    impl Rule for EveryScan {
        fn id(&self) -> &'static str {
            "EVERY_SCAN"
        }

        fn category(&self) -> Category {
            Category::MissingIndex
        }

        fn check(
            &self,
            node: &PlanNode,
            ancestors: &[&PlanNode],
            _ctx: &RuleContext<'_>,
        ) -> Option<Finding> {
            let relation = node.relation.clone()?;
            let change = crate::rules::SchemaChange::Analyze {
                tables: vec![relation.clone()],
            };
            Some(Finding {
                rule_id: self.id().to_string(),
                category: self.category(),
                target: crate::rules::Target::columns(relation, vec![]),
                rationale: format!("depth {}", ancestors.len()),
                suggested_action: format!("-- node {}", node.id),
                change,
                node_id: Some(node.id),
                evidence: Default::default(),
                caveats: vec![],
            })
        }
    }

    let engine = RulesEngine::with_rules(vec![Box::new(EveryScan)], AdvisorConfig::default());
    let features = extract_features("SELECT * FROM orders").unwrap();
    let findings = engine.evaluate(&two_scan_plan(), &features);

    let rationales: Vec<&str> = findings.iter().map(|f| f.rationale.as_str()).collect();
    assert_eq!(rationales, vec!["depth 1", "depth 1"]);
}

#[test]
fn test_index_usage_snapshot() {
    let usage = vec![
        IndexUsage::new("orders", "idx_a", 0),
        IndexUsage::new("orders", "idx_b", 3),
        IndexUsage::new("orders", "orders_pkey", 0).primary(),
        IndexUsage::new("orders", "idx_a", 0),
    ];

    let findings = evaluate_index_usage(&usage, EngineKind::Postgresql);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].rule_id, UNUSED_INDEX_RULE);
    assert_eq!(findings[0].suggested_action, "DROP INDEX idx_a;");

    let disabled = RulesEngine::new(AdvisorConfig::new().with_disabled_rule(UNUSED_INDEX_RULE));
    assert!(disabled.evaluate_index_usage(&usage, EngineKind::Postgresql).is_empty());
}
