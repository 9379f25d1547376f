use super::*;
use crate::explain::PlanNode;
use crate::features::extract_features;
use planwise_core::EngineKind;
use pretty_assertions::assert_eq;

fn join_plan() -> PlanTree {
    let root = PlanNode::new(NodeKind::HashJoin, "Hash Join")
        .with_cost(30.0, 2300.0)
        .with_child(
            PlanNode::new(NodeKind::SeqScan, "ALL")
                .with_relation("o")
                .with_cost(0.0, 2000.0),
        )
        .with_child(
            PlanNode::new(NodeKind::Hash, "Hash").with_cost(25.0, 25.0).with_child(
                PlanNode::new(NodeKind::IndexScan, "eq_ref")
                    .with_relation("c")
                    .with_index("PRIMARY")
                    .with_cost(0.0, 25.0),
            ),
        );
    PlanTree::new(EngineKind::Mysql, root).with_execution_time(4.5)
}

#[test]
fn test_summary_figures() {
    let summary = PlanSummary::from_tree(&join_plan());

    assert_eq!(summary.root, "Hash Join");
    assert_eq!(summary.total_cost, 2300.0);
    assert_eq!(summary.node_count, 4);
    assert_eq!(summary.execution_time_ms, Some(4.5));
    assert!(!summary.malformed);
    assert_eq!(summary.full_scans(), vec!["o"]);
    assert_eq!(summary.access_paths(), "ALL on o; eq_ref on c using PRIMARY");
}

#[test]
fn test_aliases_resolve_to_tables() {
    let features =
        extract_features("SELECT * FROM orders o JOIN customers c ON c.id = o.customer_id")
            .unwrap();
    let summary = PlanSummary::from_tree(&join_plan()).resolve_relations(&features);

    assert_eq!(summary.full_scans(), vec!["orders"]);
    assert!(summary.has_full_scan_on("orders"));
    assert!(summary.has_index_access_on("customers"));
    assert!(!summary.has_index_access_on("orders"));
}
