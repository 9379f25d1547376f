//! PostgreSQL EXPLAIN (FORMAT JSON) normalization
//!
//! The payload is an array with one object holding a recursive "Plan" plus
//! optional "Planning Time" / "Execution Time" (already in milliseconds).

use crate::explain::normalize::{
    PlanParseError, Result, json_f64, json_rows, json_str, json_strings,
};
use crate::explain::plan::{JoinType, NodeCost, NodeKind, PlanNode, PlanTree};
use planwise_core::EngineKind;
use serde_json::Value;

/// Parses a PostgreSQL JSON EXPLAIN document
pub fn parse_json_explain(value: &Value) -> Result<PlanTree> {
    // Some clients unwrap the outer array, so accept a bare object as well
    let top = match value.as_array() {
        Some(arr) => arr.first().ok_or(PlanParseError::Empty)?,
        None => value,
    };
    let plan_obj = top.get("Plan").ok_or(PlanParseError::MissingRoot("Plan"))?;

    let root = parse_plan_node(plan_obj)?;
    let mut tree = PlanTree::new(EngineKind::Postgresql, root);

    if let Some(planning) = json_f64(top.get("Planning Time")) {
        tree = tree.with_planning_time(planning);
    }
    if let Some(execution) = json_f64(top.get("Execution Time")) {
        tree = tree.with_execution_time(execution);
    }

    Ok(tree)
}

fn parse_plan_node(value: &Value) -> Result<PlanNode> {
    let node_type = value
        .get("Node Type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlanParseError::MissingField {
            node_type: "unknown".into(),
            field: "Node Type",
        })?;

    let kind = NodeKind::from_postgres_str(node_type);
    if kind == NodeKind::Other {
        tracing::debug!(node_type, "unmapped PostgreSQL node type");
    }
    let mut node = PlanNode::new(kind, node_type);

    node.relation = json_str(value.get("Relation Name"));
    if kind.requires_relation() && node.relation.is_none() {
        return Err(PlanParseError::MissingField {
            node_type: node_type.to_string(),
            field: "Relation Name",
        });
    }
    node.alias = json_str(value.get("Alias"));

    let total = json_f64(value.get("Total Cost")).ok_or_else(|| PlanParseError::MissingField {
        node_type: node_type.to_string(),
        field: "Total Cost",
    })?;
    let startup = json_f64(value.get("Startup Cost")).unwrap_or(0.0);
    node.cost = NodeCost::new(startup, total);
    node.estimated_rows = json_rows(value.get("Plan Rows")).unwrap_or(0);

    // Execution statistics, only present with ANALYZE
    node.actual_rows = json_rows(value.get("Actual Rows"));
    node.actual_total_time_ms = json_f64(value.get("Actual Total Time"));
    node.loops = json_rows(value.get("Actual Loops"));
    node.rows_removed_by_filter = json_rows(value.get("Rows Removed by Filter"));

    node.filter = json_str(value.get("Filter"));
    node.index_name = json_str(value.get("Index Name"));
    node.index_cond = json_str(value.get("Index Cond"));

    node.join_type = value
        .get("Join Type")
        .and_then(|v| v.as_str())
        .and_then(JoinType::parse);
    node.join_cond = json_str(value.get("Join Filter"))
        .or_else(|| json_str(value.get("Hash Cond")))
        .or_else(|| json_str(value.get("Merge Cond")));

    node.sort_keys = json_strings(value.get("Sort Key"));
    if node.sort_keys.is_empty() {
        node.sort_keys = json_strings(value.get("Group Key"));
    }
    node.sort_method = json_str(value.get("Sort Method"));
    node.space_used_kb = json_rows(value.get("Sort Space Used"))
        .or_else(|| json_rows(value.get("Peak Memory Usage")));
    node.spilled_to_disk = is_external_sort(node.sort_method.as_deref())
        || value.get("Sort Space Type").and_then(|v| v.as_str()) == Some("Disk")
        || json_rows(value.get("Hash Batches")).is_some_and(|batches| batches > 1);

    if let Some(plans) = value.get("Plans").and_then(|v| v.as_array()) {
        for child_value in plans {
            node.children.push(parse_plan_node(child_value)?);
        }
    }

    Ok(node)
}

fn is_external_sort(method: Option<&str>) -> bool {
    method.is_some_and(|m| m.starts_with("external"))
}
