//! Built-in detection rules

use super::engine::{Rule, RuleContext};
use super::finding::{Category, Evidence, Finding, SchemaChange, Target};
use crate::explain::{NodeKind, PlanNode, PlanNodeIterator};
use crate::features::QueryFeatures;
use planwise_core::{EngineKind, IndexUsage};

pub const MISSING_INDEX_RULE: &str = "MISSING_INDEX_001";
pub const INEFFICIENT_SORT_RULE: &str = "INEFFICIENT_SORT_001";
pub const NESTED_LOOP_RULE: &str = "NESTED_LOOP_001";
pub const MISSING_STATS_RULE: &str = "MISSING_STATS_001";
pub const UNUSED_INDEX_RULE: &str = "UNUSED_INDEX_001";

const INDEX_CAVEATS: [&str; 3] = [
    "Confirm the improvement on a staging copy before creating the index in production",
    "Every additional index slows down INSERT, UPDATE and DELETE on the table",
    "Re-check the query plan after the index is built",
];

const SORT_CAVEATS: [&str; 3] = [
    "Check whether the result actually needs to be ordered",
    "A LIMIT on the query may make the sort cheap enough already",
    "The index only helps if its column order matches the ORDER BY",
];

const JOIN_CAVEATS: [&str; 3] = [
    "Nested loops are the right choice when the outer side is small",
    "Stale statistics can make the planner pick a nested loop by mistake",
    "Join order and join type may matter more than the index",
];

const STATS_CAVEATS: [&str; 3] = [
    "ANALYZE reads a sample of every listed table and takes time on large ones",
    "Schedule it outside peak traffic",
    "If estimates stay wrong, raise the statistics target for the filtered columns",
];

const UNUSED_INDEX_CAVEATS: [&str; 3] = [
    "Usage counters only cover the period since statistics were last reset",
    "Rarely run reports or batch jobs may still depend on the index",
    "Keep the index definition so it can be recreated if needed",
];

/// The plan rules in declaration order
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(MissingIndexRule),
        Box::new(InefficientSortRule),
        Box::new(NestedLoopRule),
        Box::new(StatsIssueRule),
    ]
}

fn caveats(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| s.to_string()).collect()
}

fn node_evidence(node: &PlanNode) -> Evidence {
    Evidence {
        node: Some(node.label()),
        node_cost: Some(node.cost.total),
        estimated_rows: Some(node.estimated_rows),
        actual_rows: node.actual_rows,
        rows_removed_by_filter: node.rows_removed_by_filter,
        filtered_pct: node.filtered_pct,
        sort_method: node.sort_method.clone(),
        ..Evidence::default()
    }
}

fn index_finding(
    rule: &dyn Rule,
    table: &str,
    columns: Vec<String>,
    rationale: String,
    node: &PlanNode,
    ctx: &RuleContext<'_>,
    caveat_lines: &[&str],
) -> Finding {
    let change = SchemaChange::create_index(table, columns.clone());
    Finding {
        rule_id: rule.id().to_string(),
        category: rule.category(),
        target: Target::columns(table, columns),
        rationale,
        suggested_action: change.to_sql(ctx.engine),
        change,
        node_id: Some(node.id),
        evidence: node_evidence(node),
        caveats: caveats(caveat_lines),
    }
}

/// Tables read beneath `node`, resolved against the query's tables, in
/// pre-order without repeats
fn relations_beneath(node: &PlanNode, features: &QueryFeatures) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for n in PlanNodeIterator::new(node) {
        if let Some(rel) = n.relation.as_deref() {
            let table = features.resolve_table(rel).unwrap_or(rel).to_string();
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
    }
    tables
}

/// A full scan whose table is filtered on columns an index could serve
pub struct MissingIndexRule;

impl Rule for MissingIndexRule {
    fn id(&self) -> &'static str {
        MISSING_INDEX_RULE
    }

    fn category(&self) -> Category {
        Category::MissingIndex
    }

    fn check(
        &self,
        node: &PlanNode,
        _ancestors: &[&PlanNode],
        ctx: &RuleContext<'_>,
    ) -> Option<Finding> {
        if !node.kind.is_full_scan() {
            return None;
        }
        let table = ctx.features.resolve_table(node.relation.as_deref()?)?;
        let columns = ctx.features.predicate_columns_for(table);
        if columns.is_empty() {
            return None;
        }

        let mut rationale = format!(
            "{} reads the whole table to filter on {}",
            node.label(),
            columns.join(", ")
        );
        match (node.rows_examined(), node.rows_removed_by_filter) {
            (Some(examined), Some(removed)) if examined > 0 => {
                rationale.push_str(&format!(
                    "; {removed} of {examined} examined rows were discarded by the filter"
                ));
            }
            _ => {
                if let Some(pct) = node.filtered_pct {
                    rationale.push_str(&format!(
                        "; the optimizer expects {pct:.1}% of ~{} examined rows to pass the filter",
                        node.estimated_rows
                    ));
                }
            }
        }
        rationale.push_str(&format!(" (cost {:.2}).", node.cost.total));

        Some(index_finding(
            self,
            table,
            columns,
            rationale,
            node,
            ctx,
            &INDEX_CAVEATS,
        ))
    }
}

/// A sort that spilled to disk for a query with ORDER BY or GROUP BY
pub struct InefficientSortRule;

impl InefficientSortRule {
    /// Picks the table whose ordering columns an index should cover,
    /// preferring tables read underneath the sort.
    fn ordering_target(node: &PlanNode, features: &QueryFeatures) -> Option<(String, Vec<String>)> {
        let beneath = relations_beneath(node, features);
        let names = || features.tables.iter().map(|t| t.name.as_str());
        names()
            .filter(|name| beneath.iter().any(|b| b == name))
            .chain(names())
            .find_map(|name| {
                let columns = features.ordering_columns_for(name);
                (!columns.is_empty()).then(|| (name.to_string(), columns))
            })
    }
}

impl Rule for InefficientSortRule {
    fn id(&self) -> &'static str {
        INEFFICIENT_SORT_RULE
    }

    fn category(&self) -> Category {
        Category::InefficientSort
    }

    fn check(
        &self,
        node: &PlanNode,
        ancestors: &[&PlanNode],
        ctx: &RuleContext<'_>,
    ) -> Option<Finding> {
        if !node.kind.is_sort() || !node.spilled_to_disk {
            return None;
        }
        if !ctx.features.has_order_by() && !ctx.features.has_group_by() {
            return None;
        }
        let (table, columns) = Self::ordering_target(node, ctx.features)?;

        let mut rationale = format!("{} spilled to disk", node.label());
        match (&node.sort_method, node.space_used_kb) {
            (Some(method), Some(kb)) => rationale.push_str(&format!(" ({method}, {kb} kB)")),
            (Some(method), None) => rationale.push_str(&format!(" ({method})")),
            _ => {}
        }
        rationale.push_str(&format!(" while ordering by {}", columns.join(", ")));
        if let Some(join) = ancestors.iter().rev().find(|a| a.kind.is_join()) {
            rationale.push_str(&format!("; its output feeds a {}", join.node_type));
        }
        if ancestors.iter().any(|a| a.kind.terminates_early()) {
            rationale.push_str("; with an ordered index the LIMIT could stop reading early");
        }
        rationale.push('.');

        Some(index_finding(
            self,
            &table,
            columns,
            rationale,
            node,
            ctx,
            &SORT_CAVEATS,
        ))
    }
}

/// An expensive nested loop whose inner side is a full scan on join columns
pub struct NestedLoopRule;

impl Rule for NestedLoopRule {
    fn id(&self) -> &'static str {
        NESTED_LOOP_RULE
    }

    fn category(&self) -> Category {
        Category::InefficientJoin
    }

    fn check(
        &self,
        node: &PlanNode,
        _ancestors: &[&PlanNode],
        ctx: &RuleContext<'_>,
    ) -> Option<Finding> {
        if node.kind != NodeKind::NestedLoop
            || node.cost.total <= ctx.config.nested_loop_cost_threshold
        {
            return None;
        }
        let inner = node.children.get(1)?;
        let scan = PlanNodeIterator::new(inner).find(|n| n.relation.is_some())?;
        if scan.kind.is_index_access() {
            return None;
        }
        let table = ctx.features.resolve_table(scan.relation.as_deref()?)?;
        let columns = ctx.features.join_columns_for(table);
        if columns.is_empty() {
            return None;
        }

        let mut rationale = format!(
            "{} (cost {:.2}) rescans {} for every outer row",
            node.node_type,
            node.cost.total,
            scan.label()
        );
        if let Some(loops) = scan.loops.filter(|l| *l > 1) {
            rationale.push_str(&format!(" ({loops} loops)"));
        }
        rationale.push_str(&format!(
            "; an index on {}({}) would turn each rescan into a lookup.",
            table,
            columns.join(", ")
        ));

        Some(index_finding(
            self,
            table,
            columns,
            rationale,
            node,
            ctx,
            &JOIN_CAVEATS,
        ))
    }
}

/// Estimated and actual row counts that disagree beyond the threshold
pub struct StatsIssueRule;

impl StatsIssueRule {
    /// `|estimated - actual| / max(estimated, actual)`, or `None` unless
    /// both counts are known and positive
    pub fn divergence(node: &PlanNode) -> Option<f64> {
        let actual = node.actual_rows?;
        let estimated = node.estimated_rows;
        if actual == 0 || estimated == 0 {
            return None;
        }
        let (estimated, actual) = (estimated as f64, actual as f64);
        Some((estimated - actual).abs() / estimated.max(actual))
    }
}

impl Rule for StatsIssueRule {
    fn id(&self) -> &'static str {
        MISSING_STATS_RULE
    }

    fn category(&self) -> Category {
        Category::StatsIssue
    }

    fn check(
        &self,
        node: &PlanNode,
        _ancestors: &[&PlanNode],
        ctx: &RuleContext<'_>,
    ) -> Option<Finding> {
        let divergence = Self::divergence(node)?;
        if divergence <= ctx.config.stats_divergence_threshold {
            return None;
        }
        let tables = relations_beneath(node, ctx.features);
        if tables.is_empty() {
            return None;
        }

        let rationale = format!(
            "{} was estimated at {} rows but returned {} ({:.0}% off); statistics on {} look stale.",
            node.label(),
            node.estimated_rows,
            node.actual_rows.unwrap_or_default(),
            divergence * 100.0,
            tables.join(", ")
        );
        let change = SchemaChange::Analyze {
            tables: tables.clone(),
        };
        Some(Finding {
            rule_id: MISSING_STATS_RULE.to_string(),
            category: Category::StatsIssue,
            target: Target::columns(tables[0].clone(), Vec::new()),
            rationale,
            suggested_action: change.to_sql(ctx.engine),
            change,
            node_id: Some(node.id),
            evidence: node_evidence(node),
            caveats: caveats(&STATS_CAVEATS),
        })
    }
}

/// An index the usage snapshot reports as never used.
///
/// Primary keys and unique indexes enforce constraints and are never flagged.
pub fn unused_index_finding(usage: &IndexUsage, engine: EngineKind) -> Option<Finding> {
    if usage.times_used > 0 || usage.is_constraint() {
        return None;
    }

    let mut rationale = format!(
        "Index {} on {} has not been used since statistics were last reset",
        usage.index, usage.table
    );
    if let Some(size) = usage.size_pretty() {
        rationale.push_str(&format!(" and occupies {size}"));
    }
    rationale.push('.');

    let change = SchemaChange::DropIndex {
        name: usage.index.clone(),
        table: usage.table.clone(),
        schema: usage.schema.clone(),
        definition: None,
    };
    Some(Finding {
        rule_id: UNUSED_INDEX_RULE.to_string(),
        category: Category::UnusedIndexCandidate,
        target: Target::index(usage.table.clone(), usage.index.clone()),
        rationale,
        suggested_action: change.to_sql(engine),
        change,
        node_id: None,
        evidence: Evidence {
            times_used: Some(usage.times_used),
            index_size_bytes: usage.size_bytes,
            ..Evidence::default()
        },
        caveats: caveats(&UNUSED_INDEX_CAVEATS),
    })
}
