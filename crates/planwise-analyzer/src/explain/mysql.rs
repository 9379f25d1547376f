//! MySQL EXPLAIN normalization
//!
//! MySQL reports plans very differently from PostgreSQL:
//! - `FORMAT=JSON` nests a `query_block` with `ordering_operation`,
//!   `grouping_operation`, `nested_loop` and `table` objects
//! - the traditional format is one row per table access
//! - scan kinds come from `access_type` ("ALL", "ref", ...)
//! - there are no per-node costs for wrapper operations and no actual
//!   row counts, only the optimizer's `filtered` estimate
//!
//! Wrapper costs are synthesized as their own cost plus the sum of their
//! children, which keeps the cost invariant meaningful. A JSON table access
//! without `read_cost` or `eval_cost` is rejected. Tabular output has no
//! costs at all, so examined rows stand in for cost there and only there.

use crate::explain::normalize::{PlanParseError, Result, json_f64, json_rows, json_str};
use crate::explain::plan::{JoinType, NodeCost, NodeKind, PlanNode, PlanTree};
use planwise_core::EngineKind;
use serde_json::Value;

/// Parses MySQL `EXPLAIN FORMAT=JSON` output
pub fn parse_json_explain(value: &Value) -> Result<PlanTree> {
    let query_block = value
        .get("query_block")
        .ok_or(PlanParseError::MissingRoot("query_block"))?;

    let mut root = parse_query_block(query_block)?;
    if let Some(query_cost) = query_block
        .get("cost_info")
        .and_then(|c| json_f64(c.get("query_cost")))
        && query_cost > root.cost.total
    {
        root.cost.total = query_cost;
    }

    Ok(PlanTree::new(EngineKind::Mysql, root))
}

fn parse_query_block(block: &Value) -> Result<PlanNode> {
    if let Some(ordering) = block.get("ordering_operation") {
        return parse_ordering_operation(ordering);
    }
    if let Some(grouping) = block.get("grouping_operation") {
        return parse_grouping_operation(grouping);
    }
    if let Some(distinct) = block.get("duplicates_removal") {
        return parse_duplicates_removal(distinct);
    }
    if let Some(nested_loop) = block.get("nested_loop") {
        return parse_nested_loop(nested_loop);
    }
    if let Some(table) = block.get("table") {
        return parse_table_access(table);
    }
    if let Some(union_result) = block.get("union_result") {
        return parse_union_result(union_result);
    }

    // "message": "Impossible WHERE", "No tables used", ...
    let label = json_str(block.get("message")).unwrap_or_else(|| "Result".to_string());
    Ok(PlanNode::new(NodeKind::Result, label))
}

/// Parses whichever operation an ordering/grouping/distinct wrapper contains
fn parse_inner_operation(op: &Value) -> Result<Option<PlanNode>> {
    if let Some(grouping) = op.get("grouping_operation") {
        return parse_grouping_operation(grouping).map(Some);
    }
    if let Some(distinct) = op.get("duplicates_removal") {
        return parse_duplicates_removal(distinct).map(Some);
    }
    if let Some(nested_loop) = op.get("nested_loop") {
        return parse_nested_loop(nested_loop).map(Some);
    }
    if let Some(table) = op.get("table") {
        return parse_table_access(table).map(Some);
    }
    Ok(None)
}

fn wrap(mut parent: PlanNode, child: Option<PlanNode>, own_cost: f64) -> PlanNode {
    let child_cost = child.as_ref().map(|c| c.cost.total).unwrap_or(0.0);
    parent.estimated_rows = child.as_ref().map(|c| c.estimated_rows).unwrap_or(0);
    parent.cost = NodeCost::new(child_cost, child_cost + own_cost);
    parent.children.extend(child);
    parent
}

fn flag(op: &Value, key: &str) -> bool {
    op.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn parse_ordering_operation(ordering: &Value) -> Result<PlanNode> {
    let child = parse_inner_operation(ordering)?;

    // Without a filesort the order comes from an index; there is no sort step
    if !flag(ordering, "using_filesort") {
        return child.ok_or_else(|| {
            PlanParseError::InvalidStructure("ordering_operation without an input".into())
        });
    }

    let sort_cost = ordering
        .get("cost_info")
        .and_then(|c| json_f64(c.get("sort_cost")))
        .unwrap_or(0.0);
    let mut sort = wrap(PlanNode::new(NodeKind::Sort, "filesort"), child, sort_cost);
    sort.sort_method = Some("filesort".to_string());
    sort.spilled_to_disk = true;
    Ok(sort)
}

fn parse_grouping_operation(grouping: &Value) -> Result<PlanNode> {
    let mut child = parse_inner_operation(grouping)?;

    if flag(grouping, "using_filesort") {
        let mut sort = wrap(PlanNode::new(NodeKind::Sort, "filesort"), child, 0.0);
        sort.sort_method = Some("filesort".to_string());
        sort.spilled_to_disk = true;
        child = Some(sort);
    }

    let (kind, label) = if flag(grouping, "using_temporary_table") {
        (NodeKind::HashAggregate, "grouping_operation (temporary table)")
    } else {
        (NodeKind::Aggregate, "grouping_operation")
    };
    Ok(wrap(PlanNode::new(kind, label), child, 0.0))
}

fn parse_duplicates_removal(distinct: &Value) -> Result<PlanNode> {
    let child = parse_inner_operation(distinct)?;
    Ok(wrap(
        PlanNode::new(NodeKind::Unique, "duplicates_removal"),
        child,
        0.0,
    ))
}

/// MySQL lists joined tables as a flat array; fold it into a left-deep tree
fn parse_nested_loop(nested_loop: &Value) -> Result<PlanNode> {
    let tables = nested_loop.as_array().ok_or_else(|| {
        PlanParseError::InvalidStructure("nested_loop is not an array".into())
    })?;

    let mut children = Vec::with_capacity(tables.len());
    for entry in tables {
        if let Some(table) = entry.get("table") {
            children.push(parse_table_access(table)?);
        }
    }

    fold_nested_loop(children)
        .ok_or_else(|| PlanParseError::InvalidStructure("empty nested_loop".into()))
}

fn fold_nested_loop(nodes: Vec<PlanNode>) -> Option<PlanNode> {
    let mut nodes = nodes.into_iter();
    let first = nodes.next()?;
    Some(nodes.fold(first, |outer, inner| {
        let cost = outer.cost.total + inner.cost.total;
        let mut join = PlanNode::new(NodeKind::NestedLoop, "nested_loop");
        join.join_type = Some(JoinType::Inner);
        join.estimated_rows = outer.estimated_rows.max(inner.estimated_rows);
        join.cost = NodeCost::new(outer.cost.startup, cost);
        join.children.push(outer);
        join.children.push(inner);
        join
    }))
}

fn parse_table_access(table: &Value) -> Result<PlanNode> {
    let table_name = json_str(table.get("table_name"));
    let access_type = table
        .get("access_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlanParseError::MissingField {
            node_type: format!("table {}", table_name.as_deref().unwrap_or("?")),
            field: "access_type",
        })?;

    let kind = NodeKind::from_mysql_access_type(access_type);
    let mut node = PlanNode::new(kind, access_type);
    node.relation = table_name;
    if node.relation.is_none() {
        return Err(PlanParseError::MissingField {
            node_type: access_type.to_string(),
            field: "table_name",
        });
    }

    node.estimated_rows = json_rows(table.get("rows_examined_per_scan")).unwrap_or(0);
    node.filtered_pct = json_f64(table.get("filtered"));

    // prefix_cost is cumulative over the join prefix, so it cannot stand in
    // for this table's own cost
    let cost_info = table.get("cost_info");
    let read_cost = cost_info.and_then(|c| json_f64(c.get("read_cost")));
    let eval_cost = cost_info.and_then(|c| json_f64(c.get("eval_cost")));
    let own_cost = match (read_cost, eval_cost) {
        (None, None) => {
            return Err(PlanParseError::MissingField {
                node_type: access_type.to_string(),
                field: "cost_info",
            });
        }
        (read, eval) => read.unwrap_or(0.0) + eval.unwrap_or(0.0),
    };

    node.index_name = json_str(table.get("key"));
    node.filter = json_str(table.get("attached_condition"));
    if let Some(used) = table.get("used_key_parts").and_then(|v| v.as_array()) {
        let parts: Vec<&str> = used.iter().filter_map(|p| p.as_str()).collect();
        if !parts.is_empty() {
            node.index_cond = Some(parts.join(", "));
        }
    }
    if flag(table, "using_index") && kind == NodeKind::IndexScan {
        node.kind = NodeKind::IndexOnlyScan;
    }

    // Derived tables and subqueries hang below the table that consumes them
    if let Some(inner) = table
        .get("materialized_from_subquery")
        .and_then(|m| m.get("query_block"))
    {
        node.children.push(subquery_scan(parse_query_block(inner)?));
    }
    for key in ["subqueries", "attached_subqueries"] {
        if let Some(subqueries) = table.get(key).and_then(|v| v.as_array()) {
            for subquery in subqueries {
                if let Some(inner) = subquery.get("query_block") {
                    node.children.push(subquery_scan(parse_query_block(inner)?));
                }
            }
        }
    }

    let children_cost: f64 = node.children.iter().map(|c| c.cost.total).sum();
    node.cost = NodeCost::new(0.0, own_cost + children_cost);
    Ok(node)
}

fn subquery_scan(inner: PlanNode) -> PlanNode {
    wrap(PlanNode::new(NodeKind::SubqueryScan, "subquery"), Some(inner), 0.0)
}

fn parse_union_result(union: &Value) -> Result<PlanNode> {
    let mut node = PlanNode::new(NodeKind::Append, "union_result");
    if let Some(specs) = union.get("query_specifications").and_then(|v| v.as_array()) {
        for spec in specs {
            if let Some(block) = spec.get("query_block") {
                node.children.push(parse_query_block(block)?);
            }
        }
    }
    let total: f64 = node.children.iter().map(|c| c.cost.total).sum();
    node.cost = NodeCost::new(0.0, total);
    node.estimated_rows = node.children.iter().map(|c| c.estimated_rows).sum();
    Ok(node)
}

/// One row of the traditional EXPLAIN output
#[derive(Debug, Default)]
struct TabularRow {
    select_id: Option<u32>,
    table: Option<String>,
    access_type: Option<String>,
    key: Option<String>,
    rows: Option<u64>,
    filtered: Option<f64>,
    extra: Option<String>,
}

impl TabularRow {
    fn from_named(columns: &[String], cells: &[Option<String>]) -> Self {
        let cell = |name: &str| {
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .and_then(|idx| cells.get(idx).cloned().flatten())
                .filter(|v| !v.eq_ignore_ascii_case("null") && !v.is_empty())
        };
        Self {
            select_id: cell("id").and_then(|v| v.parse().ok()),
            table: cell("table"),
            access_type: cell("type"),
            key: cell("key"),
            rows: cell("rows").and_then(|v| v.parse().ok()),
            filtered: cell("filtered").and_then(|v| v.parse().ok()),
            extra: cell("Extra"),
        }
    }
}

const TABULAR_COLUMNS: [&str; 12] = [
    "id",
    "select_type",
    "table",
    "partitions",
    "type",
    "possible_keys",
    "key",
    "key_len",
    "ref",
    "rows",
    "filtered",
    "Extra",
];

/// Parses traditional EXPLAIN rows that arrived as result columns
pub fn parse_tabular_rows(columns: &[String], rows: &[Vec<Option<String>>]) -> Result<PlanTree> {
    if rows.is_empty() {
        return Err(PlanParseError::Empty);
    }
    let parsed: Vec<TabularRow> = rows
        .iter()
        .map(|cells| TabularRow::from_named(columns, cells))
        .collect();
    build_tabular_tree(parsed)
}

/// Parses traditional EXPLAIN output printed as text.
///
/// Accepts tab-separated rows (`mysql -B`) and pipe tables with `+---+`
/// borders. A header row is used when present; otherwise columns are
/// assigned by position, with or without the `partitions` column.
pub fn parse_tabular_text(text: &str) -> Result<PlanTree> {
    let mut lines: Vec<Vec<String>> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('+'))
        .map(split_cells)
        .filter(|cells| cells.len() >= 4)
        .collect();

    if lines.is_empty() {
        return Err(PlanParseError::Empty);
    }

    let has_header = lines[0].iter().any(|c| c.eq_ignore_ascii_case("select_type"));
    let columns: Vec<String> = if has_header {
        lines.remove(0)
    } else {
        positional_columns(&lines[0])
    };
    let rows: Vec<Vec<Option<String>>> = lines
        .into_iter()
        .map(|cells| cells.into_iter().map(Some).collect())
        .collect();

    parse_tabular_rows(&columns, &rows)
}

fn split_cells(line: &str) -> Vec<String> {
    if line.contains('\t') {
        line.split('\t').map(|c| c.trim().to_string()).collect()
    } else {
        let inner = line.trim_matches('|');
        inner.split('|').map(|c| c.trim().to_string()).collect()
    }
}

/// Column names for a header-less row: 12 columns when the fourth cell is
/// a partition list rather than an access type, 11 otherwise.
fn positional_columns(first_row: &[String]) -> Vec<String> {
    let has_partitions = first_row.len() >= 12
        || (first_row.len() >= 5
            && !is_access_type(&first_row[3])
            && is_access_type(&first_row[4]));
    TABULAR_COLUMNS
        .iter()
        .filter(|name| has_partitions || **name != "partitions")
        .map(|name| name.to_string())
        .collect()
}

fn is_access_type(s: &str) -> bool {
    NodeKind::from_mysql_access_type(s) != NodeKind::Other || s.eq_ignore_ascii_case("null")
}

fn build_tabular_tree(rows: Vec<TabularRow>) -> Result<PlanTree> {
    let mut filesort = false;
    let mut nodes = Vec::with_capacity(rows.len());

    for row in rows {
        let extra = row.extra.as_deref().unwrap_or("").to_lowercase();
        filesort |= extra.contains("using filesort");

        let Some(access_type) = row.access_type else {
            // "Impossible WHERE", "No tables used" and friends
            let label = row.extra.unwrap_or_else(|| "Result".to_string());
            nodes.push(PlanNode::new(NodeKind::Result, label));
            continue;
        };

        let kind = NodeKind::from_mysql_access_type(&access_type);
        let mut node = PlanNode::new(kind, access_type.as_str());
        node.relation = row.table;
        if kind.requires_relation() && node.relation.is_none() {
            return Err(PlanParseError::MissingField {
                node_type: access_type,
                field: "table",
            });
        }
        let rows = row.rows.ok_or_else(|| PlanParseError::MissingField {
            node_type: access_type.clone(),
            field: "rows",
        })?;
        node.estimated_rows = rows;
        node.cost = NodeCost::new(0.0, rows as f64);
        node.filtered_pct = row.filtered;
        node.index_name = row.key;
        if kind == NodeKind::IndexScan
            && extra.contains("using index")
            && !extra.contains("using index condition")
        {
            node.kind = NodeKind::IndexOnlyScan;
        }
        if extra.contains("using where") {
            node.filter = Some("Using where".to_string());
        }
        tracing::trace!(select_id = ?row.select_id, table = ?node.relation, "tabular row");
        nodes.push(node);
    }

    let mut root = fold_nested_loop(nodes)
        .ok_or_else(|| PlanParseError::InvalidStructure("no plan rows".into()))?;

    if filesort {
        let mut sort = wrap(PlanNode::new(NodeKind::Sort, "filesort"), Some(root), 0.0);
        sort.sort_method = Some("filesort".to_string());
        sort.spilled_to_disk = true;
        root = sort;
    }

    Ok(PlanTree::new(EngineKind::Mysql, root))
}
