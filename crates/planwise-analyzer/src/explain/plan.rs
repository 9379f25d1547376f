//! Plan Tree Model - the engine-neutral shape every EXPLAIN payload is normalized into
//!
//! A `PlanTree` owns its nodes exclusively. Downstream consumers (rules,
//! scoring, reports) only ever borrow it.

use planwise_core::EngineKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Costs are reported with two decimals, so sums of children can overshoot
/// the parent by a rounding step per child.
const COST_ROUNDING_SLACK: f64 = 0.01;

/// A normalized execution plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanTree {
    pub engine: EngineKind,
    pub root: PlanNode,
    /// Planning time in milliseconds (if available)
    pub planning_time_ms: Option<f64>,
    /// Execution time in milliseconds (only with execution statistics)
    pub execution_time_ms: Option<f64>,
    /// Cost-invariant violations found while normalizing
    pub diagnostics: Vec<PlanDiagnostic>,
}

impl PlanTree {
    /// Builds a tree from a root node, numbering nodes in pre-order and
    /// checking that no parent costs less than its children combined.
    pub fn new(engine: EngineKind, mut root: PlanNode) -> Self {
        let mut next_id = 0;
        assign_ids(&mut root, &mut next_id);

        let mut diagnostics = Vec::new();
        check_cost_invariant(&root, &mut diagnostics);

        Self {
            engine,
            root,
            planning_time_ms: None,
            execution_time_ms: None,
            diagnostics,
        }
    }

    pub fn with_planning_time(mut self, ms: f64) -> Self {
        self.planning_time_ms = Some(ms);
        self
    }

    pub fn with_execution_time(mut self, ms: f64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    /// Whether any cost-invariant violation was detected.
    ///
    /// Cost shares computed from a malformed tree are meaningless, so callers
    /// must check this before comparing node costs.
    pub fn is_malformed(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Total estimated cost of the plan
    pub fn total_cost(&self) -> f64 {
        self.root.cost.total
    }

    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    /// Iterates every node once, root first
    pub fn iter_nodes(&self) -> PlanNodeIterator<'_> {
        PlanNodeIterator::new(&self.root)
    }

    /// Looks up a node by its pre-order id
    pub fn node(&self, id: usize) -> Option<&PlanNode> {
        self.iter_nodes().find(|n| n.id == id)
    }

    pub fn find_nodes_by_kind(&self, kind: NodeKind) -> Vec<&PlanNode> {
        self.iter_nodes().filter(|n| n.kind == kind).collect()
    }

    pub fn has_full_scans(&self) -> bool {
        self.iter_nodes().any(|n| n.kind.is_full_scan())
    }

    /// Visits every node exactly once in pre-order, handing the visitor the
    /// chain of ancestors from the root down to the node's parent.
    pub fn walk<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a PlanNode, &[&'a PlanNode]),
    {
        let mut ancestors = Vec::new();
        walk_node(&self.root, &mut ancestors, &mut visit);
    }
}

fn walk_node<'a, F>(node: &'a PlanNode, ancestors: &mut Vec<&'a PlanNode>, visit: &mut F)
where
    F: FnMut(&'a PlanNode, &[&'a PlanNode]),
{
    visit(node, ancestors.as_slice());
    ancestors.push(node);
    for child in &node.children {
        walk_node(child, ancestors, visit);
    }
    ancestors.pop();
}

fn assign_ids(node: &mut PlanNode, next_id: &mut usize) {
    node.id = *next_id;
    *next_id += 1;
    for child in &mut node.children {
        assign_ids(child, next_id);
    }
}

/// Flags every parent that costs less than the sum of its children.
///
/// Limit is the one exception: its cost is prorated to the rows it reads
/// before stopping, so it is routinely cheaper than its input. The exemption
/// covers that node only, and its subtree is still checked.
fn check_cost_invariant(node: &PlanNode, diagnostics: &mut Vec<PlanDiagnostic>) {
    if !node.children.is_empty() && !node.kind.terminates_early() {
        let children_cost: f64 = node.children.iter().map(|c| c.cost.total).sum();
        let slack = COST_ROUNDING_SLACK * node.children.len() as f64;
        if node.cost.total + slack < children_cost {
            diagnostics.push(PlanDiagnostic {
                node_id: node.id,
                node_type: node.node_type.clone(),
                node_cost: node.cost.total,
                children_cost,
            });
        }
    }
    for child in &node.children {
        check_cost_invariant(child, diagnostics);
    }
}

/// A parent node whose cost is lower than the sum of its children's costs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDiagnostic {
    pub node_id: usize,
    pub node_type: String,
    pub node_cost: f64,
    pub children_cost: f64,
}

impl fmt::Display for PlanDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node #{} ({}) costs {:.2} but its children cost {:.2}",
            self.node_id, self.node_type, self.node_cost, self.children_cost
        )
    }
}

/// A single node in the plan tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanNode {
    /// Pre-order position in the tree, assigned by `PlanTree::new`
    pub id: usize,
    pub kind: NodeKind,
    /// The engine's own name for the operation ("Seq Scan", "ALL", ...)
    pub node_type: String,
    /// Target relation, only set for nodes that read a table
    pub relation: Option<String>,
    pub alias: Option<String>,
    pub cost: NodeCost,
    /// Estimated rows produced per loop
    pub estimated_rows: u64,
    /// Actual rows per loop, only present with execution statistics
    pub actual_rows: Option<u64>,
    pub actual_total_time_ms: Option<f64>,
    pub loops: Option<u64>,
    pub filter: Option<String>,
    pub rows_removed_by_filter: Option<u64>,
    /// Estimated percentage of examined rows that survive the filter (MySQL)
    pub filtered_pct: Option<f64>,
    pub index_name: Option<String>,
    pub index_cond: Option<String>,
    pub join_type: Option<JoinType>,
    pub join_cond: Option<String>,
    pub sort_keys: Vec<String>,
    pub sort_method: Option<String>,
    /// Whether the operation had to spill to external storage
    pub spilled_to_disk: bool,
    /// Memory or disk space used by a sort or hash, in kB
    pub space_used_kb: Option<u64>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(kind: NodeKind, node_type: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            node_type: node_type.into(),
            relation: None,
            alias: None,
            cost: NodeCost::default(),
            estimated_rows: 0,
            actual_rows: None,
            actual_total_time_ms: None,
            loops: None,
            filter: None,
            rows_removed_by_filter: None,
            filtered_pct: None,
            index_name: None,
            index_cond: None,
            join_type: None,
            join_cond: None,
            sort_keys: Vec::new(),
            sort_method: None,
            spilled_to_disk: false,
            space_used_kb: None,
            children: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_cost(mut self, startup: f64, total: f64) -> Self {
        self.cost = NodeCost::new(startup, total);
        self
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = rows;
        self
    }

    pub fn with_actual_rows(mut self, rows: u64) -> Self {
        self.actual_rows = Some(rows);
        self
    }

    pub fn with_rows_removed(mut self, rows: u64) -> Self {
        self.rows_removed_by_filter = Some(rows);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn with_sort_keys(mut self, keys: Vec<String>) -> Self {
        self.sort_keys = keys;
        self
    }

    /// Marks the node as having spilled to disk
    pub fn spilled(mut self) -> Self {
        self.spilled_to_disk = true;
        self
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    /// Total number of nodes in this subtree (including self)
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Rows the node read before its filter discarded any.
    ///
    /// Only known when execution statistics were captured.
    pub fn rows_examined(&self) -> Option<u64> {
        match (self.actual_rows, self.rows_removed_by_filter) {
            (Some(actual), Some(removed)) => Some(actual.saturating_add(removed)),
            (Some(actual), None) => Some(actual),
            _ => None,
        }
    }

    /// Label used in rationales and reports: "Seq Scan on orders"
    pub fn label(&self) -> String {
        match &self.relation {
            Some(rel) => format!("{} on {}", self.node_type, rel),
            None => self.node_type.clone(),
        }
    }
}

/// Cost information for a plan node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeCost {
    /// Cost before the first row can be returned
    pub startup: f64,
    /// Cost to return all rows
    pub total: f64,
}

impl NodeCost {
    pub fn new(startup: f64, total: f64) -> Self {
        Self { startup, total }
    }
}

/// Type of join operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

impl JoinType {
    /// Parses a join type as engines print it ("Inner", "Left Outer", ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inner" => Some(Self::Inner),
            "left" | "left outer" => Some(Self::Left),
            "right" | "right outer" => Some(Self::Right),
            "full" | "full outer" => Some(Self::Full),
            "semi" | "right semi" => Some(Self::Semi),
            "anti" | "right anti" => Some(Self::Anti),
            "cross" => Some(Self::Cross),
            _ => None,
        }
    }
}

/// Generic operation kind, independent of which engine produced the plan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    // Scans
    SeqScan,
    IndexScan,
    IndexOnlyScan,
    BitmapIndexScan,
    BitmapHeapScan,
    SubqueryScan,
    CteScan,

    // Joins
    NestedLoop,
    HashJoin,
    MergeJoin,
    Hash,

    // Aggregation
    Aggregate,
    GroupAggregate,
    HashAggregate,

    // Ordering
    Sort,
    IncrementalSort,

    Limit,
    Unique,
    Append,
    Materialize,
    Gather,
    ModifyTable,
    Result,

    /// Anything the mapping table does not know about
    Other,
}

impl NodeKind {
    /// Maps PostgreSQL's "Node Type" vocabulary
    pub fn from_postgres_str(s: &str) -> Self {
        match s {
            "Seq Scan" | "Parallel Seq Scan" => Self::SeqScan,
            "Index Scan" => Self::IndexScan,
            "Index Only Scan" => Self::IndexOnlyScan,
            "Bitmap Index Scan" => Self::BitmapIndexScan,
            "Bitmap Heap Scan" => Self::BitmapHeapScan,
            "Subquery Scan" => Self::SubqueryScan,
            "CTE Scan" => Self::CteScan,
            "Nested Loop" => Self::NestedLoop,
            "Hash Join" => Self::HashJoin,
            "Merge Join" => Self::MergeJoin,
            "Hash" => Self::Hash,
            "Aggregate" => Self::Aggregate,
            "GroupAggregate" | "Group Aggregate" => Self::GroupAggregate,
            "HashAggregate" | "Hash Aggregate" => Self::HashAggregate,
            "Sort" => Self::Sort,
            "Incremental Sort" => Self::IncrementalSort,
            "Limit" => Self::Limit,
            "Unique" => Self::Unique,
            "Append" | "Merge Append" => Self::Append,
            "Materialize" => Self::Materialize,
            "Gather" | "Gather Merge" => Self::Gather,
            "ModifyTable" => Self::ModifyTable,
            "Result" => Self::Result,
            _ => Self::Other,
        }
    }

    /// Maps MySQL's `access_type` / tabular `type` column
    pub fn from_mysql_access_type(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "all" => Self::SeqScan,
            "index" | "range" | "ref" | "eq_ref" | "const" | "system" | "ref_or_null"
            | "fulltext" | "unique_subquery" | "index_subquery" => Self::IndexScan,
            "index_merge" => Self::BitmapIndexScan,
            _ => Self::Other,
        }
    }

    /// A scan that reads every row of its relation
    pub fn is_full_scan(&self) -> bool {
        matches!(self, Self::SeqScan)
    }

    pub fn is_index_access(&self) -> bool {
        matches!(
            self,
            Self::IndexScan | Self::IndexOnlyScan | Self::BitmapIndexScan | Self::BitmapHeapScan
        )
    }

    /// Scans that must name the relation they read
    pub fn requires_relation(&self) -> bool {
        matches!(
            self,
            Self::SeqScan | Self::IndexScan | Self::IndexOnlyScan | Self::BitmapHeapScan
        )
    }

    pub fn is_join(&self) -> bool {
        matches!(self, Self::NestedLoop | Self::HashJoin | Self::MergeJoin)
    }

    pub fn is_sort(&self) -> bool {
        matches!(self, Self::Sort | Self::IncrementalSort)
    }

    /// Operations whose cost is prorated because they stop reading their
    /// input early; their children legitimately cost more than they do.
    pub fn terminates_early(&self) -> bool {
        matches!(self, Self::Limit)
    }
}

/// Iterator for traversing plan nodes in pre-order
pub struct PlanNodeIterator<'a> {
    stack: Vec<&'a PlanNode>,
}

impl<'a> PlanNodeIterator<'a> {
    pub fn new(root: &'a PlanNode) -> Self {
        Self { stack: vec![root] }
    }
}

impl<'a> Iterator for PlanNodeIterator<'a> {
    type Item = &'a PlanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Reverse so the first child is visited next
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}
