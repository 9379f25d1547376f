//! Feature extractor built on sqlparser's AST

use planwise_core::EngineKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    BinaryOperator, Expr, FromTable, GroupByExpr, Ident, JoinConstraint, JoinOperator,
    ObjectName, Query, SetExpr, Statement, TableFactor, TableWithJoins, UnaryOperator,
};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static POSITION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Line: (\d+), Column: (\d+)").expect("valid regex"));

static FOUND_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"found: (.+?)(?: at Line: \d+, Column: \d+)?$").expect("valid regex"));

/// A 1-based location in the query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u64,
    pub column: u64,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Errors raised when query text cannot be turned into features
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("query text is empty")]
    Empty,

    #[error("syntax error: {message}")]
    Syntax {
        message: String,
        /// The offending token, as the parser reported it
        token: Option<String>,
        position: Option<SourcePosition>,
    },

    #[error("unsupported statement: {0} (expected SELECT, INSERT, UPDATE or DELETE)")]
    Unsupported(String),
}

impl ParseError {
    pub fn position(&self) -> Option<SourcePosition> {
        match self {
            ParseError::Syntax { position, .. } => *position,
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            ParseError::Syntax { token, .. } => token.as_deref(),
            _ => None,
        }
    }

    fn from_parser(err: sqlparser::parser::ParserError) -> Self {
        let raw = err.to_string();
        let message = raw
            .strip_prefix("sql parser error: ")
            .or_else(|| raw.strip_prefix("sql tokenizer error: "))
            .unwrap_or(&raw)
            .to_string();

        let position = POSITION_REGEX.captures(&message).and_then(|caps| {
            Some(SourcePosition {
                line: caps.get(1)?.as_str().parse().ok()?,
                column: caps.get(2)?.as_str().parse().ok()?,
            })
        });
        let token = FOUND_TOKEN_REGEX
            .captures(&message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        ParseError::Syntax {
            message,
            token,
            position,
        }
    }
}

/// Statement kind of the analyzed query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A table named in FROM/JOIN (or the target of INSERT/UPDATE/DELETE)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

/// A column reference, with its qualifier resolved to a table name when possible
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

/// How a WHERE-clause predicate constrains its column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    Equality,
    Range,
    InList,
    Like,
    NullTest,
    /// Column compared with another column (an implicit join)
    ColumnComparison,
    /// `<>`, `NOT IN`, `NOT LIKE` and other negated tests
    Negated,
    /// Any test inside an OR branch
    Disjunct,
}

impl PredicateKind {
    /// Whether a B-tree index on the column can serve this predicate.
    ///
    /// A composite index cannot serve `a = 1 OR b = 2`, nor an inequality.
    pub fn is_sargable(&self) -> bool {
        !matches!(self, Self::ColumnComparison | Self::Negated | Self::Disjunct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: ColumnRef,
    pub kind: PredicateKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    Semi,
    Anti,
    Other,
}

/// A join in the FROM clause and the columns its ON condition compares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    pub kind: JoinKind,
    pub table: String,
    pub on_columns: Vec<ColumnRef>,
}

/// Structured facts derived purely from query text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFeatures {
    pub query_type: QueryType,
    /// Referenced tables; the first one is the query's primary table
    pub tables: Vec<TableRef>,
    /// WHERE-clause predicates in the order they appear
    pub predicates: Vec<Predicate>,
    pub order_by: Vec<ColumnRef>,
    pub group_by: Vec<ColumnRef>,
    pub joins: Vec<JoinInfo>,
}

impl QueryFeatures {
    /// The primary table (the first one in FROM, or the statement target)
    pub fn table_name(&self) -> Option<&str> {
        self.tables.first().map(|t| t.name.as_str())
    }

    pub fn references_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(table))
    }

    /// Maps a plan relation, which may be a table name or an alias, to the
    /// referenced table's name
    pub fn resolve_table(&self, relation: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(relation))
            .or_else(|| {
                self.tables.iter().find(|t| {
                    t.alias
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(relation))
                })
            })
            .map(|t| t.name.as_str())
    }

    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Distinct filtered columns across all tables, in predicate order
    pub fn predicate_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for predicate in self.predicates.iter().filter(|p| p.kind.is_sargable()) {
            if !columns.contains(&predicate.column.column.as_str()) {
                columns.push(&predicate.column.column);
            }
        }
        columns
    }

    /// Distinct filtered columns that belong to `table`, in predicate order.
    ///
    /// Unqualified columns are attributed to the primary table.
    pub fn predicate_columns_for(&self, table: &str) -> Vec<String> {
        let columns = self
            .predicates
            .iter()
            .filter(|p| p.kind.is_sargable())
            .map(|p| &p.column);
        self.columns_for(table, columns)
    }

    /// Distinct ORDER BY columns followed by GROUP BY columns that belong to `table`
    pub fn ordering_columns_for(&self, table: &str) -> Vec<String> {
        self.columns_for(table, self.order_by.iter().chain(self.group_by.iter()))
    }

    /// Columns of `table` compared in join conditions (ON clauses and
    /// column-to-column WHERE predicates)
    pub fn join_columns_for(&self, table: &str) -> Vec<String> {
        let on_columns = self.joins.iter().flat_map(|j| j.on_columns.iter());
        let where_columns = self
            .predicates
            .iter()
            .filter(|p| p.kind == PredicateKind::ColumnComparison)
            .map(|p| &p.column);
        self.columns_for(table, on_columns.chain(where_columns))
    }

    fn columns_for<'a>(
        &self,
        table: &str,
        columns: impl Iterator<Item = &'a ColumnRef>,
    ) -> Vec<String> {
        let is_primary = self
            .table_name()
            .is_some_and(|primary| primary.eq_ignore_ascii_case(table));
        let mut out: Vec<String> = Vec::new();
        for col in columns {
            let belongs = match &col.table {
                Some(t) => t.eq_ignore_ascii_case(table),
                None => is_primary,
            };
            if belongs && !out.contains(&col.column) {
                out.push(col.column.clone());
            }
        }
        out
    }
}

/// Extracts features using a dialect-neutral parser
pub fn extract_features(query_text: &str) -> Result<QueryFeatures, ParseError> {
    extract_with_dialect(&GenericDialect {}, query_text)
}

/// Extracts features using the parser dialect of a specific engine
pub fn extract_features_for(
    engine: EngineKind,
    query_text: &str,
) -> Result<QueryFeatures, ParseError> {
    match engine {
        EngineKind::Postgresql => extract_with_dialect(&PostgreSqlDialect {}, query_text),
        EngineKind::Mysql => extract_with_dialect(&MySqlDialect {}, query_text),
    }
}

#[tracing::instrument(skip_all, fields(sql_preview = %query_text.chars().take(100).collect::<String>()))]
fn extract_with_dialect(
    dialect: &dyn Dialect,
    query_text: &str,
) -> Result<QueryFeatures, ParseError> {
    if query_text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let statements = Parser::parse_sql(dialect, query_text).map_err(ParseError::from_parser)?;
    // Text made only of comments and semicolons parses to nothing
    let statement = statements.first().ok_or(ParseError::Empty)?;
    if statements.len() > 1 {
        tracing::debug!(count = statements.len(), "analyzing the first of several statements");
    }

    let mut collector = Collector::default();
    let query_type = match statement {
        Statement::Query(query) => {
            collector.query(query);
            QueryType::Select
        }
        Statement::Insert(insert) => {
            collector.add_table(&insert.table_name, None);
            QueryType::Insert
        }
        Statement::Update {
            table, selection, ..
        } => {
            collector.table_with_joins(table);
            if let Some(expr) = selection {
                collector.predicate(expr);
            }
            QueryType::Update
        }
        Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            for table in from {
                collector.table_with_joins(table);
            }
            if let Some(expr) = &delete.selection {
                collector.predicate(expr);
            }
            QueryType::Delete
        }
        other => {
            let kind = other.to_string();
            let keyword = kind.split_whitespace().next().unwrap_or("statement");
            return Err(ParseError::Unsupported(keyword.to_uppercase()));
        }
    };

    let features = collector.finish(query_type);
    tracing::debug!(
        query_type = features.query_type.as_str(),
        table = ?features.table_name(),
        predicates = features.predicates.len(),
        "extracted query features"
    );
    Ok(features)
}

/// Walks the AST, collecting references with raw qualifiers.
///
/// Qualifiers are resolved against the alias map only at the end, since
/// WHERE can legally be walked before every FROM entry is known.
#[derive(Default)]
struct Collector {
    tables: Vec<TableRef>,
    predicates: Vec<Predicate>,
    order_by: Vec<ColumnRef>,
    group_by: Vec<ColumnRef>,
    joins: Vec<JoinInfo>,
    or_depth: usize,
    negated: bool,
}

impl Collector {
    fn query(&mut self, query: &Query) {
        if let SetExpr::Select(select) = query.body.as_ref() {
            for from in &select.from {
                self.table_with_joins(from);
            }
            if let Some(expr) = &select.selection {
                self.predicate(expr);
            }
            if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
                self.group_by.extend(exprs.iter().filter_map(column_ref));
            }
        }
        if let Some(order_by) = &query.order_by {
            self.order_by
                .extend(order_by.exprs.iter().filter_map(|o| column_ref(&o.expr)));
        }
    }

    fn table_with_joins(&mut self, twj: &TableWithJoins) {
        self.table_factor(&twj.relation);
        for join in &twj.joins {
            let Some(table) = self.table_factor(&join.relation) else {
                continue;
            };
            let (kind, constraint) = join_kind(&join.join_operator);
            let mut on_columns = Vec::new();
            if let Some(JoinConstraint::On(expr)) = constraint {
                collect_compared_columns(expr, &mut on_columns);
            }
            self.joins.push(JoinInfo {
                kind,
                table,
                on_columns,
            });
        }
    }

    fn table_factor(&mut self, factor: &TableFactor) -> Option<String> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let alias = alias.as_ref().map(|a| normalize_ident(&a.name));
                Some(self.add_table(name, alias))
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.table_with_joins(table_with_joins);
                None
            }
            _ => None,
        }
    }

    fn add_table(&mut self, name: &ObjectName, alias: Option<String>) -> String {
        let table = name
            .0
            .last()
            .map(normalize_ident)
            .unwrap_or_else(|| name.to_string());
        self.tables.push(TableRef {
            name: table.clone(),
            alias,
        });
        table
    }

    fn predicate(&mut self, expr: &Expr) {
        match expr {
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => {
                    self.predicate(left);
                    self.predicate(right);
                }
                BinaryOperator::Or => {
                    self.or_depth += 1;
                    self.predicate(left);
                    self.predicate(right);
                    self.or_depth -= 1;
                }
                BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq => self.comparison(left, op, right),
                _ => {}
            },
            Expr::Nested(inner) => self.predicate(inner),
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => {
                self.negated = !self.negated;
                self.predicate(expr);
                self.negated = !self.negated;
            }
            Expr::Between { expr, negated, .. } => {
                self.push_negatable(expr, PredicateKind::Range, *negated)
            }
            Expr::InList { expr, negated, .. } | Expr::InSubquery { expr, negated, .. } => {
                self.push_negatable(expr, PredicateKind::InList, *negated)
            }
            Expr::Like { expr, negated, .. } | Expr::ILike { expr, negated, .. } => {
                self.push_negatable(expr, PredicateKind::Like, *negated)
            }
            Expr::IsNull(expr) | Expr::IsNotNull(expr) => self.push(expr, PredicateKind::NullTest),
            _ => {}
        }
    }

    fn comparison(&mut self, left: &Expr, op: &BinaryOperator, right: &Expr) {
        let kind = match op {
            BinaryOperator::Eq => PredicateKind::Equality,
            BinaryOperator::NotEq => PredicateKind::Negated,
            _ => PredicateKind::Range,
        };
        let kind = self.in_context(kind);
        match (column_ref(left), column_ref(right)) {
            (Some(l), Some(r)) => {
                for column in [l, r] {
                    self.predicates.push(Predicate {
                        column,
                        kind: PredicateKind::ColumnComparison,
                    });
                }
            }
            (Some(column), None) | (None, Some(column)) => {
                self.predicates.push(Predicate { column, kind });
            }
            (None, None) => {}
        }
    }

    fn push(&mut self, expr: &Expr, kind: PredicateKind) {
        let kind = self.in_context(kind);
        if let Some(column) = column_ref(expr) {
            self.predicates.push(Predicate { column, kind });
        }
    }

    fn push_negatable(&mut self, expr: &Expr, kind: PredicateKind, negated: bool) {
        let kind = if negated { PredicateKind::Negated } else { kind };
        self.push(expr, kind);
    }

    /// Reclassifies a test found under OR or NOT
    fn in_context(&self, kind: PredicateKind) -> PredicateKind {
        if self.or_depth > 0 {
            PredicateKind::Disjunct
        } else if self.negated {
            PredicateKind::Negated
        } else {
            kind
        }
    }

    fn finish(self, query_type: QueryType) -> QueryFeatures {
        let mut aliases: HashMap<String, String> = HashMap::new();
        for table in &self.tables {
            aliases.insert(table.name.clone(), table.name.clone());
            if let Some(alias) = &table.alias {
                aliases.insert(alias.clone(), table.name.clone());
            }
        }
        let resolve = |mut col: ColumnRef| {
            col.table = col
                .table
                .map(|q| aliases.get(&q).cloned().unwrap_or(q));
            col
        };

        QueryFeatures {
            query_type,
            predicates: self
                .predicates
                .into_iter()
                .map(|p| Predicate {
                    column: resolve(p.column),
                    kind: p.kind,
                })
                .collect(),
            order_by: self.order_by.into_iter().map(resolve).collect(),
            group_by: self.group_by.into_iter().map(resolve).collect(),
            joins: self
                .joins
                .into_iter()
                .map(|j| JoinInfo {
                    kind: j.kind,
                    table: j.table,
                    on_columns: j.on_columns.into_iter().map(resolve).collect(),
                })
                .collect(),
            tables: self.tables,
        }
    }
}

fn join_kind(op: &JoinOperator) -> (JoinKind, Option<&JoinConstraint>) {
    match op {
        JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
        JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
        JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
        JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
        JoinOperator::LeftSemi(c) | JoinOperator::RightSemi(c) => (JoinKind::Semi, Some(c)),
        JoinOperator::LeftAnti(c) | JoinOperator::RightAnti(c) => (JoinKind::Anti, Some(c)),
        JoinOperator::CrossJoin => (JoinKind::Cross, None),
        _ => (JoinKind::Other, None),
    }
}

/// Collects every column that appears on either side of a comparison
fn collect_compared_columns(expr: &Expr, out: &mut Vec<ColumnRef>) {
    match expr {
        Expr::BinaryOp { left, op, right } => {
            if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
                collect_compared_columns(left, out);
                collect_compared_columns(right, out);
            } else {
                out.extend(column_ref(left));
                out.extend(column_ref(right));
            }
        }
        Expr::Nested(inner) => collect_compared_columns(inner, out),
        _ => {}
    }
}

fn column_ref(expr: &Expr) -> Option<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnRef {
            table: None,
            column: normalize_ident(ident),
        }),
        Expr::CompoundIdentifier(parts) => {
            let (column, qualifiers) = parts.split_last()?;
            Some(ColumnRef {
                table: qualifiers.last().map(normalize_ident),
                column: normalize_ident(column),
            })
        }
        Expr::Nested(inner) => column_ref(inner),
        _ => None,
    }
}

/// Unquoted identifiers fold to lower case; quoted ones keep their spelling
fn normalize_ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}
