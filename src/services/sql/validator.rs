//! Safe SQL validation
//!
//! Two independent checks guard every dataset query:
//!
//! 1. `validate_safe_select` — lexical + parse-tree guard: single read-only
//!    SELECT (or CTE-wrapped SELECT), no mutation keywords or nodes.
//! 2. `validate_sql_references` — every table reference must be the active
//!    dataset table and every column reference must be a known column, a
//!    select-list alias, or `*`. CTE names introduced by the query itself
//!    count as in-scope tables.
//!
//! The keyword scan is substring-based on purpose: dataset identifiers are
//! slugified to lower-case at ingestion, so an upper-cased keyword can only
//! come from the statement itself.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    Expr, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Visit,
    Visitor,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

const FORBIDDEN_KEYWORDS: [&str; 12] = [
    "DROP", "DELETE", "UPDATE", "ALTER", "PRAGMA", "ATTACH", "DETACH", "VACUUM", "TRUNCATE",
    "REPLACE", "CREATE", "INSERT",
];

/// A query failed the safety or reference check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationRejected(pub String);

impl ValidationRejected {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Strip whitespace and at most one trailing semicolon.
fn strip_statement(sql: &str) -> &str {
    let trimmed = sql.trim();
    trimmed.strip_suffix(';').map(str::trim_end).unwrap_or(trimmed)
}

fn parse_single_statement(sql: &str) -> Result<Statement, ValidationRejected> {
    let mut statements = Parser::parse_sql(&SQLiteDialect {}, sql)
        .map_err(|e| ValidationRejected::new(format!("Invalid SQL: {e}")))?;
    if statements.len() != 1 {
        return Err(ValidationRejected::new("Multiple statements are not allowed"));
    }
    Ok(statements.remove(0))
}

/// Reject anything that is not a single read-only SELECT statement.
pub fn validate_safe_select(sql: &str) -> Result<(), ValidationRejected> {
    let stripped = strip_statement(sql);
    if stripped.is_empty() {
        return Err(ValidationRejected::new("Empty SQL"));
    }

    if stripped.contains(';') {
        return Err(ValidationRejected::new("Multiple statements are not allowed"));
    }

    let upper = stripped.to_uppercase();
    for keyword in FORBIDDEN_KEYWORDS {
        if upper.contains(keyword) {
            return Err(ValidationRejected::new(format!(
                "Forbidden keyword detected: {keyword}"
            )));
        }
    }

    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(ValidationRejected::new("Only SELECT statements are allowed"));
    }

    let statement = parse_single_statement(stripped)?;
    let Statement::Query(_) = &statement else {
        return Err(ValidationRejected::new("Only top-level SELECT queries are allowed"));
    };

    let refs = collect_references(&statement);
    if let Some(node) = refs.forbidden_node {
        return Err(ValidationRejected::new(format!("Forbidden SQL node: {node}")));
    }

    Ok(())
}

/// Check that the query only touches the active table and known columns.
pub fn validate_sql_references(
    sql: &str,
    table_name: &str,
    allowed_columns: &[String],
) -> Result<(), ValidationRejected> {
    let stripped = sql.trim();
    if stripped.is_empty() {
        return Err(ValidationRejected::new("Empty SQL"));
    }

    let statement = parse_single_statement(stripped)?;
    let refs = collect_references(&statement);

    let table_refs: BTreeSet<&String> =
        refs.tables.iter().filter(|name| !refs.cte_names.contains(*name)).collect();

    if table_refs.is_empty() {
        return Err(ValidationRejected::new(format!(
            "Query must reference dataset table \"{table_name}\"."
        )));
    }

    let invalid_tables: Vec<&str> = table_refs
        .iter()
        .filter(|name| name.as_str() != table_name)
        .map(|name| name.as_str())
        .collect();
    if !invalid_tables.is_empty() {
        return Err(ValidationRejected::new(format!(
            "Query references unsupported table(s): {}",
            invalid_tables.join(", ")
        )));
    }

    let allowed: BTreeSet<&str> = allowed_columns.iter().map(String::as_str).collect();
    let unknown_columns: Vec<&str> = refs
        .columns
        .iter()
        .filter(|column| {
            let name = column.as_str();
            name != "*" && !allowed.contains(name) && !refs.aliases.contains(*column)
        })
        .map(String::as_str)
        .collect();
    if !unknown_columns.is_empty() {
        return Err(ValidationRejected::new(format!(
            "Query references unknown column(s): {}",
            unknown_columns.join(", ")
        )));
    }

    Ok(())
}

#[derive(Default)]
struct References {
    tables: BTreeSet<String>,
    cte_names: BTreeSet<String>,
    columns: BTreeSet<String>,
    aliases: BTreeSet<String>,
    forbidden_node: Option<&'static str>,
}

/// Gather table/column identifiers via the AST visitor, plus CTE names and
/// select-list aliases via a structural walk of the query tree.
fn collect_references(statement: &Statement) -> References {
    let mut refs = References::default();

    let mut collector = IdentCollector { refs: &mut refs };
    let _ = statement.visit(&mut collector);

    if let Statement::Query(query) = statement {
        walk_query(query, &mut refs);
    }
    refs
}

fn walk_query(query: &Query, refs: &mut References) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            refs.cte_names.insert(cte.alias.name.value.clone());
            walk_query(&cte.query, refs);
        }
    }
    walk_set_expr(&query.body, refs);
}

fn walk_set_expr(body: &SetExpr, refs: &mut References) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    refs.aliases.insert(alias.value.clone());
                }
            }
            for table in &select.from {
                walk_table_with_joins(table, refs);
            }
        },
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, refs);
            walk_set_expr(right, refs);
        },
        SetExpr::Query(query) => walk_query(query, refs),
        // Mutation nodes embedded as set expressions wrap a Statement, which
        // the visitor's statement callback flags.
        _ => {},
    }
}

fn walk_table_with_joins(table: &TableWithJoins, refs: &mut References) {
    walk_table_factor(&table.relation, refs);
    for join in &table.joins {
        walk_table_factor(&join.relation, refs);
    }
}

fn walk_table_factor(factor: &TableFactor, refs: &mut References) {
    match factor {
        TableFactor::Derived { subquery, .. } => walk_query(subquery, refs),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            walk_table_with_joins(table_with_joins, refs);
        },
        _ => {},
    }
}

/// Visitor collecting relation names, column identifiers, and any embedded
/// non-SELECT statement. Subqueries inside expressions are covered because
/// the visitor walks the full tree.
struct IdentCollector<'a> {
    refs: &'a mut References,
}

impl Visitor for IdentCollector<'_> {
    type Break = ();

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if let Some(ident) = relation.0.last() {
            self.refs.tables.insert(ident.value.clone());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => {
                self.refs.columns.insert(ident.value.clone());
            },
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    self.refs.columns.insert(last.value.clone());
                }
            },
            Expr::Subquery(query) | Expr::Exists { subquery: query, .. } => {
                // Alias scopes inside expression-level subqueries are not on
                // the structural walk's path.
                walk_query(query, self.refs);
            },
            _ => {},
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        if !matches!(statement, Statement::Query(_)) {
            self.refs.forbidden_node = Some("non-SELECT statement");
        }
        ControlFlow::Continue(())
    }
}
