use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast::{
    BinaryOperator, Expr, ObjectName, Query, Select, SetExpr, Statement, TableAlias, TableFactor,
    Value, Visit, VisitMut, Visitor, VisitorMut,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::domain::UserId;

/// Functions never allowed in generated SQL: sleeping, settings changes,
/// server-side file or large-object access, cross-database links and
/// query-text evaluators.
const DENIED_FUNCTION_PREFIXES: &[&str] = &["pg_", "dblink", "lo_"];
const DENIED_FUNCTIONS: &[&str] = &[
    "set_config",
    "current_setting",
    "nextval",
    "setval",
    "currval",
    "txid_current",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "query_to_xmlschema",
    "table_to_xml",
    "table_to_xml_and_xmlschema",
    "cursor_to_xml",
    "schema_to_xml",
    "database_to_xml",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableAccess {
    /// Rows belong to the user named in `owner_column`.
    Owned { owner_column: String },
    Shared,
}

/// Tables generated queries may read, and which of them are user-scoped.
#[derive(Debug, Clone, Default)]
pub struct ScopePolicy {
    tables: BTreeMap<String, TableAccess>,
}

impl ScopePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owned(mut self, table: &str, owner_column: &str) -> Self {
        self.tables.insert(
            table.to_lowercase(),
            TableAccess::Owned {
                owner_column: owner_column.to_lowercase(),
            },
        );
        self
    }

    pub fn shared(mut self, table: &str) -> Self {
        self.tables.insert(table.to_lowercase(), TableAccess::Shared);
        self
    }

    /// Invoices, their lines and jobs are per user; the catalog is shared.
    pub fn invoice_schema() -> Self {
        Self::new()
            .owned("invoices", "user_id")
            .owned("invoice_line_items", "user_id")
            .owned("extraction_jobs", "user_id")
            .shared("catalog_entities")
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn owner_column(&self, table: &str) -> Option<&str> {
        match self.tables.get(table) {
            Some(TableAccess::Owned { owner_column }) => Some(owner_column),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedQuery {
    pub sql: String,
    /// Owned-table references that were wrapped in a user filter.
    pub scoped_references: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryValidationError {
    #[error("query is empty")]
    Empty,
    #[error("query could not be parsed: {0}")]
    Unparseable(String),
    #[error("expected exactly one statement, found {0}")]
    StatementCount(usize),
    #[error("only read-only SELECT queries are allowed, found {0}")]
    NotReadOnly(String),
    #[error("row locking clauses are not allowed")]
    LockingClause,
    #[error("SELECT INTO is not allowed")]
    SelectInto,
    #[error("function {0} is not allowed")]
    DeniedFunction(String),
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("relation {0} is not allowed")]
    UnsupportedRelation(String),
    #[error("user scope could not be verified: {owned} owned reference(s), {scoped} scoped")]
    ScopeMismatch { owned: usize, scoped: usize },
}

/// Validates a generated query and rewrites every owned-table reference
/// into a derived table filtered to `user_id`. Fails closed: if the rewrite
/// cannot be verified on the re-parsed output, the query is rejected.
pub fn scope_query(
    sql: &str,
    user_id: UserId,
    policy: &ScopePolicy,
) -> Result<ScopedQuery, QueryValidationError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(QueryValidationError::Empty);
    }

    let mut statement = parse_read_query(sql)?;

    let mut inspector = ReadOnlyInspector {
        policy,
        cte_names: HashSet::new(),
    };
    if let ControlFlow::Break(e) = Visit::visit(&statement, &mut inspector) {
        return Err(e);
    }

    let user = user_id.to_string();
    let mut rewriter = ScopeRewriter {
        policy,
        user: &user,
        rewritten: 0,
    };
    if let ControlFlow::Break(e) = VisitMut::visit(&mut statement, &mut rewriter) {
        return Err(e);
    }

    let scoped_sql = statement.to_string();
    let audited = parse_read_query(&scoped_sql)?;
    let mut audit = ScopeAudit {
        policy,
        user: &user,
        owned: 0,
        scoped: 0,
    };
    let _ = Visit::visit(&audited, &mut audit);
    if audit.owned != audit.scoped || audit.scoped != rewriter.rewritten {
        return Err(QueryValidationError::ScopeMismatch {
            owned: audit.owned,
            scoped: audit.scoped,
        });
    }

    Ok(ScopedQuery {
        sql: scoped_sql,
        scoped_references: rewriter.rewritten,
    })
}

fn parse_read_query(sql: &str) -> Result<Statement, QueryValidationError> {
    let dialect = PostgreSqlDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| QueryValidationError::Unparseable(e.to_string()))?;
    if statements.len() != 1 {
        return Err(QueryValidationError::StatementCount(statements.len()));
    }
    match statements.pop() {
        Some(statement @ Statement::Query(_)) => Ok(statement),
        Some(other) => Err(QueryValidationError::NotReadOnly(statement_keyword(&other))),
        None => Err(QueryValidationError::StatementCount(0)),
    }
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

/// Plain or `public.`-qualified table name, lowercased.
fn relation_name(name: &ObjectName) -> Result<String, QueryValidationError> {
    match name.0.as_slice() {
        [table] => Ok(table.value.to_lowercase()),
        [schema, table] if schema.value.eq_ignore_ascii_case("public") => {
            Ok(table.value.to_lowercase())
        }
        _ => Err(QueryValidationError::UnsupportedRelation(name.to_string())),
    }
}

fn is_denied_function(name: &str) -> bool {
    DENIED_FUNCTIONS.contains(&name)
        || DENIED_FUNCTION_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

struct ReadOnlyInspector<'a> {
    policy: &'a ScopePolicy,
    cte_names: HashSet<String>,
}

impl Visitor for ReadOnlyInspector<'_> {
    type Break = QueryValidationError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
            }
        }
        if !query.locks.is_empty() {
            return ControlFlow::Break(QueryValidationError::LockingClause);
        }
        check_body(&query.body)
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            TableFactor::Table { name, args, .. } => {
                if args.is_some() {
                    return ControlFlow::Break(QueryValidationError::UnsupportedRelation(
                        name.to_string(),
                    ));
                }
                let table = match relation_name(name) {
                    Ok(table) => table,
                    Err(e) => return ControlFlow::Break(e),
                };
                if self.policy.contains(&table) || self.cte_names.contains(&table) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(QueryValidationError::UnknownTable(table))
                }
            }
            TableFactor::Derived { .. } | TableFactor::NestedJoin { .. } => ControlFlow::Continue(()),
            other => ControlFlow::Break(QueryValidationError::UnsupportedRelation(
                other.to_string(),
            )),
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Expr::Function(function) = expr {
            if let Some(ident) = function.name.0.last() {
                let name = ident.value.to_lowercase();
                if is_denied_function(&name) {
                    return ControlFlow::Break(QueryValidationError::DeniedFunction(name));
                }
            }
        }
        ControlFlow::Continue(())
    }
}

fn check_body(body: &SetExpr) -> ControlFlow<QueryValidationError> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => {
            ControlFlow::Break(QueryValidationError::SelectInto)
        }
        SetExpr::Select(_) | SetExpr::Query(_) | SetExpr::Values(_) => ControlFlow::Continue(()),
        SetExpr::SetOperation { left, right, .. } => {
            if let ControlFlow::Break(e) = check_body(left) {
                return ControlFlow::Break(e);
            }
            check_body(right)
        }
        other => ControlFlow::Break(QueryValidationError::NotReadOnly(statement_body_keyword(
            other,
        ))),
    }
}

fn statement_body_keyword(body: &SetExpr) -> String {
    body.to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

struct ScopeRewriter<'a> {
    policy: &'a ScopePolicy,
    user: &'a str,
    rewritten: usize,
}

impl VisitorMut for ScopeRewriter<'_> {
    type Break = QueryValidationError;

    fn post_visit_table_factor(
        &mut self,
        table_factor: &mut TableFactor,
    ) -> ControlFlow<Self::Break> {
        let TableFactor::Table { name, alias, .. } = table_factor else {
            return ControlFlow::Continue(());
        };
        let table = match relation_name(name) {
            Ok(table) => table,
            Err(e) => return ControlFlow::Break(e),
        };
        let Some(owner_column) = self.policy.owner_column(&table) else {
            return ControlFlow::Continue(());
        };

        let alias = alias.clone().unwrap_or_else(|| TableAlias {
            name: name.0.last().cloned().unwrap_or_else(|| table.as_str().into()),
            columns: Vec::new(),
        });
        match scoped_relation(&table, owner_column, self.user, alias) {
            Ok(replacement) => {
                *table_factor = replacement;
                self.rewritten += 1;
                ControlFlow::Continue(())
            }
            Err(e) => ControlFlow::Break(e),
        }
    }
}

/// `(SELECT * FROM "table" WHERE "owner" = 'user') AS alias`
fn scoped_relation(
    table: &str,
    owner_column: &str,
    user: &str,
    alias: TableAlias,
) -> Result<TableFactor, QueryValidationError> {
    let wrapper = format!(
        "SELECT * FROM (SELECT * FROM \"{}\" WHERE \"{}\" = '{}') AS scoped",
        table, owner_column, user
    );
    let Statement::Query(query) = parse_read_query(&wrapper)? else {
        return Err(QueryValidationError::Unparseable(wrapper));
    };
    let Query { body, .. } = *query;
    let SetExpr::Select(select) = *body else {
        return Err(QueryValidationError::Unparseable(wrapper));
    };
    let Select { from, .. } = *select;
    let mut relation = from
        .into_iter()
        .next()
        .map(|t| t.relation)
        .ok_or_else(|| QueryValidationError::Unparseable(wrapper.clone()))?;
    if let TableFactor::Derived {
        alias: derived_alias,
        ..
    } = &mut relation
    {
        *derived_alias = Some(alias);
    }
    Ok(relation)
}

struct ScopeAudit<'a> {
    policy: &'a ScopePolicy,
    user: &'a str,
    owned: usize,
    scoped: usize,
}

impl ScopeAudit<'_> {
    fn is_scope_wrapper(&self, query: &Query) -> bool {
        if query.with.is_some() {
            return false;
        }
        let SetExpr::Select(select) = query.body.as_ref() else {
            return false;
        };
        let [from] = select.from.as_slice() else {
            return false;
        };
        if !from.joins.is_empty() {
            return false;
        }
        let TableFactor::Table { name, .. } = &from.relation else {
            return false;
        };
        let Some(owner_column) = relation_name(name)
            .ok()
            .and_then(|table| self.policy.owner_column(&table))
        else {
            return false;
        };

        match &select.selection {
            Some(Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            }) => {
                matches!(left.as_ref(), Expr::Identifier(ident) if ident.value == owner_column)
                    && matches!(
                        right.as_ref(),
                        Expr::Value(Value::SingleQuotedString(value)) if value == self.user
                    )
            }
            _ => false,
        }
    }
}

impl Visitor for ScopeAudit<'_> {
    type Break = ();

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            TableFactor::Table { name, .. } => {
                let owned = relation_name(name)
                    .ok()
                    .is_some_and(|table| self.policy.owner_column(&table).is_some());
                if owned {
                    self.owned += 1;
                }
            }
            TableFactor::Derived { subquery, .. } if self.is_scope_wrapper(subquery) => {
                self.scoped += 1;
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}
