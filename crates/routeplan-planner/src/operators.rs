//! Logical operators
//!
//! A SELECT is first turned into a tree of logical operators. Runs of
//! inner-joined tables collapse into a single [`QueryGraph`]; outer joins,
//! derived tables and subqueries keep their own nodes. Predicates are pushed
//! as deep as their table dependencies allow.

use routeplan_common::{Result, RouteplanError};
use routeplan_sql::{
    split_and, Expr, ExtractedSubquery, JoinKind, Select, SelectExpr, SimpleTableExpr, TableExpr,
    TableName, TableSet,
};
use tracing::trace;

use crate::context::PlanningContext;

// ============================================================================
// QueryGraph
// ============================================================================

/// A table inside a query graph with the predicates that touch only it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTable {
    pub id: TableSet,
    pub alias: Option<String>,
    pub table: TableName,
    pub predicates: Vec<Expr>,
    pub is_infoschema: bool,
}

/// Predicates that span several tables, keyed by the tables they need.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerJoinPredicates {
    pub deps: TableSet,
    pub exprs: Vec<Expr>,
}

/// Inner-joined tables and the predicates between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryGraph {
    pub tables: Vec<QueryTable>,
    /// Kept in insertion order so planning is deterministic
    pub inner_joins: Vec<InnerJoinPredicates>,
    /// Predicates that reference no table, applied to every seeded route
    pub no_deps: Vec<Expr>,
}

impl QueryGraph {
    pub fn table_id(&self) -> TableSet {
        self.tables
            .iter()
            .fold(TableSet::EMPTY, |acc, t| acc.merge(t.id))
    }

    /// Predicates usable to join `lhs` with `rhs`: solved by the two sides
    /// together and touching both.
    pub fn get_predicates(&self, lhs: TableSet, rhs: TableSet) -> Vec<Expr> {
        let both = lhs.merge(rhs);
        self.inner_joins
            .iter()
            .filter(|join| {
                join.deps.is_solved_by(both)
                    && join.deps.is_overlapping(lhs)
                    && join.deps.is_overlapping(rhs)
            })
            .flat_map(|join| join.exprs.iter().cloned())
            .collect()
    }

    pub fn add_predicate(&mut self, ctx: &PlanningContext, expr: Expr) -> Result<()> {
        let deps = ctx.semtable.recursive_deps(&expr);
        match deps.num_tables() {
            0 => self.no_deps.push(expr),
            1 => match self.tables.iter_mut().find(|t| t.id == deps) {
                Some(table) => {
                    if !table.predicates.contains(&expr) {
                        table.predicates.push(expr);
                    }
                }
                // a correlated predicate naming only an outer table
                None => self.add_join_predicate(deps, expr),
            },
            _ => self.add_join_predicate(deps, expr),
        }
        Ok(())
    }

    fn add_join_predicate(&mut self, deps: TableSet, expr: Expr) {
        match self.inner_joins.iter_mut().find(|j| j.deps == deps) {
            Some(join) => {
                if !join.exprs.contains(&expr) {
                    join.exprs.push(expr);
                }
            }
            None => self.inner_joins.push(InnerJoinPredicates {
                deps,
                exprs: vec![expr],
            }),
        }
    }
}

// ============================================================================
// LogicalOperator
// ============================================================================

/// A subquery planned separately from the query that contains it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQueryInner {
    pub inner: LogicalOperator,
    pub extracted: ExtractedSubquery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOperator {
    QueryGraph(QueryGraph),
    /// Inner join between operators that are not plain tables
    Join {
        lhs: Box<LogicalOperator>,
        rhs: Box<LogicalOperator>,
        predicate: Option<Expr>,
    },
    LeftJoin {
        left: Box<LogicalOperator>,
        right: Box<LogicalOperator>,
        /// The ON condition
        predicate: Option<Expr>,
        /// WHERE filters that need the outer side
        residual: Vec<Expr>,
    },
    Derived {
        inner: Box<LogicalOperator>,
        alias: String,
        select: Select,
        id: TableSet,
    },
    SubQuery {
        outer: Box<LogicalOperator>,
        inner: Vec<SubQueryInner>,
    },
}

impl LogicalOperator {
    /// Tables solved by this operator; derived tables count as the tables
    /// they read.
    pub fn table_id(&self) -> TableSet {
        match self {
            LogicalOperator::QueryGraph(qg) => qg.table_id(),
            LogicalOperator::Join { lhs, rhs, .. } => lhs.table_id().merge(rhs.table_id()),
            LogicalOperator::LeftJoin { left, right, .. } => {
                left.table_id().merge(right.table_id())
            }
            LogicalOperator::Derived { inner, id, .. } => inner.table_id().merge(*id),
            LogicalOperator::SubQuery { outer, .. } => outer.table_id(),
        }
    }

    /// Push a predicate as close to the tables it reads as possible.
    pub fn push_predicate(&mut self, ctx: &PlanningContext, expr: Expr) -> Result<()> {
        match self {
            LogicalOperator::QueryGraph(qg) => qg.add_predicate(ctx, expr),
            LogicalOperator::Join {
                lhs,
                rhs,
                predicate,
            } => {
                let deps = ctx.semtable.recursive_deps(&expr);
                if deps.is_solved_by(lhs.table_id()) {
                    lhs.push_predicate(ctx, expr)
                } else if deps.is_solved_by(rhs.table_id()) {
                    rhs.push_predicate(ctx, expr)
                } else {
                    *predicate = Some(match predicate.take() {
                        Some(existing) => Expr::and(existing, expr),
                        None => expr,
                    });
                    Ok(())
                }
            }
            LogicalOperator::LeftJoin { left, residual, .. } => {
                let deps = ctx.semtable.recursive_deps(&expr);
                if deps.is_solved_by(left.table_id()) {
                    left.push_predicate(ctx, expr)
                } else {
                    residual.push(expr);
                    Ok(())
                }
            }
            LogicalOperator::Derived {
                inner, select, id, ..
            } => {
                if select.is_complex() {
                    return Err(RouteplanError::unsupported(
                        "filter on a derived table with grouping, aggregation, distinct or limit",
                    ));
                }
                let rewritten = rewrite_derived_expr(&expr, *id, select)?;
                inner.push_predicate(ctx, rewritten)
            }
            LogicalOperator::SubQuery { outer, .. } => outer.push_predicate(ctx, expr),
        }
    }
}

/// Replace references to a derived table's columns with the expressions
/// that define them.
pub fn rewrite_derived_expr(expr: &Expr, derived: TableSet, select: &Select) -> Result<Expr> {
    let mut rewritten = expr.clone();
    let mut missing = None;
    rewritten.visit_mut(&mut |e| {
        let replacement = match e {
            Expr::Column(col) if col.deps == derived => {
                let found = select.select_exprs.iter().find_map(|se| match se {
                    SelectExpr::Aliased(ae) if ae.column_name().eq_ignore_ascii_case(&col.name) => {
                        Some(ae.expr.clone())
                    }
                    _ => None,
                });
                if found.is_none() {
                    missing = Some(col.name.clone());
                }
                found
            }
            _ => None,
        };
        match replacement {
            Some(inner) => {
                *e = inner;
                false
            }
            None => true,
        }
    });
    match missing {
        Some(name) => Err(RouteplanError::NotFound(format!(
            "column '{}' in derived table",
            name
        ))),
        None => Ok(rewritten),
    }
}

// ============================================================================
// Construction from the AST
// ============================================================================

/// Build the operator tree of one SELECT scope. Subqueries must already be
/// extracted.
pub fn create_logical_operator(ctx: &PlanningContext, sel: &Select) -> Result<LogicalOperator> {
    let mut op = create_from_tables(ctx, &sel.from)?;

    if let Some(where_clause) = &sel.where_clause {
        for pred in split_and(where_clause.clone()) {
            op.push_predicate(ctx, pred)?;
        }
    }

    let mut extracted: Vec<ExtractedSubquery> = Vec::new();
    let mut scope_exprs: Vec<&Expr> = sel.where_clause.iter().collect();
    scope_exprs.extend(sel.select_exprs.iter().filter_map(|se| match se {
        SelectExpr::Aliased(ae) => Some(&ae.expr),
        SelectExpr::Star(_) => None,
    }));
    for e in scope_exprs {
        for ex in e.extracted_subqueries() {
            if !extracted.iter().any(|seen| seen.arg_name == ex.arg_name) {
                extracted.push(ex.clone());
            }
        }
    }
    if extracted.is_empty() {
        return Ok(op);
    }

    let mut inner = Vec::with_capacity(extracted.len());
    for ex in extracted {
        trace!(arg = %ex.arg_name, kind = ex.kind.name(), "planning subquery separately");
        inner.push(SubQueryInner {
            inner: create_logical_operator(ctx, &ex.subquery)?,
            extracted: ex,
        });
    }
    Ok(LogicalOperator::SubQuery {
        outer: Box::new(op),
        inner,
    })
}

fn create_from_tables(ctx: &PlanningContext, from: &[TableExpr]) -> Result<LogicalOperator> {
    let mut qg = QueryGraph::default();
    let mut others = Vec::new();
    let mut pending = Vec::new();

    if from.is_empty() {
        qg.tables.push(QueryTable {
            id: TableSet::EMPTY,
            alias: None,
            table: TableName::new("dual"),
            predicates: Vec::new(),
            is_infoschema: false,
        });
    }
    for te in from {
        add_table_expr(ctx, te, &mut qg, &mut others, &mut pending)?;
    }

    let mut op = if qg.tables.is_empty() {
        None
    } else {
        Some(LogicalOperator::QueryGraph(qg))
    };
    for other in others {
        op = Some(match op {
            None => other,
            Some(lhs) => LogicalOperator::Join {
                lhs: Box::new(lhs),
                rhs: Box::new(other),
                predicate: None,
            },
        });
    }
    let mut op = op.ok_or_else(|| RouteplanError::internal("FROM clause produced no operator"))?;
    for pred in pending {
        op.push_predicate(ctx, pred)?;
    }
    Ok(op)
}

fn add_table_expr(
    ctx: &PlanningContext,
    te: &TableExpr,
    qg: &mut QueryGraph,
    others: &mut Vec<LogicalOperator>,
    pending: &mut Vec<Expr>,
) -> Result<()> {
    match te {
        TableExpr::Aliased(aliased) => match &aliased.expr {
            SimpleTableExpr::Table(name) => {
                qg.tables.push(QueryTable {
                    id: aliased.id,
                    alias: aliased.alias.clone(),
                    table: name.clone(),
                    predicates: Vec::new(),
                    is_infoschema: name.is_system_schema(),
                });
                Ok(())
            }
            SimpleTableExpr::Derived(inner) => {
                let alias = aliased.alias.clone().ok_or_else(|| {
                    RouteplanError::SqlParse(
                        "every derived table must have its own alias".to_string(),
                    )
                })?;
                others.push(LogicalOperator::Derived {
                    inner: Box::new(create_logical_operator(ctx, inner)?),
                    alias,
                    select: inner.as_ref().clone(),
                    id: aliased.id,
                });
                Ok(())
            }
        },
        TableExpr::Join(join) => {
            if join
                .on
                .as_ref()
                .map(Expr::contains_subquery)
                .unwrap_or(false)
            {
                return Err(RouteplanError::unsupported("subquery in a JOIN condition"));
            }
            match join.kind {
                JoinKind::Inner => {
                    add_table_expr(ctx, &join.left, qg, others, pending)?;
                    add_table_expr(ctx, &join.right, qg, others, pending)?;
                    if let Some(on) = &join.on {
                        pending.extend(split_and(on.clone()));
                    }
                    Ok(())
                }
                JoinKind::Left => {
                    let left = create_from_tables(ctx, std::slice::from_ref(&join.left))?;
                    let right = create_from_tables(ctx, std::slice::from_ref(&join.right))?;
                    others.push(LogicalOperator::LeftJoin {
                        left: Box::new(left),
                        right: Box::new(right),
                        predicate: join.on.clone(),
                        residual: Vec::new(),
                    });
                    Ok(())
                }
                JoinKind::Right => Err(RouteplanError::unsupported("RIGHT JOIN")),
            }
        }
        TableExpr::Paren(list) => {
            for inner in list {
                add_table_expr(ctx, inner, qg, others, pending)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeplan_common::PlannerVersion;
    use routeplan_sql::{analyze, SqlParser};
    use routeplan_vschema::{InMemoryVSchema, TableDef, VindexKind};
    use std::collections::HashSet;

    fn vschema() -> InMemoryVSchema {
        let vs = InMemoryVSchema::new().with_default_keyspace("main");
        vs.add_keyspace("main", true).unwrap();
        vs.add_vindex("main", "hash", VindexKind::Hash).unwrap();
        for name in ["user", "user_extra", "music"] {
            vs.add_table("main", name, &TableDef::new().vindex("id", "hash"))
                .unwrap();
        }
        vs
    }

    fn build(sql: &str) -> LogicalOperator {
        let vs = vschema();
        let mut sel = SqlParser::parse_select(sql).unwrap();
        let semtable = analyze(&mut sel, &vs).unwrap();
        let ctx = PlanningContext::new(&semtable, &vs, PlannerVersion::Gen4, HashSet::new());
        create_logical_operator(&ctx, &sel).unwrap()
    }

    #[test]
    fn test_inner_joins_collapse_into_one_graph() {
        let op = build(
            "select 1 from user u join user_extra ue on u.id = ue.user_id, music m \
             where m.user_id = u.id and u.id = 5 and 1 = 1",
        );
        let LogicalOperator::QueryGraph(qg) = op else {
            panic!("expected a query graph, got {:?}", op);
        };
        assert_eq!(qg.tables.len(), 3);
        assert_eq!(qg.tables[0].predicates.len(), 1);
        assert_eq!(qg.inner_joins.len(), 2);
        assert_eq!(qg.no_deps.len(), 1);

        let u = qg.tables[0].id;
        let ue = qg.tables[1].id;
        let m = qg.tables[2].id;
        assert_eq!(qg.get_predicates(u, ue).len(), 1);
        assert_eq!(qg.get_predicates(ue, m).len(), 0);
        assert_eq!(qg.get_predicates(u.merge(ue), m).len(), 1);
    }

    #[test]
    fn test_left_join_keeps_residual_filters() {
        let op = build(
            "select 1 from user u left join user_extra ue on u.id = ue.user_id \
             where u.id = 1 and ue.id is null",
        );
        let LogicalOperator::LeftJoin {
            left,
            predicate,
            residual,
            ..
        } = op
        else {
            panic!("expected a left join");
        };
        assert!(predicate.is_some());
        assert_eq!(residual.len(), 1);
        let LogicalOperator::QueryGraph(qg) = *left else {
            panic!("expected a query graph on the left");
        };
        assert_eq!(qg.tables[0].predicates.len(), 1);
    }

    #[test]
    fn test_empty_from_plans_against_dual() {
        let op = build("select 1");
        let LogicalOperator::QueryGraph(qg) = op else {
            panic!("expected a query graph");
        };
        assert_eq!(qg.tables[0].table.name, "dual");
    }

    #[test]
    fn test_right_join_is_unsupported() {
        let vs = vschema();
        let mut sel =
            SqlParser::parse_select("select 1 from user u right join music m on u.id = m.id")
                .unwrap();
        let semtable = analyze(&mut sel, &vs).unwrap();
        let ctx = PlanningContext::new(&semtable, &vs, PlannerVersion::Gen4, HashSet::new());
        let err = create_logical_operator(&ctx, &sel).unwrap_err();
        assert!(err.is_unsupported());
    }
}
