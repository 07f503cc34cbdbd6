//! Logical operators to query trees
//!
//! Walks the operator tree bottom-up: query graphs go through join
//! ordering, joins and left joins through the merge engine, derived tables
//! fold into their inner route when possible, and subqueries are offered to
//! the route that contains them.

use std::collections::BTreeMap;

use routeplan_common::{PlannerVersion, Result, RouteplanError};
use routeplan_sql::{split_and, Expr, Select, TableSet};
use tracing::trace;

use crate::context::PlanningContext;
use crate::join_planner::{greedy_solve, left_to_right_solve, merge_or_join};
use crate::operators::LogicalOperator;
use crate::query_tree::{DerivedTree, QueryTree, Relation, RouteTree};
use crate::subquery::plan_subqueries;
use crate::transform::route_select;

pub fn optimize_query(ctx: &mut PlanningContext, op: &LogicalOperator) -> Result<QueryTree> {
    match op {
        LogicalOperator::QueryGraph(qg) => match ctx.planner {
            PlannerVersion::Gen4Left2Right => left_to_right_solve(ctx, qg),
            _ => greedy_solve(ctx, qg),
        },
        LogicalOperator::Join {
            lhs,
            rhs,
            predicate,
        } => {
            let lhs = optimize_query(ctx, lhs)?;
            let rhs = optimize_query(ctx, rhs)?;
            let preds = predicate.clone().map(split_and).unwrap_or_default();
            merge_or_join(ctx, lhs, rhs, preds, true)
        }
        LogicalOperator::LeftJoin {
            left,
            right,
            predicate,
            residual,
        } => {
            let left = optimize_query(ctx, left)?;
            let right = optimize_query(ctx, right)?;
            let preds = predicate.clone().map(split_and).unwrap_or_default();
            let mut tree = merge_or_join(ctx, left, right, preds, false)?;
            if !residual.is_empty() {
                match &mut tree {
                    QueryTree::Route(route) => {
                        // filters on the outer-joined side never narrow routing
                        for expr in residual {
                            if !route.predicates.contains(expr) {
                                route.predicates.push(expr.clone());
                            }
                        }
                    }
                    _ => {
                        return Err(RouteplanError::unsupported(
                            "filter on the inner side of a cross-shard left join",
                        ))
                    }
                }
            }
            Ok(tree)
        }
        LogicalOperator::Derived {
            inner,
            alias,
            select,
            id,
        } => optimize_derived(ctx, inner, alias, select, *id),
        LogicalOperator::SubQuery { outer, inner } => {
            let outer = optimize_query(ctx, outer)?;
            let mut inners = Vec::with_capacity(inner.len());
            for sq in inner {
                trace!(arg = %sq.extracted.arg_name, "optimizing subquery");
                inners.push((optimize_query(ctx, &sq.inner)?, sq.extracted.clone()));
            }
            plan_subqueries(ctx, outer, inners)
        }
    }
}

fn optimize_derived(
    ctx: &mut PlanningContext,
    inner: &LogicalOperator,
    alias: &str,
    select: &Select,
    id: TableSet,
) -> Result<QueryTree> {
    let inner = optimize_query(ctx, inner)?;
    if let QueryTree::Route(route) = &inner {
        if route.opcode.is_single_shard() || !select.is_complex() {
            return Ok(QueryTree::Route(fold_derived(route, alias, select, id)));
        }
    }
    if select.has_aggregates() {
        return Err(RouteplanError::unsupported(
            "aggregation inside of a derived table spanning shards",
        ));
    }
    Ok(QueryTree::Derived(DerivedTree {
        query: select.clone(),
        inner: Box::new(inner),
        alias: alias.to_string(),
        id,
        columns: Vec::new(),
    }))
}

/// Turn a route into one that reads the derived table as a sub-select.
fn fold_derived(route: &RouteTree, alias: &str, select: &Select, id: TableSet) -> RouteTree {
    let mut inner_select = route_select(route);
    inner_select.distinct = select.distinct;
    inner_select.select_exprs = select.select_exprs.clone();
    inner_select.group_by = select.group_by.clone();
    inner_select.order_by = select.order_by.clone();
    inner_select.limit = select.limit.clone();
    mark_merged_subqueries(&mut inner_select, &route.sq_to_replace);

    let mut folded = route.clone();
    folded.solved = route.solved.merge(id);
    folded.tables = vec![Relation::Derived {
        id,
        alias: alias.to_string(),
        select: inner_select,
    }];
    folded.left_joins = Vec::new();
    folded.predicates = Vec::new();
    folded.columns = Vec::new();
    folded
}

/// Render absorbed subqueries inline.
pub fn mark_merged_subqueries(select: &mut Select, absorbed: &BTreeMap<String, Select>) {
    if absorbed.is_empty() {
        return;
    }
    select.visit_exprs_mut(&mut |e| {
        if let Expr::Extracted(ex) = e {
            if absorbed.contains_key(&ex.arg_name) {
                ex.merged = true;
            }
        }
        true
    });
}
