//! Join ordering over a query graph
//!
//! Tables start as one route each. Pairs are then combined, merging routes
//! where the merge engine allows and falling back to nested-loop joins
//! where it does not. Columns that a join's right side needs from its left
//! side travel as bind variables.

use routeplan_common::{Result, RouteplanError};
use routeplan_sql::{AliasedExpr, Expr, TableSet};
use tracing::{debug, trace};

use crate::context::PlanningContext;
use crate::memo::JoinMemo;
use crate::merge::try_merge;
use crate::operators::{rewrite_derived_expr, QueryGraph};
use crate::query_tree::QueryTree;
use crate::route::create_route;

/// One route per table, each with the predicates that need no table.
fn seed_plan_list(ctx: &mut PlanningContext, qg: &QueryGraph) -> Result<Vec<QueryTree>> {
    let mut plans = Vec::with_capacity(qg.tables.len());
    for table in &qg.tables {
        let mut route = create_route(ctx, table)?;
        for pred in &qg.no_deps {
            route.add_predicate(ctx, pred.clone())?;
        }
        plans.push(QueryTree::Route(route));
    }
    Ok(plans)
}

/// Repeatedly combine the cheapest pair until one tree is left. Pairs
/// without a join predicate are only considered once no connected pair
/// remains.
pub fn greedy_solve(ctx: &mut PlanningContext, qg: &QueryGraph) -> Result<QueryTree> {
    let mut plans = seed_plan_list(ctx, qg)?;
    let mut memo = JoinMemo::new();
    let mut cross_joins_ok = false;

    while plans.len() > 1 {
        let mut best: Option<(QueryTree, usize, usize)> = None;
        for i in 0..plans.len() {
            for j in 0..plans.len() {
                if i == j {
                    continue;
                }
                let lhs_id = plans[i].table_id();
                let rhs_id = plans[j].table_id();
                let preds = qg.get_predicates(lhs_id, rhs_id);
                if preds.is_empty() && !cross_joins_ok {
                    continue;
                }
                let plan = match memo.get(lhs_id, rhs_id) {
                    Some(plan) => plan,
                    None => {
                        let plan =
                            merge_or_join(ctx, plans[i].clone(), plans[j].clone(), preds, true)?;
                        memo.insert(lhs_id, rhs_id, plan.clone());
                        plan
                    }
                };
                let better = best
                    .as_ref()
                    .map(|(current, _, _)| plan.cost() < current.cost())
                    .unwrap_or(true);
                if better {
                    best = Some((plan, i, j));
                }
            }
        }

        match best {
            Some((plan, i, j)) => {
                trace!(lhs = i, rhs = j, cost = plan.cost(), "joined pair");
                plans.remove(i.max(j));
                plans.remove(i.min(j));
                plans.push(plan);
            }
            None if cross_joins_ok => {
                return Err(RouteplanError::internal("no join plan found for query graph"));
            }
            None => cross_joins_ok = true,
        }
    }

    debug!(memoized = memo.len(), memo_hits = memo.hits(), "greedy join ordering done");
    plans
        .pop()
        .ok_or_else(|| RouteplanError::internal("query graph without tables"))
}

/// Join tables strictly in FROM-clause order.
pub fn left_to_right_solve(ctx: &mut PlanningContext, qg: &QueryGraph) -> Result<QueryTree> {
    let mut plans = seed_plan_list(ctx, qg)?.into_iter();
    let mut acc = plans
        .next()
        .ok_or_else(|| RouteplanError::internal("query graph without tables"))?;
    for plan in plans {
        let preds = qg.get_predicates(acc.table_id(), plan.table_id());
        acc = merge_or_join(ctx, acc, plan, preds, true)?;
    }
    Ok(acc)
}

/// Merge the two trees into one route if possible, else join them.
pub fn merge_or_join(
    ctx: &mut PlanningContext,
    lhs: QueryTree,
    rhs: QueryTree,
    predicates: Vec<Expr>,
    inner: bool,
) -> Result<QueryTree> {
    if let Some(merged) = try_merge(ctx, &lhs, &rhs, &predicates, inner)? {
        return Ok(merged);
    }
    let mut tree = QueryTree::new_join(lhs, rhs, !inner);
    for pred in predicates {
        push_join_predicate(ctx, &mut tree, pred)?;
    }
    Ok(tree)
}

/// Place a predicate in a tree. Across a join, columns of the left side are
/// replaced by bind variables filled from each left row.
pub fn push_join_predicate(ctx: &mut PlanningContext, tree: &mut QueryTree, expr: Expr) -> Result<()> {
    match tree {
        QueryTree::Route(route) => route.add_predicate(ctx, expr),
        QueryTree::Join(join) => {
            let deps = ctx.semtable.recursive_deps(&expr);
            let lhs_id = join.lhs.table_id();
            // an ON condition may not filter the outer side
            if !join.outer && deps.is_solved_by(lhs_id) {
                return push_join_predicate(ctx, &mut join.lhs, expr);
            }
            if deps.is_solved_by(join.rhs.table_id()) {
                return push_join_predicate(ctx, &mut join.rhs, expr);
            }
            let (rewritten, columns) = break_expression(ctx, &expr, lhs_id);
            for (name, col) in columns {
                let offset = push_output_column(ctx, &mut join.lhs, &col)?;
                join.vars.insert(name, offset);
            }
            push_join_predicate(ctx, &mut join.rhs, rewritten)
        }
        QueryTree::Derived(derived) => {
            if derived.query.is_complex() {
                return Err(RouteplanError::unsupported(
                    "join condition on a derived table with grouping, aggregation, distinct or limit",
                ));
            }
            let rewritten = rewrite_derived_expr(&expr, derived.id, &derived.query)?;
            push_join_predicate(ctx, &mut derived.inner, rewritten)
        }
        QueryTree::Subquery(sq) => push_join_predicate(ctx, &mut sq.outer, expr),
    }
}

/// Replace columns of `lhs` tables with bind variables. Returns the
/// rewritten expression and the replaced columns by variable name.
fn break_expression(
    ctx: &mut PlanningContext,
    expr: &Expr,
    lhs: TableSet,
) -> (Expr, Vec<(String, Expr)>) {
    let semtable = ctx.semtable;
    let mut columns: Vec<(String, Expr)> = Vec::new();
    let mut rewritten = expr.clone();
    rewritten.visit_mut(&mut |e| {
        let var = match &*e {
            Expr::Column(col) => {
                let deps = semtable.recursive_deps(e);
                if deps.is_empty() || !deps.is_solved_by(lhs) {
                    return false;
                }
                let name = ctx.var_for_column(col);
                if !columns.iter().any(|(n, _)| *n == name) {
                    columns.push((name.clone(), e.clone()));
                }
                name
            }
            _ => return true,
        };
        *e = Expr::Argument(var);
        false
    });
    (rewritten, columns)
}

/// Make `expr` an output column of `tree` and return its offset.
pub fn push_output_column(ctx: &mut PlanningContext, tree: &mut QueryTree, expr: &Expr) -> Result<usize> {
    match tree {
        QueryTree::Route(route) => {
            if let Some(offset) = route.columns.iter().position(|c| c.expr == *expr) {
                return Ok(offset);
            }
            route.columns.push(AliasedExpr::new(expr.clone()));
            Ok(route.columns.len() - 1)
        }
        QueryTree::Join(join) => {
            let deps = ctx.semtable.recursive_deps(expr);
            let column = if deps.is_solved_by(join.lhs.table_id()) {
                -(push_output_column(ctx, &mut join.lhs, expr)? as i32) - 1
            } else if deps.is_solved_by(join.rhs.table_id()) {
                push_output_column(ctx, &mut join.rhs, expr)? as i32 + 1
            } else {
                return Err(RouteplanError::unsupported(format!(
                    "expression spans both sides of a join: {}",
                    expr
                )));
            };
            if let Some(offset) = join.columns.iter().position(|c| *c == column) {
                return Ok(offset);
            }
            join.columns.push(column);
            Ok(join.columns.len() - 1)
        }
        QueryTree::Derived(derived) => {
            let Expr::Column(col) = expr else {
                return Err(RouteplanError::unsupported(format!(
                    "expression on derived table '{}' across shards: {}",
                    derived.alias, expr
                )));
            };
            if let Some(offset) = derived
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&col.name))
            {
                return Ok(offset);
            }
            let known = derived.query.select_exprs.iter().any(|se| match se {
                routeplan_sql::SelectExpr::Aliased(ae) => {
                    ae.column_name().eq_ignore_ascii_case(&col.name)
                }
                routeplan_sql::SelectExpr::Star(_) => false,
            });
            if !known {
                return Err(RouteplanError::NotFound(format!(
                    "column '{}' in derived table '{}'",
                    col.name, derived.alias
                )));
            }
            derived.columns.push(col.name.clone());
            Ok(derived.columns.len() - 1)
        }
        QueryTree::Subquery(sq) => push_output_column(ctx, &mut sq.outer, expr),
    }
}
