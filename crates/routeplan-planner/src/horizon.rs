//! Horizon planning
//!
//! The horizon is everything a SELECT does after its FROM and WHERE
//! clauses: the select list, aggregation, ordering, DISTINCT and LIMIT.
//! A single-shard route takes all of it verbatim. Anything else gets the
//! select list pushed column by column, with vtgate-side operators on top
//! for what the shards cannot finish on their own.

use routeplan_common::{Result, RouteplanError};
use routeplan_engine::{AggregateOpcode, AggregateParams, OrderByParams, UPPER_LIMIT_VAR};
use routeplan_sql::{AliasedExpr, Expr, FuncExpr, Limit, Literal, OrderBy, Select, SelectExpr};
use tracing::{debug, trace};

use crate::context::PlanningContext;
use crate::plan::{AggregatePlan, DistinctPlan, LimitPlan, LogicalPlan, RoutePlan, SortPlan};

/// Output column names of `sel`, stars expanded when possible.
pub fn output_names(ctx: &PlanningContext, sel: &Select) -> Vec<String> {
    match ctx.semtable.expand_star(sel) {
        Some(exprs) => exprs.iter().map(AliasedExpr::column_name).collect(),
        None => sel
            .select_exprs
            .iter()
            .filter_map(|se| match se {
                SelectExpr::Aliased(ae) => Some(ae.column_name()),
                SelectExpr::Star(_) => None,
            })
            .collect(),
    }
}

pub fn plan_horizon(ctx: &PlanningContext, mut plan: LogicalPlan, sel: &Select) -> Result<LogicalPlan> {
    if let Some(route) = single_shard_route(&mut plan) {
        debug!(opcode = %route.opcode, "horizon pushed down to a single-shard route");
        route.select.select_exprs = sel.select_exprs.clone();
        route.select.distinct = sel.distinct;
        route.select.group_by = sel.group_by.clone();
        route.select.order_by = sel.order_by.clone();
        route.select.limit = sel.limit.clone();
        return Ok(plan);
    }

    let Some(exprs) = ctx.semtable.expand_star(sel) else {
        return plan_unexpanded_star(plan, sel);
    };

    let mut plan = if sel.has_aggregates() {
        plan_aggregation(plan, sel, &exprs)?
    } else {
        for ae in &exprs {
            push_projection(ctx, &mut plan, ae, false)?;
        }
        let mut plan = plan_order_by(ctx, plan, sel, &exprs)?;
        if sel.distinct {
            set_distinct_on_routes(&mut plan);
            plan = LogicalPlan::Distinct(DistinctPlan {
                truncate_column_count: 0,
                input: Box::new(plan),
            });
        }
        plan
    };
    plan = plan_limit(plan, sel);

    if plan.column_count() > exprs.len() {
        trace!(
            width = plan.column_count(),
            visible = exprs.len(),
            "truncating helper columns"
        );
        plan.set_truncate_column_count(exprs.len())?;
    }
    Ok(plan)
}

fn single_shard_route(plan: &mut LogicalPlan) -> Option<&mut RoutePlan> {
    let route = plan.underlying_route_mut()?;
    if route.opcode.is_single_shard() && route.select.select_exprs.is_empty() {
        Some(route)
    } else {
        None
    }
}

/// `*` over tables without authoritative columns can only be sent as is.
fn plan_unexpanded_star(mut plan: LogicalPlan, sel: &Select) -> Result<LogicalPlan> {
    if sel.has_aggregates() || !sel.order_by.is_empty() {
        return Err(RouteplanError::unsupported(
            "'*' over tables with unknown columns in a cross-shard query",
        ));
    }
    let Some(route) = plan.underlying_route_mut() else {
        return Err(RouteplanError::unsupported(
            "'*' over tables with unknown columns in a cross-shard query",
        ));
    };
    route.select.select_exprs = sel.select_exprs.clone();
    route.select.distinct = sel.distinct;
    if sel.distinct {
        plan = LogicalPlan::Distinct(DistinctPlan {
            truncate_column_count: 0,
            input: Box::new(plan),
        });
    }
    Ok(plan_limit(plan, sel))
}

// ============================================================================
// Projections
// ============================================================================

/// Add `ae` to the output of `plan` and return its offset. With `reuse`, an
/// identical column already in the output is returned instead.
pub fn push_projection(
    ctx: &PlanningContext,
    plan: &mut LogicalPlan,
    ae: &AliasedExpr,
    reuse: bool,
) -> Result<usize> {
    match plan {
        LogicalPlan::Route(route) => Ok(push_route_column(route, ae, reuse)),
        LogicalPlan::Join(join) => {
            let deps = ctx.semtable.recursive_deps(&ae.expr);
            let col = if deps.is_solved_by(join.left.solved()) {
                -(push_projection(ctx, &mut join.left, ae, reuse)? as i32) - 1
            } else if deps.is_solved_by(join.right.solved()) {
                push_projection(ctx, &mut join.right, ae, reuse)? as i32 + 1
            } else {
                return Err(RouteplanError::unsupported(format!(
                    "cross-shard expression: {}",
                    ae.expr
                )));
            };
            if reuse {
                if let Some(offset) = join.cols.iter().position(|c| *c == col) {
                    return Ok(offset);
                }
            }
            join.cols.push(col);
            Ok(join.cols.len() - 1)
        }
        LogicalPlan::SimpleProjection(proj) => {
            let Expr::Column(col) = &ae.expr else {
                return Err(RouteplanError::unsupported(format!(
                    "expression on a cross-shard derived table: {}",
                    ae.expr
                )));
            };
            let input_offset = proj
                .names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(&col.name))
                .ok_or_else(|| {
                    RouteplanError::NotFound(format!("column '{}' in derived table", col.name))
                })?;
            if reuse {
                if let Some(offset) = proj.cols.iter().position(|c| *c == input_offset) {
                    return Ok(offset);
                }
            }
            proj.cols.push(input_offset);
            Ok(proj.cols.len() - 1)
        }
        LogicalPlan::Pullout(pullout) => push_projection(ctx, &mut pullout.underlying, ae, reuse),
        LogicalPlan::Aggregate(_)
        | LogicalPlan::MemorySort(_)
        | LogicalPlan::Distinct(_)
        | LogicalPlan::Limit(_) => Err(RouteplanError::internal(
            "projection pushed above the horizon",
        )),
    }
}

fn push_route_column(route: &mut RoutePlan, ae: &AliasedExpr, reuse: bool) -> usize {
    if reuse {
        let existing = route.select.select_exprs.iter().position(|se| match se {
            SelectExpr::Aliased(a) => a.expr == ae.expr,
            SelectExpr::Star(_) => false,
        });
        if let Some(offset) = existing {
            return offset;
        }
    }
    route.select.select_exprs.push(SelectExpr::Aliased(ae.clone()));
    route.select.select_exprs.len() - 1
}

/// Resolve select-list aliases and ordinals used in GROUP BY or ORDER BY.
fn resolve_key(expr: &Expr, exprs: &[AliasedExpr], clause: &str) -> Result<Expr> {
    match expr {
        Expr::Literal(Literal::Int(n)) => {
            let idx = usize::try_from(*n).ok().filter(|n| *n >= 1 && *n <= exprs.len());
            match idx {
                Some(idx) => Ok(exprs[idx - 1].expr.clone()),
                None => Err(RouteplanError::InvalidArgument(format!(
                    "unknown column '{}' in '{}'",
                    n, clause
                ))),
            }
        }
        Expr::Column(col) if col.qualifier.is_none() => Ok(exprs
            .iter()
            .find(|ae| {
                ae.alias
                    .as_deref()
                    .map(|a| a.eq_ignore_ascii_case(&col.name))
                    .unwrap_or(false)
            })
            .map(|ae| ae.expr.clone())
            .unwrap_or_else(|| expr.clone())),
        other => Ok(other.clone()),
    }
}

// ============================================================================
// Ordering, distinct and limit
// ============================================================================

fn plan_order_by(
    ctx: &PlanningContext,
    mut plan: LogicalPlan,
    sel: &Select,
    exprs: &[AliasedExpr],
) -> Result<LogicalPlan> {
    if sel.order_by.is_empty() {
        return Ok(plan);
    }
    let mut keys = Vec::with_capacity(sel.order_by.len());
    for ob in &sel.order_by {
        keys.push(OrderBy {
            expr: resolve_key(&ob.expr, exprs, "order clause")?,
            desc: ob.desc,
        });
    }

    if can_push_order_by(ctx, &plan, &keys) {
        push_order_by(ctx, &mut plan, &keys)?;
        return Ok(plan);
    }

    debug!(keys = keys.len(), "ordering in memory");
    let mut order_by = Vec::with_capacity(keys.len());
    for key in &keys {
        let col = push_projection(ctx, &mut plan, &AliasedExpr::new(key.expr.clone()), true)?;
        order_by.push(OrderByParams { col, desc: key.desc });
    }
    Ok(LogicalPlan::MemorySort(SortPlan {
        order_by,
        truncate_column_count: 0,
        input: Box::new(plan),
    }))
}

/// A route sorts on the shards; a join keeps the order of its left side.
fn can_push_order_by(ctx: &PlanningContext, plan: &LogicalPlan, keys: &[OrderBy]) -> bool {
    match plan {
        LogicalPlan::Route(_) => true,
        LogicalPlan::Pullout(p) => can_push_order_by(ctx, &p.underlying, keys),
        LogicalPlan::Join(j) => {
            let left = j.left.solved();
            keys.iter()
                .all(|k| ctx.semtable.recursive_deps(&k.expr).is_solved_by(left))
                && can_push_order_by(ctx, &j.left, keys)
        }
        _ => false,
    }
}

fn push_order_by(ctx: &PlanningContext, plan: &mut LogicalPlan, keys: &[OrderBy]) -> Result<()> {
    match plan {
        LogicalPlan::Route(route) => {
            for key in keys {
                let col = push_route_column(route, &AliasedExpr::new(key.expr.clone()), true);
                route.select.order_by.push(key.clone());
                route.order_by.push(OrderByParams { col, desc: key.desc });
            }
            Ok(())
        }
        LogicalPlan::Pullout(p) => push_order_by(ctx, &mut p.underlying, keys),
        LogicalPlan::Join(j) => push_order_by(ctx, &mut j.left, keys),
        _ => Err(RouteplanError::internal("ORDER BY pushed into a non-route")),
    }
}

fn set_distinct_on_routes(plan: &mut LogicalPlan) {
    match plan {
        LogicalPlan::Route(route) => route.select.distinct = true,
        LogicalPlan::Join(j) => {
            set_distinct_on_routes(&mut j.left);
            set_distinct_on_routes(&mut j.right);
        }
        LogicalPlan::Pullout(p) => set_distinct_on_routes(&mut p.underlying),
        LogicalPlan::MemorySort(s) => set_distinct_on_routes(&mut s.input),
        _ => {}
    }
}

fn plan_limit(mut plan: LogicalPlan, sel: &Select) -> LogicalPlan {
    let Some(limit) = &sel.limit else {
        return plan;
    };
    if let LogicalPlan::Route(route) = &mut plan {
        if !route.opcode.is_single_shard() {
            route.select.limit = Some(Limit {
                offset: None,
                rowcount: Expr::Argument(UPPER_LIMIT_VAR.to_string()),
            });
        }
    }
    LogicalPlan::Limit(LimitPlan {
        count: limit.rowcount.clone(),
        offset: limit.offset.clone(),
        input: Box::new(plan),
    })
}

// ============================================================================
// Aggregation
// ============================================================================

fn aggregate_func(expr: &Expr) -> Result<Option<&FuncExpr>> {
    match expr {
        Expr::Func(func) if func.is_aggregate() => {
            if func.args.iter().any(Expr::contains_aggregate) {
                return Err(RouteplanError::unsupported("nested aggregate functions"));
            }
            if func.name == "avg" {
                return Err(RouteplanError::unsupported("avg in a cross-shard query"));
            }
            Ok(Some(func))
        }
        other if other.contains_aggregate() => Err(RouteplanError::unsupported(format!(
            "complex aggregate expression: {}",
            other
        ))),
        _ => Ok(None),
    }
}

fn aggregate_opcode(func: &FuncExpr) -> Result<AggregateOpcode> {
    Ok(match (func.name.as_str(), func.distinct) {
        ("count", false) => AggregateOpcode::Count,
        ("count", true) => AggregateOpcode::CountDistinct,
        ("sum", false) => AggregateOpcode::Sum,
        ("sum", true) => AggregateOpcode::SumDistinct,
        ("min", _) => AggregateOpcode::Min,
        ("max", _) => AggregateOpcode::Max,
        (name, _) => {
            return Err(RouteplanError::unsupported(format!(
                "aggregate function {} in a cross-shard query",
                name
            )))
        }
    })
}

/// Aggregation over one multi-shard route: each shard aggregates its own
/// rows grouped and sorted by the grouping keys, and an ordered aggregate
/// combines the partial results.
fn plan_aggregation(
    mut plan: LogicalPlan,
    sel: &Select,
    exprs: &[AliasedExpr],
) -> Result<LogicalPlan> {
    let Some(route) = plan.underlying_route_mut() else {
        return Err(RouteplanError::unsupported("cross-shard query with aggregates"));
    };

    let mut aggregates = Vec::new();
    let mut distinct_args = Vec::new();
    for ae in exprs {
        let Some(func) = aggregate_func(&ae.expr)? else {
            push_route_column(route, ae, false);
            continue;
        };
        let opcode = aggregate_opcode(func)?;
        let col = if matches!(
            opcode,
            AggregateOpcode::CountDistinct | AggregateOpcode::SumDistinct
        ) {
            let [arg] = func.args.as_slice() else {
                return Err(RouteplanError::unsupported(format!(
                    "{} with more than one argument",
                    func.name
                )));
            };
            let col = push_route_column(route, &AliasedExpr::new(arg.clone()), false);
            distinct_args.push((arg.clone(), col));
            col
        } else {
            push_route_column(route, ae, false)
        };
        aggregates.push(AggregateParams {
            opcode,
            col,
            alias: ae.column_name(),
        });
    }

    let mut group_by_keys = Vec::with_capacity(sel.group_by.len());
    for key in &sel.group_by {
        let expr = resolve_key(key, exprs, "group statement")?;
        if expr.contains_aggregate() {
            return Err(RouteplanError::unsupported("aggregate in GROUP BY"));
        }
        let col = push_route_column(route, &AliasedExpr::new(expr.clone()), true);
        add_route_sort_key(route, expr.clone(), col, false);
        route.select.group_by.push(expr);
        group_by_keys.push(col);
    }
    for (arg, col) in distinct_args {
        add_route_sort_key(route, arg.clone(), col, false);
        route.select.group_by.push(arg);
    }

    let mut order_by = Vec::with_capacity(sel.order_by.len());
    for ob in &sel.order_by {
        let expr = resolve_key(&ob.expr, exprs, "order clause")?;
        let col = route
            .select
            .select_exprs
            .iter()
            .position(|se| matches!(se, SelectExpr::Aliased(a) if a.expr == expr))
            .ok_or_else(|| {
                RouteplanError::unsupported(format!(
                    "ORDER BY {} on an aggregated cross-shard query",
                    expr
                ))
            })?;
        order_by.push((expr, col, ob.desc));
    }

    let sort_on_route = order_by
        .iter()
        .all(|(_, col, _)| group_by_keys.contains(col));
    if sort_on_route && !order_by.is_empty() {
        reorder_route_keys(route, &order_by);
    }
    debug!(
        aggregates = aggregates.len(),
        group_by = group_by_keys.len(),
        "aggregating across shards"
    );

    let mut plan = LogicalPlan::Aggregate(AggregatePlan {
        aggregates,
        group_by_keys,
        truncate_column_count: 0,
        input: Box::new(plan),
    });
    if !sort_on_route {
        plan = LogicalPlan::MemorySort(SortPlan {
            order_by: order_by
                .iter()
                .map(|(_, col, desc)| OrderByParams { col: *col, desc: *desc })
                .collect(),
            truncate_column_count: 0,
            input: Box::new(plan),
        });
    }
    if sel.distinct {
        plan = LogicalPlan::Distinct(DistinctPlan {
            truncate_column_count: 0,
            input: Box::new(plan),
        });
    }
    Ok(plan)
}

fn add_route_sort_key(route: &mut RoutePlan, expr: Expr, col: usize, desc: bool) {
    route.select.order_by.push(OrderBy { expr, desc });
    route.order_by.push(OrderByParams { col, desc });
}

/// Put the requested ordering first; the remaining grouping keys follow so
/// groups stay adjacent.
fn reorder_route_keys(route: &mut RoutePlan, order_by: &[(Expr, usize, bool)]) {
    let mut sql_keys = Vec::with_capacity(route.order_by.len());
    let mut params = Vec::with_capacity(route.order_by.len());
    for (expr, col, desc) in order_by {
        sql_keys.push(OrderBy {
            expr: expr.clone(),
            desc: *desc,
        });
        params.push(OrderByParams {
            col: *col,
            desc: *desc,
        });
    }
    let old_sql = std::mem::take(&mut route.select.order_by);
    let old_params = std::mem::take(&mut route.order_by);
    for (key, param) in old_sql.into_iter().zip(old_params) {
        if !params.iter().any(|p| p.col == param.col) {
            sql_keys.push(key);
            params.push(param);
        }
    }
    route.select.order_by = sql_keys;
    route.order_by = params;
}
