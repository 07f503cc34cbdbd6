//! Subquery absorption
//!
//! An extracted subquery is planned on its own and then offered to the
//! route of the query that contains it. When both provably reach the same
//! shards, the subquery stays inline in the outer route's SQL; otherwise it
//! runs first and hands its result over in bind variables.

use routeplan_common::{Result, RouteplanError};
use routeplan_engine::RouteOpcode;
use routeplan_sql::{split_and, ComparisonOp, Expr, ExtractedSubquery};
use routeplan_vschema::same_vindex;
use tracing::debug;

use crate::context::PlanningContext;
use crate::query_tree::{QueryTree, RouteTree, SubqueryTree};
use crate::route::vindex_for_column;

/// Try to absorb `inner` into `outer`. Returns the merged tree, or None
/// when the subquery has to run separately.
pub fn try_merge_subquery(
    ctx: &PlanningContext,
    outer: &QueryTree,
    inner: &QueryTree,
    extracted: &ExtractedSubquery,
) -> Result<Option<QueryTree>> {
    let (Some(outer_route), Some(inner_route)) = (outer.as_route(), inner.as_route()) else {
        return Ok(None);
    };
    let both_dba =
        outer_route.opcode == RouteOpcode::DBA && inner_route.opcode == RouteOpcode::DBA;
    if outer_route.keyspace.name != inner_route.keyspace.name && !both_dba {
        return Ok(None);
    }

    let inner_is_reference = inner_route.opcode == RouteOpcode::Reference;
    let mergeable = match outer_route.opcode {
        RouteOpcode::Next => false,
        RouteOpcode::Unsharded | RouteOpcode::DBA | RouteOpcode::Reference => {
            inner_route.opcode == outer_route.opcode
                || inner_is_reference
                || (outer_route.opcode == RouteOpcode::Reference
                    && inner_route.opcode == RouteOpcode::Unsharded)
        }
        RouteOpcode::EqualUnique => {
            inner_is_reference
                || same_shard_target(outer_route, inner_route)
                || correlated_on_vindex(ctx, outer_route, inner_route, extracted)
        }
        RouteOpcode::Scatter | RouteOpcode::Equal | RouteOpcode::In => {
            inner_is_reference || correlated_on_vindex(ctx, outer_route, inner_route, extracted)
        }
    };
    if !mergeable {
        return Ok(None);
    }

    debug!(
        arg = %extracted.arg_name,
        outer = %outer_route.opcode,
        inner = %inner_route.opcode,
        "absorbed subquery into outer route"
    );
    let mut merged = outer_route.clone();
    if inner_route.opcode == RouteOpcode::Unsharded {
        merged.opcode = RouteOpcode::Unsharded;
    }
    merged
        .sq_to_replace
        .insert(extracted.arg_name.clone(), extracted.subquery.clone());
    merged.sq_to_replace.extend(inner_route.sq_to_replace.clone());
    merged
        .sys_table_schema
        .extend(inner_route.sys_table_schema.iter().cloned());
    merged
        .sys_table_name
        .extend(inner_route.sys_table_name.clone());
    Ok(Some(QueryTree::Route(merged)))
}

/// Both routes pick the same single shard through the same vindex and value.
fn same_shard_target(outer: &RouteTree, inner: &RouteTree) -> bool {
    if inner.opcode != RouteOpcode::EqualUnique {
        return false;
    }
    match (&outer.selected, &inner.selected) {
        (Some(a), Some(b)) => same_vindex(&a.vindex, &b.vindex) && a.values == b.values,
        _ => false,
    }
}

/// The subquery's WHERE clause equates an outer column with an inner column
/// on the same unique vindex, so each outer row only sees its own shard.
fn correlated_on_vindex(
    ctx: &PlanningContext,
    outer: &RouteTree,
    inner: &RouteTree,
    extracted: &ExtractedSubquery,
) -> bool {
    let Some(where_clause) = &extracted.subquery.where_clause else {
        return false;
    };
    let inner_ids = extracted.subquery.all_table_ids();
    split_and(where_clause.clone()).iter().any(|pred| {
        let Expr::Comparison {
            op: ComparisonOp::Eq,
            left,
            right,
        } = pred
        else {
            return false;
        };
        let (Expr::Column(l), Expr::Column(r)) = (left.as_ref(), right.as_ref()) else {
            return false;
        };
        let (outer_col, inner_col) = if l.deps.is_solved_by(inner_ids) && !r.deps.is_solved_by(inner_ids) {
            (r, l)
        } else if r.deps.is_solved_by(inner_ids) && !l.deps.is_solved_by(inner_ids) {
            (l, r)
        } else {
            return false;
        };
        match (
            vindex_for_column(ctx, outer, outer_col),
            vindex_for_column(ctx, inner, inner_col),
        ) {
            (Some(a), Some(b)) => same_vindex(&a, &b),
            _ => false,
        }
    })
}

/// Plan the subqueries of one scope against the outer tree. Subqueries
/// that cannot be absorbed wrap the outer tree, the first one outermost.
pub fn plan_subqueries(
    ctx: &PlanningContext,
    mut outer: QueryTree,
    inners: Vec<(QueryTree, ExtractedSubquery)>,
) -> Result<QueryTree> {
    let mut unmerged = Vec::new();
    for (inner, extracted) in inners {
        if let Some(merged) = try_merge_subquery(ctx, &outer, &inner, &extracted)? {
            outer = merged;
            continue;
        }
        let correlated = !ctx
            .semtable
            .outer_deps(&extracted.subquery, true)
            .is_empty();
        if correlated {
            return Err(RouteplanError::unsupported("cross-shard correlated subquery"));
        }
        unmerged.push((inner, extracted));
    }
    for (inner, extracted) in unmerged.into_iter().rev() {
        outer = QueryTree::Subquery(SubqueryTree {
            inner: Box::new(inner),
            outer: Box::new(outer),
            extracted,
        });
    }
    Ok(outer)
}
