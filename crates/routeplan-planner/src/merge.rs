//! Route merging
//!
//! Two routes merge into one when a single shard query can compute their
//! join: same keyspace and either unsharded, reference data on one side, or
//! a join predicate that proves both sides live on the same shard.

use routeplan_common::Result;
use routeplan_engine::RouteOpcode;
use routeplan_sql::{and_exprs, split_and, ColName, ComparisonOp, Expr, Literal};
use routeplan_vschema::same_vindex;
use tracing::trace;

use crate::context::PlanningContext;
use crate::query_tree::{OuterTable, QueryTree, Relation, RouteTree};
use crate::route::vindex_for_column;

/// Whose routing a merged route keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    Left,
    Right,
    /// Pick again from the vindexes of both sides
    Combined,
}

fn is_sharded(opcode: RouteOpcode) -> bool {
    matches!(
        opcode,
        RouteOpcode::Scatter | RouteOpcode::Equal | RouteOpcode::EqualUnique | RouteOpcode::In
    )
}

/// Merge `b` into `a` if their join can run as one route. `inner` is false
/// for a left join with `a` as the outer side.
pub fn try_merge(
    ctx: &PlanningContext,
    a: &QueryTree,
    b: &QueryTree,
    join_predicates: &[Expr],
    inner: bool,
) -> Result<Option<QueryTree>> {
    let (Some(ra), Some(rb)) = (a.as_route(), b.as_route()) else {
        return Ok(None);
    };
    let both_dba = ra.opcode == RouteOpcode::DBA && rb.opcode == RouteOpcode::DBA;
    if ra.keyspace.name != rb.keyspace.name && !both_dba {
        return Ok(None);
    }
    if !inner && rb.has_left_joins() {
        return Ok(None);
    }

    let routing = match (ra.opcode, rb.opcode) {
        (RouteOpcode::Next, _) | (_, RouteOpcode::Next) => None,
        (RouteOpcode::Unsharded, RouteOpcode::Unsharded)
        | (RouteOpcode::DBA, RouteOpcode::DBA)
        | (RouteOpcode::Reference, RouteOpcode::Reference) => Some(Routing::Left),
        // an unsharded keyspace is one shard, so its reference tables sit
        // next to every other table
        (RouteOpcode::Reference, RouteOpcode::Unsharded) => Some(Routing::Right),
        (RouteOpcode::Unsharded, RouteOpcode::Reference) => Some(Routing::Left),
        (RouteOpcode::Reference, other) if is_sharded(other) => {
            // outer rows of a reference table would be lost on every shard
            // that has no match
            if inner {
                Some(Routing::Right)
            } else {
                None
            }
        }
        (other, RouteOpcode::Reference) if is_sharded(other) => Some(Routing::Left),
        (left, right) if is_sharded(left) && is_sharded(right) => {
            if can_merge_on_filters(ctx, ra, rb, join_predicates) {
                Some(Routing::Combined)
            } else {
                None
            }
        }
        _ => None,
    };
    let Some(routing) = routing else {
        return Ok(None);
    };

    trace!(
        left = %ra.opcode,
        right = %rb.opcode,
        inner,
        "merging routes"
    );
    let merged = if inner {
        merge_inner(ra, rb, join_predicates, routing)
    } else {
        merge_outer(ra, rb, join_predicates)
    };
    Ok(Some(QueryTree::Route(merged)))
}

/// A join predicate `a.x = b.y` where both columns sit on the same unique
/// vindex proves matching rows share a shard.
fn can_merge_on_filters(
    ctx: &PlanningContext,
    a: &RouteTree,
    b: &RouteTree,
    join_predicates: &[Expr],
) -> bool {
    join_predicates
        .iter()
        .flat_map(|p| split_and(p.clone()))
        .any(|pred| {
            let Expr::Comparison {
                op: ComparisonOp::Eq,
                left,
                right,
            } = &pred
            else {
                return false;
            };
            let (Expr::Column(l), Expr::Column(r)) = (left.as_ref(), right.as_ref()) else {
                return false;
            };
            let on_same_vindex = |x: &ColName, y: &ColName| match (
                vindex_for_column(ctx, a, x),
                vindex_for_column(ctx, b, y),
            ) {
                (Some(va), Some(vb)) => same_vindex(&va, &vb),
                _ => false,
            };
            on_same_vindex(l, r) || on_same_vindex(r, l)
        })
}

fn grouped(route: &RouteTree) -> Vec<Relation> {
    if route.has_left_joins() {
        vec![Relation::Paren {
            tables: route.tables.clone(),
            left_joins: route.left_joins.clone(),
        }]
    } else {
        route.tables.clone()
    }
}

fn merge_inner(a: &RouteTree, b: &RouteTree, join_predicates: &[Expr], routing: Routing) -> RouteTree {
    let mut merged = match routing {
        Routing::Right => b.clone(),
        Routing::Left | Routing::Combined => a.clone(),
    };
    merged.solved = a.solved.merge(b.solved);
    merged.left_joins = Vec::new();

    let mut predicates = a.predicates.clone();
    for p in &b.predicates {
        if !predicates.contains(p) {
            predicates.push(p.clone());
        }
    }

    merged.tables = if a.has_left_joins() && b.has_left_joins() {
        match and_exprs(join_predicates.iter().cloned()) {
            Some(on) => vec![Relation::Join {
                lhs: Box::new(grouped_one(a)),
                rhs: Box::new(grouped_one(b)),
                predicate: on,
            }],
            None => grouped(a).into_iter().chain(grouped(b)).collect(),
        }
    } else {
        for p in join_predicates {
            if !predicates.contains(p) {
                predicates.push(p.clone());
            }
        }
        grouped(a).into_iter().chain(grouped(b)).collect()
    };
    merged.predicates = predicates;

    merged.vindex_preds = a
        .vindex_preds
        .iter()
        .chain(b.vindex_preds.iter())
        .cloned()
        .collect();
    merged.sq_to_replace = a.sq_to_replace.clone();
    merged.sq_to_replace.extend(b.sq_to_replace.clone());
    merged.sys_table_schema = a.sys_table_schema.clone();
    merged.sys_table_schema.extend(b.sys_table_schema.iter().cloned());
    merged.sys_table_name = a.sys_table_name.clone();
    merged.sys_table_name.extend(b.sys_table_name.clone());
    merged.columns = a.columns.iter().chain(b.columns.iter()).cloned().collect();

    if routing == Routing::Combined {
        merged.reset_routing();
    }
    merged
}

fn grouped_one(route: &RouteTree) -> Relation {
    Relation::Paren {
        tables: route.tables.clone(),
        left_joins: route.left_joins.clone(),
    }
}

fn merge_outer(a: &RouteTree, b: &RouteTree, join_predicates: &[Expr]) -> RouteTree {
    let mut merged = a.clone();
    merged.solved = a.solved.merge(b.solved);
    if b.opcode == RouteOpcode::Unsharded {
        merged.opcode = RouteOpcode::Unsharded;
    }

    let right = match b.tables.as_slice() {
        [single] => single.clone(),
        tables => Relation::Paren {
            tables: tables.to_vec(),
            left_joins: Vec::new(),
        },
    };
    let condition = and_exprs(
        join_predicates
            .iter()
            .cloned()
            .chain(b.predicates.iter().cloned()),
    )
    .unwrap_or(Expr::Literal(Literal::Bool(true)));
    merged.left_joins.push(OuterTable {
        right,
        predicate: condition,
    });

    // the outer side alone decides the shards
    merged.sq_to_replace.extend(b.sq_to_replace.clone());
    merged.sys_table_schema.extend(b.sys_table_schema.iter().cloned());
    merged.sys_table_name.extend(b.sys_table_name.clone());
    merged
}
