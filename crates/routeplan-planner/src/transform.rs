//! Query trees to logical plans

use routeplan_common::{Result, RouteplanError};
use routeplan_sql::{
    and_exprs, AliasedTableExpr, JoinKind, JoinTableExpr, Select, SelectExpr, SimpleTableExpr,
    TableExpr,
};

use crate::context::PlanningContext;
use crate::horizon::{output_names, plan_horizon};
use crate::plan::{JoinPlan, LogicalPlan, ProjectionPlan, PulloutPlan, RoutePlan};
use crate::query_tree::{OuterTable, QueryTree, Relation, RouteTree};

/// The SELECT a route sends to its shards, before the horizon is added.
pub fn route_select(route: &RouteTree) -> Select {
    let tables: Vec<TableExpr> = route.tables.iter().map(relation_table_expr).collect();
    Select {
        select_exprs: route
            .columns
            .iter()
            .cloned()
            .map(SelectExpr::Aliased)
            .collect(),
        from: with_left_joins(tables, &route.left_joins),
        where_clause: and_exprs(route.predicates.iter().cloned()),
        ..Default::default()
    }
}

/// Each left join takes everything before it as its left side.
fn with_left_joins(mut from: Vec<TableExpr>, left_joins: &[OuterTable]) -> Vec<TableExpr> {
    for lj in left_joins {
        let left = if from.len() == 1 {
            from.remove(0)
        } else {
            TableExpr::Paren(std::mem::take(&mut from))
        };
        from = vec![TableExpr::Join(Box::new(JoinTableExpr {
            left,
            right: relation_table_expr(&lj.right),
            kind: JoinKind::Left,
            on: Some(lj.predicate.clone()),
        }))];
    }
    from
}

fn relation_table_expr(rel: &Relation) -> TableExpr {
    match rel {
        Relation::Table {
            id, name, alias, ..
        } => TableExpr::Aliased(AliasedTableExpr {
            expr: SimpleTableExpr::Table(name.clone()),
            alias: alias.clone(),
            id: *id,
        }),
        Relation::Paren { tables, left_joins } => {
            let inner = tables.iter().map(relation_table_expr).collect();
            TableExpr::Paren(with_left_joins(inner, left_joins))
        }
        Relation::Join {
            lhs,
            rhs,
            predicate,
        } => TableExpr::Join(Box::new(JoinTableExpr {
            left: relation_table_expr(lhs),
            right: relation_table_expr(rhs),
            kind: JoinKind::Inner,
            on: Some(predicate.clone()),
        })),
        Relation::Derived { id, alias, select } => TableExpr::Aliased(AliasedTableExpr {
            expr: SimpleTableExpr::Derived(Box::new(select.clone())),
            alias: Some(alias.clone()),
            id: *id,
        }),
    }
}

pub fn transform_to_logical_plan(ctx: &PlanningContext, tree: &QueryTree) -> Result<LogicalPlan> {
    match tree {
        QueryTree::Route(route) => Ok(LogicalPlan::Route(RoutePlan::from_tree(route))),
        QueryTree::Join(join) => Ok(LogicalPlan::Join(JoinPlan {
            left: Box::new(transform_to_logical_plan(ctx, &join.lhs)?),
            right: Box::new(transform_to_logical_plan(ctx, &join.rhs)?),
            outer: join.outer,
            cols: join.columns.clone(),
            vars: join.vars.clone(),
        })),
        QueryTree::Derived(derived) => {
            let inner = transform_to_logical_plan(ctx, &derived.inner)?;
            let inner = plan_horizon(ctx, inner, &derived.query)?;
            let names = output_names(ctx, &derived.query);
            let mut cols = Vec::with_capacity(derived.columns.len());
            for col in &derived.columns {
                let offset = names
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case(col))
                    .ok_or_else(|| {
                        RouteplanError::NotFound(format!(
                            "column '{}' in derived table '{}'",
                            col, derived.alias
                        ))
                    })?;
                cols.push(offset);
            }
            Ok(LogicalPlan::SimpleProjection(ProjectionPlan {
                cols,
                names,
                id: derived.id,
                input: Box::new(inner),
            }))
        }
        QueryTree::Subquery(sq) => {
            let inner = transform_to_logical_plan(ctx, &sq.inner)?;
            let subquery = plan_horizon(ctx, inner, &sq.extracted.subquery)?;
            let underlying = transform_to_logical_plan(ctx, &sq.outer)?;
            Ok(LogicalPlan::Pullout(PulloutPlan {
                kind: sq.extracted.kind,
                sq_name: sq.extracted.arg_name.clone(),
                has_values: sq.extracted.has_values_name.clone(),
                subquery: Box::new(subquery),
                underlying: Box::new(underlying),
            }))
        }
    }
}
