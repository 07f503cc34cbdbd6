//! Logical plans
//!
//! The last mutable representation before execution. Query trees are
//! turned into logical plans, the horizon planner pushes the select list,
//! ordering and limits into them, and [`LogicalPlan::into_primitive`]
//! freezes the result into engine primitives with rendered SQL.

use std::collections::BTreeMap;
use std::sync::Arc;

use routeplan_common::{Result, RouteplanError};
use routeplan_engine::{
    AggregateParams, Distinct, EvalExpr, Join, JoinOpcode, Limit, MemorySort, OrderByParams,
    OrderedAggregate, Primitive, PulloutOpcode, PulloutSubquery, Route, RouteOpcode,
    SimpleProjection,
};
use routeplan_sql::{AliasedExpr, ComparisonOp, Expr, Select, SelectExpr, SubqueryKind, TableSet};
use routeplan_vschema::{Keyspace, Vindex};

use crate::optimizer::mark_merged_subqueries;
use crate::query_tree::RouteTree;
use crate::transform::route_select;

#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub opcode: RouteOpcode,
    pub keyspace: Arc<Keyspace>,
    pub select: Select,
    pub solved: TableSet,
    pub vindex: Option<Arc<Vindex>>,
    pub values: Vec<Expr>,
    pub table_name: String,
    pub sq_to_replace: BTreeMap<String, Select>,
    pub sys_table_schema: Vec<Expr>,
    pub sys_table_name: BTreeMap<String, Expr>,
    pub order_by: Vec<OrderByParams>,
    pub truncate_column_count: usize,
    pub scatter_errors_as_warnings: bool,
}

impl RoutePlan {
    pub fn from_tree(route: &RouteTree) -> Self {
        let (vindex, values) = match &route.selected {
            Some(selected) => (Some(selected.vindex.clone()), selected.values.clone()),
            None => (None, Vec::new()),
        };
        Self {
            opcode: route.opcode,
            keyspace: route.keyspace.clone(),
            select: route_select(route),
            solved: route.solved,
            vindex,
            values,
            table_name: route.table_names().join(", "),
            sq_to_replace: route.sq_to_replace.clone(),
            sys_table_schema: route.sys_table_schema.clone(),
            sys_table_name: route.sys_table_name.clone(),
            order_by: Vec::new(),
            truncate_column_count: 0,
            scatter_errors_as_warnings: false,
        }
    }

    /// Routes whose introspection target is unknown reach any keyspace.
    pub fn is_unfiltered_dba(&self) -> bool {
        self.opcode == RouteOpcode::DBA
            && self.sys_table_schema.is_empty()
            && self.sys_table_name.is_empty()
    }

    fn into_route(self) -> Result<Route> {
        let mut select = self.select;
        mark_merged_subqueries(&mut select, &self.sq_to_replace);
        select.strip_keyspace_qualifiers();
        if select.select_exprs.is_empty() {
            // a side of a join that only filters or multiplies rows
            select
                .select_exprs
                .push(SelectExpr::Aliased(AliasedExpr::new(Expr::int(1))));
        }

        let mut field_select = select.clone();
        field_select.where_clause = Some(Expr::cmp(ComparisonOp::NotEq, Expr::int(1), Expr::int(1)));
        field_select.order_by.clear();
        field_select.limit = None;

        let mut route = Route::new(self.opcode, self.keyspace, select.to_string());
        route.field_query = field_select.to_string();
        route.table_name = self.table_name;
        route.vindex = self.vindex;
        route.values = self.values.iter().map(eval_expr).collect::<Result<_>>()?;
        route.order_by = self.order_by;
        route.truncate_column_count = self.truncate_column_count;
        route.scatter_errors_as_warnings = self.scatter_errors_as_warnings;
        route.sys_table_schema = self
            .sys_table_schema
            .iter()
            .map(eval_expr)
            .collect::<Result<_>>()?;
        for (name, expr) in &self.sys_table_name {
            route.sys_table_name.insert(name.clone(), eval_expr(expr)?);
        }
        Ok(route)
    }
}

#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub left: Box<LogicalPlan>,
    pub right: Box<LogicalPlan>,
    pub outer: bool,
    pub cols: Vec<i32>,
    pub vars: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct AggregatePlan {
    pub aggregates: Vec<AggregateParams>,
    pub group_by_keys: Vec<usize>,
    pub truncate_column_count: usize,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone)]
pub struct SortPlan {
    pub order_by: Vec<OrderByParams>,
    pub truncate_column_count: usize,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone)]
pub struct PulloutPlan {
    pub kind: SubqueryKind,
    pub sq_name: String,
    pub has_values: String,
    pub subquery: Box<LogicalPlan>,
    pub underlying: Box<LogicalPlan>,
}

#[derive(Debug, Clone)]
pub struct DistinctPlan {
    pub truncate_column_count: usize,
    pub input: Box<LogicalPlan>,
}

/// Columns of a derived table read by name from its inner plan.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    /// Offsets into the input
    pub cols: Vec<usize>,
    /// Output column names of the derived select
    pub names: Vec<String>,
    /// The derived table's own id
    pub id: TableSet,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone)]
pub struct LimitPlan {
    pub count: Expr,
    pub offset: Option<Expr>,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone)]
pub enum LogicalPlan {
    Route(RoutePlan),
    Join(JoinPlan),
    Aggregate(AggregatePlan),
    MemorySort(SortPlan),
    Pullout(PulloutPlan),
    Distinct(DistinctPlan),
    SimpleProjection(ProjectionPlan),
    Limit(LimitPlan),
}

impl LogicalPlan {
    /// Tables whose columns this plan can produce.
    pub fn solved(&self) -> TableSet {
        match self {
            LogicalPlan::Route(r) => r.solved,
            LogicalPlan::Join(j) => j.left.solved().merge(j.right.solved()),
            LogicalPlan::Aggregate(a) => a.input.solved(),
            LogicalPlan::MemorySort(s) => s.input.solved(),
            LogicalPlan::Pullout(p) => p.underlying.solved(),
            LogicalPlan::Distinct(d) => d.input.solved(),
            LogicalPlan::SimpleProjection(p) => p.input.solved().merge(p.id),
            LogicalPlan::Limit(l) => l.input.solved(),
        }
    }

    /// Width of the rows this plan produces, before truncation.
    pub fn column_count(&self) -> usize {
        match self {
            LogicalPlan::Route(r) => r.select.select_exprs.len(),
            LogicalPlan::Join(j) => j.cols.len(),
            LogicalPlan::Aggregate(a) => a.input.column_count(),
            LogicalPlan::MemorySort(s) => s.input.column_count(),
            LogicalPlan::Pullout(p) => p.underlying.column_count(),
            LogicalPlan::Distinct(d) => d.input.column_count(),
            LogicalPlan::SimpleProjection(p) => p.cols.len(),
            LogicalPlan::Limit(l) => l.input.column_count(),
        }
    }

    /// The route this plan reads from when it is a route, possibly under
    /// pullout subqueries.
    pub fn underlying_route_mut(&mut self) -> Option<&mut RoutePlan> {
        match self {
            LogicalPlan::Route(r) => Some(r),
            LogicalPlan::Pullout(p) => p.underlying.underlying_route_mut(),
            _ => None,
        }
    }

    pub fn underlying_route(&self) -> Option<&RoutePlan> {
        match self {
            LogicalPlan::Route(r) => Some(r),
            LogicalPlan::Pullout(p) => p.underlying.underlying_route(),
            _ => None,
        }
    }

    /// Every route of the plan, left to right.
    pub fn routes(&self) -> Vec<&RoutePlan> {
        let mut out = Vec::new();
        self.collect_routes(&mut out);
        out
    }

    fn collect_routes<'a>(&'a self, out: &mut Vec<&'a RoutePlan>) {
        match self {
            LogicalPlan::Route(r) => out.push(r),
            LogicalPlan::Join(j) => {
                j.left.collect_routes(out);
                j.right.collect_routes(out);
            }
            LogicalPlan::Pullout(p) => {
                p.subquery.collect_routes(out);
                p.underlying.collect_routes(out);
            }
            LogicalPlan::Aggregate(a) => a.input.collect_routes(out),
            LogicalPlan::MemorySort(s) => s.input.collect_routes(out),
            LogicalPlan::Distinct(d) => d.input.collect_routes(out),
            LogicalPlan::SimpleProjection(p) => p.input.collect_routes(out),
            LogicalPlan::Limit(l) => l.input.collect_routes(out),
        }
    }

    pub fn for_each_route_mut(&mut self, f: &mut dyn FnMut(&mut RoutePlan)) {
        match self {
            LogicalPlan::Route(r) => f(r),
            LogicalPlan::Join(j) => {
                j.left.for_each_route_mut(f);
                j.right.for_each_route_mut(f);
            }
            LogicalPlan::Pullout(p) => {
                p.subquery.for_each_route_mut(f);
                p.underlying.for_each_route_mut(f);
            }
            LogicalPlan::Aggregate(a) => a.input.for_each_route_mut(f),
            LogicalPlan::MemorySort(s) => s.input.for_each_route_mut(f),
            LogicalPlan::Distinct(d) => d.input.for_each_route_mut(f),
            LogicalPlan::SimpleProjection(p) => p.input.for_each_route_mut(f),
            LogicalPlan::Limit(l) => l.input.for_each_route_mut(f),
        }
    }

    /// Cut the output down to `count` columns at the operator that shapes
    /// the final rows.
    pub fn set_truncate_column_count(&mut self, count: usize) -> Result<()> {
        match self {
            LogicalPlan::Route(r) => r.truncate_column_count = count,
            LogicalPlan::Join(j) => j.cols.truncate(count),
            LogicalPlan::Aggregate(a) => a.truncate_column_count = count,
            LogicalPlan::MemorySort(s) => s.truncate_column_count = count,
            LogicalPlan::Distinct(d) => d.truncate_column_count = count,
            LogicalPlan::SimpleProjection(p) => p.cols.truncate(count),
            LogicalPlan::Pullout(p) => p.underlying.set_truncate_column_count(count)?,
            LogicalPlan::Limit(l) => l.input.set_truncate_column_count(count)?,
        }
        Ok(())
    }

    pub fn into_primitive(self) -> Result<Primitive> {
        Ok(match self {
            LogicalPlan::Route(r) => Primitive::Route(r.into_route()?),
            LogicalPlan::Join(j) => Primitive::Join(Join {
                opcode: if j.outer {
                    JoinOpcode::LeftJoin
                } else {
                    JoinOpcode::Normal
                },
                left: Box::new(j.left.into_primitive()?),
                right: Box::new(j.right.into_primitive()?),
                cols: j.cols,
                vars: j.vars,
            }),
            LogicalPlan::Aggregate(a) => Primitive::OrderedAggregate(OrderedAggregate {
                aggregates: a.aggregates,
                group_by_keys: a.group_by_keys,
                truncate_column_count: a.truncate_column_count,
                input: Box::new(a.input.into_primitive()?),
            }),
            LogicalPlan::MemorySort(s) => Primitive::MemorySort(MemorySort {
                order_by: s.order_by,
                truncate_column_count: s.truncate_column_count,
                input: Box::new(s.input.into_primitive()?),
            }),
            LogicalPlan::Pullout(p) => Primitive::PulloutSubquery(PulloutSubquery {
                opcode: pullout_opcode(p.kind),
                sq_name: p.sq_name,
                has_values: p.has_values,
                subquery: Box::new(p.subquery.into_primitive()?),
                underlying: Box::new(p.underlying.into_primitive()?),
            }),
            LogicalPlan::Distinct(d) => Primitive::Distinct(Distinct {
                truncate_column_count: d.truncate_column_count,
                input: Box::new(d.input.into_primitive()?),
            }),
            LogicalPlan::SimpleProjection(p) => Primitive::SimpleProjection(SimpleProjection {
                cols: p.cols,
                input: Box::new(p.input.into_primitive()?),
            }),
            LogicalPlan::Limit(l) => Primitive::Limit(Limit {
                count: eval_expr(&l.count)?,
                offset: l.offset.as_ref().map(eval_expr).transpose()?,
                input: Box::new(l.input.into_primitive()?),
            }),
        })
    }
}

fn pullout_opcode(kind: SubqueryKind) -> PulloutOpcode {
    match kind {
        SubqueryKind::Value => PulloutOpcode::Value,
        SubqueryKind::In => PulloutOpcode::In,
        SubqueryKind::NotIn => PulloutOpcode::NotIn,
        SubqueryKind::Exists => PulloutOpcode::Exists,
    }
}

/// Routing values and limits must be known before the query runs.
pub fn eval_expr(expr: &Expr) -> Result<EvalExpr> {
    match expr {
        Expr::Literal(lit) => Ok(EvalExpr::Literal(lit.to_value())),
        Expr::Argument(name) => Ok(EvalExpr::BindVar(name.clone())),
        Expr::ListArgument(name) => Ok(EvalExpr::ListBindVar(name.clone())),
        Expr::Tuple(items) => Ok(EvalExpr::Tuple(
            items.iter().map(eval_expr).collect::<Result<_>>()?,
        )),
        Expr::Neg(inner) => match inner.as_ref() {
            Expr::Literal(routeplan_sql::Literal::Int(v)) => {
                Ok(EvalExpr::Literal(routeplan_common::Value::Int(-v)))
            }
            other => Err(RouteplanError::internal(format!(
                "expression cannot be evaluated before execution: -{}",
                other
            ))),
        },
        other => Err(RouteplanError::internal(format!(
            "expression cannot be evaluated before execution: {}",
            other
        ))),
    }
}
