//! The executable plan tree

use routeplan_common::{BindVars, QueryResult, Result};
use serde_json::json;

use crate::aggregate::OrderedAggregate;
use crate::compare::Compare;
use crate::description::PrimitiveDescription;
use crate::distinct::Distinct;
use crate::join::{format_cols, Join};
use crate::limit::Limit;
use crate::projection::SimpleProjection;
use crate::pullout::PulloutSubquery;
use crate::route::{Route, Send};
use crate::sort::MemorySort;
use crate::vcursor::VCursor;

/// Plan operator. Leaves talk to shards through the [`VCursor`]; inner nodes
/// combine their inputs at the vtgate.
#[derive(Debug, Clone)]
pub enum Primitive {
    Route(Route),
    Send(Send),
    Join(Join),
    OrderedAggregate(OrderedAggregate),
    MemorySort(MemorySort),
    PulloutSubquery(PulloutSubquery),
    Distinct(Distinct),
    SimpleProjection(SimpleProjection),
    Limit(Limit),
    Compare(Compare),
}

impl Primitive {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        match self {
            Primitive::Route(p) => p.execute(vcursor, bind_vars),
            Primitive::Send(p) => p.execute(vcursor, bind_vars),
            Primitive::Join(p) => p.execute(vcursor, bind_vars),
            Primitive::OrderedAggregate(p) => p.execute(vcursor, bind_vars),
            Primitive::MemorySort(p) => p.execute(vcursor, bind_vars),
            Primitive::PulloutSubquery(p) => p.execute(vcursor, bind_vars),
            Primitive::Distinct(p) => p.execute(vcursor, bind_vars),
            Primitive::SimpleProjection(p) => p.execute(vcursor, bind_vars),
            Primitive::Limit(p) => p.execute(vcursor, bind_vars),
            Primitive::Compare(p) => p.execute(vcursor, bind_vars),
        }
    }

    /// Deliver results in chunks. Operators that need their whole input
    /// deliver a single chunk.
    pub fn stream_execute(
        &self,
        vcursor: &mut dyn VCursor,
        bind_vars: &BindVars,
        callback: &mut dyn FnMut(QueryResult) -> Result<()>,
    ) -> Result<()> {
        match self {
            Primitive::PulloutSubquery(p) => p.stream_execute(vcursor, bind_vars, callback),
            Primitive::SimpleProjection(p) => {
                p.input
                    .stream_execute(vcursor, bind_vars, &mut |chunk| callback(p.project(chunk)))
            }
            other => callback(other.execute(vcursor, bind_vars)?),
        }
    }

    /// Child primitives in execution order.
    pub fn inputs(&self) -> Vec<&Primitive> {
        match self {
            Primitive::Route(_) | Primitive::Send(_) => vec![],
            Primitive::Join(p) => vec![p.left.as_ref(), p.right.as_ref()],
            Primitive::OrderedAggregate(p) => vec![p.input.as_ref()],
            Primitive::MemorySort(p) => vec![p.input.as_ref()],
            Primitive::PulloutSubquery(p) => vec![p.subquery.as_ref(), p.underlying.as_ref()],
            Primitive::Distinct(p) => vec![p.input.as_ref()],
            Primitive::SimpleProjection(p) => vec![p.input.as_ref()],
            Primitive::Limit(p) => vec![p.input.as_ref()],
            Primitive::Compare(p) => vec![p.v3.as_ref(), p.gen4.as_ref()],
        }
    }

    /// Routes anywhere in the tree, left to right.
    pub fn routes(&self) -> Vec<&Route> {
        match self {
            Primitive::Route(r) => vec![r],
            other => other.inputs().into_iter().flat_map(|p| p.routes()).collect(),
        }
    }

    pub fn description(&self) -> PrimitiveDescription {
        let desc = match self {
            Primitive::Route(r) => {
                let mut d = PrimitiveDescription::new("Route")
                    .variant(r.opcode.name())
                    .keyspace(&r.keyspace.name, r.keyspace.sharded)
                    .with("Query", r.query.as_str());
                if !r.field_query.is_empty() {
                    d = d.with("FieldQuery", r.field_query.as_str());
                }
                if !r.table_name.is_empty() {
                    d = d.with("Table", r.table_name.as_str());
                }
                if let Some(vindex) = &r.vindex {
                    d = d.with("Vindex", vindex.name.as_str());
                }
                if !r.values.is_empty() {
                    let values: Vec<String> = r.values.iter().map(|v| v.to_string()).collect();
                    d = d.with("Values", values);
                }
                if !r.order_by.is_empty() {
                    d = d.with("OrderBy", join_display(&r.order_by));
                }
                if r.truncate_column_count > 0 {
                    d = d.with("ResultColumns", r.truncate_column_count);
                }
                if r.scatter_errors_as_warnings {
                    d = d.with("ScatterErrorsAsWarnings", true);
                }
                if !r.sys_table_schema.is_empty() {
                    d = d.with("SysTableTableSchema", join_display(&r.sys_table_schema));
                }
                if !r.sys_table_name.is_empty() {
                    let names: Vec<String> = r
                        .sys_table_name
                        .iter()
                        .map(|(k, v)| format!("{}:{}", k, v))
                        .collect();
                    d = d.with("SysTableTableName", format!("[{}]", names.join(", ")));
                }
                return d;
            }
            Primitive::Send(s) => {
                let mut d = PrimitiveDescription::new("Send")
                    .keyspace(&s.keyspace.name, s.keyspace.sharded)
                    .with("Query", s.query.as_str());
                d.target_destination = Some(s.target_destination.clone());
                if s.single_shard_only {
                    d = d.with("SingleShardOnly", true);
                }
                return d;
            }
            Primitive::Join(j) => PrimitiveDescription::new("Join")
                .variant(j.opcode.name())
                .with("JoinColumnIndexes", format_cols(&j.cols))
                .with("JoinVars", json!(j.vars)),
            Primitive::OrderedAggregate(a) => {
                let mut d = PrimitiveDescription::new("Aggregate")
                    .variant("Ordered")
                    .with("Aggregates", join_display(&a.aggregates));
                if !a.group_by_keys.is_empty() {
                    d = d.with("GroupBy", join_display(&a.group_by_keys));
                }
                with_truncation(d, a.truncate_column_count)
            }
            Primitive::MemorySort(s) => with_truncation(
                PrimitiveDescription::new("Sort")
                    .variant("Memory")
                    .with("OrderBy", join_display(&s.order_by)),
                s.truncate_column_count,
            ),
            Primitive::PulloutSubquery(p) => PrimitiveDescription::new("Subquery")
                .variant(p.opcode.name())
                .with("PulloutVars", json!([p.has_values, p.sq_name])),
            Primitive::Distinct(d) => {
                with_truncation(PrimitiveDescription::new("Distinct"), d.truncate_column_count)
            }
            Primitive::SimpleProjection(p) => PrimitiveDescription::new("SimpleProjection")
                .with("Columns", join_display(&p.cols)),
            Primitive::Limit(l) => {
                let mut d = PrimitiveDescription::new("Limit").with("Count", l.count.to_string());
                if let Some(offset) = &l.offset {
                    d = d.with("Offset", offset.to_string());
                }
                d
            }
            Primitive::Compare(_) => PrimitiveDescription::new("Gen4CompareV3"),
        };
        self.inputs()
            .into_iter()
            .fold(desc, |d, input| d.input(input.description()))
    }
}

fn with_truncation(d: PrimitiveDescription, count: usize) -> PrimitiveDescription {
    if count > 0 {
        d.with("ResultColumns", count)
    } else {
        d
    }
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
