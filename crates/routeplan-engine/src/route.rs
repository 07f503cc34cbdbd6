//! Route and Send: the primitives that talk to shards

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use routeplan_common::{BindVars, QueryResult, Result};
use routeplan_vschema::{Keyspace, Vindex};
use serde::Serialize;
use tracing::debug;

use crate::evalengine::EvalExpr;
use crate::sort::{sort_rows, OrderByParams};
use crate::vcursor::VCursor;

/// How a route picks its shards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RouteOpcode {
    /// The keyspace has a single shard
    Unsharded,
    /// One shard, chosen by a unique vindex
    EqualUnique,
    /// Shards chosen by a non-unique vindex
    Equal,
    /// Shards chosen by a unique vindex for a list of values
    In,
    /// Every shard
    Scatter,
    /// Any shard holding a full copy of a reference table
    Reference,
    /// Introspection tables, any keyspace
    DBA,
    /// Sequence value allocation
    Next,
}

impl RouteOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            RouteOpcode::Unsharded => "Unsharded",
            RouteOpcode::EqualUnique => "EqualUnique",
            RouteOpcode::Equal => "Equal",
            RouteOpcode::In => "IN",
            RouteOpcode::Scatter => "Scatter",
            RouteOpcode::Reference => "Reference",
            RouteOpcode::DBA => "DBA",
            RouteOpcode::Next => "Next",
        }
    }

    /// Routes that reach exactly one shard.
    pub fn is_single_shard(&self) -> bool {
        matches!(
            self,
            RouteOpcode::Unsharded
                | RouteOpcode::DBA
                | RouteOpcode::Next
                | RouteOpcode::EqualUnique
                | RouteOpcode::Reference
        )
    }
}

impl fmt::Display for RouteOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A query sent to the shards of one keyspace
#[derive(Debug, Clone)]
pub struct Route {
    pub opcode: RouteOpcode,
    pub keyspace: Arc<Keyspace>,
    pub query: String,
    /// Query returning no rows, used to fetch result fields
    pub field_query: String,
    pub table_name: String,
    pub vindex: Option<Arc<Vindex>>,
    pub values: Vec<EvalExpr>,
    /// Merge-sort keys for results streamed from several shards
    pub order_by: Vec<OrderByParams>,
    pub truncate_column_count: usize,
    pub scatter_errors_as_warnings: bool,
    /// Schema names an introspection query targets
    pub sys_table_schema: Vec<EvalExpr>,
    /// Table names an introspection query targets, by bind variable
    pub sys_table_name: BTreeMap<String, EvalExpr>,
}

impl Route {
    pub fn new(opcode: RouteOpcode, keyspace: Arc<Keyspace>, query: String) -> Self {
        Self {
            opcode,
            keyspace,
            query,
            field_query: String::new(),
            table_name: String::new(),
            vindex: None,
            values: Vec::new(),
            order_by: Vec::new(),
            truncate_column_count: 0,
            scatter_errors_as_warnings: false,
            sys_table_schema: Vec::new(),
            sys_table_name: BTreeMap::new(),
        }
    }

    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        debug!(opcode = %self.opcode, keyspace = %self.keyspace.name, query = %self.query, "route");
        let mut result = vcursor.execute_route(self, bind_vars)?;
        if !self.order_by.is_empty() && !self.opcode.is_single_shard() {
            sort_rows(&mut result.rows, &self.order_by);
        }
        result.truncate(self.truncate_column_count);
        Ok(result)
    }
}

/// A statement forwarded verbatim to an explicit destination
#[derive(Debug, Clone)]
pub struct Send {
    pub keyspace: Arc<Keyspace>,
    /// Rendered target, e.g. `Shard(-80)` or `AllShards()`
    pub target_destination: String,
    pub query: String,
    pub single_shard_only: bool,
}

impl Send {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        debug!(keyspace = %self.keyspace.name, destination = %self.target_destination, "send");
        vcursor.execute_send(self, bind_vars)
    }
}
