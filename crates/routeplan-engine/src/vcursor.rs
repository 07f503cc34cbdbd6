//! Shard I/O seam

use routeplan_common::{BindVars, QueryResult, Result};

use crate::route::{Route, Send};

/// Everything the primitives need from the outside world. Implementations
/// resolve the route's destination and run its query on the shards.
pub trait VCursor {
    fn execute_route(&mut self, route: &Route, bind_vars: &BindVars) -> Result<QueryResult>;

    fn execute_send(&mut self, send: &Send, bind_vars: &BindVars) -> Result<QueryResult>;
}
