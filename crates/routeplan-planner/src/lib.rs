//! Routeplan Planner - Query routing for sharded keyspaces
//!
//! Turns a SELECT into a tree of engine primitives: routes that each send
//! one query to the shards of a keyspace, and vtgate-side operators that
//! join, sort, aggregate and limit what the routes return.

pub mod builder;
pub mod context;
pub mod explain;
pub mod horizon;
pub mod join_planner;
pub mod memo;
pub mod merge;
pub mod operators;
pub mod optimizer;
pub mod plan;
pub mod query_tree;
pub mod rewrite;
pub mod route;
pub mod subquery;
pub mod transform;

pub use builder::{build_plan, gen4_plan, BuildOptions, LegacyPlanner, Plan};
pub use context::PlanningContext;
pub use explain::explain;
pub use plan::LogicalPlan;
pub use query_tree::{QueryTree, RouteTree};
