//! Routeplan Engine - Executable plan primitives

pub mod aggregate;
pub mod compare;
pub mod description;
pub mod distinct;
pub mod evalengine;
pub mod join;
pub mod limit;
pub mod primitive;
pub mod projection;
pub mod pullout;
pub mod route;
pub mod sort;
pub mod vcursor;

pub use aggregate::{AggregateOpcode, AggregateParams, OrderedAggregate};
pub use compare::Compare;
pub use description::{KeyspaceDescription, PrimitiveDescription};
pub use distinct::Distinct;
pub use evalengine::EvalExpr;
pub use join::{Join, JoinOpcode};
pub use limit::{Limit, UPPER_LIMIT_VAR};
pub use primitive::Primitive;
pub use projection::SimpleProjection;
pub use pullout::{PulloutOpcode, PulloutSubquery};
pub use route::{Route, RouteOpcode, Send};
pub use sort::{MemorySort, OrderByParams};
pub use vcursor::VCursor;
