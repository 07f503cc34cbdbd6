//! Routeplan Common - Shared errors, configuration and runtime values

pub mod config;
pub mod error;
pub mod types;

pub use config::{ExplainFormat, PlannerConfig, PlannerVersion};
pub use error::{Result, RouteplanError};
pub use types::{BindVariable, BindVars, Field, QueryResult, Row, Value};
