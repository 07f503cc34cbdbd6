//! Schema lookup traits

use routeplan_common::{PlannerVersion, Result, RouteplanError};
use std::sync::Arc;

use crate::vschema::{Keyspace, Table, TableOrVindex, TargetDestination};

/// The schema view a planning call works against
pub trait SchemaProvider: Send + Sync {
    /// Keyspace for unqualified table names
    fn default_keyspace(&self) -> Result<Arc<Keyspace>>;

    /// Resolve a table or vindex name, following routing rules
    fn find_table_or_vindex(&self, keyspace: Option<&str>, name: &str) -> Result<TableOrVindex>;

    /// Any keyspace, used to target information-schema queries
    fn any_keyspace(&self) -> Result<Arc<Keyspace>>;

    /// Check if keyspace exists
    fn keyspace_exists(&self, name: &str) -> bool;

    /// Destination override that bypasses planning
    fn target_destination(&self) -> Option<TargetDestination>;

    /// Planner used when the query carries no directive
    fn planner_version(&self) -> PlannerVersion;

    /// Resolve a name that must be a table
    fn find_table(&self, keyspace: Option<&str>, name: &str) -> Result<Arc<Table>> {
        match self.find_table_or_vindex(keyspace, name)? {
            TableOrVindex::Table(table) => Ok(table),
            TableOrVindex::Vindex { .. } => Err(RouteplanError::NotFound(format!(
                "table '{}' (found a vindex with that name)",
                name
            ))),
        }
    }
}
