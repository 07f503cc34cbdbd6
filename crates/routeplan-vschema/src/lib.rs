//! Routeplan VSchema - Keyspaces, vindexes and table routing metadata

pub mod formal;
pub mod in_memory;
pub mod traits;
pub mod vindex;
pub mod vschema;

pub use formal::{ColumnVindexDef, KeyspaceDef, TableDef, VSchemaConfig, VindexDef};
pub use in_memory::{InMemoryVSchema, KeyspaceSchema};
pub use traits::SchemaProvider;
pub use vindex::{same_vindex, ColumnVindex, Vindex, VindexKind};
pub use vschema::{Destination, Keyspace, Table, TableOrVindex, TableType, TargetDestination};
