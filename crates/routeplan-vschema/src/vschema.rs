//! Keyspaces, tables and destinations

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::vindex::{ColumnVindex, Vindex};

/// A logical database, possibly split into shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyspace {
    pub name: String,
    pub sharded: bool,
}

impl Keyspace {
    pub fn new(name: impl Into<String>, sharded: bool) -> Self {
        Self {
            name: name.into(),
            sharded,
        }
    }
}

impl std::fmt::Display for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    #[default]
    #[serde(alias = "")]
    Normal,
    /// Replicated to every shard of its keyspace
    Reference,
    /// Backs a sequence generator
    Sequence,
}

/// Routing metadata of one table
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub keyspace: Arc<Keyspace>,
    pub table_type: TableType,
    pub column_vindexes: Vec<ColumnVindex>,
    /// Hex keyspace id every row of the table lives at
    pub pinned: Option<String>,
    pub columns: Vec<String>,
    pub column_list_authoritative: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, keyspace: Arc<Keyspace>) -> Self {
        Self {
            name: name.into(),
            keyspace,
            table_type: TableType::Normal,
            column_vindexes: Vec::new(),
            pinned: None,
            columns: Vec::new(),
            column_list_authoritative: false,
        }
    }

    /// Columns usable for `*` expansion and column resolution.
    pub fn authoritative_columns(&self) -> Option<&[String]> {
        if self.column_list_authoritative && !self.columns.is_empty() {
            Some(&self.columns)
        } else {
            None
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Result of a name lookup: tables and vindexes share a namespace
#[derive(Debug, Clone)]
pub enum TableOrVindex {
    Table(Arc<Table>),
    Vindex {
        keyspace: Arc<Keyspace>,
        vindex: Arc<Vindex>,
    },
}

/// Explicit shard target chosen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Shard(String),
    AnyShard,
    AllShards,
    /// Hex keyspace id
    KeyspaceId(String),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Shard(shard) => write!(f, "DestinationShard({})", shard),
            Destination::AnyShard => write!(f, "DestinationAnyShard()"),
            Destination::AllShards => write!(f, "DestinationAllShards()"),
            Destination::KeyspaceId(id) => write!(f, "DestinationKeyspaceID({})", id),
        }
    }
}

/// A destination override: every statement bypasses planning and is sent
/// verbatim to this target.
#[derive(Debug, Clone)]
pub struct TargetDestination {
    pub keyspace: Arc<Keyspace>,
    pub destination: Destination,
}
