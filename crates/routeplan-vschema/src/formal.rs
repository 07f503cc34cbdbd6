//! VSchema file format
//!
//! The same definitions are accepted as JSON (`.json`) or TOML (anything
//! else) and double as builders for programmatic schemas.

use routeplan_common::{Result, RouteplanError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::in_memory::InMemoryVSchema;
use crate::vindex::{Vindex, VindexKind};
use crate::vschema::TableType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VSchemaConfig {
    #[serde(default)]
    pub keyspaces: BTreeMap<String, KeyspaceDef>,
    #[serde(default)]
    pub routing_rules: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyspaceDef {
    #[serde(default)]
    pub sharded: bool,
    #[serde(default)]
    pub vindexes: BTreeMap<String, VindexDef>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VindexDef {
    #[serde(rename = "type")]
    pub kind: VindexKind,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(rename = "type", default)]
    pub table_type: TableType,
    #[serde(default)]
    pub column_vindexes: Vec<ColumnVindexDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub column_list_authoritative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnVindexDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    pub name: String,
}

impl ColumnVindexDef {
    pub fn column_names(&self) -> Vec<String> {
        match &self.column {
            Some(column) => vec![column.clone()],
            None => self.columns.clone(),
        }
    }
}

impl TableDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vindex(mut self, column: &str, name: &str) -> Self {
        self.column_vindexes.push(ColumnVindexDef {
            column: Some(column.to_string()),
            columns: Vec::new(),
            name: name.to_string(),
        });
        self
    }

    pub fn reference(mut self) -> Self {
        self.table_type = TableType::Reference;
        self
    }

    pub fn sequence(mut self) -> Self {
        self.table_type = TableType::Sequence;
        self
    }

    pub fn pinned(mut self, keyspace_id: &str) -> Self {
        self.pinned = Some(keyspace_id.to_string());
        self
    }

    /// Declare an authoritative column list.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self.column_list_authoritative = true;
        self
    }
}

impl VSchemaConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| RouteplanError::Config(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RouteplanError::Config(e.to_string()))
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the in-memory schema. Vindexes are created before tables so
    /// every column vindex refers to the keyspace's single instance.
    pub fn build(&self) -> Result<InMemoryVSchema> {
        let vschema = InMemoryVSchema::new();
        for (ks_name, ks_def) in &self.keyspaces {
            vschema.add_keyspace(ks_name, ks_def.sharded)?;
            for (vdx_name, vdx_def) in &ks_def.vindexes {
                let mut vindex = Vindex::new(vdx_name.clone(), vdx_def.kind);
                vindex.params = vdx_def.params.clone();
                vschema.add_vindex_instance(ks_name, vindex)?;
            }
            for (table_name, table_def) in &ks_def.tables {
                vschema.add_table(ks_name, table_name, table_def)?;
            }
        }
        for (from, to) in &self.routing_rules {
            vschema.add_routing_rule(from, to)?;
        }
        tracing::info!(
            keyspaces = self.keyspaces.len(),
            routing_rules = self.routing_rules.len(),
            "vschema loaded"
        );
        Ok(vschema)
    }
}
