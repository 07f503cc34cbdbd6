//! In-memory vschema implementation

use dashmap::DashMap;
use routeplan_common::{PlannerVersion, Result, RouteplanError};
use std::sync::Arc;

use crate::formal::TableDef;
use crate::traits::SchemaProvider;
use crate::vindex::{ColumnVindex, Vindex, VindexKind};
use crate::vschema::{Keyspace, Table, TableOrVindex, TableType, TargetDestination};

/// Tables and vindexes of one keyspace
pub struct KeyspaceSchema {
    keyspace: Arc<Keyspace>,
    tables: DashMap<String, Arc<Table>>,
    vindexes: DashMap<String, Arc<Vindex>>,
}

impl KeyspaceSchema {
    pub fn new(keyspace: Arc<Keyspace>) -> Self {
        Self {
            keyspace,
            tables: DashMap::new(),
            vindexes: DashMap::new(),
        }
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).map(|t| t.value().clone())
    }

    pub fn vindex(&self, name: &str) -> Option<Arc<Vindex>> {
        self.vindexes.get(name).map(|v| v.value().clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Look a name up in this keyspace. Unsharded keyspaces accept any
    /// table name, since every table lives on their single shard.
    fn lookup(&self, name: &str) -> Option<TableOrVindex> {
        if let Some(table) = self.table(name) {
            return Some(TableOrVindex::Table(table));
        }
        if let Some(vindex) = self.vindex(name) {
            return Some(TableOrVindex::Vindex {
                keyspace: self.keyspace.clone(),
                vindex,
            });
        }
        if !self.keyspace.sharded {
            return Some(TableOrVindex::Table(Arc::new(Table::new(
                name,
                self.keyspace.clone(),
            ))));
        }
        None
    }
}

/// In-memory vschema
pub struct InMemoryVSchema {
    keyspaces: DashMap<String, Arc<KeyspaceSchema>>,
    routing_rules: DashMap<String, String>,
    default_keyspace: Option<String>,
    destination: Option<TargetDestination>,
    planner: PlannerVersion,
}

impl InMemoryVSchema {
    pub fn new() -> Self {
        Self {
            keyspaces: DashMap::new(),
            routing_rules: DashMap::new(),
            default_keyspace: None,
            destination: None,
            planner: PlannerVersion::default(),
        }
    }

    pub fn with_default_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.default_keyspace = Some(keyspace.into());
        self
    }

    pub fn with_destination(mut self, destination: TargetDestination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_planner(mut self, planner: PlannerVersion) -> Self {
        self.planner = planner;
        self
    }

    pub fn set_default_keyspace(&mut self, keyspace: Option<String>) {
        self.default_keyspace = keyspace;
    }

    pub fn add_keyspace(&self, name: &str, sharded: bool) -> Result<Arc<Keyspace>> {
        if self.keyspaces.contains_key(name) {
            return Err(RouteplanError::InvalidArgument(format!(
                "keyspace '{}' already exists",
                name
            )));
        }
        let keyspace = Arc::new(Keyspace::new(name, sharded));
        self.keyspaces.insert(
            name.to_string(),
            Arc::new(KeyspaceSchema::new(keyspace.clone())),
        );
        Ok(keyspace)
    }

    pub fn keyspace_schema(&self, name: &str) -> Result<Arc<KeyspaceSchema>> {
        self.keyspaces
            .get(name)
            .map(|k| k.value().clone())
            .ok_or_else(|| RouteplanError::NotFound(format!("keyspace '{}'", name)))
    }

    pub fn keyspace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keyspaces.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn add_vindex(&self, keyspace: &str, name: &str, kind: VindexKind) -> Result<Arc<Vindex>> {
        self.add_vindex_instance(keyspace, Vindex::new(name, kind))
    }

    pub fn add_vindex_instance(&self, keyspace: &str, vindex: Vindex) -> Result<Arc<Vindex>> {
        let ks = self.keyspace_schema(keyspace)?;
        if ks.vindexes.contains_key(&vindex.name) {
            return Err(RouteplanError::InvalidArgument(format!(
                "vindex '{}' already exists in keyspace '{}'",
                vindex.name, keyspace
            )));
        }
        let vindex = Arc::new(vindex);
        ks.vindexes.insert(vindex.name.clone(), vindex.clone());
        Ok(vindex)
    }

    pub fn add_table(&self, keyspace: &str, name: &str, def: &TableDef) -> Result<Arc<Table>> {
        let ks = self.keyspace_schema(keyspace)?;
        if ks.tables.contains_key(name) {
            return Err(RouteplanError::InvalidArgument(format!(
                "table '{}' already exists in keyspace '{}'",
                name, keyspace
            )));
        }

        let mut table = Table::new(name, ks.keyspace.clone());
        table.table_type = def.table_type;
        table.pinned = def.pinned.clone();
        table.columns = def.columns.clone();
        table.column_list_authoritative = def.column_list_authoritative;

        for cv in &def.column_vindexes {
            let vindex = ks.vindex(&cv.name).ok_or_else(|| {
                RouteplanError::NotFound(format!(
                    "vindex '{}' in keyspace '{}'",
                    cv.name, keyspace
                ))
            })?;
            table.column_vindexes.push(ColumnVindex {
                columns: cv.column_names(),
                vindex,
            });
        }

        validate_table(&table)?;
        let table = Arc::new(table);
        ks.tables.insert(name.to_string(), table.clone());
        tracing::debug!(keyspace, table = name, "registered table");
        Ok(table)
    }

    /// Route `from` (`table` or `keyspace.table`) to `to` (`keyspace.table`).
    pub fn add_routing_rule(&self, from: &str, to: &str) -> Result<()> {
        if !to.contains('.') {
            return Err(RouteplanError::Config(format!(
                "routing rule target '{}' must be qualified with a keyspace",
                to
            )));
        }
        self.routing_rules.insert(from.to_string(), to.to_string());
        Ok(())
    }

    fn find_routed(&self, keyspace: Option<&str>, name: &str) -> Option<Result<TableOrVindex>> {
        let key = match keyspace {
            Some(ks) => format!("{}.{}", ks, name),
            None => name.to_string(),
        };
        let target = self.routing_rules.get(&key)?.value().clone();
        let (target_ks, target_table) = target.split_once('.')?;
        Some(self.keyspace_schema(target_ks).and_then(|ks| {
            ks.lookup(target_table).ok_or_else(|| {
                RouteplanError::NotFound(format!(
                    "table '{}' in keyspace '{}' (routed from '{}')",
                    target_table, target_ks, key
                ))
            })
        }))
    }

    fn find_in_keyspace(&self, keyspace: &str, name: &str) -> Result<TableOrVindex> {
        let ks = self.keyspace_schema(keyspace)?;
        ks.lookup(name).ok_or_else(|| {
            RouteplanError::NotFound(format!("table '{}' in keyspace '{}'", name, keyspace))
        })
    }
}

impl Default for InMemoryVSchema {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_table(table: &Table) -> Result<()> {
    if !table.keyspace.sharded {
        if !table.column_vindexes.is_empty() {
            return Err(RouteplanError::Config(format!(
                "table '{}' in unsharded keyspace '{}' cannot have vindexes",
                table.name, table.keyspace.name
            )));
        }
        if table.pinned.is_some() {
            return Err(RouteplanError::Config(format!(
                "table '{}' in unsharded keyspace '{}' cannot be pinned",
                table.name, table.keyspace.name
            )));
        }
        return Ok(());
    }
    let needs_primary = table.table_type == TableType::Normal && table.pinned.is_none();
    if needs_primary && table.column_vindexes.is_empty() {
        return Err(RouteplanError::Config(format!(
            "missing primary vindex for table '{}' in keyspace '{}'",
            table.name, table.keyspace.name
        )));
    }
    if let Some(primary) = table.column_vindexes.first() {
        if !primary.is_unique() {
            return Err(RouteplanError::Config(format!(
                "primary vindex '{}' of table '{}' is not unique",
                primary.name(),
                table.name
            )));
        }
    }
    Ok(())
}

impl SchemaProvider for InMemoryVSchema {
    fn default_keyspace(&self) -> Result<Arc<Keyspace>> {
        if let Some(name) = &self.default_keyspace {
            return Ok(self.keyspace_schema(name)?.keyspace.clone());
        }
        let names = self.keyspace_names();
        match names.as_slice() {
            [only] => Ok(self.keyspace_schema(only)?.keyspace.clone()),
            _ => Err(RouteplanError::NotFound(
                "no default keyspace selected".to_string(),
            )),
        }
    }

    fn find_table_or_vindex(&self, keyspace: Option<&str>, name: &str) -> Result<TableOrVindex> {
        if let Some(routed) = self.find_routed(keyspace, name) {
            return routed;
        }
        if let Some(ks) = keyspace.or(self.default_keyspace.as_deref()) {
            return self.find_in_keyspace(ks, name);
        }

        let mut found = Vec::new();
        for ks_name in self.keyspace_names() {
            let ks = self.keyspace_schema(&ks_name)?;
            if let Some(table) = ks.table(name) {
                found.push(TableOrVindex::Table(table));
            } else if let Some(vindex) = ks.vindex(name) {
                found.push(TableOrVindex::Vindex {
                    keyspace: ks.keyspace.clone(),
                    vindex,
                });
            }
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => {
                // A lone unsharded keyspace accepts undeclared tables.
                let names = self.keyspace_names();
                if let [only] = names.as_slice() {
                    if let Some(t) = self.keyspace_schema(only)?.lookup(name) {
                        return Ok(t);
                    }
                }
                Err(RouteplanError::NotFound(format!("table '{}'", name)))
            }
            _ => Err(RouteplanError::Ambiguous(format!(
                "table '{}' is defined in more than one keyspace",
                name
            ))),
        }
    }

    fn any_keyspace(&self) -> Result<Arc<Keyspace>> {
        if let Ok(ks) = self.default_keyspace() {
            return Ok(ks);
        }
        let names = self.keyspace_names();
        let first = names
            .first()
            .ok_or_else(|| RouteplanError::NotFound("no keyspace defined".to_string()))?;
        Ok(self.keyspace_schema(first)?.keyspace.clone())
    }

    fn keyspace_exists(&self, name: &str) -> bool {
        self.keyspaces.contains_key(name)
    }

    fn target_destination(&self) -> Option<TargetDestination> {
        self.destination.clone()
    }

    fn planner_version(&self) -> PlannerVersion {
        self.planner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_vschema() -> InMemoryVSchema {
        let vschema = InMemoryVSchema::new();
        vschema.add_keyspace("user", true).unwrap();
        vschema.add_keyspace("main", false).unwrap();
        vschema.add_vindex("user", "hash", VindexKind::Hash).unwrap();
        vschema
            .add_table("user", "user", &TableDef::new().vindex("id", "hash"))
            .unwrap();
        vschema
            .add_table("user", "ref", &TableDef::new().reference())
            .unwrap();
        vschema
            .add_table("main", "unsharded", &TableDef::new())
            .unwrap();
        vschema
    }

    #[test]
    fn test_find_table_across_keyspaces() {
        let vschema = user_vschema();
        let table = vschema.find_table(None, "user").unwrap();
        assert_eq!(table.keyspace.name, "user");
        assert_eq!(table.column_vindexes[0].single_column(), Some("id"));

        let table = vschema.find_table(None, "unsharded").unwrap();
        assert_eq!(table.keyspace.name, "main");
    }

    #[test]
    fn test_unsharded_keyspace_accepts_undeclared_tables() {
        let vschema = user_vschema();
        let table = vschema.find_table(Some("main"), "anything").unwrap();
        assert_eq!(table.name, "anything");
        assert!(!table.keyspace.sharded);

        let err = vschema.find_table(Some("user"), "anything").unwrap_err();
        assert!(matches!(err, RouteplanError::NotFound(_)));
    }

    #[test]
    fn test_vindex_lookup_by_name() {
        let vschema = user_vschema();
        match vschema.find_table_or_vindex(Some("user"), "hash").unwrap() {
            TableOrVindex::Vindex { vindex, .. } => assert_eq!(vindex.kind, VindexKind::Hash),
            TableOrVindex::Table(_) => panic!("expected a vindex"),
        }
        assert!(vschema.find_table(Some("user"), "hash").is_err());
    }

    #[test]
    fn test_routing_rules() {
        let vschema = user_vschema();
        vschema.add_routing_rule("customer", "user.user").unwrap();
        let table = vschema.find_table(None, "customer").unwrap();
        assert_eq!(table.name, "user");
        assert_eq!(table.keyspace.name, "user");
        assert!(vschema.add_routing_rule("x", "unqualified").is_err());
    }

    #[test]
    fn test_ambiguous_table() {
        let vschema = user_vschema();
        vschema.add_table("main", "ref", &TableDef::new()).unwrap();
        let err = vschema.find_table(None, "ref").unwrap_err();
        assert!(matches!(err, RouteplanError::Ambiguous(_)));

        let vschema = vschema.with_default_keyspace("main");
        assert_eq!(vschema.find_table(None, "ref").unwrap().keyspace.name, "main");
    }

    #[test]
    fn test_table_validation() {
        let vschema = user_vschema();
        let err = vschema
            .add_table("user", "no_vindex", &TableDef::new())
            .unwrap_err();
        assert!(err.to_string().contains("missing primary vindex"));

        let err = vschema
            .add_table("user", "bad", &TableDef::new().vindex("id", "missing"))
            .unwrap_err();
        assert!(matches!(err, RouteplanError::NotFound(_)));

        vschema
            .add_table("user", "pinned", &TableDef::new().pinned("80"))
            .unwrap();
    }

    #[test]
    fn test_default_and_any_keyspace() {
        let vschema = user_vschema();
        assert!(vschema.default_keyspace().is_err());
        assert_eq!(vschema.any_keyspace().unwrap().name, "main");
        assert!(vschema.keyspace_exists("user"));
        assert!(!vschema.keyspace_exists("nope"));

        let vschema = vschema.with_default_keyspace("user");
        assert_eq!(vschema.default_keyspace().unwrap().name, "user");
        assert_eq!(vschema.any_keyspace().unwrap().name, "user");
    }
}
