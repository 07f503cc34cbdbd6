//! Vindexes: functions from column values to keyspace ids

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Vindex implementation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VindexKind {
    Hash,
    Binary,
    BinaryMd5,
    Numeric,
    UnicodeLooseMd5,
    Xxhash,
    #[serde(alias = "lookup_hash_unique", alias = "consistent_lookup_unique")]
    LookupUnique,
    #[serde(alias = "lookup_hash", alias = "consistent_lookup")]
    Lookup,
}

impl VindexKind {
    /// A unique vindex maps every value to at most one keyspace id.
    pub fn is_unique(&self) -> bool {
        !matches!(self, VindexKind::Lookup)
    }

    /// Relative cost of resolving a value; lower is preferred.
    pub fn cost(&self) -> usize {
        match self {
            VindexKind::Binary | VindexKind::Numeric => 0,
            VindexKind::Hash
            | VindexKind::BinaryMd5
            | VindexKind::UnicodeLooseMd5
            | VindexKind::Xxhash => 1,
            VindexKind::LookupUnique => 10,
            VindexKind::Lookup => 20,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VindexKind::Hash => "hash",
            VindexKind::Binary => "binary",
            VindexKind::BinaryMd5 => "binary_md5",
            VindexKind::Numeric => "numeric",
            VindexKind::UnicodeLooseMd5 => "unicode_loose_md5",
            VindexKind::Xxhash => "xxhash",
            VindexKind::LookupUnique => "lookup_unique",
            VindexKind::Lookup => "lookup",
        }
    }
}

/// A named vindex instance. Instances are shared through `Arc` and compared
/// by identity: two columns co-locate only if they use the same instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vindex {
    pub name: String,
    pub kind: VindexKind,
    pub params: BTreeMap<String, String>,
}

impl Vindex {
    pub fn new(name: impl Into<String>, kind: VindexKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn is_unique(&self) -> bool {
        self.kind.is_unique()
    }

    pub fn cost(&self) -> usize {
        self.kind.cost()
    }
}

/// Identity comparison of two vindex instances.
pub fn same_vindex(a: &Arc<Vindex>, b: &Arc<Vindex>) -> bool {
    Arc::ptr_eq(a, b)
}

/// A vindex bound to one or more columns of a table
#[derive(Debug, Clone)]
pub struct ColumnVindex {
    pub columns: Vec<String>,
    pub vindex: Arc<Vindex>,
}

impl ColumnVindex {
    pub fn new(column: impl Into<String>, vindex: Arc<Vindex>) -> Self {
        Self {
            columns: vec![column.into()],
            vindex,
        }
    }

    pub fn name(&self) -> &str {
        &self.vindex.name
    }

    /// The column of a single-column vindex.
    pub fn single_column(&self) -> Option<&str> {
        match self.columns.as_slice() {
            [column] => Some(column.as_str()),
            _ => None,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.vindex.is_unique()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vindex_identity() {
        let a = Arc::new(Vindex::new("hash", VindexKind::Hash));
        let b = Arc::new(Vindex::new("hash", VindexKind::Hash));
        assert!(same_vindex(&a, &a.clone()));
        assert!(!same_vindex(&a, &b));
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_vindex_kind_serde_aliases() {
        let kind: VindexKind = serde_json::from_str("\"lookup_hash_unique\"").unwrap();
        assert_eq!(kind, VindexKind::LookupUnique);
        assert!(kind.is_unique());
        let kind: VindexKind = serde_json::from_str("\"consistent_lookup\"").unwrap();
        assert!(!kind.is_unique());
        assert!(VindexKind::Hash.cost() < VindexKind::LookupUnique.cost());
    }
}
