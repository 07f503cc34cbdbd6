//! TableSet - bitset over the tables of one statement

use routeplan_common::{Result, RouteplanError};
use std::fmt;

/// Maximum number of tables one statement may reference
pub const MAX_TABLES: usize = 64;

/// Immutable set of table indices, one bit per aliased table expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TableSet(pub u64);

impl TableSet {
    pub const EMPTY: TableSet = TableSet(0);

    pub fn single(index: usize) -> Result<Self> {
        if index >= MAX_TABLES {
            return Err(RouteplanError::Planner(format!(
                "too many tables in statement: at most {} are supported",
                MAX_TABLES
            )));
        }
        Ok(Self(1u64 << index))
    }

    pub fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_TABLES && (self.0 & (1u64 << index)) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn num_tables(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Every table in `self` is also in `other`.
    pub fn is_solved_by(self, other: Self) -> bool {
        self.difference(other).is_empty()
    }

    pub fn is_overlapping(self, other: Self) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Index of the lowest table, or None
    pub fn first(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Iterate over table indices
    pub fn iter(self) -> TableSetIter {
        TableSetIter(self.0)
    }
}

pub struct TableSetIter(u64);

impl Iterator for TableSetIter {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            let bit = self.0.trailing_zeros() as usize;
            self.0 &= self.0 - 1;
            Some(bit)
        }
    }
}

impl FromIterator<TableSet> for TableSet {
    fn from_iter<I: IntoIterator<Item = TableSet>>(iter: I) -> Self {
        iter.into_iter().fold(TableSet::EMPTY, TableSet::merge)
    }
}

impl fmt::Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for bit in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", bit)?;
            first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_set_operations() {
        let a = TableSet::single(0).unwrap();
        let b = TableSet::single(3).unwrap();
        let ab = a.merge(b);

        assert_eq!(ab.num_tables(), 2);
        assert!(a.is_solved_by(ab));
        assert!(!ab.is_solved_by(a));
        assert!(ab.is_overlapping(b));
        assert!(!a.is_overlapping(b));
        assert_eq!(ab.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(ab.to_string(), "{0, 3}");
        assert!(TableSet::EMPTY.is_solved_by(a));
        assert_eq!([a, b].into_iter().collect::<TableSet>(), ab);
    }

    #[test]
    fn test_table_limit() {
        assert!(TableSet::single(63).is_ok());
        assert!(TableSet::single(64).is_err());
    }
}
