//! Join memo
//!
//! Greedy join ordering evaluates the same pair of inputs many times. The
//! memo stores the tree built for each ordered pair so later rounds reuse
//! it. `(a, b)` and `(b, a)` are distinct entries: the left side of a
//! nested-loop join drives the right, so the two orders cost differently.

use std::collections::HashMap;

use routeplan_sql::TableSet;

use crate::query_tree::QueryTree;

/// Trees built so far, keyed by the (left, right) pair of input table sets.
/// Stored trees are never handed out by reference; callers get clones they
/// are free to modify.
#[derive(Debug, Default)]
pub struct JoinMemo {
    trees: HashMap<(TableSet, TableSet), QueryTree>,
    hits: usize,
}

impl JoinMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, lhs: TableSet, rhs: TableSet) -> Option<QueryTree> {
        let found = self.trees.get(&(lhs, rhs)).cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    pub fn insert(&mut self, lhs: TableSet, rhs: TableSet, tree: QueryTree) {
        self.trees.insert((lhs, rhs), tree);
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_tree::RouteTree;
    use routeplan_engine::RouteOpcode;
    use routeplan_vschema::Keyspace;
    use std::sync::Arc;

    #[test]
    fn test_memo_key_is_ordered() {
        let a = TableSet::single(0).unwrap();
        let b = TableSet::single(3).unwrap();
        let ks = Arc::new(Keyspace::new("main", true));
        let tree = QueryTree::Route(RouteTree::new(RouteOpcode::Scatter, ks, a.merge(b)));

        let mut memo = JoinMemo::new();
        memo.insert(a, b, tree);
        assert!(memo.get(b, a).is_none());
        assert!(memo.get(a, b).is_some());
        assert_eq!(memo.hits(), 1);
        assert_eq!(memo.len(), 1);
        assert!(memo.get(a, TableSet::single(1).unwrap()).is_none());
    }

    #[test]
    fn test_memo_returns_independent_copies() {
        let a = TableSet::single(0).unwrap();
        let b = TableSet::single(1).unwrap();
        let ks = Arc::new(Keyspace::new("main", true));
        let mut memo = JoinMemo::new();
        memo.insert(
            a,
            b,
            QueryTree::Route(RouteTree::new(RouteOpcode::Scatter, ks, a.merge(b))),
        );

        if let Some(QueryTree::Route(mut r)) = memo.get(a, b) {
            r.opcode = RouteOpcode::EqualUnique;
        }
        let again = memo.get(a, b).unwrap();
        assert_eq!(again.as_route().unwrap().opcode, RouteOpcode::Scatter);
    }
}
