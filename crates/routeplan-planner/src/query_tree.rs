//! Physical query trees produced by join planning
//!
//! A query tree is a candidate physical plan: routes that each become one
//! shard query, nested-loop joins between them, derived tables that could
//! not be pushed into a route and subqueries that run on their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use routeplan_engine::RouteOpcode;
use routeplan_sql::{AliasedExpr, Expr, ExtractedSubquery, Select, TableName, TableSet};
use routeplan_vschema::{ColumnVindex, Keyspace, Table, Vindex};

// ============================================================================
// Relations
// ============================================================================

/// Something a route reads from, rendered into its FROM clause.
#[derive(Debug, Clone)]
pub enum Relation {
    Table {
        id: TableSet,
        name: TableName,
        alias: Option<String>,
        vtable: Option<Arc<Table>>,
    },
    /// Tables that must stay grouped because they carry their own left joins
    Paren {
        tables: Vec<Relation>,
        left_joins: Vec<OuterTable>,
    },
    /// An inner join of two groups with its ON condition
    Join {
        lhs: Box<Relation>,
        rhs: Box<Relation>,
        predicate: Expr,
    },
    Derived {
        id: TableSet,
        alias: String,
        select: Select,
    },
}

/// Right side of a left join folded into a route.
#[derive(Debug, Clone)]
pub struct OuterTable {
    pub right: Relation,
    pub predicate: Expr,
}

// ============================================================================
// Vindex candidates
// ============================================================================

/// One way a vindex can route a table.
#[derive(Debug, Clone)]
pub struct VindexOption {
    pub opcode: RouteOpcode,
    pub values: Vec<Expr>,
    pub predicates: Vec<Expr>,
}

/// A column vindex of one table and the best predicate binding found so far.
#[derive(Debug, Clone)]
pub struct VindexPlusPredicates {
    pub table_id: TableSet,
    pub col_vindex: ColumnVindex,
    pub option: Option<VindexOption>,
}

/// The vindex a route uses to pick its shards.
#[derive(Debug, Clone)]
pub struct SelectedVindex {
    pub vindex: Arc<Vindex>,
    pub values: Vec<Expr>,
}

// ============================================================================
// Trees
// ============================================================================

/// A query that runs as one unit on one or more shards of a keyspace.
#[derive(Debug, Clone)]
pub struct RouteTree {
    pub opcode: RouteOpcode,
    pub keyspace: Arc<Keyspace>,
    pub solved: TableSet,
    pub tables: Vec<Relation>,
    pub left_joins: Vec<OuterTable>,
    pub predicates: Vec<Expr>,
    pub vindex_preds: Vec<VindexPlusPredicates>,
    pub selected: Option<SelectedVindex>,
    /// Subqueries absorbed into this route, by argument name
    pub sq_to_replace: BTreeMap<String, Select>,
    pub sys_table_schema: Vec<Expr>,
    pub sys_table_name: BTreeMap<String, Expr>,
    /// Columns requested while planning joins above this route
    pub columns: Vec<AliasedExpr>,
}

impl RouteTree {
    pub fn new(opcode: RouteOpcode, keyspace: Arc<Keyspace>, solved: TableSet) -> Self {
        Self {
            opcode,
            keyspace,
            solved,
            tables: Vec::new(),
            left_joins: Vec::new(),
            predicates: Vec::new(),
            vindex_preds: Vec::new(),
            selected: None,
            sq_to_replace: BTreeMap::new(),
            sys_table_schema: Vec::new(),
            sys_table_name: BTreeMap::new(),
            columns: Vec::new(),
        }
    }

    pub fn has_left_joins(&self) -> bool {
        !self.left_joins.is_empty()
    }

    pub fn cost(&self) -> usize {
        opcode_cost(self.opcode)
    }

    /// Every relation as a flat list of tables, for naming the route.
    pub fn table_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for rel in &self.tables {
            collect_table_names(rel, &mut names);
        }
        for lj in &self.left_joins {
            collect_table_names(&lj.right, &mut names);
        }
        names
    }
}

fn collect_table_names(rel: &Relation, out: &mut Vec<String>) {
    match rel {
        Relation::Table { name, .. } => out.push(name.name.clone()),
        Relation::Paren { tables, left_joins } => {
            for t in tables {
                collect_table_names(t, out);
            }
            for lj in left_joins {
                collect_table_names(&lj.right, out);
            }
        }
        Relation::Join { lhs, rhs, .. } => {
            collect_table_names(lhs, out);
            collect_table_names(rhs, out);
        }
        Relation::Derived { alias, .. } => out.push(alias.clone()),
    }
}

/// Relative cost of a routing opcode.
pub fn opcode_cost(opcode: RouteOpcode) -> usize {
    match opcode {
        RouteOpcode::Unsharded
        | RouteOpcode::Reference
        | RouteOpcode::DBA
        | RouteOpcode::Next => 1,
        RouteOpcode::EqualUnique => 5,
        RouteOpcode::Equal => 10,
        RouteOpcode::In => 20,
        RouteOpcode::Scatter => 100,
    }
}

/// Nested-loop join of two trees.
#[derive(Debug, Clone)]
pub struct JoinTree {
    pub lhs: Box<QueryTree>,
    pub rhs: Box<QueryTree>,
    pub outer: bool,
    /// Bind variable name to left-side column offset
    pub vars: BTreeMap<String, usize>,
    /// Output columns: negative picks from the left, positive from the right
    pub columns: Vec<i32>,
}

/// A derived table whose inner query spans more than one route.
#[derive(Debug, Clone)]
pub struct DerivedTree {
    pub query: Select,
    pub inner: Box<QueryTree>,
    pub alias: String,
    pub id: TableSet,
    /// Derived columns requested by the plan above, by name
    pub columns: Vec<String>,
}

/// A subquery executed before the query that uses its result.
#[derive(Debug, Clone)]
pub struct SubqueryTree {
    pub inner: Box<QueryTree>,
    pub outer: Box<QueryTree>,
    pub extracted: ExtractedSubquery,
}

#[derive(Debug, Clone)]
pub enum QueryTree {
    Route(RouteTree),
    Join(JoinTree),
    Derived(DerivedTree),
    Subquery(SubqueryTree),
}

impl QueryTree {
    pub fn table_id(&self) -> TableSet {
        match self {
            QueryTree::Route(r) => r.solved,
            QueryTree::Join(j) => j.lhs.table_id().merge(j.rhs.table_id()),
            QueryTree::Derived(d) => d.inner.table_id().merge(d.id),
            QueryTree::Subquery(s) => s.outer.table_id(),
        }
    }

    pub fn cost(&self) -> usize {
        match self {
            QueryTree::Route(r) => r.cost(),
            QueryTree::Join(j) => j.lhs.cost() + j.rhs.cost(),
            QueryTree::Derived(d) => d.inner.cost(),
            QueryTree::Subquery(s) => s.inner.cost() + s.outer.cost(),
        }
    }

    pub fn as_route(&self) -> Option<&RouteTree> {
        match self {
            QueryTree::Route(r) => Some(r),
            _ => None,
        }
    }

    pub fn new_join(lhs: QueryTree, rhs: QueryTree, outer: bool) -> Self {
        QueryTree::Join(JoinTree {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            outer,
            vars: BTreeMap::new(),
            columns: Vec::new(),
        })
    }
}
