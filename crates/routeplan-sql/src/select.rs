//! SELECT statement AST

use crate::expr::{and_exprs, split_and, Expr, TableName};
use crate::table_set::TableSet;

/// A single SELECT. Subqueries and derived tables nest further `Select`s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Select {
    pub distinct: bool,
    pub select_exprs: Vec<SelectExpr>,
    pub from: Vec<TableExpr>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Limit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectExpr {
    /// `*` or `t.*`
    Star(Option<TableName>),
    Aliased(AliasedExpr),
}

impl SelectExpr {
    pub fn expr(expr: Expr) -> Self {
        SelectExpr::Aliased(AliasedExpr { expr, alias: None })
    }

    pub fn aliased(expr: Expr, alias: &str) -> Self {
        SelectExpr::Aliased(AliasedExpr {
            expr,
            alias: Some(alias.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl AliasedExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// Name of the result column: the alias, the bare column name, or the
    /// rendered expression.
    pub fn column_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            Expr::Column(col) => col.name.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limit {
    pub offset: Option<Expr>,
    pub rowcount: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableExpr {
    Aliased(AliasedTableExpr),
    Join(Box<JoinTableExpr>),
    /// Parenthesized table list
    Paren(Vec<TableExpr>),
}

impl TableExpr {
    pub fn table(name: TableName, alias: Option<&str>) -> Self {
        TableExpr::Aliased(AliasedTableExpr {
            expr: SimpleTableExpr::Table(name),
            alias: alias.map(str::to_string),
            id: TableSet::EMPTY,
        })
    }

    /// Aliased tables in FROM order, not entering derived tables.
    pub fn aliased_tables(&self) -> Vec<&AliasedTableExpr> {
        let mut out = Vec::new();
        self.collect_aliased(&mut out);
        out
    }

    fn collect_aliased<'a>(&'a self, out: &mut Vec<&'a AliasedTableExpr>) {
        match self {
            TableExpr::Aliased(a) => out.push(a),
            TableExpr::Join(j) => {
                j.left.collect_aliased(out);
                j.right.collect_aliased(out);
            }
            TableExpr::Paren(list) => {
                for te in list {
                    te.collect_aliased(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedTableExpr {
    pub expr: SimpleTableExpr,
    pub alias: Option<String>,
    /// Assigned by semantic analysis
    pub id: TableSet,
}

impl AliasedTableExpr {
    /// Name that columns use to qualify this table.
    pub fn effective_name(&self) -> Option<&str> {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => Some(alias),
            (None, SimpleTableExpr::Table(name)) => Some(&name.name),
            (None, SimpleTableExpr::Derived(_)) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleTableExpr {
    Table(TableName),
    Derived(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableExpr {
    pub left: TableExpr,
    pub right: TableExpr,
    pub kind: JoinKind,
    pub on: Option<Expr>,
}

impl Select {
    /// AND a predicate into the WHERE clause.
    pub fn add_where(&mut self, expr: Expr) {
        self.where_clause = match self.where_clause.take() {
            Some(existing) => Some(Expr::and(existing, expr)),
            None => Some(expr),
        };
    }

    /// AND predicates into the WHERE clause, skipping ones already present.
    pub fn add_where_all(&mut self, exprs: impl IntoIterator<Item = Expr>) {
        let mut conjuncts = self.where_clause.take().map(split_and).unwrap_or_default();
        for e in exprs {
            if !conjuncts.contains(&e) {
                conjuncts.push(e);
            }
        }
        self.where_clause = and_exprs(conjuncts);
    }

    pub fn has_star(&self) -> bool {
        self.select_exprs
            .iter()
            .any(|e| matches!(e, SelectExpr::Star(_)))
    }

    pub fn has_aggregates(&self) -> bool {
        !self.group_by.is_empty()
            || self.select_exprs.iter().any(|e| match e {
                SelectExpr::Aliased(a) => a.expr.contains_aggregate(),
                SelectExpr::Star(_) => false,
            })
    }

    /// Anything beyond the plain select list: grouping, aggregation,
    /// DISTINCT or LIMIT.
    pub fn is_complex(&self) -> bool {
        self.distinct || self.limit.is_some() || self.has_aggregates()
    }

    /// Aliased tables of this FROM clause in order.
    pub fn aliased_tables(&self) -> Vec<&AliasedTableExpr> {
        self.from.iter().flat_map(|te| te.aliased_tables()).collect()
    }

    /// Every table defined anywhere in this select: its FROM clause, its
    /// derived tables and its subqueries.
    pub fn all_table_ids(&self) -> TableSet {
        let mut ids = TableSet::EMPTY;
        for table in self.aliased_tables() {
            ids = ids.merge(table.id);
            if let SimpleTableExpr::Derived(inner) = &table.expr {
                ids = ids.merge(inner.all_table_ids());
            }
        }
        self.visit_exprs(&mut |e| match e {
            Expr::Subquery(sel) | Expr::Exists(sel) => {
                ids = ids.merge(sel.all_table_ids());
                false
            }
            Expr::Extracted(ex) => {
                ids = ids.merge(ex.subquery.all_table_ids());
                false
            }
            _ => true,
        });
        ids
    }

    /// True if this select or any select nested in it has a HAVING clause.
    pub fn contains_having(&self) -> bool {
        if self.having.is_some() {
            return true;
        }
        if self.aliased_tables().iter().any(|t| match &t.expr {
            SimpleTableExpr::Derived(inner) => inner.contains_having(),
            SimpleTableExpr::Table(_) => false,
        }) {
            return true;
        }
        let mut found = false;
        self.visit_exprs(&mut |e| {
            match e {
                Expr::Subquery(sel) | Expr::Exists(sel) if sel.contains_having() => found = true,
                Expr::Extracted(ex) if ex.subquery.contains_having() => found = true,
                _ => {}
            }
            !found
        });
        found
    }

    /// Visit every expression of this select, nested selects included.
    pub fn visit_exprs<'a>(&'a self, f: &mut dyn FnMut(&'a Expr) -> bool) {
        for se in &self.select_exprs {
            if let SelectExpr::Aliased(a) = se {
                a.expr.visit(f);
            }
        }
        for te in &self.from {
            visit_table_expr(te, f);
        }
        if let Some(w) = &self.where_clause {
            w.visit(f);
        }
        for g in &self.group_by {
            g.visit(f);
        }
        if let Some(h) = &self.having {
            h.visit(f);
        }
        for o in &self.order_by {
            o.expr.visit(f);
        }
        if let Some(limit) = &self.limit {
            if let Some(offset) = &limit.offset {
                offset.visit(f);
            }
            limit.rowcount.visit(f);
        }
    }

    pub fn visit_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr) -> bool) {
        for se in &mut self.select_exprs {
            if let SelectExpr::Aliased(a) = se {
                a.expr.visit_mut(f);
            }
        }
        for te in &mut self.from {
            visit_table_expr_mut(te, f);
        }
        if let Some(w) = &mut self.where_clause {
            w.visit_mut(f);
        }
        for g in &mut self.group_by {
            g.visit_mut(f);
        }
        if let Some(h) = &mut self.having {
            h.visit_mut(f);
        }
        for o in &mut self.order_by {
            o.expr.visit_mut(f);
        }
        if let Some(limit) = &mut self.limit {
            if let Some(offset) = &mut limit.offset {
                offset.visit_mut(f);
            }
            limit.rowcount.visit_mut(f);
        }
    }

    /// Drop keyspace qualifiers from tables and columns, as sent to a shard.
    pub fn strip_keyspace_qualifiers(&mut self) {
        for te in &mut self.from {
            strip_table_qualifiers(te);
        }
        self.visit_exprs_mut(&mut |e| {
            match e {
                Expr::Column(col) => {
                    if let Some(q) = &mut col.qualifier {
                        if !q.is_system_schema() {
                            q.qualifier = None;
                        }
                    }
                }
                Expr::Subquery(sel) | Expr::Exists(sel) => {
                    for te in &mut sel.from {
                        strip_table_qualifiers(te);
                    }
                }
                Expr::Extracted(ex) => {
                    for te in &mut ex.subquery.from {
                        strip_table_qualifiers(te);
                    }
                }
                _ => {}
            }
            true
        });
    }
}

fn strip_table_qualifiers(te: &mut TableExpr) {
    match te {
        TableExpr::Aliased(a) => match &mut a.expr {
            SimpleTableExpr::Table(name) => {
                if !name.is_system_schema() {
                    name.qualifier = None;
                }
            }
            SimpleTableExpr::Derived(inner) => {
                for te in &mut inner.from {
                    strip_table_qualifiers(te);
                }
            }
        },
        TableExpr::Join(j) => {
            strip_table_qualifiers(&mut j.left);
            strip_table_qualifiers(&mut j.right);
        }
        TableExpr::Paren(list) => {
            for te in list {
                strip_table_qualifiers(te);
            }
        }
    }
}

fn visit_table_expr<'a>(te: &'a TableExpr, f: &mut dyn FnMut(&'a Expr) -> bool) {
    match te {
        TableExpr::Aliased(a) => {
            if let SimpleTableExpr::Derived(inner) = &a.expr {
                inner.visit_exprs(f);
            }
        }
        TableExpr::Join(j) => {
            visit_table_expr(&j.left, f);
            visit_table_expr(&j.right, f);
            if let Some(on) = &j.on {
                on.visit(f);
            }
        }
        TableExpr::Paren(list) => {
            for te in list {
                visit_table_expr(te, f);
            }
        }
    }
}

fn visit_table_expr_mut(te: &mut TableExpr, f: &mut dyn FnMut(&mut Expr) -> bool) {
    match te {
        TableExpr::Aliased(a) => {
            if let SimpleTableExpr::Derived(inner) = &mut a.expr {
                inner.visit_exprs_mut(f);
            }
        }
        TableExpr::Join(j) => {
            visit_table_expr_mut(&mut j.left, f);
            visit_table_expr_mut(&mut j.right, f);
            if let Some(on) = &mut j.on {
                on.visit_mut(f);
            }
        }
        TableExpr::Paren(list) => {
            for te in list {
                visit_table_expr_mut(te, f);
            }
        }
    }
}
