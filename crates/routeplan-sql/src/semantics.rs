//! Semantic analysis: table ids, column binding and dependency queries

use std::sync::Arc;

use routeplan_common::{Result, RouteplanError};
use routeplan_vschema::{SchemaProvider, Table};
use tracing::debug;

use crate::expr::{ColName, Expr, TableName};
use crate::select::{AliasedExpr, AliasedTableExpr, Select, SelectExpr, SimpleTableExpr, TableExpr};
use crate::table_set::TableSet;

/// What a table id stands for
#[derive(Debug, Clone)]
pub enum TableKind {
    Real {
        name: TableName,
        table: Option<Arc<Table>>,
        is_infoschema: bool,
    },
    Derived {
        /// Output column name and its defining expression
        columns: Vec<(String, Expr)>,
        /// False when the derived select contains a star
        authoritative: bool,
        /// Tables defined inside the derived select
        inner: TableSet,
    },
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub id: TableSet,
    /// Name columns use to qualify this table
    pub alias: String,
    pub kind: TableKind,
}

impl TableInfo {
    pub fn is_infoschema(&self) -> bool {
        matches!(
            self.kind,
            TableKind::Real {
                is_infoschema: true,
                ..
            }
        )
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, TableKind::Derived { .. })
    }

    /// Columns when the full list is known.
    pub fn authoritative_columns(&self) -> Option<Vec<String>> {
        match &self.kind {
            TableKind::Real { table, .. } => table
                .as_ref()
                .and_then(|t| t.authoritative_columns())
                .map(|cols| cols.to_vec()),
            TableKind::Derived {
                columns,
                authoritative: true,
                ..
            } => Some(columns.iter().map(|(name, _)| name.clone()).collect()),
            TableKind::Derived { .. } => None,
        }
    }

    fn matches_qualifier(&self, qualifier: &TableName) -> bool {
        if !self.alias.eq_ignore_ascii_case(&qualifier.name) {
            return false;
        }
        match (&qualifier.qualifier, &self.kind) {
            (None, _) => true,
            (Some(ks), TableKind::Real { name, table, .. }) => {
                name.qualifier.as_deref().map(|q| q.eq_ignore_ascii_case(ks)).unwrap_or(false)
                    || table
                        .as_ref()
                        .map(|t| t.keyspace.name.eq_ignore_ascii_case(ks))
                        .unwrap_or(false)
            }
            (Some(_), TableKind::Derived { .. }) => false,
        }
    }
}

/// Result of semantic analysis for one statement.
#[derive(Debug, Clone, Default)]
pub struct SemTable {
    pub tables: Vec<TableInfo>,
}

impl SemTable {
    pub fn table_info_for(&self, id: TableSet) -> Result<&TableInfo> {
        if id.num_tables() != 1 {
            return Err(RouteplanError::internal(format!(
                "table info requested for {} tables",
                id.num_tables()
            )));
        }
        id.first()
            .and_then(|idx| self.tables.get(idx))
            .ok_or_else(|| RouteplanError::internal(format!("unknown table id {}", id)))
    }

    pub fn table_set_for(&self, table: &AliasedTableExpr) -> TableSet {
        table.id
    }

    /// Tables an expression reads directly; derived tables count as
    /// themselves.
    pub fn direct_deps(&self, expr: &Expr) -> TableSet {
        self.deps(expr, false)
    }

    /// Tables an expression reads, looking through derived tables to the
    /// tables they are built from.
    pub fn recursive_deps(&self, expr: &Expr) -> TableSet {
        self.deps(expr, true)
    }

    fn deps(&self, expr: &Expr, recursive: bool) -> TableSet {
        let mut deps = TableSet::EMPTY;
        expr.visit(&mut |e| match e {
            Expr::Column(col) => {
                deps = deps.merge(self.column_deps(col, recursive));
                false
            }
            Expr::Subquery(sel) | Expr::Exists(sel) => {
                deps = deps.merge(self.outer_deps(sel, recursive));
                false
            }
            Expr::Extracted(ex) => {
                if let Some(other) = &ex.other_side {
                    deps = deps.merge(self.deps(other, recursive));
                }
                deps = deps.merge(self.outer_deps(&ex.subquery, recursive));
                false
            }
            _ => true,
        });
        deps
    }

    /// Tables outside `sel` that it references.
    pub fn outer_deps(&self, sel: &Select, recursive: bool) -> TableSet {
        let local = sel.all_table_ids();
        let mut deps = TableSet::EMPTY;
        sel.visit_exprs(&mut |e| {
            if let Expr::Column(col) = e {
                if !col.deps.is_solved_by(local) {
                    deps = deps.merge(self.column_deps(col, recursive));
                }
                return false;
            }
            true
        });
        deps.difference(local)
    }

    fn column_deps(&self, col: &ColName, recursive: bool) -> TableSet {
        if !recursive {
            return col.deps;
        }
        let Ok(info) = self.table_info_for(col.deps) else {
            return col.deps;
        };
        match &info.kind {
            TableKind::Derived { columns, inner, .. } => {
                match columns.iter().find(|(name, _)| name.eq_ignore_ascii_case(&col.name)) {
                    Some((_, e)) => {
                        let d = self.recursive_deps(e);
                        if d.is_empty() {
                            *inner
                        } else {
                            d
                        }
                    }
                    None => *inner,
                }
            }
            TableKind::Real { .. } => col.deps,
        }
    }

    /// Inner expression that defines a derived table's column.
    pub fn resolve_derived_column(&self, col: &ColName) -> Option<&Expr> {
        let info = self.table_info_for(col.deps).ok()?;
        match &info.kind {
            TableKind::Derived { columns, .. } => columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&col.name))
                .map(|(_, e)| e),
            TableKind::Real { .. } => None,
        }
    }

    /// Expand `*` / `t.*` over the FROM clause from authoritative column
    /// lists. None when some table's columns are unknown.
    pub fn expand_star(&self, sel: &Select) -> Option<Vec<AliasedExpr>> {
        let mut out = Vec::new();
        for se in &sel.select_exprs {
            match se {
                SelectExpr::Aliased(a) => out.push(a.clone()),
                SelectExpr::Star(qualifier) => {
                    for table in sel.aliased_tables() {
                        let info = self.table_info_for(table.id).ok()?;
                        if let Some(q) = qualifier {
                            if !info.matches_qualifier(q) {
                                continue;
                            }
                        }
                        for name in info.authoritative_columns()? {
                            let mut col = ColName::qualified(&info.alias, &name);
                            col.deps = info.id;
                            out.push(AliasedExpr::new(Expr::Column(col)));
                        }
                    }
                }
            }
        }
        Some(out)
    }
}

/// Assign table ids and bind every column of `select` to its table.
pub fn analyze(select: &mut Select, vschema: &dyn SchemaProvider) -> Result<SemTable> {
    let mut analyzer = Analyzer {
        vschema,
        tables: Vec::new(),
        scopes: Vec::new(),
    };
    analyzer.analyze_select(select)?;
    debug!(tables = analyzer.tables.len(), "semantic analysis done");
    Ok(SemTable {
        tables: analyzer.tables,
    })
}

struct Analyzer<'a> {
    vschema: &'a dyn SchemaProvider,
    tables: Vec<TableInfo>,
    /// Innermost scope last; each holds indexes into `tables`
    scopes: Vec<Vec<usize>>,
}

impl Analyzer<'_> {
    fn analyze_select(&mut self, sel: &mut Select) -> Result<()> {
        self.scopes.push(Vec::new());
        let result = self.analyze_scope(sel);
        self.scopes.pop();
        result
    }

    fn analyze_scope(&mut self, sel: &mut Select) -> Result<()> {
        for te in sel.from.iter_mut() {
            self.bind_table_expr(te)?;
        }
        for se in sel.select_exprs.iter_mut() {
            if let SelectExpr::Aliased(a) = se {
                self.resolve_expr(&mut a.expr)?;
            }
        }
        if let Some(w) = &mut sel.where_clause {
            self.resolve_expr(w)?;
        }

        // GROUP BY, HAVING and ORDER BY may name select-list aliases
        let aliases: Vec<(String, TableSet)> = sel
            .select_exprs
            .iter()
            .filter_map(|se| match se {
                SelectExpr::Aliased(AliasedExpr {
                    expr,
                    alias: Some(alias),
                }) => Some((alias.clone(), column_deps(expr))),
                _ => None,
            })
            .collect();
        let mut post: Vec<&mut Expr> = sel.group_by.iter_mut().collect();
        post.extend(sel.having.iter_mut());
        post.extend(sel.order_by.iter_mut().map(|o| &mut o.expr));
        for e in post {
            if let Expr::Column(col) = e {
                if col.qualifier.is_none() {
                    if let Some((_, deps)) =
                        aliases.iter().find(|(a, _)| a.eq_ignore_ascii_case(&col.name))
                    {
                        if self.resolve_column(col).is_err() {
                            col.deps = *deps;
                            continue;
                        }
                    }
                }
            }
            self.resolve_expr(e)?;
        }

        if let Some(limit) = &mut sel.limit {
            if let Some(offset) = &mut limit.offset {
                self.resolve_expr(offset)?;
            }
            self.resolve_expr(&mut limit.rowcount)?;
        }
        Ok(())
    }

    fn bind_table_expr(&mut self, te: &mut TableExpr) -> Result<()> {
        match te {
            TableExpr::Aliased(a) => self.bind_aliased(a),
            TableExpr::Join(j) => {
                self.bind_table_expr(&mut j.left)?;
                self.bind_table_expr(&mut j.right)?;
                if let Some(on) = &mut j.on {
                    self.resolve_expr(on)?;
                }
                Ok(())
            }
            TableExpr::Paren(list) => {
                for te in list.iter_mut() {
                    self.bind_table_expr(te)?;
                }
                Ok(())
            }
        }
    }

    fn bind_aliased(&mut self, a: &mut AliasedTableExpr) -> Result<()> {
        let (alias, kind) = match &mut a.expr {
            SimpleTableExpr::Table(name) => {
                let is_infoschema = name.is_system_schema();
                let table = if is_infoschema {
                    None
                } else {
                    self.vschema
                        .find_table(name.qualifier.as_deref(), &name.name)
                        .ok()
                };
                let alias = a.alias.clone().unwrap_or_else(|| name.name.clone());
                let kind = TableKind::Real {
                    name: name.clone(),
                    table,
                    is_infoschema,
                };
                (alias, kind)
            }
            SimpleTableExpr::Derived(inner) => {
                // derived tables do not see the enclosing scopes
                let saved = std::mem::take(&mut self.scopes);
                let result = self.analyze_select(inner);
                self.scopes = saved;
                result?;
                let alias = a.alias.clone().ok_or_else(|| {
                    RouteplanError::SqlParse(
                        "every derived table must have its own alias".to_string(),
                    )
                })?;
                let columns = inner
                    .select_exprs
                    .iter()
                    .filter_map(|se| match se {
                        SelectExpr::Aliased(ae) => Some((ae.column_name(), ae.expr.clone())),
                        SelectExpr::Star(_) => None,
                    })
                    .collect();
                let kind = TableKind::Derived {
                    columns,
                    authoritative: !inner.has_star(),
                    inner: inner.all_table_ids(),
                };
                (alias, kind)
            }
        };

        let scope = self.scopes.last().map(Vec::as_slice).unwrap_or(&[]);
        if scope
            .iter()
            .any(|&idx| self.tables[idx].alias.eq_ignore_ascii_case(&alias))
        {
            return Err(RouteplanError::Ambiguous(format!(
                "Not unique table/alias: '{}'",
                alias
            )));
        }

        let index = self.tables.len();
        let id = TableSet::single(index)?;
        a.id = id;
        self.tables.push(TableInfo { id, alias, kind });
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(index);
        }
        Ok(())
    }

    fn resolve_expr(&mut self, e: &mut Expr) -> Result<()> {
        match e {
            Expr::Column(col) => {
                col.deps = self.resolve_column(col)?;
                Ok(())
            }
            Expr::Subquery(sel) | Expr::Exists(sel) => self.analyze_select(sel),
            Expr::Extracted(_) => Err(RouteplanError::internal(
                "extracted subquery found during semantic analysis",
            )),
            other => {
                for child in other.children_mut() {
                    self.resolve_expr(child)?;
                }
                Ok(())
            }
        }
    }

    /// Innermost scope first, so correlated references bind outward.
    fn resolve_column(&self, col: &ColName) -> Result<TableSet> {
        for scope in self.scopes.iter().rev() {
            if let Some(id) = self.resolve_in_scope(scope, col)? {
                return Ok(id);
            }
        }
        Err(RouteplanError::NotFound(format!("column '{}'", col)))
    }

    fn resolve_in_scope(&self, scope: &[usize], col: &ColName) -> Result<Option<TableSet>> {
        if let Some(q) = &col.qualifier {
            let mut found = scope
                .iter()
                .map(|&idx| &self.tables[idx])
                .filter(|info| info.matches_qualifier(q));
            return match (found.next(), found.next()) {
                (None, _) => Ok(None),
                (Some(info), None) => Ok(Some(info.id)),
                (Some(_), Some(_)) => Err(RouteplanError::Ambiguous(format!(
                    "table '{}' is ambiguous",
                    q
                ))),
            };
        }

        if let [idx] = scope {
            let info = &self.tables[*idx];
            return Ok(match info.authoritative_columns() {
                Some(cols) if !cols.iter().any(|c| col.name_matches(c)) => None,
                _ => Some(info.id),
            });
        }

        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for &idx in scope {
            let info = &self.tables[idx];
            match info.authoritative_columns() {
                Some(cols) if cols.iter().any(|c| col.name_matches(c)) => known.push(info.id),
                Some(_) => {}
                None => unknown.push(info.id),
            }
        }
        match (known.as_slice(), unknown.as_slice()) {
            ([id], _) => Ok(Some(*id)),
            ([], []) => Ok(None),
            ([], [id]) => Ok(Some(*id)),
            _ => Err(RouteplanError::Ambiguous(format!(
                "Column '{}' in field list is ambiguous",
                col.name
            ))),
        }
    }
}

/// Union of the column dependencies of an already resolved expression.
fn column_deps(expr: &Expr) -> TableSet {
    expr.columns()
        .into_iter()
        .fold(TableSet::EMPTY, |acc, c| acc.merge(c.deps))
}
