//! Per-statement planning state

use std::collections::HashSet;

use routeplan_common::PlannerVersion;
use routeplan_sql::{ColName, Expr, Select, SemTable, TableSet};
use routeplan_vschema::SchemaProvider;

/// State shared by every phase of planning one statement.
pub struct PlanningContext<'a> {
    pub semtable: &'a SemTable,
    pub vschema: &'a dyn SchemaProvider,
    pub planner: PlannerVersion,
    reserved_vars: HashSet<String>,
    /// Bind variable handed out for each column crossing a join
    column_vars: Vec<((TableSet, String), String)>,
}

impl<'a> PlanningContext<'a> {
    pub fn new(
        semtable: &'a SemTable,
        vschema: &'a dyn SchemaProvider,
        planner: PlannerVersion,
        reserved_vars: HashSet<String>,
    ) -> Self {
        Self {
            semtable,
            vschema,
            planner,
            reserved_vars,
            column_vars: Vec::new(),
        }
    }

    /// Reserve a bind variable name derived from `base`, adding a numeric
    /// suffix when the name is taken.
    pub fn reserve_var(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut n = 1;
        while self.reserved_vars.contains(&name) {
            name = format!("{}{}", base, n);
            n += 1;
        }
        self.reserved_vars.insert(name.clone());
        name
    }

    /// Bind variable carrying `col` from the left side of a join. The same
    /// column always maps to the same name.
    pub fn var_for_column(&mut self, col: &ColName) -> String {
        let key = (col.deps, col.name.to_ascii_lowercase());
        if let Some((_, name)) = self.column_vars.iter().find(|(k, _)| *k == key) {
            return name.clone();
        }
        let name = self.reserve_var(&col.compliant_name());
        self.column_vars.push((key, name.clone()));
        name
    }
}

/// Bind variable names already used by a statement.
pub fn bind_var_names(sel: &Select) -> HashSet<String> {
    let mut names = HashSet::new();
    sel.visit_exprs(&mut |e| {
        match e {
            Expr::Argument(name) | Expr::ListArgument(name) => {
                names.insert(name.clone());
            }
            Expr::Extracted(ex) => {
                names.insert(ex.arg_name.clone());
                names.insert(ex.has_values_name.clone());
            }
            _ => {}
        }
        true
    });
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeplan_vschema::InMemoryVSchema;

    #[test]
    fn test_reserve_var_suffixes() {
        let semtable = SemTable::default();
        let vschema = InMemoryVSchema::new();
        let mut reserved = HashSet::new();
        reserved.insert("u_id".to_string());
        let mut ctx = PlanningContext::new(&semtable, &vschema, PlannerVersion::Gen4, reserved);

        assert_eq!(ctx.reserve_var("u_id"), "u_id1");
        assert_eq!(ctx.reserve_var("u_id"), "u_id2");
        assert_eq!(ctx.reserve_var("m_id"), "m_id");
    }

    #[test]
    fn test_var_for_column_is_stable() {
        let semtable = SemTable::default();
        let vschema = InMemoryVSchema::new();
        let mut ctx =
            PlanningContext::new(&semtable, &vschema, PlannerVersion::Gen4, HashSet::new());
        let mut col = ColName::qualified("u", "id");
        col.deps = TableSet::single(0).unwrap();

        let first = ctx.var_for_column(&col);
        let second = ctx.var_for_column(&col);
        assert_eq!(first, "u_id");
        assert_eq!(first, second);
    }
}
