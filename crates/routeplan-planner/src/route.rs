//! Route seeding and vindex selection
//!
//! Every table of a query graph starts as its own route. The route's opcode
//! comes from the table's routing metadata and is narrowed as predicates on
//! its vindex columns are added.

use std::sync::Arc;

use routeplan_common::{Result, RouteplanError};
use routeplan_engine::RouteOpcode;
use routeplan_sql::{ColName, ComparisonOp, Expr, Literal, TableName, TableSet};
use routeplan_vschema::{
    ColumnVindex, Keyspace, TableOrVindex, TableType, Vindex, VindexKind,
};
use tracing::debug;

use crate::context::PlanningContext;
use crate::operators::QueryTable;
use crate::query_tree::{
    opcode_cost, Relation, RouteTree, SelectedVindex, VindexOption, VindexPlusPredicates,
};

/// Bind variable carrying the schema names an introspection query filters on.
pub const SCHEMA_NAME_VAR: &str = "__vtschemaname";
/// Prefix of bind variables carrying introspection table names.
pub const TABLE_NAME_VAR: &str = "__vttablename";

const SCHEMA_COLUMNS: &[&str] = &[
    "table_schema",
    "schema_name",
    "constraint_schema",
    "routine_schema",
];
const TABLE_NAME_COLUMNS: &[&str] = &["table_name", "referenced_table_name"];

/// Build the route that reads one table, with the table's own predicates.
pub fn create_route(ctx: &mut PlanningContext, table: &QueryTable) -> Result<RouteTree> {
    let mut route = if table.is_infoschema {
        create_infoschema_route(ctx, table)?
    } else {
        create_table_route(ctx, table)?
    };
    for pred in &table.predicates {
        route.add_predicate(ctx, pred.clone())?;
    }
    debug!(
        table = %table.table.name,
        opcode = %route.opcode,
        keyspace = %route.keyspace.name,
        "seeded route"
    );
    Ok(route)
}

fn create_infoschema_route(ctx: &PlanningContext, table: &QueryTable) -> Result<RouteTree> {
    let keyspace = ctx.vschema.any_keyspace()?;
    let mut route = RouteTree::new(RouteOpcode::DBA, keyspace, table.id);
    route.tables.push(Relation::Table {
        id: table.id,
        name: table.table.clone(),
        alias: table.alias.clone(),
        vtable: None,
    });
    Ok(route)
}

fn create_table_route(ctx: &PlanningContext, table: &QueryTable) -> Result<RouteTree> {
    let lookup = ctx
        .vschema
        .find_table_or_vindex(table.table.qualifier.as_deref(), &table.table.name);
    let vtable = match lookup {
        Ok(TableOrVindex::Table(vtable)) => vtable,
        Ok(TableOrVindex::Vindex { vindex, .. }) => {
            return Err(RouteplanError::unsupported(format!(
                "selecting from vindex '{}'",
                vindex.name
            )))
        }
        Err(RouteplanError::NotFound(_))
            if table.table.qualifier.is_none() && table.table.name.eq_ignore_ascii_case("dual") =>
        {
            return create_dual_route(ctx, table);
        }
        Err(e) => return Err(e),
    };

    let keyspace = vtable.keyspace.clone();
    let opcode = if vtable.table_type == TableType::Sequence {
        RouteOpcode::Next
    } else if vtable.table_type == TableType::Reference {
        RouteOpcode::Reference
    } else if !keyspace.sharded {
        RouteOpcode::Unsharded
    } else if vtable.pinned.is_some() {
        RouteOpcode::EqualUnique
    } else {
        RouteOpcode::Scatter
    };

    let mut route = RouteTree::new(opcode, keyspace, table.id);

    // a routing rule swaps in the real table; the query keeps the old name
    let routed = !vtable.name.eq_ignore_ascii_case(&table.table.name);
    let alias = match (&table.alias, routed) {
        (Some(alias), _) => Some(alias.clone()),
        (None, true) => Some(table.table.name.clone()),
        (None, false) => None,
    };
    route.tables.push(Relation::Table {
        id: table.id,
        name: TableName::new(vtable.name.clone()),
        alias,
        vtable: Some(vtable.clone()),
    });

    route.vindex_preds = vtable
        .column_vindexes
        .iter()
        .map(|cv| VindexPlusPredicates {
            table_id: table.id,
            col_vindex: cv.clone(),
            option: None,
        })
        .collect();
    if let Some(keyspace_id) = &vtable.pinned {
        route.selected = Some(pinned_selection(keyspace_id));
    }
    Ok(route)
}

fn pinned_selection(keyspace_id: &str) -> SelectedVindex {
    SelectedVindex {
        vindex: Arc::new(Vindex::new("binary", VindexKind::Binary)),
        values: vec![Expr::Literal(Literal::Str(keyspace_id.to_string()))],
    }
}

/// Keyspace id of the first pinned table among `relations`.
fn pinned_keyspace_id(relations: &[Relation]) -> Option<&str> {
    relations.iter().find_map(|rel| match rel {
        Relation::Table { vtable, .. } => vtable.as_ref().and_then(|t| t.pinned.as_deref()),
        Relation::Paren { tables, .. } => pinned_keyspace_id(tables),
        Relation::Join { lhs, rhs, .. } => pinned_keyspace_id(std::slice::from_ref(lhs.as_ref()))
            .or_else(|| pinned_keyspace_id(std::slice::from_ref(rhs.as_ref()))),
        Relation::Derived { .. } => None,
    })
}

fn create_dual_route(ctx: &PlanningContext, table: &QueryTable) -> Result<RouteTree> {
    let keyspace: Arc<Keyspace> = ctx
        .vschema
        .default_keyspace()
        .or_else(|_| ctx.vschema.any_keyspace())?;
    let opcode = if keyspace.sharded {
        RouteOpcode::Reference
    } else {
        RouteOpcode::Unsharded
    };
    let mut route = RouteTree::new(opcode, keyspace, table.id);
    route.tables.push(Relation::Table {
        id: table.id,
        name: TableName::new("dual"),
        alias: table.alias.clone(),
        vtable: None,
    });
    Ok(route)
}

fn routes_by_vindex(opcode: RouteOpcode) -> bool {
    matches!(
        opcode,
        RouteOpcode::Scatter | RouteOpcode::Equal | RouteOpcode::EqualUnique | RouteOpcode::In
    )
}

impl RouteTree {
    /// Add a filter to this route, narrowing its shards when the filter
    /// binds a vindex column.
    pub fn add_predicate(&mut self, ctx: &mut PlanningContext, expr: Expr) -> Result<()> {
        let expr = if self.opcode == RouteOpcode::DBA {
            self.rewrite_sysinfo(ctx, expr)
        } else {
            expr
        };
        // a pinned table already names its shard
        let pinned = pinned_keyspace_id(&self.tables).is_some();
        if routes_by_vindex(self.opcode) && !pinned && !self.vindex_preds.is_empty() {
            if self.try_bind_vindex(ctx, &expr) {
                self.pick_best_available_vindex();
            }
        }
        if !self.predicates.contains(&expr) {
            self.predicates.push(expr);
        }
        Ok(())
    }

    /// Record a binding for a vindex column compared against a value.
    /// Returns true when some vindex improved.
    fn try_bind_vindex(&mut self, ctx: &PlanningContext, expr: &Expr) -> bool {
        let Expr::Comparison { op, left, right } = expr else {
            return false;
        };
        match op {
            ComparisonOp::Eq => {
                let (col, value) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(col), value) if is_routing_value(value) => (col, value),
                    (value, Expr::Column(col)) if is_routing_value(value) => (col, value),
                    _ => return false,
                };
                self.bind_column(ctx, col, value.clone(), expr, false)
            }
            ComparisonOp::In => {
                let Expr::Column(col) = left.as_ref() else {
                    return false;
                };
                match right.as_ref() {
                    Expr::Tuple(items) if !items.is_empty() && items.iter().all(is_routing_value) => {
                        self.bind_column(ctx, col, right.as_ref().clone(), expr, true)
                    }
                    Expr::ListArgument(_) => {
                        self.bind_column(ctx, col, right.as_ref().clone(), expr, true)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn bind_column(
        &mut self,
        ctx: &PlanningContext,
        col: &ColName,
        value: Expr,
        predicate: &Expr,
        is_list: bool,
    ) -> bool {
        let col = resolve_column(ctx, col);
        let mut improved = false;
        for vp in self.vindex_preds.iter_mut() {
            if vp.table_id != col.deps {
                continue;
            }
            let Some(column) = vp.col_vindex.single_column() else {
                continue;
            };
            if !col.name_matches(column) {
                continue;
            }
            let opcode = match (is_list, vp.col_vindex.is_unique()) {
                (true, false) => continue,
                (true, true) => RouteOpcode::In,
                (false, true) => RouteOpcode::EqualUnique,
                (false, false) => RouteOpcode::Equal,
            };
            let better = vp
                .option
                .as_ref()
                .map(|existing| opcode_cost(opcode) < opcode_cost(existing.opcode))
                .unwrap_or(true);
            if better {
                vp.option = Some(VindexOption {
                    opcode,
                    values: vec![value.clone()],
                    predicates: vec![predicate.clone()],
                });
                improved = true;
            }
        }
        improved
    }

    /// Route by the cheapest bound vindex, if any vindex is bound.
    pub fn pick_best_available_vindex(&mut self) {
        let mut best: Option<(&VindexPlusPredicates, &VindexOption)> = None;
        for vp in &self.vindex_preds {
            let Some(option) = &vp.option else {
                continue;
            };
            let cheaper = match best {
                None => true,
                Some((best_vp, best_option)) => {
                    (opcode_cost(option.opcode), vp.col_vindex.vindex.cost())
                        < (
                            opcode_cost(best_option.opcode),
                            best_vp.col_vindex.vindex.cost(),
                        )
                }
            };
            if cheaper {
                best = Some((vp, option));
            }
        }
        if let Some((vp, option)) = best {
            self.opcode = option.opcode;
            self.selected = Some(SelectedVindex {
                vindex: vp.col_vindex.vindex.clone(),
                values: option.values.clone(),
            });
        }
    }

    /// Reset routing to the table vindexes alone, then bind again.
    pub fn reset_routing(&mut self) {
        if let Some(keyspace_id) = pinned_keyspace_id(&self.tables) {
            self.opcode = RouteOpcode::EqualUnique;
            self.selected = Some(pinned_selection(keyspace_id));
            return;
        }
        self.opcode = RouteOpcode::Scatter;
        self.selected = None;
        self.pick_best_available_vindex();
    }

    /// Move schema and table name filters of introspection queries into
    /// bind variables so the executor can route them.
    fn rewrite_sysinfo(&mut self, ctx: &mut PlanningContext, expr: Expr) -> Expr {
        let Expr::Comparison {
            op: ComparisonOp::Eq,
            left,
            right,
        } = &expr
        else {
            return expr;
        };
        let (col, value) = match (left.as_ref(), right.as_ref()) {
            (Expr::Column(col), value) if is_sysinfo_value(value) => (col, value),
            (value, Expr::Column(col)) if is_sysinfo_value(value) => (col, value),
            _ => return expr,
        };
        let name = col.name.to_ascii_lowercase();
        let var = if SCHEMA_COLUMNS.contains(&name.as_str()) {
            self.sys_table_schema.push(value.clone());
            SCHEMA_NAME_VAR.to_string()
        } else if TABLE_NAME_COLUMNS.contains(&name.as_str()) {
            let var = ctx.reserve_var(TABLE_NAME_VAR);
            self.sys_table_name.insert(var.clone(), value.clone());
            var
        } else {
            return expr;
        };
        Expr::eq(Expr::Column(col.clone()), Expr::Argument(var))
    }
}

fn is_routing_value(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(lit) if *lit != Literal::Null) || matches!(expr, Expr::Argument(_))
}

fn is_sysinfo_value(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(Literal::Str(_)) | Expr::Argument(_))
}

/// Follow a derived table column to the column that defines it.
pub fn resolve_column(ctx: &PlanningContext, col: &ColName) -> ColName {
    let mut current = col.clone();
    while let Some(Expr::Column(inner)) = ctx.semtable.resolve_derived_column(&current) {
        if inner.deps == current.deps {
            break;
        }
        current = inner.clone();
    }
    current
}

/// The unique single-column vindex of a route's table that `col` is bound
/// to, looking through derived tables.
pub fn vindex_for_column(
    ctx: &PlanningContext,
    route: &RouteTree,
    col: &ColName,
) -> Option<Arc<Vindex>> {
    let col = resolve_column(ctx, col);
    if !col.deps.is_solved_by(route.solved) || col.deps == TableSet::EMPTY {
        return None;
    }
    // a pinned table lives on one shard whatever its column values are
    if pinned_keyspace_id(&route.tables).is_some() {
        return None;
    }
    route
        .vindex_preds
        .iter()
        .filter(|vp| vp.table_id == col.deps && vp.col_vindex.is_unique())
        .map(|vp| &vp.col_vindex)
        .find(|cv: &&ColumnVindex| {
            cv.single_column()
                .map(|c| col.name_matches(c))
                .unwrap_or(false)
        })
        .map(|cv| cv.vindex.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeplan_common::PlannerVersion;
    use routeplan_sql::SemTable;
    use routeplan_vschema::{InMemoryVSchema, SchemaProvider, TableDef};
    use std::collections::HashSet;

    fn vschema() -> InMemoryVSchema {
        let vs = InMemoryVSchema::new().with_default_keyspace("main");
        vs.add_keyspace("main", true).unwrap();
        vs.add_keyspace("lookup", false).unwrap();
        vs.add_vindex("main", "hash", VindexKind::Hash).unwrap();
        vs.add_vindex("main", "name_idx", VindexKind::Lookup).unwrap();
        vs.add_table(
            "main",
            "user",
            &TableDef::new().vindex("id", "hash").vindex("name", "name_idx"),
        )
        .unwrap();
        vs.add_table("main", "zip", &TableDef::new().reference()).unwrap();
        vs.add_table("main", "seq", &TableDef::new().sequence()).unwrap();
        vs.add_table("main", "pin", &TableDef::new().pinned("80")).unwrap();
        vs.add_table("lookup", "name_user", &TableDef::new()).unwrap();
        vs.add_routing_rule("routed", "main.user").unwrap();
        vs
    }

    fn table(id: usize, name: &str) -> QueryTable {
        let table = match name.split_once('.') {
            Some((keyspace, name)) => TableName::qualified(keyspace, name),
            None => TableName::new(name),
        };
        QueryTable {
            id: TableSet::single(id).unwrap(),
            alias: None,
            table,
            predicates: Vec::new(),
            is_infoschema: false,
        }
    }

    fn col(id: usize, name: &str) -> Expr {
        let mut c = ColName::qualified("user", name);
        c.deps = TableSet::single(id).unwrap();
        Expr::Column(c)
    }

    fn seed(vs: &dyn SchemaProvider, t: &QueryTable) -> RouteTree {
        let semtable = SemTable::default();
        let mut ctx = PlanningContext::new(&semtable, vs, PlannerVersion::Gen4, HashSet::new());
        create_route(&mut ctx, t).unwrap()
    }

    #[test]
    fn test_seed_opcodes_follow_table_type() {
        let vs = vschema();
        assert_eq!(seed(&vs, &table(0, "user")).opcode, RouteOpcode::Scatter);
        assert_eq!(seed(&vs, &table(0, "zip")).opcode, RouteOpcode::Reference);
        assert_eq!(seed(&vs, &table(0, "seq")).opcode, RouteOpcode::Next);
        assert_eq!(seed(&vs, &table(0, "lookup.name_user")).opcode, RouteOpcode::Unsharded);

        let pinned = seed(&vs, &table(0, "pin"));
        assert_eq!(pinned.opcode, RouteOpcode::EqualUnique);
        let selected = pinned.selected.unwrap();
        assert_eq!(selected.vindex.kind, VindexKind::Binary);
    }

    #[test]
    fn test_reference_checked_before_keyspace_sharding() {
        let vs = vschema();
        vs.add_table("lookup", "country", &TableDef::new().reference())
            .unwrap();
        let route = seed(&vs, &table(0, "lookup.country"));
        assert_eq!(route.opcode, RouteOpcode::Reference);
        assert_eq!(route.keyspace.name, "lookup");
    }

    #[test]
    fn test_pinned_table_keeps_its_shard() {
        let vs = vschema();
        vs.add_table(
            "main",
            "pin_user",
            &TableDef::new().pinned("80").vindex("id", "hash"),
        )
        .unwrap();
        let mut t = table(0, "pin_user");
        t.predicates.push(Expr::eq(col(0, "id"), Expr::int(5)));
        let mut route = seed(&vs, &t);
        assert_eq!(route.vindex_preds.len(), 1);
        assert_eq!(route.opcode, RouteOpcode::EqualUnique);
        assert_eq!(route.selected.as_ref().unwrap().vindex.kind, VindexKind::Binary);

        let semtable = SemTable::default();
        let ctx = PlanningContext::new(&semtable, &vs, PlannerVersion::Gen4, HashSet::new());
        let Expr::Column(id) = col(0, "id") else {
            unreachable!()
        };
        assert!(vindex_for_column(&ctx, &route, &id).is_none());

        route.reset_routing();
        assert_eq!(route.opcode, RouteOpcode::EqualUnique);
        let selected = route.selected.unwrap();
        assert_eq!(selected.vindex.kind, VindexKind::Binary);
        assert_eq!(selected.values, vec![Expr::Literal(Literal::Str("80".to_string()))]);
    }

    #[test]
    fn test_every_column_vindex_is_a_candidate() {
        let vs = vschema();
        let route = seed(&vs, &table(0, "user"));
        let columns: Vec<_> = route
            .vindex_preds
            .iter()
            .filter_map(|vp| vp.col_vindex.single_column())
            .collect();
        assert_eq!(columns, vec!["id", "name"]);
        assert!(route.vindex_preds.iter().all(|vp| vp.option.is_none()));
    }

    #[test]
    fn test_routing_rule_keeps_query_name_as_alias() {
        let vs = vschema();
        let route = seed(&vs, &table(0, "routed"));
        match &route.tables[0] {
            Relation::Table { name, alias, .. } => {
                assert_eq!(name.name, "user");
                assert_eq!(alias.as_deref(), Some("routed"));
            }
            other => panic!("unexpected relation {:?}", other),
        }
    }

    #[test]
    fn test_unique_vindex_beats_non_unique() {
        let vs = vschema();
        let mut t = table(0, "user");
        t.predicates.push(Expr::eq(col(0, "name"), Expr::string("bob")));
        let route = seed(&vs, &t);
        assert_eq!(route.opcode, RouteOpcode::Equal);

        t.predicates.push(Expr::eq(col(0, "id"), Expr::int(5)));
        let route = seed(&vs, &t);
        assert_eq!(route.opcode, RouteOpcode::EqualUnique);
        assert_eq!(route.selected.unwrap().vindex.name, "hash");
        assert_eq!(route.predicates.len(), 2);
    }

    #[test]
    fn test_in_list_binds_in_opcode() {
        let vs = vschema();
        let mut t = table(0, "user");
        t.predicates.push(Expr::cmp(
            ComparisonOp::In,
            col(0, "id"),
            Expr::Tuple(vec![Expr::int(1), Expr::int(2)]),
        ));
        let route = seed(&vs, &t);
        assert_eq!(route.opcode, RouteOpcode::In);
    }

    #[test]
    fn test_null_comparison_does_not_bind() {
        let vs = vschema();
        let mut t = table(0, "user");
        t.predicates
            .push(Expr::eq(col(0, "id"), Expr::Literal(Literal::Null)));
        assert_eq!(seed(&vs, &t).opcode, RouteOpcode::Scatter);
    }

    #[test]
    fn test_dual_without_vschema_entry() {
        let vs = vschema();
        let route = seed(&vs, &table(0, "dual"));
        assert_eq!(route.opcode, RouteOpcode::Reference);
        assert_eq!(route.keyspace.name, "main");
    }

    #[test]
    fn test_infoschema_filters_become_bind_vars() {
        let vs = vschema();
        let mut t = QueryTable {
            id: TableSet::single(0).unwrap(),
            alias: None,
            table: TableName::qualified("information_schema", "tables"),
            predicates: Vec::new(),
            is_infoschema: true,
        };
        t.predicates
            .push(Expr::eq(Expr::col("table_schema"), Expr::string("main")));
        t.predicates
            .push(Expr::eq(Expr::col("table_name"), Expr::string("user")));
        let route = seed(&vs, &t);

        assert_eq!(route.opcode, RouteOpcode::DBA);
        assert_eq!(route.sys_table_schema, vec![Expr::string("main")]);
        assert_eq!(
            route.sys_table_name.get(TABLE_NAME_VAR),
            Some(&Expr::string("user"))
        );
        assert_eq!(
            route.predicates[0],
            Expr::eq(
                Expr::col("table_schema"),
                Expr::Argument(SCHEMA_NAME_VAR.to_string())
            )
        );
    }
}
