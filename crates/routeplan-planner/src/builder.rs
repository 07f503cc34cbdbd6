//! Plan building entry point
//!
//! `build_plan` picks the planner for a statement, runs it and returns the
//! executable plan. Query directives in `/*vt+ ... */` comments can
//! override the planner and mark scatter routes.

use std::collections::HashSet;

use routeplan_common::{PlannerVersion, Result, RouteplanError};
use routeplan_engine::{Compare, Primitive, PrimitiveDescription, RouteOpcode, Send};
use routeplan_sql::directives::{DIRECTIVE_PLANNER, DIRECTIVE_SCATTER_ERRORS_AS_WARNINGS};
use routeplan_sql::{analyze, Directives, Select, SemTable, SqlParser};
use routeplan_vschema::SchemaProvider;
use tracing::{debug, info, warn};

use crate::context::{bind_var_names, PlanningContext};
use crate::horizon::plan_horizon;
use crate::operators::create_logical_operator;
use crate::optimizer::optimize_query;
use crate::plan::LogicalPlan;
use crate::rewrite::{extract_subqueries, rewrite_common_predicates};
use crate::transform::transform_to_logical_plan;

/// The rule-based planner gen4 falls back to or is compared against.
pub trait LegacyPlanner {
    fn plan(&self, sql: &str, vschema: &dyn SchemaProvider) -> Result<Primitive>;
}

#[derive(Default, Clone, Copy)]
pub struct BuildOptions<'a> {
    /// Overrides the schema's configured planner
    pub planner: Option<PlannerVersion>,
    pub legacy: Option<&'a dyn LegacyPlanner>,
}

/// A planned statement
#[derive(Debug, Clone)]
pub struct Plan {
    pub original: String,
    pub instructions: Primitive,
    pub planner: PlannerVersion,
}

impl Plan {
    pub fn description(&self) -> PrimitiveDescription {
        self.instructions.description()
    }
}

pub fn build_plan(sql: &str, vschema: &dyn SchemaProvider, options: BuildOptions) -> Result<Plan> {
    let directives = Directives::parse(sql);
    let planner = match directives.get(DIRECTIVE_PLANNER) {
        Some(name) => name.parse::<PlannerVersion>().map_err(|_| {
            RouteplanError::Planner(format!("unknown planner directive '{}'", name))
        })?,
        None => options
            .planner
            .unwrap_or_else(|| vschema.planner_version()),
    };
    let scatter_warnings = directives.is_set(DIRECTIVE_SCATTER_ERRORS_AS_WARNINGS);

    if let Some(target) = vschema.target_destination() {
        debug!(keyspace = %target.keyspace.name, "destination override, bypassing planning");
        return Ok(Plan {
            original: sql.to_string(),
            instructions: Primitive::Send(Send {
                keyspace: target.keyspace.clone(),
                target_destination: target.destination.to_string(),
                query: sql.to_string(),
                single_shard_only: false,
            }),
            planner,
        });
    }

    info!(planner = %planner, "planning statement");
    let instructions = match planner {
        PlannerVersion::V3 => legacy_plan(sql, vschema, options.legacy)?,
        PlannerVersion::Gen4WithFallback => {
            match gen4_plan(sql, vschema, PlannerVersion::Gen4, scatter_warnings) {
                Ok(plan) => plan,
                Err(err) => match options.legacy {
                    Some(legacy) => {
                        warn!(error = %err, "gen4 planning failed, using the legacy planner");
                        legacy.plan(sql, vschema)?
                    }
                    None => return Err(err),
                },
            }
        }
        PlannerVersion::Gen4CompareV3 => {
            let gen4 = gen4_plan(sql, vschema, PlannerVersion::Gen4, scatter_warnings)?;
            let v3 = legacy_plan(sql, vschema, options.legacy)?;
            let has_order_by = SqlParser::parse_select(sql)
                .map(|sel| !sel.order_by.is_empty())
                .unwrap_or(false);
            Primitive::Compare(Compare {
                v3: Box::new(v3),
                gen4: Box::new(gen4),
                has_order_by,
            })
        }
        gen4 => gen4_plan(sql, vschema, gen4, scatter_warnings)?,
    };

    Ok(Plan {
        original: sql.to_string(),
        instructions,
        planner,
    })
}

fn legacy_plan(
    sql: &str,
    vschema: &dyn SchemaProvider,
    legacy: Option<&dyn LegacyPlanner>,
) -> Result<Primitive> {
    match legacy {
        Some(legacy) => legacy.plan(sql, vschema),
        None => Err(RouteplanError::unsupported("legacy planner is not available")),
    }
}

/// Plan a statement with the cost-based planner.
pub fn gen4_plan(
    sql: &str,
    vschema: &dyn SchemaProvider,
    planner: PlannerVersion,
    scatter_warnings: bool,
) -> Result<Primitive> {
    let mut sel = SqlParser::parse_select(sql)?;
    if sel.contains_having() {
        return Err(RouteplanError::unsupported("HAVING"));
    }
    let semtable = analyze(&mut sel, vschema)?;
    let existing = bind_var_names(&sel);
    extract_subqueries(&mut sel, &existing)?;
    let reserved = bind_var_names(&sel);

    let (mut plan, cost) = plan_select(&sel, &semtable, vschema, planner, &reserved)?;
    if needs_common_predicate_retry(&plan) {
        if let Some(rewritten) = rewrite_common_predicates(&sel) {
            match plan_select(&rewritten, &semtable, vschema, planner, &reserved) {
                Ok((retried, retried_cost)) if retried_cost < cost => {
                    debug!(cost, retried_cost, "common predicates improved routing");
                    plan = retried;
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "common predicate retry failed"),
            }
        }
    }

    if scatter_warnings {
        plan.for_each_route_mut(&mut |route| route.scatter_errors_as_warnings = true);
    }
    plan.into_primitive()
}

fn plan_select(
    sel: &Select,
    semtable: &SemTable,
    vschema: &dyn SchemaProvider,
    planner: PlannerVersion,
    reserved: &HashSet<String>,
) -> Result<(LogicalPlan, usize)> {
    let mut ctx = PlanningContext::new(semtable, vschema, planner, reserved.clone());
    let op = create_logical_operator(&ctx, sel)?;
    let tree = optimize_query(&mut ctx, &op)?;
    let cost = tree.cost();
    let plan = transform_to_logical_plan(&ctx, &tree)?;
    let plan = plan_horizon(&ctx, plan, sel)?;
    Ok((plan, cost))
}

fn needs_common_predicate_retry(plan: &LogicalPlan) -> bool {
    plan.routes()
        .iter()
        .any(|r| r.opcode == RouteOpcode::Scatter || r.is_unfiltered_dba())
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeplan_vschema::{InMemoryVSchema, TableDef};

    struct FixedLegacy;

    impl LegacyPlanner for FixedLegacy {
        fn plan(&self, sql: &str, vschema: &dyn SchemaProvider) -> Result<Primitive> {
            Ok(Primitive::Send(Send {
                keyspace: vschema.default_keyspace()?,
                target_destination: "legacy".to_string(),
                query: sql.to_string(),
                single_shard_only: false,
            }))
        }
    }

    fn vschema() -> InMemoryVSchema {
        let vs = InMemoryVSchema::new().with_default_keyspace("user");
        vs.add_keyspace("user", true).unwrap();
        vs.add_vindex("user", "hash", routeplan_vschema::VindexKind::Hash)
            .unwrap();
        vs.add_table("user", "user", &TableDef::new().vindex("id", "hash"))
            .unwrap();
        vs
    }

    #[test]
    fn test_directive_overrides_planner() {
        let vs = vschema();
        let plan = build_plan(
            "select /*vt+ PLANNER=left2right */ id from user",
            &vs,
            BuildOptions::default(),
        )
        .unwrap();
        assert_eq!(plan.planner, PlannerVersion::Gen4Left2Right);

        let err = build_plan(
            "select /*vt+ PLANNER=v7 */ id from user",
            &vs,
            BuildOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RouteplanError::Planner(_)));
    }

    #[test]
    fn test_gen4_extracts_subqueries_before_planning() {
        let vs = vschema();
        let plan = gen4_plan(
            "select id from user where id in (select id from user where id = 3)",
            &vs,
            PlannerVersion::Gen4,
            false,
        )
        .unwrap();
        let Primitive::PulloutSubquery(pullout) = &plan else {
            panic!("expected a pullout, got\n{}", plan.description());
        };
        assert_eq!(pullout.sq_name, "__sq1");
        assert_eq!(pullout.has_values, "__sq_has_values1");
        assert_eq!(
            pullout.underlying.routes()[0].query,
            "select id from user where :__sq_has_values1 = 1 and id in ::__sq1"
        );
    }

    #[test]
    fn test_fallback_uses_legacy_on_unsupported() {
        let vs = vschema();
        let options = BuildOptions {
            planner: Some(PlannerVersion::Gen4WithFallback),
            legacy: Some(&FixedLegacy),
        };
        let plan = build_plan("select id from user having id > 1", &vs, options).unwrap();
        assert!(matches!(plan.instructions, Primitive::Send(_)));

        let err = build_plan(
            "select id from user having id > 1",
            &vs,
            BuildOptions {
                planner: Some(PlannerVersion::Gen4WithFallback),
                legacy: None,
            },
        )
        .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_v3_without_legacy_is_unsupported() {
        let vs = vschema();
        let err = build_plan(
            "select id from user",
            &vs,
            BuildOptions {
                planner: Some(PlannerVersion::V3),
                legacy: None,
            },
        )
        .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_compare_wraps_both_plans() {
        let vs = vschema();
        let plan = build_plan(
            "select id from user order by id",
            &vs,
            BuildOptions {
                planner: Some(PlannerVersion::Gen4CompareV3),
                legacy: Some(&FixedLegacy),
            },
        )
        .unwrap();
        let Primitive::Compare(compare) = &plan.instructions else {
            panic!("expected a compare primitive");
        };
        assert!(compare.has_order_by);
        assert!(matches!(compare.gen4.as_ref(), Primitive::Route(_)));
    }

    #[test]
    fn test_scatter_errors_as_warnings_marks_routes() {
        let vs = vschema();
        let plan = build_plan(
            "select /*vt+ SCATTER_ERRORS_AS_WARNINGS */ id from user",
            &vs,
            BuildOptions::default(),
        )
        .unwrap();
        assert!(plan.instructions.routes()[0].scatter_errors_as_warnings);
    }

    #[test]
    fn test_common_predicate_retry_picks_cheaper_plan() {
        let vs = vschema();
        let plan = build_plan(
            "select name from user where (id = 1 and name = 'a') or (id = 1 and name = 'b')",
            &vs,
            BuildOptions::default(),
        )
        .unwrap();
        let route = plan.instructions.routes()[0];
        assert_eq!(route.opcode, RouteOpcode::EqualUnique);
        assert_eq!(
            route.query,
            "select name from user where id = 1 and (name = 'a' or name = 'b')"
        );
    }
}
