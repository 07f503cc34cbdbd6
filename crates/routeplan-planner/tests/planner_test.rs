//! Test: SQL text to primitive trees against an in-memory vschema
//!
//! Keyspace `user` is sharded on a hash vindex; `main` is unsharded.
//! Execution tests drive the finished plans through a fake cursor that
//! answers each route from canned results.

use std::collections::HashMap;

use routeplan_common::{BindVariable, BindVars, PlannerVersion, QueryResult, Result, RouteplanError, Value};
use routeplan_engine::{EvalExpr, JoinOpcode, Primitive, PulloutOpcode, Route, RouteOpcode, Send, VCursor};
use routeplan_planner::{build_plan, explain, BuildOptions};
use routeplan_vschema::{InMemoryVSchema, TableDef, VindexKind};

fn vschema() -> InMemoryVSchema {
    let _ = tracing_subscriber::fmt::try_init();
    let vs = InMemoryVSchema::new();
    vs.add_keyspace("user", true).unwrap();
    vs.add_vindex("user", "hash", VindexKind::Hash).unwrap();
    vs.add_table(
        "user",
        "user",
        &TableDef::new().vindex("id", "hash").columns(&["id", "name"]),
    )
    .unwrap();
    vs.add_table("user", "user_extra", &TableDef::new().vindex("user_id", "hash"))
        .unwrap();
    vs.add_table(
        "user",
        "music",
        &TableDef::new()
            .vindex("id", "hash")
            .columns(&["id", "user_id", "title"]),
    )
    .unwrap();
    vs.add_table("user", "customer", &TableDef::new().vindex("cid", "hash"))
        .unwrap();
    vs.add_table("user", "a", &TableDef::new().vindex("id", "hash"))
        .unwrap();
    vs.add_table("user", "b", &TableDef::new().vindex("a_id", "hash"))
        .unwrap();
    vs.add_table("user", "c", &TableDef::new().vindex("id", "hash"))
        .unwrap();

    vs.add_keyspace("main", false).unwrap();
    vs.add_table("main", "unsharded_a", &TableDef::new()).unwrap();
    vs.add_table("main", "unsharded_b", &TableDef::new()).unwrap();
    vs
}

fn plan(vs: &InMemoryVSchema, sql: &str) -> Primitive {
    build_plan(sql, vs, BuildOptions::default())
        .unwrap_or_else(|e| panic!("planning '{}' failed: {}", sql, e))
        .instructions
}

fn single_route(p: &Primitive) -> &Route {
    match p {
        Primitive::Route(r) => r,
        other => panic!("expected a single route, got\n{}", other.description()),
    }
}

/// Test 1: a unique vindex equality pins one shard
#[test]
fn test_unique_vindex_equality_routes_to_one_shard() {
    let vs = vschema();
    let p = plan(&vs, "select name from customer where cid = 5");
    let route = single_route(&p);
    assert_eq!(route.opcode, RouteOpcode::EqualUnique);
    assert_eq!(route.query, "select name from customer where cid = 5");
    assert_eq!(route.vindex.as_ref().unwrap().name, "hash");
    assert_eq!(route.values, vec![EvalExpr::Literal(Value::Int(5))]);
}

/// Test 2: a join on the shared vindex stays in one route
#[test]
fn test_join_on_shared_vindex_merges() {
    let vs = vschema();
    let p = plan(&vs, "select a.x, b.y from a join b on a.id = b.a_id");
    let route = single_route(&p);
    assert_eq!(route.opcode, RouteOpcode::Scatter);
    assert_eq!(route.query, "select a.x, b.y from a, b where a.id = b.a_id");
    assert_eq!(route.table_name, "a, b");
}

/// Test 3: tables in different keyspaces become a cross join
#[test]
fn test_cross_keyspace_cartesian_product() {
    let vs = InMemoryVSchema::new();
    for (ks, table, col, other) in [("ks1", "a", "id", "x"), ("ks2", "b", "a_id", "y")] {
        vs.add_keyspace(ks, true).unwrap();
        vs.add_vindex(ks, "hash", VindexKind::Hash).unwrap();
        vs.add_table(ks, table, &TableDef::new().vindex(col, "hash").columns(&[col, other]))
            .unwrap();
    }

    let p = plan(&vs, "select * from a, b");
    let Primitive::Join(join) = &p else {
        panic!("expected a join, got\n{}", p.description());
    };
    assert_eq!(join.opcode, JoinOpcode::Normal);
    assert_eq!(join.cols, vec![-1, -2, 1, 2]);
    assert!(join.vars.is_empty());

    let left = single_route(&join.left);
    let right = single_route(&join.right);
    assert_eq!(left.keyspace.name, "ks1");
    assert_eq!(left.query, "select a.id, a.x from a");
    assert_eq!(right.keyspace.name, "ks2");
    assert_eq!(right.query, "select b.a_id, b.y from b");
}

/// Test 4: columns the right side needs travel as bind variables, and the
/// cheaper order puts the unique vindex lookup on the right
#[test]
fn test_join_binds_left_columns() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select u.name, m.title from user as u join music as m on u.id = m.user_id",
    );
    let Primitive::Join(join) = &p else {
        panic!("expected a join, got\n{}", p.description());
    };
    assert_eq!(join.vars.get("m_user_id"), Some(&0));
    assert_eq!(join.cols, vec![1, -2]);

    let left = single_route(&join.left);
    assert_eq!(left.opcode, RouteOpcode::Scatter);
    assert_eq!(left.query, "select m.user_id, m.title from music as m");

    let right = single_route(&join.right);
    assert_eq!(right.opcode, RouteOpcode::EqualUnique);
    assert_eq!(right.query, "select u.name from user as u where u.id = :m_user_id");
    assert_eq!(right.values, vec![EvalExpr::BindVar("m_user_id".to_string())]);
}

/// Test 5: left-to-right keeps the FROM order even when it costs more
#[test]
fn test_left_to_right_keeps_from_order() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select /*vt+ PLANNER=left2right */ u.name, m.title from user as u join music as m on u.id = m.user_id",
    );
    let Primitive::Join(join) = &p else {
        panic!("expected a join, got\n{}", p.description());
    };
    assert_eq!(join.vars.get("u_id"), Some(&0));
    assert_eq!(single_route(&join.left).query, "select u.id, u.name from user as u");
    assert_eq!(
        single_route(&join.right).query,
        "select m.title from music as m where :u_id = m.user_id"
    );
}

/// Test 6: connected pairs are joined before any cross join
#[test]
fn test_greedy_joins_connected_pair_first() {
    let vs = vschema();
    let p = plan(&vs, "select a.id from a, b, c where a.x = b.x");
    let Primitive::Join(top) = &p else {
        panic!("expected a join, got\n{}", p.description());
    };
    assert!(top.vars.is_empty());
    assert_eq!(single_route(&top.left).table_name, "c");
    assert_eq!(single_route(&top.left).query, "select 1 from c");

    let Primitive::Join(inner) = top.right.as_ref() else {
        panic!("expected the connected pair under the cross join");
    };
    assert_eq!(single_route(&inner.left).table_name, "a");
    assert_eq!(single_route(&inner.right).table_name, "b");
    assert_eq!(inner.vars.get("a_x"), Some(&0));
}

/// Test 7: the same unsharded keyspace always merges
#[test]
fn test_unsharded_tables_always_merge() {
    let vs = vschema();
    for sql in [
        "select 1 from unsharded_a, unsharded_b",
        "select unsharded_a.id from unsharded_a join unsharded_b on unsharded_a.id < unsharded_b.id",
        "select unsharded_a.id from unsharded_a left join unsharded_b on unsharded_a.id = unsharded_b.id",
    ] {
        let p = plan(&vs, sql);
        assert_eq!(single_route(&p).opcode, RouteOpcode::Unsharded, "{}", sql);
    }
    let p = plan(&vs, "select 1 from unsharded_a, unsharded_b");
    assert_eq!(single_route(&p).query, "select 1 from unsharded_a, unsharded_b");
}

/// Test 8: merging on the shared vindex keeps a bound value
#[test]
fn test_merge_upgrades_to_equal_unique() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select a.x, b.y from a join b on a.id = b.a_id where b.a_id = 5",
    );
    let route = single_route(&p);
    assert_eq!(route.opcode, RouteOpcode::EqualUnique);
    assert_eq!(route.values, vec![EvalExpr::Literal(Value::Int(5))]);
    assert!(route.query.starts_with("select a.x, b.y from a, b where "));
}

/// Test 9: HAVING produces no plan
#[test]
fn test_having_is_rejected() {
    let vs = vschema();
    let err = build_plan(
        "select name, count(*) from user group by name having count(*) > 1",
        &vs,
        BuildOptions::default(),
    )
    .unwrap_err();
    assert!(err.is_unsupported());
    assert!(err.to_string().contains("HAVING"));
}

/// Test 10: a subquery correlated across keyspaces has no safe plan
#[test]
fn test_cross_keyspace_correlated_subquery_is_rejected() {
    let vs = vschema();
    let err = build_plan(
        "select id from user where exists (select 1 from unsharded_a where unsharded_a.id = user.id)",
        &vs,
        BuildOptions::default(),
    )
    .unwrap_err();
    assert!(err.is_unsupported());
    assert!(err.to_string().contains("correlated"));
}

/// Test 11: a correlated subquery on the shared vindex stays inline
#[test]
fn test_correlated_subquery_on_vindex_is_absorbed() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select id from user where id in (select user_id from user_extra where user_extra.user_id = user.id)",
    );
    let route = single_route(&p);
    assert_eq!(route.opcode, RouteOpcode::Scatter);
    assert_eq!(
        route.query,
        "select id from user where id in (select user_id from user_extra where user_extra.user_id = user.id)"
    );
}

/// Test 12: an uncorrelated subquery in another keyspace runs first
#[test]
fn test_subquery_pullout() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select id from user where id in (select id from unsharded_a)",
    );
    let Primitive::PulloutSubquery(pullout) = &p else {
        panic!("expected a pullout, got\n{}", p.description());
    };
    assert_eq!(pullout.opcode, PulloutOpcode::In);
    assert_eq!(pullout.sq_name, "__sq1");
    assert_eq!(pullout.has_values, "__sq_has_values1");

    let inner = single_route(&pullout.subquery);
    assert_eq!(inner.opcode, RouteOpcode::Unsharded);
    assert_eq!(inner.query, "select id from unsharded_a");

    let outer = single_route(&pullout.underlying);
    assert_eq!(outer.opcode, RouteOpcode::Scatter);
    assert_eq!(
        outer.query,
        "select id from user where :__sq_has_values1 = 1 and id in ::__sq1"
    );
}

/// Test 13: planning is a pure function of statement and schema
#[test]
fn test_planning_is_deterministic() {
    let vs = vschema();
    for sql in [
        "select u.name, m.title from user as u join music as m on u.id = m.user_id order by u.name",
        "select a.id from a, b, c where a.x = b.x",
        "select name, count(*) from user group by name",
        "select id from user where id in (select id from unsharded_a) limit 10",
    ] {
        let first = build_plan(sql, &vs, BuildOptions::default()).unwrap();
        let second = build_plan(sql, &vs, BuildOptions::default()).unwrap();
        assert_eq!(
            explain(&first, routeplan_common::ExplainFormat::Json).unwrap(),
            explain(&second, routeplan_common::ExplainFormat::Json).unwrap(),
            "{}",
            sql
        );
    }
}

/// Test 14: scatter aggregation is finished by an ordered aggregate
#[test]
fn test_scatter_aggregation() {
    let vs = vschema();
    let p = plan(&vs, "select name, count(*) from user group by name");
    let Primitive::OrderedAggregate(agg) = &p else {
        panic!("expected an aggregate, got\n{}", p.description());
    };
    assert_eq!(agg.group_by_keys, vec![0]);
    assert_eq!(agg.aggregates.len(), 1);
    assert_eq!(agg.aggregates[0].col, 1);
    let route = single_route(&agg.input);
    assert_eq!(route.opcode, RouteOpcode::Scatter);
    assert!(route.query.starts_with("select name, count(*) from user group by name order by name"));

    let err = build_plan("select avg(id) from user", &vs, BuildOptions::default()).unwrap_err();
    assert!(err.is_unsupported());
}

/// Test 15: a limit over a scatter route caps every shard
#[test]
fn test_scatter_limit() {
    let vs = vschema();
    let p = plan(&vs, "select id from user limit 10");
    let Primitive::Limit(limit) = &p else {
        panic!("expected a limit, got\n{}", p.description());
    };
    assert_eq!(limit.count, EvalExpr::Literal(Value::Int(10)));
    assert_eq!(
        single_route(&limit.input).query,
        "select id from user limit :__upper_limit"
    );

    let p = plan(&vs, "select id from user where id = 1 limit 10");
    assert_eq!(
        single_route(&p).query,
        "select id from user where id = 1 limit 10"
    );
}

/// Test 16: planner versions that need the legacy planner fail without one
#[test]
fn test_legacy_versions_need_a_legacy_planner() {
    let vs = vschema().with_planner(PlannerVersion::V3);
    let err = build_plan("select id from user", &vs, BuildOptions::default()).unwrap_err();
    assert!(err.is_unsupported());

    let p = build_plan(
        "select id from user",
        &vs,
        BuildOptions {
            planner: Some(PlannerVersion::Gen4),
            legacy: None,
        },
    )
    .unwrap();
    assert!(matches!(p.instructions, Primitive::Route(_)));
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Default)]
struct FakeCursor {
    results: HashMap<String, QueryResult>,
    log: Vec<(String, BindVars)>,
}

impl FakeCursor {
    fn with(mut self, key: &str, result: QueryResult) -> Self {
        self.results.insert(key.to_string(), result);
        self
    }
}

impl VCursor for FakeCursor {
    fn execute_route(&mut self, route: &Route, bind_vars: &BindVars) -> Result<QueryResult> {
        self.log.push((route.query.clone(), bind_vars.clone()));
        let keyed = bind_vars
            .iter()
            .find(|(k, _)| route.query.contains(&format!(":{}", k)))
            .and_then(|(_, v)| match v {
                BindVariable::Value(v) => Some(format!("{}|{}", route.query, v)),
                BindVariable::Tuple(_) => None,
            });
        keyed
            .and_then(|k| self.results.get(&k).cloned())
            .or_else(|| self.results.get(&route.query).cloned())
            .ok_or_else(|| RouteplanError::Execution(format!("no canned result for {}", route.query)))
    }

    fn execute_send(&mut self, send: &Send, _bind_vars: &BindVars) -> Result<QueryResult> {
        Err(RouteplanError::Execution(format!("unexpected send: {}", send.query)))
    }
}

fn rows(names: &[&str], data: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::with_field_names(names, data)
}

/// Test 17: a helper sort column is dropped before rows reach the client
#[test]
fn test_sort_key_outside_select_list_is_truncated() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select m.title from user as u join music as m on u.id = m.user_id order by u.name",
    );
    let Primitive::MemorySort(sort) = &p else {
        panic!("expected a memory sort, got\n{}", p.description());
    };
    assert_eq!(sort.truncate_column_count, 1);

    let left = "select m.user_id, m.title from music as m";
    let right = "select u.name from user as u where u.id = :m_user_id";
    let mut vc = FakeCursor::default()
        .with(
            left,
            rows(
                &["user_id", "title"],
                vec![
                    vec![Value::Int(1), Value::from("t1")],
                    vec![Value::Int(2), Value::from("t2")],
                ],
            ),
        )
        .with(
            &format!("{}|1", right),
            rows(&["name"], vec![vec![Value::from("b")]]),
        )
        .with(
            &format!("{}|2", right),
            rows(&["name"], vec![vec![Value::from("a")]]),
        );

    let result = p.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.fields.len(), 1);
    assert_eq!(result.fields[0].name, "title");
    assert_eq!(
        result.rows,
        vec![vec![Value::from("t2")], vec![Value::from("t1")]]
    );
}

/// Test 18: shard results are merged in order and trimmed to the select list
#[test]
fn test_route_sort_column_is_truncated() {
    let vs = vschema();
    let p = plan(&vs, "select id from user order by name");
    let route = single_route(&p);
    assert_eq!(route.truncate_column_count, 1);

    let mut vc = FakeCursor::default().with(
        &route.query,
        rows(
            &["id", "name"],
            vec![
                vec![Value::Int(2), Value::from("b")],
                vec![Value::Int(1), Value::from("a")],
            ],
        ),
    );
    let result = p.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
}

/// Test 19: the pullout binds the subquery result before the outer route runs
#[test]
fn test_pullout_binds_subquery_values() {
    let vs = vschema();
    let p = plan(
        &vs,
        "select id from user where id in (select id from unsharded_a)",
    );
    let mut vc = FakeCursor::default()
        .with(
            "select id from unsharded_a",
            rows(&["id"], vec![vec![Value::Int(3)], vec![Value::Int(4)]]),
        )
        .with(
            "select id from user where :__sq_has_values1 = 1 and id in ::__sq1",
            rows(&["id"], vec![vec![Value::Int(3)]]),
        );
    let result = p.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.rows, vec![vec![Value::Int(3)]]);

    let (_, vars) = &vc.log[1];
    assert_eq!(vars.get("__sq_has_values1"), Some(&BindVariable::Value(Value::Int(1))));
    assert_eq!(
        vars.get("__sq1"),
        Some(&BindVariable::Tuple(vec![Value::Int(3), Value::Int(4)]))
    );
}

/// Test 20: greedy ordering does not depend on how the FROM clause is written
#[test]
fn test_join_order_independent_of_from_order() {
    let vs = vschema();
    let forward = plan(
        &vs,
        "select u.name, m.title from user as u join music as m on u.id = m.user_id",
    );
    let reversed = plan(
        &vs,
        "select u.name, m.title from music as m join user as u on u.id = m.user_id",
    );
    assert_eq!(
        forward.description().to_string(),
        reversed.description().to_string()
    );

    // the scatter side drives the join; the unique lookup runs per row
    let Primitive::Join(join) = &reversed else {
        panic!("expected a join, got\n{}", reversed.description());
    };
    assert_eq!(single_route(&join.left).opcode, RouteOpcode::Scatter);
    assert_eq!(
        single_route(&join.left).query,
        "select m.user_id, m.title from music as m"
    );
    assert_eq!(single_route(&join.right).opcode, RouteOpcode::EqualUnique);
    assert_eq!(join.vars.get("m_user_id"), Some(&0));
}

/// Test 21: equal-cost orders keep the first table of the FROM clause outside
#[test]
fn test_equal_cost_join_keeps_from_order() {
    let vs = vschema();
    for (sql, outer, var) in [
        ("select a.id from a join b on a.x = b.x", "a", "a_x"),
        ("select a.id from b join a on a.x = b.x", "b", "b_x"),
    ] {
        let p = plan(&vs, sql);
        let Primitive::Join(join) = &p else {
            panic!("expected a join for '{}', got\n{}", sql, p.description());
        };
        assert_eq!(single_route(&join.left).table_name, outer, "{}", sql);
        assert_eq!(single_route(&join.left).opcode, RouteOpcode::Scatter);
        assert_eq!(single_route(&join.right).opcode, RouteOpcode::Scatter);
        assert_eq!(join.vars.get(var), Some(&0), "{}", sql);
    }
}

/// Test 22: a subquery on a sharded keyspace under an unsharded query
#[test]
fn test_subquery_in_other_keyspace() {
    let vs = vschema();
    let err = build_plan(
        "select id from unsharded_a where exists (select 1 from user where user.id = unsharded_a.id)",
        &vs,
        BuildOptions::default(),
    )
    .unwrap_err();
    assert!(err.is_unsupported());
    assert!(err.to_string().contains("correlated"));

    let p = plan(&vs, "select id from unsharded_a where id in (select id from user)");
    let Primitive::PulloutSubquery(pullout) = &p else {
        panic!("expected a pullout, got\n{}", p.description());
    };
    let inner = single_route(&pullout.subquery);
    assert_eq!(inner.keyspace.name, "user");
    assert_eq!(inner.opcode, RouteOpcode::Scatter);
    let outer = single_route(&pullout.underlying);
    assert_eq!(outer.keyspace.name, "main");
    assert_eq!(outer.opcode, RouteOpcode::Unsharded);
    assert_eq!(
        outer.query,
        "select id from unsharded_a where :__sq_has_values1 = 1 and id in ::__sq1"
    );
}

/// Test 23: reference tables of an unsharded keyspace stay in its one route
#[test]
fn test_unsharded_reference_table_merges() {
    let vs = vschema();
    vs.add_table("main", "unsharded_ref", &TableDef::new().reference())
        .unwrap();

    let p = plan(&vs, "select 1 from unsharded_ref, unsharded_a");
    assert_eq!(single_route(&p).opcode, RouteOpcode::Unsharded);

    let p = plan(
        &vs,
        "select id from unsharded_ref where id in (select id from unsharded_a)",
    );
    let route = single_route(&p);
    assert_eq!(route.opcode, RouteOpcode::Unsharded);
    assert_eq!(
        route.query,
        "select id from unsharded_ref where id in (select id from unsharded_a)"
    );
}
