//! Test: vtgate-side execution of primitive trees against canned shard results
//!
//! The fake cursor answers each route by its query text. Join right-hand
//! sides are keyed by query text plus the bound join variable, so tests can
//! check that the right values flow from left to right.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use routeplan_common::{BindVariable, BindVars, QueryResult, Result, RouteplanError, Value};
use routeplan_engine::{
    AggregateOpcode, AggregateParams, Distinct, EvalExpr, Join, JoinOpcode, Limit, MemorySort,
    OrderByParams, OrderedAggregate, Primitive, PulloutOpcode, PulloutSubquery, Route,
    RouteOpcode, Send, VCursor, UPPER_LIMIT_VAR,
};
use routeplan_vschema::Keyspace;

#[derive(Default)]
struct FakeCursor {
    results: HashMap<String, QueryResult>,
    /// Bind variables seen per executed query
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
            .map(|(_, v)| match v {
                BindVariable::Value(v) => format!("{}|{}", route.query, v),
                BindVariable::Tuple(_) => route.query.clone(),
            });
        keyed
            .and_then(|k| self.results.get(&k).cloned())
            .or_else(|| self.results.get(&route.query).cloned())
            .ok_or_else(|| RouteplanError::Execution(format!("no canned result for {}", route.query)))
    }

    fn execute_send(&mut self, send: &Send, bind_vars: &BindVars) -> Result<QueryResult> {
        self.log.push((send.query.clone(), bind_vars.clone()));
        Ok(self.results.get(&send.query).cloned().unwrap_or_default())
    }
}

fn route(opcode: RouteOpcode, query: &str) -> Primitive {
    let _ = tracing_subscriber::fmt::try_init();
    let ks = Arc::new(Keyspace::new("user", true));
    Primitive::Route(Route::new(opcode, ks, query.to_string()))
}

fn rows(names: &[&str], data: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::with_field_names(names, data)
}

/// Test 1: join binds left values and honors column offsets
#[test]
fn test_join_binds_left_columns() {
    let left = "select u.id, u.name from user as u";
    let right = "select m.title from music as m where m.user_id = :u_id";
    let mut vc = FakeCursor::default()
        .with(
            left,
            rows(
                &["id", "name"],
                vec![
                    vec![Value::Int(1), Value::from("a")],
                    vec![Value::Int(2), Value::from("b")],
                ],
            ),
        )
        .with(
            &format!("{}|1", right),
            rows(&["title"], vec![vec![Value::from("x")], vec![Value::from("y")]]),
        )
        .with(&format!("{}|2", right), rows(&["title"], vec![]));

    let mut vars = BTreeMap::new();
    vars.insert("u_id".to_string(), 0);
    let join = |opcode| {
        Primitive::Join(Join {
            opcode,
            left: Box::new(route(RouteOpcode::Scatter, left)),
            right: Box::new(route(RouteOpcode::EqualUnique, right)),
            cols: vec![-2, 1],
            vars: vars.clone(),
        })
    };

    let result = join(JoinOpcode::Normal).execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.fields.len(), 2);
    assert_eq!(result.fields[0].name, "name");
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("a"), Value::from("x")],
            vec![Value::from("a"), Value::from("y")],
        ]
    );

    let result = join(JoinOpcode::LeftJoin).execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.rows[2], vec![Value::from("b"), Value::Null]);
}

/// Test 2: ordered aggregate merges partial results per group
#[test]
fn test_ordered_aggregate() {
    let q = "select col, count(*), min(v), count(distinct d) from t group by col, d order by col asc, d asc";
    let mut vc = FakeCursor::default().with(
        q,
        rows(
            &["col", "count(*)", "min(v)", "d"],
            vec![
                vec![Value::Int(1), Value::Int(2), Value::Int(7), Value::Int(10)],
                vec![Value::Int(1), Value::Int(3), Value::Int(4), Value::Int(10)],
                vec![Value::Int(1), Value::Int(1), Value::Int(9), Value::Int(11)],
                vec![Value::Int(2), Value::Int(5), Value::Null, Value::Null],
            ],
        ),
    );
    let agg = Primitive::OrderedAggregate(OrderedAggregate {
        aggregates: vec![
            AggregateParams {
                opcode: AggregateOpcode::Count,
                col: 1,
                alias: "count(*)".into(),
            },
            AggregateParams {
                opcode: AggregateOpcode::Min,
                col: 2,
                alias: "min(v)".into(),
            },
            AggregateParams {
                opcode: AggregateOpcode::CountDistinct,
                col: 3,
                alias: "count(distinct d)".into(),
            },
        ],
        group_by_keys: vec![0],
        truncate_column_count: 0,
        input: Box::new(route(RouteOpcode::Scatter, q)),
    });
    let result = agg.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(
        result.rows,
        vec![
            vec![Value::Int(1), Value::Int(6), Value::Int(4), Value::Int(2)],
            vec![Value::Int(2), Value::Int(5), Value::Null, Value::Int(0)],
        ]
    );
}

/// Test 3: aggregating no rows without grouping yields a zero count
#[test]
fn test_scalar_aggregate_on_empty_input() {
    let q = "select count(*) from t";
    let mut vc = FakeCursor::default().with(q, rows(&["count(*)"], vec![]));
    let agg = Primitive::OrderedAggregate(OrderedAggregate {
        aggregates: vec![AggregateParams {
            opcode: AggregateOpcode::Count,
            col: 0,
            alias: "count(*)".into(),
        }],
        group_by_keys: vec![],
        truncate_column_count: 0,
        input: Box::new(route(RouteOpcode::Scatter, q)),
    });
    let result = agg.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.rows, vec![vec![Value::Int(0)]]);
}

/// Test 4: pullout IN binds the list and the has-values flag
#[test]
fn test_pullout_in() {
    let sub = "select id from t2";
    let outer = "select id from t1 where :__sq_has_values1 = 1 and id in ::__sq1";
    let mut vc = FakeCursor::default()
        .with(sub, rows(&["id"], vec![vec![Value::Int(3)], vec![Value::Int(4)]]))
        .with(outer, rows(&["id"], vec![vec![Value::Int(3)]]));
    let pullout = |opcode| {
        Primitive::PulloutSubquery(PulloutSubquery {
            opcode,
            sq_name: "__sq1".into(),
            has_values: "__sq_has_values1".into(),
            subquery: Box::new(route(RouteOpcode::Scatter, sub)),
            underlying: Box::new(route(RouteOpcode::Scatter, outer)),
        })
    };
    pullout(PulloutOpcode::In)
        .execute(&mut vc, &BindVars::new())
        .unwrap();
    let (_, vars) = vc.log.last().unwrap();
    assert_eq!(vars["__sq_has_values1"], BindVariable::int(1));
    assert_eq!(
        vars["__sq1"],
        BindVariable::Tuple(vec![Value::Int(3), Value::Int(4)])
    );

    // a multi-row result is an error for a scalar subquery
    let err = pullout(PulloutOpcode::Value)
        .execute(&mut vc, &BindVars::new())
        .unwrap_err();
    assert!(err.to_string().contains("more than one row"));
}

/// Test 5: empty IN subquery binds the placeholder tuple
#[test]
fn test_pullout_in_empty() {
    let sub = "select id from t2";
    let outer = "select id from t1";
    let mut vc = FakeCursor::default()
        .with(sub, rows(&["id"], vec![]))
        .with(outer, rows(&["id"], vec![]));
    let p = Primitive::PulloutSubquery(PulloutSubquery {
        opcode: PulloutOpcode::NotIn,
        sq_name: "__sq1".into(),
        has_values: "__sq_has_values1".into(),
        subquery: Box::new(route(RouteOpcode::Scatter, sub)),
        underlying: Box::new(route(RouteOpcode::Scatter, outer)),
    });
    p.execute(&mut vc, &BindVars::new()).unwrap();
    let (_, vars) = vc.log.last().unwrap();
    assert_eq!(vars["__sq_has_values1"], BindVariable::int(0));
    assert_eq!(vars["__sq1"], BindVariable::Tuple(vec![Value::Int(0)]));
}

/// Test 6: limit passes the upper bound down and applies the offset
#[test]
fn test_limit_with_offset() {
    let q = "select id from t order by id asc limit :__upper_limit";
    let data = (1..=5).map(|i| vec![Value::Int(i)]).collect();
    let mut vc = FakeCursor::default().with(q, rows(&["id"], data));
    let limit = Primitive::Limit(Limit {
        count: EvalExpr::Literal(Value::Int(2)),
        offset: Some(EvalExpr::Literal(Value::Int(1))),
        input: Box::new(route(RouteOpcode::Scatter, q)),
    });
    let result = limit.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.rows, vec![vec![Value::Int(2)], vec![Value::Int(3)]]);
    let (_, vars) = vc.log.last().unwrap();
    assert_eq!(vars[UPPER_LIMIT_VAR], BindVariable::int(3));
}

/// Test 6b: an upper bound past i64 fails before any shard is queried
#[test]
fn test_limit_upper_bound_out_of_range() {
    let q = "select id from t limit :__upper_limit";
    let mut vc = FakeCursor::default().with(q, rows(&["id"], vec![]));
    let limit = Primitive::Limit(Limit {
        count: EvalExpr::Literal(Value::Int(i64::MAX)),
        offset: Some(EvalExpr::Literal(Value::Int(1))),
        input: Box::new(route(RouteOpcode::Scatter, q)),
    });
    let err = limit.execute(&mut vc, &BindVars::new()).unwrap_err();
    assert!(matches!(err, RouteplanError::Execution(_)));
    assert!(err.to_string().contains("out of range"));
    assert!(vc.log.is_empty());
}

/// Test 7: sort, distinct and truncation of helper columns
#[test]
fn test_sort_distinct_truncate() {
    let q = "select name, id from t";
    let mut vc = FakeCursor::default().with(
        q,
        rows(
            &["name", "id"],
            vec![
                vec![Value::from("b"), Value::Int(2)],
                vec![Value::from("a"), Value::Int(1)],
                vec![Value::from("b"), Value::Int(2)],
            ],
        ),
    );
    let plan = Primitive::Distinct(Distinct {
        truncate_column_count: 1,
        input: Box::new(Primitive::MemorySort(MemorySort {
            order_by: vec![OrderByParams { col: 1, desc: false }],
            truncate_column_count: 0,
            input: Box::new(route(RouteOpcode::Scatter, q)),
        })),
    });
    let result = plan.execute(&mut vc, &BindVars::new()).unwrap();
    assert_eq!(result.fields.len(), 1);
    assert_eq!(
        result.rows,
        vec![vec![Value::from("a")], vec![Value::from("b")]]
    );

    let mut chunks = 0;
    plan.stream_execute(&mut vc, &BindVars::new(), &mut |chunk| {
        chunks += 1;
        assert_eq!(chunk.rows.len(), 2);
        Ok(())
    })
    .unwrap();
    assert_eq!(chunks, 1);
}

/// Test 8: description tree mirrors the primitive tree
#[test]
fn test_description() {
    let plan = Primitive::Limit(Limit {
        count: EvalExpr::Literal(Value::Int(10)),
        offset: None,
        input: Box::new(route(RouteOpcode::Scatter, "select id from t limit :__upper_limit")),
    });
    let desc = plan.description();
    assert_eq!(desc.operator_type, "Limit");
    assert_eq!(desc.inputs.len(), 1);
    assert_eq!(desc.inputs[0].variant.as_deref(), Some("Scatter"));
    assert_eq!(plan.routes().len(), 1);
}
