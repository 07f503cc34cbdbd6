//! Plan descriptions for explain tooling

use routeplan_common::{ExplainFormat, Result};
use serde_json::json;

use crate::builder::Plan;

/// Render a plan as an indented operator tree or as JSON.
pub fn explain(plan: &Plan, format: ExplainFormat) -> Result<String> {
    let description = plan.description();
    match format {
        ExplainFormat::Text => Ok(description.to_string()),
        ExplainFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "QueryType": "SELECT",
            "Original": plan.original,
            "Planner": plan.planner.name(),
            "Instructions": description,
        }))?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_plan, BuildOptions};
    use routeplan_vschema::InMemoryVSchema;

    fn plan(sql: &str) -> Plan {
        let vs = InMemoryVSchema::new().with_default_keyspace("main");
        vs.add_keyspace("main", false).unwrap();
        build_plan(sql, &vs, BuildOptions::default()).unwrap()
    }

    #[test]
    fn test_json_explain() {
        let out = explain(&plan("select a from t"), ExplainFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["Original"], "select a from t");
        assert_eq!(value["Instructions"]["OperatorType"], "Route");
        assert_eq!(value["Instructions"]["Variant"], "Unsharded");
        assert_eq!(value["Instructions"]["Query"], "select a from t");
    }

    #[test]
    fn test_text_explain() {
        let out = explain(&plan("select a from t"), ExplainFormat::Text).unwrap();
        assert!(out.starts_with("Route(Unsharded) keyspace=main\n"));
        assert!(out.contains("  Query: select a from t\n"));
    }
}
