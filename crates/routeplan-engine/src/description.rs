//! Explain output for primitive trees

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// One node of a plan description, serialized the way explain tooling
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimitiveDescription {
    #[serde(rename = "OperatorType")]
    pub operator_type: String,
    #[serde(rename = "Variant", skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "Keyspace", skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<KeyspaceDescription>,
    #[serde(rename = "TargetDestination", skip_serializing_if = "Option::is_none")]
    pub target_destination: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "Inputs", skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PrimitiveDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyspaceDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Sharded")]
    pub sharded: bool,
}

impl PrimitiveDescription {
    pub fn new(operator_type: &str) -> Self {
        Self {
            operator_type: operator_type.to_string(),
            variant: None,
            keyspace: None,
            target_destination: None,
            other: BTreeMap::new(),
            inputs: Vec::new(),
        }
    }

    pub fn variant(mut self, variant: &str) -> Self {
        self.variant = Some(variant.to_string());
        self
    }

    pub fn keyspace(mut self, name: &str, sharded: bool) -> Self {
        self.keyspace = Some(KeyspaceDescription {
            name: name.to_string(),
            sharded,
        });
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.other.insert(key.to_string(), value.into());
        self
    }

    pub fn input(mut self, input: PrimitiveDescription) -> Self {
        self.inputs.push(input);
        self
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.operator_type, indent = indent)?;
        if let Some(variant) = &self.variant {
            write!(f, "({})", variant)?;
        }
        if let Some(ks) = &self.keyspace {
            write!(f, " keyspace={}", ks.name)?;
        }
        if let Some(dest) = &self.target_destination {
            write!(f, " destination={}", dest)?;
        }
        writeln!(f)?;
        for (key, value) in &self.other {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writeln!(f, "{:indent$}  {}: {}", "", key, text, indent = indent)?;
        }
        for input in &self.inputs {
            input.fmt_indented(f, indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for PrimitiveDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let desc = PrimitiveDescription::new("Route")
            .variant("Scatter")
            .keyspace("user", true)
            .with("Query", "select id from user");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["OperatorType"], "Route");
        assert_eq!(json["Variant"], "Scatter");
        assert_eq!(json["Keyspace"]["Sharded"], true);
        assert_eq!(json["Query"], "select id from user");
        assert!(json.get("Inputs").is_none());
    }

    #[test]
    fn test_text_shape() {
        let desc = PrimitiveDescription::new("Join")
            .variant("Join")
            .with("JoinColumnIndexes", "-1,1")
            .input(PrimitiveDescription::new("Route").variant("Scatter"))
            .input(PrimitiveDescription::new("Route").variant("EqualUnique"));
        let text = desc.to_string();
        assert_eq!(
            text,
            "Join(Join)\n  JoinColumnIndexes: -1,1\n  Route(Scatter)\n  Route(EqualUnique)\n"
        );
    }
}
