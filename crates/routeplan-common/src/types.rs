//! Runtime value types shared by the planner and the engine

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::{Result, RouteplanError};

/// A single SQL value as seen by the vtgate-side operators
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn to_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            Value::Text(s) => s
                .parse::<i64>()
                .map_err(|_| RouteplanError::InvalidArgument(format!("'{}' is not an integer", s))),
            other => Err(RouteplanError::InvalidArgument(format!(
                "{} is not an integer",
                other
            ))),
        }
    }

    fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    /// Numeric addition used when combining partial sums and counts.
    /// NULL is the identity.
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => Ok(v.clone()),
            (Value::Int(a), Value::Int(b)) => Ok(match a.checked_add(*b) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(*a as f64 + *b as f64),
            }),
            (a, b) => match (a.to_f64(), b.to_f64()) {
                (Some(x), Some(y)) => Ok(Value::Float(x + y)),
                _ => Err(RouteplanError::Execution(format!(
                    "cannot add {} and {}",
                    a, b
                ))),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = self.to_f64().unwrap_or_default();
                let b = other.to_f64().unwrap_or_default();
                a.total_cmp(&b)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// A bind variable: a single value or a tuple for `IN ::list` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindVariable {
    Value(Value),
    Tuple(Vec<Value>),
}

impl BindVariable {
    pub fn int(v: i64) -> Self {
        BindVariable::Value(Value::Int(v))
    }
}

impl From<Value> for BindVariable {
    fn from(v: Value) -> Self {
        BindVariable::Value(v)
    }
}

pub type BindVars = BTreeMap<String, BindVariable>;

pub type Row = Vec<Value>;

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Rows returned by a shard or by an operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(fields: Vec<Field>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }

    pub fn with_field_names(names: &[&str], rows: Vec<Row>) -> Self {
        Self {
            fields: names.iter().map(|n| Field::new(*n)).collect(),
            rows,
        }
    }

    /// Drop every column at or after `count`. Zero keeps the result as is.
    pub fn truncate(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if self.fields.len() > count {
            self.fields.truncate(count);
        }
        for row in &mut self.rows {
            if row.len() > count {
                row.truncate(count);
            }
        }
    }

    /// Append the rows of `other`, adopting its fields if this result has none.
    pub fn append(&mut self, other: QueryResult) {
        if self.fields.is_empty() {
            self.fields = other.fields;
        }
        self.rows.extend(other.rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ordering() {
        assert!(Value::Null < Value::Int(-5));
        assert!(Value::Int(2) < Value::Float(2.5));
        assert!(Value::Float(3.0) == Value::Int(3));
        assert!(Value::Int(100) < Value::from("a"));
        assert!(Value::from("a") < Value::from("b"));
    }

    #[test]
    fn test_value_add() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(Value::Null.add(&Value::Int(3)).unwrap(), Value::Int(3));
        assert_eq!(
            Value::Int(1).add(&Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert!(Value::from("x").add(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_truncate_result() {
        let mut result = QueryResult::with_field_names(
            &["a", "b", "c"],
            vec![vec![Value::Int(1), Value::Int(2), Value::Int(3)]],
        );
        result.truncate(1);
        assert_eq!(result.fields.len(), 1);
        assert_eq!(result.rows[0], vec![Value::Int(1)]);
    }
}
