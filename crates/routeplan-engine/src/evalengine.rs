//! Values known at plan time or bound at execution time

use std::fmt;

use routeplan_common::{BindVariable, BindVars, Result, RouteplanError, Value};

/// A routing value: a literal, a bind variable, or a tuple of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalExpr {
    Literal(Value),
    BindVar(String),
    /// `::name`, must be bound to a tuple
    ListBindVar(String),
    Tuple(Vec<EvalExpr>),
}

impl EvalExpr {
    pub fn evaluate(&self, bind_vars: &BindVars) -> Result<BindVariable> {
        match self {
            EvalExpr::Literal(v) => Ok(BindVariable::Value(v.clone())),
            EvalExpr::BindVar(name) => bind_vars
                .get(name)
                .cloned()
                .ok_or_else(|| missing(name)),
            EvalExpr::ListBindVar(name) => match bind_vars.get(name) {
                Some(tuple @ BindVariable::Tuple(_)) => Ok(tuple.clone()),
                Some(BindVariable::Value(_)) => Err(RouteplanError::Execution(format!(
                    "bind variable '{}' is not a list",
                    name
                ))),
                None => Err(missing(name)),
            },
            EvalExpr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item.evaluate(bind_vars)? {
                        BindVariable::Value(v) => values.push(v),
                        BindVariable::Tuple(_) => {
                            return Err(RouteplanError::Execution(
                                "nested tuple in routing value".to_string(),
                            ))
                        }
                    }
                }
                Ok(BindVariable::Tuple(values))
            }
        }
    }

    /// Evaluate to a single value.
    pub fn value(&self, bind_vars: &BindVars) -> Result<Value> {
        match self.evaluate(bind_vars)? {
            BindVariable::Value(v) => Ok(v),
            BindVariable::Tuple(_) => Err(RouteplanError::Execution(format!(
                "expected a single value for {}",
                self
            ))),
        }
    }
}

fn missing(name: &str) -> RouteplanError {
    RouteplanError::Execution(format!("missing bind var {}", name))
}

impl fmt::Display for EvalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalExpr::Literal(Value::Text(s)) => write!(f, "'{}'", s),
            EvalExpr::Literal(Value::Null) => write!(f, "null"),
            EvalExpr::Literal(v) => write!(f, "{}", v),
            EvalExpr::BindVar(name) => write!(f, ":{}", name),
            EvalExpr::ListBindVar(name) => write!(f, "::{}", name),
            EvalExpr::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}
