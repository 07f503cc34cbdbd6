//! Pullout subquery: run the subquery first, then bind its result

use routeplan_common::{BindVariable, BindVars, QueryResult, Result, RouteplanError, Value};

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulloutOpcode {
    Value,
    In,
    NotIn,
    Exists,
}

impl PulloutOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            PulloutOpcode::Value => "PulloutValue",
            PulloutOpcode::In => "PulloutIn",
            PulloutOpcode::NotIn => "PulloutNotIn",
            PulloutOpcode::Exists => "PulloutExists",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PulloutSubquery {
    pub opcode: PulloutOpcode,
    /// Variable holding the value or the list
    pub sq_name: String,
    /// Variable set to 1 when the subquery returned rows, else 0
    pub has_values: String,
    pub subquery: Box<Primitive>,
    pub underlying: Box<Primitive>,
}

impl PulloutSubquery {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let vars = self.bind_subquery(vcursor, bind_vars)?;
        self.underlying.execute(vcursor, &vars)
    }

    pub fn stream_execute(
        &self,
        vcursor: &mut dyn VCursor,
        bind_vars: &BindVars,
        callback: &mut dyn FnMut(QueryResult) -> Result<()>,
    ) -> Result<()> {
        let vars = self.bind_subquery(vcursor, bind_vars)?;
        self.underlying.stream_execute(vcursor, &vars, callback)
    }

    fn bind_subquery(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<BindVars> {
        let result = self.subquery.execute(vcursor, bind_vars)?;
        let mut vars = bind_vars.clone();
        match self.opcode {
            PulloutOpcode::Value => {
                let value = match result.rows.as_slice() {
                    [] => Value::Null,
                    [row] => {
                        check_single_column(&result)?;
                        row.first().cloned().unwrap_or(Value::Null)
                    }
                    _ => {
                        return Err(RouteplanError::Execution(
                            "subquery returned more than one row".to_string(),
                        ))
                    }
                };
                vars.insert(self.sq_name.clone(), BindVariable::Value(value));
            }
            PulloutOpcode::In | PulloutOpcode::NotIn => {
                if result.rows.is_empty() {
                    vars.insert(self.has_values.clone(), BindVariable::int(0));
                    // the list must never be empty in generated SQL
                    vars.insert(
                        self.sq_name.clone(),
                        BindVariable::Tuple(vec![Value::Int(0)]),
                    );
                } else {
                    check_single_column(&result)?;
                    let values = result
                        .rows
                        .iter()
                        .map(|row| row.first().cloned().unwrap_or(Value::Null))
                        .collect();
                    vars.insert(self.has_values.clone(), BindVariable::int(1));
                    vars.insert(self.sq_name.clone(), BindVariable::Tuple(values));
                }
            }
            PulloutOpcode::Exists => {
                let flag = i64::from(!result.rows.is_empty());
                vars.insert(self.has_values.clone(), BindVariable::int(flag));
            }
        }
        Ok(vars)
    }
}

fn check_single_column(result: &QueryResult) -> Result<()> {
    let width = result
        .rows
        .first()
        .map(|r| r.len())
        .unwrap_or(result.fields.len());
    if width > 1 {
        return Err(RouteplanError::Execution(
            "subquery returned more than one column".to_string(),
        ));
    }
    Ok(())
}
