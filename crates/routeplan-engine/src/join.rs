//! Nested-loop join across two inputs

use std::collections::BTreeMap;

use routeplan_common::{BindVariable, BindVars, Field, QueryResult, Result, Row, Value};

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOpcode {
    Normal,
    LeftJoin,
}

impl JoinOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            JoinOpcode::Normal => "Join",
            JoinOpcode::LeftJoin => "LeftJoin",
        }
    }
}

/// Runs `right` once per row of `left`, binding left columns as variables.
#[derive(Debug, Clone)]
pub struct Join {
    pub opcode: JoinOpcode,
    pub left: Box<Primitive>,
    pub right: Box<Primitive>,
    /// Output columns: `-n` is left column `n-1`, `n` is right column `n-1`
    pub cols: Vec<i32>,
    /// Bind variable name to left column offset
    pub vars: BTreeMap<String, usize>,
}

impl Join {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let left = self.left.execute(vcursor, bind_vars)?;
        let mut result = QueryResult::default();

        if left.rows.is_empty() {
            // bind NULLs so the right side can still report its fields
            let mut vars = bind_vars.clone();
            for name in self.vars.keys() {
                vars.insert(name.clone(), BindVariable::Value(Value::Null));
            }
            let right = self.right.execute(vcursor, &vars)?;
            result.fields = self.join_fields(&left.fields, &right.fields);
            return Ok(result);
        }

        for left_row in &left.rows {
            let vars = self.bind_row(bind_vars, left_row);
            let right = self.right.execute(vcursor, &vars)?;
            if result.fields.is_empty() {
                result.fields = self.join_fields(&left.fields, &right.fields);
            }
            if right.rows.is_empty() {
                if self.opcode == JoinOpcode::LeftJoin {
                    result.rows.push(self.join_row(left_row, None));
                }
                continue;
            }
            for right_row in &right.rows {
                result.rows.push(self.join_row(left_row, Some(right_row)));
            }
        }
        Ok(result)
    }

    fn bind_row(&self, bind_vars: &BindVars, row: &Row) -> BindVars {
        let mut vars = bind_vars.clone();
        for (name, &col) in &self.vars {
            let value = row.get(col).cloned().unwrap_or(Value::Null);
            vars.insert(name.clone(), BindVariable::Value(value));
        }
        vars
    }

    fn join_fields(&self, left: &[Field], right: &[Field]) -> Vec<Field> {
        self.cols
            .iter()
            .map(|&c| {
                let field = if c < 0 {
                    left.get((-c - 1) as usize)
                } else {
                    right.get((c - 1) as usize)
                };
                field.cloned().unwrap_or_else(|| Field::new(""))
            })
            .collect()
    }

    fn join_row(&self, left: &Row, right: Option<&Row>) -> Row {
        self.cols
            .iter()
            .map(|&c| {
                if c < 0 {
                    left.get((-c - 1) as usize).cloned().unwrap_or(Value::Null)
                } else {
                    right
                        .and_then(|r| r.get((c - 1) as usize).cloned())
                        .unwrap_or(Value::Null)
                }
            })
            .collect()
    }
}

/// Render join column indexes as in explain output, e.g. `-1,1`.
pub fn format_cols(cols: &[i32]) -> String {
    cols.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
