//! Column selection over an input

use routeplan_common::{BindVars, Field, QueryResult, Result, Value};

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

/// Picks input columns by offset, in the given order.
#[derive(Debug, Clone)]
pub struct SimpleProjection {
    pub cols: Vec<usize>,
    pub input: Box<Primitive>,
}

impl SimpleProjection {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let input = self.input.execute(vcursor, bind_vars)?;
        Ok(self.project(input))
    }

    pub(crate) fn project(&self, input: QueryResult) -> QueryResult {
        let fields = self
            .cols
            .iter()
            .map(|&c| input.fields.get(c).cloned().unwrap_or_else(|| Field::new("")))
            .collect();
        let rows = input
            .rows
            .into_iter()
            .map(|row| {
                self.cols
                    .iter()
                    .map(|&c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        QueryResult::new(fields, rows)
    }
}
