//! Duplicate elimination at the vtgate

use std::collections::BTreeSet;

use routeplan_common::{BindVars, QueryResult, Result};

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

#[derive(Debug, Clone)]
pub struct Distinct {
    pub truncate_column_count: usize,
    pub input: Box<Primitive>,
}

impl Distinct {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let mut result = self.input.execute(vcursor, bind_vars)?;
        let mut seen = BTreeSet::new();
        result.rows.retain(|row| seen.insert(row.clone()));
        result.truncate(self.truncate_column_count);
        Ok(result)
    }
}
