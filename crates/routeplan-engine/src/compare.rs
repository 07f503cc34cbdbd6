//! Runs two plans for the same query and checks they agree

use routeplan_common::{BindVars, QueryResult, Result, RouteplanError};
use tracing::warn;

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

#[derive(Debug, Clone)]
pub struct Compare {
    pub v3: Box<Primitive>,
    pub gen4: Box<Primitive>,
    /// Compare rows in order instead of as multisets
    pub has_order_by: bool,
}

impl Compare {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let gen4 = self.gen4.execute(vcursor, bind_vars)?;
        let v3 = self.v3.execute(vcursor, bind_vars)?;
        if !self.results_match(&v3, &gen4) {
            warn!(v3_rows = v3.rows.len(), gen4_rows = gen4.rows.len(), "planner results differ");
            return Err(RouteplanError::Execution(
                "results did not match, see logs for details".to_string(),
            ));
        }
        Ok(gen4)
    }

    fn results_match(&self, a: &QueryResult, b: &QueryResult) -> bool {
        if a.rows.len() != b.rows.len() {
            return false;
        }
        if self.has_order_by {
            return a.rows == b.rows;
        }
        let mut left = a.rows.clone();
        let mut right = b.rows.clone();
        left.sort();
        right.sort();
        left == right
    }
}
