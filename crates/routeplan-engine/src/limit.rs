//! LIMIT and OFFSET applied at the vtgate

use routeplan_common::{BindVariable, BindVars, QueryResult, Result, RouteplanError, Value};

use crate::evalengine::EvalExpr;
use crate::primitive::Primitive;
use crate::vcursor::VCursor;

/// Bind variable carrying `count + offset` to the routes below a limit
pub const UPPER_LIMIT_VAR: &str = "__upper_limit";

#[derive(Debug, Clone)]
pub struct Limit {
    pub count: EvalExpr,
    pub offset: Option<EvalExpr>,
    pub input: Box<Primitive>,
}

impl Limit {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let (count, offset) = self.fetch_count_offset(bind_vars)?;
        let upper = count
            .checked_add(offset)
            .and_then(|upper| i64::try_from(upper).ok())
            .ok_or_else(|| {
                RouteplanError::Execution(format!(
                    "limit {} with offset {} is out of range",
                    count, offset
                ))
            })?;
        let mut vars = bind_vars.clone();
        vars.insert(UPPER_LIMIT_VAR.to_string(), BindVariable::int(upper));
        let mut result = self.input.execute(vcursor, &vars)?;
        result.rows = result.rows.into_iter().skip(offset).take(count).collect();
        Ok(result)
    }

    fn fetch_count_offset(&self, bind_vars: &BindVars) -> Result<(usize, usize)> {
        let count = non_negative(self.count.value(bind_vars)?, "limit")?;
        let offset = match &self.offset {
            Some(o) => non_negative(o.value(bind_vars)?, "offset")?,
            None => 0,
        };
        Ok((count, offset))
    }
}

fn non_negative(value: Value, what: &str) -> Result<usize> {
    let v = value.to_i64()?;
    usize::try_from(v)
        .map_err(|_| RouteplanError::Execution(format!("invalid {}: {}", what, v)))
}
