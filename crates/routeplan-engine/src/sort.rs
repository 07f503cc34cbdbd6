//! Sorting: merge-sort keys for routes and the in-memory sort operator

use std::cmp::Ordering;
use std::fmt;

use routeplan_common::{BindVars, QueryResult, Result, Row, Value};

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

/// Sort key: a column offset and a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderByParams {
    pub col: usize,
    pub desc: bool,
}

impl fmt::Display for OrderByParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.col, if self.desc { "DESC" } else { "ASC" })
    }
}

pub(crate) fn compare_rows(a: &Row, b: &Row, order_by: &[OrderByParams]) -> Ordering {
    static NULL: Value = Value::Null;
    for key in order_by {
        let left = a.get(key.col).unwrap_or(&NULL);
        let right = b.get(key.col).unwrap_or(&NULL);
        let ord = left.cmp(right);
        let ord = if key.desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort, so rows equal on every key keep their arrival order.
pub(crate) fn sort_rows(rows: &mut [Row], order_by: &[OrderByParams]) {
    rows.sort_by(|a, b| compare_rows(a, b, order_by));
}

/// Sorts its input in memory
#[derive(Debug, Clone)]
pub struct MemorySort {
    pub order_by: Vec<OrderByParams>,
    pub truncate_column_count: usize,
    pub input: Box<Primitive>,
}

impl MemorySort {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let mut result = self.input.execute(vcursor, bind_vars)?;
        sort_rows(&mut result.rows, &self.order_by);
        result.truncate(self.truncate_column_count);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_rows_multi_key() {
        let mut rows = vec![
            vec![Value::Int(1), Value::from("b")],
            vec![Value::Int(2), Value::from("a")],
            vec![Value::Int(1), Value::from("c")],
            vec![Value::Null, Value::from("z")],
        ];
        sort_rows(
            &mut rows,
            &[
                OrderByParams { col: 0, desc: false },
                OrderByParams { col: 1, desc: true },
            ],
        );
        assert_eq!(rows[0][0], Value::Null);
        assert_eq!(rows[1], vec![Value::Int(1), Value::from("c")]);
        assert_eq!(rows[2], vec![Value::Int(1), Value::from("b")]);
        assert_eq!(rows[3][0], Value::Int(2));
    }
}
