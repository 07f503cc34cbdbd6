//! Ordered aggregation over input sorted by the grouping keys

use std::fmt;

use routeplan_common::{BindVars, QueryResult, Result, Row, Value};

use crate::primitive::Primitive;
use crate::vcursor::VCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOpcode {
    Count,
    Sum,
    Min,
    Max,
    /// Input column carries the distinct value itself
    CountDistinct,
    SumDistinct,
}

impl AggregateOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOpcode::Count => "count",
            AggregateOpcode::Sum => "sum",
            AggregateOpcode::Min => "min",
            AggregateOpcode::Max => "max",
            AggregateOpcode::CountDistinct => "count_distinct",
            AggregateOpcode::SumDistinct => "sum_distinct",
        }
    }

    fn is_distinct(&self) -> bool {
        matches!(self, AggregateOpcode::CountDistinct | AggregateOpcode::SumDistinct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateParams {
    pub opcode: AggregateOpcode,
    pub col: usize,
    pub alias: String,
}

impl fmt::Display for AggregateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) AS {}", self.opcode.name(), self.col, self.alias)
    }
}

/// Combines partial aggregates computed by the shards.
#[derive(Debug, Clone)]
pub struct OrderedAggregate {
    pub aggregates: Vec<AggregateParams>,
    pub group_by_keys: Vec<usize>,
    pub truncate_column_count: usize,
    pub input: Box<Primitive>,
}

impl OrderedAggregate {
    pub fn execute(&self, vcursor: &mut dyn VCursor, bind_vars: &BindVars) -> Result<QueryResult> {
        let input = self.input.execute(vcursor, bind_vars)?;
        let mut result = QueryResult::new(input.fields, Vec::new());

        let mut current: Option<(Row, Vec<Value>)> = None;
        for row in input.rows {
            match current.take() {
                Some((mut acc, mut last_distinct)) if self.same_group(&acc, &row) => {
                    self.merge(&mut acc, &row, &mut last_distinct)?;
                    current = Some((acc, last_distinct));
                }
                previous => {
                    if let Some((acc, _)) = previous {
                        result.rows.push(acc);
                    }
                    current = Some(self.start(row));
                }
            }
        }
        if let Some((acc, _)) = current {
            result.rows.push(acc);
        }

        if result.rows.is_empty() && self.group_by_keys.is_empty() {
            result.rows.push(self.empty_row(result.fields.len()));
        }
        result.truncate(self.truncate_column_count);
        Ok(result)
    }

    fn same_group(&self, acc: &Row, row: &Row) -> bool {
        self.group_by_keys
            .iter()
            .all(|&k| acc.get(k) == row.get(k))
    }

    fn start(&self, mut row: Row) -> (Row, Vec<Value>) {
        let mut last_distinct = Vec::with_capacity(self.aggregates.len());
        for agg in &self.aggregates {
            let value = row.get(agg.col).cloned().unwrap_or(Value::Null);
            last_distinct.push(value.clone());
            if let Some(slot) = row.get_mut(agg.col) {
                *slot = match agg.opcode {
                    AggregateOpcode::CountDistinct => Value::Int(i64::from(!value.is_null())),
                    _ => value,
                };
            }
        }
        (row, last_distinct)
    }

    fn merge(&self, acc: &mut Row, row: &Row, last_distinct: &mut [Value]) -> Result<()> {
        for (i, agg) in self.aggregates.iter().enumerate() {
            let incoming = row.get(agg.col).cloned().unwrap_or(Value::Null);
            if agg.opcode.is_distinct() {
                if incoming.is_null() || incoming == last_distinct[i] {
                    continue;
                }
                last_distinct[i] = incoming.clone();
            }
            let Some(slot) = acc.get_mut(agg.col) else {
                continue;
            };
            *slot = match agg.opcode {
                AggregateOpcode::Count | AggregateOpcode::Sum | AggregateOpcode::SumDistinct => {
                    slot.add(&incoming)?
                }
                AggregateOpcode::CountDistinct => slot.add(&Value::Int(1))?,
                AggregateOpcode::Min => {
                    if slot.is_null() || (!incoming.is_null() && incoming < *slot) {
                        incoming
                    } else {
                        slot.clone()
                    }
                }
                AggregateOpcode::Max => {
                    if slot.is_null() || incoming > *slot {
                        incoming
                    } else {
                        slot.clone()
                    }
                }
            };
        }
        Ok(())
    }

    /// Result of aggregating no rows without grouping: counts are zero.
    fn empty_row(&self, width: usize) -> Row {
        let mut row = vec![Value::Null; width];
        for agg in &self.aggregates {
            if matches!(
                agg.opcode,
                AggregateOpcode::Count | AggregateOpcode::CountDistinct
            ) {
                if let Some(slot) = row.get_mut(agg.col) {
                    *slot = Value::Int(0);
                }
            }
        }
        row
    }
}
