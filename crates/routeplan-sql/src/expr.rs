//! Expression AST

use routeplan_common::Value;

use crate::select::Select;
use crate::table_set::TableSet;

/// `[keyspace.]table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub qualifier: Option<String>,
    pub name: String,
}

const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "performance_schema", "sys", "mysql"];

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    /// Tables of the MySQL introspection schemas.
    pub fn is_system_schema(&self) -> bool {
        self.qualifier
            .as_deref()
            .map(|q| SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(q)))
            .unwrap_or(false)
    }
}

/// Column reference. `deps` is filled in by semantic analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColName {
    pub qualifier: Option<TableName>,
    pub name: String,
    pub deps: TableSet,
}

impl ColName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
            deps: TableSet::EMPTY,
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(TableName::new(table)),
            name: name.into(),
            deps: TableSet::EMPTY,
        }
    }

    /// Name usable as a bind variable, e.g. `u_id` for `u.id`.
    pub fn compliant_name(&self) -> String {
        let raw = match &self.qualifier {
            Some(q) => format!("{}_{}", q.name, self.name),
            None => self.name.clone(),
        };
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integer numbers keep their source text
    Decimal(String),
    Str(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Int(i64::from(*b)),
            Literal::Int(v) => Value::Int(*v),
            Literal::Decimal(s) => s.parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
            Literal::Str(s) => Value::Text(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Like,
    NotLike,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
            ComparisonOp::In => "in",
            ComparisonOp::NotIn => "not in",
            ComparisonOp::Like => "like",
            ComparisonOp::NotLike => "not like",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl ArithmeticOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithmeticOp::Plus => "+",
            ArithmeticOp::Minus => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulo => "%",
        }
    }
}

/// Function call; aggregate functions are recognized by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncExpr {
    /// Lowercased
    pub name: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
    /// `count(*)`
    pub star: bool,
}

const AGGREGATES: [&str; 5] = ["count", "sum", "min", "max", "avg"];

impl FuncExpr {
    pub fn is_aggregate(&self) -> bool {
        AGGREGATES.contains(&self.name.as_str())
    }
}

/// How the result of a pulled-out subquery is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubqueryKind {
    /// Scalar value
    Value,
    In,
    NotIn,
    Exists,
}

impl SubqueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            SubqueryKind::Value => "PulloutValue",
            SubqueryKind::In => "PulloutIn",
            SubqueryKind::NotIn => "PulloutNotIn",
            SubqueryKind::Exists => "PulloutExists",
        }
    }
}

/// A subquery replaced by bind-variable placeholders.
///
/// `original` keeps the untouched expression so a subquery absorbed into its
/// outer route can be rendered inline again; `subquery` is the rewritten
/// select that gets planned on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSubquery {
    pub kind: SubqueryKind,
    pub subquery: Select,
    /// Left operand of `IN` / `NOT IN`
    pub other_side: Option<Expr>,
    pub original: Expr,
    pub arg_name: String,
    pub has_values_name: String,
    pub merged: bool,
}

impl ExtractedSubquery {
    /// Expression rendered when the subquery runs separately.
    pub fn rewritten(&self) -> Expr {
        match self.kind {
            SubqueryKind::Value => Expr::Argument(self.arg_name.clone()),
            SubqueryKind::Exists => Expr::Argument(self.has_values_name.clone()),
            SubqueryKind::In | SubqueryKind::NotIn => {
                let (flag, op, combine): (i64, ComparisonOp, fn(Expr, Expr) -> Expr) =
                    if self.kind == SubqueryKind::In {
                        (1, ComparisonOp::In, Expr::and)
                    } else {
                        (0, ComparisonOp::NotIn, Expr::or)
                    };
                let has_values = Expr::cmp(
                    ComparisonOp::Eq,
                    Expr::Argument(self.has_values_name.clone()),
                    Expr::Literal(Literal::Int(flag)),
                );
                let other = self.other_side.clone().unwrap_or(Expr::Literal(Literal::Null));
                let membership = Expr::cmp(op, other, Expr::ListArgument(self.arg_name.clone()));
                combine(has_values, membership)
            }
        }
    }

    /// Expression as it is rendered right now.
    pub fn effective(&self) -> Expr {
        if self.merged {
            self.original.clone()
        } else {
            self.rewritten()
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Column(ColName),
    Literal(Literal),
    /// `:name`
    Argument(String),
    /// `::name`, a tuple-valued bind variable
    ListArgument(String),
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Tuple(Vec<Expr>),
    Func(FuncExpr),
    /// Scalar subquery, or the right side of `IN`
    Subquery(Box<Select>),
    Exists(Box<Select>),
    Extracted(Box<ExtractedSubquery>),
}

impl Expr {
    pub fn col(name: &str) -> Expr {
        Expr::Column(ColName::new(name))
    }

    pub fn qcol(table: &str, name: &str) -> Expr {
        Expr::Column(ColName::qualified(table, name))
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v))
    }

    pub fn string(s: &str) -> Expr {
        Expr::Literal(Literal::Str(s.to_string()))
    }

    pub fn cmp(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
        Expr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::cmp(ComparisonOp::Eq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or(Box::new(left), Box::new(right))
    }

    /// A literal or a bind variable: something known before the query runs.
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            Expr::Literal(_) | Expr::Argument(_) | Expr::ListArgument(_)
        )
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Null))
    }

    /// Child expressions of this scope. Nested selects are not included.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_)
            | Expr::Literal(_)
            | Expr::Argument(_)
            | Expr::ListArgument(_)
            | Expr::Subquery(_)
            | Expr::Exists(_) => vec![],
            Expr::Comparison { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Expr::And(l, r) | Expr::Or(l, r) => vec![l.as_ref(), r.as_ref()],
            Expr::Not(e) | Expr::Neg(e) => vec![e.as_ref()],
            Expr::IsNull { expr, .. } => vec![expr.as_ref()],
            Expr::Between { expr, low, high, .. } => {
                vec![expr.as_ref(), low.as_ref(), high.as_ref()]
            }
            Expr::Tuple(items) => items.iter().collect(),
            Expr::Func(f) => f.args.iter().collect(),
            Expr::Extracted(ex) => ex.other_side.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Column(_)
            | Expr::Literal(_)
            | Expr::Argument(_)
            | Expr::ListArgument(_)
            | Expr::Subquery(_)
            | Expr::Exists(_) => vec![],
            Expr::Comparison { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
                vec![left.as_mut(), right.as_mut()]
            }
            Expr::And(l, r) | Expr::Or(l, r) => vec![l.as_mut(), r.as_mut()],
            Expr::Not(e) | Expr::Neg(e) => vec![e.as_mut()],
            Expr::IsNull { expr, .. } => vec![expr.as_mut()],
            Expr::Between { expr, low, high, .. } => {
                vec![expr.as_mut(), low.as_mut(), high.as_mut()]
            }
            Expr::Tuple(items) => items.iter_mut().collect(),
            Expr::Func(f) => f.args.iter_mut().collect(),
            Expr::Extracted(ex) => ex.other_side.iter_mut().collect(),
        }
    }

    /// Pre-order traversal over everything reachable, nested selects
    /// included. The visitor returns false to skip a node's children.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr) -> bool) {
        if !f(self) {
            return;
        }
        match self {
            Expr::Subquery(sel) | Expr::Exists(sel) => sel.visit_exprs(f),
            Expr::Extracted(ex) => {
                if let Some(other) = &ex.other_side {
                    other.visit(f);
                }
                ex.original.visit(f);
                ex.subquery.visit_exprs(f);
            }
            _ => {
                for child in self.children() {
                    child.visit(f);
                }
            }
        }
    }

    /// Mutable counterpart of [`Expr::visit`].
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Expr) -> bool) {
        if !f(self) {
            return;
        }
        match self {
            Expr::Subquery(sel) | Expr::Exists(sel) => sel.visit_exprs_mut(f),
            Expr::Extracted(ex) => {
                if let Some(other) = &mut ex.other_side {
                    other.visit_mut(f);
                }
                ex.original.visit_mut(f);
                ex.subquery.visit_exprs_mut(f);
            }
            _ => {
                for child in self.children_mut() {
                    child.visit_mut(f);
                }
            }
        }
    }

    /// Aggregate function calls of this scope.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| match e {
            Expr::Func(f) if f.is_aggregate() => {
                found = true;
                false
            }
            Expr::Subquery(_) | Expr::Exists(_) | Expr::Extracted(_) => false,
            _ => !found,
        });
        found
    }

    /// Extracted subqueries of this scope.
    pub fn extracted_subqueries(&self) -> Vec<&ExtractedSubquery> {
        let mut found = Vec::new();
        self.visit(&mut |e| match e {
            Expr::Extracted(ex) => {
                found.push(ex.as_ref());
                false
            }
            Expr::Subquery(_) | Expr::Exists(_) => false,
            _ => true,
        });
        found
    }

    pub fn contains_subquery(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Subquery(_) | Expr::Exists(_) | Expr::Extracted(_)) {
                found = true;
            }
            !found
        });
        found
    }

    /// Column references of this scope.
    pub fn columns(&self) -> Vec<&ColName> {
        let mut cols = Vec::new();
        self.visit(&mut |e| match e {
            Expr::Column(c) => {
                cols.push(c);
                false
            }
            Expr::Subquery(_) | Expr::Exists(_) | Expr::Extracted(_) => false,
            _ => true,
        });
        cols
    }

    /// Remove keyspace qualifiers from column references.
    pub fn strip_keyspace_qualifiers(&mut self) {
        self.visit_mut(&mut |e| {
            if let Expr::Column(col) = e {
                if let Some(q) = &mut col.qualifier {
                    if !q.is_system_schema() {
                        q.qualifier = None;
                    }
                }
                return false;
            }
            true
        });
    }
}

/// Split a predicate into its top-level conjuncts.
pub fn split_and(expr: Expr) -> Vec<Expr> {
    let mut result = Vec::new();
    let mut stack = vec![expr];
    while let Some(e) = stack.pop() {
        match e {
            Expr::And(left, right) => {
                stack.push(*right);
                stack.push(*left);
            }
            other => result.push(other),
        }
    }
    result
}

/// Join predicates with AND, or None for an empty list.
pub fn and_exprs(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::and)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_preserves_order() {
        let e = Expr::and(
            Expr::and(Expr::eq(Expr::col("a"), Expr::int(1)), Expr::col("b")),
            Expr::col("c"),
        );
        let parts = split_and(e);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], Expr::col("b"));
        assert_eq!(parts[2], Expr::col("c"));
        assert_eq!(and_exprs(parts.clone()).map(split_and), Some(parts));
    }

    #[test]
    fn test_contains_aggregate_skips_subqueries() {
        let count = Expr::Func(FuncExpr {
            name: "count".into(),
            args: vec![],
            distinct: false,
            star: true,
        });
        assert!(count.contains_aggregate());

        let mut inner = Select::default();
        inner.select_exprs.push(crate::select::SelectExpr::expr(count));
        let sub = Expr::Subquery(Box::new(inner));
        assert!(!sub.contains_aggregate());
        assert!(sub.contains_subquery());
    }

    #[test]
    fn test_compliant_name() {
        assert_eq!(ColName::qualified("u", "id").compliant_name(), "u_id");
        assert_eq!(ColName::new("name").compliant_name(), "name");
    }

    #[test]
    fn test_extracted_rewrite_forms() {
        let ex = ExtractedSubquery {
            kind: SubqueryKind::NotIn,
            subquery: Select::default(),
            other_side: Some(Expr::col("id")),
            original: Expr::col("placeholder"),
            arg_name: "__sq1".into(),
            has_values_name: "__sq_has_values1".into(),
            merged: false,
        };
        match ex.rewritten() {
            Expr::Or(l, r) => {
                assert_eq!(
                    *l,
                    Expr::eq(Expr::Argument("__sq_has_values1".into()), Expr::int(0))
                );
                assert!(matches!(*r, Expr::Comparison { op: ComparisonOp::NotIn, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
