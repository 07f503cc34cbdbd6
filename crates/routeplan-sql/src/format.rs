//! SQL text rendering. Output is lowercase-keyword MySQL that shards accept.

use std::fmt::{self, Display, Formatter, Write};

use crate::expr::{ColName, Expr, ExtractedSubquery, FuncExpr, Literal, TableName};
use crate::select::{
    AliasedExpr, AliasedTableExpr, JoinKind, JoinTableExpr, Limit, OrderBy, Select, SelectExpr,
    SimpleTableExpr, TableExpr,
};

const KEYWORDS: [&str; 22] = [
    "select", "from", "where", "group", "order", "by", "limit", "having", "join", "left",
    "right", "on", "and", "or", "not", "in", "is", "null", "as", "table", "key", "index",
];

/// Write an identifier, backquoted when it is not a plain word.
pub fn write_ident(f: &mut impl Write, ident: &str) -> fmt::Result {
    let plain = ident
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(ident));
    if plain {
        f.write_str(ident)
    } else {
        write!(f, "`{}`", ident.replace('`', "``"))
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(q) = &self.qualifier {
            write_ident(f, q)?;
            f.write_char('.')?;
        }
        write_ident(f, &self.name)
    }
}

impl Display for ColName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(q) = &self.qualifier {
            write!(f, "{}.", q)?;
        }
        write_ident(f, &self.name)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(true) => f.write_str("true"),
            Literal::Bool(false) => f.write_str("false"),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Decimal(s) => f.write_str(s),
            Literal::Str(s) => {
                f.write_char('\'')?;
                for c in s.chars() {
                    match c {
                        '\'' => f.write_str("\\'")?,
                        '\\' => f.write_str("\\\\")?,
                        c => f.write_char(c)?,
                    }
                }
                f.write_char('\'')
            }
        }
    }
}

impl Expr {
    /// Binding strength used to decide where parentheses are needed.
    fn precedence(&self) -> u8 {
        match self {
            Expr::Or(..) => 1,
            Expr::And(..) => 2,
            Expr::Not(_) => 3,
            Expr::Comparison { .. } | Expr::IsNull { .. } | Expr::Between { .. } => 4,
            Expr::Arithmetic { op, .. } => match op {
                crate::expr::ArithmeticOp::Plus | crate::expr::ArithmeticOp::Minus => 5,
                _ => 6,
            },
            Expr::Neg(_) => 7,
            Expr::Extracted(ex) => ex.effective().precedence(),
            _ => 10,
        }
    }
}

/// Child rendered inside a parent of precedence `parent`.
fn write_operand(f: &mut Formatter<'_>, child: &Expr, parent: u8) -> fmt::Result {
    if child.precedence() < parent {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

/// Right operands of left-associative operators need parentheses at equal
/// precedence too.
fn write_right_operand(f: &mut Formatter<'_>, child: &Expr, parent: u8) -> fmt::Result {
    if child.precedence() <= parent && parent >= 4 {
        write!(f, "({})", child)
    } else {
        write_operand(f, child, parent)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let prec = self.precedence();
        match self {
            Expr::Column(col) => write!(f, "{}", col),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Argument(name) => write!(f, ":{}", name),
            Expr::ListArgument(name) => write!(f, "::{}", name),
            Expr::Comparison { op, left, right } => {
                write_operand(f, left, prec + 1)?;
                write!(f, " {} ", op.as_str())?;
                write_operand(f, right, prec + 1)
            }
            Expr::And(l, r) => {
                write_operand(f, l, prec)?;
                f.write_str(" and ")?;
                write_operand(f, r, prec)
            }
            Expr::Or(l, r) => {
                write_operand(f, l, prec)?;
                f.write_str(" or ")?;
                write_operand(f, r, prec)
            }
            Expr::Not(e) => {
                f.write_str("not ")?;
                write_operand(f, e, prec + 1)
            }
            Expr::Arithmetic { op, left, right } => {
                write_operand(f, left, prec)?;
                write!(f, " {} ", op.as_str())?;
                write_right_operand(f, right, prec)
            }
            Expr::Neg(e) => {
                f.write_char('-')?;
                write_operand(f, e, prec)
            }
            Expr::IsNull { expr, negated } => {
                write_operand(f, expr, prec + 1)?;
                f.write_str(if *negated { " is not null" } else { " is null" })
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                write_operand(f, expr, prec + 1)?;
                f.write_str(if *negated { " not between " } else { " between " })?;
                write_operand(f, low, prec + 1)?;
                f.write_str(" and ")?;
                write_operand(f, high, prec + 1)
            }
            Expr::Tuple(items) => {
                f.write_char('(')?;
                write_list(f, items)?;
                f.write_char(')')
            }
            Expr::Func(func) => write!(f, "{}", func),
            Expr::Subquery(sel) => write!(f, "({})", sel),
            Expr::Exists(sel) => write!(f, "exists ({})", sel),
            Expr::Extracted(ex) => write!(f, "{}", ex),
        }
    }
}

impl Display for ExtractedSubquery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.effective())
    }
}

impl Display for FuncExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        if self.distinct {
            f.write_str("distinct ")?;
        }
        if self.star {
            f.write_char('*')?;
        } else {
            write_list(f, &self.args)?;
        }
        f.write_char(')')
    }
}

fn write_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl Display for SelectExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SelectExpr::Star(None) => f.write_char('*'),
            SelectExpr::Star(Some(table)) => write!(f, "{}.*", table),
            SelectExpr::Aliased(a) => write!(f, "{}", a),
        }
    }
}

impl Display for AliasedExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            f.write_str(" as ")?;
            write_ident(f, alias)?;
        }
        Ok(())
    }
}

impl Display for OrderBy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, if self.desc { "desc" } else { "asc" })
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("limit ")?;
        if let Some(offset) = &self.offset {
            write!(f, "{}, ", offset)?;
        }
        write!(f, "{}", self.rowcount)
    }
}

impl Display for AliasedTableExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.expr {
            SimpleTableExpr::Table(name) => write!(f, "{}", name)?,
            SimpleTableExpr::Derived(sel) => write!(f, "({})", sel)?,
        }
        if let Some(alias) = &self.alias {
            f.write_str(" as ")?;
            write_ident(f, alias)?;
        }
        Ok(())
    }
}

impl Display for JoinTableExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let keyword = match self.kind {
            JoinKind::Inner => "join",
            JoinKind::Left => "left join",
            JoinKind::Right => "right join",
        };
        write!(f, "{} {} ", self.left, keyword)?;
        // a join nested on the right binds differently without parentheses
        match &self.right {
            TableExpr::Join(_) => write!(f, "({})", self.right)?,
            other => write!(f, "{}", other)?,
        }
        if let Some(on) = &self.on {
            write!(f, " on {}", on)?;
        }
        Ok(())
    }
}

impl Display for TableExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TableExpr::Aliased(a) => write!(f, "{}", a),
            TableExpr::Join(j) => write!(f, "{}", j),
            TableExpr::Paren(list) => {
                f.write_char('(')?;
                write_list(f, list)?;
                f.write_char(')')
            }
        }
    }
}

impl Display for Select {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("select ")?;
        if self.distinct {
            f.write_str("distinct ")?;
        }
        write_list(f, &self.select_exprs)?;
        if !self.from.is_empty() {
            f.write_str(" from ")?;
            write_list(f, &self.from)?;
        }
        if let Some(w) = &self.where_clause {
            write!(f, " where {}", w)?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" group by ")?;
            write_list(f, &self.group_by)?;
        }
        if let Some(h) = &self.having {
            write!(f, " having {}", h)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" order by ")?;
            write_list(f, &self.order_by)?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " {}", limit)?;
        }
        Ok(())
    }
}
