//! SQL Parser wrapper

use routeplan_common::{Result, RouteplanError};
use sqlparser::ast as sql;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::expr::{ArithmeticOp, ColName, ComparisonOp, Expr, FuncExpr, Literal, TableName};
use crate::select::{
    AliasedExpr, AliasedTableExpr, JoinKind, JoinTableExpr, Limit, OrderBy, Select, SelectExpr,
    SimpleTableExpr, TableExpr,
};
use crate::table_set::TableSet;

/// SQL Parser wrapper
pub struct SqlParser;

impl SqlParser {
    /// Parse SQL into sqlparser statements
    pub fn parse(sql: &str) -> Result<Vec<sql::Statement>> {
        let dialect = MySqlDialect {};
        Parser::parse_sql(&dialect, sql).map_err(|e| RouteplanError::SqlParse(e.to_string()))
    }

    /// Parse a single SQL statement
    pub fn parse_statement(sql: &str) -> Result<sql::Statement> {
        let mut statements = Self::parse(sql)?;
        match statements.len() {
            0 => Err(RouteplanError::SqlParse("Empty SQL".to_string())),
            1 => Ok(statements.remove(0)),
            n => Err(RouteplanError::SqlParse(format!(
                "expected one statement, found {}",
                n
            ))),
        }
    }

    /// Parse a SELECT into the planner AST
    pub fn parse_select(sql: &str) -> Result<Select> {
        match Self::parse_statement(sql)? {
            sql::Statement::Query(query) => Converter::default().query(&query),
            _ => Err(RouteplanError::unsupported(
                "only SELECT statements are planned",
            )),
        }
    }
}

/// Converts sqlparser's AST. Positional `?` placeholders become `:v1`, `:v2`...
#[derive(Default)]
struct Converter {
    positional: usize,
}

impl Converter {
    fn query(&mut self, query: &sql::Query) -> Result<Select> {
        if query.with.is_some() {
            return Err(RouteplanError::unsupported("WITH clause"));
        }
        let mut select = match query.body.as_ref() {
            sql::SetExpr::Select(s) => self.select(s)?,
            sql::SetExpr::Query(q) => self.query(q)?,
            sql::SetExpr::SetOperation { .. } => {
                return Err(RouteplanError::unsupported("UNION"));
            }
            _ => return Err(RouteplanError::unsupported("query body")),
        };

        if let Some(order_by) = &query.order_by {
            for o in &order_by.exprs {
                select.order_by.push(OrderBy {
                    expr: self.expr(&o.expr)?,
                    desc: o.asc == Some(false),
                });
            }
        }

        if let Some(limit) = &query.limit {
            let offset = match &query.offset {
                Some(o) => Some(self.expr(&o.value)?),
                None => None,
            };
            select.limit = Some(Limit {
                offset,
                rowcount: self.expr(limit)?,
            });
        } else if query.offset.is_some() {
            return Err(RouteplanError::unsupported("OFFSET without LIMIT"));
        }
        Ok(select)
    }

    fn select(&mut self, s: &sql::Select) -> Result<Select> {
        let distinct = match &s.distinct {
            None => false,
            Some(sql::Distinct::Distinct) => true,
            Some(sql::Distinct::On(_)) => {
                return Err(RouteplanError::unsupported("DISTINCT ON"));
            }
        };

        let mut select_exprs = Vec::with_capacity(s.projection.len());
        for item in &s.projection {
            select_exprs.push(match item {
                sql::SelectItem::UnnamedExpr(e) => SelectExpr::Aliased(AliasedExpr {
                    expr: self.expr(e)?,
                    alias: None,
                }),
                sql::SelectItem::ExprWithAlias { expr, alias } => {
                    SelectExpr::Aliased(AliasedExpr {
                        expr: self.expr(expr)?,
                        alias: Some(alias.value.clone()),
                    })
                }
                sql::SelectItem::Wildcard(_) => SelectExpr::Star(None),
                sql::SelectItem::QualifiedWildcard(name, _) => {
                    SelectExpr::Star(Some(object_name(name)?))
                }
            });
        }

        let mut from = Vec::with_capacity(s.from.len());
        for twj in &s.from {
            from.push(self.table_with_joins(twj)?);
        }

        let where_clause = s.selection.as_ref().map(|e| self.expr(e)).transpose()?;

        let group_by = match &s.group_by {
            sql::GroupByExpr::Expressions(exprs, _) => exprs
                .iter()
                .map(|e| self.expr(e))
                .collect::<Result<Vec<_>>>()?,
            sql::GroupByExpr::All(_) => {
                return Err(RouteplanError::unsupported("GROUP BY ALL"));
            }
        };

        let having = s.having.as_ref().map(|e| self.expr(e)).transpose()?;

        Ok(Select {
            distinct,
            select_exprs,
            from,
            where_clause,
            group_by,
            having,
            order_by: vec![],
            limit: None,
        })
    }

    fn table_with_joins(&mut self, twj: &sql::TableWithJoins) -> Result<TableExpr> {
        let mut acc = self.table_factor(&twj.relation)?;
        for join in &twj.joins {
            let right = self.table_factor(&join.relation)?;
            let (kind, constraint) = match &join.join_operator {
                sql::JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
                sql::JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
                sql::JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
                sql::JoinOperator::CrossJoin => (JoinKind::Inner, None),
                other => {
                    return Err(RouteplanError::unsupported(format!(
                        "join type {:?}",
                        other
                    )));
                }
            };
            let on = match constraint {
                Some(sql::JoinConstraint::On(e)) => Some(self.expr(e)?),
                Some(sql::JoinConstraint::None) | None => None,
                Some(sql::JoinConstraint::Using(_)) => {
                    return Err(RouteplanError::unsupported("JOIN ... USING"));
                }
                Some(sql::JoinConstraint::Natural) => {
                    return Err(RouteplanError::unsupported("NATURAL JOIN"));
                }
            };
            acc = TableExpr::Join(Box::new(JoinTableExpr {
                left: acc,
                right,
                kind,
                on,
            }));
        }
        Ok(acc)
    }

    fn table_factor(&mut self, relation: &sql::TableFactor) -> Result<TableExpr> {
        match relation {
            sql::TableFactor::Table { name, alias, .. } => {
                Ok(TableExpr::Aliased(AliasedTableExpr {
                    expr: SimpleTableExpr::Table(object_name(name)?),
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                    id: TableSet::EMPTY,
                }))
            }
            sql::TableFactor::Derived {
                lateral,
                subquery,
                alias,
                ..
            } => {
                if *lateral {
                    return Err(RouteplanError::unsupported("LATERAL derived table"));
                }
                let alias = alias.as_ref().ok_or_else(|| {
                    RouteplanError::SqlParse(
                        "every derived table must have its own alias".to_string(),
                    )
                })?;
                if !alias.columns.is_empty() {
                    return Err(RouteplanError::unsupported("derived table column list"));
                }
                Ok(TableExpr::Aliased(AliasedTableExpr {
                    expr: SimpleTableExpr::Derived(Box::new(self.query(subquery)?)),
                    alias: Some(alias.name.value.clone()),
                    id: TableSet::EMPTY,
                }))
            }
            sql::TableFactor::NestedJoin {
                table_with_joins,
                alias,
                ..
            } => {
                if alias.is_some() {
                    return Err(RouteplanError::unsupported("aliased parenthesized join"));
                }
                Ok(TableExpr::Paren(vec![self.table_with_joins(table_with_joins)?]))
            }
            _ => Err(RouteplanError::unsupported("table factor")),
        }
    }

    fn expr(&mut self, expr: &sql::Expr) -> Result<Expr> {
        match expr {
            sql::Expr::Identifier(id) => Ok(Expr::Column(ColName::new(&id.value))),
            sql::Expr::CompoundIdentifier(ids) => match ids.as_slice() {
                [table, col] => Ok(Expr::Column(ColName::qualified(&table.value, &col.value))),
                [ks, table, col] => Ok(Expr::Column(ColName {
                    qualifier: Some(TableName::qualified(&ks.value, &table.value)),
                    name: col.value.clone(),
                    deps: TableSet::EMPTY,
                })),
                _ => Err(RouteplanError::unsupported(format!("column reference {}", expr))),
            },
            sql::Expr::Value(v) => self.value(v),
            sql::Expr::BinaryOp { left, op, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                if let Some(cmp) = comparison_op(op) {
                    return Ok(Expr::cmp(cmp, l, r));
                }
                if let Some(arith) = arithmetic_op(op) {
                    return Ok(Expr::Arithmetic {
                        op: arith,
                        left: Box::new(l),
                        right: Box::new(r),
                    });
                }
                match op {
                    sql::BinaryOperator::And => Ok(Expr::and(l, r)),
                    sql::BinaryOperator::Or => Ok(Expr::or(l, r)),
                    other => Err(RouteplanError::unsupported(format!("operator {}", other))),
                }
            }
            sql::Expr::UnaryOp { op, expr: inner } => {
                let e = self.expr(inner)?;
                match op {
                    sql::UnaryOperator::Not => Ok(Expr::Not(Box::new(e))),
                    sql::UnaryOperator::Plus => Ok(e),
                    sql::UnaryOperator::Minus => Ok(match e {
                        Expr::Literal(Literal::Int(v)) => Expr::Literal(Literal::Int(-v)),
                        Expr::Literal(Literal::Decimal(s)) => {
                            Expr::Literal(Literal::Decimal(format!("-{}", s)))
                        }
                        other => Expr::Neg(Box::new(other)),
                    }),
                    other => Err(RouteplanError::unsupported(format!("operator {}", other))),
                }
            }
            sql::Expr::Nested(inner) => self.expr(inner),
            sql::Expr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.expr(inner)?),
                negated: false,
            }),
            sql::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.expr(inner)?),
                negated: true,
            }),
            sql::Expr::InList {
                expr: left,
                list,
                negated,
            } => {
                let items = list.iter().map(|e| self.expr(e)).collect::<Result<Vec<_>>>()?;
                let op = if *negated { ComparisonOp::NotIn } else { ComparisonOp::In };
                Ok(Expr::cmp(op, self.expr(left)?, Expr::Tuple(items)))
            }
            sql::Expr::InSubquery {
                expr: left,
                subquery,
                negated,
            } => {
                let op = if *negated { ComparisonOp::NotIn } else { ComparisonOp::In };
                let left = self.expr(left)?;
                let sub = self.query(subquery)?;
                Ok(Expr::cmp(op, left, Expr::Subquery(Box::new(sub))))
            }
            sql::Expr::Exists { subquery, negated } => {
                let exists = Expr::Exists(Box::new(self.query(subquery)?));
                Ok(if *negated { Expr::Not(Box::new(exists)) } else { exists })
            }
            sql::Expr::Subquery(q) => Ok(Expr::Subquery(Box::new(self.query(q)?))),
            sql::Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => Ok(Expr::Between {
                expr: Box::new(self.expr(inner)?),
                low: Box::new(self.expr(low)?),
                high: Box::new(self.expr(high)?),
                negated: *negated,
            }),
            sql::Expr::Like {
                negated,
                expr: inner,
                pattern,
                escape_char,
                ..
            } => {
                if escape_char.is_some() {
                    return Err(RouteplanError::unsupported("LIKE ... ESCAPE"));
                }
                let op = if *negated { ComparisonOp::NotLike } else { ComparisonOp::Like };
                Ok(Expr::cmp(op, self.expr(inner)?, self.expr(pattern)?))
            }
            sql::Expr::Tuple(items) => Ok(Expr::Tuple(
                items.iter().map(|e| self.expr(e)).collect::<Result<Vec<_>>>()?,
            )),
            sql::Expr::Function(f) => self.function(f),
            other => Err(RouteplanError::unsupported(format!("expression {}", other))),
        }
    }

    fn value(&mut self, v: &sql::Value) -> Result<Expr> {
        let lit = match v {
            sql::Value::Number(n, _) => match n.parse::<i64>() {
                Ok(i) => Literal::Int(i),
                Err(_) => Literal::Decimal(n.clone()),
            },
            sql::Value::SingleQuotedString(s) | sql::Value::DoubleQuotedString(s) => {
                Literal::Str(s.clone())
            }
            sql::Value::Boolean(b) => Literal::Bool(*b),
            sql::Value::Null => Literal::Null,
            sql::Value::Placeholder(p) => {
                if p == "?" {
                    self.positional += 1;
                    return Ok(Expr::Argument(format!("v{}", self.positional)));
                }
                let name = p.trim_start_matches([':', '@', '$']);
                return Ok(Expr::Argument(name.to_string()));
            }
            other => return Err(RouteplanError::unsupported(format!("value {}", other))),
        };
        Ok(Expr::Literal(lit))
    }

    fn function(&mut self, f: &sql::Function) -> Result<Expr> {
        if f.over.is_some() {
            return Err(RouteplanError::unsupported("window functions"));
        }
        let name = f.name.to_string().to_lowercase();
        let mut func = FuncExpr {
            name,
            args: vec![],
            distinct: false,
            star: false,
        };
        match &f.args {
            sql::FunctionArguments::None => {}
            sql::FunctionArguments::Subquery(_) => {
                return Err(RouteplanError::unsupported("subquery as function argument"));
            }
            sql::FunctionArguments::List(list) => {
                func.distinct = matches!(
                    list.duplicate_treatment,
                    Some(sql::DuplicateTreatment::Distinct)
                );
                for arg in &list.args {
                    match arg {
                        sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Expr(e)) => {
                            func.args.push(self.expr(e)?)
                        }
                        sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Wildcard) => {
                            func.star = true
                        }
                        other => {
                            return Err(RouteplanError::unsupported(format!(
                                "function argument {}",
                                other
                            )));
                        }
                    }
                }
            }
        }
        Ok(Expr::Func(func))
    }
}

fn comparison_op(op: &sql::BinaryOperator) -> Option<ComparisonOp> {
    Some(match op {
        sql::BinaryOperator::Eq => ComparisonOp::Eq,
        sql::BinaryOperator::NotEq => ComparisonOp::NotEq,
        sql::BinaryOperator::Lt => ComparisonOp::Lt,
        sql::BinaryOperator::LtEq => ComparisonOp::LtEq,
        sql::BinaryOperator::Gt => ComparisonOp::Gt,
        sql::BinaryOperator::GtEq => ComparisonOp::GtEq,
        _ => return None,
    })
}

fn arithmetic_op(op: &sql::BinaryOperator) -> Option<ArithmeticOp> {
    Some(match op {
        sql::BinaryOperator::Plus => ArithmeticOp::Plus,
        sql::BinaryOperator::Minus => ArithmeticOp::Minus,
        sql::BinaryOperator::Multiply => ArithmeticOp::Multiply,
        sql::BinaryOperator::Divide => ArithmeticOp::Divide,
        sql::BinaryOperator::Modulo => ArithmeticOp::Modulo,
        _ => return None,
    })
}

fn object_name(name: &sql::ObjectName) -> Result<TableName> {
    match name.0.as_slice() {
        [table] => Ok(TableName::new(&table.value)),
        [ks, table] => Ok(TableName::qualified(&ks.value, &table.value)),
        _ => Err(RouteplanError::unsupported(format!("table name {}", name))),
    }
}
