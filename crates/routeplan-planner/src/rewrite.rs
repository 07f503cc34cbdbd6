//! Subquery extraction
//!
//! Before planning, every subquery in a WHERE clause or select list is
//! replaced by an [`ExtractedSubquery`] node that names the bind variables
//! its result will travel in: `__sqN` for the value or list and
//! `__sq_has_valuesN` for the emptiness flag.

use std::collections::HashSet;

use routeplan_common::{Result, RouteplanError};
use routeplan_sql::{
    and_exprs, split_and, ComparisonOp, Expr, ExtractedSubquery, Literal, Select, SelectExpr,
    SimpleTableExpr, SubqueryKind, TableExpr,
};

struct SubqueryExtractor<'a> {
    reserved: &'a HashSet<String>,
    next: usize,
}

/// Extract every subquery of `sel`, nested ones included. Outer subqueries
/// are numbered before the subqueries they contain.
pub fn extract_subqueries(sel: &mut Select, reserved: &HashSet<String>) -> Result<()> {
    let mut extractor = SubqueryExtractor { reserved, next: 0 };
    extractor.rewrite_select(sel)
}

impl SubqueryExtractor<'_> {
    fn next_names(&mut self) -> (String, String) {
        loop {
            self.next += 1;
            let arg = format!("__sq{}", self.next);
            let has_values = format!("__sq_has_values{}", self.next);
            if !self.reserved.contains(&arg) && !self.reserved.contains(&has_values) {
                return (arg, has_values);
            }
        }
    }

    fn rewrite_select(&mut self, sel: &mut Select) -> Result<()> {
        for te in sel.from.iter_mut() {
            self.rewrite_table_expr(te)?;
        }
        for se in sel.select_exprs.iter_mut() {
            if let SelectExpr::Aliased(ae) = se {
                self.rewrite_expr(&mut ae.expr)?;
            }
        }
        if let Some(where_clause) = &mut sel.where_clause {
            self.rewrite_expr(where_clause)?;
        }
        if sel.group_by.iter().any(Expr::contains_subquery) {
            return Err(RouteplanError::unsupported("subquery in GROUP BY"));
        }
        if sel.order_by.iter().any(|o| o.expr.contains_subquery()) {
            return Err(RouteplanError::unsupported("subquery in ORDER BY"));
        }
        Ok(())
    }

    fn rewrite_table_expr(&mut self, te: &mut TableExpr) -> Result<()> {
        match te {
            TableExpr::Aliased(aliased) => match &mut aliased.expr {
                SimpleTableExpr::Derived(inner) => self.rewrite_select(inner),
                SimpleTableExpr::Table(_) => Ok(()),
            },
            TableExpr::Join(join) => {
                if join.on.as_ref().map(Expr::contains_subquery).unwrap_or(false) {
                    return Err(RouteplanError::unsupported("subquery in a JOIN condition"));
                }
                self.rewrite_table_expr(&mut join.left)?;
                self.rewrite_table_expr(&mut join.right)
            }
            TableExpr::Paren(list) => {
                for inner in list.iter_mut() {
                    self.rewrite_table_expr(inner)?;
                }
                Ok(())
            }
        }
    }

    fn rewrite_expr(&mut self, e: &mut Expr) -> Result<()> {
        let kind = match e {
            Expr::Comparison {
                op: ComparisonOp::In,
                right,
                ..
            } if matches!(right.as_ref(), Expr::Subquery(_)) => Some(SubqueryKind::In),
            Expr::Comparison {
                op: ComparisonOp::NotIn,
                right,
                ..
            } if matches!(right.as_ref(), Expr::Subquery(_)) => Some(SubqueryKind::NotIn),
            Expr::Exists(_) => Some(SubqueryKind::Exists),
            Expr::Subquery(_) => Some(SubqueryKind::Value),
            _ => None,
        };
        let Some(kind) = kind else {
            for child in e.children_mut() {
                self.rewrite_expr(child)?;
            }
            return Ok(());
        };

        let original = e.clone();
        let (other_side, subquery) = match std::mem::replace(e, Expr::Literal(Literal::Null)) {
            Expr::Comparison { left, right, .. } => match *right {
                Expr::Subquery(sel) => (Some(*left), *sel),
                _ => return Err(RouteplanError::internal("IN without a subquery operand")),
            },
            Expr::Exists(sel) | Expr::Subquery(sel) => (None, *sel),
            _ => return Err(RouteplanError::internal("subquery node changed while extracting")),
        };

        let (arg_name, has_values_name) = self.next_names();
        let mut subquery = subquery;
        self.rewrite_select(&mut subquery)?;
        let mut other_side = other_side;
        if let Some(other) = &mut other_side {
            self.rewrite_expr(other)?;
        }
        *e = Expr::Extracted(Box::new(ExtractedSubquery {
            kind,
            subquery,
            other_side,
            original,
            arg_name,
            has_values_name,
            merged: false,
        }));
        Ok(())
    }
}

// ============================================================================
// Common predicates
// ============================================================================

fn split_or(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Or(l, r) => {
            let mut out = split_or(*l);
            out.extend(split_or(*r));
            out
        }
        other => vec![other],
    }
}

/// Rewrite `(A and B) or (A and C)` to `A and (B or C)` so the shared
/// conjunct can be used for routing.
pub fn extract_common_predicates(expr: Expr) -> Expr {
    match expr {
        Expr::And(l, r) => Expr::and(extract_common_predicates(*l), extract_common_predicates(*r)),
        or @ Expr::Or(..) => {
            let branches: Vec<Vec<Expr>> = split_or(or)
                .into_iter()
                .map(|b| split_and(extract_common_predicates(b)))
                .collect();
            let Some((first, rest)) = branches.split_first() else {
                return Expr::Literal(Literal::Bool(false));
            };
            let mut common: Vec<Expr> = Vec::new();
            for pred in first {
                if rest.iter().all(|b| b.contains(pred)) && !common.contains(pred) {
                    common.push(pred.clone());
                }
            }
            let remaining: Vec<Option<Expr>> = branches
                .iter()
                .map(|b| and_exprs(b.iter().filter(|p| !common.contains(p)).cloned()))
                .collect();
            let disjunction = if remaining.iter().any(Option::is_none) {
                // one branch is exactly the common part, which implies the others
                None
            } else {
                remaining.into_iter().flatten().reduce(Expr::or)
            };
            and_exprs(common.into_iter().chain(disjunction))
                .unwrap_or(Expr::Literal(Literal::Bool(true)))
        }
        other => other,
    }
}

/// The select with common predicates pulled out of its WHERE clause, or
/// None when that changes nothing.
pub fn rewrite_common_predicates(sel: &Select) -> Option<Select> {
    let where_clause = sel.where_clause.as_ref()?;
    let rewritten = extract_common_predicates(where_clause.clone());
    if rewritten == *where_clause {
        return None;
    }
    let mut out = sel.clone();
    out.where_clause = Some(rewritten);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeplan_sql::SqlParser;

    fn extract(sql: &str) -> Select {
        let mut sel = SqlParser::parse_select(sql).unwrap();
        extract_subqueries(&mut sel, &HashSet::new()).unwrap();
        sel
    }

    #[test]
    fn test_in_subquery_is_extracted() {
        let sel = extract("select id from user where id in (select user_id from music)");
        let where_clause = sel.where_clause.unwrap();
        let Expr::Extracted(ex) = &where_clause else {
            panic!("expected an extracted subquery, got {}", where_clause);
        };
        assert_eq!(ex.kind, SubqueryKind::In);
        assert_eq!(ex.arg_name, "__sq1");
        assert_eq!(ex.has_values_name, "__sq_has_values1");
        assert_eq!(
            where_clause.to_string(),
            ":__sq_has_values1 = 1 and id in ::__sq1"
        );
        assert_eq!(ex.original.to_string(), "id in (select user_id from music)");
    }

    #[test]
    fn test_outer_subquery_numbered_first() {
        let sel = extract(
            "select id from user where id = (select max(user_id) from music \
             where id in (select id from music_extra))",
        );
        let Some(Expr::Comparison { right, .. }) = &sel.where_clause else {
            panic!("expected a comparison");
        };
        let Expr::Extracted(outer) = right.as_ref() else {
            panic!("expected an extracted subquery");
        };
        assert_eq!(outer.kind, SubqueryKind::Value);
        assert_eq!(outer.arg_name, "__sq1");
        let inner = outer.subquery.where_clause.as_ref().unwrap();
        let Expr::Extracted(inner) = inner else {
            panic!("expected a nested extracted subquery");
        };
        assert_eq!(inner.arg_name, "__sq2");
    }

    #[test]
    fn test_reserved_names_are_skipped() {
        let mut reserved = HashSet::new();
        reserved.insert("__sq1".to_string());
        let mut sel =
            SqlParser::parse_select("select 1 from user where exists (select 1 from music)")
                .unwrap();
        extract_subqueries(&mut sel, &reserved).unwrap();
        assert_eq!(sel.where_clause.unwrap().to_string(), ":__sq_has_values2");
    }

    #[test]
    fn test_subquery_in_order_by_is_unsupported() {
        let mut sel =
            SqlParser::parse_select("select id from user order by (select 1 from dual)").unwrap();
        let err = extract_subqueries(&mut sel, &HashSet::new()).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_common_predicates_are_pulled_out_of_or() {
        let sel = SqlParser::parse_select(
            "select id from user where (id = 1 and name = 'a') or (id = 1 and name = 'b')",
        )
        .unwrap();
        let rewritten = rewrite_common_predicates(&sel).unwrap();
        assert_eq!(
            rewritten.where_clause.unwrap().to_string(),
            "id = 1 and (name = 'a' or name = 'b')"
        );
    }

    #[test]
    fn test_or_without_common_part_is_unchanged() {
        let sel =
            SqlParser::parse_select("select id from user where id = 1 or name = 'b'").unwrap();
        assert!(rewrite_common_predicates(&sel).is_none());
        let implied = extract_common_predicates(Expr::or(
            Expr::col("a"),
            Expr::and(Expr::col("a"), Expr::col("b")),
        ));
        assert_eq!(implied, Expr::col("a"));
    }
}
