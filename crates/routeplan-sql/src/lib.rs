//! Routeplan SQL - SELECT AST, parsing, rendering and semantic analysis

pub mod directives;
pub mod expr;
pub mod format;
pub mod parser;
pub mod select;
pub mod semantics;
pub mod table_set;

pub use directives::Directives;
pub use expr::{
    and_exprs, split_and, ArithmeticOp, ColName, ComparisonOp, Expr, ExtractedSubquery,
    FuncExpr, Literal, SubqueryKind, TableName,
};
pub use parser::SqlParser;
pub use select::{
    AliasedExpr, AliasedTableExpr, JoinKind, JoinTableExpr, Limit, OrderBy, Select, SelectExpr,
    SimpleTableExpr, TableExpr,
};
pub use semantics::{analyze, SemTable, TableInfo, TableKind};
pub use table_set::TableSet;
