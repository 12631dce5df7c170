//! Expression module: bound expression trees and the select pipeline.
//!
//! An `ExpressionTree` is what the binder produces for one statement. Column
//! references are resolved to column indexes of the tree's table, so a tree
//! may only be evaluated against rows of that table.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::eval::Evaluator;
use crate::functions::FunctionType;
use crate::table::{names_match, DataRow, DataTable};
use crate::types::Value;
use crate::{FilterExpressionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Plus,
    Minus,
    Not,
    BitwiseNot,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
            UnaryOperator::Not => "NOT ",
            UnaryOperator::BitwiseNot => "~",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorType {
    Multiply,
    Divide,
    Modulus,
    Add,
    Subtract,
    BitShiftLeft,
    BitShiftRight,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    EqualExactMatch,
    NotEqual,
    NotEqualExactMatch,
    Like,
    LikeExactMatch,
    NotLike,
    NotLikeExactMatch,
    And,
    Or,
}

impl OperatorType {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OperatorType::LessThan
                | OperatorType::LessThanOrEqual
                | OperatorType::GreaterThan
                | OperatorType::GreaterThanOrEqual
                | OperatorType::Equal
                | OperatorType::EqualExactMatch
                | OperatorType::NotEqual
                | OperatorType::NotEqualExactMatch
        )
    }

    pub fn is_like(self) -> bool {
        matches!(
            self,
            OperatorType::Like
                | OperatorType::LikeExactMatch
                | OperatorType::NotLike
                | OperatorType::NotLikeExactMatch
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            OperatorType::BitShiftLeft
                | OperatorType::BitShiftRight
                | OperatorType::BitwiseAnd
                | OperatorType::BitwiseOr
                | OperatorType::BitwiseXor
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, OperatorType::And | OperatorType::Or)
    }
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatorType::Multiply => "*",
            OperatorType::Divide => "/",
            OperatorType::Modulus => "%",
            OperatorType::Add => "+",
            OperatorType::Subtract => "-",
            OperatorType::BitShiftLeft => "<<",
            OperatorType::BitShiftRight => ">>",
            OperatorType::BitwiseAnd => "&",
            OperatorType::BitwiseOr => "|",
            OperatorType::BitwiseXor => "^",
            OperatorType::LessThan => "<",
            OperatorType::LessThanOrEqual => "<=",
            OperatorType::GreaterThan => ">",
            OperatorType::GreaterThanOrEqual => ">=",
            OperatorType::Equal => "=",
            OperatorType::EqualExactMatch => "===",
            OperatorType::NotEqual => "<>",
            OperatorType::NotEqualExactMatch => "!==",
            OperatorType::Like => "LIKE",
            OperatorType::LikeExactMatch => "LIKE BINARY",
            OperatorType::NotLike => "NOT LIKE",
            OperatorType::NotLikeExactMatch => "NOT LIKE BINARY",
            OperatorType::And => "AND",
            OperatorType::Or => "OR",
        })
    }
}

/// A column resolved against the tree's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub name: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Value(Value),
    Column(ColumnReference),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Operator {
        op: OperatorType,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Function {
        function: FunctionType,
        arguments: Vec<Expression>,
    },
    InList {
        operand: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
        exact_match: bool,
    },
    IsNull {
        operand: Box<Expression>,
        negated: bool,
    },
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Value(Value::Undefined) => f.write_str("NULL"),
            Expression::Value(Value::String(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expression::Value(value @ Value::DateTime(_)) => write!(f, "#{}#", value),
            Expression::Value(value) => write!(f, "{}", value),
            Expression::Column(column) => write!(f, "[{}]", column.name),
            Expression::Unary { op, operand } => write!(f, "{}{}", op, operand),
            Expression::Operator { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expression::Function {
                function,
                arguments,
            } => {
                write!(f, "{}(", function.name())?;
                write_list(f, arguments)?;
                f.write_str(")")
            }
            Expression::InList {
                operand,
                list,
                negated,
                exact_match,
            } => {
                write!(f, "{} ", operand)?;
                if *negated {
                    f.write_str("NOT ")?;
                }
                f.write_str("IN ")?;
                if *exact_match {
                    f.write_str("BINARY ")?;
                }
                f.write_str("(")?;
                write_list(f, list)?;
                f.write_str(")")
            }
            Expression::IsNull { operand, negated } => {
                write!(f, "{} IS {}NULL", operand, if *negated { "NOT " } else { "" })
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByTerm {
    pub column: ColumnReference,
    pub ascending: bool,
    pub exact_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionTree {
    pub table_name: String,
    /// Maximum number of rows to select; negative means unlimited.
    pub top_limit: i32,
    pub order_by_terms: Vec<OrderByTerm>,
    pub root: Option<Expression>,
}

impl ExpressionTree {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            top_limit: -1,
            order_by_terms: Vec::new(),
            root: None,
        }
    }

    /// Evaluates the tree against one row. A tree without a root evaluates
    /// to Undefined.
    pub fn evaluate(&self, row: DataRow<'_>) -> Result<Value> {
        match &self.root {
            Some(root) => Evaluator::new(row).evaluate(root),
            None => Ok(Value::Undefined),
        }
    }

    /// Selects the rows of `table` for which the tree evaluates to Boolean
    /// true, sorted by the ORDER BY terms and limited by TOP.
    ///
    /// Rows evaluating to false, Undefined or a non-Boolean value are
    /// excluded, as are rows whose evaluation fails.
    pub fn select<'t>(&self, table: &'t DataTable) -> Result<Vec<DataRow<'t>>> {
        if !names_match(table.name(), &self.table_name) {
            return Err(FilterExpressionError::InvalidOperation(format!(
                "expression tree is bound to table \"{}\", cannot select from \"{}\"",
                self.table_name,
                table.name()
            )));
        }

        let limit = usize::try_from(self.top_limit).ok();
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        let stop_early = self.order_by_terms.is_empty();

        let mut matched = Vec::new();
        for row in table.rows() {
            match self.evaluate(row) {
                Ok(Value::Boolean(true)) => {
                    matched.push(row);
                    if stop_early && limit == Some(matched.len()) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    trace!(table = %table.name(), row = row.index(), %error, "row excluded");
                }
            }
        }

        if !self.order_by_terms.is_empty() {
            matched.sort_by(|a, b| self.compare_rows(*a, *b));
        }
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn compare_rows(&self, a: DataRow<'_>, b: DataRow<'_>) -> Ordering {
        for term in &self.order_by_terms {
            let ordering = compare_sort_keys(
                a.value(term.column.index),
                b.value(term.column.index),
                term.exact_match,
            );
            let ordering = if term.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Undefined sorts before every value and NaN right after Undefined, so the
/// ordering stays total.
fn compare_sort_keys(a: &Value, b: &Value, exact_match: bool) -> Ordering {
    match sort_rank(a).cmp(&sort_rank(b)) {
        Ordering::Equal if sort_rank(a) == 2 => match a.compare(b, exact_match) {
            Ok(Some(ordering)) => ordering,
            _ => (a.value_type() as u8).cmp(&(b.value_type() as u8)),
        },
        ordering => ordering,
    }
}

fn sort_rank(value: &Value) -> u8 {
    match value {
        Value::Undefined => 0,
        Value::Double(d) if d.is_nan() => 1,
        _ => 2,
    }
}
