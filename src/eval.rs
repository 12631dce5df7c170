//! Eval module: reduces expression trees to values against a data row.

use std::cmp::Ordering;

use bigdecimal::{BigDecimal, Zero};

use crate::expr::{Expression, OperatorType, UnaryOperator};
use crate::functions::evaluate_function;
use crate::table::DataRow;
use crate::types::{Value, ValueType};
use crate::{FilterExpressionError, Result};

/// Evaluates expressions against a single row. Evaluation never mutates the
/// expression or the row.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    row: DataRow<'a>,
}

impl<'a> Evaluator<'a> {
    pub fn new(row: DataRow<'a>) -> Self {
        Self { row }
    }

    pub fn row(&self) -> DataRow<'a> {
        self.row
    }

    pub fn evaluate(&self, expression: &Expression) -> Result<Value> {
        match expression {
            Expression::Value(value) => Ok(value.clone()),
            Expression::Column(column) => Ok(self.row.value(column.index).clone()),
            Expression::Unary { op, operand } => evaluate_unary(*op, self.evaluate(operand)?),
            Expression::Operator { op, left, right } => self.evaluate_operator(*op, left, right),
            Expression::Function {
                function,
                arguments,
            } => evaluate_function(self, *function, arguments),
            Expression::InList {
                operand,
                list,
                negated,
                exact_match,
            } => self.evaluate_in_list(operand, list, *negated, *exact_match),
            Expression::IsNull { operand, negated } => {
                let value = self.evaluate(operand)?;
                Ok(Value::Boolean(value.is_undefined() != *negated))
            }
        }
    }

    fn evaluate_operator(&self, op: OperatorType, left: &Expression, right: &Expression) -> Result<Value> {
        if op.is_logical() {
            return self.evaluate_logical(op, left, right);
        }
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;
        if left.is_undefined() || right.is_undefined() {
            return Ok(Value::Undefined);
        }
        if op.is_comparison() {
            evaluate_comparison(op, &left, &right)
        } else if op.is_like() {
            evaluate_like(op, &left, &right)
        } else if op.is_bitwise() {
            evaluate_bitwise(op, left, right)
        } else {
            evaluate_math(op, left, right)
        }
    }

    /// Three-valued AND / OR. The right operand is skipped once the left
    /// operand decides the result.
    fn evaluate_logical(&self, op: OperatorType, left: &Expression, right: &Expression) -> Result<Value> {
        let left = logical_operand(op, self.evaluate(left)?)?;
        match (op, left) {
            (OperatorType::And, Some(false)) => return Ok(Value::Boolean(false)),
            (OperatorType::Or, Some(true)) => return Ok(Value::Boolean(true)),
            _ => {}
        }
        let right = logical_operand(op, self.evaluate(right)?)?;
        let result = match (op, left, right) {
            (OperatorType::And, Some(true), Some(b)) => Some(b),
            (OperatorType::And, _, Some(false)) => Some(false),
            (OperatorType::Or, Some(false), Some(b)) => Some(b),
            (OperatorType::Or, _, Some(true)) => Some(true),
            _ => None,
        };
        Ok(result.map(Value::Boolean).unwrap_or_default())
    }

    fn evaluate_in_list(
        &self,
        operand: &Expression,
        list: &[Expression],
        negated: bool,
        exact_match: bool,
    ) -> Result<Value> {
        let value = self.evaluate(operand)?;
        if value.is_undefined() {
            return Ok(Value::Undefined);
        }
        let mut found = false;
        for item in list {
            let candidate = self.evaluate(item)?;
            if candidate.is_undefined() {
                continue;
            }
            if let Ok(Some(Ordering::Equal)) = value.compare(&candidate, exact_match) {
                found = true;
                break;
            }
        }
        Ok(Value::Boolean(found != negated))
    }
}

fn type_error(operation: impl std::fmt::Display, message: impl Into<String>) -> FilterExpressionError {
    FilterExpressionError::evaluation(operation.to_string(), message)
}

fn logical_operand(op: OperatorType, value: Value) -> Result<Option<bool>> {
    match value {
        Value::Boolean(b) => Ok(Some(b)),
        Value::Undefined => Ok(None),
        other => Err(type_error(
            op,
            format!("operand must be a Boolean, received {}", other.value_type()),
        )),
    }
}

fn evaluate_unary(op: UnaryOperator, value: Value) -> Result<Value> {
    let result = match (op, value) {
        (_, Value::Undefined) => Value::Undefined,
        (UnaryOperator::Not, Value::Boolean(b)) => Value::Boolean(!b),
        (UnaryOperator::BitwiseNot, Value::Boolean(b)) => Value::Boolean(!b),
        (UnaryOperator::BitwiseNot, Value::Int32(i)) => Value::Int32(!i),
        (UnaryOperator::BitwiseNot, Value::Int64(i)) => Value::Int64(!i),
        (UnaryOperator::BitwiseNot, Value::UInt32(i)) => Value::UInt32(!i),
        (UnaryOperator::BitwiseNot, Value::UInt64(i)) => Value::UInt64(!i),
        (UnaryOperator::Plus, Value::Boolean(b)) => Value::Int32(i32::from(b)),
        (UnaryOperator::Plus, value) if value.value_type().is_numeric() => value,
        (UnaryOperator::Minus, Value::Boolean(b)) => Value::Int32(-i32::from(b)),
        (UnaryOperator::Minus, Value::Int32(i)) => Value::Int32(i.wrapping_neg()),
        (UnaryOperator::Minus, Value::Int64(i)) => Value::Int64(i.wrapping_neg()),
        (UnaryOperator::Minus, Value::UInt32(i)) => Value::Int64(-i64::from(i)),
        (UnaryOperator::Minus, Value::UInt64(i)) => Value::Decimal(-BigDecimal::from(i)),
        (UnaryOperator::Minus, Value::Decimal(d)) => Value::Decimal(-d),
        (UnaryOperator::Minus, Value::Double(f)) => Value::Double(-f),
        (op, value) => {
            return Err(type_error(
                op.to_string().trim(),
                format!("cannot apply operator to {} value", value.value_type()),
            ))
        }
    };
    Ok(result)
}

fn evaluate_comparison(op: OperatorType, left: &Value, right: &Value) -> Result<Value> {
    let exact = matches!(op, OperatorType::EqualExactMatch | OperatorType::NotEqualExactMatch);
    let ordering = left.compare(right, exact)?;
    let result = match op {
        OperatorType::LessThan => ordering == Some(Ordering::Less),
        OperatorType::LessThanOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        OperatorType::GreaterThan => ordering == Some(Ordering::Greater),
        OperatorType::GreaterThanOrEqual => {
            matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
        }
        OperatorType::Equal | OperatorType::EqualExactMatch => ordering == Some(Ordering::Equal),
        _ => ordering != Some(Ordering::Equal),
    };
    Ok(Value::Boolean(result))
}

fn evaluate_like(op: OperatorType, left: &Value, right: &Value) -> Result<Value> {
    let (Value::String(text), Value::String(pattern)) = (left, right) else {
        return Err(type_error(
            op,
            format!(
                "operands must be Strings, received {} and {}",
                left.value_type(),
                right.value_type()
            ),
        ));
    };
    let exact = matches!(op, OperatorType::LikeExactMatch | OperatorType::NotLikeExactMatch);
    let negated = matches!(op, OperatorType::NotLike | OperatorType::NotLikeExactMatch);
    Ok(Value::Boolean(like_match(text, pattern, exact) != negated))
}

/// LIKE pattern matching: `%` matches a run of one or more characters, `_`
/// matches exactly one. Every other character, `*` included, matches itself.
/// Case-insensitive unless `exact_match`.
pub fn like_match(text: &str, pattern: &str, exact_match: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if exact_match {
            s.chars().collect()
        } else {
            s.chars().flat_map(char::to_lowercase).collect()
        }
    };
    let pattern: Vec<PatternToken> = fold(pattern)
        .into_iter()
        .flat_map(|c| match c {
            '%' => vec![PatternToken::AnyOne, PatternToken::AnyRun],
            '_' => vec![PatternToken::AnyOne],
            c => vec![PatternToken::Char(c)],
        })
        .collect();
    wildcard_match_chars(&fold(text), &pattern)
}

#[derive(Clone, Copy, PartialEq)]
enum PatternToken {
    Char(char),
    AnyOne,
    /// Zero or more characters.
    AnyRun,
}

fn wildcard_match_chars(s: &[char], pat: &[PatternToken]) -> bool {
    let (mut si, mut pi) = (0, 0);
    // Pattern index after the last run and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;
    while si < s.len() {
        match pat.get(pi) {
            Some(PatternToken::AnyRun) => {
                backtrack = Some((pi + 1, si));
                pi += 1;
            }
            Some(PatternToken::AnyOne) => {
                si += 1;
                pi += 1;
            }
            Some(PatternToken::Char(c)) if *c == s[si] => {
                si += 1;
                pi += 1;
            }
            _ => match backtrack {
                Some((run_pi, run_si)) => {
                    backtrack = Some((run_pi, run_si + 1));
                    pi = run_pi;
                    si = run_si + 1;
                }
                None => return false,
            },
        }
    }
    pat[pi..].iter().all(|&t| t == PatternToken::AnyRun)
}

fn evaluate_bitwise(op: OperatorType, left: Value, right: Value) -> Result<Value> {
    if let (Value::Boolean(a), Value::Boolean(b)) = (&left, &right) {
        match op {
            OperatorType::BitwiseAnd => return Ok(Value::Boolean(a & b)),
            OperatorType::BitwiseOr => return Ok(Value::Boolean(a | b)),
            OperatorType::BitwiseXor => return Ok(Value::Boolean(a ^ b)),
            _ => {}
        }
    }
    let integral = |v: &Value| v.value_type() == ValueType::Boolean || v.value_type().is_integer();
    if !integral(&left) || !integral(&right) {
        return Err(type_error(
            op,
            format!(
                "operands must be integral, received {} and {}",
                left.value_type(),
                right.value_type()
            ),
        ));
    }

    if matches!(op, OperatorType::BitShiftLeft | OperatorType::BitShiftRight) {
        let amount = match right.convert(ValueType::Int64)? {
            Value::Int64(n) => u32::try_from(n).map_err(|_| type_error(op, "shift amount out of range"))?,
            _ => return Err(type_error(op, "shift amount must be integral")),
        };
        let left = match left {
            Value::Boolean(b) => Value::Int32(i32::from(b)),
            other => other,
        };
        let left_shift = op == OperatorType::BitShiftLeft;
        macro_rules! shift {
            ($variant:path, $a:expr) => {
                $variant(if left_shift {
                    $a.wrapping_shl(amount)
                } else {
                    $a.wrapping_shr(amount)
                })
            };
        }
        return Ok(match left {
            Value::Int32(a) => shift!(Value::Int32, a),
            Value::Int64(a) => shift!(Value::Int64, a),
            Value::UInt32(a) => shift!(Value::UInt32, a),
            Value::UInt64(a) => shift!(Value::UInt64, a),
            other => return Err(type_error(op, format!("cannot shift {} value", other.value_type()))),
        });
    }

    let target = combined_type(op, &left, &right)?;
    if !target.is_integer() {
        return Err(type_error(
            op,
            format!("cannot combine {} and {} values", left.value_type(), right.value_type()),
        ));
    }
    macro_rules! bitwise {
        ($variant:path, $a:expr, $b:expr) => {
            $variant(match op {
                OperatorType::BitwiseAnd => $a & $b,
                OperatorType::BitwiseOr => $a | $b,
                _ => $a ^ $b,
            })
        };
    }
    Ok(match (left.convert(target)?, right.convert(target)?) {
        (Value::Int32(a), Value::Int32(b)) => bitwise!(Value::Int32, a, b),
        (Value::Int64(a), Value::Int64(b)) => bitwise!(Value::Int64, a, b),
        (Value::UInt32(a), Value::UInt32(b)) => bitwise!(Value::UInt32, a, b),
        (Value::UInt64(a), Value::UInt64(b)) => bitwise!(Value::UInt64, a, b),
        _ => return Err(type_error(op, "operands did not convert to a common integral type")),
    })
}

/// Common type for arithmetic and bitwise operands; two Booleans combine
/// as Int32.
fn combined_type(op: OperatorType, left: &Value, right: &Value) -> Result<ValueType> {
    let (lt, rt) = (left.value_type(), right.value_type());
    match lt.promote(rt) {
        Some(ValueType::Boolean) => Ok(ValueType::Int32),
        Some(target) => Ok(target),
        None => Err(type_error(
            op,
            format!("cannot combine {} and {} values", lt, rt),
        )),
    }
}

fn divide_by_zero(op: OperatorType) -> FilterExpressionError {
    type_error(op, "division by zero")
}

fn evaluate_math(op: OperatorType, left: Value, right: Value) -> Result<Value> {
    if op == OperatorType::Add
        && (left.value_type() == ValueType::String || right.value_type() == ValueType::String)
    {
        return Ok(Value::String(format!("{}{}", left, right)));
    }
    let target = combined_type(op, &left, &right)?;

    macro_rules! integer_math {
        ($variant:path, $a:expr, $b:expr) => {
            match op {
                OperatorType::Add => $variant($a.wrapping_add($b)),
                OperatorType::Subtract => $variant($a.wrapping_sub($b)),
                OperatorType::Multiply => $variant($a.wrapping_mul($b)),
                OperatorType::Divide if $b == 0 => return Err(divide_by_zero(op)),
                OperatorType::Divide => $variant($a.wrapping_div($b)),
                OperatorType::Modulus if $b == 0 => return Err(divide_by_zero(op)),
                _ => $variant($a.wrapping_rem($b)),
            }
        };
    }

    Ok(match (left.convert(target)?, right.convert(target)?) {
        (Value::Int32(a), Value::Int32(b)) => integer_math!(Value::Int32, a, b),
        (Value::Int64(a), Value::Int64(b)) => integer_math!(Value::Int64, a, b),
        (Value::UInt32(a), Value::UInt32(b)) => integer_math!(Value::UInt32, a, b),
        (Value::UInt64(a), Value::UInt64(b)) => integer_math!(Value::UInt64, a, b),
        (Value::Decimal(a), Value::Decimal(b)) => Value::Decimal(match op {
            OperatorType::Add => a + b,
            OperatorType::Subtract => a - b,
            OperatorType::Multiply => a * b,
            _ if b.is_zero() => return Err(divide_by_zero(op)),
            OperatorType::Divide => a / b,
            _ => a % b,
        }),
        (Value::Double(a), Value::Double(b)) => Value::Double(match op {
            OperatorType::Add => a + b,
            OperatorType::Subtract => a - b,
            OperatorType::Multiply => a * b,
            OperatorType::Divide => a / b,
            _ => a % b,
        }),
        (l, r) => {
            return Err(type_error(
                op,
                format!("cannot apply to {} and {} values", l.value_type(), r.value_type()),
            ))
        }
    })
}
