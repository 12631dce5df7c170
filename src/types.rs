//! Types module: value types and runtime values for filter expressions.
//!
//! This module provides the ValueType and Value enums, plus the conversion,
//! numeric promotion and comparison rules shared by the evaluator, the
//! function library and ORDER BY sorting.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive, Zero};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{FilterExpressionError, Result};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

pub(crate) static UNDEFINED: Value = Value::Undefined;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Decimal,
    Double,
    String,
    Guid,
    DateTime,
    Undefined,
}

impl ValueType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueType::Int32
                | ValueType::Int64
                | ValueType::UInt32
                | ValueType::UInt64
                | ValueType::Decimal
                | ValueType::Double
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ValueType::Int32 | ValueType::Int64 | ValueType::UInt32 | ValueType::UInt64
        )
    }

    fn numeric_rank(self) -> Option<u8> {
        match self {
            ValueType::Boolean => Some(0),
            ValueType::Int32 => Some(1),
            ValueType::UInt32 => Some(2),
            ValueType::Int64 => Some(3),
            ValueType::UInt64 => Some(4),
            ValueType::Decimal => Some(5),
            ValueType::Double => Some(6),
            _ => None,
        }
    }

    /// Returns the type two numeric (or Boolean) operands are promoted to
    /// before they are combined, or None when either side is not numeric.
    ///
    /// Mixed signed/unsigned pairs widen to the next type able to hold both
    /// ranges: Int32 with UInt32 becomes Int64, any signed type with UInt64
    /// becomes Decimal.
    pub fn promote(self, other: ValueType) -> Option<ValueType> {
        let (a, b) = (self.numeric_rank()?, other.numeric_rank()?);
        let (low, high) = if a <= b { (self, other) } else { (other, self) };
        Some(match (low, high) {
            (ValueType::Int32, ValueType::UInt32) => ValueType::Int64,
            (ValueType::Int32 | ValueType::Int64, ValueType::UInt64) => ValueType::Decimal,
            (_, high) => high,
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Boolean => "Boolean",
            ValueType::Int32 => "Int32",
            ValueType::Int64 => "Int64",
            ValueType::UInt32 => "UInt32",
            ValueType::UInt64 => "UInt64",
            ValueType::Decimal => "Decimal",
            ValueType::Double => "Double",
            ValueType::String => "String",
            ValueType::Guid => "Guid",
            ValueType::DateTime => "DateTime",
            ValueType::Undefined => "Undefined",
        };
        f.write_str(name)
    }
}

impl FromStr for ValueType {
    type Err = FilterExpressionError;

    /// Parses a target type name as accepted by CONVERT, e.g. `Int32` or
    /// `System.String`. Names are case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let name = match trimmed.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("system.") => &trimmed[7..],
            _ => trimmed,
        };
        let value_type = match name.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => ValueType::Boolean,
            "int16" | "int32" | "uint16" | "byte" | "sbyte" | "int" => ValueType::Int32,
            "int64" | "long" => ValueType::Int64,
            "uint32" => ValueType::UInt32,
            "uint64" => ValueType::UInt64,
            "decimal" => ValueType::Decimal,
            "double" | "single" | "float" => ValueType::Double,
            "string" => ValueType::String,
            "guid" => ValueType::Guid,
            "datetime" => ValueType::DateTime,
            _ => {
                return Err(FilterExpressionError::evaluation(
                    "CONVERT",
                    format!("specified type \"{}\" is not supported", s),
                ))
            }
        };
        Ok(value_type)
    }
}

/// A runtime value. Every value carries its type tag; `Undefined` is the
/// null value and is distinct from Boolean false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Undefined,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Decimal(BigDecimal),
    Double(f64),
    String(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
}

/// Numeric payload used while converting between numeric value types.
enum Number {
    Integer(i128),
    Decimal(BigDecimal),
    Float(f64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Undefined => ValueType::Undefined,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt32(_) => ValueType::UInt32,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Decimal(_) => ValueType::Decimal,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Guid(_) => ValueType::Guid,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Integral value as i64, for integer-typed values only.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(i64::from(*i)),
            Value::Int64(i) => Some(*i),
            Value::UInt32(i) => Some(i64::from(*i)),
            Value::UInt64(i) => i64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Numeric value as f64, for Boolean and numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self.number()? {
            Number::Integer(i) => Some(i as f64),
            Number::Decimal(d) => d.to_f64(),
            Number::Float(f) => Some(f),
        }
    }

    fn number(&self) -> Option<Number> {
        Some(match self {
            Value::Boolean(b) => Number::Integer(i128::from(*b)),
            Value::Int32(i) => Number::Integer(i128::from(*i)),
            Value::Int64(i) => Number::Integer(i128::from(*i)),
            Value::UInt32(i) => Number::Integer(i128::from(*i)),
            Value::UInt64(i) => Number::Integer(i128::from(*i)),
            Value::Decimal(d) => Number::Decimal(d.clone()),
            Value::Double(f) => Number::Float(*f),
            _ => return None,
        })
    }

    /// Converts this value to the requested type.
    ///
    /// Undefined converts to Undefined for every target. Strings are parsed,
    /// numerics are range checked, and any value renders to String.
    pub fn convert(&self, target: ValueType) -> Result<Value> {
        if self.value_type() == target {
            return Ok(self.clone());
        }
        match (self, target) {
            (Value::Undefined, _) | (_, ValueType::Undefined) => Ok(Value::Undefined),
            (_, ValueType::String) => Ok(Value::String(self.to_string())),
            (Value::String(s), _) => Value::parse_as(s, target),
            (_, ValueType::Boolean) => match self.number() {
                Some(Number::Integer(i)) => Ok(Value::Boolean(i != 0)),
                Some(Number::Decimal(d)) => Ok(Value::Boolean(!d.is_zero())),
                Some(Number::Float(f)) => Ok(Value::Boolean(f != 0.0)),
                None => Err(self.conversion_error(target)),
            },
            _ if target.is_numeric() => match self.number() {
                Some(number) => Value::from_number(number, target)
                    .ok_or_else(|| self.conversion_error(target)),
                None => Err(self.conversion_error(target)),
            },
            _ => Err(self.conversion_error(target)),
        }
    }

    fn conversion_error(&self, target: ValueType) -> FilterExpressionError {
        FilterExpressionError::evaluation(
            "conversion",
            format!("cannot convert {} value \"{}\" to {}", self.value_type(), self, target),
        )
    }

    fn from_number(number: Number, target: ValueType) -> Option<Value> {
        match number {
            Number::Integer(i) => match target {
                ValueType::Int32 => i32::try_from(i).ok().map(Value::Int32),
                ValueType::Int64 => i64::try_from(i).ok().map(Value::Int64),
                ValueType::UInt32 => u32::try_from(i).ok().map(Value::UInt32),
                ValueType::UInt64 => u64::try_from(i).ok().map(Value::UInt64),
                ValueType::Decimal => BigDecimal::from_str(&i.to_string()).ok().map(Value::Decimal),
                ValueType::Double => Some(Value::Double(i as f64)),
                _ => None,
            },
            Number::Decimal(d) => match target {
                ValueType::Decimal => Some(Value::Decimal(d)),
                ValueType::Double => d.to_f64().map(Value::Double),
                _ => d
                    .with_scale(0)
                    .to_i128()
                    .and_then(|i| Value::from_number(Number::Integer(i), target)),
            },
            Number::Float(f) => match target {
                ValueType::Double => Some(Value::Double(f)),
                ValueType::Decimal => BigDecimal::from_f64(f).map(Value::Decimal),
                _ if f.is_finite() && f.abs() < 1.0e38 => {
                    Value::from_number(Number::Integer(f.trunc() as i128), target)
                }
                _ => None,
            },
        }
    }

    fn parse_as(text: &str, target: ValueType) -> Result<Value> {
        let trimmed = text.trim();
        let parsed = match target {
            ValueType::Boolean => {
                if trimmed.eq_ignore_ascii_case("true") {
                    Some(Value::Boolean(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Some(Value::Boolean(false))
                } else {
                    trimmed.parse::<i64>().ok().map(|i| Value::Boolean(i != 0))
                }
            }
            ValueType::Int32 | ValueType::Int64 | ValueType::UInt32 | ValueType::UInt64 => trimmed
                .parse::<i128>()
                .ok()
                .and_then(|i| Value::from_number(Number::Integer(i), target)),
            ValueType::Decimal => BigDecimal::from_str(trimmed).ok().map(Value::Decimal),
            ValueType::Double => trimmed.parse::<f64>().ok().map(Value::Double),
            ValueType::Guid => parse_guid(trimmed).map(Value::Guid),
            ValueType::DateTime => parse_datetime(trimmed).map(Value::DateTime),
            ValueType::String => Some(Value::String(text.to_string())),
            ValueType::Undefined => Some(Value::Undefined),
        };
        parsed.ok_or_else(|| {
            FilterExpressionError::evaluation(
                "conversion",
                format!("cannot parse \"{}\" as {}", text, target),
            )
        })
    }

    /// Compares two defined values.
    ///
    /// Ordinary comparison promotes numerics, parses a String operand into
    /// the other operand's type and compares strings case-insensitively. An
    /// exact comparison never parses strings or promotes numerics, compares
    /// strings case-sensitively and reports values of different types as
    /// incomparable (`Ok(None)`). `Ok(None)` is also returned when NaN is involved.
    pub fn compare(&self, other: &Value, exact: bool) -> Result<Option<Ordering>> {
        let (lt, rt) = (self.value_type(), other.value_type());
        let target = if exact {
            if lt != rt {
                return Ok(None);
            }
            Some(lt)
        } else if lt == rt {
            Some(lt)
        } else if let Some(promoted) = lt.promote(rt) {
            Some(promoted)
        } else if lt == ValueType::String {
            Some(rt)
        } else if rt == ValueType::String {
            Some(lt)
        } else {
            None
        };
        let target = match target {
            Some(t) if t != ValueType::Undefined => t,
            _ => {
                return Err(FilterExpressionError::evaluation(
                    "comparison",
                    format!("cannot compare {} value to {} value", lt, rt),
                ))
            }
        };
        let left = self.convert(target)?;
        let right = other.convert(target)?;
        Ok(match (&left, &right) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::UInt32(a), Value::UInt32(b)) => Some(a.cmp(b)),
            (Value::UInt64(a), Value::UInt64(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) if exact => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(compare_ignore_case(a, b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::UInt32(i) => write!(f, "{}", i),
            Value::UInt64(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => f.write_str(s),
            Value::Guid(g) => write!(f, "{}", g),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

pub(crate) fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Parses a GUID with or without surrounding braces or single quotes.
pub fn parse_guid(text: &str) -> Option<Uuid> {
    let text = text.trim().trim_matches('\'');
    let text = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text);
    Uuid::parse_str(text).ok()
}

/// Parses a date/time in one of the accepted layouts: ISO 8601 with a space
/// or `T` separator, `MM/DD/YYYY` with optional time, or RFC 3339 with an
/// offset (normalized to UTC).
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_promotion_ladder() {
        assert_eq!(ValueType::Boolean.promote(ValueType::Boolean), Some(ValueType::Boolean));
        assert_eq!(ValueType::Boolean.promote(ValueType::Int32), Some(ValueType::Int32));
        assert_eq!(ValueType::Int32.promote(ValueType::Int64), Some(ValueType::Int64));
        assert_eq!(ValueType::Int32.promote(ValueType::UInt32), Some(ValueType::Int64));
        assert_eq!(ValueType::Int64.promote(ValueType::UInt64), Some(ValueType::Decimal));
        assert_eq!(ValueType::UInt32.promote(ValueType::UInt64), Some(ValueType::UInt64));
        assert_eq!(ValueType::Decimal.promote(ValueType::Int32), Some(ValueType::Decimal));
        assert_eq!(ValueType::Double.promote(ValueType::Decimal), Some(ValueType::Double));
        assert_eq!(ValueType::String.promote(ValueType::Int32), None);
    }

    #[test]
    fn test_value_type_from_name() {
        assert_eq!("int32".parse::<ValueType>().unwrap(), ValueType::Int32);
        assert_eq!("System.Guid".parse::<ValueType>().unwrap(), ValueType::Guid);
        assert_eq!("Single".parse::<ValueType>().unwrap(), ValueType::Double);
        assert!("Widget".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_convert_numeric() {
        assert_eq!(Value::Int32(5).convert(ValueType::Int64).unwrap(), Value::Int64(5));
        assert_eq!(Value::Double(5.9).convert(ValueType::Int32).unwrap(), Value::Int32(5));
        assert_eq!(Value::Boolean(true).convert(ValueType::Int32).unwrap(), Value::Int32(1));
        assert_eq!(Value::Int32(0).convert(ValueType::Boolean).unwrap(), Value::Boolean(false));
        assert!(Value::Int64(i64::MAX).convert(ValueType::Int32).is_err());
        assert!(Value::Int32(-1).convert(ValueType::UInt32).is_err());
        assert!(Value::Double(f64::NAN).convert(ValueType::Int64).is_err());
    }

    #[test]
    fn test_convert_strings() {
        assert_eq!(Value::from("42").convert(ValueType::Int32).unwrap(), Value::Int32(42));
        assert_eq!(Value::from("TRUE").convert(ValueType::Boolean).unwrap(), Value::Boolean(true));
        assert_eq!(Value::Int32(7).convert(ValueType::String).unwrap(), Value::from("7"));
        let guid = Value::from("{9448a8f5-f5f1-4f46-9d9a-6c6e7bb0b6d1}").convert(ValueType::Guid).unwrap();
        assert_eq!(guid.value_type(), ValueType::Guid);
        assert!(Value::from("abc").convert(ValueType::Double).is_err());
        assert_eq!(Value::Undefined.convert(ValueType::Int32).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_parse_datetime_layouts() {
        let expected = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap();
        assert_eq!(parse_datetime("2019-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_datetime("2019-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_datetime("01/02/2019 03:04:05"), Some(expected));
        assert_eq!(
            parse_datetime("2019-01-02"),
            NaiveDate::from_ymd_opt(2019, 1, 2).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime("not a date"), None);
    }

    #[test]
    fn test_compare_ordinary_and_exact() {
        let a = Value::from("FREQ");
        let b = Value::from("freq");
        assert_eq!(a.compare(&b, false).unwrap(), Some(Ordering::Equal));
        assert_eq!(a.compare(&b, true).unwrap(), Some(Ordering::Less));
        assert_eq!(Value::Int32(5).compare(&Value::from("5"), false).unwrap(), Some(Ordering::Equal));
        assert_eq!(Value::Int32(5).compare(&Value::from("5"), true).unwrap(), None);
        assert_eq!(Value::Int32(5).compare(&Value::Double(5.0), false).unwrap(), Some(Ordering::Equal));
        assert_eq!(Value::Int32(5).compare(&Value::Double(5.0), true).unwrap(), None);
        assert_eq!(Value::Int64(5).compare(&Value::Int32(5), true).unwrap(), None);
        assert_eq!(Value::Int64(5).compare(&Value::Int64(5), true).unwrap(), Some(Ordering::Equal));
        assert!(Value::Guid(Uuid::nil()).compare(&Value::Int32(1), false).is_err());
        assert_eq!(Value::Double(f64::NAN).compare(&Value::Double(1.0), false).unwrap(), None);
    }

    #[test]
    fn test_serialization_deserialization() {
        let values = vec![
            Value::Int32(1),
            Value::from("foo"),
            Value::Boolean(false),
            Value::Guid(Uuid::nil()),
            Value::Undefined,
        ];
        let json = serde_json::to_string(&values).unwrap();
        let deser: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(values, deser);
    }
}
