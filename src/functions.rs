//! Functions module: the built-in function catalog and its implementations.
//!
//! Function names resolve case-insensitively at bind time. Unless a function
//! says otherwise, an Undefined source argument yields Undefined. IIF,
//! COALESCE and ISNULL evaluate their arguments lazily.

use std::borrow::Cow;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::RoundingMode;
use chrono::{Datelike, Duration, Local, Months, NaiveDateTime, Timelike, Utc};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

use crate::eval::Evaluator;
use crate::expr::Expression;
use crate::types::{compare_ignore_case, parse_datetime, parse_guid, Value, ValueType, UNDEFINED};
use crate::{FilterExpressionError, Result};

// Thread-local cache for compiled REGEXMATCH / REGEXVAL patterns.
thread_local! {
    static REGEX_CACHE: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

const MAX_REGEX_CACHE_SIZE: usize = 100;

fn get_or_compile_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    REGEX_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)?;
        if cache.len() >= MAX_REGEX_CACHE_SIZE {
            let keys_to_remove: Vec<String> = cache
                .keys()
                .take(MAX_REGEX_CACHE_SIZE / 2)
                .cloned()
                .collect();
            for key in keys_to_remove {
                cache.remove(&key);
            }
        }
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    })
}

macro_rules! builtin_functions {
    ($( $variant:ident: $name:expr, $min:expr, $max:expr ),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum FunctionType {
            $( $variant, )*
        }

        impl FunctionType {
            pub const ALL: &'static [FunctionType] = &[ $( FunctionType::$variant, )* ];

            pub fn name(self) -> &'static str {
                match self {
                    $( FunctionType::$variant => $name, )*
                }
            }

            /// Minimum and maximum argument count; no maximum for variadic
            /// functions.
            pub fn arity(self) -> (usize, Option<usize>) {
                match self {
                    $( FunctionType::$variant => ($min, $max), )*
                }
            }
        }
    };
}

builtin_functions! {
    Abs: "ABS", 1, Some(1),
    Ceiling: "CEILING", 1, Some(1),
    Coalesce: "COALESCE", 2, None,
    Contains: "CONTAINS", 2, Some(3),
    Convert: "CONVERT", 2, Some(2),
    DateAdd: "DATEADD", 3, Some(3),
    DateDiff: "DATEDIFF", 3, Some(3),
    DatePart: "DATEPART", 2, Some(2),
    EndsWith: "ENDSWITH", 2, Some(3),
    Floor: "FLOOR", 1, Some(1),
    IIf: "IIF", 3, Some(3),
    IndexOf: "INDEXOF", 2, Some(3),
    IsDate: "ISDATE", 1, Some(1),
    IsGuid: "ISGUID", 1, Some(1),
    IsInteger: "ISINTEGER", 1, Some(1),
    IsNull: "ISNULL", 2, Some(2),
    IsNumeric: "ISNUMERIC", 1, Some(1),
    LastIndexOf: "LASTINDEXOF", 2, Some(3),
    Len: "LEN", 1, Some(1),
    Lower: "LOWER", 1, Some(1),
    MaxOf: "MAXOF", 2, None,
    MinOf: "MINOF", 2, None,
    Now: "NOW", 0, Some(0),
    NthIndexOf: "NTHINDEXOF", 3, Some(4),
    Power: "POWER", 2, Some(2),
    RegExMatch: "REGEXMATCH", 2, Some(2),
    RegExVal: "REGEXVAL", 2, Some(2),
    Replace: "REPLACE", 3, Some(4),
    Reverse: "REVERSE", 1, Some(1),
    Round: "ROUND", 1, Some(1),
    Split: "SPLIT", 3, Some(4),
    Sqrt: "SQRT", 1, Some(1),
    StartsWith: "STARTSWITH", 2, Some(3),
    StrCmp: "STRCMP", 2, Some(3),
    StrCount: "STRCOUNT", 2, Some(3),
    SubStr: "SUBSTR", 2, Some(3),
    Trim: "TRIM", 1, Some(1),
    TrimLeft: "TRIMLEFT", 1, Some(1),
    TrimRight: "TRIMRIGHT", 1, Some(1),
    Upper: "UPPER", 1, Some(1),
    UtcNow: "UTCNOW", 0, Some(0),
}

impl FunctionType {
    pub fn from_name(name: &str) -> Option<FunctionType> {
        FunctionType::ALL
            .iter()
            .copied()
            .find(|function| function.name().eq_ignore_ascii_case(name))
    }

    pub fn accepts(self, count: usize) -> bool {
        let (min, max) = self.arity();
        count >= min && max.map_or(true, |max| count <= max)
    }

    pub fn arity_description(self) -> String {
        match self.arity() {
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{} to {}", min, max),
            (min, None) => format!("at least {}", min),
        }
    }
}

/// Date parts accepted by DATEADD, DATEDIFF and DATEPART.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateInterval {
    Year,
    Month,
    DayOfYear,
    Day,
    Week,
    WeekDay,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl FromStr for DateInterval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let interval = match s.trim().to_ascii_lowercase().as_str() {
            "year" => DateInterval::Year,
            "month" => DateInterval::Month,
            "dayofyear" => DateInterval::DayOfYear,
            "day" => DateInterval::Day,
            "week" => DateInterval::Week,
            "weekday" => DateInterval::WeekDay,
            "hour" => DateInterval::Hour,
            "minute" => DateInterval::Minute,
            "second" => DateInterval::Second,
            "millisecond" => DateInterval::Millisecond,
            _ => return Err(format!("\"{}\" is not a valid time interval", s)),
        };
        Ok(interval)
    }
}

/// Evaluated arguments of one call, with typed accessors that report errors
/// against the function name.
struct Args<'v> {
    function: FunctionType,
    values: &'v [Value],
}

impl<'v> Args<'v> {
    fn get(&self, index: usize) -> &'v Value {
        self.values.get(index).unwrap_or(&UNDEFINED)
    }

    fn error(&self, message: impl Into<String>) -> FilterExpressionError {
        FilterExpressionError::evaluation(self.function.name(), message)
    }

    fn type_error(&self, index: usize, expected: &str) -> FilterExpressionError {
        self.error(format!(
            "argument {} must be {}, received {}",
            index + 1,
            expected,
            self.get(index).value_type()
        ))
    }

    fn string(&self, index: usize) -> Result<Option<&'v str>> {
        match self.get(index) {
            Value::Undefined => Ok(None),
            Value::String(s) => Ok(Some(s)),
            _ => Err(self.type_error(index, "a String")),
        }
    }

    /// Optional Boolean flag; absent or Undefined means false.
    fn flag(&self, index: usize) -> Result<bool> {
        match self.get(index) {
            Value::Undefined => Ok(false),
            Value::Boolean(b) => Ok(*b),
            value => match value.convert(ValueType::Boolean) {
                Ok(Value::Boolean(b)) => Ok(b),
                _ => Err(self.type_error(index, "a Boolean")),
            },
        }
    }

    fn integer(&self, index: usize) -> Result<Option<i32>> {
        match self.get(index) {
            Value::Undefined => Ok(None),
            value => match value.convert(ValueType::Int32) {
                Ok(Value::Int32(i)) => Ok(Some(i)),
                _ => Err(self.type_error(index, "an integer")),
            },
        }
    }

    fn double(&self, index: usize) -> Result<Option<f64>> {
        match self.get(index) {
            Value::Undefined => Ok(None),
            value => match value.convert(ValueType::Double) {
                Ok(Value::Double(f)) => Ok(Some(f)),
                _ => Err(self.type_error(index, "numeric")),
            },
        }
    }

    fn datetime(&self, index: usize) -> Result<Option<NaiveDateTime>> {
        match self.get(index) {
            Value::Undefined => Ok(None),
            Value::DateTime(dt) => Ok(Some(*dt)),
            Value::String(s) => parse_datetime(s)
                .map(Some)
                .ok_or_else(|| self.type_error(index, "a DateTime")),
            _ => Err(self.type_error(index, "a DateTime")),
        }
    }

    fn interval(&self, index: usize) -> Result<DateInterval> {
        match self.string(index)? {
            Some(name) => name.parse().map_err(|message: String| self.error(message)),
            None => Err(self.type_error(index, "a time interval name")),
        }
    }
}

/// Evaluates a built-in function call.
pub(crate) fn evaluate_function(
    evaluator: &Evaluator<'_>,
    function: FunctionType,
    arguments: &[Expression],
) -> Result<Value> {
    if !function.accepts(arguments.len()) {
        return Err(FilterExpressionError::evaluation(
            function.name(),
            format!(
                "expected {} arguments, received {}",
                function.arity_description(),
                arguments.len()
            ),
        ));
    }

    match function {
        FunctionType::IIf => return iif(evaluator, arguments),
        FunctionType::Coalesce => return coalesce(evaluator, arguments),
        FunctionType::IsNull => return is_null(evaluator, arguments),
        _ => {}
    }

    let values = arguments
        .iter()
        .map(|argument| evaluator.evaluate(argument))
        .collect::<Result<Vec<_>>>()?;
    let args = Args {
        function,
        values: &values,
    };

    match function {
        FunctionType::Abs => abs(&args),
        FunctionType::Ceiling => round_with(&args, RoundingMode::Ceiling, f64::ceil),
        FunctionType::Floor => round_with(&args, RoundingMode::Floor, f64::floor),
        FunctionType::Round => round_with(&args, RoundingMode::HalfUp, f64::round),
        FunctionType::Sqrt => Ok(args.double(0)?.map(|x| Value::Double(x.sqrt())).unwrap_or_default()),
        FunctionType::Power => match (args.double(0)?, args.double(1)?) {
            (Some(x), Some(y)) => Ok(Value::Double(x.powf(y))),
            _ => Ok(Value::Undefined),
        },
        FunctionType::MaxOf => extreme_of(&args, Ordering::Greater),
        FunctionType::MinOf => extreme_of(&args, Ordering::Less),
        FunctionType::Convert => convert(&args),
        FunctionType::IsNumeric => Ok(Value::Boolean(is_numeric(args.get(0)))),
        FunctionType::IsInteger => Ok(Value::Boolean(is_integer(args.get(0)))),
        FunctionType::IsDate => Ok(Value::Boolean(match args.get(0) {
            Value::DateTime(_) => true,
            Value::String(s) => parse_datetime(s).is_some(),
            _ => false,
        })),
        FunctionType::IsGuid => Ok(Value::Boolean(match args.get(0) {
            Value::Guid(_) => true,
            Value::String(s) => parse_guid(s).is_some(),
            _ => false,
        })),
        FunctionType::Now => Ok(Value::DateTime(Local::now().naive_local())),
        FunctionType::UtcNow => Ok(Value::DateTime(Utc::now().naive_utc())),
        FunctionType::DateAdd => date_add(&args),
        FunctionType::DateDiff => date_diff(&args),
        FunctionType::DatePart => date_part(&args),
        FunctionType::RegExMatch | FunctionType::RegExVal => regex_function(&args),
        _ => string_function(&args),
    }
}

fn iif(evaluator: &Evaluator<'_>, arguments: &[Expression]) -> Result<Value> {
    match evaluator.evaluate(&arguments[0])? {
        Value::Boolean(true) => evaluator.evaluate(&arguments[1]),
        Value::Boolean(false) | Value::Undefined => evaluator.evaluate(&arguments[2]),
        other => Err(FilterExpressionError::evaluation(
            "IIF",
            format!("condition must be a Boolean, received {}", other.value_type()),
        )),
    }
}

fn coalesce(evaluator: &Evaluator<'_>, arguments: &[Expression]) -> Result<Value> {
    for argument in arguments {
        let value = evaluator.evaluate(argument)?;
        if !value.is_undefined() {
            return Ok(value);
        }
    }
    Ok(Value::Undefined)
}

fn is_null(evaluator: &Evaluator<'_>, arguments: &[Expression]) -> Result<Value> {
    match evaluator.evaluate(&arguments[0])? {
        Value::Undefined => evaluator.evaluate(&arguments[1]),
        value => Ok(value),
    }
}

fn abs(args: &Args<'_>) -> Result<Value> {
    Ok(match args.get(0) {
        Value::Undefined => Value::Undefined,
        Value::Int32(i) => Value::Int32(i.wrapping_abs()),
        Value::Int64(i) => Value::Int64(i.wrapping_abs()),
        value @ (Value::UInt32(_) | Value::UInt64(_)) => value.clone(),
        Value::Decimal(d) => Value::Decimal(d.abs()),
        Value::Double(f) => Value::Double(f.abs()),
        _ => return Err(args.type_error(0, "numeric")),
    })
}

fn round_with(args: &Args<'_>, mode: RoundingMode, float: fn(f64) -> f64) -> Result<Value> {
    Ok(match args.get(0) {
        Value::Undefined => Value::Undefined,
        value @ (Value::Int32(_) | Value::Int64(_) | Value::UInt32(_) | Value::UInt64(_)) => {
            value.clone()
        }
        Value::Decimal(d) => Value::Decimal(d.with_scale_round(0, mode)),
        Value::Double(f) => Value::Double(float(*f)),
        _ => return Err(args.type_error(0, "numeric")),
    })
}

/// MAXOF / MINOF: Undefined arguments are skipped; the winning argument is
/// returned with its own type.
fn extreme_of(args: &Args<'_>, wanted: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for value in args.values.iter().filter(|v| !v.is_undefined()) {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(current, false)? {
                Some(ordering) if ordering == wanted => Some(value),
                _ => Some(current),
            },
        };
    }
    Ok(best.cloned().unwrap_or_default())
}

fn convert(args: &Args<'_>) -> Result<Value> {
    let type_name = args
        .string(1)?
        .ok_or_else(|| args.type_error(1, "a type name"))?;
    let target = ValueType::from_str(type_name)?;
    args.get(0).convert(target).map_err(|error| match error {
        FilterExpressionError::Evaluation { message, .. } => args.error(message),
        other => other,
    })
}

fn is_numeric(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        other => other.value_type().is_numeric(),
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().parse::<i128>().is_ok(),
        other => other.value_type().is_integer(),
    }
}

fn add_months(date: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let count = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        date.checked_add_months(Months::new(count))
    } else {
        date.checked_sub_months(Months::new(count))
    }
}

fn date_add(args: &Args<'_>) -> Result<Value> {
    let (Some(date), Some(amount)) = (args.datetime(0)?, args.integer(1)?) else {
        return Ok(Value::Undefined);
    };
    let amount = i64::from(amount);
    let result = match args.interval(2)? {
        DateInterval::Year => add_months(date, amount * 12),
        DateInterval::Month => add_months(date, amount),
        DateInterval::DayOfYear | DateInterval::Day | DateInterval::WeekDay => {
            date.checked_add_signed(Duration::days(amount))
        }
        DateInterval::Week => date.checked_add_signed(Duration::days(amount * 7)),
        DateInterval::Hour => date.checked_add_signed(Duration::hours(amount)),
        DateInterval::Minute => date.checked_add_signed(Duration::minutes(amount)),
        DateInterval::Second => date.checked_add_signed(Duration::seconds(amount)),
        DateInterval::Millisecond => date.checked_add_signed(Duration::milliseconds(amount)),
    };
    result
        .map(Value::DateTime)
        .ok_or_else(|| args.error("resulting date is out of range"))
}

fn date_diff(args: &Args<'_>) -> Result<Value> {
    let (Some(start), Some(end)) = (args.datetime(0)?, args.datetime(1)?) else {
        return Ok(Value::Undefined);
    };
    let elapsed = end.signed_duration_since(start);
    let difference = match args.interval(2)? {
        DateInterval::Year => i64::from(end.year() - start.year()),
        DateInterval::Month => {
            i64::from(end.year() - start.year()) * 12 + i64::from(end.month()) - i64::from(start.month())
        }
        DateInterval::DayOfYear | DateInterval::Day | DateInterval::WeekDay => elapsed.num_days(),
        DateInterval::Week => elapsed.num_days() / 7,
        DateInterval::Hour => elapsed.num_hours(),
        DateInterval::Minute => elapsed.num_minutes(),
        DateInterval::Second => elapsed.num_seconds(),
        DateInterval::Millisecond => elapsed.num_milliseconds(),
    };
    i32::try_from(difference)
        .map(Value::Int32)
        .map_err(|_| args.error("difference does not fit in an Int32"))
}

fn date_part(args: &Args<'_>) -> Result<Value> {
    let Some(date) = args.datetime(0)? else {
        return Ok(Value::Undefined);
    };
    let part = match args.interval(1)? {
        DateInterval::Year => date.year(),
        DateInterval::Month => date.month() as i32,
        DateInterval::DayOfYear => date.ordinal() as i32,
        DateInterval::Day => date.day() as i32,
        DateInterval::Week => week_of_year(date),
        DateInterval::WeekDay => date.weekday().num_days_from_sunday() as i32 + 1,
        DateInterval::Hour => date.hour() as i32,
        DateInterval::Minute => date.minute() as i32,
        DateInterval::Second => date.second() as i32,
        DateInterval::Millisecond => (date.nanosecond() / 1_000_000) as i32,
    };
    Ok(Value::Int32(part))
}

/// Week number where week 1 contains January 1st and weeks start on Sunday.
fn week_of_year(date: NaiveDateTime) -> i32 {
    let first_weekday = date
        .date()
        .with_ordinal(1)
        .map(|jan1| jan1.weekday().num_days_from_sunday())
        .unwrap_or(0);
    ((date.ordinal0() + first_weekday) / 7 + 1) as i32
}

fn regex_function(args: &Args<'_>) -> Result<Value> {
    let (Some(pattern), Some(text)) = (args.string(0)?, args.string(1)?) else {
        return Ok(Value::Undefined);
    };
    let re = get_or_compile_regex(pattern).map_err(|e| args.error(e.to_string()))?;
    Ok(match args.function {
        FunctionType::RegExMatch => Value::Boolean(re.is_match(text)),
        _ => Value::String(re.find(text).map(|m| m.as_str()).unwrap_or_default().to_string()),
    })
}

fn fold(text: &str, ignore_case: bool) -> Cow<'_, str> {
    if ignore_case {
        Cow::Owned(text.to_lowercase())
    } else {
        Cow::Borrowed(text)
    }
}

fn char_index(text: &str, byte_index: usize) -> i32 {
    i32::try_from(text[..byte_index].chars().count()).unwrap_or(i32::MAX)
}

fn case_insensitive_regex(args: &Args<'_>, literal: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){}", regex::escape(literal))).map_err(|e| args.error(e.to_string()))
}

fn string_function(args: &Args<'_>) -> Result<Value> {
    let Some(source) = args.string(0)? else {
        return Ok(Value::Undefined);
    };

    let value = match args.function {
        FunctionType::Len => Value::Int32(char_index(source, source.len())),
        FunctionType::Upper => Value::String(source.to_uppercase()),
        FunctionType::Lower => Value::String(source.to_lowercase()),
        FunctionType::Trim => Value::String(source.trim().to_string()),
        FunctionType::TrimLeft => Value::String(source.trim_start().to_string()),
        FunctionType::TrimRight => Value::String(source.trim_end().to_string()),
        FunctionType::Reverse => Value::String(source.chars().rev().collect()),
        FunctionType::SubStr => {
            let Some(index) = args.integer(1)? else {
                return Ok(Value::Undefined);
            };
            let length = args.integer(2)?;
            if index < 0 || length.is_some_and(|l| l < 0) {
                return Err(args.error("index and length must not be negative"));
            }
            let rest = source.chars().skip(index as usize);
            Value::String(match length {
                Some(length) => rest.take(length as usize).collect(),
                None => rest.collect(),
            })
        }
        FunctionType::Replace => {
            let (Some(test), Some(replacement)) = (args.string(1)?, args.string(2)?) else {
                return Ok(Value::Undefined);
            };
            if test.is_empty() {
                Value::String(source.to_string())
            } else if args.flag(3)? {
                let re = case_insensitive_regex(args, test)?;
                Value::String(re.replace_all(source, NoExpand(replacement)).into_owned())
            } else {
                Value::String(source.replace(test, replacement))
            }
        }
        FunctionType::Split => {
            let (Some(delimiter), Some(index)) = (args.string(1)?, args.integer(2)?) else {
                return Ok(Value::Undefined);
            };
            let parts: Vec<&str> = if delimiter.is_empty() {
                vec![source]
            } else if args.flag(3)? {
                case_insensitive_regex(args, delimiter)?.split(source).collect()
            } else {
                source.split(delimiter).collect()
            };
            usize::try_from(index)
                .ok()
                .and_then(|i| parts.get(i))
                .map(|part| Value::String(part.to_string()))
                .unwrap_or_default()
        }
        FunctionType::StrCmp => {
            let Some(other) = args.string(1)? else {
                return Ok(Value::Undefined);
            };
            let ordering = if args.flag(2)? {
                compare_ignore_case(source, other)
            } else {
                source.cmp(other)
            };
            Value::Int32(ordering as i32)
        }
        _ => return search_function(args, source),
    };
    Ok(value)
}

/// Substring searches sharing the `(source, test[, ..., ignoreCase])` shape.
fn search_function(args: &Args<'_>, source: &str) -> Result<Value> {
    let Some(test) = args.string(1)? else {
        return Ok(Value::Undefined);
    };
    let flag_index = if args.function == FunctionType::NthIndexOf { 3 } else { 2 };
    let ignore_case = args.flag(flag_index)?;
    let haystack = fold(source, ignore_case);
    let needle = fold(test, ignore_case);
    let (haystack, needle) = (haystack.as_ref(), needle.as_ref());

    let value = match args.function {
        FunctionType::Contains => Value::Boolean(haystack.contains(needle)),
        FunctionType::StartsWith => Value::Boolean(haystack.starts_with(needle)),
        FunctionType::EndsWith => Value::Boolean(haystack.ends_with(needle)),
        FunctionType::IndexOf => Value::Int32(
            haystack
                .find(needle)
                .map(|i| char_index(haystack, i))
                .unwrap_or(-1),
        ),
        FunctionType::LastIndexOf => Value::Int32(
            haystack
                .rfind(needle)
                .map(|i| char_index(haystack, i))
                .unwrap_or(-1),
        ),
        FunctionType::NthIndexOf => {
            let Some(occurrence) = args.integer(2)? else {
                return Ok(Value::Undefined);
            };
            let found = match usize::try_from(occurrence) {
                Ok(n) if n >= 1 && !needle.is_empty() => haystack
                    .match_indices(needle)
                    .nth(n - 1)
                    .map(|(i, _)| char_index(haystack, i)),
                _ => None,
            };
            Value::Int32(found.unwrap_or(-1))
        }
        FunctionType::StrCount => Value::Int32(if needle.is_empty() {
            0
        } else {
            i32::try_from(haystack.matches(needle).count()).unwrap_or(i32::MAX)
        }),
        other => {
            return Err(FilterExpressionError::evaluation(
                other.name(),
                "not a string function",
            ))
        }
    };
    Ok(value)
}
