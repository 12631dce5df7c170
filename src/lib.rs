//! Filterexpr: a filter expression engine for time-series metadata tables.
//!
//! Filter expressions select rows from in-memory tables, for example
//! `FILTER TOP 10 ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY PointTag`,
//! or compute scalar values from a single row, for example `ABS(Value) > 5`.
//!
//! # Architecture
//! - Lexer and recursive-descent parser producing an arena parse tree
//! - Binder walking the parse tree and building typed expression trees
//! - Evaluator reducing an expression tree against a data row
//! - Filter driver orchestrating parse, bind, scan, sort and limit

mod binder;
mod config;
mod eval;
mod expr;
mod filter;
mod functions;
mod lexer;
mod parser;
mod syntax;
mod table;
mod types;

pub use binder::*;
pub use config::*;
pub use eval::*;
pub use expr::*;
pub use filter::*;
pub use functions::*;
pub use lexer::*;
pub use parser::*;
pub use syntax::*;
pub use table::*;
pub use types::*;

use thiserror::Error;

/// Unified error type for filter expression operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterExpressionError {
    #[error("Lexical error at line {line}, column {column}: unexpected \"{text}\"")]
    Lexical {
        text: String,
        line: usize,
        column: usize,
    },
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Bind error: {0}")]
    Bind(String),
    #[error("Evaluation error in {operation}: {message}")]
    Evaluation { operation: String, message: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl FilterExpressionError {
    pub(crate) fn evaluation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        FilterExpressionError::Evaluation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before any row is touched: lexical, syntax
    /// and bind failures.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            FilterExpressionError::Lexical { .. }
                | FilterExpressionError::Syntax { .. }
                | FilterExpressionError::Bind(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FilterExpressionError>;
