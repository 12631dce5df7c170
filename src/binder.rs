//! Binder module: turns a parse tree into bound expression trees.
//!
//! `ExpressionTreeBuilder` listens to a `SyntaxTree` walk. Each exit callback
//! builds the expression for its node from the already built expressions of
//! its children, which are moved out of the memo map as they are consumed.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::ParserOptions;
use crate::expr::{ColumnReference, Expression, ExpressionTree, OrderByTerm, UnaryOperator};
use crate::functions::FunctionType;
use crate::parser::parse_integer;
use crate::syntax::{IdentifierKind, LiteralSyntax, NodeId, SyntaxListener, SyntaxNode, SyntaxTree};
use crate::table::{names_match, DataRow, DataSet, DataTable};
use crate::types::{parse_datetime, parse_guid, Value};
use crate::{FilterExpressionError, Result};

/// The tables a filter expression may refer to.
#[derive(Debug, Clone, Copy)]
pub enum TableScope<'a> {
    DataSet(&'a DataSet),
    /// A single table, which is also the primary table.
    Table(&'a DataTable),
}

impl<'a> TableScope<'a> {
    pub fn table(&self, name: &str) -> Option<&'a DataTable> {
        match self {
            TableScope::DataSet(data_set) => data_set.table(name),
            TableScope::Table(table) => names_match(table.name(), name).then_some(*table),
        }
    }

    /// Table that bare expressions and identifier statements bind to. A
    /// data set without a named primary table falls back to its only table.
    pub fn primary_table(&self, primary_table_name: Option<&str>) -> Option<&'a DataTable> {
        match (self, primary_table_name) {
            (TableScope::Table(table), _) => Some(*table),
            (TableScope::DataSet(data_set), Some(name)) => data_set.table(name),
            (TableScope::DataSet(data_set), None) => match data_set.tables() {
                [only] => Some(only),
                _ => None,
            },
        }
    }
}

/// A row or signal ID named directly by an identifier statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierMatch<'a> {
    pub signal_id: Option<Uuid>,
    pub row: Option<DataRow<'a>>,
}

#[derive(Debug, Default)]
pub struct BoundStatements<'a> {
    pub trees: Vec<ExpressionTree>,
    pub identifier_matches: Vec<IdentifierMatch<'a>>,
}

pub struct ExpressionTreeBuilder<'a> {
    scope: TableScope<'a>,
    options: ParserOptions,
    expressions: HashMap<NodeId, Expression>,
    active_table: Option<&'a DataTable>,
    current_tree: Option<ExpressionTree>,
    output: BoundStatements<'a>,
}

impl<'a> ExpressionTreeBuilder<'a> {
    pub fn new(scope: TableScope<'a>, options: &ParserOptions) -> Self {
        Self {
            scope,
            options: options.clone(),
            expressions: HashMap::new(),
            active_table: None,
            current_tree: None,
            output: BoundStatements::default(),
        }
    }

    /// Binds every statement of `tree`. Stops at the first error.
    pub fn bind(mut self, tree: &SyntaxTree) -> Result<BoundStatements<'a>> {
        tree.walk(&mut self)?;
        Ok(self.output)
    }

    fn primary_table(&self) -> Result<&'a DataTable> {
        self.scope
            .primary_table(self.options.primary_table_name.as_deref())
            .ok_or_else(|| match &self.options.primary_table_name {
                Some(name) => FilterExpressionError::Bind(format!(
                    "failed to find primary table \"{}\"",
                    name
                )),
                None => FilterExpressionError::Bind(
                    "no primary table is defined for expressions without a FILTER clause".to_string(),
                ),
            })
    }

    fn active_table(&self) -> Result<&'a DataTable> {
        self.active_table
            .ok_or_else(|| FilterExpressionError::Bind("no table is in scope".to_string()))
    }

    fn take(&mut self, id: NodeId) -> Result<Expression> {
        self.expressions.remove(&id).ok_or_else(|| {
            FilterExpressionError::Bind(format!("expression for syntax node {} was not built", id))
        })
    }

    fn take_boxed(&mut self, id: NodeId) -> Result<Box<Expression>> {
        self.take(id).map(Box::new)
    }

    fn take_all(&mut self, ids: &[NodeId]) -> Result<Vec<Expression>> {
        ids.iter().map(|&id| self.take(id)).collect()
    }

    fn resolve_column(&self, name: &str) -> Result<ColumnReference> {
        let table = self.active_table()?;
        let column = table.column(name).ok_or_else(|| {
            FilterExpressionError::Bind(format!(
                "failed to find column \"{}\" in table \"{}\"",
                name,
                table.name()
            ))
        })?;
        Ok(ColumnReference {
            name: column.name().to_string(),
            index: column.index(),
        })
    }

    fn resolve_identifier(&mut self, kind: IdentifierKind, text: &str) -> Result<()> {
        let table = self.primary_table()?;
        let fields = self.options.table_id_fields_for(table.name());
        let field_column = |field: &str| {
            table.column(field).map(|c| c.index()).ok_or_else(|| {
                FilterExpressionError::Configuration(format!(
                    "failed to find field \"{}\" in table \"{}\"",
                    field,
                    table.name()
                ))
            })
        };
        let signal_id_column = field_column(&fields.signal_id_field_name)?;

        let (search_column, target, literal_id) = match kind {
            IdentifierKind::Guid => {
                let guid = parse_guid(text).ok_or_else(|| {
                    FilterExpressionError::Bind(format!("\"{}\" is not a valid GUID literal", text))
                })?;
                (signal_id_column, Value::Guid(guid), Some(guid))
            }
            IdentifierKind::MeasurementKey => (
                field_column(&fields.measurement_key_field_name)?,
                Value::from(text),
                None,
            ),
            IdentifierKind::PointTag => (
                field_column(&fields.point_tag_field_name)?,
                Value::from(text),
                None,
            ),
        };

        let row = table.rows().find(|row| {
            matches!(
                row.value(search_column).compare(&target, false),
                Ok(Some(Ordering::Equal))
            )
        });
        let signal_id = match row {
            Some(row) => signal_id_value(row.value(signal_id_column)).or(literal_id),
            None => literal_id,
        };
        trace!(identifier = text, matched = row.is_some(), "identifier statement resolved");
        if row.is_some() || signal_id.is_some() {
            self.output
                .identifier_matches
                .push(IdentifierMatch { signal_id, row });
        }
        Ok(())
    }
}

/// Reads a signal ID cell, accepting Guid values or GUID text.
pub(crate) fn signal_id_value(value: &Value) -> Option<Uuid> {
    match value {
        Value::Guid(guid) => Some(*guid),
        Value::String(text) => parse_guid(text),
        _ => None,
    }
}

fn literal_value(literal: &LiteralSyntax) -> Result<Value> {
    let invalid = |what: &str, text: &str| {
        FilterExpressionError::Bind(format!("\"{}\" is not a valid {} literal", text, what))
    };
    Ok(match literal {
        LiteralSyntax::Null => Value::Undefined,
        LiteralSyntax::Boolean(b) => Value::Boolean(*b),
        LiteralSyntax::Integer(text) => match parse_integer(text) {
            Some(n) => {
                if let Ok(i) = i32::try_from(n) {
                    Value::Int32(i)
                } else if let Ok(i) = i64::try_from(n) {
                    Value::Int64(i)
                } else if let Ok(u) = u64::try_from(n) {
                    Value::UInt64(u)
                } else {
                    Value::Double(n as f64)
                }
            }
            None => text
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| invalid("integer", text))?,
        },
        LiteralSyntax::Numeric(text) => text
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| invalid("numeric", text))?,
        LiteralSyntax::String(text) => Value::String(text.clone()),
        LiteralSyntax::Guid(text) => parse_guid(text)
            .map(Value::Guid)
            .ok_or_else(|| invalid("GUID", text))?,
        LiteralSyntax::DateTime(text) => parse_datetime(text)
            .map(Value::DateTime)
            .ok_or_else(|| invalid("date/time", text))?,
        LiteralSyntax::MeasurementKey(text) | LiteralSyntax::PointTag(text) => {
            Value::String(text.clone())
        }
    })
}

impl<'a> SyntaxListener for ExpressionTreeBuilder<'a> {
    fn enter_statement(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        self.expressions.clear();
        self.active_table = None;
        self.current_tree = None;
        if let SyntaxNode::ExpressionStatement { .. } = tree.node(id) {
            let table = self.primary_table()?;
            self.active_table = Some(table);
            self.current_tree = Some(ExpressionTree::new(table.name()));
        }
        Ok(())
    }

    fn enter_filter_statement(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let SyntaxNode::FilterStatement(filter) = tree.node(id) else {
            return Ok(());
        };
        let table = self.scope.table(&filter.table).ok_or_else(|| {
            FilterExpressionError::Bind(format!("failed to find table \"{}\"", filter.table))
        })?;
        self.active_table = Some(table);

        let mut expression_tree = ExpressionTree::new(table.name());
        expression_tree.top_limit = filter.top_limit.unwrap_or(-1);
        for term in &filter.order_by {
            expression_tree.order_by_terms.push(OrderByTerm {
                column: self.resolve_column(&term.column)?,
                ascending: term.ascending,
                exact_match: term.exact_match,
            });
        }
        self.current_tree = Some(expression_tree);
        Ok(())
    }

    fn exit_identifier_statement(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let SyntaxNode::IdentifierStatement(literal) = tree.node(id) else {
            return Ok(());
        };
        if !self.options.track_filtered_rows && !self.options.track_filtered_signal_ids {
            trace!(identifier = %literal.text, "identifier statement skipped, tracking is disabled");
            return Ok(());
        }
        self.resolve_identifier(literal.kind, &literal.text)
    }

    fn exit_expression(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let expression = match tree.node(id) {
            SyntaxNode::NotExpression { operand } => Expression::Unary {
                op: UnaryOperator::Not,
                operand: self.take_boxed(*operand)?,
            },
            SyntaxNode::LogicalExpression { op, left, right } => Expression::Operator {
                op: *op,
                left: self.take_boxed(*left)?,
                right: self.take_boxed(*right)?,
            },
            _ => return Ok(()),
        };
        self.expressions.insert(id, expression);
        Ok(())
    }

    fn exit_predicate_expression(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let expression = match tree.node(id) {
            SyntaxNode::OperatorPredicate { op, left, right } => Expression::Operator {
                op: *op,
                left: self.take_boxed(*left)?,
                right: self.take_boxed(*right)?,
            },
            SyntaxNode::InPredicate {
                operand,
                list,
                negated,
                exact_match,
            } => Expression::InList {
                operand: self.take_boxed(*operand)?,
                list: self.take_all(list)?,
                negated: *negated,
                exact_match: *exact_match,
            },
            SyntaxNode::IsNullPredicate { operand, negated } => Expression::IsNull {
                operand: self.take_boxed(*operand)?,
                negated: *negated,
            },
            _ => return Ok(()),
        };
        self.expressions.insert(id, expression);
        Ok(())
    }

    fn exit_value_expression(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let expression = match tree.node(id) {
            SyntaxNode::UnaryValue { op, operand } => Expression::Unary {
                op: *op,
                operand: self.take_boxed(*operand)?,
            },
            SyntaxNode::BinaryValue { op, left, right } => Expression::Operator {
                op: *op,
                left: self.take_boxed(*left)?,
                right: self.take_boxed(*right)?,
            },
            _ => return Ok(()),
        };
        self.expressions.insert(id, expression);
        Ok(())
    }

    fn exit_literal_value(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        if let SyntaxNode::Literal(literal) = tree.node(id) {
            let value = literal_value(literal)?;
            self.expressions.insert(id, Expression::Value(value));
        }
        Ok(())
    }

    fn exit_column_name(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        if let SyntaxNode::ColumnName(name) = tree.node(id) {
            let column = self.resolve_column(name)?;
            self.expressions.insert(id, Expression::Column(column));
        }
        Ok(())
    }

    fn exit_function_expression(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let SyntaxNode::FunctionCall { name, arguments } = tree.node(id) else {
            return Ok(());
        };
        let function = FunctionType::from_name(name)
            .ok_or_else(|| FilterExpressionError::Bind(format!("unknown function \"{}\"", name)))?;
        if !function.accepts(arguments.len()) {
            return Err(FilterExpressionError::Bind(format!(
                "\"{}\" function expects {} arguments, received {}",
                function.name(),
                function.arity_description(),
                arguments.len()
            )));
        }
        let arguments = self.take_all(arguments)?;
        self.expressions
            .insert(id, Expression::Function { function, arguments });
        Ok(())
    }

    fn exit_statement(&mut self, tree: &SyntaxTree, id: NodeId) -> Result<()> {
        let root = match tree.node(id) {
            SyntaxNode::FilterStatement(filter) => filter.expression,
            SyntaxNode::ExpressionStatement { expression } => *expression,
            _ => return Ok(()),
        };
        let root = self.take(root)?;
        if let Some(mut expression_tree) = self.current_tree.take() {
            expression_tree.root = Some(root);
            debug!(
                table = %expression_tree.table_name,
                top = expression_tree.top_limit,
                expression = %expression_tree.root.as_ref().map(ToString::to_string).unwrap_or_default(),
                "expression tree bound"
            );
            self.output.trees.push(expression_tree);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SyntaxParser;
    use crate::config::TableIdFields;
    use crate::table::DataTableBuilder;
    use crate::types::ValueType;

    const SIGNAL_ID: &str = "9448a8f5-f5f1-4f46-9d9a-6c6e7bb0b6d1";

    fn data_set() -> DataSet {
        let mut table = DataTableBuilder::new("ActiveMeasurements")
            .column("SignalID", ValueType::Guid)
            .column("ID", ValueType::String)
            .column("PointTag", ValueType::String)
            .build();
        table
            .add_row(vec![
                Value::Guid(Uuid::parse_str(SIGNAL_ID).unwrap()),
                Value::from("PPA:1"),
                Value::from("DEV:FREQ"),
            ])
            .unwrap();
        table
            .add_row(vec![Value::Guid(Uuid::new_v4()), Value::from("PPA:2"), Value::from("DEV:VPHM")])
            .unwrap();
        let mut data_set = DataSet::new();
        data_set.add_table(table);
        data_set.add_table(DataTableBuilder::new("Other").build());
        data_set
    }

    fn options() -> ParserOptions {
        ParserOptions {
            primary_table_name: Some("ActiveMeasurements".to_string()),
            ..ParserOptions::default()
        }
    }

    fn bind<'a>(data_set: &'a DataSet, text: &str, options: &ParserOptions) -> Result<BoundStatements<'a>> {
        let tree = SyntaxParser::parse(text)?;
        ExpressionTreeBuilder::new(TableScope::DataSet(data_set), options).bind(&tree)
    }

    #[test]
    fn test_bind_filter_statement() {
        let data_set = data_set();
        let bound = bind(
            &data_set,
            "FILTER TOP 5 activemeasurements WHERE id LIKE 'PPA:%' ORDER BY PointTag DESC",
            &options(),
        )
        .unwrap();
        assert_eq!(bound.trees.len(), 1);
        let tree = &bound.trees[0];
        assert_eq!(tree.table_name, "ActiveMeasurements");
        assert_eq!(tree.top_limit, 5);
        assert_eq!(tree.order_by_terms[0].column.index, 2);
        assert!(!tree.order_by_terms[0].ascending);
        match &tree.root {
            Some(Expression::Operator { left, .. }) => assert_eq!(
                **left,
                Expression::Column(ColumnReference {
                    name: "ID".to_string(),
                    index: 1
                })
            ),
            other => panic!("Expected operator root, got {:?}", other),
        }
    }

    #[test]
    fn test_integer_literal_typing() {
        let values: Vec<Value> = ["1", "2147483648", "18446744073709551615", "99999999999999999999999", "0xFF", "1.5"]
            .iter()
            .map(|text| {
                let literal = if text.contains('.') {
                    LiteralSyntax::Numeric(text.to_string())
                } else {
                    LiteralSyntax::Integer(text.to_string())
                };
                literal_value(&literal).unwrap()
            })
            .collect();
        assert_eq!(values[0], Value::Int32(1));
        assert_eq!(values[1], Value::Int64(2147483648));
        assert_eq!(values[2], Value::UInt64(u64::MAX));
        assert_eq!(values[3].value_type(), ValueType::Double);
        assert_eq!(values[4], Value::Int32(255));
        assert_eq!(values[5], Value::Double(1.5));
    }

    #[test]
    fn test_invalid_literals_are_bind_errors() {
        assert!(matches!(
            literal_value(&LiteralSyntax::DateTime("not a date".into())),
            Err(FilterExpressionError::Bind(_))
        ));
        let data_set = data_set();
        assert!(matches!(
            bind(&data_set, "ID = #2019-13-45#", &options()),
            Err(FilterExpressionError::Bind(_))
        ));
    }

    #[test]
    fn test_bind_errors() {
        let data_set = data_set();
        let cases = [
            "FILTER Missing WHERE TRUE",
            "FILTER ActiveMeasurements WHERE Nope = 1",
            "FILTER ActiveMeasurements WHERE TRUE ORDER BY Nope",
            "NOSUCHFUNC(ID)",
            "LEN(ID, ID)",
            "FILTER Other WHERE ID = 1",
        ];
        for text in cases {
            assert!(
                matches!(bind(&data_set, text, &options()), Err(FilterExpressionError::Bind(_))),
                "{} should fail to bind",
                text
            );
        }
    }

    #[test]
    fn test_expression_statement_uses_primary_table() {
        let data_set = data_set();
        let bound = bind(&data_set, "ID = 'PPA:1'; LEN(PointTag) > 3", &options()).unwrap();
        assert_eq!(bound.trees.len(), 2);
        assert!(bound.trees.iter().all(|t| t.table_name == "ActiveMeasurements"));
        assert_eq!(bound.trees[0].top_limit, -1);

        let no_primary = ParserOptions::default();
        assert!(matches!(
            bind(&data_set, "ID = 'PPA:1'", &no_primary),
            Err(FilterExpressionError::Bind(_))
        ));
    }

    #[test]
    fn test_identifier_statements_resolve_rows() {
        let data_set = data_set();
        let text = format!("{{{}}}; PPA:2; \"dev:freq\"; \"DEV:NONE\"", SIGNAL_ID);
        let bound = bind(&data_set, &text, &options()).unwrap();
        assert!(bound.trees.is_empty());
        let rows: Vec<_> = bound
            .identifier_matches
            .iter()
            .map(|m| m.row.map(|r| r.index()))
            .collect();
        assert_eq!(rows, vec![Some(0), Some(1), Some(0)]);
        assert_eq!(
            bound.identifier_matches[0].signal_id,
            Some(Uuid::parse_str(SIGNAL_ID).unwrap())
        );
    }

    #[test]
    fn test_identifier_statements_skipped_without_tracking() {
        let data_set = data_set();
        let options = ParserOptions {
            track_filtered_rows: false,
            track_filtered_signal_ids: false,
            ..options()
        };
        let bound = bind(&data_set, "PPA:2", &options).unwrap();
        assert!(bound.identifier_matches.is_empty());
    }

    #[test]
    fn test_identifier_missing_field_is_configuration_error() {
        let data_set = data_set();
        let mut options = options();
        options.table_id_fields.insert(
            "ActiveMeasurements".to_string(),
            TableIdFields {
                point_tag_field_name: "Tag".to_string(),
                ..TableIdFields::default()
            },
        );
        assert!(matches!(
            bind(&data_set, "\"DEV:FREQ\"", &options),
            Err(FilterExpressionError::Configuration(_))
        ));
    }

    #[test]
    fn test_single_table_scope_is_primary() {
        let data_set = data_set();
        let table = data_set.table("ActiveMeasurements").unwrap();
        let tree = SyntaxParser::parse("ID = 'PPA:1'").unwrap();
        let bound = ExpressionTreeBuilder::new(TableScope::Table(table), &ParserOptions::default())
            .bind(&tree)
            .unwrap();
        assert_eq!(bound.trees[0].table_name, "ActiveMeasurements");
    }
}
