//! Filter module: the driver that parses, binds and runs filter expressions.
//!
//! `FilterExpressionParser` evaluates every statement of an expression
//! against a data set and accumulates the matched rows and signal IDs. The
//! associated functions `select`, `evaluate_row` and
//! `generate_expression_trees` work against a single table.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::binder::{signal_id_value, BoundStatements, ExpressionTreeBuilder, TableScope};
use crate::config::{ParserOptions, TableIdFields};
use crate::expr::ExpressionTree;
use crate::parser::SyntaxParser;
use crate::table::{names_match, DataRow, DataSet, DataTable};
use crate::types::Value;
use crate::{FilterExpressionError, Result};

/// Callback invoked with the parser and the message of every parse, bind
/// or configuration error.
pub type ParsingExceptionCallback =
    Arc<dyn Fn(&FilterExpressionParser<'_>, &str) + Send + Sync>;

pub struct FilterExpressionParser<'a> {
    filter_expression: String,
    options: ParserOptions,
    data_set: Option<&'a DataSet>,
    callback: Option<ParsingExceptionCallback>,
    expression_trees: Vec<ExpressionTree>,
    filtered_rows: Vec<DataRow<'a>>,
    filtered_signal_ids: Vec<Uuid>,
    filtered_signal_id_set: HashSet<Uuid>,
}

impl<'a> FilterExpressionParser<'a> {
    pub fn new(filter_expression: impl Into<String>) -> Self {
        Self::with_options(filter_expression, ParserOptions::default())
    }

    pub fn with_options(filter_expression: impl Into<String>, options: ParserOptions) -> Self {
        Self {
            filter_expression: filter_expression.into(),
            options,
            data_set: None,
            callback: None,
            expression_trees: Vec::new(),
            filtered_rows: Vec::new(),
            filtered_signal_ids: Vec::new(),
            filtered_signal_id_set: HashSet::new(),
        }
    }

    pub fn filter_expression(&self) -> &str {
        &self.filter_expression
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn set_data_set(&mut self, data_set: &'a DataSet) {
        self.data_set = Some(data_set);
    }

    pub fn data_set(&self) -> Option<&'a DataSet> {
        self.data_set
    }

    pub fn set_primary_table_name(&mut self, name: impl Into<String>) {
        self.options.primary_table_name = Some(name.into());
    }

    pub fn primary_table_name(&self) -> Option<&str> {
        self.options.primary_table_name.as_deref()
    }

    pub fn set_table_id_fields(&mut self, table_name: impl Into<String>, fields: TableIdFields) {
        let table_name = table_name.into();
        self.options
            .table_id_fields
            .retain(|name, _| !names_match(name, &table_name));
        self.options.table_id_fields.insert(table_name, fields);
    }

    pub fn table_id_fields(&self, table_name: &str) -> TableIdFields {
        self.options.table_id_fields_for(table_name)
    }

    pub fn register_parsing_exception_callback<F>(&mut self, callback: F)
    where
        F: Fn(&FilterExpressionParser<'_>, &str) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    pub fn set_suppress_console_error_output(&mut self, suppress: bool) {
        self.options.suppress_console_error_output = suppress;
    }

    pub fn suppress_console_error_output(&self) -> bool {
        self.options.suppress_console_error_output
    }

    pub fn set_track_filtered_signal_ids(&mut self, track: bool) {
        self.options.track_filtered_signal_ids = track;
    }

    pub fn track_filtered_signal_ids(&self) -> bool {
        self.options.track_filtered_signal_ids
    }

    pub fn set_track_filtered_rows(&mut self, track: bool) {
        self.options.track_filtered_rows = track;
    }

    pub fn track_filtered_rows(&self) -> bool {
        self.options.track_filtered_rows
    }

    /// Signal IDs matched by the last `evaluate`, in match order.
    pub fn filtered_signal_ids(&self) -> &[Uuid] {
        &self.filtered_signal_ids
    }

    pub fn filtered_signal_id_set(&self) -> &HashSet<Uuid> {
        &self.filtered_signal_id_set
    }

    pub fn filtered_rows(&self) -> &[DataRow<'a>] {
        &self.filtered_rows
    }

    pub fn expression_trees(&self) -> &[ExpressionTree] {
        &self.expression_trees
    }

    /// Runs every statement of the filter expression against the data set.
    ///
    /// Identifier statements contribute their rows first, then each filter
    /// or expression statement contributes the rows it selects. A row whose
    /// signal ID was already matched is not added twice. Outputs from a
    /// previous call are cleared.
    pub fn evaluate(&mut self) -> Result<()> {
        let data_set = self.data_set.ok_or_else(|| {
            FilterExpressionError::InvalidOperation(
                "cannot evaluate filter expression, no data set has been defined".to_string(),
            )
        })?;
        if !self.options.track_filtered_rows && !self.options.track_filtered_signal_ids {
            return Err(FilterExpressionError::InvalidOperation(
                "no use in evaluating filter expression, neither filtered rows nor signal IDs have been set for tracking"
                    .to_string(),
            ));
        }

        self.expression_trees.clear();
        self.filtered_rows.clear();
        self.filtered_signal_ids.clear();
        self.filtered_signal_id_set.clear();

        let BoundStatements {
            trees,
            identifier_matches,
        } = self.parse_and_bind(TableScope::DataSet(data_set))?;

        // Every table must expose its signal ID field before any match is recorded
        let mut targets = Vec::with_capacity(trees.len());
        for tree in &trees {
            let table = data_set.table(&tree.table_name).ok_or_else(|| {
                FilterExpressionError::Bind(format!("failed to find table \"{}\"", tree.table_name))
            })?;
            let fields = self.options.table_id_fields_for(table.name());
            match table.column(&fields.signal_id_field_name) {
                Some(column) => targets.push((table, column.index())),
                None => {
                    let error = FilterExpressionError::Configuration(format!(
                        "failed to find signal ID field \"{}\" in table \"{}\"",
                        fields.signal_id_field_name,
                        table.name()
                    ));
                    self.report(&error);
                    return Err(error);
                }
            }
        }

        let mut selections = Vec::with_capacity(trees.len());
        for (tree, (table, signal_id_column)) in trees.iter().zip(targets) {
            let rows = tree.select(table)?;
            debug!(table = table.name(), matched = rows.len(), "filter statement evaluated");
            selections.push((rows, signal_id_column));
        }

        let mut seen = HashSet::new();
        for matched in identifier_matches {
            self.add_match(matched.signal_id, matched.row, &mut seen);
        }
        for (rows, signal_id_column) in selections {
            for row in rows {
                self.add_match(signal_id_value(row.value(signal_id_column)), Some(row), &mut seen);
            }
        }

        self.expression_trees = trees;
        Ok(())
    }

    fn add_match(&mut self, signal_id: Option<Uuid>, row: Option<DataRow<'a>>, seen: &mut HashSet<Uuid>) {
        if let Some(signal_id) = signal_id {
            if !seen.insert(signal_id) {
                trace!(%signal_id, "duplicate signal ID skipped");
                return;
            }
            if self.options.track_filtered_signal_ids {
                self.filtered_signal_ids.push(signal_id);
                self.filtered_signal_id_set.insert(signal_id);
            }
        }
        if let (Some(row), true) = (row, self.options.track_filtered_rows) {
            self.filtered_rows.push(row);
        }
    }

    fn parse_and_bind<'s>(&self, scope: TableScope<'s>) -> Result<BoundStatements<'s>> {
        let result = SyntaxParser::parse(&self.filter_expression)
            .and_then(|tree| ExpressionTreeBuilder::new(scope, &self.options).bind(&tree));
        if let Err(error) = &result {
            self.report(error);
        }
        result
    }

    fn report(&self, error: &FilterExpressionError) {
        let message = error.to_string();
        if self.options.suppress_console_error_output {
            debug!(expression = %self.filter_expression, "{}", message);
        } else {
            error!(expression = %self.filter_expression, "{}", message);
        }
        if let Some(callback) = &self.callback {
            callback(self, &message);
        }
    }

    fn for_table(table: &DataTable, filter_expression: &str, suppress_console_error_output: bool) -> Self {
        Self::with_options(
            filter_expression,
            ParserOptions {
                suppress_console_error_output,
                track_filtered_signal_ids: false,
                track_filtered_rows: false,
                primary_table_name: Some(table.name().to_string()),
                ..ParserOptions::default()
            },
        )
    }

    /// Parses and binds `filter_expression` against `table`, which is also
    /// the primary table for bare expressions.
    pub fn generate_expression_trees(
        table: &DataTable,
        filter_expression: &str,
        suppress_console_error_output: bool,
    ) -> Result<Vec<ExpressionTree>> {
        let parser = Self::for_table(table, filter_expression, suppress_console_error_output);
        Ok(parser.parse_and_bind(TableScope::Table(table))?.trees)
    }

    /// Like `generate_expression_trees`, but requires exactly one statement.
    pub fn generate_expression_tree(
        table: &DataTable,
        filter_expression: &str,
        suppress_console_error_output: bool,
    ) -> Result<ExpressionTree> {
        let mut trees =
            Self::generate_expression_trees(table, filter_expression, suppress_console_error_output)?;
        match trees.len() {
            1 => trees.pop().ok_or_else(|| {
                FilterExpressionError::InvalidOperation("no expression trees generated".to_string())
            }),
            0 => Err(FilterExpressionError::InvalidOperation(format!(
                "no expression trees generated with filter expression \"{}\" for table \"{}\"",
                filter_expression,
                table.name()
            ))),
            count => Err(FilterExpressionError::InvalidOperation(format!(
                "filter expression \"{}\" produced {} expression trees, expected one",
                filter_expression, count
            ))),
        }
    }

    /// Evaluates a single expression against one row. Evaluation errors are
    /// returned rather than treated as a non-match.
    pub fn evaluate_row(
        row: DataRow<'_>,
        filter_expression: &str,
        suppress_console_error_output: bool,
    ) -> Result<Value> {
        Self::generate_expression_tree(row.table(), filter_expression, suppress_console_error_output)?
            .evaluate(row)
    }

    /// Selects the rows of `table` matched by a single statement.
    pub fn select<'t>(
        table: &'t DataTable,
        filter_expression: &str,
        suppress_console_error_output: bool,
    ) -> Result<Vec<DataRow<'t>>> {
        Self::generate_expression_tree(table, filter_expression, suppress_console_error_output)?
            .select(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DataTableBuilder;
    use crate::types::ValueType;
    use std::sync::Mutex;

    fn measurements() -> DataTable {
        let mut table = DataTableBuilder::new("ActiveMeasurements")
            .column("SignalID", ValueType::Guid)
            .column("ID", ValueType::String)
            .column("PointTag", ValueType::String)
            .column("SignalType", ValueType::String)
            .build();
        let rows = [
            ("PPA:1", "SHELBY:FREQ", "FREQ"),
            ("PPA:2", "SHELBY:VA", "PHA"),
            ("PPA:3", "ALPHA:FREQ", "FREQ"),
            ("PPA:4", "SHELBY:IM", "PHM"),
            ("PPA:5", "MIDDLE:FREQ", "FREQ"),
        ];
        for (id, tag, signal_type) in rows {
            table
                .add_row(vec![
                    Value::Guid(Uuid::new_v4()),
                    Value::from(id),
                    Value::from(tag),
                    Value::from(signal_type),
                ])
                .unwrap();
        }
        table
    }

    fn data_set() -> DataSet {
        let mut data_set = DataSet::new();
        data_set.add_table(measurements());
        data_set
    }

    fn tags(rows: &[DataRow<'_>]) -> Vec<String> {
        rows.iter().map(|row| row.value(2).to_string()).collect()
    }

    #[test]
    fn test_evaluate_tracks_rows_and_signal_ids() {
        let data_set = data_set();
        let mut parser = FilterExpressionParser::new(
            "FILTER ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY PointTag",
        );
        parser.set_data_set(&data_set);
        parser.set_track_filtered_signal_ids(true);
        parser.evaluate().unwrap();

        assert_eq!(
            tags(parser.filtered_rows()),
            vec!["ALPHA:FREQ", "MIDDLE:FREQ", "SHELBY:FREQ"]
        );
        assert_eq!(parser.filtered_signal_ids().len(), 3);
        assert_eq!(parser.filtered_signal_id_set().len(), 3);
        assert_eq!(parser.expression_trees().len(), 1);
    }

    #[test]
    fn test_evaluate_deduplicates_across_statements() {
        let data_set = data_set();
        let mut parser = FilterExpressionParser::new(
            "PPA:3; FILTER ActiveMeasurements WHERE SignalType = 'FREQ'; ID = 'PPA:1'",
        );
        parser.set_data_set(&data_set);
        parser.set_primary_table_name("ActiveMeasurements");
        parser.set_track_filtered_signal_ids(true);
        parser.evaluate().unwrap();

        let ids: Vec<String> = parser
            .filtered_rows()
            .iter()
            .map(|row| row.value(1).to_string())
            .collect();
        assert_eq!(ids, vec!["PPA:3", "PPA:1", "PPA:5"]);
        assert_eq!(parser.filtered_signal_ids().len(), 3);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let data_set = data_set();
        let mut parser =
            FilterExpressionParser::new("FILTER ActiveMeasurements WHERE ID LIKE 'PPA:%'");
        parser.set_data_set(&data_set);
        parser.evaluate().unwrap();
        let first = parser.filtered_rows().to_vec();
        parser.evaluate().unwrap();
        assert_eq!(parser.filtered_rows(), first.as_slice());
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_evaluate_requires_data_set_and_tracking() {
        let data_set = data_set();
        let mut parser = FilterExpressionParser::new("FILTER ActiveMeasurements WHERE TRUE");
        assert!(matches!(
            parser.evaluate(),
            Err(FilterExpressionError::InvalidOperation(_))
        ));

        parser.set_data_set(&data_set);
        parser.set_track_filtered_rows(false);
        parser.set_track_filtered_signal_ids(false);
        assert!(matches!(
            parser.evaluate(),
            Err(FilterExpressionError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_missing_signal_id_field_is_configuration_error() {
        let data_set = data_set();
        let mut parser = FilterExpressionParser::new("FILTER ActiveMeasurements WHERE TRUE");
        parser.set_data_set(&data_set);
        parser.set_table_id_fields(
            "activemeasurements",
            TableIdFields {
                signal_id_field_name: "Guid".to_string(),
                ..TableIdFields::default()
            },
        );
        assert_eq!(
            parser.table_id_fields("ActiveMeasurements").signal_id_field_name,
            "Guid"
        );
        assert!(matches!(
            parser.evaluate(),
            Err(FilterExpressionError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_signal_id_field_leaves_no_partial_results() {
        let mut data_set = data_set();
        let mut devices = DataTableBuilder::new("Devices")
            .column("Acronym", ValueType::String)
            .build();
        devices.add_row(vec![Value::from("SHELBY")]).unwrap();
        data_set.add_table(devices);

        let mut parser = FilterExpressionParser::new(
            "PPA:1; FILTER ActiveMeasurements WHERE TRUE; FILTER Devices WHERE TRUE",
        );
        parser.set_data_set(&data_set);
        parser.set_primary_table_name("ActiveMeasurements");
        parser.set_track_filtered_signal_ids(true);
        assert!(matches!(
            parser.evaluate(),
            Err(FilterExpressionError::Configuration(_))
        ));
        assert!(parser.filtered_rows().is_empty());
        assert!(parser.filtered_signal_ids().is_empty());
        assert!(parser.filtered_signal_id_set().is_empty());
        assert!(parser.expression_trees().is_empty());
    }

    #[test]
    fn test_callback_receives_parse_errors() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let data_set = data_set();
        let mut parser = FilterExpressionParser::new("FILTER ActiveMeasurements WHERE Missing = 1");
        parser.set_data_set(&data_set);
        parser.set_suppress_console_error_output(true);
        parser.register_parsing_exception_callback(move |parser, message| {
            sink.lock()
                .unwrap()
                .push(format!("{} | {}", parser.filter_expression(), message));
        });

        let error = parser.evaluate().unwrap_err();
        assert!(matches!(error, FilterExpressionError::Bind(_)));
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Missing"));
        assert!(parser.filtered_rows().is_empty());
        assert!(parser.expression_trees().is_empty());
    }

    #[test]
    fn test_static_select_with_top_and_order() {
        let table = measurements();
        let rows = FilterExpressionParser::select(
            &table,
            "FILTER TOP 2 ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY PointTag",
            true,
        )
        .unwrap();
        assert_eq!(tags(&rows), vec!["ALPHA:FREQ", "MIDDLE:FREQ"]);
    }

    #[test]
    fn test_static_select_bare_expression() {
        let table = measurements();
        let rows = FilterExpressionParser::select(&table, "SignalType <> 'FREQ'", true).unwrap();
        assert_eq!(tags(&rows), vec!["SHELBY:VA", "SHELBY:IM"]);
    }

    #[test]
    fn test_generate_expression_tree_requires_single_statement() {
        let table = measurements();
        let trees =
            FilterExpressionParser::generate_expression_trees(&table, "ID = 'PPA:1'; TRUE", true)
                .unwrap();
        assert_eq!(trees.len(), 2);
        assert!(matches!(
            FilterExpressionParser::generate_expression_tree(&table, "ID = 'PPA:1'; TRUE", true),
            Err(FilterExpressionError::InvalidOperation(_))
        ));
        assert!(matches!(
            FilterExpressionParser::generate_expression_tree(&table, "PPA:1", true),
            Err(FilterExpressionError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_evaluate_row_scalar_results() {
        let table = measurements();
        let row = table.row(0).unwrap();
        assert_eq!(
            FilterExpressionParser::evaluate_row(row, "ABS(-5) = 5", true).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            FilterExpressionParser::evaluate_row(row, "SUBSTR('ActiveMeasurements', 0, 6)", true)
                .unwrap(),
            Value::from("Active")
        );
        assert!(matches!(
            FilterExpressionParser::evaluate_row(row, "1 / 0", true),
            Err(FilterExpressionError::Evaluation { .. })
        ));
        assert_eq!(
            FilterExpressionParser::evaluate_row(row, "1.0 / 0.0", true).unwrap(),
            Value::Double(f64::INFINITY)
        );
    }

    #[test]
    fn test_static_helpers_reject_other_tables() {
        let table = measurements();
        assert!(matches!(
            FilterExpressionParser::select(&table, "FILTER Devices WHERE TRUE", true),
            Err(FilterExpressionError::Bind(_))
        ));
    }
}
