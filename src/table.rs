//! Table module: the in-memory tables a filter expression is evaluated against.
//!
//! This module provides DataSet, DataTable (with its builder), DataColumn and
//! the borrowed DataRow handle. Table and column names resolve
//! case-insensitively.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Value, ValueType, UNDEFINED};
use crate::{FilterExpressionError, Result};

fn lookup_key(name: &str) -> String {
    name.to_lowercase()
}

/// Table and column name equality, using the same folding as lookups.
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a == b || lookup_key(a) == lookup_key(b)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataColumn {
    name: String,
    data_type: ValueType,
    index: usize,
}

impl DataColumn {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn data_type(&self) -> ValueType {
        self.data_type
    }
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTable {
    name: String,
    columns: Vec<DataColumn>,
    column_ids: HashMap<String, usize>, // lowercase name -> index
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    /// Looks up a column by name, ignoring case.
    pub fn column(&self, name: &str) -> Option<&DataColumn> {
        self.column_ids
            .get(&lookup_key(name))
            .and_then(|&id| self.columns.get(id))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<DataRow<'_>> {
        (index < self.rows.len()).then_some(DataRow { table: self, index })
    }

    /// Rows in storage order.
    pub fn rows(&self) -> impl Iterator<Item = DataRow<'_>> + '_ {
        (0..self.rows.len()).map(move |index| DataRow { table: self, index })
    }

    /// Appends a row. Values are given in column order and must either match
    /// the column type or be Undefined; missing trailing values are Undefined.
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<usize> {
        if values.len() > self.columns.len() {
            return Err(FilterExpressionError::InvalidOperation(format!(
                "row has {} values but table \"{}\" defines {} columns",
                values.len(),
                self.name,
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(&values) {
            check_type(column, value)?;
        }
        let mut values = values;
        values.resize(self.columns.len(), Value::Undefined);
        self.rows.push(values);
        Ok(self.rows.len() - 1)
    }

    /// Replaces a single cell, type checking it against the column.
    pub fn set_value(&mut self, row: usize, column: &str, value: Value) -> Result<()> {
        let column = self.column(column).cloned().ok_or_else(|| {
            FilterExpressionError::InvalidOperation(format!(
                "column \"{}\" not found in table \"{}\"",
                column, self.name
            ))
        })?;
        check_type(&column, &value)?;
        let table_name = self.name.clone();
        let cells = self.rows.get_mut(row).ok_or_else(|| {
            FilterExpressionError::InvalidOperation(format!(
                "row {} out of range for table \"{}\"",
                row, table_name
            ))
        })?;
        cells[column.index] = value;
        Ok(())
    }
}

fn check_type(column: &DataColumn, value: &Value) -> Result<()> {
    if value.is_undefined() || value.value_type() == column.data_type {
        Ok(())
    } else {
        Err(FilterExpressionError::InvalidOperation(format!(
            "type mismatch for column \"{}\": expected {}, got {}",
            column.name,
            column.data_type,
            value.value_type()
        )))
    }
}

#[derive(Debug, Default)]
pub struct DataTableBuilder {
    name: String,
    columns: Vec<(String, ValueType)>,
}

impl DataTableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column. Redefining a name (ignoring case) replaces its type
    /// and keeps its position.
    pub fn column(mut self, name: impl Into<String>, data_type: ValueType) -> Self {
        let name = name.into();
        match self
            .columns
            .iter_mut()
            .find(|(existing, _)| names_match(existing, &name))
        {
            Some(existing) => existing.1 = data_type,
            None => self.columns.push((name, data_type)),
        }
        self
    }

    pub fn build(self) -> DataTable {
        let mut columns = Vec::with_capacity(self.columns.len());
        let mut column_ids = HashMap::new();
        for (index, (name, data_type)) in self.columns.into_iter().enumerate() {
            column_ids.insert(lookup_key(&name), index);
            columns.push(DataColumn {
                name,
                data_type,
                index,
            });
        }
        DataTable {
            name: self.name,
            columns,
            column_ids,
            rows: Vec::new(),
        }
    }
}

/// A borrowed handle to one row of a table. Valid for as long as the table
/// is borrowed, which is the snapshot a select or evaluate call runs over.
#[derive(Clone, Copy)]
pub struct DataRow<'a> {
    table: &'a DataTable,
    index: usize,
}

impl<'a> DataRow<'a> {
    pub fn table(&self) -> &'a DataTable {
        self.table
    }

    /// Position of the row in its table's storage order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &'a [Value] {
        &self.table.rows[self.index]
    }

    /// Cell value by column index; Undefined when out of range.
    pub fn value(&self, column: usize) -> &'a Value {
        self.values().get(column).unwrap_or(&UNDEFINED)
    }

    pub fn value_by_name(&self, column: &str) -> Option<&'a Value> {
        self.table.column(column).map(|c| self.value(c.index))
    }
}

impl PartialEq for DataRow<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.table, other.table) && self.index == other.index
    }
}

impl fmt::Debug for DataRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRow")
            .field("table", &self.table.name)
            .field("index", &self.index)
            .field("values", &self.values())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSet {
    tables: Vec<DataTable>,
    table_ids: HashMap<String, usize>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, replacing any existing table with the same name.
    pub fn add_table(&mut self, table: DataTable) {
        let key = lookup_key(&table.name);
        match self.table_ids.get(&key) {
            Some(&id) => self.tables[id] = table,
            None => {
                self.table_ids.insert(key, self.tables.len());
                self.tables.push(table);
            }
        }
    }

    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.table_ids
            .get(&lookup_key(name))
            .and_then(|&id| self.tables.get(id))
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut DataTable> {
        match self.table_ids.get(&lookup_key(name)) {
            Some(&id) => self.tables.get_mut(id),
            None => None,
        }
    }

    pub fn tables(&self) -> &[DataTable] {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    fn table() -> DataTable {
        let mut table = DataTableBuilder::new("ActiveMeasurements")
            .column("ID", ValueType::String)
            .column("Adder", ValueType::Double)
            .build();
        table
            .add_row(vec![Value::from("PPA:1"), Value::Double(0.5)])
            .unwrap();
        table
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let table = table();
        assert_eq!(table.column("id").map(|c| c.index()), Some(0));
        assert_eq!(table.column("ADDER").map(|c| c.data_type()), Some(ValueType::Double));
        assert!(table.column("PointTag").is_none());
    }

    #[test]
    fn test_add_row_type_checking() {
        let mut table = table();
        let res = table.add_row(vec![Value::Int32(1)]);
        assert!(matches!(res, Err(FilterExpressionError::InvalidOperation(_))));
        assert_eq!(table.add_row(vec![Value::from("PPA:2")]).unwrap(), 1);
        assert_eq!(table.row(1).unwrap().value(1), &Value::Undefined);
    }

    #[test]
    fn test_set_value_and_row_access() {
        let mut table = table();
        table.set_value(0, "adder", Value::Double(2.0)).unwrap();
        let row = table.row(0).unwrap();
        assert_eq!(row.value_by_name("Adder"), Some(&Value::Double(2.0)));
        assert!(table.set_value(0, "adder", Value::from("x")).is_err());
        assert!(table.set_value(5, "adder", Value::Double(1.0)).is_err());
        assert!(table.row(1).is_none());
    }

    #[test]
    fn test_builder_overwrite_column() {
        let table = DataTableBuilder::new("T")
            .column("foo", ValueType::Int32)
            .column("FOO", ValueType::String)
            .build();
        // Last one wins
        assert_eq!(table.column_count(), 1);
        assert_eq!(table.column("foo").unwrap().data_type(), ValueType::String);
    }

    #[test]
    fn test_non_ascii_names_fold_consistently() {
        let mut table = DataTableBuilder::new("Übersicht")
            .column("Ärger", ValueType::Int32)
            .column("ärger", ValueType::Double)
            .build();
        assert_eq!(table.column_count(), 1);
        assert_eq!(table.column("ÄRGER").unwrap().data_type(), ValueType::Double);
        table.add_row(vec![Value::Double(1.5)]).unwrap();
        assert_eq!(table.row(0).unwrap().value_by_name("äRGER"), Some(&Value::Double(1.5)));

        let mut data_set = DataSet::new();
        data_set.add_table(table);
        assert!(data_set.table("übersicht").is_some());
        assert!(names_match("Übersicht", "ÜBERSICHT"));
        assert!(!names_match("Übersicht", "Ubersicht"));
    }

    #[test]
    fn test_data_set_replaces_tables() {
        let mut data_set = DataSet::new();
        data_set.add_table(table());
        data_set.add_table(DataTableBuilder::new("activemeasurements").build());
        assert_eq!(data_set.tables().len(), 1);
        assert_eq!(data_set.table("ActiveMeasurements").unwrap().row_count(), 0);
    }

    #[test]
    fn test_table_serialization_deserialization() {
        let table = table();
        let json = serde_json::to_string(&table).unwrap();
        let deserialized: DataTable = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.row(0).unwrap().values(), table.row(0).unwrap().values());
    }
}
