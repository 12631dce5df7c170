//! Config module: parser options and identifier field mappings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::table::names_match;

/// Column names used to resolve identifier statements (GUIDs, measurement
/// keys and point tags) against a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableIdFields {
    pub signal_id_field_name: String,
    pub measurement_key_field_name: String,
    pub point_tag_field_name: String,
}

impl Default for TableIdFields {
    fn default() -> Self {
        Self {
            signal_id_field_name: "SignalID".to_string(),
            measurement_key_field_name: "ID".to_string(),
            point_tag_field_name: "PointTag".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Routes parse diagnostics to `debug` instead of `error` level.
    pub suppress_console_error_output: bool,
    pub track_filtered_signal_ids: bool,
    pub track_filtered_rows: bool,
    pub primary_table_name: Option<String>,
    /// Per table overrides keyed by table name; matched ignoring case.
    pub table_id_fields: HashMap<String, TableIdFields>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            suppress_console_error_output: !cfg!(debug_assertions),
            track_filtered_signal_ids: false,
            track_filtered_rows: true,
            primary_table_name: None,
            table_id_fields: HashMap::new(),
        }
    }
}

impl ParserOptions {
    /// Fields for the given table, falling back to the defaults.
    pub fn table_id_fields_for(&self, table_name: &str) -> TableIdFields {
        self.table_id_fields
            .iter()
            .find(|(name, _)| names_match(name, table_name))
            .map(|(_, fields)| fields.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_default_options() {
        let options = ParserOptions::default();
        assert!(options.track_filtered_rows);
        assert!(!options.track_filtered_signal_ids);
        assert_eq!(options.table_id_fields_for("Anything"), TableIdFields::default());
    }

    #[test]
    fn test_table_id_fields_lookup_ignores_case() {
        let mut options = ParserOptions::default();
        options.table_id_fields.insert(
            "ActiveMeasurements".to_string(),
            TableIdFields {
                signal_id_field_name: "Guid".to_string(),
                ..TableIdFields::default()
            },
        );
        assert_eq!(
            options.table_id_fields_for("activemeasurements").signal_id_field_name,
            "Guid"
        );
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: ParserOptions =
            serde_json::from_str(r#"{"track_filtered_signal_ids": true, "primary_table_name": "Measurements"}"#)
                .unwrap();
        assert!(options.track_filtered_signal_ids);
        assert!(options.track_filtered_rows);
        assert_eq!(options.primary_table_name.as_deref(), Some("Measurements"));
    }
}
