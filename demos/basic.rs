use filterexpr::*;
use uuid::Uuid;

fn main() -> std::result::Result<(), FilterExpressionError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // 1. Build a metadata table
    let mut table = DataTableBuilder::new("ActiveMeasurements")
        .column("SignalID", ValueType::Guid)
        .column("ID", ValueType::String)
        .column("PointTag", ValueType::String)
        .column("SignalType", ValueType::String)
        .build();
    for (id, tag, signal_type) in [
        ("PPA:1", "SHELBY:FREQ", "FREQ"),
        ("PPA:2", "SHELBY:VA", "PHA"),
        ("PPA:3", "ALPHA:FREQ", "FREQ"),
        ("PPA:4", "SHELBY:IM", "PHM"),
        ("PPA:5", "MIDDLE:FREQ", "FREQ"),
    ] {
        table.add_row(vec![
            Value::Guid(Uuid::new_v4()),
            Value::from(id),
            Value::from(tag),
            Value::from(signal_type),
        ])?;
    }

    // 2. Select rows from a single table
    let filter_str = "FILTER TOP 2 ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY PointTag";
    for row in FilterExpressionParser::select(&table, filter_str, false)? {
        println!("Selected: {}", row.value_by_name("PointTag").cloned().unwrap_or_default());
    }

    // 3. Evaluate a scalar expression against one row
    if let Some(row) = table.row(1) {
        let value = FilterExpressionParser::evaluate_row(row, "UPPER(SUBSTR(PointTag, 7)) + '!'", false)?;
        println!("Evaluated: {}", value);
    }

    // 4. Run several statements against a data set, tracking signal IDs
    let mut data_set = DataSet::new();
    data_set.add_table(table);
    let mut parser = FilterExpressionParser::new("PPA:4; FILTER ActiveMeasurements WHERE SignalType = 'PHA'");
    parser.set_data_set(&data_set);
    parser.set_primary_table_name("ActiveMeasurements");
    parser.set_track_filtered_signal_ids(true);
    parser.register_parsing_exception_callback(|_, message| eprintln!("Filter error: {}", message));
    parser.evaluate()?;
    for signal_id in parser.filtered_signal_ids() {
        println!("Matched signal: {}", signal_id);
    }
    Ok(())
}
