use crate::{table::MonthlyTable, value::Value};

/// Rescale a table to thousands when every number in it is over 1000.
///
/// Returns the (possibly rescaled) table and the label to put on its axis. Empty tables and
/// tables with any value at or below 1000 come back unchanged.
pub fn normalise_units(table: &MonthlyTable, label: &str) -> (MonthlyTable, String) {
    match table.min_value() {
        Some(min) if min > 1000.0 => {
            let mut out = table.clone();
            for series in out.series_mut() {
                for value in series.values.iter_mut() {
                    if let Some(v) = value.as_f64() {
                        *value = Value::Float(v / 1000.0);
                    }
                }
            }
            (out, format!("{} (thousands)", label))
        }
        _ => (table.clone(), label.to_string()),
    }
}
