use std::collections::BTreeSet;

use serde_json::Value;

/// Computes the display-level row ids to keep: a record contributes its
/// `display_level` value when it carries both level keys and its
/// `filter_level` value is one of the requested names. Records missing either
/// key are skipped without error, so the result may be empty; downstream an
/// empty set means "no filtering" (see `DenseTable::to_tab`).
pub fn display_ids(
    records: &[Value],
    names: &[String],
    filter_level: &str,
    display_level: &str,
) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for record in records {
        let Some(filter_value) = record.get(filter_level).and_then(Value::as_str) else {
            continue;
        };
        let Some(display_value) = record.get(display_level).and_then(Value::as_str) else {
            continue;
        };
        if names.iter().any(|name| name == filter_value) {
            out.insert(display_value.to_string());
        }
    }
    out
}
