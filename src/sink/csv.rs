//! Delimited-text encoding for harvested records.

use crate::harvest::record::NormalizedRecord;

pub const SEPARATOR: char = ',';

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Append one row to `out`, quoting cells that need it.
pub fn push_row<S: AsRef<str>>(out: &mut String, cells: &[S], sep: char) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(sep);
        }
        let cell = cell.as_ref();
        if needs_quotes(cell, sep) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

/// Cells of `record` laid out in `header` order; missing columns are empty.
#[must_use]
pub fn record_cells<'a>(record: &'a NormalizedRecord, header: &[&str]) -> Vec<&'a str> {
    header
        .iter()
        .map(|name| record.get(name).unwrap_or(""))
        .collect()
}

/// Render the rows of `records` (no header).
#[must_use]
pub fn render_rows(records: &[NormalizedRecord], header: &[&str]) -> String {
    let mut out = String::new();
    for record in records {
        push_row(&mut out, &record_cells(record, header), SEPARATOR);
    }
    out
}
