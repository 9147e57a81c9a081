// Spreadsheet import (xlsx, xls, xlsb, ods)

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use geomerge_harmonize::{HarmonizeError, SourceTable};

/// Cell text as a delimited export would show it: whole floats without a
/// fractional part, booleans as `TRUE`/`FALSE`, errors as `#Kind`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
        Data::Error(e) => format!("#{e:?}"),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

/// Read one worksheet as a source table. `sheet` defaults to the first
/// sheet; `header_row` is the 0-based worksheet row holding the header.
pub fn read_spreadsheet(
    source_name: &str,
    path: &Path,
    sheet: Option<&str>,
    header_row: usize,
) -> Result<SourceTable, HarmonizeError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| HarmonizeError::unreadable(source_name, format!("cannot open {}: {e}", path.display())))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| HarmonizeError::unreadable(source_name, "workbook contains no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| HarmonizeError::unreadable(source_name, format!("sheet '{sheet_name}': {e}")))?;

    // Range start offset (data may not begin at A1)
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let start_row = start_row as usize;
    let pad = start_col as usize;
    if header_row < start_row {
        return Err(HarmonizeError::unreadable(
            source_name,
            format!("sheet '{sheet_name}': header row {header_row} is above the data, which starts at row {start_row}"),
        ));
    }

    let padded = |row: &[Data]| -> Vec<String> {
        std::iter::repeat(String::new())
            .take(pad)
            .chain(row.iter().map(cell_text))
            .collect()
    };

    let mut sheet_rows = range.rows().skip(header_row - start_row);
    let headers: Vec<String> = match sheet_rows.next() {
        Some(row) => padded(row).into_iter().map(|h| h.trim().to_string()).collect(),
        None => {
            return Err(HarmonizeError::unreadable(
                source_name,
                format!("sheet '{sheet_name}': header row {header_row} is beyond the last row"),
            ))
        }
    };
    if headers.iter().all(String::is_empty) {
        return Err(HarmonizeError::unreadable(
            source_name,
            format!("sheet '{sheet_name}': header row {header_row} is blank"),
        ));
    }

    let rows = sheet_rows
        .filter(|row| !row.iter().all(|c| *c == Data::Empty))
        .map(padded)
        .collect();

    Ok(SourceTable::new(source_name, headers, rows))
}
