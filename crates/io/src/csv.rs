// Delimited text import

use std::borrow::Cow;

use encoding_rs::Encoding;
use geomerge_harmonize::{HarmonizeError, SourceTable};

/// Resolve an encoding label (`"utf-8"`, `"latin1"`, `"windows-1252"`, ...).
pub fn resolve_encoding(source_name: &str, label: &str) -> Result<&'static Encoding, HarmonizeError> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
        HarmonizeError::Config(format!("source '{source_name}': unknown encoding '{label}'"))
    })
}

/// Decode strictly: `None` if any byte sequence is invalid in `encoding`.
/// A byte order mark overrides the declared encoding and is stripped.
fn decode_strict<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Option<(Cow<'a, str>, &'static Encoding)> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((bom_encoding, len)) => (bom_encoding, &bytes[len..]),
        None => (encoding, bytes),
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| (text, encoding))
}

/// Decode with the declared encoding, falling back to `fallback` when the
/// bytes are not valid in the declared one. Returns the text and the name of
/// the encoding actually used.
pub fn decode(
    source_name: &str,
    bytes: &[u8],
    declared: &'static Encoding,
    fallback: &'static Encoding,
) -> Result<(String, &'static str), HarmonizeError> {
    if let Some((text, used)) = decode_strict(bytes, declared) {
        return Ok((text.into_owned(), used.name()));
    }
    match decode_strict(bytes, fallback) {
        Some((text, used)) => {
            log::warn!(
                "{source_name}: not valid {}, decoded as {}",
                declared.name(),
                used.name()
            );
            Ok((text.into_owned(), used.name()))
        }
        None => Err(HarmonizeError::unreadable(
            source_name,
            format!("not valid {} or {}", declared.name(), fallback.name()),
        )),
    }
}

/// Parse decoded delimited text into a source table.
///
/// `header_row` preamble lines are skipped before the header. Rows longer
/// than the header are truncated; shorter rows are padded with empty cells.
pub fn parse_delimited(
    source_name: &str,
    content: &str,
    delimiter: u8,
    header_row: usize,
) -> Result<SourceTable, HarmonizeError> {
    let mut lines = content.split_inclusive('\n');
    let mut offset = 0usize;
    for skipped in 0..header_row {
        match lines.next() {
            Some(line) => offset += line.len(),
            None => {
                return Err(HarmonizeError::unreadable(
                    source_name,
                    format!("header row {header_row} is beyond the end of the file ({skipped} line(s))"),
                ))
            }
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content[offset..].as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| HarmonizeError::unreadable(source_name, e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
        None => return Err(HarmonizeError::unreadable(source_name, "no header row")),
    };
    if headers.iter().all(String::is_empty) {
        return Err(HarmonizeError::unreadable(
            source_name,
            format!("header row {header_row} is blank"),
        ));
    }

    let mut rows = Vec::new();
    let mut truncated = 0usize;
    for record in records {
        let record = record.map_err(|e| HarmonizeError::unreadable(source_name, e.to_string()))?;
        if record.len() > headers.len() {
            truncated += 1;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    if truncated > 0 {
        log::warn!(
            "{source_name}: {truncated} row(s) longer than the {}-column header truncated",
            headers.len()
        );
    }

    Ok(SourceTable::new(source_name, headers, rows))
}
