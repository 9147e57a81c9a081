//! Raw tabular data as loaded: header names plus untyped text cells.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::HarmonizeError;

/// A loaded source. Cells stay text until a stage asks for a number, so
/// identifier columns never lose leading zeros on the way in.
#[derive(Debug, Clone)]
pub struct SourceTable {
    name: String,
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl SourceTable {
    /// Build a table from a raw header row and data rows.
    ///
    /// Repeated header names get `.1`, `.2`, ... suffixes in order of
    /// appearance; blank names become `column_<n>` (1-based). Rows are padded
    /// with empty cells or truncated to the header width.
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = disambiguate_headers(headers);
        let width = headers.len();
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self {
            name: name.into(),
            headers,
            index,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Column index, or `SourceUnreadable` naming the absent column.
    pub fn require(&self, name: &str) -> Result<usize, HarmonizeError> {
        self.column(name)
            .ok_or_else(|| HarmonizeError::missing_column(&self.name, name))
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }
}

fn disambiguate_headers(raw: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(raw.len());

    for (i, header) in raw.into_iter().enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", i + 1)
        } else {
            trimmed.to_string()
        };

        let mut name = base.clone();
        if taken.contains(&name) {
            let counter = counters.entry(base.clone()).or_insert(0);
            loop {
                *counter += 1;
                name = format!("{base}.{counter}");
                if !taken.contains(&name) {
                    break;
                }
            }
        }
        taken.insert(name.clone());
        out.push(name);
    }

    out
}

// ---------------------------------------------------------------------------
// Numeric coercion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Decimal {
    #[default]
    #[serde(rename = ".")]
    Point,
    #[serde(rename = ",")]
    Comma,
}

/// Parse a cell as a finite number. Blank, non-numeric, and non-finite
/// cells yield `None`.
///
/// Spaces (including no-break spaces used as thousands separators) are
/// ignored.
pub fn parse_number(raw: &str, decimal: Decimal) -> Option<f64> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}'))
        .collect();
    if compact.is_empty() {
        return None;
    }
    let normalized = match decimal {
        Decimal::Point => compact,
        Decimal::Comma => {
            if compact.contains('.') {
                return None;
            }
            compact.replace(',', ".")
        }
    };
    // Reject "inf"/"nan" spellings that str::parse would accept.
    if normalized.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}
