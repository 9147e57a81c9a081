//! Canonical geographic keys.
//!
//! Every source spells its identifier differently: a combined code
//! (`"01001"`, `"1001"`, `"2A004"`), or a department/commune pair
//! (`"1"` + `"1"`, `"ZA"` + `"101"`). All of them normalize to one
//! fixed-width text key. Keys compare as opaque strings only.

use std::fmt;

use serde::Serialize;

use crate::config::{KeyColumns, KeyConfig, MalformedKeyPolicy, RowFilter};
use crate::error::HarmonizeError;
use crate::table::SourceTable;

/// Department tokens that are not numbers but belong to the study area.
const INCLUDED_TOKENS: [&str; 2] = ["2A", "2B"];

/// Overseas and abroad department tokens used by election files.
const EXCLUDED_TOKENS: [&str; 11] = [
    "ZA", "ZB", "ZC", "ZD", "ZM", "ZN", "ZP", "ZS", "ZW", "ZX", "ZZ",
];

/// Lowest department number that a combined code of an overseas department
/// (`971..=989`) reads as once cut at `department_width` digits: `97` for
/// the usual width of 2.
///
/// A split pair sees the full three-digit department, a combined code only
/// its prefix. Both agree on exclusion only while the bound stays below
/// this floor.
pub fn overseas_floor(department_width: usize) -> u64 {
    match department_width {
        0 | 1 => 9,
        w => 97 * 10u64.pow((w - 2) as u32),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Key(CanonicalKey),
    /// Valid identifier outside the study area (overseas, abroad).
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedKey {
    pub value: String,
    pub reason: String,
}

impl MalformedKey {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.value, self.reason)
    }
}

enum Department {
    Code(String),
    Excluded,
}

#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    department_width: usize,
    commune_width: usize,
    max_department: u32,
}

impl KeyNormalizer {
    pub fn new(config: &KeyConfig) -> Self {
        Self {
            department_width: config.department_width,
            commune_width: config.commune_width,
            max_department: config.max_department,
        }
    }

    pub fn width(&self) -> usize {
        self.department_width + self.commune_width
    }

    /// Normalize a department + commune pair. Each fragment is padded to its
    /// own width before the two are joined.
    pub fn normalize_split(&self, department: &str, commune: &str) -> Result<KeyOutcome, MalformedKey> {
        let dept = match self.department(department)? {
            Department::Code(code) => code,
            Department::Excluded => return Ok(KeyOutcome::Excluded),
        };
        let commune = self.commune(commune)?;
        Ok(KeyOutcome::Key(CanonicalKey(format!("{dept}{commune}"))))
    }

    /// Normalize a combined code. An all-digit code is one fragment and is
    /// padded to the full key width; a code with a department token must
    /// already have the full width.
    pub fn normalize_combined(&self, code: &str) -> Result<KeyOutcome, MalformedKey> {
        let token = clean_fragment(code);
        if token.is_empty() {
            return Err(MalformedKey::new(code, "empty code"));
        }
        if !token.is_ascii() {
            return Err(MalformedKey::new(code, "non-ASCII code"));
        }

        let width = self.width();
        let full = if token.bytes().all(|b| b.is_ascii_digit()) {
            if token.len() > width {
                return Err(MalformedKey::new(code, format!("wider than {width} digits")));
            }
            format!("{token:0>width$}")
        } else {
            if token.len() != width {
                return Err(MalformedKey::new(code, format!("expected {width} characters")));
            }
            token.to_ascii_uppercase()
        };

        let (dept, commune) = full.split_at(self.department_width);
        match self.department(dept) {
            Ok(Department::Code(dept)) => {
                let commune = self.commune(commune).map_err(|e| MalformedKey::new(code, e.reason))?;
                Ok(KeyOutcome::Key(CanonicalKey(format!("{dept}{commune}"))))
            }
            Ok(Department::Excluded) => Ok(KeyOutcome::Excluded),
            Err(e) => Err(MalformedKey::new(code, e.reason)),
        }
    }

    /// Normalize the key of one table row.
    pub fn normalize_row(&self, table: &SourceTable, row: usize, cols: &KeyIndex) -> Result<KeyOutcome, MalformedKey> {
        match *cols {
            KeyIndex::Split { department, commune } => {
                self.normalize_split(table.cell(row, department), table.cell(row, commune))
            }
            KeyIndex::Combined { combined } => self.normalize_combined(table.cell(row, combined)),
        }
    }

    fn department(&self, raw: &str) -> Result<Department, MalformedKey> {
        let token = clean_fragment(raw);
        if token.is_empty() {
            return Err(MalformedKey::new(raw, "empty department code"));
        }

        if token.bytes().all(|b| b.is_ascii_digit()) {
            let value: u32 = token
                .parse()
                .map_err(|_| MalformedKey::new(raw, "department code out of range"))?;
            if value == 0 {
                return Err(MalformedKey::new(raw, "department code zero"));
            }
            if value > self.max_department {
                return Ok(Department::Excluded);
            }
            let digits = value.to_string();
            if digits.len() > self.department_width {
                return Err(MalformedKey::new(
                    raw,
                    format!("department wider than {} digits", self.department_width),
                ));
            }
            return Ok(Department::Code(format!("{digits:0>w$}", w = self.department_width)));
        }

        let upper = token.to_ascii_uppercase();
        if EXCLUDED_TOKENS.contains(&upper.as_str()) {
            return Ok(Department::Excluded);
        }
        if INCLUDED_TOKENS.contains(&upper.as_str()) && upper.len() <= self.department_width {
            return Ok(Department::Code(format!("{upper:0>w$}", w = self.department_width)));
        }
        Err(MalformedKey::new(raw, "unrecognized department token"))
    }

    fn commune(&self, raw: &str) -> Result<String, MalformedKey> {
        let token = clean_fragment(raw);
        if token.is_empty() {
            return Err(MalformedKey::new(raw, "empty commune code"));
        }
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedKey::new(raw, "non-numeric commune code"));
        }
        let significant = token.trim_start_matches('0');
        if significant.is_empty() {
            return Err(MalformedKey::new(raw, "commune code zero"));
        }
        if significant.len() > self.commune_width {
            return Err(MalformedKey::new(
                raw,
                format!("commune wider than {} digits", self.commune_width),
            ));
        }
        Ok(format!("{significant:0>w$}", w = self.commune_width))
    }
}

/// Trim whitespace and a zero fractional part left by spreadsheet exports
/// (`"1001.0"` -> `"1001"`).
fn clean_fragment(raw: &str) -> &str {
    let t = raw.trim();
    if let Some((int, frac)) = t.split_once('.') {
        if !int.is_empty()
            && int.bytes().all(|b| b.is_ascii_digit())
            && !frac.is_empty()
            && frac.bytes().all(|b| b == b'0')
        {
            return int;
        }
    }
    t
}

// ---------------------------------------------------------------------------
// Keying a whole table
// ---------------------------------------------------------------------------

/// Resolved positions of a source's key columns.
#[derive(Debug, Clone, Copy)]
pub enum KeyIndex {
    Split { department: usize, commune: usize },
    Combined { combined: usize },
}

impl KeyIndex {
    pub fn resolve(table: &SourceTable, columns: &KeyColumns) -> Result<Self, HarmonizeError> {
        Ok(match columns {
            KeyColumns::Split { department, commune } => Self::Split {
                department: table.require(department)?,
                commune: table.require(commune)?,
            },
            KeyColumns::Combined { combined } => Self::Combined {
                combined: table.require(combined)?,
            },
        })
    }
}

/// Row accounting shared by every harmonization stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowStats {
    pub rows_read: usize,
    pub filtered_out: usize,
    pub excluded: usize,
    pub malformed_keys: usize,
}

/// Per-row canonical keys for a table; `None` marks a row that takes no
/// further part (filtered out, excluded, or dropped as malformed).
#[derive(Debug, Clone)]
pub struct KeyedRows {
    pub keys: Vec<Option<CanonicalKey>>,
    pub stats: RowStats,
}

/// Apply the granularity filter and key normalization to every row.
pub fn key_rows(
    table: &SourceTable,
    columns: &KeyColumns,
    filter: Option<&RowFilter>,
    normalizer: &KeyNormalizer,
    policy: MalformedKeyPolicy,
) -> Result<KeyedRows, HarmonizeError> {
    let index = KeyIndex::resolve(table, columns)?;

    let filter = match filter {
        Some(f) => match table.column(&f.column) {
            Some(col) => Some((col, f)),
            None => {
                log::debug!(
                    "{}: no '{}' column, granularity filter not applied",
                    table.name(),
                    f.column
                );
                None
            }
        },
        None => None,
    };

    let mut stats = RowStats {
        rows_read: table.len(),
        ..RowStats::default()
    };
    let mut keys = Vec::with_capacity(table.len());
    let mut first_malformed: Option<MalformedKey> = None;

    for row in 0..table.len() {
        if let Some((col, f)) = filter {
            let marker = table.cell(row, col).trim();
            if !f.values.iter().any(|v| v == marker) {
                stats.filtered_out += 1;
                keys.push(None);
                continue;
            }
        }

        match normalizer.normalize_row(table, row, &index) {
            Ok(KeyOutcome::Key(key)) => keys.push(Some(key)),
            Ok(KeyOutcome::Excluded) => {
                stats.excluded += 1;
                keys.push(None);
            }
            Err(malformed) => match policy {
                MalformedKeyPolicy::Fail => {
                    return Err(HarmonizeError::KeyMalformed {
                        source_name: table.name().to_string(),
                        row: row + 1,
                        value: malformed.value,
                        reason: malformed.reason,
                    });
                }
                MalformedKeyPolicy::Drop => {
                    stats.malformed_keys += 1;
                    first_malformed.get_or_insert(malformed);
                    keys.push(None);
                }
            },
        }
    }

    if let Some(example) = first_malformed {
        log::warn!(
            "{}: dropped {} row(s) with malformed keys (first: {example})",
            table.name(),
            stats.malformed_keys
        );
    }
    if stats.excluded > 0 {
        log::debug!("{}: {} row(s) outside the study area", table.name(), stats.excluded);
    }

    Ok(KeyedRows { keys, stats })
}
