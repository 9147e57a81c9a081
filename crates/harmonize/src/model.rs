use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::HarmonizeError;
use crate::key::{CanonicalKey, RowStats};
use crate::table::SourceTable;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Pre-loaded source tables keyed by source name.
#[derive(Debug)]
pub struct PipelineInput {
    pub tables: HashMap<String, SourceTable>,
}

// ---------------------------------------------------------------------------
// Unit tables
// ---------------------------------------------------------------------------

/// Canonical key -> fixed set of named numeric attributes.
///
/// Used for harmonized per-source tables, for each intermediate merge
/// result, and for the final relation. There is no in-place mutation: every
/// stage builds a new table. Missing values are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTable {
    name: String,
    columns: Vec<String>,
    rows: BTreeMap<CanonicalKey, Vec<Option<f64>>>,
}

impl UnitTable {
    /// Build a table. Column names must be unique; each row must carry one
    /// value per column.
    pub fn from_rows(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: BTreeMap<CanonicalKey, Vec<Option<f64>>>,
    ) -> Result<Self, HarmonizeError> {
        let name = name.into();
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].contains(col) {
                return Err(HarmonizeError::DuplicateColumn { column: col.clone() });
            }
        }
        if let Some((key, row)) = rows.iter().find(|(_, r)| r.len() != columns.len()) {
            return Err(HarmonizeError::Config(format!(
                "table '{name}': row {key} has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { name, columns, rows })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_key(&self, key: &CanonicalKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CanonicalKey> {
        self.rows.keys()
    }

    pub fn row(&self, key: &CanonicalKey) -> Option<&[Option<f64>]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn value(&self, key: &CanonicalKey, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows.get(key).and_then(|r| r[idx])
    }

    /// Rows in key order.
    pub fn rows(&self) -> impl Iterator<Item = (&CanonicalKey, &[Option<f64>])> {
        self.rows.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// A new table with only `columns`, in that order.
    pub fn select(&self, stage: &str, columns: &[String]) -> Result<UnitTable, HarmonizeError> {
        let idx = columns
            .iter()
            .map(|c| {
                self.column_index(c).ok_or_else(|| HarmonizeError::UnknownColumn {
                    stage: stage.to_string(),
                    column: c.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self
            .rows
            .iter()
            .map(|(k, v)| (k.clone(), idx.iter().map(|&i| v[i]).collect()))
            .collect();
        UnitTable::from_rows(self.name.clone(), columns.to_vec(), rows)
    }

    pub(crate) fn into_parts(self) -> (String, Vec<String>, BTreeMap<CanonicalKey, Vec<Option<f64>>>) {
        (self.name, self.columns, self.rows)
    }
}

/// The output artifact: one row per qualifying unit.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalRelation {
    pub key_column: String,
    pub table: UnitTable,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub key_column: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    #[serde(flatten)]
    pub rows: RowStats,
    /// Non-blank cells that failed numeric parsing. Bloc votes count as zero,
    /// every other value as missing.
    pub coerced_values: usize,
    pub units: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStep {
    /// 1-based; step 1 is the first source on its own.
    pub step: usize,
    pub source: String,
    pub left_rows: usize,
    pub right_rows: usize,
    pub result_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeriveReport {
    pub rows_merged: usize,
    pub non_finite_normalized: usize,
    pub values_filled: usize,
    pub below_threshold: usize,
    pub incomplete_dropped: usize,
    pub rows_emitted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub present: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub meta: RunMeta,
    pub sources: Vec<SourceReport>,
    pub merge_steps: Vec<MergeStep>,
    pub derive: DeriveReport,
    pub summary: Vec<ColumnSummary>,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub report: RunReport,
    pub relation: FinalRelation,
}
