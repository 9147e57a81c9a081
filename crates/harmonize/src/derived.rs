//! Derived variables over the merged relation: cross-source ratios,
//! missing-value handling, period deltas and the population filter.

use std::collections::BTreeMap;

use crate::aggregate::ratio;
use crate::config::{DeltaSpec, DeriveConfig, PopulationFilter, RatioSpec};
use crate::error::HarmonizeError;
use crate::key::CanonicalKey;
use crate::model::{DeriveReport, UnitTable};

type Rows = BTreeMap<CanonicalKey, Vec<Option<f64>>>;

/// `later - earlier`, missing when either side is.
pub fn delta(later: Option<f64>, earlier: Option<f64>) -> Option<f64> {
    match (later, earlier) {
        (Some(l), Some(e)) => Some(l - e),
        _ => None,
    }
}

/// Run every derive step on the merged relation, in order:
///
/// 1. cross-source ratios
/// 2. non-finite values become missing
/// 3. explicit `fill_missing` replacements
/// 4. deltas
/// 5. non-finite values become missing (again, for the new columns)
/// 6. population filter (strict `>`; a missing population fails it)
/// 7. optional drop of rows with any missing attribute
pub fn derive(merged: UnitTable, config: &DeriveConfig) -> Result<(UnitTable, DeriveReport), HarmonizeError> {
    let mut report = DeriveReport {
        rows_merged: merged.len(),
        ..DeriveReport::default()
    };

    let (name, mut columns, mut rows) = merged.into_parts();

    add_ratios(&mut columns, &mut rows, &config.ratios)?;
    report.non_finite_normalized += normalize_non_finite(&mut rows);
    report.values_filled = fill_missing(&columns, &mut rows, &config.fill_missing)?;
    add_deltas(&mut columns, &mut rows, &config.deltas)?;
    report.non_finite_normalized += normalize_non_finite(&mut rows);

    if let Some(filter) = config.population_filter() {
        report.below_threshold = apply_population_filter(&columns, &mut rows, &filter)?;
        log::info!(
            "population filter {} > {}: {} -> {} unit(s)",
            filter.column,
            filter.threshold,
            report.rows_merged,
            rows.len()
        );
    }

    if config.drop_incomplete {
        let before = rows.len();
        rows.retain(|_, values| values.iter().all(Option::is_some));
        report.incomplete_dropped = before - rows.len();
    }

    if report.non_finite_normalized > 0 {
        log::warn!("{} non-finite value(s) set to missing", report.non_finite_normalized);
    }

    report.rows_emitted = rows.len();
    let table = UnitTable::from_rows(name, columns, rows)?;
    Ok((table, report))
}

fn position(columns: &[String], stage: &str, column: &str) -> Result<usize, HarmonizeError> {
    columns
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| HarmonizeError::UnknownColumn {
            stage: stage.to_string(),
            column: column.to_string(),
        })
}

fn add_column(columns: &mut Vec<String>, name: &str) -> Result<(), HarmonizeError> {
    if columns.iter().any(|c| c == name) {
        return Err(HarmonizeError::DuplicateColumn { column: name.to_string() });
    }
    columns.push(name.to_string());
    Ok(())
}

fn add_ratios(columns: &mut Vec<String>, rows: &mut Rows, specs: &[RatioSpec]) -> Result<(), HarmonizeError> {
    for spec in specs {
        let n = position(columns, "derive ratio", &spec.numerator)?;
        let d = position(columns, "derive ratio", &spec.denominator)?;
        add_column(columns, &spec.output)?;
        for values in rows.values_mut() {
            let v = ratio(values[n], values[d]);
            values.push(v);
        }
    }
    Ok(())
}

fn add_deltas(columns: &mut Vec<String>, rows: &mut Rows, specs: &[DeltaSpec]) -> Result<(), HarmonizeError> {
    for spec in specs {
        let later = position(columns, "delta", &spec.later)?;
        let earlier = position(columns, "delta", &spec.earlier)?;
        add_column(columns, &spec.output)?;
        for values in rows.values_mut() {
            let v = delta(values[later], values[earlier]);
            values.push(v);
        }
    }
    Ok(())
}

fn normalize_non_finite(rows: &mut Rows) -> usize {
    let mut count = 0;
    for slot in rows.values_mut().flatten() {
        if slot.is_some_and(|v| !v.is_finite()) {
            *slot = None;
            count += 1;
        }
    }
    count
}

fn fill_missing(
    columns: &[String],
    rows: &mut Rows,
    fills: &BTreeMap<String, f64>,
) -> Result<usize, HarmonizeError> {
    let mut filled = 0;
    for (column, &value) in fills {
        let idx = position(columns, "fill_missing", column)?;
        for values in rows.values_mut() {
            if values[idx].is_none() {
                values[idx] = Some(value);
                filled += 1;
            }
        }
    }
    Ok(filled)
}

fn apply_population_filter(
    columns: &[String],
    rows: &mut Rows,
    filter: &PopulationFilter,
) -> Result<usize, HarmonizeError> {
    let idx = position(columns, "population filter", &filter.column)?;
    let before = rows.len();
    rows.retain(|_, values| values[idx].is_some_and(|p| p > filter.threshold));
    Ok(before - rows.len())
}
