use std::collections::BTreeMap;

use crate::config::AggregateSpec;
use crate::error::HarmonizeError;
use crate::key::{CanonicalKey, KeyedRows};
use crate::model::UnitTable;
use crate::table::{parse_number, Decimal, SourceTable};

/// A harmonized table plus the number of cells that failed numeric parsing.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub table: UnitTable,
    pub coerced: usize,
}

/// `numerator / denominator`, or `None` when either side is missing or the
/// denominator is zero. Never substitutes zero.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d).filter(|q| q.is_finite()),
        _ => None,
    }
}

#[derive(Clone)]
struct Accumulator {
    sums: Vec<Option<f64>>,
    firsts: Vec<Option<f64>>,
}

/// Group keyed rows by canonical key, summing `sum` columns and taking the
/// first non-missing value of `first` columns, then compute ratios and apply
/// the optional projection.
///
/// Non-numeric cells count as missing: a group whose cells are all missing
/// stays missing rather than summing to zero.
pub fn aggregate_source(
    table: &SourceTable,
    keyed: &KeyedRows,
    spec: &AggregateSpec,
    decimal: Decimal,
) -> Result<StageOutput, HarmonizeError> {
    let sum_idx = spec
        .sum
        .iter()
        .map(|c| table.require(c))
        .collect::<Result<Vec<_>, _>>()?;
    let first_idx = spec
        .first
        .iter()
        .map(|c| table.require(c))
        .collect::<Result<Vec<_>, _>>()?;

    let empty = Accumulator {
        sums: vec![None; sum_idx.len()],
        firsts: vec![None; first_idx.len()],
    };

    let mut groups: BTreeMap<CanonicalKey, Accumulator> = BTreeMap::new();
    let mut coerced = 0usize;

    for (row, key) in keyed.keys.iter().enumerate() {
        let Some(key) = key else {
            continue;
        };
        let acc = groups.entry(key.clone()).or_insert_with(|| empty.clone());

        for (slot, &col) in acc.sums.iter_mut().zip(&sum_idx) {
            let raw = table.cell(row, col);
            match parse_number(raw, decimal) {
                Some(v) => *slot = Some(slot.unwrap_or(0.0) + v),
                None if !raw.trim().is_empty() => coerced += 1,
                None => {}
            }
        }
        for (slot, &col) in acc.firsts.iter_mut().zip(&first_idx) {
            if slot.is_some() {
                continue;
            }
            let raw = table.cell(row, col);
            match parse_number(raw, decimal) {
                Some(v) => *slot = Some(v),
                None if !raw.trim().is_empty() => coerced += 1,
                None => {}
            }
        }
    }

    let computed = spec.computed_columns();
    let output = spec.output_columns();
    let projection: Vec<usize> = output
        .iter()
        .map(|c| {
            computed.iter().position(|x| x == c).ok_or_else(|| HarmonizeError::UnknownColumn {
                stage: format!("source '{}' keep", table.name()),
                column: c.clone(),
            })
        })
        .collect::<Result<_, _>>()?;

    let inputs: Vec<&String> = spec.sum.iter().chain(spec.first.iter()).collect();
    let input_pos = |name: &str| -> Result<usize, HarmonizeError> {
        inputs.iter().position(|c| *c == name).ok_or_else(|| HarmonizeError::UnknownColumn {
            stage: format!("source '{}' ratio", table.name()),
            column: name.to_string(),
        })
    };
    let ratio_pos = spec
        .ratios
        .iter()
        .map(|r| Ok((input_pos(&r.numerator)?, input_pos(&r.denominator)?)))
        .collect::<Result<Vec<_>, HarmonizeError>>()?;

    let rows = groups
        .into_iter()
        .map(|(key, acc)| {
            let mut values: Vec<Option<f64>> = acc.sums;
            values.extend(acc.firsts);
            let ratios: Vec<Option<f64>> = ratio_pos
                .iter()
                .map(|&(n, d)| ratio(values[n], values[d]))
                .collect();
            values.extend(ratios);
            let projected = projection.iter().map(|&i| values[i]).collect();
            (key, projected)
        })
        .collect();

    let table = UnitTable::from_rows(table.name(), output, rows)?;
    Ok(StageOutput { table, coerced })
}
