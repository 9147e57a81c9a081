use std::collections::BTreeMap;

use crate::aggregate::{ratio, StageOutput};
use crate::config::{BlocSpec, TotalReduction, VoteLayout};
use crate::error::HarmonizeError;
use crate::key::{CanonicalKey, KeyedRows};
use crate::model::UnitTable;
use crate::table::{parse_number, Decimal, SourceTable};

/// Locate the category/value column pairs of a vote table.
///
/// Long layout has a single pair. Wide layout probes `category.1`/`value.1`,
/// `category.2`/`value.2`, ... and stops at the first index where either
/// column is absent.
pub fn vote_groups(
    table: &SourceTable,
    category: &str,
    value: &str,
    layout: VoteLayout,
) -> Result<Vec<(usize, usize)>, HarmonizeError> {
    let mut groups = vec![(table.require(category)?, table.require(value)?)];
    if layout == VoteLayout::Wide {
        for i in 1.. {
            let cat = table.column(&format!("{category}.{i}"));
            let val = table.column(&format!("{value}.{i}"));
            match (cat, val) {
                (Some(c), Some(v)) => groups.push((c, v)),
                _ => break,
            }
        }
    }
    Ok(groups)
}

#[derive(Default)]
struct Tally {
    bloc: f64,
    total: Option<f64>,
}

/// Sum the votes of the configured bloc per unit and divide by the unit's
/// expressed-vote total.
///
/// Every keyed unit gets a row, including units where no bloc label
/// appears (bloc sum zero). Vote counts that are blank or non-numeric are
/// read as zero; a zero or missing total leaves the share missing.
pub fn classify_bloc(
    table: &SourceTable,
    keyed: &KeyedRows,
    spec: &BlocSpec,
    decimal: Decimal,
) -> Result<StageOutput, HarmonizeError> {
    let groups = vote_groups(table, &spec.category, &spec.value, spec.layout)?;
    let total_idx = table.require(&spec.total)?;
    log::debug!("{}: {} vote column group(s)", table.name(), groups.len());

    let mut tallies: BTreeMap<CanonicalKey, Tally> = BTreeMap::new();
    let mut coerced = 0usize;

    for (row, key) in keyed.keys.iter().enumerate() {
        let Some(key) = key else {
            continue;
        };
        let tally = tallies.entry(key.clone()).or_default();

        for &(cat_idx, val_idx) in &groups {
            let category = table.cell(row, cat_idx).trim();
            if category.is_empty() || !spec.labels.contains(category) {
                continue;
            }
            let raw = table.cell(row, val_idx);
            match parse_number(raw, decimal) {
                Some(v) => tally.bloc += v,
                None => {
                    if !raw.trim().is_empty() {
                        coerced += 1;
                    }
                }
            }
        }

        let total = parse_number(table.cell(row, total_idx), decimal);
        match spec.total_reduction {
            TotalReduction::First => {
                if tally.total.is_none() {
                    tally.total = total;
                }
            }
            TotalReduction::Sum => {
                if let Some(v) = total {
                    tally.total = Some(tally.total.unwrap_or(0.0) + v);
                }
            }
        }
    }

    if coerced > 0 {
        log::warn!("{}: {coerced} non-numeric vote count(s) read as zero", table.name());
    }

    let rows = tallies
        .into_iter()
        .map(|(key, tally)| {
            let mut values = Vec::with_capacity(3);
            if spec.votes_output.is_some() {
                values.push(Some(tally.bloc));
            }
            if spec.total_output.is_some() {
                values.push(tally.total);
            }
            values.push(ratio(Some(tally.bloc), tally.total));
            (key, values)
        })
        .collect();

    let table = UnitTable::from_rows(table.name(), spec.output_columns(), rows)?;
    Ok(StageOutput { table, coerced })
}
