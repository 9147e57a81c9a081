use std::collections::BTreeMap;

use crate::error::HarmonizeError;
use crate::model::{MergeStep, UnitTable};

/// Inner-join harmonized tables on the canonical key, left to right.
///
/// Step 1 is the first table on its own; step `n` joins the running result
/// with table `n`. Every step is logged and checked: the first empty
/// result aborts with `EmptyIntersection` naming the step and the table
/// that emptied it.
pub fn merge_all(tables: Vec<UnitTable>) -> Result<(UnitTable, Vec<MergeStep>), HarmonizeError> {
    let mut tables = tables.into_iter();
    let Some(first) = tables.next() else {
        return Err(HarmonizeError::Config("nothing to merge".into()));
    };

    let mut steps = Vec::new();
    let step = MergeStep {
        step: 1,
        source: first.name().to_string(),
        left_rows: first.len(),
        right_rows: first.len(),
        result_rows: first.len(),
    };
    log_step(&step);
    if first.is_empty() {
        return Err(HarmonizeError::EmptyIntersection {
            step: 1,
            source_name: step.source,
        });
    }
    steps.push(step);

    let mut merged = first;
    for (i, right) in tables.enumerate() {
        let left_rows = merged.len();
        let right_rows = right.len();
        let source = right.name().to_string();
        merged = join(merged, &right)?;

        let step = MergeStep {
            step: i + 2,
            source,
            left_rows,
            right_rows,
            result_rows: merged.len(),
        };
        log_step(&step);
        if merged.is_empty() {
            return Err(HarmonizeError::EmptyIntersection {
                step: step.step,
                source_name: step.source,
            });
        }
        steps.push(step);
    }

    Ok((merged, steps))
}

fn log_step(step: &MergeStep) {
    log::info!(
        "merge step {} ({}): {} x {} -> {} unit(s)",
        step.step,
        step.source,
        step.left_rows,
        step.right_rows,
        step.result_rows
    );
}

/// Inner join of two tables. The result is a new table whose columns are
/// the left columns followed by the right columns.
fn join(left: UnitTable, right: &UnitTable) -> Result<UnitTable, HarmonizeError> {
    if let Some(dup) = right.columns().iter().find(|c| left.column_index(c).is_some()) {
        return Err(HarmonizeError::DuplicateColumn { column: dup.clone() });
    }

    let (_, mut columns, left_rows) = left.into_parts();
    columns.extend(right.columns().iter().cloned());

    let rows: BTreeMap<_, _> = left_rows
        .into_iter()
        .filter_map(|(key, mut values)| {
            let extra = right.row(&key)?;
            values.extend_from_slice(extra);
            Some((key, values))
        })
        .collect();

    UnitTable::from_rows("merged", columns, rows)
}
