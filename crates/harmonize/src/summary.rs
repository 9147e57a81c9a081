use crate::model::{ColumnSummary, UnitTable};

/// Per-column descriptive statistics of the final relation.
pub fn compute_summary(table: &UnitTable) -> Vec<ColumnSummary> {
    table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let mut present = 0usize;
            let mut sum = 0.0;
            let mut min: Option<f64> = None;
            let mut max: Option<f64> = None;

            for v in table.rows().filter_map(|(_, values)| values[idx]) {
                present += 1;
                sum += v;
                min = Some(min.map_or(v, |m| m.min(v)));
                max = Some(max.map_or(v, |m| m.max(v)));
            }

            ColumnSummary {
                column: column.clone(),
                present,
                missing: table.len() - present,
                mean: (present > 0).then(|| sum / present as f64),
                min,
                max,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyConfig;
    use crate::key::{KeyNormalizer, KeyOutcome};

    #[test]
    fn summary_counts_and_moments() {
        let n = KeyNormalizer::new(&KeyConfig::default());
        let key = |c: &str| match n.normalize_combined(c) {
            Ok(KeyOutcome::Key(k)) => k,
            other => panic!("{other:?}"),
        };
        let table = UnitTable::from_rows(
            "final",
            vec!["A".into(), "B".into()],
            [
                (key("01001"), vec![Some(1.0), None]),
                (key("01002"), vec![Some(3.0), None]),
                (key("01003"), vec![Some(-1.0), None]),
            ]
            .into_iter()
            .collect(),
        )
        .unwrap();

        let summary = compute_summary(&table);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].present, 3);
        assert_eq!(summary[0].mean, Some(1.0));
        assert_eq!(summary[0].min, Some(-1.0));
        assert_eq!(summary[0].max, Some(3.0));
        assert_eq!(summary[1].present, 0);
        assert_eq!(summary[1].missing, 3);
        assert_eq!(summary[1].mean, None);
    }
}
