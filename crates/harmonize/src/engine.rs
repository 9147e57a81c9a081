use crate::aggregate::{aggregate_source, StageOutput};
use crate::classify::classify_bloc;
use crate::config::{KeyConfig, PipelineConfig, SourceConfig, SourceStage};
use crate::derived::derive;
use crate::error::HarmonizeError;
use crate::key::{key_rows, KeyNormalizer, RowStats};
use crate::merge::merge_all;
use crate::model::{FinalRelation, PipelineInput, PipelineResult, RunMeta, RunReport, SourceReport};
use crate::summary::compute_summary;
use crate::table::SourceTable;

/// One source after keying and its harmonization stage.
#[derive(Debug, Clone)]
pub struct HarmonizedSource {
    pub output: StageOutput,
    pub rows: RowStats,
}

/// Key one loaded source and run its aggregate or bloc stage.
pub fn harmonize_source(
    key: &KeyConfig,
    source: &SourceConfig,
    table: &SourceTable,
) -> Result<HarmonizedSource, HarmonizeError> {
    let normalizer = KeyNormalizer::new(key);
    let keyed = key_rows(table, &source.key, source.filter.as_ref(), &normalizer, key.on_malformed)?;

    let output = match source.stage()? {
        SourceStage::Aggregate(spec) => aggregate_source(table, &keyed, spec, source.decimal)?,
        SourceStage::Bloc(spec) => classify_bloc(table, &keyed, spec, source.decimal)?,
    };

    log::info!(
        "{}: {} row(s) -> {} unit(s) [{}]",
        source.name,
        keyed.stats.rows_read,
        output.table.len(),
        output.table.columns().join(", ")
    );

    Ok(HarmonizedSource {
        output,
        rows: keyed.stats,
    })
}

/// Run the pipeline over pre-loaded source tables: harmonize every source in
/// config order, merge, derive, and project to the output column order.
pub fn run(config: &PipelineConfig, input: &PipelineInput) -> Result<PipelineResult, HarmonizeError> {
    let mut tables = Vec::with_capacity(config.sources.len());
    let mut sources = Vec::with_capacity(config.sources.len());

    for source in &config.sources {
        let table = input
            .tables
            .get(&source.name)
            .ok_or_else(|| HarmonizeError::unreadable(&source.name, "source was not loaded"))?;
        let harmonized = harmonize_source(&config.key, source, table)?;

        sources.push(SourceReport {
            name: source.name.clone(),
            rows: harmonized.rows,
            coerced_values: harmonized.output.coerced,
            units: harmonized.output.table.len(),
        });
        tables.push(harmonized.output.table);
    }

    let (merged, merge_steps) = merge_all(tables)?;
    let (derived, derive) = derive(merged, &config.derive)?;

    let order = config
        .output
        .columns
        .clone()
        .unwrap_or_else(|| config.attribute_order());
    let table = derived.select("output", &order)?;
    let summary = compute_summary(&table);

    log::info!(
        "{}: {} unit(s) emitted from {} merged",
        config.name,
        derive.rows_emitted,
        derive.rows_merged
    );

    Ok(PipelineResult {
        report: RunReport {
            meta: RunMeta {
                config_name: config.name.clone(),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
                key_column: config.key.column.clone(),
            },
            sources,
            merge_steps,
            derive,
            summary,
        },
        relation: FinalRelation {
            key_column: config.key.column.clone(),
            table,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    const CONFIG: &str = r#"
name = "engine test"

[[sources]]
name = "votes"
path = "votes.txt"
[sources.key]
department = "Dep"
commune = "Com"
[sources.bloc]
category = "Nuance"
value = "Voix"
total = "Exprimes"
labels = ["LSOC"]
share_output = "Share"

[[sources]]
name = "pop"
path = "pop.csv"
[sources.key]
combined = "CODGEO"
[sources.aggregate]
sum = ["POP"]
"#;

    fn input() -> PipelineInput {
        let votes = SourceTable::new(
            "votes",
            strings(&["Dep", "Com", "Exprimes", "Nuance", "Voix"]),
            vec![
                strings(&["1", "1", "100", "LSOC", "40"]),
                strings(&["1", "2", "100", "LSOC", "10"]),
                strings(&["ZA", "101", "50", "LSOC", "5"]),
            ],
        );
        let pop = SourceTable::new(
            "pop",
            strings(&["CODGEO", "POP"]),
            vec![strings(&["01001", "1200"]), strings(&["01003", "800"])],
        );
        PipelineInput {
            tables: HashMap::from([("votes".to_string(), votes), ("pop".to_string(), pop)]),
        }
    }

    #[test]
    fn run_reports_each_stage() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let result = run(&config, &input()).unwrap();

        assert_eq!(result.relation.key_column, "COM");
        assert_eq!(result.relation.table.columns(), &["Share", "POP"]);
        assert_eq!(result.relation.table.len(), 1);

        let report = &result.report;
        assert_eq!(report.meta.config_name, "engine test");
        assert_eq!(report.sources[0].rows.excluded, 1);
        assert_eq!(report.sources[0].units, 2);
        assert_eq!(report.merge_steps.len(), 2);
        assert_eq!(report.merge_steps[1].result_rows, 1);
        assert_eq!(report.summary[0].mean, Some(0.4));
    }

    #[test]
    fn unloaded_source_is_unreadable() {
        let config = PipelineConfig::from_toml(CONFIG).unwrap();
        let mut input = input();
        input.tables.remove("pop");
        let err = run(&config, &input).unwrap_err();
        assert!(matches!(err, HarmonizeError::SourceUnreadable { ref source_name, .. } if source_name == "pop"));
    }
}
