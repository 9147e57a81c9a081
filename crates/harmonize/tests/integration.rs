use std::collections::HashMap;

use geomerge_harmonize::engine::run;
use geomerge_harmonize::model::{PipelineInput, PipelineResult};
use geomerge_harmonize::{CanonicalKey, HarmonizeError, KeyNormalizer, PipelineConfig, SourceTable};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn table(name: &str, headers: &[&str], rows: &[&[&str]]) -> SourceTable {
    SourceTable::new(name, strings(headers), rows.iter().map(|r| strings(r)).collect())
}

fn key(code: &str) -> CanonicalKey {
    let config = geomerge_harmonize::config::KeyConfig::default();
    match KeyNormalizer::new(&config).normalize_combined(code) {
        Ok(geomerge_harmonize::key::KeyOutcome::Key(k)) => k,
        other => panic!("bad test key {code}: {other:?}"),
    }
}

const STUDY: &str = r#"
name = "Municipal study"

[[sources]]
name = "elections_2014"
path = "unused"
[sources.key]
department = "Code du departement"
commune = "Code de la commune"
[sources.bloc]
category = "Code Nuance"
value = "Voix"
total = "Exprimes"
labels = ["LCOM", "LSOC", "LDVG"]
share_output = "Vote_Gauche_2014"

[[sources]]
name = "elections_2020"
path = "unused"
[sources.key]
department = "Code du departement"
commune = "Code de la commune"
[sources.bloc]
layout = "wide"
category = "Code Nuance"
value = "Voix"
total = "Exprimes"
labels = ["LCOM", "LSOC", "LDVG"]
share_output = "Vote_Gauche_2020"

[[sources]]
name = "population_2020"
path = "unused"
[sources.key]
combined = "CODGEO"
[sources.filter]
column = "NIVGEO"
values = ["COM"]
[sources.aggregate]
sum = ["P20_POP", "C20_POP15P", "C20_POP15P_CS3"]
keep = ["P20_POP", "C20_POP15P", "Part_Cadres_2020"]
[[sources.aggregate.ratios]]
numerator = "C20_POP15P_CS3"
denominator = "C20_POP15P"
output = "Part_Cadres_2020"

[[sources]]
name = "diplomes_2020"
path = "unused"
[sources.key]
combined = "CODGEO"
[sources.aggregate]
sum = ["P20_NSCOL15P_SUP5"]

[derive]
population_column = "P20_POP"
population_threshold = 3500.0

[[derive.ratios]]
numerator = "P20_NSCOL15P_SUP5"
denominator = "C20_POP15P"
output = "Part_Diplomes_2020"

[[derive.deltas]]
later = "Vote_Gauche_2020"
earlier = "Vote_Gauche_2014"
output = "Delta_Vote_Gauche"
"#;

fn study_input() -> PipelineInput {
    let e2014 = table(
        "elections_2014",
        &["Code du departement", "Code de la commune", "Exprimes", "Code Nuance", "Voix"],
        &[
            &["1", "1", "1000", "LSOC", "300"],
            &["1", "1", "1000", "LUMP", "700"],
            &["1", "2", "2000", "LCOM", "500"],
            &["1", "2", "2000", "LSOC", "500"],
            &["1", "3", "100", "LDVD", "100"],
            &["ZA", "101", "900", "LSOC", "900"],
            &["2A", "4", "500", "LDVG", "50"],
        ],
    );
    let e2020 = table(
        "elections_2020",
        &[
            "Code du departement",
            "Code de la commune",
            "Exprimes",
            "Code Nuance",
            "Voix",
            "Code Nuance",
            "Voix",
        ],
        &[
            &["01", "001", "800", "LSOC", "400", "LDVD", "400"],
            &["01", "002", "2000", "LDVG", "600", "LCOM", ""],
            &["01", "003", "100", "LDVD", "100", "", ""],
            &["2A", "004", "400", "LDVG", "100", "", ""],
        ],
    );
    let population = table(
        "population_2020",
        &["NIVGEO", "CODGEO", "P20_POP", "C20_POP15P", "C20_POP15P_CS3"],
        &[
            &["COM", "1001", "5000", "4000", "400"],
            &["COM", "01002", "3000", "2500", "250"],
            &["ARM", "01002", "9999", "9999", "9999"],
            &["COM", "01003", "4000", "0", "0"],
            &["COM", "2A004", "3600", "3000", "300"],
        ],
    );
    let diplomes = table(
        "diplomes_2020",
        &["CODGEO", "P20_NSCOL15P_SUP5"],
        &[
            &["01001", "800"],
            &["01002", "100"],
            &["01003", "50"],
            &["2A004", "n/a"],
        ],
    );

    PipelineInput {
        tables: HashMap::from([
            ("elections_2014".to_string(), e2014),
            ("elections_2020".to_string(), e2020),
            ("population_2020".to_string(), population),
            ("diplomes_2020".to_string(), diplomes),
        ]),
    }
}

fn run_study(config: &str) -> Result<PipelineResult, HarmonizeError> {
    let config = PipelineConfig::from_toml(config)?;
    run(&config, &study_input())
}

#[test]
fn full_pipeline_produces_final_relation() {
    let result = run_study(STUDY).unwrap();
    let table = &result.relation.table;

    assert_eq!(
        table.columns(),
        &[
            "Vote_Gauche_2014",
            "Vote_Gauche_2020",
            "P20_POP",
            "C20_POP15P",
            "Part_Cadres_2020",
            "P20_NSCOL15P_SUP5",
            "Part_Diplomes_2020",
            "Delta_Vote_Gauche",
        ]
    );

    // 01002 is dropped by the population filter (3000); ZA is overseas.
    let keys: Vec<&str> = table.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["01001", "01003", "2A004"]);

    let k = key("01001");
    assert_eq!(table.value(&k, "Vote_Gauche_2014"), Some(0.3));
    assert_eq!(table.value(&k, "Vote_Gauche_2020"), Some(0.5));
    assert_eq!(table.value(&k, "Part_Cadres_2020"), Some(0.1));
    assert_eq!(table.value(&k, "Part_Diplomes_2020"), Some(0.2));
    let delta = table.value(&k, "Delta_Vote_Gauche").unwrap();
    assert!((delta - 0.2).abs() < 1e-12);

    // Zero denominator: missing ratio, row kept.
    let k = key("01003");
    assert_eq!(table.value(&k, "Vote_Gauche_2014"), Some(0.0));
    assert_eq!(table.value(&k, "Part_Cadres_2020"), None);
    assert_eq!(table.value(&k, "Part_Diplomes_2020"), None);
    assert_eq!(table.value(&k, "Delta_Vote_Gauche"), Some(0.0));

    // Corsica keys match across split and combined conventions.
    let k = key("2A004");
    assert_eq!(table.value(&k, "Vote_Gauche_2014"), Some(0.1));
    assert_eq!(table.value(&k, "Vote_Gauche_2020"), Some(0.25));
    assert_eq!(table.value(&k, "P20_NSCOL15P_SUP5"), None);
}

#[test]
fn report_tracks_every_stage() {
    let result = run_study(STUDY).unwrap();
    let report = &result.report;

    assert_eq!(report.meta.config_name, "Municipal study");
    assert_eq!(report.meta.key_column, "COM");

    let e2014 = &report.sources[0];
    assert_eq!(e2014.rows.rows_read, 7);
    assert_eq!(e2014.rows.excluded, 1);
    assert_eq!(e2014.units, 4);

    let pop = &report.sources[2];
    assert_eq!(pop.rows.filtered_out, 1);
    assert_eq!(pop.units, 4);

    let diplomes = &report.sources[3];
    assert_eq!(diplomes.coerced_values, 1);

    let steps: Vec<(usize, &str, usize)> = report
        .merge_steps
        .iter()
        .map(|s| (s.step, s.source.as_str(), s.result_rows))
        .collect();
    assert_eq!(
        steps,
        vec![
            (1, "elections_2014", 4),
            (2, "elections_2020", 4),
            (3, "population_2020", 4),
            (4, "diplomes_2020", 4),
        ]
    );

    assert_eq!(report.derive.rows_merged, 4);
    assert_eq!(report.derive.below_threshold, 1);
    assert_eq!(report.derive.rows_emitted, 3);

    let pop_summary = report.summary.iter().find(|s| s.column == "P20_POP").unwrap();
    assert_eq!(pop_summary.present, 3);
    assert_eq!(pop_summary.min, Some(3600.0));
    assert_eq!(pop_summary.max, Some(5000.0));
}

#[test]
fn output_columns_select_and_order() {
    let config = format!(
        "{STUDY}\n[output]\ncolumns = [\"Delta_Vote_Gauche\", \"P20_POP\"]\n"
    );
    let result = run_study(&config).unwrap();
    assert_eq!(result.relation.table.columns(), &["Delta_Vote_Gauche", "P20_POP"]);
    assert_eq!(result.report.summary.len(), 2);
}

#[test]
fn drop_incomplete_removes_rows_with_missing_values() {
    let config = STUDY.replace(
        "population_threshold = 3500.0",
        "population_threshold = 3500.0\ndrop_incomplete = true",
    );
    let result = run_study(&config).unwrap();
    let keys: Vec<&str> = result.relation.table.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["01001"]);
    assert_eq!(result.report.derive.incomplete_dropped, 2);
}

#[test]
fn empty_intersection_names_the_step() {
    let config = PipelineConfig::from_toml(STUDY).unwrap();
    let mut input = study_input();
    input.tables.insert(
        "population_2020".to_string(),
        table(
            "population_2020",
            &["NIVGEO", "CODGEO", "P20_POP", "C20_POP15P", "C20_POP15P_CS3"],
            &[&["COM", "75056", "2000000", "1", "1"]],
        ),
    );
    let err = run(&config, &input).unwrap_err();
    match err {
        HarmonizeError::EmptyIntersection { step, source_name } => {
            assert_eq!(step, 3);
            assert_eq!(source_name, "population_2020");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_key_fails_when_configured() {
    let config = format!("{STUDY}\n[key]\non_malformed = \"fail\"\n");
    let config = PipelineConfig::from_toml(&config).unwrap();
    let mut input = study_input();
    input.tables.insert(
        "diplomes_2020".to_string(),
        table("diplomes_2020", &["CODGEO", "P20_NSCOL15P_SUP5"], &[&["01001", "1"], &["1x01", "2"]]),
    );
    let err = run(&config, &input).unwrap_err();
    assert!(matches!(
        err,
        HarmonizeError::KeyMalformed { ref source_name, row: 2, .. } if source_name == "diplomes_2020"
    ));
}

#[test]
fn missing_declared_column_is_fatal_for_source() {
    let config = PipelineConfig::from_toml(STUDY).unwrap();
    let mut input = study_input();
    input.tables.insert(
        "diplomes_2020".to_string(),
        table("diplomes_2020", &["CODGEO", "P20_NSCOL15P"], &[&["01001", "1"]]),
    );
    let err = run(&config, &input).unwrap_err();
    assert!(err.to_string().contains("P20_NSCOL15P_SUP5"));
}
