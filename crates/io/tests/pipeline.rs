use std::path::{Path, PathBuf};

use geomerge_harmonize::{run, HarmonizeError, PipelineConfig};
use geomerge_io::{load_sources, read_source, resolve_path, write_relation, IoError};
use rust_xlsxwriter::{Workbook, XlsxError};
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn write_income_workbook(path: &Path) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("COM")?;
    sheet.write_string(0, 0, "Revenus disponibles 2020")?;
    sheet.write_string(2, 0, "CODGEO")?;
    sheet.write_string(2, 1, "MED20")?;
    // Codes stored as numbers lose their leading zero.
    sheet.write_number(3, 0, 1001.0)?;
    sheet.write_number(3, 1, 22000.0)?;
    sheet.write_number(4, 0, 1004.0)?;
    sheet.write_number(4, 1, 24000.0)?;
    sheet.write_string(5, 0, "2A004")?;
    sheet.write_number(5, 1, 23500.5)?;
    sheet.write_string(6, 0, "2A004")?;
    sheet.write_number(6, 1, 99999.0)?;
    workbook.save(path)
}

/// Copy the delimited fixtures into a scratch directory next to a freshly
/// generated spreadsheet, so the study config resolves every path.
fn study_dir() -> (TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().unwrap();
    for name in ["elections_2014.txt", "elections_2020.tsv", "population_2020.csv", "study.toml"] {
        std::fs::copy(fixtures_dir().join(name), dir.path().join(name)).unwrap();
    }
    write_income_workbook(&dir.path().join("revenus_2020.xlsx")).unwrap();

    let toml = std::fs::read_to_string(dir.path().join("study.toml")).unwrap();
    let config = PipelineConfig::from_toml(&toml).unwrap();
    (dir, config)
}

#[test]
fn latin1_source_falls_back_and_keeps_accents() {
    let (dir, config) = study_dir();
    let loaded = read_source(config.source("elections_2014").unwrap(), dir.path()).unwrap();
    assert_eq!(loaded.encoding, Some("windows-1252"));
    assert_eq!(loaded.table.headers()[0], "Code du département");
    assert_eq!(loaded.table.len(), 8);
    let label = loaded.table.column("Libellé de la commune").unwrap();
    assert_eq!(loaded.table.cell(2, label), "Ambérieu-en-Bugey");
}

#[test]
fn wide_tab_file_gets_suffixed_groups() {
    let (dir, config) = study_dir();
    let loaded = read_source(config.source("elections_2020").unwrap(), dir.path()).unwrap();
    assert_eq!(loaded.encoding, Some("UTF-8"));
    assert_eq!(
        loaded.table.headers(),
        &[
            "Code du département",
            "Code de la commune",
            "Exprimés",
            "Code Nuance",
            "Voix",
            "Code Nuance.1",
            "Voix.1",
        ]
    );
}

#[test]
fn preamble_rows_are_skipped() {
    let (dir, config) = study_dir();
    let loaded = read_source(config.source("population_2020").unwrap(), dir.path()).unwrap();
    assert_eq!(loaded.table.headers()[0], "NIVGEO");
    assert_eq!(loaded.table.len(), 5);
    assert_eq!(loaded.table.cell(0, 1), "01001");
}

#[test]
fn spreadsheet_header_offset_and_numeric_codes() {
    let (dir, config) = study_dir();
    let loaded = read_source(config.source("revenus_2020").unwrap(), dir.path()).unwrap();
    assert_eq!(loaded.encoding, None);
    assert_eq!(loaded.table.headers(), &["CODGEO", "MED20"]);
    assert_eq!(loaded.table.len(), 4);
    assert_eq!(loaded.table.cell(0, 0), "1001");
    assert_eq!(loaded.table.cell(2, 1), "23500.5");
}

#[test]
fn full_study_writes_expected_relation() {
    let (dir, config) = study_dir();
    let input = load_sources(&config, dir.path()).unwrap();
    let result = run(&config, &input).unwrap();

    let steps: Vec<(usize, usize)> = result
        .report
        .merge_steps
        .iter()
        .map(|s| (s.step, s.result_rows))
        .collect();
    assert_eq!(steps, vec![(1, 3), (2, 3), (3, 3), (4, 3)]);
    assert_eq!(result.report.derive.below_threshold, 1);
    assert_eq!(result.report.sources[0].rows.excluded, 1);
    assert_eq!(result.report.sources[1].rows.excluded, 1);
    assert_eq!(result.report.sources[2].rows.filtered_out, 1);

    let out = resolve_path(dir.path(), config.output.path.as_deref().unwrap());
    let written = write_relation(&result.relation, &config.output, &out).unwrap();
    assert_eq!(written.rows, 2);

    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(b"\xef\xbb\xbf"));
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    assert_eq!(
        text,
        "COM;Vote_Gauche_2014;Vote_Gauche_2020;P20_POP;Part_Cadres_2020;MED20;Delta_Vote_Gauche\n\
         01004;0.5;0.5;14514;0.1;24000;0\n\
         2A004;0.25;0.5;71361;0.1;23500.5;0.25\n"
    );
}

#[test]
fn rerun_is_idempotent() {
    let (dir, config) = study_dir();
    let out = dir.path().join("final.csv");

    let mut digests = Vec::new();
    for _ in 0..2 {
        let input = load_sources(&config, dir.path()).unwrap();
        let result = run(&config, &input).unwrap();
        digests.push(write_relation(&result.relation, &config.output, &out).unwrap().blake3);
    }
    assert_eq!(digests[0], digests[1]);
}

#[test]
fn report_serializes_to_json() {
    let (dir, config) = study_dir();
    let input = load_sources(&config, dir.path()).unwrap();
    let result = run(&config, &input).unwrap();
    let json = serde_json::to_value(&result.report).unwrap();
    assert_eq!(json["merge_steps"][3]["source"], "revenus_2020");
    assert_eq!(json["sources"][2]["filtered_out"], 1);
    assert_eq!(json["derive"]["rows_emitted"], 2);
}

#[test]
fn missing_file_is_unreadable() {
    let (dir, config) = study_dir();
    std::fs::remove_file(dir.path().join("population_2020.csv")).unwrap();
    let err = load_sources(&config, dir.path()).unwrap_err();
    assert!(matches!(
        err,
        HarmonizeError::SourceUnreadable { ref source_name, .. } if source_name == "population_2020"
    ));
}

#[test]
fn missing_declared_column_is_unreadable() {
    let (dir, _) = study_dir();
    let toml = std::fs::read_to_string(dir.path().join("study.toml"))
        .unwrap()
        .replace("numeric_columns = [\"Exprimés\", \"Voix\"]", "numeric_columns = [\"Inscrits\"]");
    let config_missing = PipelineConfig::from_toml(&toml).unwrap();
    let err = read_source(config_missing.source("elections_2014").unwrap(), dir.path()).unwrap_err();
    assert!(err.to_string().contains("Inscrits"));
}

#[test]
fn write_into_missing_directory_fails() {
    let (dir, config) = study_dir();
    let input = load_sources(&config, dir.path()).unwrap();
    let result = run(&config, &input).unwrap();
    let err = write_relation(&result.relation, &config.output, &dir.path().join("nope/final.csv")).unwrap_err();
    assert!(matches!(err, IoError::Write { .. }));
}

#[test]
fn written_relation_reads_back_bit_for_bit() {
    use geomerge_harmonize::config::{KeyConfig, OutputConfig};
    use geomerge_harmonize::key::KeyOutcome;
    use geomerge_harmonize::table::{parse_number, Decimal};
    use geomerge_harmonize::{FinalRelation, KeyNormalizer, UnitTable};

    let n = KeyNormalizer::new(&KeyConfig::default());
    let key = |c: &str| match n.normalize_combined(c) {
        Ok(KeyOutcome::Key(k)) => k,
        other => panic!("{other:?}"),
    };
    let awkward = [0.1 + 0.2, 1.0 / 3.0, 5e-324, f64::MAX, -2.0 / 3.0, 1e-7];
    let rows = [
        (key("01001"), vec![Some(awkward[0]), Some(awkward[1]), None]),
        (key("2A004"), vec![Some(awkward[2]), None, Some(awkward[3])]),
        (key("75056"), vec![None, Some(awkward[4]), Some(awkward[5])]),
    ];
    let expected: Vec<(String, Vec<Option<u64>>)> = rows
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|x| x.map(f64::to_bits)).collect()))
        .collect();
    let relation = FinalRelation {
        key_column: "COM".into(),
        table: UnitTable::from_rows(
            "final",
            vec!["A".into(), "B".into(), "C".into()],
            rows.into_iter().collect(),
        )
        .unwrap(),
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final.csv");
    let output = OutputConfig::default();
    assert!(output.bom);
    write_relation(&relation, &output, &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (text, used) =
        geomerge_io::csv::decode("final", &bytes, encoding_rs::UTF_8, encoding_rs::WINDOWS_1252).unwrap();
    assert_eq!(used, "UTF-8");
    let table = geomerge_io::csv::parse_delimited("final", &text, b';', 0).unwrap();
    assert_eq!(table.headers(), &["COM", "A", "B", "C"]);

    let reread: Vec<(String, Vec<Option<u64>>)> = table
        .rows()
        .map(|row| {
            let values = row[1..]
                .iter()
                .map(|cell| parse_number(cell, Decimal::Point).map(f64::to_bits))
                .collect();
            (row[0].clone(), values)
        })
        .collect();
    assert_eq!(reread, expected);
}
