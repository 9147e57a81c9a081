// Final relation export

use std::path::{Path, PathBuf};

use geomerge_harmonize::config::OutputConfig;
use geomerge_harmonize::FinalRelation;
use serde::Serialize;

use crate::error::IoError;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// What was written, for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: usize,
    /// blake3 digest of the written bytes.
    pub blake3: String,
}

/// Render the relation as delimited text: key column first, then every
/// attribute in table order. Missing values are empty cells.
pub fn render(relation: &FinalRelation, output: &OutputConfig) -> Result<Vec<u8>, IoError> {
    let delimiter = output.delimiter_byte()?;
    let mut bytes = Vec::new();
    if output.bom {
        bytes.extend_from_slice(UTF8_BOM);
    }

    let render_err = |e: &dyn std::fmt::Display| IoError::Write {
        path: "<memory>".into(),
        reason: e.to_string(),
    };

    let mut writer = csv::WriterBuilder::new().delimiter(delimiter).from_writer(&mut bytes);

    let mut header = vec![relation.key_column.as_str()];
    header.extend(relation.table.columns().iter().map(String::as_str));
    writer.write_record(&header).map_err(|e| render_err(&e))?;

    for (key, values) in relation.table.rows() {
        let mut record = Vec::with_capacity(values.len() + 1);
        record.push(key.to_string());
        record.extend(values.iter().map(|v| v.map(|x| x.to_string()).unwrap_or_default()));
        writer.write_record(&record).map_err(|e| render_err(&e))?;
    }

    writer.flush().map_err(|e| render_err(&e))?;
    drop(writer);
    Ok(bytes)
}

/// Write the relation to `path` atomically: render to `<path>.tmp`, then
/// rename into place.
pub fn write_relation(relation: &FinalRelation, output: &OutputConfig, path: &Path) -> Result<WriteSummary, IoError> {
    let bytes = render(relation, output)?;
    let digest = blake3::hash(&bytes).to_hex().to_string();

    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| IoError::write(path, "output path has no file name"))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, &bytes).map_err(|e| IoError::write(&tmp_path, e))?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(IoError::write(path, e));
    }

    log::info!(
        "wrote {} row(s) to {} (blake3 {})",
        relation.table.len(),
        path.display(),
        &digest[..16]
    );

    Ok(WriteSummary {
        path: path.to_path_buf(),
        rows: relation.table.len(),
        blake3: digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomerge_harmonize::config::KeyConfig;
    use geomerge_harmonize::key::KeyOutcome;
    use geomerge_harmonize::{KeyNormalizer, UnitTable};
    use tempfile::tempdir;

    fn relation() -> FinalRelation {
        let n = KeyNormalizer::new(&KeyConfig::default());
        let key = |c: &str| match n.normalize_combined(c) {
            Ok(KeyOutcome::Key(k)) => k,
            other => panic!("{other:?}"),
        };
        let table = UnitTable::from_rows(
            "final",
            vec!["Share".into(), "P20_POP".into()],
            [
                (key("2A004"), vec![Some(0.25), Some(3600.0)]),
                (key("01001"), vec![None, Some(5000.0)]),
            ]
            .into_iter()
            .collect(),
        )
        .unwrap();
        FinalRelation {
            key_column: "COM".into(),
            table,
        }
    }

    #[test]
    fn render_with_bom_and_semicolons() {
        let bytes = render(&relation(), &OutputConfig::default()).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = std::str::from_utf8(&bytes[3..]).unwrap();
        assert_eq!(text, "COM;Share;P20_POP\n01001;;5000\n2A004;0.25;3600\n");
    }

    #[test]
    fn render_without_bom() {
        let output = OutputConfig {
            bom: false,
            delimiter: ",".into(),
            ..OutputConfig::default()
        };
        let bytes = render(&relation(), &output).unwrap();
        assert!(bytes.starts_with(b"COM,Share,P20_POP\n"));
    }

    #[test]
    fn write_is_atomic_and_deterministic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("final.csv");

        let first = write_relation(&relation(), &OutputConfig::default(), &path).unwrap();
        let second = write_relation(&relation(), &OutputConfig::default(), &path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.rows, 2);
        assert!(!dir.path().join("final.csv.tmp").exists());

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(blake3::hash(&on_disk).to_hex().to_string(), first.blake3);
    }

    #[test]
    fn missing_directory_is_write_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("final.csv");
        let err = write_relation(&relation(), &OutputConfig::default(), &path).unwrap_err();
        assert!(matches!(err, IoError::Write { .. }));
    }
}
