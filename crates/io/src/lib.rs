//! `geomerge-io`: TabularReader for delimited text and spreadsheets, source
//! loading relative to a config directory, and the final relation writer.

pub mod csv;
pub mod error;
pub mod writer;
pub mod xlsx;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use geomerge_harmonize::config::{SourceConfig, SourceFormat};
use geomerge_harmonize::{HarmonizeError, PipelineConfig, PipelineInput, SourceTable};

pub use error::IoError;
pub use writer::{write_relation, WriteSummary};

/// A source read from disk.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub table: SourceTable,
    /// Encoding actually used; `None` for spreadsheets.
    pub encoding: Option<&'static str>,
}

/// Resolve `path` against the config file's directory unless it is absolute.
pub fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Read one source as-is, without checking its declared columns.
pub fn read_table(source: &SourceConfig, base_dir: &Path) -> Result<LoadedSource, HarmonizeError> {
    let path = resolve_path(base_dir, &source.path);

    let (table, encoding) = match source.format {
        SourceFormat::Delimited => {
            let declared = csv::resolve_encoding(&source.name, &source.encoding)?;
            let fallback = csv::resolve_encoding(&source.name, &source.fallback_encoding)?;
            let bytes = std::fs::read(&path).map_err(|e| {
                HarmonizeError::unreadable(&source.name, format!("cannot read {}: {e}", path.display()))
            })?;
            let (content, used) = csv::decode(&source.name, &bytes, declared, fallback)?;
            let table = csv::parse_delimited(&source.name, &content, source.delimiter_byte()?, source.header_row)?;
            (table, Some(used))
        }
        SourceFormat::Spreadsheet => {
            let table = xlsx::read_spreadsheet(&source.name, &path, source.sheet.as_deref(), source.header_row)?;
            (table, None)
        }
    };

    log::debug!("{}: columns [{}]", source.name, table.headers().join(", "));
    log::info!(
        "loaded {}: {} row(s) from {}{}",
        source.name,
        table.len(),
        path.display(),
        encoding.map(|e| format!(" ({e})")).unwrap_or_default()
    );

    Ok(LoadedSource { table, encoding })
}

/// Read one source and check that every declared column is present.
pub fn read_source(source: &SourceConfig, base_dir: &Path) -> Result<LoadedSource, HarmonizeError> {
    let loaded = read_table(source, base_dir)?;
    for column in source.declared_columns() {
        if loaded.table.column(column).is_none() {
            return Err(HarmonizeError::missing_column(&source.name, column));
        }
    }
    Ok(loaded)
}

/// Load every configured source, in config order.
pub fn load_sources(config: &PipelineConfig, base_dir: &Path) -> Result<PipelineInput, HarmonizeError> {
    let mut tables = HashMap::with_capacity(config.sources.len());
    for source in &config.sources {
        let loaded = read_source(source, base_dir)?;
        tables.insert(source.name.clone(), loaded.table);
    }
    Ok(PipelineInput { tables })
}
