//! `geomerge run | validate | columns`: config-driven harmonization.

use std::path::{Path, PathBuf};

use geomerge_harmonize::{PipelineConfig, RunReport};
use geomerge_io::{load_sources, read_table, resolve_path, write_relation, WriteSummary};
use serde::Serialize;

use crate::exit_codes::{exit_code_for, io_exit_code_for, EXIT_CONFIG, EXIT_USAGE, EXIT_WRITE};
use crate::CliError;

/// Full JSON report: the engine report plus what was written.
#[derive(Serialize)]
struct RunOutput<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    output: &'a WriteSummary,
}

fn load_config(config_path: &Path) -> Result<(PipelineConfig, PathBuf), CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        CliError::new(EXIT_CONFIG, format!("cannot read config {}: {e}", config_path.display()))
    })?;
    let config = PipelineConfig::from_toml(&config_str)
        .map_err(|e| CliError::new(exit_code_for(&e), e.to_string()))?;

    // Resolve file paths relative to config file's directory
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base_dir))
}

pub fn cmd_run(
    config_path: PathBuf,
    output: Option<PathBuf>,
    json_output: bool,
    report_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&config_path)?;

    let out_path = match (output, config.output.path.as_deref()) {
        (Some(path), _) => path,
        (None, Some(path)) => resolve_path(&base_dir, path),
        (None, None) => {
            return Err(CliError::new(EXIT_USAGE, "no output path")
                .with_hint("set [output].path in the config or pass --output"))
        }
    };
    log::debug!("output path: {}", out_path.display());

    let input = load_sources(&config, &base_dir).map_err(|e| CliError::new(exit_code_for(&e), e.to_string()))?;
    let result = geomerge_harmonize::run(&config, &input).map_err(|e| {
        let err = CliError::new(exit_code_for(&e), e.to_string());
        match e {
            geomerge_harmonize::HarmonizeError::EmptyIntersection { .. } => {
                err.with_hint("check that every source uses the same geographic level and year")
            }
            _ => err,
        }
    })?;

    let written = write_relation(&result.relation, &config.output, &out_path)
        .map_err(|e| CliError::new(io_exit_code_for(&e), e.to_string()))?;

    let report = RunOutput {
        report: &result.report,
        output: &written,
    };
    let json_str = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::new(EXIT_WRITE, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = report_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::new(EXIT_WRITE, format!("cannot write report: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    // Human summary to stderr
    let d = &result.report.derive;
    eprintln!(
        "{}: {} sources, {} merged units, {} below threshold, {} rows written to {}",
        result.report.meta.config_name,
        result.report.sources.len(),
        d.rows_merged,
        d.below_threshold,
        written.rows,
        written.path.display(),
    );

    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let (config, _) = load_config(&config_path)?;
    eprintln!(
        "{}: valid ({} sources, {} output attributes)",
        config.name,
        config.sources.len(),
        config.output.columns.as_ref().map_or_else(|| config.attribute_order().len(), Vec::len),
    );
    Ok(())
}

pub fn cmd_columns(config_path: PathBuf, source_name: String) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&config_path)?;
    let source = config.source(&source_name).ok_or_else(|| {
        let names: Vec<&str> = config.sources.iter().map(|s| s.name.as_str()).collect();
        CliError::new(EXIT_USAGE, format!("unknown source '{source_name}'"))
            .with_hint(format!("sources: {}", names.join(", ")))
    })?;

    let loaded = read_table(source, &base_dir).map_err(|e| CliError::new(exit_code_for(&e), e.to_string()))?;
    for header in loaded.table.headers() {
        println!("{header}");
    }
    Ok(())
}
