// geomerge CLI - config-driven harmonization of per-unit statistical sources

mod exit_codes;
mod logging;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::EXIT_SUCCESS;

#[derive(Parser)]
#[command(name = "geomerge")]
#[command(about = "Harmonize, merge and derive per-commune statistics from heterogeneous sources")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Only log warnings and errors (RUST_LOG overrides)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the final relation
    #[command(after_help = "\
Examples:
  geomerge run study.toml
  geomerge run study.toml --output out/final.csv
  geomerge run study.toml --json > report.json
  geomerge run study.toml --report report.json --quiet

Source paths in the config are resolved relative to the config file.")]
    Run {
        /// Pipeline config (TOML)
        config: PathBuf,

        /// Output file (overrides [output].path)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Also write the JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Parse and check a config without reading any source
    #[command(after_help = "\
Examples:
  geomerge validate study.toml")]
    Validate {
        /// Pipeline config (TOML)
        config: PathBuf,
    },

    /// List the column names of one configured source, one per line
    #[command(after_help = "\
Examples:
  geomerge columns study.toml population_2020
  geomerge columns study.toml elections_2020 | grep -n Voix")]
    Columns {
        /// Pipeline config (TOML)
        config: PathBuf,

        /// Source name as declared in [[sources]]
        source: String,
    },
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nengine:  geomerge-harmonize ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   debug",
            "\ntarget:  ", env!("TARGET"),
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nengine:  geomerge-harmonize ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   release",
            "\ntarget:  ", env!("TARGET"),
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.quiet);

    let result = match cli.command {
        Commands::Run {
            config,
            output,
            json,
            report,
        } => run::cmd_run(config, output, json, report),
        Commands::Validate { config } => run::cmd_validate(config),
        Commands::Columns { config, source } => run::cmd_columns(config, source),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
