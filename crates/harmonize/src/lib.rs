//! `geomerge-harmonize`: join-key normalization, aggregation and merge
//! engine for multi-source geographic tables.
//!
//! Pure engine crate: receives pre-loaded source tables, returns the final
//! relation and a run report. No CLI or IO dependencies.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod derived;
pub mod engine;
pub mod error;
pub mod key;
pub mod merge;
pub mod model;
pub mod summary;
pub mod table;

pub use config::PipelineConfig;
pub use engine::run;
pub use error::{HarmonizeError, HarmonizeResult};
pub use key::{CanonicalKey, KeyNormalizer};
pub use model::{FinalRelation, PipelineInput, PipelineResult, RunReport, UnitTable};
pub use table::SourceTable;
