use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Deserialize;

use crate::error::HarmonizeError;
use crate::key::overseas_floor;
use crate::table::Decimal;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub key: KeyConfig,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub derive: DeriveConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Canonical key
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    #[serde(default = "default_key_column")]
    pub column: String,
    #[serde(default = "default_department_width")]
    pub department_width: usize,
    #[serde(default = "default_commune_width")]
    pub commune_width: usize,
    /// Numeric departments above this bound are outside the study area.
    #[serde(default = "default_max_department")]
    pub max_department: u32,
    #[serde(default)]
    pub on_malformed: MalformedKeyPolicy,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            column: default_key_column(),
            department_width: default_department_width(),
            commune_width: default_commune_width(),
            max_department: default_max_department(),
            on_malformed: MalformedKeyPolicy::default(),
        }
    }
}

impl KeyConfig {
    pub fn width(&self) -> usize {
        self.department_width + self.commune_width
    }
}

fn default_key_column() -> String {
    "COM".into()
}

fn default_department_width() -> usize {
    2
}

fn default_commune_width() -> usize {
    3
}

fn default_max_department() -> u32 {
    95
}

/// What a row-level malformed key does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKeyPolicy {
    /// Drop the row, count it, keep going.
    #[default]
    Drop,
    /// Abort the run with `KeyMalformed`.
    Fail,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_fallback_encoding")]
    pub fallback_encoding: String,
    /// Preamble rows before the header row.
    #[serde(default)]
    pub header_row: usize,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub decimal: Decimal,
    /// Identifier columns: always kept as exact text.
    #[serde(default)]
    pub text_columns: Vec<String>,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    pub key: KeyColumns,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    #[serde(default)]
    pub aggregate: Option<AggregateSpec>,
    #[serde(default)]
    pub bloc: Option<BlocSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    Delimited,
    Spreadsheet,
}

fn default_delimiter() -> String {
    ",".into()
}

fn default_encoding() -> String {
    "utf-8".into()
}

fn default_fallback_encoding() -> String {
    "windows-1252".into()
}

/// Where a source keeps its geographic identifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeyColumns {
    Split { department: String, commune: String },
    Combined { combined: String },
}

impl KeyColumns {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Split { department, commune } => vec![department.as_str(), commune.as_str()],
            Self::Combined { combined } => vec![combined.as_str()],
        }
    }
}

/// Granularity marker: rows whose `column` value is not in `values` are
/// dropped. Applied only when the source carries the column.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

/// The harmonization stage a source goes through.
pub enum SourceStage<'a> {
    Aggregate(&'a AggregateSpec),
    Bloc(&'a BlocSpec),
}

impl SourceConfig {
    pub fn stage(&self) -> Result<SourceStage<'_>, HarmonizeError> {
        match (&self.aggregate, &self.bloc) {
            (Some(agg), None) => Ok(SourceStage::Aggregate(agg)),
            (None, Some(bloc)) => Ok(SourceStage::Bloc(bloc)),
            _ => Err(HarmonizeError::Config(format!(
                "source '{}': exactly one of [aggregate] or [bloc] is required",
                self.name
            ))),
        }
    }

    /// The delimiter as a single byte. `"tab"` is accepted for `\t`.
    pub fn delimiter_byte(&self) -> Result<u8, HarmonizeError> {
        parse_delimiter(&self.delimiter)
            .ok_or_else(|| HarmonizeError::Config(format!(
                "source '{}': delimiter must be a single ASCII character, got {:?}",
                self.name, self.delimiter
            )))
    }

    /// Columns the reader must find: declared identifier and numeric columns
    /// plus the key columns.
    pub fn declared_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        for c in self
            .text_columns
            .iter()
            .chain(self.numeric_columns.iter())
            .map(String::as_str)
            .chain(self.key.columns())
        {
            if !cols.contains(&c) {
                cols.push(c);
            }
        }
        cols
    }

    /// Attribute names this source contributes to the merged relation, in order.
    pub fn output_columns(&self) -> Vec<String> {
        match (&self.aggregate, &self.bloc) {
            (Some(agg), _) => agg.output_columns(),
            (None, Some(bloc)) => bloc.output_columns(),
            (None, None) => Vec::new(),
        }
    }
}

pub(crate) fn parse_delimiter(raw: &str) -> Option<u8> {
    if raw.eq_ignore_ascii_case("tab") || raw == "\\t" {
        return Some(b'\t');
    }
    match raw.as_bytes() {
        [b] if b.is_ascii() => Some(*b),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateSpec {
    /// Columns summed across all rows of a unit.
    #[serde(default)]
    pub sum: Vec<String>,
    /// Unit-level attributes repeated on every sub-row: first non-missing wins.
    #[serde(default)]
    pub first: Vec<String>,
    #[serde(default)]
    pub ratios: Vec<RatioSpec>,
    /// Optional projection of the produced columns.
    #[serde(default)]
    pub keep: Option<Vec<String>>,
}

impl AggregateSpec {
    /// Every column the aggregator computes, before projection.
    pub fn computed_columns(&self) -> Vec<String> {
        self.sum
            .iter()
            .chain(self.first.iter())
            .cloned()
            .chain(self.ratios.iter().map(|r| r.output.clone()))
            .collect()
    }

    pub fn output_columns(&self) -> Vec<String> {
        match &self.keep {
            Some(keep) => keep.clone(),
            None => self.computed_columns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatioSpec {
    pub numerator: String,
    pub denominator: String,
    pub output: String,
}

// ---------------------------------------------------------------------------
// Bloc classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlocSpec {
    #[serde(default)]
    pub layout: VoteLayout,
    pub category: String,
    pub value: String,
    pub total: String,
    #[serde(default)]
    pub total_reduction: TotalReduction,
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub votes_output: Option<String>,
    #[serde(default)]
    pub total_output: Option<String>,
    pub share_output: String,
}

impl BlocSpec {
    pub fn output_columns(&self) -> Vec<String> {
        self.votes_output
            .iter()
            .chain(self.total_output.iter())
            .cloned()
            .chain(std::iter::once(self.share_output.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteLayout {
    /// One row per unit per category.
    #[default]
    Long,
    /// Repeated `category`/`value` column groups (`X`, `X.1`, `X.2`, ...).
    Wide,
}

/// How the per-unit total is reduced across a unit's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalReduction {
    /// The total is repeated on every row of the unit.
    #[default]
    First,
    /// Rows are sub-units; totals add up.
    Sum,
}

// ---------------------------------------------------------------------------
// Derived variables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeriveConfig {
    #[serde(default)]
    pub population_column: Option<String>,
    #[serde(default)]
    pub population_threshold: Option<f64>,
    /// Drop rows with any missing attribute after every other step.
    #[serde(default)]
    pub drop_incomplete: bool,
    /// Explicit replacement values for missing attributes.
    #[serde(default)]
    pub fill_missing: BTreeMap<String, f64>,
    /// Ratios over attributes from different sources, computed after the merge.
    #[serde(default)]
    pub ratios: Vec<RatioSpec>,
    #[serde(default)]
    pub deltas: Vec<DeltaSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaSpec {
    pub later: String,
    pub earlier: String,
    pub output: String,
}

/// Strict `>` population filter.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationFilter {
    pub column: String,
    pub threshold: f64,
}

impl DeriveConfig {
    pub fn population_filter(&self) -> Option<PopulationFilter> {
        match (&self.population_column, self.population_threshold) {
            (Some(column), Some(threshold)) => Some(PopulationFilter {
                column: column.clone(),
                threshold,
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_output_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_bom")]
    pub bom: bool,
    /// Explicit attribute order after the key column.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: default_output_delimiter(),
            bom: default_bom(),
            columns: None,
        }
    }
}

impl OutputConfig {
    pub fn delimiter_byte(&self) -> Result<u8, HarmonizeError> {
        parse_delimiter(&self.delimiter).ok_or_else(|| {
            HarmonizeError::Config(format!(
                "output: delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            ))
        })
    }
}

fn default_output_delimiter() -> String {
    ";".into()
}

fn default_bom() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, HarmonizeError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| HarmonizeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// All attributes the run produces, in stable output order: source
    /// outputs in source order, then derived ratios, then deltas.
    pub fn attribute_order(&self) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|s| s.output_columns())
            .chain(self.derive.ratios.iter().map(|r| r.output.clone()))
            .chain(self.derive.deltas.iter().map(|d| d.output.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), HarmonizeError> {
        let err = |msg: String| Err(HarmonizeError::Config(msg));

        let width = self.key.width();
        if self.key.department_width == 0 || self.key.commune_width == 0 || width > 10 {
            return err(format!(
                "key widths must be positive and total at most 10, got {}+{}",
                self.key.department_width, self.key.commune_width
            ));
        }
        let floor = overseas_floor(self.key.department_width);
        if u64::from(self.key.max_department) >= floor {
            return err(format!(
                "max_department must be below {floor}: with a {}-digit department, combined codes \
                 of overseas departments (971-989) start at {floor}",
                self.key.department_width
            ));
        }
        if self.key.column.trim().is_empty() {
            return err("key column name must not be empty".into());
        }

        if self.sources.is_empty() {
            return err("at least one source is required".into());
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return err(format!("duplicate source name '{}'", source.name));
            }
            source.delimiter_byte()?;
            validate_stage(source)?;
        }

        // Every attribute name is produced exactly once and never shadows the key.
        let mut produced: Vec<String> = Vec::new();
        for source in &self.sources {
            for col in source.output_columns() {
                register(&mut produced, col, &self.key.column)?;
            }
        }
        for ratio in &self.derive.ratios {
            for input in [&ratio.numerator, &ratio.denominator] {
                if !produced.contains(input) {
                    return err(format!(
                        "derive ratio '{}': input '{input}' is not produced by any earlier stage",
                        ratio.output
                    ));
                }
            }
            register(&mut produced, ratio.output.clone(), &self.key.column)?;
        }
        let before_deltas = produced.clone();
        for delta in &self.derive.deltas {
            for input in [&delta.later, &delta.earlier] {
                if !before_deltas.contains(input) {
                    return err(format!(
                        "delta '{}': input '{input}' is not produced by any source or ratio",
                        delta.output
                    ));
                }
            }
            register(&mut produced, delta.output.clone(), &self.key.column)?;
        }

        match (&self.derive.population_column, self.derive.population_threshold) {
            (Some(col), Some(_)) => {
                if !produced.contains(col) {
                    return err(format!("population column '{col}' is not produced by any stage"));
                }
            }
            (None, None) => {}
            _ => {
                return err(
                    "population_column and population_threshold must be set together".into(),
                )
            }
        }

        for col in self.derive.fill_missing.keys() {
            if !produced.contains(col) {
                return err(format!("fill_missing: '{col}' is not produced by any stage"));
            }
        }

        self.output.delimiter_byte()?;
        if let Some(ref cols) = self.output.columns {
            let mut seen = HashSet::new();
            for col in cols {
                if !produced.contains(col) {
                    return err(format!("output column '{col}' is not produced by any stage"));
                }
                if !seen.insert(col) {
                    return err(format!("output column '{col}' listed twice"));
                }
            }
        }

        Ok(())
    }
}

fn register(produced: &mut Vec<String>, col: String, key_column: &str) -> Result<(), HarmonizeError> {
    if col == key_column {
        return Err(HarmonizeError::Config(format!(
            "attribute '{col}' collides with the key column"
        )));
    }
    if produced.contains(&col) {
        return Err(HarmonizeError::Config(format!(
            "attribute '{col}' is produced more than once"
        )));
    }
    produced.push(col);
    Ok(())
}

fn validate_stage(source: &SourceConfig) -> Result<(), HarmonizeError> {
    let err = |msg: String| Err(HarmonizeError::Config(format!("source '{}': {msg}", source.name)));

    match source.stage()? {
        SourceStage::Aggregate(agg) => {
            if agg.sum.is_empty() && agg.first.is_empty() {
                return err("aggregate needs at least one 'sum' or 'first' column".into());
            }
            let inputs: Vec<&String> = agg.sum.iter().chain(agg.first.iter()).collect();
            for ratio in &agg.ratios {
                for col in [&ratio.numerator, &ratio.denominator] {
                    if !inputs.contains(&col) {
                        return err(format!(
                            "ratio '{}': '{col}' must be listed in 'sum' or 'first'",
                            ratio.output
                        ));
                    }
                }
            }
            if let Some(ref keep) = agg.keep {
                let computed = agg.computed_columns();
                for col in keep {
                    if !computed.contains(col) {
                        return err(format!("keep: '{col}' is not computed by this source"));
                    }
                }
            }
        }
        SourceStage::Bloc(bloc) => {
            if bloc.labels.is_empty() {
                return err("bloc needs at least one label".into());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
