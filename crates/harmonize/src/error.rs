use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarmonizeError {
    /// TOML parse / deserialization / validation error.
    #[error("config error: {0}")]
    Config(String),

    /// File missing, undecodable, or a declared column absent.
    #[error("source '{source_name}' unreadable: {reason}")]
    SourceUnreadable { source_name: String, reason: String },

    /// Identifier fragment not coercible to the canonical key format.
    /// `row` is the 1-based data row (header excluded).
    #[error("source '{source_name}', row {row}: malformed key '{value}' ({reason})")]
    KeyMalformed {
        source_name: String,
        row: usize,
        value: String,
        reason: String,
    },

    /// A merge step produced zero rows.
    #[error("merge step {step} ('{source_name}') produced an empty intersection")]
    EmptyIntersection { step: usize, source_name: String },

    /// Two stages produce an attribute with the same name.
    #[error("duplicate column '{column}'")]
    DuplicateColumn { column: String },

    /// A stage refers to an attribute the relation does not carry.
    #[error("{stage}: unknown column '{column}'")]
    UnknownColumn { stage: String, column: String },
}

impl HarmonizeError {
    pub fn unreadable(source_name: &str, reason: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing_column(source_name: &str, column: &str) -> Self {
        Self::unreadable(source_name, format!("missing column '{column}'"))
    }
}

pub type HarmonizeResult<T> = Result<T, HarmonizeError>;
