use geomerge_harmonize::HarmonizeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error(transparent)]
    Harmonize(#[from] HarmonizeError),

    /// The final relation could not be written.
    #[error("cannot write '{path}': {reason}")]
    Write { path: String, reason: String },
}

impl IoError {
    pub(crate) fn write(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
