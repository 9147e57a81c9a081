//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Trigger                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success                                                  |
//! | 2    | Usage error (bad arguments, unknown source name)         |
//! | 3    | Config unreadable, unparsable, or invalid                |
//! | 4    | Source unreadable (missing, undecodable, column absent)  |
//! | 5    | Malformed key with `on_malformed = "fail"`               |
//! | 6    | A merge step produced an empty intersection              |
//! | 7    | Output or report could not be written                    |
//! | 8    | Derive stage refers to an unknown or duplicate column    |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `exit_code_for`

use geomerge_harmonize::HarmonizeError;
use geomerge_io::IoError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, unknown source name.
pub const EXIT_USAGE: u8 = 2;

/// Config file missing, not valid TOML, or failing validation.
pub const EXIT_CONFIG: u8 = 3;

/// A source file is missing, undecodable, or lacks a declared column.
pub const EXIT_SOURCE_UNREADABLE: u8 = 4;

/// A row key is malformed and the config asks to fail on it.
pub const EXIT_KEY_MALFORMED: u8 = 5;

/// A merge step left no common units.
pub const EXIT_EMPTY_INTERSECTION: u8 = 6;

/// The final relation or the JSON report could not be written.
pub const EXIT_WRITE: u8 = 7;

/// Unknown or duplicate attribute in the merge or derive stage.
pub const EXIT_COLUMN: u8 = 8;

/// Map an engine error to its exit code.
pub fn exit_code_for(err: &HarmonizeError) -> u8 {
    match err {
        HarmonizeError::Config(_) => EXIT_CONFIG,
        HarmonizeError::SourceUnreadable { .. } => EXIT_SOURCE_UNREADABLE,
        HarmonizeError::KeyMalformed { .. } => EXIT_KEY_MALFORMED,
        HarmonizeError::EmptyIntersection { .. } => EXIT_EMPTY_INTERSECTION,
        HarmonizeError::DuplicateColumn { .. } | HarmonizeError::UnknownColumn { .. } => EXIT_COLUMN,
    }
}

/// Map an IO-layer error to its exit code.
pub fn io_exit_code_for(err: &IoError) -> u8 {
    match err {
        IoError::Harmonize(inner) => exit_code_for(inner),
        IoError::Write { .. } => EXIT_WRITE,
    }
}
