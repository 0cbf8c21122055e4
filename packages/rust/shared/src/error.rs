//! Error types for parcelpipe.
//!
//! Library crates use [`PipelineError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Propagation policy: row-level failures are counted by the pipeline and
//! never abort a run; file-level failures (`SourceRead`) abort that file;
//! batch-level failures (`LoadConflict`) abort that batch; `Config` aborts
//! the run before any I/O.

use std::path::PathBuf;

/// Top-level error type for all parcelpipe operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration loading/validation error, or an unknown source id.
    #[error("config error: {message}")]
    Config { message: String },

    /// A source file could not be read: missing file, bad archive, or an
    /// encoding that decodes under neither CP949 nor UTF-8.
    #[error("source read error at {path:?}: {message}")]
    SourceRead { path: PathBuf, message: String },

    /// Malformed PNU or row-level format error (counted, row skipped).
    #[error("invalid format: {message}")]
    InvalidFormat { message: String },

    /// A geometry payload in an encoding the converter does not recognize.
    #[error("unsupported geometry encoding: {0}")]
    UnsupportedGeometry(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Constraint violation or write failure scoped to one load batch.
    #[error("load conflict on {table} (rows {first_row}..{last_row}): {message}")]
    LoadConflict {
        table: String,
        first_row: usize,
        last_row: usize,
        message: String,
    },

    /// Network/HTTP error during crawling (retried before surfacing).
    #[error("network error: {0}")]
    Network(String),

    /// The portal's daily download allowance is exhausted; terminal for the
    /// remainder of the crawl run, not fatal to the process.
    #[error("daily download quota exceeded")]
    QuotaExceeded,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a source-read error with the offending path.
    pub fn source_read(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::SourceRead {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-format error from any displayable message.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PipelineError::config("unknown source: bogus");
        assert_eq!(err.to_string(), "config error: unknown source: bogus");

        let err = PipelineError::invalid_format("PNU must be 19 digits");
        assert!(err.to_string().contains("19 digits"));

        let err = PipelineError::LoadConflict {
            table: "lots".into(),
            first_row: 2000,
            last_row: 4000,
            message: "duplicate key".into(),
        };
        assert!(err.to_string().contains("lots"));
        assert!(err.to_string().contains("2000..4000"));
    }
}
