//! Error types for the loader.

use thiserror::Error;

/// Errors that abort a load run.
///
/// An unmatched province label is not an error: those rows are filtered
/// out and counted (see `report::filter_resolved`).
#[derive(Debug, Error)]
pub enum LoadError {
    /// Input file has no column with the configured province label name
    #[error("input is missing required column '{column}' (found: {found:?})")]
    MissingColumn { column: String, found: Vec<String> },

    /// Malformed delimited input
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// `--encoding` names no known encoding
    #[error("unknown input encoding '{0}'")]
    UnknownEncoding(String),

    /// Input bytes are not valid in the declared encoding
    #[error("input is not valid {encoding}")]
    MalformedInput { encoding: &'static str },

    /// A reference province code is not an exact non-negative integer
    #[error("province code {value:?} for '{name}' is not a non-negative integer")]
    CodeCoercion { name: String, value: String },

    /// Override file could not be parsed
    #[error("override file {path}: {source}")]
    Overrides {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection, query or insert failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoadError>;
