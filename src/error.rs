//! Error types for Trial Flux

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, cleaning or aggregating trial data
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Schema error in {file}: missing required columns {missing:?}")]
    Schema { file: String, missing: Vec<String> },

    #[error("Unknown category in {file} (line {line}): {field} = {value:?}")]
    UnknownCategory {
        file: String,
        line: u64,
        field: String,
        value: String,
    },

    #[error("Invalid value in {file} (line {line}): column {column} = {value:?}")]
    InvalidValue {
        file: String,
        line: u64,
        column: String,
        value: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Delimited text error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate demographics row for participant {0}")]
    DuplicateDemographics(String),

    #[error("Invalid aggregation: {0}")]
    InvalidAggregation(String),

    #[error("{0} participant file(s) failed")]
    BatchFailed(usize),
}

impl PipelineError {
    /// Short rule name used when reporting per-file failures
    pub fn rule(&self) -> &'static str {
        match self {
            PipelineError::Schema { .. } => "schema",
            PipelineError::UnknownCategory { .. } => "unknown_category",
            PipelineError::InvalidValue { .. } => "invalid_value",
            PipelineError::Io { .. } => "io",
            PipelineError::Csv(_) => "csv",
            PipelineError::Json(_) => "json",
            PipelineError::Toml(_) => "toml",
            PipelineError::Config(_) => "config",
            PipelineError::DuplicateDemographics(_) => "duplicate_demographics",
            PipelineError::InvalidAggregation(_) => "invalid_aggregation",
            PipelineError::BatchFailed(_) => "batch_failed",
        }
    }
}
