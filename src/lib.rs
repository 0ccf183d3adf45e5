//! Trial Flux - Batch pipeline for behavioral-experiment trial logs
//!
//! Flux turns a directory of per-participant trial logs into analysis-ready
//! tables through a deterministic pipeline: loading → cleaning → corpus
//! assembly → outlier removal → aggregation.
//!
//! ## Modules
//!
//! - **Loading**: typed reading of participant logs and the demographics table
//! - **Cleaning**: incomplete-row removal, derived visibility and consistency
//! - **Assembly**: corpus concatenation, error outcomes, demographics join
//! - **Aggregation**: participant-level means and condition summaries

pub mod aggregate;
pub mod assembler;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod export;
pub mod loader;
pub mod outlier;
pub mod pipeline;
pub mod types;

pub use aggregate::{Aggregator, ErrorRatePipeline, GroupKeys, ValueField};
pub use assembler::{AssembledCorpus, CorpusAssembler, FileFailure};
pub use cleaner::TrialRecordCleaner;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use loader::RawTrialLoader;
pub use outlier::OutlierFilter;
pub use pipeline::{process_directory, ExperimentPipeline, PipelineOutput};

/// Flux version embedded in every run report
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run reports
pub const PRODUCER_NAME: &str = "trial-flux";
