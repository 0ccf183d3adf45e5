//! Pipeline orchestration
//!
//! This module provides the public API for Trial Flux.
//! It runs the full pipeline from a directory of participant logs to the
//! analysis table, the demographics-joined table and the aggregated tables.

use crate::aggregate::{Aggregator, ErrorRatePipeline, ErrorRateReport, GroupKeys, ValueField};
use crate::assembler::{AssemblyReport, CorpusAssembler, FileFailure};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::loader::RawTrialLoader;
use crate::outlier::{OutlierFilter, OutlierReport};
use crate::types::{AggregatedRow, AnalysisRecord, ConditionSummary, DemographicsTable, FullRecord};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Run the pipeline over a directory with the given configuration.
///
/// # Arguments
/// * `data_dir` - Directory holding one delimited file per participant
/// * `demographics` - Optional demographics file (skipped during discovery)
/// * `config` - Pipeline configuration
///
/// # Example
/// ```ignore
/// let output = process_directory(
///     Path::new("data/raw"),
///     Some(Path::new("data/raw/demographics.csv")),
///     PipelineConfig::default(),
/// )?;
/// ```
pub fn process_directory(
    data_dir: &Path,
    demographics: Option<&Path>,
    config: PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    ExperimentPipeline::new(config)?.run_directory(data_dir, demographics)
}

/// Aggregated tables produced from the filtered analysis table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregates {
    /// Mean correct-trial response time per participant × condition
    pub rt_by_condition: Vec<AggregatedRow>,
    /// Mean correct-trial response time per participant × condition × block
    pub rt_by_block: Vec<AggregatedRow>,
    pub rt_condition_summary: Vec<ConditionSummary>,
    pub rt_block_summary: Vec<ConditionSummary>,
    pub errors_by_condition: ErrorRateReport,
    pub errors_by_block: ErrorRateReport,
}

impl Aggregates {
    /// Compute every aggregation granularity
    pub fn compute(analysis: &[AnalysisRecord]) -> Result<Self, PipelineError> {
        let rt_by_condition = Aggregator::aggregate(
            analysis,
            GroupKeys::ParticipantCondition,
            ValueField::ResponseTime,
            true,
        )?;
        let rt_by_block = Aggregator::aggregate(
            analysis,
            GroupKeys::ParticipantConditionBlock,
            ValueField::ResponseTime,
            true,
        )?;

        Ok(Self {
            rt_condition_summary: Aggregator::summarize(&rt_by_condition),
            rt_block_summary: Aggregator::summarize(&rt_by_block),
            rt_by_condition,
            rt_by_block,
            errors_by_condition: ErrorRatePipeline::new(GroupKeys::ParticipantCondition)
                .run(analysis),
            errors_by_block: ErrorRatePipeline::new(GroupKeys::ParticipantConditionBlock)
                .run(analysis),
        })
    }
}

/// Failure entry of the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub path: String,
    pub rule: String,
    pub message: String,
}

impl From<&FileFailure> for FailureReport {
    fn from(failure: &FileFailure) -> Self {
        Self {
            path: failure.path.display().to_string(),
            rule: failure.error.rule().to_string(),
            message: failure.error.to_string(),
        }
    }
}

/// Audit trail of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub producer: String,
    pub version: String,
    pub generated_at_utc: String,
    pub assembly: AssemblyReport,
    pub outlier: OutlierReport,
    pub failures: Vec<FailureReport>,
}

/// Everything a run produces
#[derive(Debug)]
pub struct PipelineOutput {
    /// Analysis table after outlier removal
    pub analysis: Vec<AnalysisRecord>,
    /// Demographics-joined table after outlier removal
    pub full: Vec<FullRecord>,
    pub demographic_columns: Vec<String>,
    pub aggregates: Aggregates,
    pub failures: Vec<FileFailure>,
    pub report: RunReport,
}

impl PipelineOutput {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Batch pipeline bound to one immutable configuration
pub struct ExperimentPipeline {
    config: PipelineConfig,
}

impl ExperimentPipeline {
    /// Create a pipeline; the configuration is validated up front
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Discover participant files under `data_dir` and run the pipeline
    pub fn run_directory(
        &self,
        data_dir: &Path,
        demographics: Option<&Path>,
    ) -> Result<PipelineOutput, PipelineError> {
        let assembler = CorpusAssembler::new(&self.config);
        let files = assembler.discover(data_dir, demographics)?;

        let demographics = match demographics {
            Some(path) => RawTrialLoader::new(&self.config).load_demographics(path)?,
            None => DemographicsTable::default(),
        };

        self.run_files(&files, &demographics)
    }

    /// Run the pipeline over an explicit file list
    ///
    /// Pipeline stages:
    /// 1. RawTrialLoader + TrialRecordCleaner per file (inside the assembler)
    /// 2. CorpusAssembler - concatenate, derive errors, join demographics
    /// 3. OutlierFilter - drop slow trials
    /// 4. Aggregator - participant and condition tables
    pub fn run_files(
        &self,
        files: &[PathBuf],
        demographics: &DemographicsTable,
    ) -> Result<PipelineOutput, PipelineError> {
        let corpus = CorpusAssembler::new(&self.config).assemble(
            files,
            &self.config.excluded_patterns,
            demographics,
        )?;

        let filter = OutlierFilter::new(self.config.outlier_ceiling_secs)?;
        let analysis = filter.filter(corpus.analysis);
        let full = filter.filter(corpus.full);
        let outlier = analysis.report(filter.ceiling_secs());
        info!(
            ceiling = outlier.ceiling_secs,
            excluded = outlier.excluded_rows,
            fraction = outlier.excluded_fraction,
            "outliers removed"
        );

        let aggregates = Aggregates::compute(&analysis.kept)?;

        let report = RunReport {
            run_id: Uuid::new_v4().to_string(),
            producer: PRODUCER_NAME.to_string(),
            version: FLUX_VERSION.to_string(),
            generated_at_utc: Utc::now().to_rfc3339(),
            assembly: corpus.report,
            outlier,
            failures: corpus.failures.iter().map(FailureReport::from).collect(),
        };

        Ok(PipelineOutput {
            analysis: analysis.kept,
            full: full.kept,
            demographic_columns: corpus.demographic_columns,
            aggregates,
            failures: corpus.failures,
            report,
        })
    }
}
