//! Response time outlier filtering

use crate::error::PipelineError;
use crate::types::{AnalysisRecord, FullRecord};
use serde::Serialize;

/// Rows carrying a response time in seconds
pub trait ResponseTimed {
    fn response_time(&self) -> f64;
}

impl ResponseTimed for AnalysisRecord {
    fn response_time(&self) -> f64 {
        self.response_time
    }
}

impl ResponseTimed for FullRecord {
    fn response_time(&self) -> f64 {
        self.corpus.trial.response_time
    }
}

/// Retained rows plus exclusion counts
#[derive(Debug, Clone)]
pub struct OutlierOutcome<T> {
    pub kept: Vec<T>,
    pub input_rows: usize,
    pub excluded_rows: usize,
    /// `1 - kept / input`; 0 for empty input
    pub excluded_fraction: f64,
}

/// Summary of an outlier pass for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierReport {
    pub ceiling_secs: f64,
    pub input_rows: usize,
    pub excluded_rows: usize,
    pub excluded_fraction: f64,
}

impl<T> OutlierOutcome<T> {
    pub fn report(&self, ceiling_secs: f64) -> OutlierReport {
        OutlierReport {
            ceiling_secs,
            input_rows: self.input_rows,
            excluded_rows: self.excluded_rows,
            excluded_fraction: self.excluded_fraction,
        }
    }
}

/// Drops trials whose response time reaches the ceiling
#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    ceiling_secs: f64,
}

impl OutlierFilter {
    pub fn new(ceiling_secs: f64) -> Result<Self, PipelineError> {
        if !ceiling_secs.is_finite() || ceiling_secs <= 0.0 {
            return Err(PipelineError::Config(format!(
                "outlier ceiling must be a positive number of seconds, got {}",
                ceiling_secs
            )));
        }
        Ok(Self { ceiling_secs })
    }

    pub fn ceiling_secs(&self) -> f64 {
        self.ceiling_secs
    }

    /// Keep rows with `response_time < ceiling`; rows are never modified
    pub fn filter<T: ResponseTimed>(&self, table: Vec<T>) -> OutlierOutcome<T> {
        let input_rows = table.len();
        let kept: Vec<T> = table
            .into_iter()
            .filter(|row| row.response_time() < self.ceiling_secs)
            .collect();

        let excluded_fraction = if input_rows == 0 {
            0.0
        } else {
            1.0 - kept.len() as f64 / input_rows as f64
        };

        OutlierOutcome {
            excluded_rows: input_rows - kept.len(),
            input_rows,
            kept,
            excluded_fraction,
        }
    }
}
