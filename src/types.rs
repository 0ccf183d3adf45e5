//! Core types for the Trial Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw trial records, cleaned trial records, corpus rows, the
//! analysis and full tables, and aggregated output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the target person could see the food item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Visible,
    NotVisible,
}

impl Visibility {
    /// Visible iff the facing direction matches the side the item is shown on
    pub fn from_orientation(facing_direction: &str, show_side: &str) -> Self {
        if facing_direction == show_side {
            Visibility::Visible
        } else {
            Visibility::NotVisible
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Visible => "Visible",
            Visibility::NotVisible => "NotVisible",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistency condition after remapping the raw single-letter code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Consistency {
    Consistent,
    Inconsistent,
    Unknown,
    Dislike,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Consistent => "Consistent",
            Consistency::Inconsistent => "Inconsistent",
            Consistency::Unknown => "Unknown",
            Consistency::Dislike => "Dislike",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a trial according to the error truth table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorStatus {
    Correct,
    Error,
}

impl ErrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Correct => "Correct",
            ErrorStatus::Error => "Error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ErrorStatus::Error)
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a participant trial log, typed but otherwise verbatim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrialRecord {
    /// Line in the source file (1-based, header is line 1)
    pub line: u64,
    pub participant: Option<String>,
    pub block_index: Option<u32>,
    pub trial_index: Option<u32>,
    pub facing_direction: Option<String>,
    pub show_side: Option<String>,
    pub target_person: Option<String>,
    pub food_item: Option<String>,
    pub consistency_raw: Option<String>,
    pub response_key: Option<String>,
    /// Response time in seconds
    pub response_time: Option<f64>,
}

/// All raw rows read from one participant file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTrialTable {
    /// Path or label of the file the rows came from
    pub source: String,
    pub rows: Vec<RawTrialRecord>,
}

/// A cleaned trial with its derived variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub participant: String,
    pub block_index: u32,
    pub trial_index: u32,
    /// Dense 1-based position after incomplete rows were dropped
    pub trial_sequence_number: u32,
    pub facing_direction: String,
    pub show_side: String,
    pub target_person: String,
    pub food_item: String,
    pub consistency_raw: String,
    pub response_key: String,
    /// Response time in seconds
    pub response_time: f64,
    pub visibility: Visibility,
    /// Effects-coded visibility (from the configured contrast coding)
    pub visibility_effects: f64,
    pub consistency: Consistency,
}

/// Row counts for one pass of the cleaner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub input_rows: usize,
    /// Rows missing at least one required value
    pub incomplete_dropped: usize,
    /// Rows removed by the warm-up rule
    pub warmup_dropped: usize,
    pub output_rows: usize,
}

/// Output of the cleaner for one participant file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedTable {
    pub source: String,
    pub rows: Vec<TrialRecord>,
    pub report: CleaningReport,
}

/// A cleaned trial placed in the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub trial: TrialRecord,
    pub is_error: ErrorStatus,
    /// File the trial was read from
    pub source_file: String,
    /// Position of that file in the processed file list
    pub source_index: usize,
}

/// Optional demographic answers for one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicRecord {
    pub participant: String,
    /// Values aligned with [`DemographicsTable::columns`]
    pub values: Vec<Option<String>>,
}

/// Demographics side-table keyed by participant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemographicsTable {
    /// Demographic column names, excluding the participant key
    pub columns: Vec<String>,
    pub records: Vec<DemographicRecord>,
}

impl DemographicsTable {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Corpus row joined with the participant's demographics (if any)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullRecord {
    pub corpus: CorpusRecord,
    pub demographics: Option<DemographicRecord>,
}

/// Corpus row restricted to the columns used by modeling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub participant: String,
    pub block_index: u32,
    pub trial_sequence_number: u32,
    pub consistency: Consistency,
    pub visibility: Visibility,
    pub visibility_effects: f64,
    pub is_error: ErrorStatus,
    pub response_time: f64,
}

impl From<&CorpusRecord> for AnalysisRecord {
    fn from(record: &CorpusRecord) -> Self {
        let trial = &record.trial;
        Self {
            participant: trial.participant.clone(),
            block_index: trial.block_index,
            trial_sequence_number: trial.trial_sequence_number,
            consistency: trial.consistency,
            visibility: trial.visibility,
            visibility_effects: trial.visibility_effects,
            is_error: record.is_error,
            response_time: trial.response_time,
        }
    }
}

/// Participant-level mean for one condition cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub participant: String,
    pub consistency: Consistency,
    pub visibility: Visibility,
    /// Present only for block-level aggregation
    pub block_index: Option<u32>,
    pub value: f64,
    /// Trials contributing to the mean
    pub n_trials: usize,
}

/// Condition-level statistics over participant means
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSummary {
    pub consistency: Consistency,
    pub visibility: Visibility,
    pub block_index: Option<u32>,
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two participants
    pub sd: Option<f64>,
    /// Standard error of the mean (sd / sqrt(n))
    pub se: Option<f64>,
    pub n_participants: usize,
}
