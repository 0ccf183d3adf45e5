//! Aggregation
//!
//! Aggregation is always two-stage: trials are first averaged within each
//! participant and condition cell, then condition statistics are computed
//! over those participant means. Averaging raw trials by condition would
//! weight participants by their trial counts.

use crate::error::PipelineError;
use crate::types::{
    AggregatedRow, AnalysisRecord, ConditionSummary, Consistency, ErrorStatus, Visibility,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grouping granularity for participant-level aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKeys {
    /// participant × consistency × visibility
    ParticipantCondition,
    /// participant × consistency × visibility × block
    ParticipantConditionBlock,
}

/// Value averaged within each group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueField {
    /// Response time in seconds
    ResponseTime,
    /// 100 for an error trial, 0 for a correct one; the cell mean is the
    /// error percentage
    ErrorRate,
}

impl ValueField {
    fn value(&self, record: &AnalysisRecord) -> f64 {
        match self {
            ValueField::ResponseTime => record.response_time,
            ValueField::ErrorRate => {
                if record.is_error.is_error() {
                    100.0
                } else {
                    0.0
                }
            }
        }
    }
}

type CellKey = (String, Consistency, Visibility, Option<u32>);
type ConditionKey = (Consistency, Visibility, Option<u32>);

#[derive(Default)]
struct Accumulator {
    sum: f64,
    n: usize,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        if value.is_finite() {
            self.sum += value;
            self.n += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// Aggregator over the analysis table
pub struct Aggregator;

impl Aggregator {
    /// Participant-level means of `value_field` grouped by `group_keys`.
    ///
    /// With `exclude_errors` only correct trials are averaged. Groups left
    /// without a finite value are omitted. Rows come out in key order.
    pub fn aggregate(
        table: &[AnalysisRecord],
        group_keys: GroupKeys,
        value_field: ValueField,
        exclude_errors: bool,
    ) -> Result<Vec<AggregatedRow>, PipelineError> {
        if exclude_errors && value_field == ValueField::ErrorRate {
            return Err(PipelineError::InvalidAggregation(
                "error rate cannot be computed with error trials excluded".to_string(),
            ));
        }

        let mut cells: BTreeMap<CellKey, Accumulator> = BTreeMap::new();
        for record in table {
            if exclude_errors && record.is_error != ErrorStatus::Correct {
                continue;
            }
            cells
                .entry(cell_key(record, group_keys))
                .or_default()
                .push(value_field.value(record));
        }

        Ok(cells
            .into_iter()
            .filter_map(|((participant, consistency, visibility, block_index), acc)| {
                Some(AggregatedRow {
                    participant,
                    consistency,
                    visibility,
                    block_index,
                    value: acc.mean()?,
                    n_trials: acc.n,
                })
            })
            .collect())
    }

    /// Condition statistics over participant-level rows
    pub fn summarize(rows: &[AggregatedRow]) -> Vec<ConditionSummary> {
        let mut conditions: BTreeMap<ConditionKey, Vec<f64>> = BTreeMap::new();
        for row in rows {
            conditions
                .entry((row.consistency, row.visibility, row.block_index))
                .or_default()
                .push(row.value);
        }

        conditions
            .into_iter()
            .map(|((consistency, visibility, block_index), values)| {
                let n = values.len();
                let mean = values.iter().sum::<f64>() / n as f64;
                let sd = sample_sd(&values, mean);
                ConditionSummary {
                    consistency,
                    visibility,
                    block_index,
                    mean,
                    sd,
                    se: sd.map(|sd| sd / (n as f64).sqrt()),
                    n_participants: n,
                }
            })
            .collect()
    }
}

fn cell_key(record: &AnalysisRecord, group_keys: GroupKeys) -> CellKey {
    let block = match group_keys {
        GroupKeys::ParticipantCondition => None,
        GroupKeys::ParticipantConditionBlock => Some(record.block_index),
    };
    (
        record.participant.clone(),
        record.consistency,
        record.visibility,
        block,
    )
}

/// Standard deviation with n - 1 denominator
fn sample_sd(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let squares = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    let variance = squares / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Attempted and error trial counts of one participant cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptedCell {
    pub participant: String,
    pub consistency: Consistency,
    pub visibility: Visibility,
    pub block_index: Option<u32>,
    /// Correct and error trials alike
    pub attempted: usize,
    pub errors: usize,
}

/// Per-cell error rates and their condition summaries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRateReport {
    pub cell_rates: Vec<AggregatedRow>,
    pub summaries: Vec<ConditionSummary>,
}

/// Error rate computation as named stages:
/// attempted trials → per-cell rates → condition summaries
pub struct ErrorRatePipeline {
    group_keys: GroupKeys,
}

impl ErrorRatePipeline {
    pub fn new(group_keys: GroupKeys) -> Self {
        Self { group_keys }
    }

    /// Stage 1: count attempted and error trials per participant cell.
    ///
    /// Every row of the analysis table is an attempt with a defined outcome,
    /// so correct trials enter the denominator alongside the errors.
    pub fn attempted(&self, table: &[AnalysisRecord]) -> Vec<AttemptedCell> {
        let mut cells: BTreeMap<CellKey, (usize, usize)> = BTreeMap::new();
        for record in table {
            let (attempted, errors) = cells
                .entry(cell_key(record, self.group_keys))
                .or_default();
            *attempted += 1;
            if record.is_error.is_error() {
                *errors += 1;
            }
        }

        cells
            .into_iter()
            .map(
                |((participant, consistency, visibility, block_index), (attempted, errors))| {
                    AttemptedCell {
                        participant,
                        consistency,
                        visibility,
                        block_index,
                        attempted,
                        errors,
                    }
                },
            )
            .collect()
    }

    /// Stage 2: 100 × errors / attempted, per participant cell
    pub fn cell_rates(&self, attempted: &[AttemptedCell]) -> Vec<AggregatedRow> {
        attempted
            .iter()
            .filter(|cell| cell.attempted > 0)
            .map(|cell| AggregatedRow {
                participant: cell.participant.clone(),
                consistency: cell.consistency,
                visibility: cell.visibility,
                block_index: cell.block_index,
                value: 100.0 * cell.errors as f64 / cell.attempted as f64,
                n_trials: cell.attempted,
            })
            .collect()
    }

    /// Stage 3: condition statistics over participant rates
    pub fn summaries(&self, cell_rates: &[AggregatedRow]) -> Vec<ConditionSummary> {
        Aggregator::summarize(cell_rates)
    }

    pub fn run(&self, table: &[AnalysisRecord]) -> ErrorRateReport {
        let attempted = self.attempted(table);
        let cell_rates = self.cell_rates(&attempted);
        let summaries = self.summaries(&cell_rates);
        ErrorRateReport {
            cell_rates,
            summaries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(
        participant: &str,
        block: u32,
        consistency: Consistency,
        visibility: Visibility,
        is_error: ErrorStatus,
        rt: f64,
    ) -> AnalysisRecord {
        AnalysisRecord {
            participant: participant.to_string(),
            block_index: block,
            trial_sequence_number: 1,
            consistency,
            visibility,
            visibility_effects: if visibility == Visibility::Visible { -0.5 } else { 0.5 },
            is_error,
            response_time: rt,
        }
    }

    fn correct(participant: &str, rt: f64) -> AnalysisRecord {
        record(
            participant,
            1,
            Consistency::Consistent,
            Visibility::Visible,
            ErrorStatus::Correct,
            rt,
        )
    }

    #[test]
    fn test_participant_is_unit_of_analysis() {
        let mut table: Vec<AnalysisRecord> = (0..10).map(|_| correct("A", 0.5)).collect();
        table.push(correct("B", 1.4));
        table.push(correct("B", 1.6));

        let rows = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantCondition,
            ValueField::ResponseTime,
            true,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].n_trials, 10);
        assert!((rows[1].value - 1.5).abs() < 1e-12);

        let summary = Aggregator::summarize(&rows);
        assert_eq!(summary.len(), 1);
        assert!((summary[0].mean - 1.0).abs() < 1e-12);
        assert_eq!(summary[0].n_participants, 2);

        // sd of {0.5, 1.5} is sqrt(0.5); se = sd / sqrt(2) = 0.5
        assert!((summary[0].sd.unwrap() - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((summary[0].se.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_exclude_errors() {
        let table = vec![
            correct("A", 0.5),
            record("A", 1, Consistency::Consistent, Visibility::Visible, ErrorStatus::Error, 2.5),
        ];

        let with = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantCondition,
            ValueField::ResponseTime,
            false,
        )
        .unwrap();
        let without = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantCondition,
            ValueField::ResponseTime,
            true,
        )
        .unwrap();

        assert!((with[0].value - 1.5).abs() < 1e-12);
        assert!((without[0].value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_groups_omitted() {
        let table = vec![record(
            "A",
            1,
            Consistency::Dislike,
            Visibility::NotVisible,
            ErrorStatus::Error,
            0.9,
        )];

        let rows = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantCondition,
            ValueField::ResponseTime,
            true,
        )
        .unwrap();
        assert!(rows.is_empty());
        assert!(Aggregator::summarize(&rows).is_empty());
    }

    #[test]
    fn test_block_granularity() {
        let table = vec![
            record("A", 1, Consistency::Unknown, Visibility::Visible, ErrorStatus::Correct, 0.4),
            record("A", 2, Consistency::Unknown, Visibility::Visible, ErrorStatus::Correct, 0.8),
            record("A", 2, Consistency::Unknown, Visibility::Visible, ErrorStatus::Correct, 1.0),
        ];

        let rows = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantConditionBlock,
            ValueField::ResponseTime,
            true,
        )
        .unwrap();
        let cells: Vec<(Option<u32>, usize)> =
            rows.iter().map(|r| (r.block_index, r.n_trials)).collect();
        assert_eq!(cells, vec![(Some(1), 1), (Some(2), 2)]);
        assert!((rows[1].value - 0.9).abs() < 1e-12);

        let summary = Aggregator::summarize(&rows);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].sd, None);
        assert_eq!(summary[0].se, None);
    }

    #[test]
    fn test_error_rate_denominator_is_participant_cell() {
        let inconsistent = |participant: &str, is_error| {
            record(participant, 1, Consistency::Inconsistent, Visibility::NotVisible, is_error, 0.6)
        };
        let mut table = vec![
            inconsistent("A", ErrorStatus::Error),
            inconsistent("A", ErrorStatus::Correct),
            inconsistent("A", ErrorStatus::Correct),
            inconsistent("A", ErrorStatus::Correct),
        ];
        // Other participants and cells must not enter A's denominator
        table.extend((0..6).map(|_| inconsistent("B", ErrorStatus::Correct)));
        table.push(correct("A", 0.6));

        let report = ErrorRatePipeline::new(GroupKeys::ParticipantCondition).run(&table);
        let a_cell = report
            .cell_rates
            .iter()
            .find(|r| r.participant == "A" && r.consistency == Consistency::Inconsistent)
            .unwrap();
        assert!((a_cell.value - 25.0).abs() < 1e-12);
        assert_eq!(a_cell.n_trials, 4);

        let summary = report
            .summaries
            .iter()
            .find(|s| s.consistency == Consistency::Inconsistent)
            .unwrap();
        assert!((summary.mean - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_error_rate_with_exclusion_rejected() {
        let result = Aggregator::aggregate(
            &[],
            GroupKeys::ParticipantCondition,
            ValueField::ErrorRate,
            true,
        );
        assert!(matches!(result, Err(PipelineError::InvalidAggregation(_))));
    }

    #[test]
    fn test_deterministic_ordering() {
        let table = vec![
            record("B", 1, Consistency::Dislike, Visibility::Visible, ErrorStatus::Correct, 0.5),
            record("A", 1, Consistency::Unknown, Visibility::NotVisible, ErrorStatus::Correct, 0.5),
            record(
                "A",
                1,
                Consistency::Consistent,
                Visibility::NotVisible,
                ErrorStatus::Correct,
                0.5,
            ),
        ];

        let rows = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantCondition,
            ValueField::ResponseTime,
            false,
        )
        .unwrap();
        let keys: Vec<(&str, Consistency)> = rows
            .iter()
            .map(|r| (r.participant.as_str(), r.consistency))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("A", Consistency::Consistent),
                ("A", Consistency::Unknown),
                ("B", Consistency::Dislike)
            ]
        );
    }

    #[test]
    fn test_attempted_stage_counts_every_outcome() {
        let table = vec![
            record("A", 1, Consistency::Dislike, Visibility::Visible, ErrorStatus::Error, 0.4),
            record("A", 2, Consistency::Dislike, Visibility::Visible, ErrorStatus::Correct, 0.4),
            record("A", 2, Consistency::Dislike, Visibility::Visible, ErrorStatus::Error, 0.4),
            record("B", 1, Consistency::Dislike, Visibility::Visible, ErrorStatus::Correct, 0.4),
        ];

        let stages = ErrorRatePipeline::new(GroupKeys::ParticipantCondition);
        let attempted = stages.attempted(&table);
        let counts: Vec<(&str, usize, usize)> = attempted
            .iter()
            .map(|c| (c.participant.as_str(), c.attempted, c.errors))
            .collect();
        assert_eq!(counts, vec![("A", 3, 2), ("B", 1, 0)]);

        // Same cells as the single-pass mean of the error indicator
        let direct = Aggregator::aggregate(
            &table,
            GroupKeys::ParticipantCondition,
            ValueField::ErrorRate,
            false,
        )
        .unwrap();
        let staged = stages.cell_rates(&attempted);
        assert_eq!(staged.len(), direct.len());
        for (staged, direct) in staged.iter().zip(&direct) {
            assert_eq!(staged.n_trials, direct.n_trials);
            assert!((staged.value - direct.value).abs() < 1e-9);
        }

        let by_block = ErrorRatePipeline::new(GroupKeys::ParticipantConditionBlock).run(&table);
        let blocks: Vec<(Option<u32>, f64)> = by_block
            .cell_rates
            .iter()
            .filter(|r| r.participant == "A")
            .map(|r| (r.block_index, r.value))
            .collect();
        assert_eq!(blocks, vec![(Some(1), 100.0), (Some(2), 50.0)]);
    }
}
