//! Trial record cleaning
//!
//! Turns one participant's raw table into cleaned trial records. The steps run
//! in a fixed order, each on the output of the previous one:
//! 1. drop rows missing any required value
//! 2. renumber the survivors 1..N
//! 3. normalize categorical codes
//! 4. derive visibility and its effects coding
//! 5. remap the consistency code
//! 6. drop the warm-up trial

use crate::config::{normalize_code, PipelineConfig};
use crate::error::PipelineError;
use crate::types::{
    CleanedTable, CleaningReport, RawTrialRecord, RawTrialTable, TrialRecord, Visibility,
};
use tracing::debug;

/// Cleaner for a single participant table
pub struct TrialRecordCleaner<'a> {
    config: &'a PipelineConfig,
}

/// A raw row with every required value present
struct CompleteRow {
    line: u64,
    participant: String,
    block_index: u32,
    trial_index: u32,
    facing_direction: String,
    show_side: String,
    target_person: String,
    food_item: String,
    consistency_raw: String,
    response_key: String,
    response_time: f64,
}

impl CompleteRow {
    fn from_raw(row: RawTrialRecord) -> Option<Self> {
        Some(Self {
            line: row.line,
            participant: row.participant?,
            block_index: row.block_index?,
            trial_index: row.trial_index?,
            facing_direction: row.facing_direction?,
            show_side: row.show_side?,
            target_person: row.target_person?,
            food_item: row.food_item?,
            consistency_raw: row.consistency_raw?,
            response_key: row.response_key?,
            response_time: row.response_time?,
        })
    }
}

impl<'a> TrialRecordCleaner<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Clean one participant table
    pub fn clean(&self, raw: RawTrialTable) -> Result<CleanedTable, PipelineError> {
        let source = raw.source;
        let input_rows = raw.rows.len();

        // Step 1: drop incomplete rows
        let complete: Vec<CompleteRow> = raw
            .rows
            .into_iter()
            .filter_map(CompleteRow::from_raw)
            .collect();
        let incomplete_dropped = input_rows - complete.len();

        let mut rows = Vec::with_capacity(complete.len());
        let mut warmup_dropped = 0;

        for (position, mut row) in complete.into_iter().enumerate() {
            // Step 2: dense 1-based sequence over the complete rows
            let trial_sequence_number = position as u32 + 1;

            // Step 3: normalize categorical codes
            row.consistency_raw = normalize_code(&row.consistency_raw);
            row.response_key = normalize_code(&row.response_key);
            row.food_item = normalize_code(&row.food_item);

            // Step 4: visibility
            let visibility = Visibility::from_orientation(&row.facing_direction, &row.show_side);
            let visibility_effects = self.config.contrasts.visibility(visibility);

            // Step 5: consistency remap
            let consistency = *self
                .config
                .consistency_remap
                .get(&row.consistency_raw)
                .ok_or_else(|| PipelineError::UnknownCategory {
                    file: source.clone(),
                    line: row.line,
                    field: self.config.columns.consistency_raw.clone(),
                    value: row.consistency_raw.clone(),
                })?;

            // Step 6: warm-up exclusion
            if !self.config.warmup.keeps(row.block_index, row.trial_index) {
                warmup_dropped += 1;
                continue;
            }

            rows.push(TrialRecord {
                participant: row.participant,
                block_index: row.block_index,
                trial_index: row.trial_index,
                trial_sequence_number,
                facing_direction: row.facing_direction,
                show_side: row.show_side,
                target_person: row.target_person,
                food_item: row.food_item,
                consistency_raw: row.consistency_raw,
                response_key: row.response_key,
                response_time: row.response_time,
                visibility,
                visibility_effects,
                consistency,
            });
        }

        let report = CleaningReport {
            input_rows,
            incomplete_dropped,
            warmup_dropped,
            output_rows: rows.len(),
        };
        debug!(
            file = %source,
            input = report.input_rows,
            incomplete = report.incomplete_dropped,
            warmup = report.warmup_dropped,
            output = report.output_rows,
            "cleaned trial log"
        );

        Ok(CleanedTable {
            source,
            rows,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Consistency;
    use pretty_assertions::assert_eq;

    fn raw_row(block: u32, trial: u32, facing: &str, show: &str, code: &str) -> RawTrialRecord {
        RawTrialRecord {
            line: (block * 100 + trial + 2) as u64,
            participant: Some("p01".to_string()),
            block_index: Some(block),
            trial_index: Some(trial),
            facing_direction: Some(facing.to_string()),
            show_side: Some(show.to_string()),
            target_person: Some("anna".to_string()),
            food_item: Some("g".to_string()),
            consistency_raw: Some(code.to_string()),
            response_key: Some("up".to_string()),
            response_time: Some(0.8),
        }
    }

    fn table(rows: Vec<RawTrialRecord>) -> RawTrialTable {
        RawTrialTable {
            source: "p01.csv".to_string(),
            rows,
        }
    }

    fn clean(rows: Vec<RawTrialRecord>) -> Result<CleanedTable, PipelineError> {
        let config = PipelineConfig::default();
        TrialRecordCleaner::new(&config).clean(table(rows))
    }

    #[test]
    fn test_sequence_is_dense_after_drop() {
        let mut rows: Vec<RawTrialRecord> = (0..6).map(|t| raw_row(
            1,
            t,
            "left",
            "left",
            "c",
        )).collect();
        rows[1].response_time = None;
        rows[4].target_person = None;

        let cleaned = clean(rows).unwrap();
        let sequence: Vec<u32> = cleaned.rows.iter().map(|r| r.trial_sequence_number).collect();
        let trial_indices: Vec<u32> = cleaned.rows.iter().map(|r| r.trial_index).collect();

        assert_eq!(sequence, vec![1, 2, 3, 4]);
        assert_eq!(trial_indices, vec![0, 2, 3, 5]);
        assert_eq!(cleaned.report.incomplete_dropped, 2);
        assert_eq!(cleaned.report.output_rows, 4);
    }

    #[test]
    fn test_visibility_derivation() {
        let cleaned = clean(vec![
            raw_row(1, 0, "left", "left", "c"),
            raw_row(1, 1, "left", "right", "c"),
            raw_row(1, 2, "right", "right", "c"),
        ])
        .unwrap();

        let visibility: Vec<Visibility> = cleaned.rows.iter().map(|r| r.visibility).collect();
        assert_eq!(
            visibility,
            vec![Visibility::Visible, Visibility::NotVisible, Visibility::Visible]
        );
        assert_eq!(cleaned.rows[0].visibility_effects, -0.5);
        assert_eq!(cleaned.rows[1].visibility_effects, 0.5);
    }

    #[test]
    fn test_missing_orientation_drops_row() {
        let mut row = raw_row(1, 0, "left", "left", "c");
        row.show_side = None;
        let cleaned = clean(vec![row, raw_row(1, 1, "left", "left", "c")]).unwrap();

        assert_eq!(cleaned.rows.len(), 1);
        assert_eq!(cleaned.rows[0].trial_sequence_number, 1);
    }

    #[test]
    fn test_consistency_remap() {
        let cleaned = clean(vec![
            raw_row(1, 0, "left", "left", "c"),
            raw_row(1, 1, "left", "left", "i"),
            raw_row(1, 2, "left", "left", " U "),
            raw_row(1, 3, "left", "left", "Y"),
        ])
        .unwrap();

        let labels: Vec<Consistency> = cleaned.rows.iter().map(|r| r.consistency).collect();
        assert_eq!(
            labels,
            vec![
                Consistency::Consistent,
                Consistency::Inconsistent,
                Consistency::Unknown,
                Consistency::Dislike
            ]
        );
        assert_eq!(cleaned.rows[2].consistency_raw, "u");
    }

    #[test]
    fn test_unknown_consistency_code() {
        let result = clean(vec![
            raw_row(1, 0, "left", "left", "c"),
            raw_row(1, 1, "left", "left", "x"),
        ]);

        match result {
            Err(PipelineError::UnknownCategory { file, line, value, .. }) => {
                assert_eq!(file, "p01.csv");
                assert_eq!(line, 103);
                assert_eq!(value, "x");
            }
            other => panic!("expected unknown category, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_code_in_incomplete_row_is_ignored() {
        let mut bad = raw_row(1, 1, "left", "left", "x");
        bad.response_key = None;
        let cleaned = clean(vec![raw_row(1, 0, "left", "left", "c"), bad]).unwrap();
        assert_eq!(cleaned.rows.len(), 1);
    }

    #[test]
    fn test_warmup_boundary() {
        let cleaned = clean(vec![
            raw_row(0, 0, "left", "left", "c"),
            raw_row(0, 1, "left", "left", "c"),
            raw_row(1, 0, "left", "left", "c"),
            raw_row(1, 1, "left", "left", "c"),
        ])
        .unwrap();

        let kept: Vec<(u32, u32)> = cleaned
            .rows
            .iter()
            .map(|r| (r.block_index, r.trial_index))
            .collect();
        assert_eq!(kept, vec![(0, 1), (1, 0), (1, 1)]);
        assert_eq!(cleaned.report.warmup_dropped, 1);

        // Sequence numbers were assigned before the warm-up drop
        let sequence: Vec<u32> = cleaned.rows.iter().map(|r| r.trial_sequence_number).collect();
        assert_eq!(sequence, vec![2, 3, 4]);
    }

    #[test]
    fn test_categorical_normalization() {
        let mut row = raw_row(1, 0, "left", "left", "c");
        row.response_key = Some(" UP".to_string());
        row.food_item = Some("G ".to_string());
        let cleaned = clean(vec![row]).unwrap();

        assert_eq!(cleaned.rows[0].response_key, "up");
        assert_eq!(cleaned.rows[0].food_item, "g");
    }

    #[test]
    fn test_custom_contrasts() {
        let mut config = PipelineConfig::default();
        config.contrasts.visible = 1.0;
        config.contrasts.not_visible = -1.0;

        let cleaned = TrialRecordCleaner::new(&config)
            .clean(table(vec![raw_row(1, 0, "left", "left", "c")]))
            .unwrap();
        assert_eq!(cleaned.rows[0].visibility_effects, 1.0);
    }
}
