//! Table export
//!
//! Writes the pipeline tables as delimited text or JSON so a run can be
//! reproduced outside the process. The full table is flattened by hand
//! because its demographic columns are only known at run time.

use crate::error::PipelineError;
use crate::pipeline::PipelineOutput;
use crate::types::{AggregatedRow, AnalysisRecord, ConditionSummary, FullRecord};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Run report written next to the tables; marks a directory as run output
pub const RUN_REPORT_FILE: &str = "report.json";

/// Table names (file stems) written by [`TableExporter::write_output`]
pub const RUN_TABLES: [&str; 10] = [
    "analysis",
    "full",
    "rt_participant_condition",
    "rt_participant_block",
    "error_participant_condition",
    "error_participant_block",
    "rt_condition_summary",
    "rt_block_summary",
    "error_condition_summary",
    "error_block_summary",
];

/// A flat row type with a fixed column list.
///
/// The column list must match the serialized field order; it is what an
/// empty table is written with.
pub trait TableRow: Serialize {
    const COLUMNS: &'static [&'static str];
}

impl TableRow for AnalysisRecord {
    const COLUMNS: &'static [&'static str] = &[
        "participant",
        "block_index",
        "trial_sequence_number",
        "consistency",
        "visibility",
        "visibility_effects",
        "is_error",
        "response_time",
    ];
}

impl TableRow for AggregatedRow {
    const COLUMNS: &'static [&'static str] = &[
        "participant",
        "consistency",
        "visibility",
        "block_index",
        "value",
        "n_trials",
    ];
}

impl TableRow for ConditionSummary {
    const COLUMNS: &'static [&'static str] = &[
        "consistency",
        "visibility",
        "block_index",
        "mean",
        "sd",
        "se",
        "n_participants",
    ];
}

/// Fixed columns of the flattened full table, before the demographic columns
pub const FULL_TABLE_COLUMNS: [&str; 17] = [
    "participant",
    "block_index",
    "trial_index",
    "trial_sequence_number",
    "facing_direction",
    "show_side",
    "target_person",
    "food_item",
    "consistency_raw",
    "consistency",
    "response_key",
    "response_time",
    "visibility",
    "visibility_effects",
    "is_error",
    "source_file",
    "source_index",
];

/// On-disk table format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json | OutputFormat::JsonPretty => "json",
        }
    }
}

/// Writer for pipeline tables
pub struct TableExporter {
    format: OutputFormat,
    delimiter: u8,
}

impl TableExporter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Write flat rows; an empty CSV table still gets its header
    pub fn write_rows<W: Write, S: TableRow>(
        &self,
        writer: W,
        rows: &[S],
    ) -> Result<(), PipelineError> {
        match self.format {
            OutputFormat::Csv => {
                let mut out = csv::WriterBuilder::new()
                    .delimiter(self.delimiter)
                    .from_writer(writer);
                if rows.is_empty() {
                    out.write_record(S::COLUMNS)?;
                }
                for row in rows {
                    out.serialize(row)?;
                }
                out.flush().map_err(csv::Error::from)?;
            }
            OutputFormat::Json => serde_json::to_writer(writer, rows)?,
            OutputFormat::JsonPretty => serde_json::to_writer_pretty(writer, rows)?,
        }
        Ok(())
    }

    /// Write the demographics-joined table
    pub fn write_full<W: Write>(
        &self,
        writer: W,
        rows: &[FullRecord],
        demographic_columns: &[String],
    ) -> Result<(), PipelineError> {
        match self.format {
            OutputFormat::Csv => {
                let mut out = csv::WriterBuilder::new()
                    .delimiter(self.delimiter)
                    .from_writer(writer);

                let header: Vec<&str> = FULL_TABLE_COLUMNS
                    .iter()
                    .copied()
                    .chain(demographic_columns.iter().map(String::as_str))
                    .collect();
                out.write_record(&header)?;

                for row in rows {
                    out.write_record(flatten_full(row, demographic_columns.len()))?;
                }
                out.flush().map_err(csv::Error::from)?;
            }
            OutputFormat::Json => serde_json::to_writer(writer, rows)?,
            OutputFormat::JsonPretty => serde_json::to_writer_pretty(writer, rows)?,
        }
        Ok(())
    }

    /// Write every table of a run into `dir`; returns the written paths
    pub fn write_output(
        &self,
        dir: &Path,
        output: &PipelineOutput,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        fs::create_dir_all(dir).map_err(|source| PipelineError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let ext = self.format.extension();
        let path = |name: &str| dir.join(format!("{name}.{ext}"));
        let aggregates = &output.aggregates;
        let [
            analysis_name,
            full_name,
            rt_condition_cells,
            rt_block_cells,
            error_condition_cells,
            error_block_cells,
            rt_condition,
            rt_block,
            error_condition,
            error_block,
        ] = RUN_TABLES;
        let mut written = Vec::new();

        let analysis = path(analysis_name);
        self.write_rows(create(&analysis)?, &output.analysis)?;
        written.push(analysis);

        let full = path(full_name);
        self.write_full(create(&full)?, &output.full, &output.demographic_columns)?;
        written.push(full);

        let tables = [
            (rt_condition_cells, &aggregates.rt_by_condition),
            (rt_block_cells, &aggregates.rt_by_block),
            (error_condition_cells, &aggregates.errors_by_condition.cell_rates),
            (error_block_cells, &aggregates.errors_by_block.cell_rates),
        ];
        for (name, rows) in tables {
            let file = path(name);
            self.write_rows(create(&file)?, rows)?;
            written.push(file);
        }

        let summaries = [
            (rt_condition, &aggregates.rt_condition_summary),
            (rt_block, &aggregates.rt_block_summary),
            (error_condition, &aggregates.errors_by_condition.summaries),
            (error_block, &aggregates.errors_by_block.summaries),
        ];
        for (name, rows) in summaries {
            let file = path(name);
            self.write_rows(create(&file)?, rows)?;
            written.push(file);
        }

        let report = dir.join(RUN_REPORT_FILE);
        serde_json::to_writer_pretty(create(&report)?, &output.report)?;
        written.push(report);

        info!(dir = %dir.display(), files = written.len(), "tables written");
        Ok(written)
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, PipelineError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn flatten_full(row: &FullRecord, demographic_width: usize) -> Vec<String> {
    let trial = &row.corpus.trial;
    let mut fields = vec![
        trial.participant.clone(),
        trial.block_index.to_string(),
        trial.trial_index.to_string(),
        trial.trial_sequence_number.to_string(),
        trial.facing_direction.clone(),
        trial.show_side.clone(),
        trial.target_person.clone(),
        trial.food_item.clone(),
        trial.consistency_raw.clone(),
        trial.consistency.to_string(),
        trial.response_key.clone(),
        trial.response_time.to_string(),
        trial.visibility.to_string(),
        trial.visibility_effects.to_string(),
        row.corpus.is_error.to_string(),
        row.corpus.source_file.clone(),
        row.corpus.source_index.to_string(),
    ];

    match &row.demographics {
        Some(demographics) => fields.extend(
            demographics
                .values
                .iter()
                .map(|v| v.clone().unwrap_or_default()),
        ),
        None => fields.extend(std::iter::repeat(String::new()).take(demographic_width)),
    }
    fields
}
