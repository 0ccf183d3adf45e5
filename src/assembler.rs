//! Corpus assembly
//!
//! Discovers participant files, skips excluded ones, cleans each remaining
//! file, concatenates the results, derives the error outcome on the combined
//! corpus and left-joins the demographics side-table.
//!
//! A failing file never stops the batch: its error is recorded as a
//! [`FileFailure`] and the remaining files still contribute.

use crate::cleaner::TrialRecordCleaner;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::export::{RUN_REPORT_FILE, RUN_TABLES};
use crate::loader::RawTrialLoader;
use crate::types::{
    AnalysisRecord, CleaningReport, CorpusRecord, DemographicRecord, DemographicsTable,
    FullRecord, TrialRecord,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A participant file that could not be loaded or cleaned
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: PipelineError,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.path.display(), self.error.rule(), self.error)
    }
}

/// Cleaning counts for one contributing file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: String,
    pub cleaning: CleaningReport,
}

/// Row and file counts collected during assembly
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub files_seen: usize,
    pub files_excluded: Vec<String>,
    pub files_failed: Vec<String>,
    pub files: Vec<FileReport>,
    pub rows_concatenated: usize,
    /// Rows whose (response_key, food_item) pair is not in the truth table
    pub undefined_error_dropped: usize,
    pub rows_assembled: usize,
    pub participants: usize,
    pub participants_without_demographics: Vec<String>,
}

/// Result of assembling the corpus
#[derive(Debug)]
pub struct AssembledCorpus {
    /// Modeling columns only
    pub analysis: Vec<AnalysisRecord>,
    /// Corpus joined with demographics
    pub full: Vec<FullRecord>,
    pub demographic_columns: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub report: AssemblyReport,
}

impl AssembledCorpus {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Assembler for the participant corpus
pub struct CorpusAssembler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> CorpusAssembler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// List participant files under `dir`, sorted by path.
    ///
    /// Only files with the configured extension are returned; `skip` (the
    /// demographics file, typically) is left out, and so are the tables of an
    /// earlier run written into a directory below `dir`.
    pub fn discover(
        &self,
        dir: &Path,
        skip: Option<&Path>,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let skip = skip.map(canonical);
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| PipelineError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.file_extension));
            if !matches_extension {
                continue;
            }
            if skip.as_deref().is_some_and(|s| canonical(path) == s) {
                continue;
            }
            if is_run_output(path) {
                debug!(file = %path.display(), "skipping table from an earlier run");
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        debug!(dir = %dir.display(), files = files.len(), "discovered participant files");
        Ok(files)
    }

    /// Assemble the corpus from `files`
    pub fn assemble(
        &self,
        files: &[PathBuf],
        excluded_patterns: &[String],
        demographics: &DemographicsTable,
    ) -> Result<AssembledCorpus, PipelineError> {
        let lookup = self.config.error_table.compile()?;
        let loader = RawTrialLoader::new(self.config);
        let cleaner = TrialRecordCleaner::new(self.config);

        let mut report = AssemblyReport {
            files_seen: files.len(),
            ..Default::default()
        };
        let mut failures = Vec::new();

        // Stage 1: per-file load and clean
        let mut concatenated: Vec<(TrialRecord, String, usize)> = Vec::new();
        for path in files {
            let file = path.display().to_string();
            if let Some(pattern) = excluded_by(path, excluded_patterns) {
                info!(file = %file, pattern = %pattern, "participant file excluded");
                report.files_excluded.push(file);
                continue;
            }

            let cleaned = match loader.load(path).and_then(|raw| cleaner.clean(raw)) {
                Ok(cleaned) => cleaned,
                Err(error) => {
                    warn!(
                        file = %file,
                        rule = error.rule(),
                        error = %error,
                        "participant file failed"
                    );
                    report.files_failed.push(file);
                    failures.push(FileFailure {
                        path: path.clone(),
                        error,
                    });
                    continue;
                }
            };

            let source_index = report.files.len();
            report.files.push(FileReport {
                path: file.clone(),
                cleaning: cleaned.report.clone(),
            });
            concatenated.extend(
                cleaned
                    .rows
                    .into_iter()
                    .map(|trial| (trial, file.clone(), source_index)),
            );
        }
        report.rows_concatenated = concatenated.len();

        // Stage 2: error outcome on the combined corpus
        let corpus: Vec<CorpusRecord> = concatenated
            .into_iter()
            .filter_map(|(trial, source_file, source_index)| {
                let is_error = lookup.outcome(&trial.response_key, &trial.food_item)?;
                Some(CorpusRecord {
                    trial,
                    is_error,
                    source_file,
                    source_index,
                })
            })
            .collect();
        report.undefined_error_dropped = report.rows_concatenated - corpus.len();
        report.rows_assembled = corpus.len();

        // Stage 3: left join with demographics
        let (full, without_demographics) = left_join(corpus, demographics);
        let analysis: Vec<AnalysisRecord> = full
            .iter()
            .map(|r| AnalysisRecord::from(&r.corpus))
            .collect();

        report.participants = analysis
            .iter()
            .map(|r| r.participant.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        report.participants_without_demographics = without_demographics;

        info!(
            files = report.files.len(),
            excluded = report.files_excluded.len(),
            failed = failures.len(),
            rows = report.rows_assembled,
            undefined_error = report.undefined_error_dropped,
            participants = report.participants,
            "corpus assembled"
        );

        Ok(AssembledCorpus {
            analysis,
            full,
            demographic_columns: demographics.columns.clone(),
            failures,
            report,
        })
    }
}

/// Left-outer join on participant; returns joined rows and the sorted list of
/// participants that had no demographics row
fn left_join(
    corpus: Vec<CorpusRecord>,
    demographics: &DemographicsTable,
) -> (Vec<FullRecord>, Vec<String>) {
    let by_participant: HashMap<&str, &DemographicRecord> = demographics
        .records
        .iter()
        .map(|r| (r.participant.as_str(), r))
        .collect();

    let mut missing = BTreeSet::new();
    let full = corpus
        .into_iter()
        .map(|record| {
            let demographics = by_participant
                .get(record.trial.participant.as_str())
                .map(|r| (*r).clone());
            if demographics.is_none() {
                missing.insert(record.trial.participant.clone());
            }
            FullRecord {
                corpus: record,
                demographics,
            }
        })
        .collect();

    (full, missing.into_iter().collect())
}

/// First exclusion pattern contained in `path`, if any.
///
/// Matching is a case-sensitive substring test on the full path, so a pattern
/// such as `P13_` catches every file of a participant recorded with an
/// incompatible log layout.
pub fn excluded_by<'p>(path: &Path, patterns: &'p [String]) -> Option<&'p str> {
    let path = path.to_string_lossy();
    patterns
        .iter()
        .map(String::as_str)
        .find(|pattern| path.contains(pattern))
}

/// A table written by the exporter, recognized by its name and the run
/// report beside it
fn is_run_output(path: &Path) -> bool {
    let is_table = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| RUN_TABLES.contains(&stem));
    is_table
        && path
            .parent()
            .is_some_and(|parent| parent.join(RUN_REPORT_FILE).is_file())
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
