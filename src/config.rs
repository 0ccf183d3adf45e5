//! Pipeline configuration
//!
//! Every domain constant of the pipeline lives in [`PipelineConfig`]: the
//! outlier ceiling, excluded-file patterns, the raw column map, the consistency
//! remap dictionary, the error truth table, the warm-up exclusion rule and the
//! contrast coding. The value is immutable once built and is passed by
//! reference into every stage.

use crate::error::PipelineError;
use crate::types::{Consistency, ErrorStatus, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Default response time ceiling in seconds
pub const DEFAULT_OUTLIER_CEILING_SECS: f64 = 3.0;

/// Raw header names for each required field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub participant: String,
    pub block_index: String,
    pub trial_index: String,
    pub facing_direction: String,
    pub show_side: String,
    pub target_person: String,
    pub food_item: String,
    pub consistency_raw: String,
    pub response_key: String,
    pub response_time: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            participant: "participant".to_string(),
            block_index: "block_index".to_string(),
            trial_index: "trial_index".to_string(),
            facing_direction: "facing_direction".to_string(),
            show_side: "show_side".to_string(),
            target_person: "target_person".to_string(),
            food_item: "food_item".to_string(),
            consistency_raw: "consistency".to_string(),
            response_key: "response_key".to_string(),
            response_time: "response_time".to_string(),
        }
    }
}

impl ColumnMap {
    /// The required-column list, in canonical field order
    pub fn required(&self) -> [&str; 10] {
        [
            self.participant.as_str(),
            self.block_index.as_str(),
            self.trial_index.as_str(),
            self.facing_direction.as_str(),
            self.show_side.as_str(),
            self.target_person.as_str(),
            self.food_item.as_str(),
            self.consistency_raw.as_str(),
            self.response_key.as_str(),
            self.response_time.as_str(),
        ]
    }
}

/// A named set of food codes treated alike by the error truth table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodGroup {
    pub name: String,
    pub items: Vec<String>,
}

/// One case of the error truth table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthEntry {
    pub response_key: String,
    pub food_group: String,
    pub outcome: ErrorStatus,
}

/// Finite mapping (response_key, food_group) -> Correct/Error.
///
/// Combinations absent from `entries` (unknown key, food item outside every
/// group) are undefined and the trial is dropped during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTruthTable {
    pub food_groups: Vec<FoodGroup>,
    pub entries: Vec<TruthEntry>,
}

impl Default for ErrorTruthTable {
    fn default() -> Self {
        let entry = |key: &str, group: &str, outcome| TruthEntry {
            response_key: key.to_string(),
            food_group: group.to_string(),
            outcome,
        };
        Self {
            food_groups: vec![
                FoodGroup {
                    name: "gd".to_string(),
                    items: vec!["g".to_string(), "d".to_string()],
                },
                FoodGroup {
                    name: "y".to_string(),
                    items: vec!["y".to_string()],
                },
            ],
            entries: vec![
                entry("up", "gd", ErrorStatus::Correct),
                entry("down", "gd", ErrorStatus::Error),
                entry("down", "y", ErrorStatus::Correct),
                entry("up", "y", ErrorStatus::Error),
            ],
        }
    }
}

impl ErrorTruthTable {
    /// Build the lookup used on the corpus, rejecting ambiguous tables
    pub fn compile(&self) -> Result<ErrorLookup, PipelineError> {
        let mut group_of: HashMap<String, String> = HashMap::new();
        for group in &self.food_groups {
            for item in &group.items {
                let item = normalize_code(item);
                if let Some(previous) = group_of.insert(item.clone(), group.name.clone()) {
                    return Err(PipelineError::Config(format!(
                        "food item {:?} belongs to both {:?} and {:?}",
                        item, previous, group.name
                    )));
                }
            }
        }

        let mut outcomes: HashMap<(String, String), ErrorStatus> = HashMap::new();
        for entry in &self.entries {
            if !self.food_groups.iter().any(|g| g.name == entry.food_group) {
                return Err(PipelineError::Config(format!(
                    "truth table references unknown food group {:?}",
                    entry.food_group
                )));
            }
            let key = (normalize_code(&entry.response_key), entry.food_group.clone());
            if outcomes.insert(key, entry.outcome).is_some() {
                return Err(PipelineError::Config(format!(
                    "duplicate truth table entry for ({:?}, {:?})",
                    entry.response_key, entry.food_group
                )));
            }
        }

        Ok(ErrorLookup { group_of, outcomes })
    }
}

/// Compiled form of [`ErrorTruthTable`]
#[derive(Debug, Clone)]
pub struct ErrorLookup {
    group_of: HashMap<String, String>,
    outcomes: HashMap<(String, String), ErrorStatus>,
}

impl ErrorLookup {
    /// Food group of a normalized food code
    pub fn food_group(&self, food_item: &str) -> Option<&str> {
        self.group_of.get(food_item).map(String::as_str)
    }

    /// Outcome for a normalized (response_key, food_item) pair, `None` when undefined
    pub fn outcome(&self, response_key: &str, food_item: &str) -> Option<ErrorStatus> {
        let group = self.food_group(food_item)?;
        self.outcomes
            .get(&(response_key.to_string(), group.to_string()))
            .copied()
    }
}

/// Which (block, trial) pair is treated as warm-up and dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupRule {
    pub block_index: u32,
    pub trial_index: u32,
}

impl Default for WarmupRule {
    fn default() -> Self {
        Self {
            block_index: 0,
            trial_index: 0,
        }
    }
}

impl WarmupRule {
    /// Rows are kept iff `block_index != rule.block_index || trial_index != rule.trial_index`
    pub fn keeps(&self, block_index: u32, trial_index: u32) -> bool {
        block_index != self.block_index || trial_index != self.trial_index
    }
}

/// Numeric coding of the visibility factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContrastCoding {
    pub visible: f64,
    pub not_visible: f64,
}

impl Default for ContrastCoding {
    fn default() -> Self {
        Self {
            visible: -0.5,
            not_visible: 0.5,
        }
    }
}

impl ContrastCoding {
    pub fn visibility(&self, visibility: Visibility) -> f64 {
        match visibility {
            Visibility::Visible => self.visible,
            Visibility::NotVisible => self.not_visible,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trials with `response_time >= ceiling` are outliers
    pub outlier_ceiling_secs: f64,
    /// Case-sensitive substrings; matching participant files are skipped
    pub excluded_patterns: Vec<String>,
    /// Field values treated as missing (compared after trimming)
    pub missing_markers: Vec<String>,
    /// Field delimiter of participant and demographics files
    pub delimiter: char,
    /// Extension of participant files during directory discovery
    pub file_extension: String,
    /// Participant key column of the demographics file
    pub demographics_participant_column: String,
    pub warmup: WarmupRule,
    pub contrasts: ContrastCoding,
    pub columns: ColumnMap,
    /// Raw consistency code -> condition label
    pub consistency_remap: BTreeMap<String, Consistency>,
    pub error_table: ErrorTruthTable,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let consistency_remap = [
            ("c", Consistency::Consistent),
            ("i", Consistency::Inconsistent),
            ("u", Consistency::Unknown),
            ("y", Consistency::Dislike),
        ]
        .into_iter()
        .map(|(code, label)| (code.to_string(), label))
        .collect();

        Self {
            outlier_ceiling_secs: DEFAULT_OUTLIER_CEILING_SECS,
            excluded_patterns: Vec::new(),
            missing_markers: vec![
                String::new(),
                "NA".to_string(),
                "None".to_string(),
                "nan".to_string(),
            ],
            delimiter: ',',
            file_extension: "csv".to_string(),
            demographics_participant_column: "participant".to_string(),
            warmup: WarmupRule::default(),
            contrasts: ContrastCoding::default(),
            columns: ColumnMap::default(),
            consistency_remap,
            error_table: ErrorTruthTable::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; omitted keys keep their defaults
    pub fn from_toml_str(toml_str: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.outlier_ceiling_secs.is_finite() || self.outlier_ceiling_secs <= 0.0 {
            return Err(PipelineError::Config(format!(
                "outlier ceiling must be a positive number of seconds, got {}",
                self.outlier_ceiling_secs
            )));
        }

        if !self.delimiter.is_ascii() {
            return Err(PipelineError::Config(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }

        if self.consistency_remap.is_empty() {
            return Err(PipelineError::Config(
                "consistency remap dictionary is empty".to_string(),
            ));
        }
        for code in self.consistency_remap.keys() {
            if *code != normalize_code(code) {
                return Err(PipelineError::Config(format!(
                    "consistency code {:?} must be lowercase without surrounding whitespace",
                    code
                )));
            }
        }

        let required = self.columns.required();
        for (i, column) in required.iter().enumerate() {
            if column.trim().is_empty() {
                return Err(PipelineError::Config("empty column name".to_string()));
            }
            if required[..i].contains(column) {
                return Err(PipelineError::Config(format!(
                    "column {:?} is mapped to more than one field",
                    column
                )));
            }
        }

        self.error_table.compile()?;
        Ok(())
    }

    /// Delimiter as the byte the CSV reader expects
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }

    pub fn is_missing(&self, value: &str) -> bool {
        self.missing_markers.iter().any(|m| m == value)
    }
}

/// Normalization applied to categorical codes: trimmed, lowercase
pub fn normalize_code(value: &str) -> String {
    value.trim().to_lowercase()
}
