//! Raw trial and demographics loading
//!
//! Reads delimited participant logs into [`RawTrialTable`]s. Rows are kept
//! verbatim: the only transformation is typing the integer and response time
//! columns and turning configured missing markers into `None`.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{DemographicRecord, DemographicsTable, RawTrialRecord, RawTrialTable};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Loader for participant trial logs and the demographics side-table
pub struct RawTrialLoader<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RawTrialLoader<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Load one participant file
    pub fn load(&self, path: &Path) -> Result<RawTrialTable, PipelineError> {
        let file = open(path)?;
        let table = self.load_reader(&path.display().to_string(), file)?;
        debug!(file = %path.display(), rows = table.rows.len(), "loaded trial log");
        Ok(table)
    }

    /// Load trial rows from any reader; `source` labels errors and provenance
    pub fn load_reader<R: Read>(
        &self,
        source: &str,
        reader: R,
    ) -> Result<RawTrialTable, PipelineError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.config.delimiter_byte())
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let columns = &self.config.columns;
        let indices = resolve_columns(source, &headers, &columns.required())?;
        let [
            participant,
            block_index,
            trial_index,
            facing_direction,
            show_side,
            target_person,
            food_item,
            consistency_raw,
            response_key,
            response_time,
        ] = indices;

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let cell = Cell {
                config: self.config,
                source,
                line,
                record: &record,
            };

            rows.push(RawTrialRecord {
                line,
                participant: cell.text(participant),
                block_index: cell.index(block_index, &columns.block_index)?,
                trial_index: cell.index(trial_index, &columns.trial_index)?,
                facing_direction: cell.text(facing_direction),
                show_side: cell.text(show_side),
                target_person: cell.text(target_person),
                food_item: cell.text(food_item),
                consistency_raw: cell.text(consistency_raw),
                response_key: cell.text(response_key),
                response_time: cell.seconds(response_time, &columns.response_time)?,
            });
        }

        Ok(RawTrialTable {
            source: source.to_string(),
            rows,
        })
    }

    /// Load the demographics file
    pub fn load_demographics(&self, path: &Path) -> Result<DemographicsTable, PipelineError> {
        let file = open(path)?;
        let table = self.load_demographics_reader(&path.display().to_string(), file)?;
        debug!(file = %path.display(), participants = table.len(), "loaded demographics");
        Ok(table)
    }

    /// Load demographics from any reader
    ///
    /// Every column except the participant key is carried as optional text.
    /// Rows without a participant value cannot be joined and are skipped.
    pub fn load_demographics_reader<R: Read>(
        &self,
        source: &str,
        reader: R,
    ) -> Result<DemographicsTable, PipelineError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.config.delimiter_byte())
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let key_column = self.config.demographics_participant_column.as_str();
        let [key_index] = resolve_columns(source, &headers, &[key_column])?;

        let value_indices: Vec<usize> = (0..headers.len()).filter(|&i| i != key_index).collect();
        let columns = value_indices
            .iter()
            .map(|&i| headers[i].trim().to_string())
            .collect();

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for result in reader.records() {
            let record = result?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let cell = Cell {
                config: self.config,
                source,
                line,
                record: &record,
            };

            let Some(participant) = cell.text(key_index) else {
                debug!(file = source, line, "demographics row without participant skipped");
                continue;
            };
            if !seen.insert(participant.clone()) {
                return Err(PipelineError::DuplicateDemographics(participant));
            }

            records.push(DemographicRecord {
                participant,
                values: value_indices.iter().map(|&i| cell.text(i)).collect(),
            });
        }

        Ok(DemographicsTable { columns, records })
    }
}

fn open(path: &Path) -> Result<File, PipelineError> {
    File::open(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Map each required column name to its header position
fn resolve_columns<const N: usize>(
    source: &str,
    headers: &StringRecord,
    required: &[&str; N],
) -> Result<[usize; N], PipelineError> {
    let mut indices = [0usize; N];
    let mut missing = Vec::new();

    for (slot, name) in indices.iter_mut().zip(required.iter()) {
        match headers.iter().position(|h| h.trim() == *name) {
            Some(i) => *slot = i,
            None => missing.push(name.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(indices)
    } else {
        Err(PipelineError::Schema {
            file: source.to_string(),
            missing,
        })
    }
}

/// Typed access to the fields of one record
struct Cell<'r> {
    config: &'r PipelineConfig,
    source: &'r str,
    line: u64,
    record: &'r StringRecord,
}

impl Cell<'_> {
    fn raw(&self, index: usize) -> Option<&str> {
        let value = self.record.get(index)?.trim();
        if self.config.is_missing(value) {
            None
        } else {
            Some(value)
        }
    }

    fn text(&self, index: usize) -> Option<String> {
        self.raw(index).map(str::to_string)
    }

    fn invalid(&self, column: &str, value: &str) -> PipelineError {
        PipelineError::InvalidValue {
            file: self.source.to_string(),
            line: self.line,
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    /// Non-negative integer; integral floats such as "2.0" are accepted
    fn index(&self, index: usize, column: &str) -> Result<Option<u32>, PipelineError> {
        let Some(value) = self.raw(index) else {
            return Ok(None);
        };
        if let Ok(parsed) = value.parse::<u32>() {
            return Ok(Some(parsed));
        }
        match value.parse::<f64>() {
            Ok(f) if f.fract() == 0.0 && f >= 0.0 && f <= u32::MAX as f64 => Ok(Some(f as u32)),
            _ => Err(self.invalid(column, value)),
        }
    }

    /// Non-negative, finite seconds
    fn seconds(&self, index: usize, column: &str) -> Result<Option<f64>, PipelineError> {
        let Some(value) = self.raw(index) else {
            return Ok(None);
        };
        match value.parse::<f64>() {
            Ok(f) if f.is_finite() && f >= 0.0 => Ok(Some(f)),
            _ => Err(self.invalid(column, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const HEADER: &str = "participant,block_index,trial_index,facing_direction,show_side,target_person,food_item,consistency,response_key,response_time";

    fn load(body: &str) -> Result<RawTrialTable, PipelineError> {
        let config = PipelineConfig::default();
        let loader = RawTrialLoader::new(&config);
        loader.load_reader("p01.csv", format!("{HEADER}\n{body}").as_bytes())
    }

    #[test]
    fn test_load_typed_rows() {
        let table = load(
            "p01,0,1,left,left,anna,g,c,up,0.734\np01,1,0,left,right,ben,y,i,down,1.2\n",
        )
        .unwrap();

        assert_eq!(table.source, "p01.csv");
        assert_eq!(table.rows.len(), 2);

        let row = &table.rows[0];
        assert_eq!(row.line, 2);
        assert_eq!(row.participant.as_deref(), Some("p01"));
        assert_eq!(row.block_index, Some(0));
        assert_eq!(row.trial_index, Some(1));
        assert_eq!(row.food_item.as_deref(), Some("g"));
        assert_eq!(row.consistency_raw.as_deref(), Some("c"));
        assert_eq!(row.response_time, Some(0.734));
    }

    #[test]
    fn test_missing_markers_become_none() {
        let table = load("p01,1.0,3,left,NA,anna,g,c,None,\n").unwrap();
        let row = &table.rows[0];

        assert_eq!(row.block_index, Some(1));
        assert_eq!(row.show_side, None);
        assert_eq!(row.response_key, None);
        assert_eq!(row.response_time, None);
    }

    #[test]
    fn test_short_row_is_incomplete_not_fatal() {
        let table = load("p01,1,3,left\n").unwrap();
        assert_eq!(table.rows[0].facing_direction.as_deref(), Some("left"));
        assert_eq!(table.rows[0].response_time, None);
    }

    #[test]
    fn test_missing_columns_schema_error() {
        let config = PipelineConfig::default();
        let loader = RawTrialLoader::new(&config);
        let result = loader.load_reader(
            "old_format.csv",
            "participant,block_index,trial_index,key\np01,0,0,up\n".as_bytes(),
        );

        match result {
            Err(PipelineError::Schema { file, missing }) => {
                assert_eq!(file, "old_format.csv");
                assert!(missing.contains(&"facing_direction".to_string()));
                assert!(missing.contains(&"response_time".to_string()));
                assert!(!missing.contains(&"participant".to_string()));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_numeric_value() {
        let result = load("p01,one,0,left,left,anna,g,c,up,0.5\n");
        assert!(matches!(
            result,
            Err(PipelineError::InvalidValue { ref column, line: 2, .. }) if column == "block_index"
        ));

        let result = load("p01,1,0,left,left,anna,g,c,up,-0.5\n");
        assert!(matches!(result, Err(PipelineError::InvalidValue { .. })));
    }

    #[test]
    fn test_columns_in_any_order() {
        let config = PipelineConfig::default();
        let loader = RawTrialLoader::new(&config);
        let csv = "response_time,participant,extra,block_index,trial_index,facing_direction,show_side,target_person,food_item,consistency,response_key\n0.9,p02,x,2,4,up,down,cara,d,u,down\n";
        let table = loader.load_reader("p02.csv", csv.as_bytes()).unwrap();

        assert_eq!(table.rows[0].participant.as_deref(), Some("p02"));
        assert_eq!(table.rows[0].response_time, Some(0.9));
        assert_eq!(table.rows[0].block_index, Some(2));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "p03,1,1,left,left,anna,g,c,up,0.5").unwrap();

        let config = PipelineConfig::default();
        let table = RawTrialLoader::new(&config).load(file.path()).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.source, file.path().display().to_string());
    }

    #[test]
    fn test_load_missing_file() {
        let config = PipelineConfig::default();
        let result = RawTrialLoader::new(&config).load(Path::new("/nonexistent/p99.csv"));
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_load_demographics() {
        let config = PipelineConfig::default();
        let loader = RawTrialLoader::new(&config);
        let csv = "age,participant,gender\n24,p01,f\n,p02,m\n31,NA,f\n";
        let table = loader.load_demographics_reader("demo.csv", csv.as_bytes()).unwrap();

        assert_eq!(table.columns, vec!["age".to_string(), "gender".to_string()]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].participant, "p01");
        assert_eq!(
            table.records[0].values,
            vec![Some("24".to_string()), Some("f".to_string())]
        );
        assert_eq!(table.records[1].values[0], None);
    }

    #[test]
    fn test_duplicate_demographics_rejected() {
        let config = PipelineConfig::default();
        let loader = RawTrialLoader::new(&config);
        let csv = "participant,age\np01,24\np01,25\n";
        let result = loader.load_demographics_reader("demo.csv", csv.as_bytes());
        assert!(matches!(result, Err(PipelineError::DuplicateDemographics(p)) if p == "p01"));
    }
}
