use std::path::{Path, PathBuf};

use pf_types::{DataError, ScoreRecord, ScoreSource, TrialId};

/// Column headers the evaluator writes, in [`ScoreRecord`] field order.
pub const CELL_TYPE_SPECIFICITY_COLUMN: &str = "Celltype_specificity_score";
pub const CORRELATION_RATIO_COLUMN: &str = "Correlation_ratio";
pub const PATHWAY_COLUMN: &str = "Pathway_score";
pub const SPATIAL_COLUMN: &str = "Spatial_score";
pub const TRANSCRIPTIONAL_VARIABILITY_COLUMN: &str = "Transcriptional_variability";

/// Reads per-trial score files (`<id>_scores.csv`) from one directory.
#[derive(Debug, Clone)]
pub struct CsvScoreStore {
    dir: PathBuf,
}

impl CsvScoreStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn score_path(&self, trial_id: TrialId) -> PathBuf {
        self.dir.join(format!("{trial_id}_scores.csv"))
    }

    /// Read the first data row of a score file.
    pub fn read_record<P: AsRef<Path>>(path: P) -> Result<ScoreRecord, DataError> {
        use csv::ReaderBuilder;

        let path = path.as_ref();
        tracing::debug!("Loading scores from: {}", path.display());

        if !path.exists() {
            return Err(DataError::NotFound {
                path: path.display().to_string(),
            });
        }

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| DataError::Csv {
                message: format!("Failed to open score file {}: {}", path.display(), e),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| DataError::Csv {
                message: format!("Failed to read score headers: {}", e),
            })?
            .clone();

        let column = |name: &str| -> Result<usize, DataError> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DataError::MissingColumn {
                    column: name.to_string(),
                    path: path.display().to_string(),
                })
        };
        let cts_idx = column(CELL_TYPE_SPECIFICITY_COLUMN)?;
        let corr_idx = column(CORRELATION_RATIO_COLUMN)?;
        let pathway_idx = column(PATHWAY_COLUMN)?;
        let spatial_idx = column(SPATIAL_COLUMN)?;
        let tv_idx = column(TRANSCRIPTIONAL_VARIABILITY_COLUMN)?;

        let record = match rdr.records().next() {
            Some(result) => result.map_err(|e| DataError::Csv {
                message: format!("Failed to read score record in {}: {}", path.display(), e),
            })?,
            None => {
                return Err(DataError::ParseError {
                    message: format!("Score file {} has no data rows", path.display()),
                })
            }
        };

        Ok(ScoreRecord {
            cell_type_specificity: parse_score(&record, cts_idx, CELL_TYPE_SPECIFICITY_COLUMN)?,
            correlation_ratio: parse_score(&record, corr_idx, CORRELATION_RATIO_COLUMN)?,
            pathway: parse_score(&record, pathway_idx, PATHWAY_COLUMN)?,
            spatial: parse_score(&record, spatial_idx, SPATIAL_COLUMN)?,
            transcriptional_variability: parse_score(
                &record,
                tv_idx,
                TRANSCRIPTIONAL_VARIABILITY_COLUMN,
            )?,
        })
    }
}

impl ScoreSource for CsvScoreStore {
    fn fetch(&self, trial_id: TrialId) -> Result<ScoreRecord, DataError> {
        Self::read_record(self.score_path(trial_id))
    }
}

fn parse_score(record: &csv::StringRecord, idx: usize, column: &str) -> Result<f64, DataError> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse::<f64>().map_err(|e| DataError::ParseError {
        message: format!("Invalid {} value '{}': {}", column, raw, e),
    })
}
