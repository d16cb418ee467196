use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pf_types::{panel_lines, DataError, ObjectiveMode, PanelConfig, TrialId};
use serde::{Deserialize, Serialize};

use crate::reward_log::FileRewardLog;
use crate::scores::CsvScoreStore;

/// On-disk layout of one search run.
///
/// ```text
/// <root>/panel_contains_<mode>/<id>.json   panel as a position -> value map
/// <root>/panel_contains_<mode>/<id>.txt    one value per line, fed to the evaluator
/// <root>/panel_contains_<mode>/<id>        reward of the trial
/// <root>/panel_score_<mode>/<id>_scores.csv written by the evaluator
/// <root>/<mode>_reward.txt                 append-only reward log
/// ```
#[derive(Debug, Clone)]
pub struct PanelStore {
    pub root: PathBuf,
    objective: ObjectiveMode,
}

impl PanelStore {
    pub fn new<P: AsRef<Path>>(root: P, objective: ObjectiveMode) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            objective,
        }
    }

    pub fn panel_dir(&self) -> PathBuf {
        self.root.join(format!("panel_contains_{}", self.objective.name()))
    }

    pub fn score_dir(&self) -> PathBuf {
        self.root.join(format!("panel_score_{}", self.objective.name()))
    }

    /// Create the panel and score directories.
    pub fn prepare(&self) -> Result<(), DataError> {
        std::fs::create_dir_all(self.panel_dir())?;
        std::fs::create_dir_all(self.score_dir())?;
        tracing::info!("Prepared run directories under {}", self.root.display());
        Ok(())
    }

    pub fn panel_path(&self, trial_id: TrialId) -> PathBuf {
        self.panel_dir().join(format!("{trial_id}.txt"))
    }

    pub fn score_path(&self, trial_id: TrialId) -> PathBuf {
        self.score_dir().join(format!("{trial_id}_scores.csv"))
    }

    pub fn score_store(&self) -> CsvScoreStore {
        CsvScoreStore::new(self.score_dir())
    }

    pub fn reward_log(&self) -> FileRewardLog {
        FileRewardLog::new(&self.root)
    }

    /// Write `<id>.json` and `<id>.txt` for a panel; returns the `.txt` path.
    pub fn write_panel<'a, I>(
        &self,
        trial_id: TrialId,
        config: &PanelConfig,
        order: I,
    ) -> Result<PathBuf, DataError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let json_path = self.panel_dir().join(format!("{trial_id}.json"));
        let json = serde_json::to_string(config).map_err(|e| DataError::InvalidFormat {
            message: format!("Failed to serialize panel {}: {}", trial_id, e),
        })?;
        std::fs::write(&json_path, json)?;

        let txt_path = self.panel_path(trial_id);
        std::fs::write(&txt_path, panel_lines(config, order))?;

        tracing::debug!("Wrote panel {} to {}", trial_id, txt_path.display());
        Ok(txt_path)
    }

    pub fn read_panel(&self, trial_id: TrialId) -> Result<PanelConfig, DataError> {
        let path = self.panel_dir().join(format!("{trial_id}.json"));
        if !path.exists() {
            return Err(DataError::NotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| DataError::InvalidFormat {
            message: format!("Invalid panel file {}: {}", path.display(), e),
        })
    }

    pub fn write_reward(&self, trial_id: TrialId, reward: f64) -> Result<(), DataError> {
        std::fs::write(self.panel_dir().join(trial_id.to_string()), reward.to_string())?;
        Ok(())
    }
}

/// Contents of a search-space file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchSpaceFile {
    /// A single value list shared by every position.
    Values(Vec<String>),
    /// Explicit per-position candidate lists.
    Positions(BTreeMap<String, Vec<String>>),
}

impl SearchSpaceFile {
    /// Expand into `(position, candidates)` pairs. A shared list becomes
    /// positions "1" ..= `panel_size`.
    pub fn into_positions(self, panel_size: usize) -> Vec<(String, Vec<String>)> {
        match self {
            SearchSpaceFile::Values(values) => (1..=panel_size)
                .map(|i| (i.to_string(), values.clone()))
                .collect(),
            SearchSpaceFile::Positions(map) => map.into_iter().collect(),
        }
    }
}

/// Load a search-space JSON file.
pub fn load_search_space<P: AsRef<Path>>(
    path: P,
    panel_size: usize,
) -> Result<Vec<(String, Vec<String>)>, DataError> {
    let path = path.as_ref();
    tracing::info!("Loading search space from: {}", path.display());

    if !path.exists() {
        return Err(DataError::NotFound {
            path: path.display().to_string(),
        });
    }
    let text = std::fs::read_to_string(path)?;
    let file: SearchSpaceFile = serde_json::from_str(&text).map_err(|e| DataError::InvalidFormat {
        message: format!("Invalid search space {}: {}", path.display(), e),
    })?;
    if let SearchSpaceFile::Values(values) = &file {
        tracing::info!("Search space has {} candidate values", values.len());
    }
    Ok(file.into_positions(panel_size))
}
