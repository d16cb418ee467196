use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::DataError;
use crate::panel::TrialId;

/// The five sub-scores the evaluator reports for one panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub cell_type_specificity: f64,
    pub correlation_ratio: f64,
    pub pathway: f64,
    pub spatial: f64,
    pub transcriptional_variability: f64,
}

impl ScoreRecord {
    pub fn new(
        cell_type_specificity: f64,
        correlation_ratio: f64,
        pathway: f64,
        spatial: f64,
        transcriptional_variability: f64,
    ) -> Self {
        Self {
            cell_type_specificity,
            correlation_ratio,
            pathway,
            spatial,
            transcriptional_variability,
        }
    }

    /// Sum of all five sub-scores.
    pub fn overall(&self) -> f64 {
        self.cell_type_specificity
            + self.correlation_ratio
            + self.pathway
            + self.spatial
            + self.transcriptional_variability
    }

    /// The raw score the given objective optimizes.
    pub fn select(&self, objective: ObjectiveMode) -> f64 {
        match objective {
            ObjectiveMode::Overall => self.overall(),
            ObjectiveMode::CellTypeSpecificity => self.cell_type_specificity,
            ObjectiveMode::CorrelationRatio => self.correlation_ratio,
            ObjectiveMode::Pathway => self.pathway,
            ObjectiveMode::Spatial => self.spatial,
            ObjectiveMode::TranscriptionalVariability => self.transcriptional_variability,
        }
    }
}

/// Which score is used as the optimization target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveMode {
    #[serde(rename = "overall")]
    Overall,
    #[serde(rename = "cts")]
    CellTypeSpecificity,
    #[serde(rename = "corr")]
    CorrelationRatio,
    #[serde(rename = "pathway")]
    Pathway,
    #[serde(rename = "spatial")]
    Spatial,
    #[serde(rename = "tv")]
    TranscriptionalVariability,
}

impl ObjectiveMode {
    pub const ALL: [ObjectiveMode; 6] = [
        ObjectiveMode::Overall,
        ObjectiveMode::CellTypeSpecificity,
        ObjectiveMode::CorrelationRatio,
        ObjectiveMode::Pathway,
        ObjectiveMode::Spatial,
        ObjectiveMode::TranscriptionalVariability,
    ];

    /// Short name used on the command line and in file names.
    pub fn name(&self) -> &'static str {
        match self {
            ObjectiveMode::Overall => "overall",
            ObjectiveMode::CellTypeSpecificity => "cts",
            ObjectiveMode::CorrelationRatio => "corr",
            ObjectiveMode::Pathway => "pathway",
            ObjectiveMode::Spatial => "spatial",
            ObjectiveMode::TranscriptionalVariability => "tv",
        }
    }

    /// Look up a mode by short name. Unrecognized names select
    /// [`ObjectiveMode::CorrelationRatio`].
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == name)
            .unwrap_or(ObjectiveMode::CorrelationRatio)
    }
}

impl Default for ObjectiveMode {
    fn default() -> Self {
        Self::Overall
    }
}

impl std::fmt::Display for ObjectiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the scheduler looks up a finished trial's scores.
pub trait ScoreSource {
    fn fetch(&self, trial_id: TrialId) -> Result<ScoreRecord, DataError>;
}

impl ScoreSource for HashMap<TrialId, ScoreRecord> {
    fn fetch(&self, trial_id: TrialId) -> Result<ScoreRecord, DataError> {
        self.get(&trial_id).copied().ok_or_else(|| DataError::NotFound {
            path: format!("scores for trial {trial_id}"),
        })
    }
}

/// Append-only sink for ingested rewards, one stream per objective.
pub trait RewardSink {
    fn append(&mut self, objective: ObjectiveMode, reward: f64) -> Result<(), DataError>;
}

/// In-memory sink; keeps rewards in arrival order regardless of objective.
impl RewardSink for Vec<f64> {
    fn append(&mut self, _objective: ObjectiveMode, reward: f64) -> Result<(), DataError> {
        self.push(reward);
        Ok(())
    }
}
