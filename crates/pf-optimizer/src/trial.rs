//! Search run configuration and progress tracking.

use chrono::{DateTime, Utc};
use pf_types::{config_error, ObjectiveMode, PanelConfig, PfResult, ScoreRecord, TrialId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::SchedulerConfig;

/// Unique search run identifier.
pub type SearchId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

impl ObjectiveDirection {
    /// Convert a raw score to the maximize-oriented fitness the population
    /// stores.
    pub fn orient(&self, raw: f64) -> f64 {
        match self {
            ObjectiveDirection::Maximize => raw,
            ObjectiveDirection::Minimize => -raw,
        }
    }
}

/// Top-level configuration for a panel search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub id: SearchId,
    pub name: String,

    /// Initial population size; also the cap on concurrently running trials.
    pub population_size: usize,

    /// Trials handed to the evaluator per round.
    pub concurrency: usize,

    /// Total number of trial ids issued over the run.
    pub max_trials: usize,

    /// Score the search optimizes.
    pub objective: ObjectiveMode,

    /// Direction of optimization.
    pub direction: ObjectiveDirection,

    /// Seed for the scheduler's random source; `None` draws from the OS.
    pub seed: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl SearchConfig {
    pub fn new(name: String, objective: ObjectiveMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            population_size: 50,
            concurrency: 10,
            max_trials: 2000,
            objective,
            direction: ObjectiveDirection::Maximize,
            seed: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_population_size(mut self, n: usize) -> Self {
        self.population_size = n;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of full rounds the run performs.
    pub fn rounds(&self) -> usize {
        if self.concurrency == 0 {
            0
        } else {
            self.max_trials / self.concurrency
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            population_size: self.population_size,
            objective: self.objective,
            direction: self.direction,
        }
    }

    pub fn validate(&self) -> PfResult<()> {
        if self.population_size == 0 {
            return Err(config_error!("population_size must be positive"));
        }
        if self.concurrency == 0 {
            return Err(config_error!("concurrency must be positive"));
        }
        if self.concurrency > self.population_size {
            tracing::warn!(
                concurrency = self.concurrency,
                population_size = self.population_size,
                "population size is suggested to be larger than concurrency"
            );
        }
        Ok(())
    }
}

/// Lifecycle state for a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One scored trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: TrialId,
    /// Maximize-oriented reward, as stored in the population.
    pub reward: f64,
    pub scores: Option<ScoreRecord>,
    pub config: PanelConfig,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub id: SearchId,
    pub config: SearchConfig,
    pub state: SearchState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub trials_running: usize,
    pub best_trial: Option<TrialRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchStatus {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: SearchState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            trials_running: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = SearchState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = SearchState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = SearchState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn record_success(&mut self, record: TrialRecord) {
        self.trials_completed += 1;
        self.update_best(record);
    }

    pub fn record_failure(&mut self) {
        self.trials_failed += 1;
    }

    /// Rewards are already maximize-oriented, so higher is always better.
    pub fn update_best(&mut self, record: TrialRecord) {
        let improves = match &self.best_trial {
            None => true,
            Some(current) => record.reward > current.reward,
        };
        if improves {
            self.best_trial = Some(record);
        }
    }
}
