use thiserror::Error;

use crate::panel::{PanelConfig, TrialId};

/// Main error type for the Panelforge system
#[derive(Error, Debug)]
pub enum PfError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Search space error: {0}")]
    SearchSpace(#[from] SearchSpaceError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the trial scheduler protocol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Population is empty; was the scheduler initialized?")]
    EmptyPopulation,

    #[error("Running trials at capacity; trial {trial_id} queued on the backlog")]
    CapacityExceeded { trial_id: TrialId },

    #[error("Trial {trial_id} is not running")]
    UnknownTrialId { trial_id: TrialId },

    #[error("Trial {trial_id} is already running")]
    DuplicateTrialId { trial_id: TrialId },

    #[error("Score unavailable for trial {trial_id}: {message}")]
    ScoreUnavailable { trial_id: TrialId, message: String },

    #[error("Reward log write failed: {message}")]
    RewardLog { message: String },

    #[error("Search space error: {0}")]
    SearchSpace(#[from] SearchSpaceError),
}

impl SchedulerError {
    /// True when the caller should wait for capacity rather than abort.
    /// The rejected trial id is already on the backlog.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::CapacityExceeded { .. })
    }
}

/// A batch request stopped part way through.
///
/// `admitted` holds the configs handed out before the failing id; those
/// trials are registered as running and must still be reported back.
/// Ids after the failing one were never requested.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("batch aborted after {} admitted config(s): {source}", .admitted.len())]
pub struct BatchError {
    pub admitted: Vec<PanelConfig>,
    #[source]
    pub source: SchedulerError,
}

/// Search space and config generation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchSpaceError {
    #[error("Search space has no positions")]
    Empty,

    #[error("Duplicate position in search space: {position}")]
    DuplicatePosition { position: String },

    #[error("Position {position} has no candidate values")]
    EmptyCandidates { position: String },

    #[error("Position {position} is not re-rolled and has no base value")]
    MissingBaseValue { position: String },
}

/// Data-related errors (score records, reward logs, panel files)
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Record not found: {path}")]
    NotFound { path: String },

    #[error("Missing column {column} in {path}")]
    MissingColumn { column: String, path: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("CSV error: {message}")]
    Csv { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the out-of-process evaluator
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Failed to spawn evaluator for trial {trial_id}: {message}")]
    Spawn { trial_id: TrialId, message: String },

    #[error("Evaluator for trial {trial_id} exited with status {code:?}")]
    NonZeroExit { trial_id: TrialId, code: Option<i32> },

    #[error("Evaluation task failed: {message}")]
    Join { message: String },
}

/// Result type alias for Panelforge operations
pub type PfResult<T> = Result<T, PfError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::PfError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SchedulerError::ScoreUnavailable {
            trial_id: 17,
            message: "file missing".to_string(),
        };

        assert!(error.to_string().contains("Score unavailable"));
        assert!(error.to_string().contains("17"));
        assert!(error.to_string().contains("file missing"));
    }

    #[test]
    fn test_error_conversion() {
        let scheduler_error = SchedulerError::UnknownTrialId { trial_id: 3 };
        let pf_error: PfError = scheduler_error.into();

        match pf_error {
            PfError::Scheduler(SchedulerError::UnknownTrialId { trial_id: 3 }) => (),
            _ => panic!("Expected Scheduler error"),
        }
    }

    #[test]
    fn only_capacity_is_retryable() {
        assert!(SchedulerError::CapacityExceeded { trial_id: 1 }.is_retryable());
        assert!(!SchedulerError::EmptyPopulation.is_retryable());
        assert!(!SchedulerError::UnknownTrialId { trial_id: 1 }.is_retryable());
    }

    #[test]
    fn batch_error_reports_admitted_count() {
        let err = BatchError {
            admitted: vec![PanelConfig::new(), PanelConfig::new()],
            source: SchedulerError::CapacityExceeded { trial_id: 9 },
        };
        let text = err.to_string();
        assert!(text.contains("2 admitted"));
        assert!(text.contains("trial 9"));
    }

    #[test]
    fn test_macros() {
        let err = config_error!("concurrency must be positive, got {}", 0);
        assert!(matches!(err, PfError::Config(_)));
    }
}
