//! Out-of-process panel evaluation.

use async_trait::async_trait;
use pf_types::{EvaluationError, TrialId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// One panel handed to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub trial_id: TrialId,
    /// Panel file, one value per line.
    pub panel_path: PathBuf,
    /// Where the evaluator must write its score record.
    pub score_path: PathBuf,
}

/// Something that scores a panel and leaves the result at `score_path`.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<(), EvaluationError>;
}

/// Runs `<program> <args...> <panel_path> <score_path>` and waits for it.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: String,
    args: Vec<String>,
}

impl CommandEvaluator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `Rscript <script> <dataset>` as used by the scoring pipeline.
    pub fn rscript(command: impl Into<String>, script: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self::new(command, vec![script.into(), dataset.into()])
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<(), EvaluationError> {
        debug!(
            trial_id = request.trial_id,
            program = %self.program,
            panel = %request.panel_path.display(),
            "spawning evaluator"
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&request.panel_path)
            .arg(&request.score_path)
            .status()
            .await
            .map_err(|e| EvaluationError::Spawn {
                trial_id: request.trial_id,
                message: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(EvaluationError::NonZeroExit {
                trial_id: request.trial_id,
                code: status.code(),
            })
        }
    }
}
