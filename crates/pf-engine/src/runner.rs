//! Round-based search driver.
//!
//! Each round admits a batch of trials, writes their panels, evaluates them
//! concurrently, waits for every evaluation, then reports the outcomes back
//! to the scheduler one by one.

use pf_data::{CsvScoreStore, FileRewardLog, PanelStore};
use pf_optimizer::{
    Admission, SearchConfig, SearchSpace, SearchStatus, TrialRecord, TrialScheduler,
};
use pf_types::{BatchError, EvaluationError, PfResult, SchedulerError, TrialId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::evaluator::{EvaluationRequest, Evaluator};

/// Drives a [`TrialScheduler`] against an [`Evaluator`] for a whole run.
pub struct SearchRunner<E> {
    config: SearchConfig,
    scheduler: TrialScheduler<StdRng, FileRewardLog>,
    store: PanelStore,
    scores: CsvScoreStore,
    evaluator: Arc<E>,
    status: SearchStatus,
    next_trial_id: TrialId,
    /// Trials admitted from the backlog, dispatched with the next round.
    replayed: Vec<Admission>,
}

impl<E: Evaluator + 'static> SearchRunner<E> {
    /// Validate the configuration, prepare the run directories and seed the
    /// initial population.
    pub fn new(
        config: SearchConfig,
        space: SearchSpace,
        store: PanelStore,
        evaluator: E,
    ) -> PfResult<Self> {
        config.validate()?;
        store.prepare()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut scheduler = TrialScheduler::new(config.scheduler_config(), rng, store.reward_log());
        scheduler.initialize(space)?;

        info!(
            search_id = %config.id,
            name = %config.name,
            rounds = config.rounds(),
            concurrency = config.concurrency,
            "search runner ready"
        );

        Ok(Self {
            scores: store.score_store(),
            status: SearchStatus::new(config.clone()),
            config,
            scheduler,
            store,
            evaluator: Arc::new(evaluator),
            next_trial_id: 1,
            replayed: Vec::new(),
        })
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    pub fn scheduler(&self) -> &TrialScheduler<StdRng, FileRewardLog> {
        &self.scheduler
    }

    /// Backlog admissions waiting to be dispatched.
    pub fn pending_replays(&self) -> usize {
        self.replayed.len()
    }

    /// Run every round. A fatal scheduler error stops the run and is
    /// recorded in the returned status.
    pub async fn run(&mut self) -> PfResult<SearchStatus> {
        self.status.mark_running();

        for round in 0..self.config.rounds() {
            if let Err(e) = self.run_round(round).await {
                error!(round, error = %e, "search run failed");
                self.status.mark_failed(e.to_string());
                return Err(e);
            }
        }
        if let Err(e) = self.drain_replayed().await {
            error!(error = %e, "search run failed while draining the backlog");
            self.status.mark_failed(e.to_string());
            return Err(e);
        }

        self.status.mark_completed();
        if let Some(best) = &self.status.best_trial {
            info!(trial_id = best.trial_id, reward = best.reward, "search completed");
        }
        Ok(self.status.clone())
    }

    async fn run_round(&mut self, round: usize) -> PfResult<()> {
        let ids: Vec<TrialId> =
            (self.next_trial_id..self.next_trial_id + self.config.concurrency as TrialId).collect();
        self.next_trial_id += self.config.concurrency as TrialId;
        info!(round, first = ids[0], last = ids[ids.len() - 1], "starting round");

        let mut batch = std::mem::take(&mut self.replayed);
        let configs = match self.scheduler.request_batch(&ids) {
            Ok(configs) => configs,
            Err(BatchError { admitted, source }) if source.is_retryable() => {
                warn!(
                    admitted = admitted.len(),
                    error = %source,
                    "batch stopped at capacity; remaining ids were not requested"
                );
                admitted
            }
            Err(BatchError { source, .. }) => return Err(source.into()),
        };
        batch.extend(
            ids.iter()
                .zip(configs)
                .map(|(&trial_id, config)| Admission { trial_id, config }),
        );

        self.dispatch(batch).await?;
        info!(
            round,
            completed = self.status.trials_completed,
            failed = self.status.trials_failed,
            population = self.scheduler.population().len(),
            "round finished"
        );
        Ok(())
    }

    /// Evaluate the admissions replayed by the last round's `trial_end`
    /// calls. Each pass can replay further backlog entries, so repeat until
    /// none are left.
    async fn drain_replayed(&mut self) -> PfResult<()> {
        while !self.replayed.is_empty() {
            let batch = std::mem::take(&mut self.replayed);
            info!(trials = batch.len(), "dispatching replayed backlog trials");
            self.dispatch(batch).await?;
        }
        Ok(())
    }

    /// Write, evaluate and report back every admission in `batch`.
    async fn dispatch(&mut self, batch: Vec<Admission>) -> PfResult<()> {
        let mut requests = Vec::with_capacity(batch.len());
        for admission in &batch {
            let panel_path = self.store.write_panel(
                admission.trial_id,
                &admission.config,
                self.scheduler.space().position_ids(),
            )?;
            requests.push(EvaluationRequest {
                trial_id: admission.trial_id,
                panel_path,
                score_path: self.store.score_path(admission.trial_id),
            });
        }
        self.status.trials_running = self.scheduler.running_count();

        let mut evaluations = self.evaluate_all(requests).await;

        for admission in batch {
            let trial_id = admission.trial_id;
            if let Some(Err(e)) = evaluations.remove(&trial_id) {
                warn!(trial_id, error = %e, "evaluator reported an error");
            }

            let success = match self.scheduler.receive_result(trial_id, &self.scores) {
                Ok(outcome) => {
                    self.store.write_reward(trial_id, outcome.reward)?;
                    self.status.record_success(TrialRecord {
                        trial_id,
                        reward: outcome.reward,
                        scores: Some(outcome.scores),
                        config: admission.config,
                    });
                    outcome.success
                }
                Err(SchedulerError::ScoreUnavailable { message, .. }) => {
                    warn!(trial_id, reason = %message, "no usable score; treating trial as failed");
                    self.status.record_failure();
                    false
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(replay) = self.scheduler.trial_end(trial_id, success)? {
                self.replayed.push(replay);
            }
        }

        self.status.trials_running = self.scheduler.running_count();
        Ok(())
    }

    /// Evaluate every request concurrently and wait for all of them.
    async fn evaluate_all(
        &self,
        requests: Vec<EvaluationRequest>,
    ) -> HashMap<TrialId, Result<(), EvaluationError>> {
        let mut set = JoinSet::new();
        for request in requests {
            let evaluator = Arc::clone(&self.evaluator);
            set.spawn(async move {
                let trial_id = request.trial_id;
                (trial_id, evaluator.evaluate(request).await)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((trial_id, result)) => {
                    results.insert(trial_id, result);
                }
                Err(e) => warn!(error = %e, "evaluation task did not complete"),
            }
        }
        results
    }
}
