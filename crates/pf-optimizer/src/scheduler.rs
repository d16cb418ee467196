//! Trial scheduler: admission control, offspring generation, result
//! ingestion, failure recovery and backlog replay.
//!
//! The scheduler is a plain owned value driven through `&mut self`. It does
//! no IO of its own beyond the injected score source and reward sink, and it
//! never runs evaluations; the caller dispatches the configs it hands out
//! and reports every admitted trial back exactly once.

use pf_types::{
    BatchError, ObjectiveMode, PanelConfig, RewardSink, SchedulerError, ScoreRecord, ScoreSource,
    TrialId,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::population::{Candidate, Population};
use crate::search::SearchSpace;
use crate::trial::ObjectiveDirection;

/// Scheduler parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Initial population size. Also the cap on running trials.
    pub population_size: usize,
    pub objective: ObjectiveMode,
    pub direction: ObjectiveDirection,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            population_size: 32,
            objective: ObjectiveMode::Overall,
            direction: ObjectiveDirection::Maximize,
        }
    }
}

/// Reported outcome of an ingested trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub success: bool,
    /// Sign-adjusted reward, as stored in the population and logged.
    pub reward: f64,
    /// The raw score record the reward was selected from.
    pub scores: ScoreRecord,
}

/// A trial admitted from the backlog during [`TrialScheduler::trial_end`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub trial_id: TrialId,
    pub config: PanelConfig,
}

/// Population-based scheduler with a bounded number of running trials.
#[derive(Debug)]
pub struct TrialScheduler<R, L> {
    config: SchedulerConfig,
    space: SearchSpace,
    population: Population,
    running_trials: HashMap<TrialId, Candidate>,
    running_count: usize,
    backlog: VecDeque<TrialId>,
    backlog_pending: usize,
    rng: R,
    reward_log: L,
}

impl<R: Rng, L: RewardSink> TrialScheduler<R, L> {
    pub fn new(config: SchedulerConfig, rng: R, reward_log: L) -> Self {
        Self {
            config,
            space: SearchSpace::new(),
            population: Population::new(),
            running_trials: HashMap::new(),
            running_count: 0,
            backlog: VecDeque::new(),
            backlog_pending: 0,
            rng,
            reward_log,
        }
    }

    /// Install the search space and reseed the population with
    /// `population_size` random candidates. Running and backlog state is
    /// cleared.
    pub fn initialize(&mut self, space: SearchSpace) -> Result<(), SchedulerError> {
        space.validate()?;
        self.space = space;
        self.population.clear();
        self.running_trials.clear();
        self.running_count = 0;
        self.backlog.clear();
        self.backlog_pending = 0;
        self.population
            .seed_random(&self.space, self.config.population_size, &mut self.rng)?;

        info!(
            positions = self.space.len(),
            population_size = self.config.population_size,
            objective = %self.config.objective,
            "scheduler initialized"
        );
        Ok(())
    }

    /// Request one config per id, in order.
    ///
    /// Stops at the first failing id. The configs admitted before it are
    /// returned inside the [`BatchError`]; those trials are running and must
    /// be reported back. Later ids are not requested at all.
    pub fn request_batch(&mut self, trial_ids: &[TrialId]) -> Result<Vec<PanelConfig>, BatchError> {
        let mut admitted = Vec::with_capacity(trial_ids.len());
        for &trial_id in trial_ids {
            match self.request_one(trial_id) {
                Ok(config) => admitted.push(config),
                Err(source) => return Err(BatchError { admitted, source }),
            }
        }
        Ok(admitted)
    }

    /// Admit one trial and return the config to evaluate.
    ///
    /// At capacity the id is queued on the backlog and `CapacityExceeded` is
    /// returned; it is replayed later by [`Self::trial_end`], not by calling
    /// this again.
    pub fn request_one(&mut self, trial_id: TrialId) -> Result<PanelConfig, SchedulerError> {
        if self.running_trials.contains_key(&trial_id) {
            return Err(SchedulerError::DuplicateTrialId { trial_id });
        }

        if self.running_count >= self.config.population_size {
            warn!(
                trial_id,
                running = self.running_count,
                population_size = self.config.population_size,
                "population size is suggested to be larger than concurrency; trial queued"
            );
            self.backlog.push_back(trial_id);
            self.backlog_pending += 1;
            return Err(SchedulerError::CapacityExceeded { trial_id });
        }
        if self.population.is_empty() {
            return Err(SchedulerError::EmptyPopulation);
        }

        let config = self.admit(trial_id)?;
        self.running_count += 1;
        Ok(config)
    }

    /// Ingest the scores of a finished trial.
    ///
    /// Scores are looked up before the id is checked, so a missing score
    /// record is reported as `ScoreUnavailable` even for an unknown id.
    pub fn receive_result<S: ScoreSource + ?Sized>(
        &mut self,
        trial_id: TrialId,
        scores: &S,
    ) -> Result<TrialOutcome, SchedulerError> {
        let record = scores
            .fetch(trial_id)
            .map_err(|e| SchedulerError::ScoreUnavailable {
                trial_id,
                message: e.to_string(),
            })?;
        let raw = record.select(self.config.objective);

        let candidate = self
            .running_trials
            .remove(&trial_id)
            .ok_or(SchedulerError::UnknownTrialId { trial_id })?;

        let reward = self.config.direction.orient(raw);
        self.population
            .push(Candidate::evaluated(candidate.config, reward));

        self.reward_log
            .append(self.config.objective, reward)
            .map_err(|e| SchedulerError::RewardLog {
                message: e.to_string(),
            })?;

        debug!(trial_id, reward, population = self.population.len(), "trial result ingested");
        Ok(TrialOutcome {
            success: true,
            reward,
            scores: record,
        })
    }

    /// Release a trial's slot.
    ///
    /// A failed trial is forgotten and one fresh random candidate is seeded in
    /// its place. Then, if more than one id is waiting on the backlog, the
    /// oldest one is admitted and returned so the caller can dispatch it. The
    /// threshold is strict: the last queued id is never replayed here.
    ///
    /// On error no state has changed: the slot is still held and the backlog
    /// is intact.
    pub fn trial_end(
        &mut self,
        trial_id: TrialId,
        success: bool,
    ) -> Result<Option<Admission>, SchedulerError> {
        let replay = self.backlog_pending > 1 && !self.backlog.is_empty();
        // A failed trial seeds a replacement, so only a success can leave
        // nothing to replay from.
        if replay && success && self.population.is_empty() {
            return Err(SchedulerError::EmptyPopulation);
        }

        if !success {
            self.population.seed_random(&self.space, 1, &mut self.rng)?;
            self.running_trials.remove(&trial_id);
            info!(trial_id, "trial failed; seeded a replacement candidate");
        }

        if self.running_count == 0 {
            warn!(trial_id, "trial_end with no running trials");
        }
        self.running_count = self.running_count.saturating_sub(1);

        if !replay {
            return Ok(None);
        }
        let Some(&queued) = self.backlog.front() else {
            return Ok(None);
        };
        let config = self.admit(queued)?;
        self.backlog.pop_front();
        self.running_count += 1;
        self.backlog_pending -= 1;
        info!(
            trial_id = queued,
            backlog_pending = self.backlog_pending,
            "admitted trial from backlog"
        );
        Ok(Some(Admission {
            trial_id: queued,
            config,
        }))
    }

    fn admit(&mut self, trial_id: TrialId) -> Result<PanelConfig, SchedulerError> {
        let candidate = self.population.next_offspring(&self.space, &mut self.rng)?;
        let config = candidate.config.clone();
        self.running_trials.insert(trial_id, candidate);
        debug!(trial_id, population = self.population.len(), "trial admitted");
        Ok(config)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn running_count(&self) -> usize {
        self.running_count
    }

    pub fn is_running(&self, trial_id: TrialId) -> bool {
        self.running_trials.contains_key(&trial_id)
    }

    pub fn backlog(&self) -> impl Iterator<Item = TrialId> + '_ {
        self.backlog.iter().copied()
    }

    pub fn backlog_pending(&self) -> usize {
        self.backlog_pending
    }

    pub fn objective(&self) -> ObjectiveMode {
        self.config.objective
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.config.direction
    }

    pub fn best_candidate(&self) -> Option<&Candidate> {
        self.population.best()
    }

    pub fn reward_log(&self) -> &L {
        &self.reward_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_types::DataError;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestScheduler = TrialScheduler<StdRng, Vec<f64>>;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_position("1", vec!["A".into(), "B".into()])
            .add_position("2", vec!["X".into(), "Y".into()])
    }

    fn scheduler(population_size: usize, direction: ObjectiveDirection) -> TestScheduler {
        let config = SchedulerConfig {
            population_size,
            objective: ObjectiveMode::Overall,
            direction,
        };
        let mut sched = TrialScheduler::new(config, StdRng::seed_from_u64(42), Vec::new());
        sched.initialize(space()).unwrap();
        sched
    }

    fn ones() -> ScoreRecord {
        ScoreRecord::new(1.0, 1.0, 1.0, 1.0, 1.0)
    }

    fn scores_for(ids: &[TrialId], record: ScoreRecord) -> HashMap<TrialId, ScoreRecord> {
        ids.iter().map(|&id| (id, record)).collect()
    }

    #[test]
    fn initialize_seeds_unevaluated_population() {
        let sched = scheduler(2, ObjectiveDirection::Maximize);
        assert_eq!(sched.population().len(), 2);
        assert!(sched
            .population()
            .iter()
            .all(|c| c.fitness.is_none() && space().contains(&c.config)));
        assert_eq!(sched.running_count(), 0);
        assert_eq!(sched.backlog_pending(), 0);
    }

    #[test]
    fn request_before_initialize_fails() {
        let mut sched: TestScheduler =
            TrialScheduler::new(SchedulerConfig::default(), StdRng::seed_from_u64(0), Vec::new());
        assert_eq!(sched.request_one(1), Err(SchedulerError::EmptyPopulation));
    }

    #[test]
    fn initialize_rejects_invalid_space() {
        let mut sched: TestScheduler =
            TrialScheduler::new(SchedulerConfig::default(), StdRng::seed_from_u64(0), Vec::new());
        let bad = SearchSpace::new().add_position("1", Vec::new());
        assert!(matches!(
            sched.initialize(bad),
            Err(SchedulerError::SearchSpace(_))
        ));
    }

    #[test]
    fn capacity_rejection_queues_on_backlog() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);

        // Each admission consumes one unevaluated seed.
        sched.request_one(1).unwrap();
        sched.request_one(2).unwrap();
        assert_eq!(sched.running_count(), 2);
        assert!(sched.population().is_empty());

        let err = sched.request_one(3).unwrap_err();
        assert_eq!(err, SchedulerError::CapacityExceeded { trial_id: 3 });
        assert!(err.is_retryable());
        assert_eq!(sched.backlog().collect::<Vec<_>>(), vec![3]);
        assert_eq!(sched.backlog_pending(), 1);
        assert!(!sched.is_running(3));
    }

    #[test]
    fn capacity_check_uses_population_size() {
        let mut sched = scheduler(4, ObjectiveDirection::Maximize);
        let configs = sched.request_batch(&[1, 2]).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(sched.population().len(), 2);

        sched.request_batch(&[3, 4]).unwrap();
        assert_eq!(sched.running_count(), 4);
        sched
            .receive_result(1, &scores_for(&[1], ones()))
            .unwrap();

        // Still four running: a result alone does not release the slot.
        let err = sched.request_one(5).unwrap_err();
        assert_eq!(err, SchedulerError::CapacityExceeded { trial_id: 5 });
    }

    #[test]
    fn receive_result_overall_maximize() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        sched.request_one(2).unwrap();

        let outcome = sched.receive_result(1, &scores_for(&[1], ones())).unwrap();
        assert_eq!(
            outcome,
            TrialOutcome {
                success: true,
                reward: 5.0,
                scores: ones(),
            }
        );
        assert!(!sched.is_running(1));
        assert_eq!(sched.population().len(), 1);
        assert_eq!(sched.population().iter().next().unwrap().fitness, Some(5.0));
        assert_eq!(sched.reward_log(), &vec![5.0]);
    }

    #[test]
    fn minimize_negates_reward_everywhere() {
        let mut sched = scheduler(2, ObjectiveDirection::Minimize);
        sched.request_one(7).unwrap();
        let outcome = sched
            .receive_result(7, &scores_for(&[7], ScoreRecord::new(0.5, 0.5, 0.5, 0.5, 1.0)))
            .unwrap();
        assert_eq!(outcome.reward, -3.0);
        assert_eq!(sched.reward_log(), &vec![-3.0]);
        assert!(sched.population().iter().any(|c| c.fitness == Some(-3.0)));
    }

    #[test]
    fn objective_selects_sub_score() {
        let config = SchedulerConfig {
            population_size: 2,
            objective: ObjectiveMode::Spatial,
            direction: ObjectiveDirection::Maximize,
        };
        let mut sched = TrialScheduler::new(config, StdRng::seed_from_u64(9), Vec::new());
        sched.initialize(space()).unwrap();
        sched.request_one(1).unwrap();
        let outcome = sched
            .receive_result(1, &scores_for(&[1], ScoreRecord::new(1.0, 2.0, 3.0, 4.0, 5.0)))
            .unwrap();
        assert_eq!(outcome.reward, 4.0);
        assert_eq!(outcome.scores, ScoreRecord::new(1.0, 2.0, 3.0, 4.0, 5.0));
    }

    #[test]
    fn second_report_is_unknown_trial() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        let scores = scores_for(&[1], ones());
        sched.receive_result(1, &scores).unwrap();
        assert_eq!(
            sched.receive_result(1, &scores),
            Err(SchedulerError::UnknownTrialId { trial_id: 1 })
        );
    }

    #[test]
    fn missing_scores_leave_trial_running() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        let err = sched
            .receive_result(1, &HashMap::<TrialId, ScoreRecord>::new())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ScoreUnavailable { trial_id: 1, .. }));
        assert!(sched.is_running(1));
        assert!(sched.reward_log().is_empty());
    }

    #[test]
    fn score_lookup_precedes_running_check() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        let err = sched
            .receive_result(99, &HashMap::<TrialId, ScoreRecord>::new())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ScoreUnavailable { trial_id: 99, .. }));
    }

    #[test]
    fn reward_log_failure_is_reported() {
        struct Broken;
        impl RewardSink for Broken {
            fn append(&mut self, _: ObjectiveMode, _: f64) -> Result<(), DataError> {
                Err(DataError::InvalidFormat {
                    message: "disk full".into(),
                })
            }
        }

        let mut sched = TrialScheduler::new(
            SchedulerConfig {
                population_size: 2,
                ..SchedulerConfig::default()
            },
            StdRng::seed_from_u64(1),
            Broken,
        );
        sched.initialize(space()).unwrap();
        sched.request_one(1).unwrap();
        let err = sched.receive_result(1, &scores_for(&[1], ones())).unwrap_err();
        assert!(matches!(err, SchedulerError::RewardLog { .. }));
    }

    #[test]
    fn duplicate_request_is_rejected_without_side_effects() {
        let mut sched = scheduler(3, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        assert_eq!(
            sched.request_one(1),
            Err(SchedulerError::DuplicateTrialId { trial_id: 1 })
        );
        assert_eq!(sched.running_count(), 1);
        assert_eq!(sched.population().len(), 2);
    }

    #[test]
    fn failed_trial_is_replaced_by_random_seed() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        sched.request_one(2).unwrap();
        assert!(sched.population().is_empty());

        let replay = sched.trial_end(2, false).unwrap();
        assert!(replay.is_none());
        assert!(!sched.is_running(2));
        assert_eq!(sched.running_count(), 1);
        assert_eq!(sched.population().len(), 1);
        let seed = sched.population().iter().next().unwrap();
        assert!(seed.fitness.is_none());
        assert!(space().contains(&seed.config));
    }

    #[test]
    fn failure_for_untracked_id_still_seeds() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        sched.trial_end(123, false).unwrap();
        assert!(sched.is_running(1));
        assert_eq!(sched.population().len(), 2);
    }

    #[test]
    fn successful_trial_end_only_releases_slot() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        sched.receive_result(1, &scores_for(&[1], ones())).unwrap();
        let before = sched.population().len();
        sched.trial_end(1, true).unwrap();
        assert_eq!(sched.running_count(), 0);
        assert_eq!(sched.population().len(), before);
    }

    #[test]
    fn running_count_does_not_underflow() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.trial_end(1, true).unwrap();
        assert_eq!(sched.running_count(), 0);
    }

    /// Fill a population-size-3 scheduler and queue `queued` ids on the backlog.
    fn saturated_with_backlog(queued: &[TrialId]) -> TestScheduler {
        let mut sched = scheduler(3, ObjectiveDirection::Maximize);
        sched.request_batch(&[1, 2, 3]).unwrap();
        let scores = scores_for(&[1, 2, 3], ones());
        for id in [1, 2, 3] {
            sched.receive_result(id, &scores).unwrap();
        }
        for &id in queued {
            assert_eq!(
                sched.request_one(id),
                Err(SchedulerError::CapacityExceeded { trial_id: id })
            );
        }
        sched
    }

    #[test]
    fn backlog_drains_one_id_per_trial_end() {
        let mut sched = saturated_with_backlog(&[10, 11]);
        assert_eq!(sched.backlog_pending(), 2);

        let admission = sched.trial_end(1, true).unwrap().unwrap();
        assert_eq!(admission.trial_id, 10);
        assert!(space().contains(&admission.config));
        assert!(sched.is_running(10));
        assert_eq!(sched.backlog_pending(), 1);
        assert_eq!(sched.running_count(), 3);
    }

    #[test]
    fn last_backlog_entry_is_never_replayed() {
        // Known quirk: the drain threshold is `pending > 1`, so the final
        // queued id stays stranded on the backlog.
        let mut sched = saturated_with_backlog(&[10, 11]);
        sched.trial_end(1, true).unwrap();

        let second = sched.trial_end(2, true).unwrap();
        assert!(second.is_none());
        assert_eq!(sched.backlog_pending(), 1);
        assert_eq!(sched.backlog().collect::<Vec<_>>(), vec![11]);
        assert!(!sched.is_running(11));
        assert_eq!(sched.running_count(), 2);
    }

    #[test]
    fn single_backlog_entry_is_not_replayed() {
        let mut sched = saturated_with_backlog(&[10]);
        assert!(sched.trial_end(1, true).unwrap().is_none());
        assert_eq!(sched.backlog_pending(), 1);
    }

    #[test]
    fn empty_population_at_replay_leaves_state_untouched() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_batch(&[1, 2]).unwrap();
        assert!(sched.population().is_empty());
        for id in [3, 4] {
            sched.request_one(id).unwrap_err();
        }

        assert_eq!(sched.trial_end(1, true), Err(SchedulerError::EmptyPopulation));
        assert_eq!(sched.running_count(), 2);
        assert_eq!(sched.backlog_pending(), 2);
        assert!(sched.is_running(1));

        // A failure seeds a replacement, which the replay then consumes.
        let admission = sched.trial_end(1, false).unwrap().unwrap();
        assert_eq!(admission.trial_id, 3);
        assert_eq!(sched.running_count(), 2);
        assert_eq!(sched.backlog_pending(), 1);
        assert!(!sched.is_running(1));
        assert!(sched.is_running(3));
    }

    #[test]
    fn replay_admits_at_most_one_per_call() {
        let mut sched = saturated_with_backlog(&[10, 11, 12, 13]);
        sched.trial_end(1, true).unwrap();
        assert_eq!(sched.running_count(), 3);
        assert_eq!(sched.backlog_pending(), 3);
    }

    #[test]
    fn batch_abort_returns_admitted_configs() {
        let mut sched = scheduler(3, ObjectiveDirection::Maximize);
        sched.request_one(1).unwrap();
        sched.request_one(2).unwrap();
        sched.receive_result(1, &scores_for(&[1], ones())).unwrap();

        let err = sched.request_batch(&[3, 4, 5]).unwrap_err();
        assert_eq!(err.admitted.len(), 1);
        assert_eq!(err.source, SchedulerError::CapacityExceeded { trial_id: 4 });
        assert!(sched.is_running(3));
        // Id 5 was never requested.
        assert_eq!(sched.backlog().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn evolved_offspring_differ_in_at_most_one_position() {
        let mut sched = scheduler(2, ObjectiveDirection::Maximize);
        sched.request_batch(&[1, 2]).unwrap();
        let scores = scores_for(&[1, 2], ones());
        sched.receive_result(1, &scores).unwrap();
        sched.receive_result(2, &scores).unwrap();
        sched.trial_end(1, true).unwrap();
        sched.trial_end(2, true).unwrap();

        let parents: Vec<PanelConfig> =
            sched.population().iter().map(|c| c.config.clone()).collect();
        let child = sched.request_one(3).unwrap();
        assert!(parents.iter().any(|p| {
            p.iter().filter(|(k, v)| child.get(*k) != Some(*v)).count() <= 1
        }));
        // Winner stays, loser is gone.
        assert_eq!(sched.population().len(), 1);
    }

    fn arb_space() -> impl Strategy<Value = SearchSpace> {
        prop::collection::vec(prop::collection::vec("[a-z]{1,6}", 1..5), 1..8).prop_map(
            |lists| {
                lists
                    .into_iter()
                    .enumerate()
                    .fold(SearchSpace::new(), |space, (i, values)| {
                        space.add_position((i + 1).to_string(), values)
                    })
            },
        )
    }

    proptest! {
        #[test]
        fn every_handed_out_config_is_total(space in arb_space(), seed in any::<u64>()) {
            let config = SchedulerConfig {
                population_size: 4,
                ..SchedulerConfig::default()
            };
            let mut sched = TrialScheduler::new(config, StdRng::seed_from_u64(seed), Vec::new());
            sched.initialize(space.clone()).unwrap();

            let mut next_id: TrialId = 1;
            for _ in 0..6 {
                let ids: Vec<TrialId> = (next_id..next_id + 2).collect();
                next_id += 2;
                let configs = sched.request_batch(&ids).unwrap();
                for config in &configs {
                    prop_assert!(space.contains(config));
                }
                let scores: HashMap<TrialId, ScoreRecord> = ids
                    .iter()
                    .map(|&id| (id, ScoreRecord::new(id as f64, 0.0, 0.0, 0.0, 0.0)))
                    .collect();
                for &id in &ids {
                    sched.receive_result(id, &scores).unwrap();
                    sched.trial_end(id, true).unwrap();
                }
                prop_assert!(sched.running_count() <= 4);
            }
        }
    }
}
