//! Population of candidate panels and the offspring procedure.

use pf_types::{PanelConfig, SchedulerError, SearchSpaceError};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::search::{generate_config, RerollMask, SearchSpace};

/// One population member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub config: PanelConfig,
    /// Maximize-oriented fitness; `None` until the panel has been scored.
    pub fitness: Option<f64>,
}

impl Candidate {
    pub fn unevaluated(config: PanelConfig) -> Self {
        Self {
            config,
            fitness: None,
        }
    }

    pub fn evaluated(config: PanelConfig, fitness: f64) -> Self {
        Self {
            config,
            fitness: Some(fitness),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }
}

/// Pool of candidates. Order carries no meaning; the size moves as members
/// are withdrawn for trials and returned with a fitness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    members: Vec<Candidate>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.members.iter()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.members.push(candidate);
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn unevaluated_count(&self) -> usize {
        self.members.iter().filter(|c| !c.is_evaluated()).count()
    }

    /// Highest-fitness evaluated member, if any.
    pub fn best(&self) -> Option<&Candidate> {
        self.members
            .iter()
            .filter(|c| c.is_evaluated())
            .max_by(|a, b| {
                a.fitness
                    .partial_cmp(&b.fitness)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Append `count` fully random, unevaluated candidates.
    pub fn seed_random<R: Rng>(
        &mut self,
        space: &SearchSpace,
        count: usize,
        rng: &mut R,
    ) -> Result<(), SchedulerError> {
        let mask = RerollMask::all(space);
        for _ in 0..count {
            let config = generate_config(space, &mask, rng, None)?;
            self.members.push(Candidate::unevaluated(config));
        }
        Ok(())
    }

    /// Remove and return the first member without a fitness.
    pub fn take_unevaluated(&mut self) -> Option<Candidate> {
        let pos = self.members.iter().position(|c| !c.is_evaluated())?;
        Some(self.members.remove(pos))
    }

    /// Produce the candidate for the next trial.
    ///
    /// Unevaluated seeds are handed out first, unchanged. Once every member
    /// has a fitness, two shuffled members play a binary tournament; the
    /// winner stays in the pool and a copy of it with one position re-rolled
    /// becomes the offspring. The loser is dropped from the pool for good.
    pub fn next_offspring<R: Rng>(
        &mut self,
        space: &SearchSpace,
        rng: &mut R,
    ) -> Result<Candidate, SchedulerError> {
        if let Some(seed) = self.take_unevaluated() {
            return Ok(seed);
        }
        if self.members.is_empty() {
            return Err(SchedulerError::EmptyPopulation);
        }

        self.members.shuffle(rng);
        // Strictly greater: ties keep slot 0.
        if self.members.len() > 1 && self.members[0].fitness < self.members[1].fitness {
            self.members.swap(0, 1);
        }

        let winner = &self.members[0];
        let loci: Vec<&String> = winner.config.keys().collect();
        if loci.is_empty() {
            return Err(SearchSpaceError::Empty.into());
        }
        let locus = loci[rng.random_range(0..loci.len())].clone();
        let config = generate_config(space, &RerollMask::only(locus.as_str()), rng, Some(&winner.config))?;

        if self.members.len() > 1 {
            let loser = self.members.remove(1);
            debug!(
                loser_fitness = ?loser.fitness,
                remaining = self.members.len(),
                "tournament loser discarded"
            );
        }
        debug!(locus = %locus, "mutated tournament winner");

        Ok(Candidate::unevaluated(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_position("1", vec!["A".into(), "B".into()])
            .add_position("2", vec!["X".into(), "Y".into()])
    }

    fn config(a: &str, b: &str) -> PanelConfig {
        let mut c = PanelConfig::new();
        c.insert("1".into(), a.into());
        c.insert("2".into(), b.into());
        c
    }

    #[test]
    fn seeding_adds_unevaluated_members() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pop = Population::new();
        pop.seed_random(&space(), 4, &mut rng).unwrap();
        assert_eq!(pop.len(), 4);
        assert_eq!(pop.unevaluated_count(), 4);
        assert!(pop.iter().all(|c| space().contains(&c.config)));
    }

    #[test]
    fn seeds_are_returned_before_any_mutation() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut pop = Population::new();
        pop.push(Candidate::evaluated(config("A", "X"), 3.0));
        pop.push(Candidate::unevaluated(config("B", "Y")));

        let offspring = pop.next_offspring(&space(), &mut rng).unwrap();
        assert_eq!(offspring, Candidate::unevaluated(config("B", "Y")));
        assert_eq!(pop.len(), 1);
    }

    #[test]
    fn tournament_keeps_winner_and_drops_loser() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pop = Population::new();
        pop.push(Candidate::evaluated(config("A", "X"), 1.0));
        pop.push(Candidate::evaluated(config("B", "Y"), 9.0));

        let offspring = pop.next_offspring(&space(), &mut rng).unwrap();
        assert_eq!(pop.len(), 1);
        let survivor = pop.iter().next().unwrap();
        assert_eq!(survivor.fitness, Some(9.0));

        // Offspring differs from the winner in at most one position.
        let diffs = offspring
            .config
            .iter()
            .filter(|(k, v)| survivor.config.get(*k) != Some(*v))
            .count();
        assert!(diffs <= 1);
        assert!(offspring.fitness.is_none());
    }

    #[test]
    fn single_member_mutates_without_discarding() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut pop = Population::new();
        pop.push(Candidate::evaluated(config("A", "X"), 2.0));

        let offspring = pop.next_offspring(&space(), &mut rng).unwrap();
        assert_eq!(pop.len(), 1);
        assert!(space().contains(&offspring.config));
    }

    #[test]
    fn empty_population_is_an_error() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut pop = Population::new();
        assert_eq!(
            pop.next_offspring(&space(), &mut rng),
            Err(SchedulerError::EmptyPopulation)
        );
    }

    #[test]
    fn best_ignores_unevaluated() {
        let mut pop = Population::new();
        pop.push(Candidate::unevaluated(config("A", "X")));
        pop.push(Candidate::evaluated(config("A", "Y"), -1.0));
        pop.push(Candidate::evaluated(config("B", "Y"), 4.5));
        assert_eq!(pop.best().unwrap().fitness, Some(4.5));
    }
}
