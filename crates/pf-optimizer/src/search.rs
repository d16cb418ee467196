//! Search space definitions and random config generation.

use pf_types::{PanelConfig, SearchSpaceError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One slot of a panel and the values it may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDef {
    /// Position identifier (e.g. "1" .. "200").
    pub id: String,
    /// Candidate values, sampled uniformly.
    pub values: Vec<String>,
}

/// The full search space: an ordered list of positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub positions: Vec<PositionDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
        }
    }

    pub fn add_position(mut self, id: impl Into<String>, values: Vec<String>) -> Self {
        self.positions.push(PositionDef {
            id: id.into(),
            values,
        });
        self
    }

    /// `count` positions named "1" ..= "count", every one drawing from the
    /// same candidate list.
    pub fn uniform(count: usize, values: &[String]) -> Self {
        (1..=count).fold(Self::new(), |space, i| {
            space.add_position(i.to_string(), values.to_vec())
        })
    }

    pub fn from_map(map: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            positions: map
                .into_iter()
                .map(|(id, values)| PositionDef { id, values })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position_ids(&self) -> impl Iterator<Item = &str> {
        self.positions.iter().map(|p| p.id.as_str())
    }

    pub fn candidates(&self, position: &str) -> Option<&[String]> {
        self.positions
            .iter()
            .find(|p| p.id == position)
            .map(|p| p.values.as_slice())
    }

    /// Check that position ids are unique and every candidate list is non-empty.
    pub fn validate(&self) -> Result<(), SearchSpaceError> {
        if self.positions.is_empty() {
            return Err(SearchSpaceError::Empty);
        }
        let mut seen = HashSet::new();
        for position in &self.positions {
            if !seen.insert(position.id.as_str()) {
                return Err(SearchSpaceError::DuplicatePosition {
                    position: position.id.clone(),
                });
            }
            if position.values.is_empty() {
                return Err(SearchSpaceError::EmptyCandidates {
                    position: position.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// True when `config` has exactly one value per position and each value
    /// is one of that position's candidates.
    pub fn contains(&self, config: &PanelConfig) -> bool {
        config.len() == self.positions.len()
            && self
                .positions
                .iter()
                .all(|p| config.get(&p.id).is_some_and(|v| p.values.contains(v)))
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Which positions [`generate_config`] draws fresh values for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RerollMask {
    reroll: BTreeSet<String>,
}

impl RerollMask {
    /// Every position of `space` is re-rolled.
    pub fn all(space: &SearchSpace) -> Self {
        Self {
            reroll: space.positions.iter().map(|p| p.id.clone()).collect(),
        }
    }

    /// Only `position` is re-rolled.
    pub fn only(position: impl Into<String>) -> Self {
        Self {
            reroll: BTreeSet::from([position.into()]),
        }
    }

    pub fn from_flags(flags: &BTreeMap<String, bool>) -> Self {
        Self {
            reroll: flags
                .iter()
                .filter(|(_, on)| **on)
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }

    pub fn is_set(&self, position: &str) -> bool {
        self.reroll.contains(position)
    }
}

/// Build one config over `space`.
///
/// Masked positions get a value drawn uniformly from their candidates;
/// all other positions are copied from `base`.
pub fn generate_config<R: Rng>(
    space: &SearchSpace,
    mask: &RerollMask,
    rng: &mut R,
    base: Option<&PanelConfig>,
) -> Result<PanelConfig, SearchSpaceError> {
    let mut config = PanelConfig::new();

    for position in &space.positions {
        let value = if mask.is_set(&position.id) {
            if position.values.is_empty() {
                return Err(SearchSpaceError::EmptyCandidates {
                    position: position.id.clone(),
                });
            }
            let idx = rng.random_range(0..position.values.len());
            position.values[idx].clone()
        } else {
            base.and_then(|b| b.get(&position.id))
                .cloned()
                .ok_or_else(|| SearchSpaceError::MissingBaseValue {
                    position: position.id.clone(),
                })?
        };
        config.insert(position.id.clone(), value);
    }

    Ok(config)
}
