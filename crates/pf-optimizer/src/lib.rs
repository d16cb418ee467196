//! # pf-optimizer
//!
//! Population-based panel search for Panelforge.
//!
//! Provides the discrete search space and config generator, the candidate
//! population with its tournament-selection offspring procedure, and the
//! trial scheduler that admits, ingests and recovers trials under a
//! concurrency cap.

mod population;
mod scheduler;
mod search;
mod trial;

pub use population::{Candidate, Population};
pub use scheduler::{Admission, SchedulerConfig, TrialOutcome, TrialScheduler};
pub use search::{generate_config, PositionDef, RerollMask, SearchSpace};
pub use trial::{
    ObjectiveDirection, SearchConfig, SearchId, SearchState, SearchStatus, TrialRecord,
};
