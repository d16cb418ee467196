//! Panelforge search engine: evaluator dispatch and the round-based driver.

pub mod evaluator;
pub mod runner;

pub use evaluator::{CommandEvaluator, EvaluationRequest, Evaluator};
pub use runner::SearchRunner;
