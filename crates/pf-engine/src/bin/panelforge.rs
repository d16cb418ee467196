//! Panelforge driver: evolves gene panels by repeatedly scoring them with an
//! external command.
//!
//! Usage:
//!   panelforge --objmode overall --search-space-path search.json
//!   RUST_LOG=debug panelforge --objmode cts --population-size 64 --seed 7

use anyhow::Context;
use clap::Parser;
use pf_data::{load_search_space, PanelStore};
use pf_engine::{CommandEvaluator, SearchRunner};
use pf_optimizer::{ObjectiveDirection, SearchConfig, SearchSpace};
use pf_types::ObjectiveMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "panelforge")]
#[command(about = "Evolutionary search for gene panels scored by an external evaluator")]
struct Args {
    /// Path of the scRNA-seq dataset passed to the scoring script
    #[arg(long, default_value = "./annotated_seurat_filtered.rds")]
    dataset_path: String,

    /// Number of genes in a panel
    #[arg(long, default_value_t = 200)]
    panel_num: usize,

    /// JSON file with the candidate gene list (or a position -> genes map)
    #[arg(long, default_value = "./search.json")]
    search_space_path: PathBuf,

    /// Objective to optimize
    #[arg(long, value_parser = ["overall", "cts", "corr", "pathway", "spatial", "tv"])]
    objmode: String,

    /// Direction of optimization
    #[arg(long, default_value = "maximize", value_parser = ["maximize", "minimize"])]
    optimize_mode: String,

    /// Initial population size; also the cap on running trials
    #[arg(long, default_value_t = 50)]
    population_size: usize,

    /// Trials evaluated in parallel per round
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Total trials to issue
    #[arg(long, default_value_t = 2000)]
    max_trials: usize,

    /// Evaluator executable
    #[arg(long, default_value = "Rscript")]
    trial_command: String,

    /// Scoring script handed to the evaluator
    #[arg(long, default_value = "scores.R")]
    script_path: String,

    /// Directory that receives panels, scores and reward logs
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let objective = ObjectiveMode::from_name(&args.objmode);
    let direction = match args.optimize_mode.as_str() {
        "minimize" => ObjectiveDirection::Minimize,
        _ => ObjectiveDirection::Maximize,
    };
    println!("Objective: {objective}");

    let positions = load_search_space(&args.search_space_path, args.panel_num)
        .with_context(|| format!("loading {}", args.search_space_path.display()))?;
    let space = positions
        .into_iter()
        .fold(SearchSpace::new(), |space, (id, values)| space.add_position(id, values));

    let mut config = SearchConfig::new(format!("panel_search_{objective}"), objective)
        .with_population_size(args.population_size)
        .with_concurrency(args.concurrency)
        .with_max_trials(args.max_trials)
        .with_direction(direction);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let store = PanelStore::new(&args.work_dir, objective);
    let evaluator = CommandEvaluator::rscript(args.trial_command, args.script_path, args.dataset_path);

    let mut runner = SearchRunner::new(config, space, store, evaluator)?;
    let status = runner.run().await?;

    println!();
    println!("=== SEARCH RESULTS ===");
    println!("  Completed:  {}", status.trials_completed);
    println!("  Failed:     {}", status.trials_failed);
    if let Some(best) = &status.best_trial {
        println!("  Best trial: {} (reward {})", best.trial_id, best.reward);
        println!("{}", serde_json::to_string_pretty(&best.config)?);
    }

    Ok(())
}
