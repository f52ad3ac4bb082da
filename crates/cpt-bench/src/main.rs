use std::path::PathBuf;

use clap::Parser;

use cpt_bench::config::{EvaluationConfig, ResolvedOutputs};
use cpt_bench::logging::init_logging;
use cpt_bench::runner::EvaluationRunner;
use cpt_core::ToolboxInfo;

/// Monte-Carlo evaluation harness for constrained multi-agent policies.
#[derive(Debug, Parser)]
#[command(
    name = "cpt-bench",
    author,
    version,
    about = "Deterministic Monte-Carlo evaluation of CMDP/CPOMDP policies"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "bench/toy_cmdp.yaml")]
    config: PathBuf,

    /// Override the run identifier (substitutes {run_id} templates).
    #[arg(long, value_name = "RUN_ID")]
    run_id: Option<String>,

    /// Override the number of simulated trajectories.
    #[arg(long, value_name = "RUNS")]
    runs: Option<usize>,

    /// Override the RNG seed of the simulation.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Exit after loading the configuration and instance (nothing is simulated).
    #[arg(long)]
    validate_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = EvaluationConfig::from_path(&cli.config)?;

    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }

    if let Some(runs) = cli.runs {
        config.simulation.runs = runs;
    }

    if let Some(seed) = cli.seed {
        config.simulation.seed = Some(seed);
    }

    config.validate()?;

    let outputs: ResolvedOutputs = config.resolved_outputs();
    let run_id = config.run_id.clone();
    let runs = config.simulation.runs;

    println!(
        "{} {}: {}",
        ToolboxInfo::name(),
        ToolboxInfo::version(),
        ToolboxInfo::description()
    );

    let _logging_guard = init_logging(&config.logging, &outputs, &run_id)?;
    let runner = EvaluationRunner::new(config, outputs)?;
    let instance = runner.instance();
    println!(
        "Loaded '{run_id}': {} instance with {} agent{}, horizon {}, {} oracle",
        instance.kind(),
        instance.num_agents(),
        if instance.num_agents() == 1 { "" } else { "s" },
        instance.num_decisions(),
        runner.oracle().name()
    );

    if cli.validate_only {
        println!("Validation-only mode: simulation skipped.");
        return Ok(());
    }

    let summary = runner.run()?;
    println!(
        "Evaluation complete for '{run_id}': {runs} runs → expected reward {:.4}, {} rows at {}",
        summary.expected_reward,
        summary.rows_written,
        summary.jsonl_path.display()
    );
    println!("Summary table: {}", summary.summary_path.display());
    println!("Report (JSON): {}", summary.report_path.display());
    if let Some(plot_path) = summary.plot_path.as_ref() {
        println!("Cost plot: {}", plot_path.display());
    }
    if let Some(telemetry_path) = summary.telemetry_path.as_ref() {
        println!("Telemetry log: {}", telemetry_path.display());
    }

    Ok(())
}
