use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Select};
use expsweep::config::ExperimentConfig;
use expsweep::sweep::{rerun, RerunRequest, RerunTargets, SweepOrchestrator, SweepPlan, SweepReport};
use expsweep::{Architecture, SyntheticTrainer, WorkspacePaths};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "expsweep")]
#[command(about = "Experiment sweep orchestration with checkpoint/resume and selective reruns", long_about = None)]
struct Cli {
    /// Workspace root (data and outputs live underneath)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new comprehensive sweep
    Run {
        /// Sweep plan file (.json or .yaml); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Rerun parts of an existing sweep
    Rerun {
        /// Sweep to rerun; interactive selection when omitted
        #[arg(short, long)]
        experiment_id: Option<String>,

        /// Architectures to rerun, comma-separated, or "all"
        #[arg(short, long)]
        models: Option<String>,

        /// Force rerun of cross-validation
        #[arg(long)]
        rerun_cv: bool,

        /// Force rerun of hyperparameter optimization
        #[arg(long)]
        rerun_hyperopt: bool,

        /// Train from scratch instead of resuming from checkpoints
        #[arg(long)]
        fresh_start: bool,

        /// Confirm deletions without prompting
        #[arg(short = 'y', long)]
        yes: bool,

        /// Sweep plan file (.json or .yaml); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate an experiment configuration file
    Config {
        /// Configuration file to validate (.json or .yaml)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Re-emit the consolidated report of a stored sweep
    Report {
        /// Sweep to report on
        #[arg(short, long)]
        experiment_id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = WorkspacePaths::new(&cli.workspace);

    match cli.command {
        Commands::Run { config } => run_sweep(&paths, config),
        Commands::Rerun {
            experiment_id,
            models,
            rerun_cv,
            rerun_hyperopt,
            fresh_start,
            yes,
            config,
        } => rerun_sweep(
            &paths,
            experiment_id,
            models,
            rerun_cv,
            rerun_hyperopt,
            fresh_start,
            yes,
            config,
        ),
        Commands::Config { file } => validate_config(file),
        Commands::Report { experiment_id } => show_report(&paths, &experiment_id),
    }
}

fn load_plan(config: Option<PathBuf>) -> Result<SweepPlan> {
    match config {
        Some(path) => {
            let plan = SweepPlan::load(&path)
                .with_context(|| format!("failed to load sweep plan from {}", path.display()))?;
            info!("loaded sweep plan from {}", path.display());
            Ok(plan)
        }
        None => Ok(SweepPlan::default()),
    }
}

fn run_sweep(paths: &WorkspacePaths, config: Option<PathBuf>) -> Result<()> {
    let plan = load_plan(config)?;

    info!("starting new comprehensive sweep");
    let backend = SyntheticTrainer::default();
    let report = SweepOrchestrator::new(paths, &backend).run(&plan, None)?;

    print_report_summary(&report);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn rerun_sweep(
    paths: &WorkspacePaths,
    experiment_id: Option<String>,
    models: Option<String>,
    rerun_cv: bool,
    rerun_hyperopt: bool,
    fresh_start: bool,
    yes: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    let experiment_id = match experiment_id {
        Some(id) => id,
        None => select_experiment(paths)?,
    };

    let sweep_dir = paths.sweep_dir(&experiment_id);
    if !sweep_dir.exists() {
        bail!("experiment directory not found: {}", sweep_dir.display());
    }
    println!("Preparing to rerun experiment: {}", experiment_id);

    let architectures = match models {
        Some(list) => parse_models(&list)?,
        None => {
            let input: String = Input::new()
                .with_prompt("Models to rerun (comma-separated, or 'all')")
                .interact_text()?;
            parse_models(&input)?
        }
    };

    // Plan the deletions needed for clean results.
    let targets = RerunTargets {
        architectures: architectures.clone(),
        cross_validation: rerun_cv,
        hyperopt: rerun_hyperopt,
    };
    let plan = rerun::plan(&sweep_dir, &targets)?;

    if plan.is_empty() {
        println!("No paths found matching the selected components to rerun.");
    } else {
        println!("\nThe following paths will be removed for rerunning:");
        for label in plan.labels() {
            println!("  - {}", label);
        }

        let confirmed = yes
            || Confirm::new()
                .with_prompt("WARNING: this will permanently delete data. Confirm deletion?")
                .default(false)
                .interact()?;

        if confirmed {
            let outcome = rerun::execute(plan);
            println!(
                "Removed {} paths ({} already gone, {} failed).",
                outcome.removed.len(),
                outcome.skipped.len(),
                outcome.failed.len()
            );
            if !outcome.failed.is_empty() {
                warn!("some paths could not be removed; the rerun may see stale data");
            }
        } else {
            println!("Deletion cancelled.");
            let proceed = Confirm::new()
                .with_prompt("Continue with rerun anyway? This may affect results.")
                .default(false)
                .interact()?;
            if !proceed {
                return Ok(());
            }
        }
    }

    let request = RerunRequest {
        experiment_id,
        architectures,
        cross_validation: rerun_cv,
        hyperopt: rerun_hyperopt,
        fresh_start,
    };

    println!("\nStarting experiment rerun...");
    let plan = load_plan(config)?;
    let backend = SyntheticTrainer::default();
    let report = SweepOrchestrator::new(paths, &backend).run(&plan, Some(&request))?;

    print_report_summary(&report);
    println!("\nExperiment rerun completed!");
    Ok(())
}

/// Interactive experiment selection, newest first
fn select_experiment(paths: &WorkspacePaths) -> Result<String> {
    let sweeps = paths.list_sweeps()?;
    if sweeps.is_empty() {
        bail!("no existing experiments found");
    }

    let names: Vec<String> = sweeps
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
        .collect();

    let index = Select::new()
        .with_prompt("Select experiment to rerun")
        .items(&names)
        .default(0)
        .interact()?;

    Ok(names[index].clone())
}

fn parse_models(input: &str) -> Result<Vec<Architecture>> {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("all") {
        return Ok(Vec::new());
    }
    input
        .split(',')
        .map(|name| {
            Architecture::from_str(name.trim().to_lowercase().as_str())
                .map_err(anyhow::Error::from)
        })
        .collect()
}

fn validate_config(path: PathBuf) -> Result<()> {
    let config = ExperimentConfig::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    println!("Configuration is valid.");
    println!("  - Experiment: {} ({})", config.experiment_name, config.experiment_id);
    println!("  - Architecture: {}", config.architecture);
    println!("  - Dataset: {}", config.dataset);
    println!(
        "  - Training: {} epochs, batch size {}, lr {}",
        config.epochs, config.batch_size, config.learning_rate
    );
    println!("  - Config version: {}", config.config_version);
    Ok(())
}

fn show_report(paths: &WorkspacePaths, experiment_id: &str) -> Result<()> {
    let sweep_dir = paths.sweep_dir(experiment_id);
    let report = SweepReport::load(&sweep_dir)
        .with_context(|| format!("no report found under {}", sweep_dir.display()))?;

    println!("{}", report.render_markdown());
    Ok(())
}

fn print_report_summary(report: &SweepReport) {
    println!("\n{}", "=".repeat(72));
    println!("Sweep completed: {}", report.experiment_id);
    println!("Results saved to: {}", report.output_directory.display());
    println!(
        "Units: {} completed, {} failed",
        report.unit_results.len(),
        report.failed_units.len()
    );
    if !report.top_architectures.is_empty() {
        println!("Top architectures: {}", report.top_architectures.join(", "));
    }

    if report.has_failures() {
        println!("\nFailures (skipped, sweep continued):");
        for failed in &report.failed_units {
            println!("  - unit {}", failed);
        }
        for failed in &report.failed_cv {
            println!("  - cross-validation {}", failed);
        }
        for failed in &report.failed_hyperopt {
            println!("  - hyperopt {}", failed);
        }
    }
    println!("{}", "=".repeat(72));
}
