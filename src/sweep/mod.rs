//! Sweep orchestration
//!
//! Drives the full matrix of training units (preprocessing × dataset ×
//! architecture), isolates failures per unit, and runs the refinement pass
//! (cross-validation and hyperparameter search) over the top-performing
//! architectures. One unit's failure is never fatal to the sweep; every
//! absorbed failure is logged and enumerated in the final report.
//!
//! # Main Components
//!
//! - **SweepOrchestrator**: the per-unit loop with resource gating and
//!   rerun short-circuiting
//! - **Rerun planner**: manifest-backed invalidation of a prior sweep
//! - **Cross-validation / hyperopt**: the refinement pass
//! - **Reports**: consolidated machine- and human-readable output

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointStore, MetricMode};
use crate::config::{
    Architecture, Dataset, EarlyStoppingSettings, EvaluationSettings, ExperimentConfig,
    GradientClippingSettings, PreprocessingConfig, SchedulerKind, TrackingSettings,
};
use crate::error::{Error, Result};
use crate::monitor::{cleanup_old_sweeps, ResourceGate};
use crate::paths::{WorkspacePaths, SWEEP_DIR_PREFIX};
use crate::tracking::{create_tracker, end_run_quietly};
use crate::training::{TrainerBackend, UnitRunner, UnitSummary};
use crate::utils::io::{ensure_dir_exists, write_json_atomic};

pub mod cross_validation;
pub mod hyperopt;
pub mod manifest;
pub mod report;
pub mod rerun;

pub use cross_validation::{AggregatedCvResult, CrossValidator, CvFoldResult};
pub use hyperopt::{HyperoptSearch, HyperoptSummary, RandomSearch, SearchSpace};
pub use manifest::{ArtifactManifest, ManifestEntry, SweepPhase};
pub use report::SweepReport;
pub use rerun::{RerunPlan, RerunTargets};

use cross_validation::AGGREGATED_RESULTS_FILE;
use hyperopt::HYPEROPT_SUMMARY_FILE;
use rerun::{CV_DIR, CV_REPORT_FILE, HYPEROPT_DIR};

/// Free space required before a sweep may start at all
pub const SWEEP_MIN_FREE_GB: f64 = 5.0;

/// Free space required before each unit
pub const UNIT_MIN_FREE_GB: f64 = 2.0;

/// Free space required before each refinement iteration
pub const REFINEMENT_MIN_FREE_GB: f64 = 2.0;

/// Free space required before the hyperparameter-search phase
pub const HYPEROPT_PHASE_MIN_FREE_GB: f64 = 3.0;

/// Hyperparameter report filename at the sweep root
pub const HYPEROPT_REPORT_FILE: &str = "hyperopt_report.json";

/// Prior sweep directories kept by proactive cleanup
const KEEP_NEWEST_SWEEPS: usize = 2;

/// What a sweep should run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepPlan {
    /// Preprocessing configurations to compare
    pub preprocessing: Vec<PreprocessingConfig>,

    /// Datasets to train on
    pub datasets: Vec<Dataset>,

    /// Architectures to compare
    pub architectures: Vec<Architecture>,

    /// Epochs per unit
    pub epochs: u32,

    /// Batch size per unit
    pub batch_size: usize,

    /// Learning rate per unit
    pub learning_rate: f64,

    /// Base random seed
    pub random_seed: u64,

    /// Architectures promoted to the refinement pass
    pub top_n: usize,

    /// Cross-validation fold count
    pub cv_folds: usize,

    /// Hyperparameter-search trial budget per architecture/dataset
    pub hyperopt_trials: usize,

    /// Hyperparameter-search wall-clock budget in seconds
    pub hyperopt_timeout_secs: u64,

    /// Evaluation settings applied to every unit
    pub evaluation: EvaluationSettings,

    /// Tracking settings applied to every unit
    pub tracking: TrackingSettings,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            preprocessing: vec![PreprocessingConfig::enhanced(), PreprocessingConfig::minimal()],
            datasets: vec![Dataset::Dataset1, Dataset::Dataset2],
            architectures: Architecture::ALL.to_vec(),
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            random_seed: 42,
            top_n: 3,
            cv_folds: 5,
            hyperopt_trials: 5,
            hyperopt_timeout_secs: 7200,
            evaluation: EvaluationSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }
}

impl SweepPlan {
    /// Load a plan from a file, format selected by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let plan: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(Error::config(format!(
                    "unsupported sweep plan file extension: {:?}",
                    other
                )))
            }
        };
        Ok(plan)
    }
}

/// Request to rerun parts of a prior sweep
#[derive(Debug, Clone)]
pub struct RerunRequest {
    /// Prior sweep to rerun
    pub experiment_id: String,

    /// Architectures to rerun; empty reruns every architecture
    pub architectures: Vec<Architecture>,

    /// Rerun the cross-validation phase
    pub cross_validation: bool,

    /// Rerun the hyperparameter-search phase
    pub hyperopt: bool,

    /// Ignore existing checkpoints instead of resuming
    pub fresh_start: bool,
}

impl RerunRequest {
    fn runs_architecture(&self, architecture: Architecture) -> bool {
        self.architectures.is_empty() || self.architectures.contains(&architecture)
    }
}

/// Persisted cross-validation phase report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvReport {
    /// Results keyed by `<architecture>_<dataset>`
    pub cv_results: BTreeMap<String, AggregatedCvResult>,

    /// Failed run keys
    pub cv_failed: Vec<String>,
}

/// Persisted hyperparameter phase report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperoptReport {
    /// Results keyed by `<architecture>_<dataset>`
    pub hyperopt_results: BTreeMap<String, HyperoptSummary>,

    /// Failed search keys
    pub hyperopt_failed: Vec<String>,
}

/// Drives a full sweep against a training backend
pub struct SweepOrchestrator<'a> {
    paths: &'a WorkspacePaths,
    backend: &'a dyn TrainerBackend,
    gate: ResourceGate,
}

impl<'a> SweepOrchestrator<'a> {
    /// Create an orchestrator over the given workspace and backend
    pub fn new(paths: &'a WorkspacePaths, backend: &'a dyn TrainerBackend) -> Self {
        let gate = ResourceGate::new(paths.root());
        Self {
            paths,
            backend,
            gate,
        }
    }

    /// Replace the resource gate (for simulation and tests)
    pub fn with_gate(mut self, gate: ResourceGate) -> Self {
        self.gate = gate;
        self
    }

    /// Run the sweep
    ///
    /// Only global resource exhaustion, where no unit can ever start,
    /// surfaces as an error; every other failure is absorbed into the
    /// report's failure lists.
    pub fn run(&self, plan: &SweepPlan, rerun: Option<&RerunRequest>) -> Result<SweepReport> {
        self.paths.ensure()?;

        if !self.gate.has_capacity(SWEEP_MIN_FREE_GB) {
            return Err(Error::resource_exhausted(format!(
                "less than {} GB free before the sweep started",
                SWEEP_MIN_FREE_GB
            )));
        }

        let experiment_id = match rerun {
            Some(request) => {
                let dir = self.paths.sweep_dir(&request.experiment_id);
                if !dir.exists() {
                    return Err(Error::config(format!(
                        "experiment directory not found: {}",
                        dir.display()
                    )));
                }
                info!(experiment_id = request.experiment_id.as_str(), "rerunning sweep");
                request.experiment_id.clone()
            }
            None => {
                // Reclaim space from old sweeps only when starting fresh.
                cleanup_old_sweeps(self.paths.output_dir(), KEEP_NEWEST_SWEEPS, SWEEP_DIR_PREFIX);
                let id = format!("{}{}", SWEEP_DIR_PREFIX, Utc::now().format("%Y%m%d_%H%M%S"));
                info!(experiment_id = id.as_str(), "starting new sweep");
                id
            }
        };

        let sweep_dir = self.paths.sweep_dir(&experiment_id);
        ensure_dir_exists(&sweep_dir)?;
        let mut manifest = ArtifactManifest::load_or_new(&sweep_dir)?;

        // Phase 1: the architecture-comparison matrix.
        let (unit_results, failed_units) =
            self.run_unit_matrix(plan, rerun, &experiment_id, &sweep_dir, &mut manifest);

        // Phase 2: rank architectures by mean accuracy and pick the top N.
        let top = rank_architectures(plan, &unit_results);
        info!(?top, "top architectures selected");

        // Phase 3: cross-validation over the top architectures.
        let (cv_results, failed_cv) =
            self.run_cv_phase(plan, rerun, &experiment_id, &sweep_dir, &top, &mut manifest);

        // Phase 4: hyperparameter search over the top architectures.
        let (hyperopt_results, failed_hyperopt) =
            self.run_hyperopt_phase(plan, rerun, &experiment_id, &sweep_dir, &top, &mut manifest);

        let report = SweepReport {
            experiment_id,
            output_directory: sweep_dir.clone(),
            generated_at: Utc::now(),
            unit_results,
            top_architectures: top.iter().map(|a| a.to_string()).collect(),
            failed_units,
            cv_results,
            failed_cv,
            hyperopt_results,
            failed_hyperopt,
        };

        report.save(&sweep_dir)?;

        if report.has_failures() {
            warn!(
                failed_units = report.failed_units.len(),
                failed_cv = report.failed_cv.len(),
                failed_hyperopt = report.failed_hyperopt.len(),
                "sweep completed with failures"
            );
        } else {
            info!("sweep completed");
        }

        Ok(report)
    }

    fn run_unit_matrix(
        &self,
        plan: &SweepPlan,
        rerun: Option<&RerunRequest>,
        experiment_id: &str,
        sweep_dir: &Path,
        manifest: &mut ArtifactManifest,
    ) -> (BTreeMap<String, UnitSummary>, Vec<String>) {
        let mut unit_results = BTreeMap::new();
        let mut failed_units = Vec::new();

        for preprocessing in &plan.preprocessing {
            for dataset in &plan.datasets {
                for &architecture in &plan.architectures {
                    let unit_id = unit_id(preprocessing, dataset, architecture);
                    let unit_dir = unit_dir(sweep_dir, preprocessing, dataset, architecture);

                    // Rerun short-circuit: reload what is not being rerun.
                    if let Some(request) = rerun {
                        if !request.runs_architecture(architecture) {
                            match UnitSummary::load(&unit_dir) {
                                Ok(summary) => {
                                    info!(unit = unit_id.as_str(), "reusing previous unit result");
                                    unit_results.insert(unit_id, summary);
                                }
                                Err(_) => {
                                    info!(unit = unit_id.as_str(), "skipping unit (not in rerun targets, no prior result)");
                                }
                            }
                            continue;
                        }
                    }

                    // Gate immediately before the unit consumes resources.
                    if !self.gate.has_capacity(UNIT_MIN_FREE_GB) {
                        error!(unit = unit_id.as_str(), "disk space critical, skipping unit");
                        failed_units.push(unit_id);
                        continue;
                    }

                    info!(unit = unit_id.as_str(), "running unit");
                    let config = self.unit_config(
                        plan,
                        experiment_id,
                        preprocessing,
                        dataset,
                        architecture,
                        &unit_dir,
                        rerun.map(|r| r.fresh_start).unwrap_or(false),
                    );

                    let record = ManifestEntry {
                        unit_id: unit_id.clone(),
                        architecture: architecture.to_string(),
                        dataset: dataset.to_string(),
                        phase: SweepPhase::Architecture,
                        artifact_paths: vec![relative_unit_path(preprocessing, dataset, architecture)],
                    };
                    if let Err(e) = manifest.record(record) {
                        warn!("failed to record manifest entry: {}", e);
                    }

                    let mut tracker = create_tracker(&config.tracking, &unit_dir.join("logs"));
                    match UnitRunner::new(self.backend).run(&config, tracker.as_mut()) {
                        Ok(summary) => {
                            // Space cleanup: drop non-best checkpoints.
                            match CheckpointStore::new(
                                unit_dir.join("checkpoints"),
                                &config.checkpointing,
                            ) {
                                Ok(store) => store.remove_non_best(),
                                Err(e) => warn!("checkpoint cleanup skipped: {}", e),
                            }
                            unit_results.insert(unit_id, summary);
                        }
                        Err(e) => {
                            error!(unit = unit_id.as_str(), "unit failed: {}", e);
                            failed_units.push(unit_id);
                            // A failed unit must not leave the sink in an
                            // "active run" state.
                            end_run_quietly(tracker.as_mut());
                        }
                    }
                }
            }
        }

        (unit_results, failed_units)
    }

    fn run_cv_phase(
        &self,
        plan: &SweepPlan,
        rerun: Option<&RerunRequest>,
        experiment_id: &str,
        sweep_dir: &Path,
        top: &[Architecture],
        manifest: &mut ArtifactManifest,
    ) -> (BTreeMap<String, AggregatedCvResult>, Vec<String>) {
        let mut cv_results = BTreeMap::new();
        let mut failed_cv = Vec::new();

        // In rerun mode the phase is skipped unless explicitly flagged; prior
        // reports are reloaded as a fallback.
        if rerun.map(|r| !r.cross_validation).unwrap_or(false) {
            info!("skipping cross-validation (not marked for rerunning)");
            match load_cv_report(sweep_dir) {
                Ok(Some(report)) => {
                    cv_results = report.cv_results;
                    failed_cv = report.cv_failed;
                    info!("loaded existing cross-validation results");
                }
                Ok(None) => {}
                Err(e) => warn!("failed to load existing cross-validation results: {}", e),
            }
            return (cv_results, failed_cv);
        }

        if top.is_empty() {
            return (cv_results, failed_cv);
        }

        let cv_dir = sweep_dir.join(CV_DIR);
        let preprocessing = plan.preprocessing.first();

        for &architecture in top {
            if let Some(request) = rerun {
                if !request.architectures.is_empty() && !request.runs_architecture(architecture) {
                    info!(architecture = architecture.as_str(), "skipping cross-validation (not in rerun targets)");
                    continue;
                }
            }

            for dataset in &plan.datasets {
                let key = format!("{}_{}", architecture, dataset);

                if !self.gate.has_capacity(REFINEMENT_MIN_FREE_GB) {
                    error!(run = key.as_str(), "disk space critical, skipping cross-validation");
                    failed_cv.push(key);
                    continue;
                }

                let out_dir = cv_dir.join(architecture.as_str()).join(dataset.as_str());
                match self.run_cross_validation(
                    plan,
                    experiment_id,
                    architecture,
                    dataset,
                    preprocessing,
                    &out_dir,
                ) {
                    Ok(result) if !result.folds.is_empty() => {
                        if let Err(e) =
                            write_json_atomic(out_dir.join(AGGREGATED_RESULTS_FILE), &result)
                        {
                            warn!("failed to save aggregated cross-validation results: {}", e);
                        }
                        let record = ManifestEntry {
                            unit_id: format!("cv_{}", key),
                            architecture: architecture.to_string(),
                            dataset: dataset.to_string(),
                            phase: SweepPhase::CrossValidation,
                            artifact_paths: vec![format!(
                                "{}/{}/{}",
                                CV_DIR, architecture, dataset
                            )],
                        };
                        if let Err(e) = manifest.record(record) {
                            warn!("failed to record manifest entry: {}", e);
                        }
                        cv_results.insert(key, result);
                    }
                    Ok(_) => {
                        warn!(run = key.as_str(), "no valid folds from cross-validation");
                        failed_cv.push(key);
                    }
                    Err(e) => {
                        error!(run = key.as_str(), "cross-validation failed: {}", e);
                        failed_cv.push(key);
                    }
                }
            }
        }

        let report = CvReport {
            cv_results: cv_results.clone(),
            cv_failed: failed_cv.clone(),
        };
        if let Err(e) = write_json_atomic(sweep_dir.join(CV_REPORT_FILE), &report) {
            warn!("failed to save cross-validation report: {}", e);
        }

        (cv_results, failed_cv)
    }

    fn run_cross_validation(
        &self,
        plan: &SweepPlan,
        experiment_id: &str,
        architecture: Architecture,
        dataset: &Dataset,
        preprocessing: Option<&PreprocessingConfig>,
        out_dir: &Path,
    ) -> Result<AggregatedCvResult> {
        ensure_dir_exists(out_dir)?;

        let labels = self.backend.dataset_labels(dataset, preprocessing)?;
        let validator = CrossValidator::new(plan.cv_folds, plan.random_seed);

        let mut template = ExperimentConfig::new(
            format!("CV Experiment - {} - {}", architecture, dataset),
            dataset.clone(),
            architecture,
            out_dir,
        );
        template.experiment_id = format!("{}_cv_{}_{}", experiment_id, architecture, dataset);
        template.preprocessing = preprocessing.cloned();
        template.epochs = plan.epochs;
        template.batch_size = plan.batch_size;
        template.learning_rate = plan.learning_rate;
        template.random_seed = plan.random_seed;
        template.early_stopping = accuracy_early_stopping();
        template.evaluation = plan.evaluation.clone();
        template.tracking = plan.tracking.clone();

        validator.run(&labels, |fold, _seed, split| {
            let fold_dir = out_dir.join(format!("fold_{}", fold + 1));
            let config = template.for_fold(fold, &fold_dir);

            let mut tracker = create_tracker(&config.tracking, &fold_dir.join("logs"));
            match UnitRunner::new(self.backend).run_fold(&config, split, tracker.as_mut()) {
                Ok(summary) => {
                    match CheckpointStore::new(fold_dir.join("checkpoints"), &config.checkpointing)
                    {
                        Ok(store) => store.remove_non_best(),
                        Err(e) => warn!("checkpoint cleanup skipped: {}", e),
                    }
                    Ok(summary.test_metrics.into_iter().next().unwrap_or_default())
                }
                Err(e) => {
                    end_run_quietly(tracker.as_mut());
                    Err(e)
                }
            }
        })
    }

    fn run_hyperopt_phase(
        &self,
        plan: &SweepPlan,
        rerun: Option<&RerunRequest>,
        experiment_id: &str,
        sweep_dir: &Path,
        top: &[Architecture],
        manifest: &mut ArtifactManifest,
    ) -> (BTreeMap<String, HyperoptSummary>, Vec<String>) {
        let mut hyperopt_results = BTreeMap::new();
        let mut failed_hyperopt = Vec::new();

        if rerun.map(|r| !r.hyperopt).unwrap_or(false) {
            info!("skipping hyperparameter optimization (not marked for rerunning)");
            match load_hyperopt_report(sweep_dir) {
                Ok(Some(report)) => {
                    hyperopt_results = report.hyperopt_results;
                    failed_hyperopt = report.hyperopt_failed;
                    info!("loaded existing hyperparameter optimization results");
                }
                Ok(None) => {}
                Err(e) => warn!("failed to load existing hyperopt results: {}", e),
            }
            return (hyperopt_results, failed_hyperopt);
        }

        if top.is_empty() {
            return (hyperopt_results, failed_hyperopt);
        }

        if !self.gate.has_capacity(HYPEROPT_PHASE_MIN_FREE_GB) {
            warn!("not enough disk space for hyperparameter optimization, skipping phase");
            return (hyperopt_results, failed_hyperopt);
        }

        let hyperopt_dir = sweep_dir.join(HYPEROPT_DIR);

        for &architecture in top {
            if let Some(request) = rerun {
                if !request.architectures.is_empty() && !request.runs_architecture(architecture) {
                    info!(architecture = architecture.as_str(), "skipping hyperopt (not in rerun targets)");
                    continue;
                }
            }

            for dataset in &plan.datasets {
                let key = format!("{}_{}", architecture, dataset);

                if !self.gate.has_capacity(REFINEMENT_MIN_FREE_GB) {
                    error!(run = key.as_str(), "disk space critical, skipping hyperopt");
                    failed_hyperopt.push(key);
                    continue;
                }

                let out_dir = hyperopt_dir.join(&key);
                match self.run_hyperopt(plan, experiment_id, architecture, dataset, &out_dir) {
                    Ok(summary) => {
                        let record = ManifestEntry {
                            unit_id: format!("hyperopt_{}", key),
                            architecture: architecture.to_string(),
                            dataset: dataset.to_string(),
                            phase: SweepPhase::Hyperopt,
                            artifact_paths: vec![format!("{}/{}", HYPEROPT_DIR, key)],
                        };
                        if let Err(e) = manifest.record(record) {
                            warn!("failed to record manifest entry: {}", e);
                        }
                        hyperopt_results.insert(key, summary);
                    }
                    Err(e) => {
                        error!(run = key.as_str(), "hyperparameter optimization failed: {}", e);
                        failed_hyperopt.push(key);
                    }
                }
            }
        }

        let report = HyperoptReport {
            hyperopt_results: hyperopt_results.clone(),
            hyperopt_failed: failed_hyperopt.clone(),
        };
        if let Err(e) = write_json_atomic(sweep_dir.join(HYPEROPT_REPORT_FILE), &report) {
            warn!("failed to save hyperopt report: {}", e);
        }

        (hyperopt_results, failed_hyperopt)
    }

    fn run_hyperopt(
        &self,
        plan: &SweepPlan,
        experiment_id: &str,
        architecture: Architecture,
        dataset: &Dataset,
        out_dir: &Path,
    ) -> Result<HyperoptSummary> {
        ensure_dir_exists(out_dir)?;

        let mut template = ExperimentConfig::new(
            format!("Hyperopt - {} - {}", architecture, dataset),
            dataset.clone(),
            architecture,
            out_dir,
        );
        template.experiment_id = format!("{}_hyperopt_{}_{}", experiment_id, architecture, dataset);
        template.preprocessing = plan.preprocessing.first().cloned();
        template.random_seed = plan.random_seed;
        template.early_stopping = accuracy_early_stopping();
        template.evaluation = plan.evaluation.clone();
        template.tracking = plan.tracking.clone();

        let search = HyperoptSearch::new(
            plan.hyperopt_trials,
            Duration::from_secs(plan.hyperopt_timeout_secs),
        );
        let mut optimizer = RandomSearch::new(SearchSpace::default(), plan.random_seed);

        let mut summary = search.run(&mut optimizer, |number, params| {
            let trial_dir = out_dir.join(format!("trial_{}", number));
            let config = template.for_trial(
                number,
                params.epochs,
                params.batch_size,
                params.learning_rate,
                &trial_dir,
            );

            let mut tracker = create_tracker(&config.tracking, &trial_dir.join("logs"));
            match UnitRunner::new(self.backend).run(&config, tracker.as_mut()) {
                Ok(unit) => {
                    match CheckpointStore::new(trial_dir.join("checkpoints"), &config.checkpointing)
                    {
                        Ok(store) => store.remove_non_best(),
                        Err(e) => warn!("checkpoint cleanup skipped: {}", e),
                    }
                    Ok(hyperopt::extract_score(&unit))
                }
                Err(e) => {
                    end_run_quietly(tracker.as_mut());
                    Err(e)
                }
            }
        });

        // One final unit with the best-found hyperparameters.
        if let Some(params) = summary.best_params {
            let best_dir = out_dir.join("best_params");
            let mut config = template.for_trial(
                summary.trials.len(),
                params.epochs,
                params.batch_size,
                params.learning_rate,
                &best_dir,
            );
            config.experiment_id = format!("{}_best", template.experiment_id);
            config.experiment_name = format!("Best Hyperparameters - {} - {}", architecture, dataset);

            let mut tracker = create_tracker(&config.tracking, &best_dir.join("logs"));
            match UnitRunner::new(self.backend).run(&config, tracker.as_mut()) {
                Ok(unit) => summary.final_summary = Some(unit),
                Err(e) => {
                    error!("final best-parameter run failed: {}", e);
                    end_run_quietly(tracker.as_mut());
                }
            }
        }

        write_json_atomic(out_dir.join(HYPEROPT_SUMMARY_FILE), &summary)?;
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn unit_config(
        &self,
        plan: &SweepPlan,
        experiment_id: &str,
        preprocessing: &PreprocessingConfig,
        dataset: &Dataset,
        architecture: Architecture,
        unit_dir: &Path,
        fresh_start: bool,
    ) -> ExperimentConfig {
        let mut config = ExperimentConfig::new(
            format!(
                "Architecture Comparison - {} preprocessing - {} - {}",
                preprocessing.name, dataset, architecture
            ),
            dataset.clone(),
            architecture,
            unit_dir,
        );
        config.experiment_id = format!(
            "{}_{}",
            experiment_id,
            unit_id(preprocessing, dataset, architecture)
        );
        config.preprocessing = Some(preprocessing.clone());
        config.epochs = plan.epochs;
        config.batch_size = plan.batch_size;
        config.learning_rate = plan.learning_rate;
        config.random_seed = plan.random_seed;
        config.early_stopping = accuracy_early_stopping();
        config.gradient_clipping = GradientClippingSettings {
            enabled: true,
            max_norm: 1.0,
            adaptive: false,
        };
        config.lr_scheduler.kind = SchedulerKind::ReduceOnPlateau;
        config.checkpointing.resumable = !fresh_start;
        config.evaluation = plan.evaluation.clone();
        config.tracking = plan.tracking.clone();
        config
    }
}

/// Identity of one unit: `<preprocessing>_<dataset>_<architecture>`
pub fn unit_id(
    preprocessing: &PreprocessingConfig,
    dataset: &Dataset,
    architecture: Architecture,
) -> String {
    format!("{}_{}_{}", preprocessing.name, dataset, architecture)
}

fn unit_dir(
    sweep_dir: &Path,
    preprocessing: &PreprocessingConfig,
    dataset: &Dataset,
    architecture: Architecture,
) -> PathBuf {
    sweep_dir
        .join(format!("{}_preprocessing", preprocessing.name))
        .join(dataset.as_str())
        .join(architecture.as_str())
}

fn relative_unit_path(
    preprocessing: &PreprocessingConfig,
    dataset: &Dataset,
    architecture: Architecture,
) -> String {
    format!(
        "{}_preprocessing/{}/{}",
        preprocessing.name, dataset, architecture
    )
}

fn accuracy_early_stopping() -> EarlyStoppingSettings {
    EarlyStoppingSettings {
        enabled: true,
        patience: 10,
        min_delta: 0.001,
        metric: "accuracy".to_string(),
        mode: MetricMode::Max,
    }
}

/// Rank architectures by mean test accuracy across all their units
fn rank_architectures(
    plan: &SweepPlan,
    unit_results: &BTreeMap<String, UnitSummary>,
) -> Vec<Architecture> {
    let mut ranked: Vec<(Architecture, f64)> = plan
        .architectures
        .iter()
        .filter_map(|&architecture| {
            let scores: Vec<f64> = unit_results
                .values()
                .filter(|s| s.architecture == architecture)
                .filter_map(|s| s.accuracy())
                .collect();
            if scores.is_empty() {
                None
            } else {
                Some((architecture, scores.iter().sum::<f64>() / scores.len() as f64))
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
        .into_iter()
        .take(plan.top_n)
        .map(|(architecture, _)| architecture)
        .collect()
}

fn load_cv_report(sweep_dir: &Path) -> Result<Option<CvReport>> {
    let path = sweep_dir.join(CV_REPORT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn load_hyperopt_report(sweep_dir: &Path) -> Result<Option<HyperoptReport>> {
    let path = sweep_dir.join(HYPEROPT_REPORT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}
