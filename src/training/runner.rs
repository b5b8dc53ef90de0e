//! Unit execution with checkpoint/resume
//!
//! [`UnitRunner`] drives one training unit end to end: resume from the
//! highest-epoch checkpoint when allowed, run the epoch loop against the
//! external session, keep best-model bookkeeping and checkpoint history, stop
//! early when the monitor says so, then evaluate the best model on the test
//! split.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, ImprovementRule, TrainingCheckpoint};
use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::monitor::{EarlyStopping, ResourceSampler};
use crate::tracking::ExperimentTracker;
use crate::training::{TrainerBackend, TrainerState, UnitSummary};
use crate::utils::io::{ensure_dir_exists, write_json_atomic};

/// Sampling interval for the unit's resource monitor
const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded join timeout for the resource sampler
const SAMPLER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs training units against an external backend
pub struct UnitRunner<'a> {
    backend: &'a dyn TrainerBackend,
}

impl<'a> UnitRunner<'a> {
    /// Create a runner over the given backend
    pub fn new(backend: &'a dyn TrainerBackend) -> Self {
        Self { backend }
    }

    /// Execute one unit to completion
    ///
    /// Interruptions are recoverable: rerunning with the same config resumes
    /// from the highest-epoch checkpoint and reproduces the same logical
    /// continuation point, however many times the process restarted.
    pub fn run(
        &self,
        config: &ExperimentConfig,
        tracker: &mut dyn ExperimentTracker,
    ) -> Result<UnitSummary> {
        let session = self.backend.begin_unit(config)?;
        self.run_with(config, session, tracker)
    }

    /// Execute one cross-validation fold as a unit
    pub fn run_fold(
        &self,
        config: &ExperimentConfig,
        split: &crate::sweep::cross_validation::FoldSplit,
        tracker: &mut dyn ExperimentTracker,
    ) -> Result<UnitSummary> {
        let session = self.backend.begin_fold(config, split)?;
        self.run_with(config, session, tracker)
    }

    fn run_with(
        &self,
        config: &ExperimentConfig,
        mut session: Box<dyn crate::training::TrainerSession>,
        tracker: &mut dyn ExperimentTracker,
    ) -> Result<UnitSummary> {
        config.validate()?;
        ensure_dir_exists(&config.results_dir)?;
        let logs_dir = config.results_dir.join("logs");
        ensure_dir_exists(&logs_dir)?;

        // Persist the config in both formats before any training happens.
        config.save()?;

        tracker.start_run(&config.experiment_name)?;
        if config.tracking.track_params {
            tracker.log_params(&unit_params(config))?;
        }

        let store = CheckpointStore::new(
            config.results_dir.join("checkpoints"),
            &config.checkpointing,
        )?;

        // Resume from the latest checkpoint when allowed. A corrupt or
        // unreadable checkpoint abandons resumption and starts fresh.
        let mut start_epoch = 1u32;
        let mut best_score: Option<f64> = None;
        let mut best_epoch: Option<u32> = None;
        let mut best_val_metrics = std::collections::HashMap::new();

        if config.checkpointing.resumable {
            match store.latest()? {
                Some((epoch, path)) => match store.load(&path) {
                    Ok(checkpoint) => {
                        session.restore_state(&TrainerState {
                            model_state: checkpoint.model_state,
                            optimizer_state: checkpoint.optimizer_state,
                            scheduler_state: checkpoint.scheduler_state,
                        })?;
                        start_epoch = epoch + 1;
                        info!(
                            experiment_id = config.experiment_id.as_str(),
                            resumed_from = epoch,
                            "resuming training from checkpoint"
                        );

                        // The best-so-far survives restarts; otherwise a
                        // resumed run would redefine "best" from scratch and
                        // overwrite a better model.
                        if let Some(best) = store.load_best()? {
                            best_score = best
                                .validation_metrics
                                .get(&config.early_stopping.metric)
                                .copied();
                            best_epoch = Some(best.epoch);
                            best_val_metrics = best.validation_metrics;
                        }
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            "failed to load checkpoint, starting fresh: {}", e
                        );
                    }
                },
                None => {}
            }
        }

        let rule = ImprovementRule::new(config.early_stopping.mode, config.early_stopping.min_delta);
        let mut monitor = config
            .early_stopping
            .enabled
            .then(|| EarlyStopping::new(rule, config.early_stopping.patience));

        let sampler = config
            .evaluation
            .resource_monitoring
            .then(|| ResourceSampler::start(SAMPLE_INTERVAL));

        let mut stopped_early = false;
        let mut last_epoch = start_epoch.saturating_sub(1);

        let run_result: Result<()> = (|| {
            for epoch in start_epoch..=config.epochs {
                let train_loss = session.train_epoch(epoch)?;
                let mut val_metrics = session.validate()?;
                val_metrics.insert("train_loss".to_string(), train_loss);
                last_epoch = epoch;

                if config.tracking.track_metrics {
                    tracker.log_metrics(&val_metrics, Some(epoch as u64))?;
                }

                let score = val_metrics.get(&config.early_stopping.metric).copied();
                let is_best = match score {
                    Some(score) => rule.improved(score, best_score),
                    None => {
                        warn!(
                            metric = config.early_stopping.metric.as_str(),
                            epoch, "monitored metric missing from validation metrics"
                        );
                        false
                    }
                };

                if is_best {
                    best_score = score;
                    best_epoch = Some(epoch);
                    best_val_metrics = val_metrics.clone();
                }

                if epoch % config.checkpointing.frequency == 0
                    || (is_best && config.checkpointing.save_best)
                {
                    let state = session.export_state()?;
                    let checkpoint = TrainingCheckpoint {
                        epoch,
                        model_state: state.model_state,
                        optimizer_state: state.optimizer_state,
                        scheduler_state: state.scheduler_state,
                        validation_metrics: val_metrics.clone(),
                        date_saved: Utc::now(),
                        metadata: config
                            .checkpointing
                            .save_metadata
                            .then(|| checkpoint_metadata(config)),
                    };
                    store.save(&checkpoint, is_best && config.checkpointing.save_best)?;
                }

                info!(
                    experiment_id = config.experiment_id.as_str(),
                    epoch,
                    total = config.epochs,
                    train_loss = format!("{:.4}", train_loss).as_str(),
                    val_loss = val_metrics.get("loss").map(|v| format!("{:.4}", v)).unwrap_or_default().as_str(),
                    "epoch completed"
                );

                if let Some(monitor) = monitor.as_mut() {
                    if let Some(score) = score {
                        monitor.observe(score);
                        if monitor.should_stop() {
                            info!(epoch, "early stopping triggered");
                            write_json_atomic(
                                logs_dir.join("early_stopping_trace.json"),
                                &monitor.stopping_record(epoch),
                            )?;
                            stopped_early = true;
                            break;
                        }
                    }
                }
            }
            Ok(())
        })();

        // The sampler is joined (bounded) whether the loop succeeded or not.
        let resource_usage = sampler.map(|s| s.stop(SAMPLER_JOIN_TIMEOUT));
        run_result?;

        // Evaluate the best model when one was kept; otherwise the final
        // weights stand.
        if let Some(best) = store.load_best()? {
            session.restore_state(&TrainerState {
                model_state: best.model_state,
                optimizer_state: best.optimizer_state,
                scheduler_state: best.scheduler_state,
            })?;
        }
        let test_metrics = session.test()?;

        if let Some(usage) = &resource_usage {
            write_json_atomic(logs_dir.join("resource_usage.json"), usage)?;
        }

        let summary = UnitSummary {
            experiment_id: config.experiment_id.clone(),
            experiment_name: config.experiment_name.clone(),
            architecture: config.architecture,
            dataset: config.dataset.clone(),
            preprocessing: config.preprocessing.as_ref().map(|p| p.name.clone()),
            config_version: config.config_version.clone(),
            epochs_completed: last_epoch,
            stopped_early,
            best_epoch,
            best_validation_metrics: best_val_metrics,
            test_metrics: vec![test_metrics],
            resource_usage,
            completed_at: Utc::now(),
        };

        let summary_path = summary.save(&config.results_dir)?;
        if config.tracking.track_artifacts {
            tracker.log_artifact(&summary_path)?;
        }
        tracker.end_run()?;

        Ok(summary)
    }
}

fn unit_params(config: &ExperimentConfig) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("architecture".to_string(), config.architecture.to_string());
    params.insert("dataset".to_string(), config.dataset.to_string());
    params.insert(
        "preprocessing".to_string(),
        config
            .preprocessing
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "default".to_string()),
    );
    params.insert("epochs".to_string(), config.epochs.to_string());
    params.insert("batch_size".to_string(), config.batch_size.to_string());
    params.insert("learning_rate".to_string(), config.learning_rate.to_string());
    params.insert("random_seed".to_string(), config.random_seed.to_string());
    params.insert(
        "early_stopping".to_string(),
        config.early_stopping.enabled.to_string(),
    );
    params.insert(
        "gradient_clipping".to_string(),
        config.gradient_clipping.enabled.to_string(),
    );
    params.insert(
        "lr_scheduler".to_string(),
        config.lr_scheduler.kind.as_str().to_string(),
    );
    params
}

fn checkpoint_metadata(config: &ExperimentConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("experiment_id".to_string(), config.experiment_id.clone()),
        ("experiment_name".to_string(), config.experiment_name.clone()),
        ("architecture".to_string(), config.architecture.to_string()),
        ("dataset".to_string(), config.dataset.to_string()),
        (
            "preprocessing".to_string(),
            config
                .preprocessing
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "None".to_string()),
        ),
        ("config_version".to_string(), config.config_version.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MetricMode;
    use crate::config::{Architecture, Dataset, EarlyStoppingSettings, ExperimentConfig};
    use crate::tracking::NoopTracker;
    use crate::training::synthetic::SyntheticTrainer;
    use tempfile::TempDir;

    fn unit_config(dir: &std::path::Path, epochs: u32) -> ExperimentConfig {
        let mut config = ExperimentConfig::new(
            "runner test",
            Dataset::Dataset1,
            Architecture::Cnn,
            dir.join("unit"),
        );
        config.epochs = epochs;
        config.evaluation.resource_monitoring = false;
        config.early_stopping = EarlyStoppingSettings {
            enabled: false,
            metric: "accuracy".to_string(),
            mode: MetricMode::Max,
            ..EarlyStoppingSettings::default()
        };
        config
    }

    #[test]
    fn test_unit_produces_summary_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let backend = SyntheticTrainer::default();
        let config = unit_config(dir.path(), 5);

        let summary = UnitRunner::new(&backend)
            .run(&config, &mut NoopTracker)
            .unwrap();

        assert_eq!(summary.epochs_completed, 5);
        assert!(!summary.stopped_early);
        assert!(summary.accuracy().unwrap() > 0.0);

        // Config persisted in both formats, summary and checkpoints on disk.
        assert!(config.results_dir.join("experiment_config.json").exists());
        assert!(config.results_dir.join("experiment_config.yaml").exists());
        assert!(config.results_dir.join("unit_summary.json").exists());
        assert!(config
            .results_dir
            .join("checkpoints")
            .join("best_model.ckpt")
            .exists());
    }

    #[test]
    fn test_resume_continues_from_latest_epoch() {
        let dir = TempDir::new().unwrap();
        let backend = SyntheticTrainer::default();

        // First run trains 3 epochs.
        let mut config = unit_config(dir.path(), 3);
        UnitRunner::new(&backend).run(&config, &mut NoopTracker).unwrap();

        // Second run raises the budget to 6; it must resume at epoch 4.
        config.epochs = 6;
        let backend2 = SyntheticTrainer::default();
        let summary = UnitRunner::new(&backend2)
            .run(&config, &mut NoopTracker)
            .unwrap();

        assert_eq!(summary.epochs_completed, 6);
        assert_eq!(backend2.first_trained_epoch(), Some(4));
    }

    #[test]
    fn test_fresh_start_ignores_existing_checkpoints() {
        let dir = TempDir::new().unwrap();
        let backend = SyntheticTrainer::default();

        let mut config = unit_config(dir.path(), 3);
        UnitRunner::new(&backend).run(&config, &mut NoopTracker).unwrap();

        config.checkpointing.resumable = false;
        let backend2 = SyntheticTrainer::default();
        UnitRunner::new(&backend2).run(&config, &mut NoopTracker).unwrap();

        assert_eq!(backend2.first_trained_epoch(), Some(1));
    }

    #[test]
    fn test_corrupt_latest_checkpoint_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let backend = SyntheticTrainer::default();

        let config = unit_config(dir.path(), 3);
        UnitRunner::new(&backend).run(&config, &mut NoopTracker).unwrap();

        // Corrupt the highest-epoch checkpoint.
        let ckpt = config
            .results_dir
            .join("checkpoints")
            .join("checkpoint_epoch_3.ckpt");
        std::fs::write(&ckpt, b"garbage").unwrap();

        let backend2 = SyntheticTrainer::default();
        let summary = UnitRunner::new(&backend2)
            .run(&config, &mut NoopTracker)
            .unwrap();

        assert_eq!(backend2.first_trained_epoch(), Some(1));
        assert_eq!(summary.epochs_completed, 3);
    }

    #[test]
    fn test_early_stopping_breaks_loop_and_writes_trace() {
        let dir = TempDir::new().unwrap();
        // A backend whose accuracy plateaus immediately forces a stop.
        let backend = SyntheticTrainer::default().with_plateau();

        let mut config = unit_config(dir.path(), 50);
        config.early_stopping.enabled = true;
        config.early_stopping.patience = 3;
        config.early_stopping.min_delta = 0.001;

        let summary = UnitRunner::new(&backend)
            .run(&config, &mut NoopTracker)
            .unwrap();

        assert!(summary.stopped_early);
        assert!(summary.epochs_completed < 50);
        assert!(config
            .results_dir
            .join("logs")
            .join("early_stopping_trace.json")
            .exists());

        let trace: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(
                config.results_dir.join("logs").join("early_stopping_trace.json"),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            trace["trace"].as_array().unwrap().len() as u32,
            summary.epochs_completed
        );
        assert_eq!(trace["mode"], "max");
    }

    #[test]
    fn test_failing_backend_propagates_error() {
        let dir = TempDir::new().unwrap();
        let config = unit_config(dir.path(), 3);
        let key = SyntheticTrainer::unit_key(&config);
        let backend = SyntheticTrainer::default().with_failing_units([key]);

        let result = UnitRunner::new(&backend).run(&config, &mut NoopTracker);
        assert!(result.is_err());
    }
}
