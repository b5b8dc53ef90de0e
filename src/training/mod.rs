//! Training unit execution
//!
//! The sweep engine owns the epoch loop of every training unit (resumption,
//! best-model bookkeeping, checkpointing, and early stopping) while the
//! actual forward/backward computation is delegated to an external training
//! subsystem behind the [`TrainerBackend`] / [`TrainerSession`] traits.
//!
//! # Main Components
//!
//! - **Traits**: the consumed training-subsystem interface
//! - **UnitRunner**: drives one unit's epochs with checkpoint/resume
//! - **SyntheticTrainer**: deterministic stand-in backend for dry runs and
//!   tests

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Architecture, Dataset, ExperimentConfig, PreprocessingConfig};
use crate::error::Result;
use crate::monitor::ResourceUsageSummary;

pub mod runner;
pub mod synthetic;

pub use runner::UnitRunner;
pub use synthetic::SyntheticTrainer;

/// Filename a unit's summary is persisted under in its results directory
pub const UNIT_SUMMARY_FILE: &str = "unit_summary.json";

/// Opaque training state exchanged with the training subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerState {
    /// Model parameters
    pub model_state: Vec<u8>,

    /// Optimizer state, when the session has one
    pub optimizer_state: Option<Vec<u8>>,

    /// Scheduler state, when a scheduler is configured
    pub scheduler_state: Option<Vec<u8>>,
}

/// External training subsystem (consumed, not implemented here)
pub trait TrainerBackend {
    /// Prepare a training session for one fully-specified unit config
    fn begin_unit(&self, config: &ExperimentConfig) -> Result<Box<dyn TrainerSession>>;

    /// Prepare a session restricted to a cross-validation fold's index sets
    ///
    /// Backends that derive their own splits from the config's seed may keep
    /// the default, which ignores the split.
    fn begin_fold(
        &self,
        config: &ExperimentConfig,
        _split: &crate::sweep::cross_validation::FoldSplit,
    ) -> Result<Box<dyn TrainerSession>> {
        self.begin_unit(config)
    }

    /// Class labels of the full training set, for stratified splitting
    fn dataset_labels(
        &self,
        dataset: &Dataset,
        preprocessing: Option<&PreprocessingConfig>,
    ) -> Result<Vec<usize>>;
}

/// One unit's live training session
pub trait TrainerSession {
    /// Train one epoch; returns the mean training loss
    fn train_epoch(&mut self, epoch: u32) -> Result<f64>;

    /// Evaluate on the validation split; must include `loss` and `accuracy`
    fn validate(&mut self) -> Result<HashMap<String, f64>>;

    /// Evaluate on the held-out test split
    fn test(&mut self) -> Result<HashMap<String, f64>>;

    /// Export the session's state for checkpointing
    fn export_state(&self) -> Result<TrainerState>;

    /// Restore the session from checkpointed state
    ///
    /// Absent optimizer/scheduler components are tolerated; the model state
    /// itself is mandatory.
    fn restore_state(&mut self, state: &TrainerState) -> Result<()>;
}

/// Result summary of one completed training unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Experiment identifier
    pub experiment_id: String,

    /// Human-readable name
    pub experiment_name: String,

    /// Trained architecture
    pub architecture: Architecture,

    /// Dataset trained on
    pub dataset: Dataset,

    /// Preprocessing name, when one was configured
    pub preprocessing: Option<String>,

    /// Config version the unit ran with
    pub config_version: String,

    /// Last epoch that completed
    pub epochs_completed: u32,

    /// Whether early stopping ended the unit
    pub stopped_early: bool,

    /// Epoch the best validation score was observed at
    pub best_epoch: Option<u32>,

    /// Validation metrics at the best epoch
    pub best_validation_metrics: HashMap<String, f64>,

    /// Test metrics, one entry per evaluated dataset
    pub test_metrics: Vec<HashMap<String, f64>>,

    /// Resource usage over the unit, when sampling was enabled
    #[serde(default)]
    pub resource_usage: Option<ResourceUsageSummary>,

    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
}

impl UnitSummary {
    /// Test accuracy of the primary evaluation, if recorded
    pub fn accuracy(&self) -> Option<f64> {
        self.test_metrics.first().and_then(|m| m.get("accuracy")).copied()
    }

    /// Persist to `unit_summary.json` inside the given directory
    pub fn save(&self, dir: &Path) -> Result<std::path::PathBuf> {
        crate::utils::io::ensure_dir_exists(dir)?;
        let path = dir.join(UNIT_SUMMARY_FILE);
        crate::utils::io::write_json_atomic(&path, self)?;
        Ok(path)
    }

    /// Load from `unit_summary.json` inside the given directory
    pub fn load(dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(dir.join(UNIT_SUMMARY_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary() -> UnitSummary {
        UnitSummary {
            experiment_id: "abc123".to_string(),
            experiment_name: "test unit".to_string(),
            architecture: Architecture::Cnn,
            dataset: Dataset::Dataset1,
            preprocessing: Some("enhanced".to_string()),
            config_version: "1.0.0".to_string(),
            epochs_completed: 10,
            stopped_early: false,
            best_epoch: Some(8),
            best_validation_metrics: HashMap::from([("accuracy".to_string(), 0.88)]),
            test_metrics: vec![HashMap::from([("accuracy".to_string(), 0.86)])],
            resource_usage: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_round_trip() {
        let dir = TempDir::new().unwrap();
        let original = summary();
        original.save(dir.path()).unwrap();

        let loaded = UnitSummary::load(dir.path()).unwrap();
        assert_eq!(loaded.experiment_id, "abc123");
        assert_eq!(loaded.accuracy(), Some(0.86));
        assert_eq!(loaded.best_epoch, Some(8));
    }

    #[test]
    fn test_accuracy_absent_when_no_test_metrics() {
        let mut s = summary();
        s.test_metrics.clear();
        assert!(s.accuracy().is_none());
    }
}
