//! Deterministic synthetic training backend
//!
//! Stands in for the real training subsystem in dry runs and tests: metric
//! curves are pure functions of the epoch and architecture, so resumed runs
//! land on exactly the same trajectory. Units can be marked as failing to
//! exercise the orchestrator's failure isolation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Architecture, Dataset, ExperimentConfig, PreprocessingConfig};
use crate::error::{Error, Result};
use crate::training::{TrainerBackend, TrainerSession, TrainerState};

/// Synthetic trainer with configurable failure injection
#[derive(Debug, Default)]
pub struct SyntheticTrainer {
    failing_units: HashSet<String>,
    plateau: bool,
    begun: Arc<Mutex<Vec<String>>>,
    first_epoch: Arc<Mutex<Option<u32>>>,
}

impl SyntheticTrainer {
    /// Mark units (by unit key) whose training raises mid-epoch
    pub fn with_failing_units<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.failing_units = keys.into_iter().collect();
        self
    }

    /// Make validation accuracy plateau immediately (for early-stopping
    /// scenarios)
    pub fn with_plateau(mut self) -> Self {
        self.plateau = true;
        self
    }

    /// Key identifying a unit: `<preprocessing>_<dataset>_<architecture>`
    pub fn unit_key(config: &ExperimentConfig) -> String {
        format!(
            "{}_{}_{}",
            config
                .preprocessing
                .as_ref()
                .map(|p| p.name.as_str())
                .unwrap_or("default"),
            config.dataset,
            config.architecture
        )
    }

    /// Unit keys this backend has begun, in order
    pub fn begun_units(&self) -> Vec<String> {
        self.begun.lock().clone()
    }

    /// First epoch any session of this backend trained
    pub fn first_trained_epoch(&self) -> Option<u32> {
        *self.first_epoch.lock()
    }

    fn target_accuracy(architecture: Architecture) -> f64 {
        match architecture {
            Architecture::Baseline => 0.75,
            Architecture::Cnn => 0.85,
            Architecture::Siamese => 0.82,
            Architecture::Attention => 0.87,
            Architecture::Arcface => 0.89,
            Architecture::Hybrid => 0.91,
        }
    }
}

impl TrainerBackend for SyntheticTrainer {
    fn begin_unit(&self, config: &ExperimentConfig) -> Result<Box<dyn TrainerSession>> {
        let key = Self::unit_key(config);
        self.begun.lock().push(key.clone());

        Ok(Box::new(SyntheticSession {
            target: Self::target_accuracy(config.architecture),
            plateau: self.plateau,
            fail: self.failing_units.contains(&key),
            has_scheduler: config.lr_scheduler.kind != crate::config::SchedulerKind::None,
            last_trained_epoch: 0,
            first_epoch: Arc::clone(&self.first_epoch),
        }))
    }

    fn dataset_labels(
        &self,
        _dataset: &Dataset,
        _preprocessing: Option<&PreprocessingConfig>,
    ) -> Result<Vec<usize>> {
        // 20 classes, 10 samples each.
        Ok((0..200).map(|i| i % 20).collect())
    }
}

struct SyntheticSession {
    target: f64,
    plateau: bool,
    fail: bool,
    has_scheduler: bool,
    last_trained_epoch: u32,
    first_epoch: Arc<Mutex<Option<u32>>>,
}

impl SyntheticSession {
    fn accuracy_at(&self, epoch: u32) -> f64 {
        if self.plateau || epoch == 0 {
            return if epoch == 0 { 0.0 } else { self.target };
        }
        self.target * (1.0 - (-(epoch as f64) / 3.0).exp())
    }

    fn loss_at(&self, epoch: u32) -> f64 {
        2.0 * (-(0.3 * epoch as f64)).exp() + 0.05
    }
}

impl TrainerSession for SyntheticSession {
    fn train_epoch(&mut self, epoch: u32) -> Result<f64> {
        if self.fail {
            return Err(Error::training("synthetic training failure"));
        }

        let mut first = self.first_epoch.lock();
        if first.is_none() {
            *first = Some(epoch);
        }
        drop(first);

        self.last_trained_epoch = epoch;
        Ok(self.loss_at(epoch))
    }

    fn validate(&mut self) -> Result<HashMap<String, f64>> {
        let epoch = self.last_trained_epoch;
        Ok(HashMap::from([
            ("loss".to_string(), self.loss_at(epoch) * 1.1),
            ("accuracy".to_string(), self.accuracy_at(epoch)),
        ]))
    }

    fn test(&mut self) -> Result<HashMap<String, f64>> {
        let accuracy = self.accuracy_at(self.last_trained_epoch) * 0.98;
        Ok(HashMap::from([
            ("accuracy".to_string(), accuracy),
            ("precision".to_string(), accuracy * 0.99),
            ("recall".to_string(), accuracy * 0.985),
            ("f1".to_string(), accuracy * 0.987),
        ]))
    }

    fn export_state(&self) -> Result<TrainerState> {
        Ok(TrainerState {
            model_state: self.last_trained_epoch.to_le_bytes().to_vec(),
            optimizer_state: Some(vec![0u8; 8]),
            scheduler_state: self.has_scheduler.then(|| vec![1u8; 4]),
        })
    }

    fn restore_state(&mut self, state: &TrainerState) -> Result<()> {
        let bytes: [u8; 4] = state
            .model_state
            .as_slice()
            .try_into()
            .map_err(|_| Error::training("model state blob has unexpected size"))?;
        self.last_trained_epoch = u32::from_le_bytes(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dataset;

    fn config(architecture: Architecture) -> ExperimentConfig {
        ExperimentConfig::new("synthetic", Dataset::Dataset1, architecture, "/tmp/unit")
    }

    #[test]
    fn test_accuracy_converges_to_target() {
        let backend = SyntheticTrainer::default();
        let mut session = backend.begin_unit(&config(Architecture::Hybrid)).unwrap();

        for epoch in 1..=30 {
            session.train_epoch(epoch).unwrap();
        }
        let metrics = session.validate().unwrap();
        assert!((metrics["accuracy"] - 0.91).abs() < 0.01);
    }

    #[test]
    fn test_architecture_ranking_is_stable() {
        let backend = SyntheticTrainer::default();
        let mut finals: Vec<(Architecture, f64)> = Architecture::ALL
            .iter()
            .map(|&arch| {
                let mut session = backend.begin_unit(&config(arch)).unwrap();
                for epoch in 1..=20 {
                    session.train_epoch(epoch).unwrap();
                }
                (arch, session.test().unwrap()["accuracy"])
            })
            .collect();

        finals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let top: Vec<Architecture> = finals.iter().take(3).map(|(a, _)| *a).collect();
        assert_eq!(
            top,
            vec![Architecture::Hybrid, Architecture::Arcface, Architecture::Attention]
        );
    }

    #[test]
    fn test_state_round_trip_restores_epoch() {
        let backend = SyntheticTrainer::default();
        let mut session = backend.begin_unit(&config(Architecture::Cnn)).unwrap();

        for epoch in 1..=7 {
            session.train_epoch(epoch).unwrap();
        }
        let state = session.export_state().unwrap();

        let mut restored = backend.begin_unit(&config(Architecture::Cnn)).unwrap();
        restored.restore_state(&state).unwrap();
        assert_eq!(
            restored.validate().unwrap()["accuracy"],
            session.validate().unwrap()["accuracy"]
        );
    }

    #[test]
    fn test_failing_unit_raises() {
        let cfg = config(Architecture::Siamese);
        let backend =
            SyntheticTrainer::default().with_failing_units([SyntheticTrainer::unit_key(&cfg)]);
        let mut session = backend.begin_unit(&cfg).unwrap();
        assert!(session.train_epoch(1).is_err());
    }

    #[test]
    fn test_labels_are_stratifiable() {
        let backend = SyntheticTrainer::default();
        let labels = backend.dataset_labels(&Dataset::Dataset1, None).unwrap();
        assert_eq!(labels.len(), 200);
        assert_eq!(labels.iter().filter(|&&l| l == 0).count(), 10);
    }
}
