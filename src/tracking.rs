//! Experiment tracking sinks
//!
//! The orchestrator records parameters, metrics, and artifacts through the
//! [`ExperimentTracker`] trait. Remote sinks (MLflow, Weights & Biases) are
//! external collaborators; this crate ships a no-op sink and a local
//! append-only event log.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{TrackerKind, TrackingSettings};
use crate::error::{Error, Result};
use crate::utils::io::ensure_dir_exists;

/// Metric/parameter/artifact sink for one experiment run
pub trait ExperimentTracker {
    /// Begin a run; must be balanced by [`ExperimentTracker::end_run`]
    fn start_run(&mut self, run_name: &str) -> Result<()>;

    /// Record hyperparameters
    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()>;

    /// Record metric values, optionally at a step (epoch)
    fn log_metrics(&mut self, metrics: &HashMap<String, f64>, step: Option<u64>) -> Result<()>;

    /// Record a produced artifact by path
    fn log_artifact(&mut self, path: &Path) -> Result<()>;

    /// End the active run
    fn end_run(&mut self) -> Result<()>;
}

/// Tracker that records nothing
#[derive(Debug, Default)]
pub struct NoopTracker;

impl ExperimentTracker for NoopTracker {
    fn start_run(&mut self, _run_name: &str) -> Result<()> {
        Ok(())
    }

    fn log_params(&mut self, _params: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    fn log_metrics(&mut self, _metrics: &HashMap<String, f64>, _step: Option<u64>) -> Result<()> {
        Ok(())
    }

    fn log_artifact(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn end_run(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Tracker appending JSON events to a local file
#[derive(Debug)]
pub struct JsonlTracker {
    path: PathBuf,
    active_run: Option<String>,
}

impl JsonlTracker {
    /// Create a tracker writing to `events.jsonl` inside `log_dir`
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        ensure_dir_exists(log_dir.as_ref())?;
        Ok(Self {
            path: log_dir.as_ref().join("events.jsonl"),
            active_run: None,
        })
    }

    fn append(&self, event: serde_json::Value) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl ExperimentTracker for JsonlTracker {
    fn start_run(&mut self, run_name: &str) -> Result<()> {
        if self.active_run.is_some() {
            return Err(Error::tracking(format!(
                "run already active: {}",
                self.active_run.as_deref().unwrap_or("?")
            )));
        }
        self.active_run = Some(run_name.to_string());
        self.append(json!({
            "timestamp": Utc::now(),
            "event": "run_started",
            "run": run_name,
        }))
    }

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        self.append(json!({
            "timestamp": Utc::now(),
            "event": "params",
            "run": self.active_run,
            "params": params,
        }))
    }

    fn log_metrics(&mut self, metrics: &HashMap<String, f64>, step: Option<u64>) -> Result<()> {
        self.append(json!({
            "timestamp": Utc::now(),
            "event": "metrics",
            "run": self.active_run,
            "step": step,
            "metrics": metrics,
        }))
    }

    fn log_artifact(&mut self, path: &Path) -> Result<()> {
        self.append(json!({
            "timestamp": Utc::now(),
            "event": "artifact",
            "run": self.active_run,
            "path": path.display().to_string(),
        }))
    }

    fn end_run(&mut self) -> Result<()> {
        let run = self.active_run.take();
        self.append(json!({
            "timestamp": Utc::now(),
            "event": "run_ended",
            "run": run,
        }))
    }
}

/// Create the tracker configured by the given settings
///
/// Remote sinks are not linked into this crate; requesting one yields a
/// warning and the no-op tracker, mirroring the unknown-enum fallback
/// contract of the config store.
pub fn create_tracker(settings: &TrackingSettings, log_dir: &Path) -> Box<dyn ExperimentTracker> {
    match settings.kind {
        TrackerKind::None => Box::new(NoopTracker),
        TrackerKind::File => match JsonlTracker::new(log_dir) {
            Ok(tracker) => Box::new(tracker),
            Err(e) => {
                warn!("failed to create file tracker, falling back to no-op: {}", e);
                Box::new(NoopTracker)
            }
        },
        TrackerKind::Mlflow | TrackerKind::Wandb => {
            warn!(
                kind = settings.kind.as_str(),
                "remote tracking sink not available in this build, using no-op tracker"
            );
            Box::new(NoopTracker)
        }
    }
}

/// End a run, ignoring errors
///
/// Called whenever a unit fails, so a sink left in an "active run" state can
/// never block the next unit.
pub fn end_run_quietly(tracker: &mut dyn ExperimentTracker) {
    if let Err(e) = tracker.end_run() {
        debug!("ignoring tracker end_run failure: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_tracker_appends_events() {
        let dir = TempDir::new().unwrap();
        let mut tracker = JsonlTracker::new(dir.path()).unwrap();

        tracker.start_run("unit_a").unwrap();
        tracker
            .log_metrics(&HashMap::from([("accuracy".to_string(), 0.9)]), Some(1))
            .unwrap();
        tracker.end_run().unwrap();

        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let events: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "run_started");
        assert_eq!(events[1]["metrics"]["accuracy"], 0.9);
        assert_eq!(events[2]["event"], "run_ended");
    }

    #[test]
    fn test_double_start_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut tracker = JsonlTracker::new(dir.path()).unwrap();

        tracker.start_run("first").unwrap();
        assert!(tracker.start_run("second").is_err());
    }

    #[test]
    fn test_end_run_quietly_clears_active_run() {
        let dir = TempDir::new().unwrap();
        let mut tracker = JsonlTracker::new(dir.path()).unwrap();

        tracker.start_run("unit").unwrap();
        end_run_quietly(&mut tracker);

        // The next unit can start a run again.
        assert!(tracker.start_run("next_unit").is_ok());
    }

    #[test]
    fn test_remote_kinds_fall_back_to_noop() {
        let dir = TempDir::new().unwrap();
        let settings = TrackingSettings {
            kind: TrackerKind::Mlflow,
            ..TrackingSettings::default()
        };
        let mut tracker = create_tracker(&settings, dir.path());
        assert!(tracker.start_run("x").is_ok());
        assert!(!dir.path().join("events.jsonl").exists());
    }
}
