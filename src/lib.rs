//! ExpSweep - Experiment sweep orchestration and checkpoint/resume engine
//!
//! This crate drives large matrices of independent training units
//! (architecture × dataset × preprocessing) without one failure aborting the
//! batch, persists and resumes training state across process restarts,
//! prunes on-disk checkpoint history under storage pressure, selectively
//! invalidates and reruns parts of a prior sweep, and aggregates k-fold
//! cross-validation and hyperparameter-search results.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod monitor;
pub mod paths;
pub mod sweep;
pub mod tracking;
pub mod training;
pub mod utils;

// Re-exports
pub use checkpoint::{CheckpointStore, ImprovementRule, MetricMode, TrainingCheckpoint};
pub use config::{Architecture, Dataset, ExperimentConfig, PreprocessingConfig, VersionLevel};
pub use error::{Error, Result};
pub use monitor::{EarlyStopping, ResourceGate, ResourceSampler};
pub use paths::WorkspacePaths;
pub use sweep::{
    RerunRequest, RerunTargets, SweepOrchestrator, SweepPlan, SweepReport,
};
pub use tracking::{ExperimentTracker, JsonlTracker, NoopTracker};
pub use training::{SyntheticTrainer, TrainerBackend, TrainerSession, UnitRunner, UnitSummary};
