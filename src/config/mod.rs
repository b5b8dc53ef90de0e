//! Versioned experiment configuration
//!
//! An [`ExperimentConfig`] fully describes one training unit: what to train
//! (architecture, dataset, preprocessing), how to train it (epochs, batch
//! size, learning rate, enhancement settings), and how its state is
//! checkpointed and tracked. Configs carry a semantic version and an
//! append-only history of prior states, and are persisted in two redundant
//! formats (JSON and YAML) before a unit runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::checkpoint::MetricMode;
use crate::error::{Error, Result};
use crate::utils::io::{ensure_dir_exists, write_file_atomic};

pub mod diff;

pub use diff::{diff_configs, FieldChange};

/// JSON filename a config is persisted under inside its results directory
pub const CONFIG_JSON_FILE: &str = "experiment_config.json";

/// YAML filename a config is persisted under inside its results directory
pub const CONFIG_YAML_FILE: &str = "experiment_config.yaml";

/// Dataset selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Dataset {
    /// Primary dataset (high subject diversity)
    Dataset1,
    /// Secondary dataset (high sample count per class)
    Dataset2,
    /// Any other dataset, addressed by directory name
    Custom(String),
}

impl Dataset {
    /// Directory / config name of this dataset
    pub fn as_str(&self) -> &str {
        match self {
            Dataset::Dataset1 => "dataset1",
            Dataset::Dataset2 => "dataset2",
            Dataset::Custom(name) => name,
        }
    }
}

impl From<String> for Dataset {
    fn from(value: String) -> Self {
        match value.as_str() {
            "dataset1" => Dataset::Dataset1,
            "dataset2" => Dataset::Dataset2,
            _ => Dataset::Custom(value),
        }
    }
}

impl From<Dataset> for String {
    fn from(value: Dataset) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model architecture selector
///
/// Unknown architecture names are rejected at config-load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Plain convolutional baseline
    Baseline,
    /// ResNet-style transfer-learning network
    Cnn,
    /// Siamese embedding network
    Siamese,
    /// Self-attention network
    Attention,
    /// Angular-margin embedding network
    Arcface,
    /// CNN-transformer hybrid
    Hybrid,
}

impl Architecture {
    /// All supported architectures, in sweep order
    pub const ALL: [Architecture; 6] = [
        Architecture::Baseline,
        Architecture::Cnn,
        Architecture::Siamese,
        Architecture::Attention,
        Architecture::Arcface,
        Architecture::Hybrid,
    ];

    /// Lowercase name of this architecture
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Baseline => "baseline",
            Architecture::Cnn => "cnn",
            Architecture::Siamese => "siamese",
            Architecture::Attention => "attention",
            Architecture::Arcface => "arcface",
            Architecture::Hybrid => "hybrid",
        }
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(Architecture::Baseline),
            "cnn" => Ok(Architecture::Cnn),
            "siamese" => Ok(Architecture::Siamese),
            "attention" => Ok(Architecture::Attention),
            "arcface" => Ok(Architecture::Arcface),
            "hybrid" => Ok(Architecture::Hybrid),
            other => Err(Error::config(format!("invalid model architecture: {}", other))),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learning-rate scheduler kind
///
/// For backward compatibility with configs written by older versions, an
/// unknown value deserializes to [`SchedulerKind::None`] with a warning
/// instead of failing the whole load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SchedulerKind {
    /// No scheduler
    None,
    /// Step decay
    Step,
    /// Exponential decay
    Exponential,
    /// Cosine annealing
    Cosine,
    /// Reduce on validation plateau
    ReduceOnPlateau,
    /// One-cycle policy
    OneCycle,
}

impl SchedulerKind {
    /// Config string for this scheduler kind
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::None => "none",
            SchedulerKind::Step => "step",
            SchedulerKind::Exponential => "exponential",
            SchedulerKind::Cosine => "cosine",
            SchedulerKind::ReduceOnPlateau => "reduce_on_plateau",
            SchedulerKind::OneCycle => "one_cycle",
        }
    }
}

impl From<String> for SchedulerKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "none" => SchedulerKind::None,
            "step" => SchedulerKind::Step,
            "exponential" => SchedulerKind::Exponential,
            "cosine" => SchedulerKind::Cosine,
            "reduce_on_plateau" => SchedulerKind::ReduceOnPlateau,
            "one_cycle" => SchedulerKind::OneCycle,
            other => {
                warn!(value = other, "unknown scheduler kind, falling back to none");
                SchedulerKind::None
            }
        }
    }
}

impl From<SchedulerKind> for String {
    fn from(value: SchedulerKind) -> Self {
        value.as_str().to_string()
    }
}

/// Experiment tracker kind
///
/// Same backward-compatibility contract as [`SchedulerKind`]: unknown values
/// fall back to [`TrackerKind::None`] with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TrackerKind {
    /// No tracking
    None,
    /// Local append-only event log
    File,
    /// MLflow sink (external)
    Mlflow,
    /// Weights & Biases sink (external)
    Wandb,
}

impl TrackerKind {
    /// Config string for this tracker kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::None => "none",
            TrackerKind::File => "file",
            TrackerKind::Mlflow => "mlflow",
            TrackerKind::Wandb => "wandb",
        }
    }
}

impl From<String> for TrackerKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "none" => TrackerKind::None,
            "file" => TrackerKind::File,
            "mlflow" => TrackerKind::Mlflow,
            "wandb" => TrackerKind::Wandb,
            other => {
                warn!(value = other, "unknown tracker kind, falling back to none");
                TrackerKind::None
            }
        }
    }
}

impl From<TrackerKind> for String {
    fn from(value: TrackerKind) -> Self {
        value.as_str().to_string()
    }
}

/// Evaluation depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// Accuracy, precision, recall, F1
    Standard,
    /// Standard plus per-class, calibration, and resource analysis
    Enhanced,
}

/// Preprocessing pipeline description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Short name; also the processed-data subdirectory
    pub name: String,

    /// Run detection and crop to the detected region
    pub detect_and_crop: bool,

    /// Margin added around the detected region
    pub crop_margin: f64,

    /// Output image size
    pub final_size: [u32; 2],

    /// Apply training-time augmentation
    pub augmentation: bool,
}

impl PreprocessingConfig {
    /// Detection, cropping, and augmentation enabled
    pub fn enhanced() -> Self {
        Self {
            name: "enhanced".to_string(),
            detect_and_crop: true,
            crop_margin: 0.4,
            final_size: [224, 224],
            augmentation: true,
        }
    }

    /// Resize and normalize only
    pub fn minimal() -> Self {
        Self {
            name: "minimal".to_string(),
            detect_and_crop: false,
            crop_margin: 0.0,
            final_size: [224, 224],
            augmentation: false,
        }
    }
}

/// Early stopping settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingSettings {
    /// Enable early stopping
    pub enabled: bool,

    /// Epochs without improvement before stopping
    pub patience: u32,

    /// Minimum change that counts as an improvement
    pub min_delta: f64,

    /// Metric to monitor (a key of the validation metrics map)
    pub metric: String,

    /// Improvement direction for the monitored metric
    pub mode: MetricMode,
}

impl Default for EarlyStoppingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            patience: 10,
            min_delta: 0.0,
            metric: "loss".to_string(),
            mode: MetricMode::Min,
        }
    }
}

/// Gradient clipping settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientClippingSettings {
    /// Enable gradient clipping
    pub enabled: bool,

    /// Maximum gradient norm
    pub max_norm: f64,

    /// Adapt the norm bound to the architecture
    pub adaptive: bool,
}

impl Default for GradientClippingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_norm: 1.0,
            adaptive: false,
        }
    }
}

/// Learning-rate scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Scheduler kind
    pub kind: SchedulerKind,

    /// Scheduler-specific numeric parameters
    pub params: BTreeMap<String, f64>,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::None
    }
}

/// Checkpoint policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// Maintain the best-model / best-checkpoint files
    pub save_best: bool,

    /// Epoch interval between per-epoch checkpoints
    pub frequency: u32,

    /// Per-epoch checkpoints retained by pruning
    pub keep_last_n: usize,

    /// Best checkpoints retained
    pub keep_best_n: usize,

    /// Attach experiment metadata to each checkpoint
    pub save_metadata: bool,

    /// Resume from the highest-epoch checkpoint when present
    pub resumable: bool,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            save_best: true,
            frequency: 1,
            keep_last_n: 5,
            keep_best_n: 3,
            save_metadata: true,
            resumable: true,
        }
    }
}

/// Evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// Evaluation depth
    pub mode: EvaluationMode,

    /// Per-class metric breakdown
    pub per_class: bool,

    /// Prediction calibration analysis
    pub calibration: bool,

    /// Sample process resource usage during training
    pub resource_monitoring: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            mode: EvaluationMode::Standard,
            per_class: true,
            calibration: true,
            resource_monitoring: true,
        }
    }
}

/// Experiment tracking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Tracker kind
    pub kind: TrackerKind,

    /// Tracking server URI, when the sink needs one
    pub uri: Option<String>,

    /// Log hyperparameters
    pub track_params: bool,

    /// Log per-epoch metrics
    pub track_metrics: bool,

    /// Log artifacts (reports, summaries)
    pub track_artifacts: bool,

    /// Tags attached to every run
    pub tags: BTreeMap<String, String>,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            kind: TrackerKind::None,
            uri: None,
            track_params: true,
            track_metrics: true,
            track_artifacts: true,
            tags: BTreeMap::new(),
        }
    }
}

/// Semantic version segment to bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionLevel {
    /// Breaking change to the config's meaning
    Major,
    /// New field or behaviour
    Minor,
    /// Small adjustment
    Patch,
}

/// One entry of a config's change history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Full serialized config state, minus its own history
    pub config: serde_json::Value,
}

/// Configuration of one training unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Unique identifier
    pub experiment_id: String,

    /// Human-readable name
    pub experiment_name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Dataset to train and evaluate on
    pub dataset: Dataset,

    /// Model architecture
    pub architecture: Architecture,

    /// Preprocessing applied to the dataset
    #[serde(default)]
    pub preprocessing: Option<PreprocessingConfig>,

    /// Number of training epochs
    pub epochs: u32,

    /// Training batch size
    pub batch_size: usize,

    /// Initial learning rate
    pub learning_rate: f64,

    /// Seed for all random number generators
    pub random_seed: u64,

    /// Directory this unit's results are written to
    pub results_dir: PathBuf,

    /// Semantic config version
    pub config_version: String,

    /// Snapshots of prior states, oldest first; never contains the current
    /// state
    #[serde(default)]
    pub config_history: Vec<ConfigSnapshot>,

    /// Early stopping settings
    #[serde(default)]
    pub early_stopping: EarlyStoppingSettings,

    /// Gradient clipping settings
    #[serde(default)]
    pub gradient_clipping: GradientClippingSettings,

    /// Learning-rate scheduler settings
    #[serde(default)]
    pub lr_scheduler: SchedulerSettings,

    /// Checkpoint policy
    #[serde(default)]
    pub checkpointing: CheckpointSettings,

    /// Evaluation settings
    #[serde(default)]
    pub evaluation: EvaluationSettings,

    /// Experiment tracking settings
    #[serde(default)]
    pub tracking: TrackingSettings,
}

impl ExperimentConfig {
    /// Create a config with defaults for everything but identity and target
    pub fn new(
        experiment_name: impl Into<String>,
        dataset: Dataset,
        architecture: Architecture,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            experiment_id: generate_experiment_id(),
            experiment_name: experiment_name.into(),
            created_at: Utc::now(),
            dataset,
            architecture,
            preprocessing: None,
            epochs: 30,
            batch_size: 32,
            learning_rate: 1e-3,
            random_seed: 42,
            results_dir: results_dir.into(),
            config_version: "1.0.0".to_string(),
            config_history: Vec::new(),
            early_stopping: EarlyStoppingSettings::default(),
            gradient_clipping: GradientClippingSettings::default(),
            lr_scheduler: SchedulerSettings::default(),
            checkpointing: CheckpointSettings::default(),
            evaluation: EvaluationSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }

    /// Validate numeric invariants
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config("number of epochs must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }
        if self.learning_rate <= 0.0 {
            return Err(Error::config("learning rate must be positive"));
        }
        if self.checkpointing.frequency == 0 {
            return Err(Error::config("checkpoint frequency must be greater than 0"));
        }
        if self.early_stopping.enabled && self.early_stopping.patience == 0 {
            return Err(Error::config("early stopping patience must be greater than 0"));
        }
        if self.early_stopping.min_delta < 0.0 {
            return Err(Error::config("early stopping min_delta must be non-negative"));
        }
        semver::Version::parse(&self.config_version)
            .map_err(|e| Error::config(format!("invalid config version '{}': {}", self.config_version, e)))?;
        Ok(())
    }

    /// Snapshot the current state (minus history) and bump the version
    ///
    /// The pre-bump state becomes the newest entry of `config_history`; the
    /// requested segment is incremented and lower segments reset to zero.
    pub fn bump_version(&mut self, level: VersionLevel) -> Result<String> {
        self.snapshot_into_history()?;

        let mut version = semver::Version::parse(&self.config_version)
            .map_err(|e| Error::config(format!("invalid config version '{}': {}", self.config_version, e)))?;

        match level {
            VersionLevel::Major => {
                version.major += 1;
                version.minor = 0;
                version.patch = 0;
            }
            VersionLevel::Minor => {
                version.minor += 1;
                version.patch = 0;
            }
            VersionLevel::Patch => {
                version.patch += 1;
            }
        }

        self.config_version = version.to_string();
        Ok(self.config_version.clone())
    }

    /// Append the current state to the history, without its own history
    /// field (prevents unbounded nesting)
    fn snapshot_into_history(&mut self) -> Result<()> {
        let mut state = serde_json::to_value(&*self)?;
        if let Some(obj) = state.as_object_mut() {
            obj.remove("config_history");
        }
        self.config_history.push(ConfigSnapshot {
            timestamp: Utc::now(),
            config: state,
        });
        Ok(())
    }

    /// Field-by-field comparison against another config
    ///
    /// `config_history` and `created_at` are stripped before comparing.
    pub fn diff(&self, other: &ExperimentConfig) -> Result<BTreeMap<String, FieldChange>> {
        diff_configs(self, other)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize to YAML
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Persist to both JSON and YAML inside the results directory
    ///
    /// Two redundant formats give the config a better chance of surviving a
    /// crash mid-sweep with at least one readable copy.
    pub fn save(&self) -> Result<()> {
        ensure_dir_exists(&self.results_dir)?;
        write_file_atomic(
            self.results_dir.join(CONFIG_JSON_FILE),
            self.to_json_string()?.as_bytes(),
        )?;
        write_file_atomic(
            self.results_dir.join(CONFIG_YAML_FILE),
            self.to_yaml_string()?.as_bytes(),
        )?;
        Ok(())
    }

    /// Write to a single file, format selected by extension
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => self.to_yaml_string()?,
            _ => self.to_json_string()?,
        };
        if let Some(parent) = path.parent() {
            ensure_dir_exists(parent)?;
        }
        write_file_atomic(path, content.as_bytes())
    }

    /// Load from a file, format selected by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(Error::config(format!(
                    "unsupported configuration file extension: {:?}",
                    other
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Derive a config for a cross-validation fold
    ///
    /// The fold gets its own seed (`base seed + fold index`), results
    /// directory, and identity suffix.
    pub fn for_fold(&self, fold: usize, results_dir: impl Into<PathBuf>) -> Self {
        let mut config = self.clone();
        config.experiment_id = format!("{}_fold_{}", self.experiment_id, fold);
        config.experiment_name = format!("{} - Fold {}", self.experiment_name, fold);
        config.random_seed = self.random_seed + fold as u64;
        config.results_dir = results_dir.into();
        config.created_at = Utc::now();
        config
    }

    /// Derive a config for a hyperparameter trial
    pub fn for_trial(
        &self,
        trial: usize,
        epochs: u32,
        batch_size: usize,
        learning_rate: f64,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut config = self.clone();
        config.experiment_id = format!("{}_trial_{}", self.experiment_id, trial);
        config.experiment_name = format!("{} - Trial {}", self.experiment_name, trial);
        config.epochs = epochs;
        config.batch_size = batch_size;
        config.learning_rate = learning_rate;
        config.results_dir = results_dir.into();
        config.created_at = Utc::now();
        config
    }
}

/// Generate a short unique experiment id
pub fn generate_experiment_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> ExperimentConfig {
        let mut config = ExperimentConfig::new(
            "Architecture Comparison - dataset1 - cnn",
            Dataset::Dataset1,
            Architecture::Cnn,
            "/tmp/results",
        );
        config.preprocessing = Some(PreprocessingConfig::enhanced());
        config.early_stopping = EarlyStoppingSettings {
            enabled: true,
            patience: 10,
            min_delta: 0.001,
            metric: "accuracy".to_string(),
            mode: MetricMode::Max,
        };
        config
    }

    #[test]
    fn test_json_round_trip() {
        let config = sample_config();
        let json = config.to_json_string().unwrap();
        let restored: ExperimentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = sample_config();
        let yaml = config.to_yaml_string().unwrap();
        let restored: ExperimentConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_save_writes_both_formats() {
        let dir = TempDir::new().unwrap();
        let mut config = sample_config();
        config.results_dir = dir.path().to_path_buf();

        config.save().unwrap();

        let json_path = dir.path().join(CONFIG_JSON_FILE);
        let yaml_path = dir.path().join(CONFIG_YAML_FILE);
        assert!(json_path.exists());
        assert!(yaml_path.exists());

        let from_json = ExperimentConfig::load(&json_path).unwrap();
        let from_yaml = ExperimentConfig::load(&yaml_path).unwrap();
        assert_eq!(from_json, config);
        assert_eq!(from_yaml, config);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "x = 1").unwrap();
        assert!(ExperimentConfig::load(&path).is_err());
    }

    #[test]
    fn test_bump_minor_resets_patch() {
        let mut config = sample_config();
        config.config_version = "1.2.3".to_string();

        let bumped = config.bump_version(VersionLevel::Minor).unwrap();

        assert_eq!(bumped, "1.3.0");
        assert_eq!(config.config_history.len(), 1);

        // The newest history entry holds the pre-bump state.
        let last = config.config_history.last().unwrap();
        assert_eq!(last.config.get("config_version").unwrap(), "1.2.3");
        assert!(last.config.get("config_history").is_none());
    }

    #[test]
    fn test_bump_major_resets_minor_and_patch() {
        let mut config = sample_config();
        config.config_version = "2.5.7".to_string();
        assert_eq!(config.bump_version(VersionLevel::Major).unwrap(), "3.0.0");
    }

    #[test]
    fn test_bump_patch() {
        let mut config = sample_config();
        assert_eq!(config.bump_version(VersionLevel::Patch).unwrap(), "1.0.1");
    }

    #[test]
    fn test_history_never_contains_current_state() {
        let mut config = sample_config();
        config.bump_version(VersionLevel::Patch).unwrap();
        config.bump_version(VersionLevel::Patch).unwrap();

        assert_eq!(config.config_version, "1.0.2");
        let versions: Vec<&str> = config
            .config_history
            .iter()
            .map(|s| s.config.get("config_version").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.0.1"]);
    }

    #[test]
    fn test_unknown_scheduler_falls_back_to_none() {
        let json = r#"{"kind": "polynomial", "params": {}}"#;
        let settings: SchedulerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.kind, SchedulerKind::None);
    }

    #[test]
    fn test_unknown_tracker_falls_back_to_none() {
        let kind: TrackerKind = serde_json::from_str("\"neptune\"").unwrap();
        assert_eq!(kind, TrackerKind::None);
    }

    #[test]
    fn test_unknown_architecture_fails_fast() {
        let result: std::result::Result<Architecture, _> = serde_json::from_str("\"vgg\"");
        assert!(result.is_err());
        assert!("vgg".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_custom_dataset_round_trips() {
        let dataset: Dataset = serde_json::from_str("\"faces_extra\"").unwrap();
        assert_eq!(dataset, Dataset::Custom("faces_extra".to_string()));
        assert_eq!(serde_json::to_string(&dataset).unwrap(), "\"faces_extra\"");
    }

    #[test]
    fn test_for_fold_derives_seed_and_identity() {
        let config = sample_config();
        let fold = config.for_fold(3, "/tmp/cv/fold_3");

        assert_eq!(fold.random_seed, config.random_seed + 3);
        assert!(fold.experiment_id.ends_with("_fold_3"));
        assert_eq!(fold.results_dir, PathBuf::from("/tmp/cv/fold_3"));
        assert_eq!(fold.architecture, config.architecture);
    }

    #[test]
    fn test_validate_rejects_zero_epochs() {
        let mut config = sample_config();
        config.epochs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let mut config = sample_config();
        config.config_version = "not-a-version".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_experiment_id_is_short_hex() {
        let id = generate_experiment_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
