//! Checkpoint persistence for training units
//!
//! Every checkpoint is written atomically (temp file + rename) so a process
//! crash can never leave a partially written file that would later load.
//! Retention is best-effort: pruning failures are logged and never fail a
//! training run.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CheckpointSettings;
use crate::error::{Error, Result};
use crate::utils::io::{ensure_dir_exists, write_file_atomic};

pub mod comparator;

pub use comparator::{ImprovementRule, MetricMode};

/// Filename prefix for per-epoch checkpoint files
pub const EPOCH_FILE_PREFIX: &str = "checkpoint_epoch_";

/// Extension for checkpoint files
pub const CHECKPOINT_EXT: &str = "ckpt";

/// Fixed name of the best-model file (model state only, overwritten in place)
pub const BEST_MODEL_FILE: &str = "best_model.ckpt";

/// Fixed name of the best full checkpoint (model + optimizer + scheduler)
pub const BEST_CHECKPOINT_FILE: &str = "best_checkpoint.ckpt";

/// Gzip magic bytes, used to detect compressed checkpoint files on load
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One training unit's point-in-time state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCheckpoint {
    /// Epoch this checkpoint was taken at (1-based)
    pub epoch: u32,

    /// Opaque model state blob
    pub model_state: Vec<u8>,

    /// Opaque optimizer state blob; absent in older checkpoints
    #[serde(default)]
    pub optimizer_state: Option<Vec<u8>>,

    /// Opaque scheduler state blob; absent when no scheduler is configured
    #[serde(default)]
    pub scheduler_state: Option<Vec<u8>>,

    /// Validation metrics recorded at save time
    pub validation_metrics: HashMap<String, f64>,

    /// Save timestamp (ISO-8601)
    pub date_saved: DateTime<Utc>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl TrainingCheckpoint {
    /// Create a checkpoint for the given epoch and model state
    pub fn new(epoch: u32, model_state: Vec<u8>) -> Self {
        Self {
            epoch,
            model_state,
            optimizer_state: None,
            scheduler_state: None,
            validation_metrics: HashMap::new(),
            date_saved: Utc::now(),
            metadata: None,
        }
    }
}

/// Atomic checkpoint store for one training unit's checkpoint directory
#[derive(Debug)]
pub struct CheckpointStore {
    /// Directory holding this unit's checkpoints
    dir: PathBuf,

    /// Epoch interval between per-epoch checkpoint files
    frequency: u32,

    /// Number of per-epoch files kept by pruning
    keep_last_n: usize,

    /// Gzip-compress checkpoint records on disk
    compression: bool,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new<P: Into<PathBuf>>(dir: P, settings: &CheckpointSettings) -> Result<Self> {
        let dir = dir.into();
        ensure_dir_exists(&dir)?;

        Ok(Self {
            dir,
            frequency: settings.frequency.max(1),
            keep_last_n: settings.keep_last_n,
            compression: false,
        })
    }

    /// Enable or disable gzip compression for newly written checkpoints
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the best-model file
    pub fn best_model_path(&self) -> PathBuf {
        self.dir.join(BEST_MODEL_FILE)
    }

    /// Path of the best full checkpoint file
    pub fn best_checkpoint_path(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT_FILE)
    }

    /// Save a checkpoint
    ///
    /// Writes the per-epoch file when `epoch` falls on the configured
    /// frequency, then overwrites the best-model and best-checkpoint files
    /// when `is_best` is set. The per-epoch write always happens before the
    /// best overwrite. Returns the path of the last file written.
    pub fn save(&self, checkpoint: &TrainingCheckpoint, is_best: bool) -> Result<PathBuf> {
        let encoded = self.encode(checkpoint)?;
        let mut written = None;

        if checkpoint.epoch % self.frequency == 0 {
            let path = self.epoch_path(checkpoint.epoch);
            write_file_atomic(&path, &encoded)?;
            debug!(epoch = checkpoint.epoch, path = %path.display(), "saved epoch checkpoint");
            written = Some(path);
        }

        if is_best {
            // Model state alone for quick best-model loads, then the full
            // record for best-checkpoint resumption.
            let model_path = self.best_model_path();
            write_file_atomic(&model_path, &checkpoint.model_state)?;

            let best_path = self.best_checkpoint_path();
            write_file_atomic(&best_path, &encoded)?;
            info!(epoch = checkpoint.epoch, "saved new best checkpoint");
            written = Some(best_path);
        }

        self.prune(self.keep_last_n);

        written.ok_or_else(|| {
            Error::checkpoint(format!(
                "nothing to write for epoch {} (frequency {}, is_best false)",
                checkpoint.epoch, self.frequency
            ))
        })
    }

    /// Load a checkpoint record from the given path
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<TrainingCheckpoint> {
        let bytes = fs::read(path.as_ref())?;
        self.decode(&bytes)
    }

    /// Load the best full checkpoint, if one exists
    pub fn load_best(&self) -> Result<Option<TrainingCheckpoint>> {
        let path = self.best_checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.load(&path)?))
    }

    /// Find the per-epoch checkpoint with the highest epoch number
    pub fn latest(&self) -> Result<Option<(u32, PathBuf)>> {
        Ok(self.list_epoch_files()?.into_iter().max_by_key(|(epoch, _)| *epoch))
    }

    /// List per-epoch checkpoint files as `(epoch, path)` pairs
    pub fn list_epoch_files(&self) -> Result<Vec<(u32, PathBuf)>> {
        let mut files = Vec::new();
        if !self.dir.exists() {
            return Ok(files);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(epoch) = parse_epoch_filename(&path) {
                files.push((epoch, path));
            }
        }

        Ok(files)
    }

    /// Delete all but the `keep_last_n` most recently modified per-epoch files
    ///
    /// The best-model and best-checkpoint files are never pruned. Deletion
    /// failures are logged and swallowed.
    pub fn prune(&self, keep_last_n: usize) {
        let mut files = match self.list_epoch_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("checkpoint pruning skipped: {}", e);
                return;
            }
        };

        files.sort_by_key(|(_, path)| {
            std::cmp::Reverse(
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });

        for (_, path) in files.into_iter().skip(keep_last_n) {
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "pruned old checkpoint"),
                Err(e) => warn!(path = %path.display(), "failed to prune checkpoint: {}", e),
            }
        }
    }

    /// Delete every per-epoch checkpoint, keeping only the best files
    ///
    /// Called after a unit completes to reclaim space.
    pub fn remove_non_best(&self) {
        self.prune(0);
    }

    fn epoch_path(&self, epoch: u32) -> PathBuf {
        self.dir.join(format!("{}{}.{}", EPOCH_FILE_PREFIX, epoch, CHECKPOINT_EXT))
    }

    fn encode(&self, checkpoint: &TrainingCheckpoint) -> Result<Vec<u8>> {
        let raw = bincode::serialize(checkpoint)?;
        if !self.compression {
            return Ok(raw);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<TrainingCheckpoint> {
        // Sniff the gzip magic so stores can read both compressed and
        // uncompressed history regardless of their own compression flag.
        if bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC {
            let mut decoder = GzDecoder::new(bytes);
            let mut raw = Vec::new();
            decoder.read_to_end(&mut raw)?;
            Ok(bincode::deserialize(&raw)?)
        } else {
            Ok(bincode::deserialize(bytes)?)
        }
    }
}

/// Parse the epoch number out of a per-epoch checkpoint filename
fn parse_epoch_filename(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_prefix(EPOCH_FILE_PREFIX)?
        .strip_suffix(&format!(".{}", CHECKPOINT_EXT))?;
    stem.parse().ok()
}
