//! Artifact manifest
//!
//! Every unit records the artifacts it creates into a manifest at the sweep
//! root. The rerun planner resolves invalidation targets against this
//! manifest with exact lookups instead of pattern-matching the directory
//! tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::io::write_json_atomic;

/// Manifest filename at the sweep root
pub const MANIFEST_FILE: &str = "manifest.json";

/// Sweep phase an artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepPhase {
    /// Architecture-comparison unit
    Architecture,
    /// Cross-validation refinement
    CrossValidation,
    /// Hyperparameter-search refinement
    Hyperopt,
}

/// Artifacts created by one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Unit identity
    pub unit_id: String,

    /// Architecture the unit trained
    pub architecture: String,

    /// Dataset the unit used
    pub dataset: String,

    /// Phase the unit belongs to
    pub phase: SweepPhase,

    /// Paths created by the unit, relative to the sweep root
    pub artifact_paths: Vec<String>,
}

/// Manifest of every artifact a sweep has produced
#[derive(Debug)]
pub struct ArtifactManifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    entries: Vec<ManifestEntry>,
}

impl ArtifactManifest {
    /// Load the manifest at the sweep root, or start an empty one
    pub fn load_or_new(sweep_root: &Path) -> Result<Self> {
        let path = sweep_root.join(MANIFEST_FILE);
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file: ManifestFile = serde_json::from_str(&content)?;
            file.entries
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    /// Load an existing manifest; `None` when the sweep has none (legacy
    /// trees)
    pub fn load(sweep_root: &Path) -> Result<Option<Self>> {
        let path = sweep_root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let file: ManifestFile = serde_json::from_str(&content)?;
        Ok(Some(Self {
            path,
            entries: file.entries,
        }))
    }

    /// All entries, in record order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Record a unit's artifacts and persist the manifest
    ///
    /// Re-recording the same unit id replaces its previous entry, so reruns
    /// do not accumulate duplicates.
    pub fn record(&mut self, entry: ManifestEntry) -> Result<()> {
        self.entries.retain(|e| e.unit_id != entry.unit_id);
        self.entries.push(entry);
        self.save()
    }

    /// Persist the manifest atomically
    pub fn save(&self) -> Result<()> {
        write_json_atomic(
            &self.path,
            &ManifestFile {
                entries: self.entries.clone(),
            },
        )
    }
}
