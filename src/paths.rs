//! Workspace path layout
//!
//! All on-disk locations used by the sweep engine are derived from a single
//! [`WorkspacePaths`] value constructed at process start and passed by
//! reference to every component; no component reads ambient global path
//! state.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::utils::io::ensure_dir_exists;

/// Directory name prefix for sweep output directories
pub const SWEEP_DIR_PREFIX: &str = "sweep_";

/// Immutable workspace layout for a sweep process
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    /// Workspace root
    root: PathBuf,

    /// Raw input data
    raw_data_dir: PathBuf,

    /// Preprocessed data, laid out as `<preprocessing>/<dataset>`
    processed_data_dir: PathBuf,

    /// Sweep outputs (one subdirectory per sweep)
    output_dir: PathBuf,
}

impl WorkspacePaths {
    /// Create the layout rooted at the given directory
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        let data_dir = root.join("data");
        Self {
            raw_data_dir: data_dir.join("raw"),
            processed_data_dir: data_dir.join("processed"),
            output_dir: root.join("outputs"),
            root,
        }
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw data directory
    pub fn raw_data_dir(&self) -> &Path {
        &self.raw_data_dir
    }

    /// Processed data directory
    pub fn processed_data_dir(&self) -> &Path {
        &self.processed_data_dir
    }

    /// Sweep output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Processed data location for one (preprocessing, dataset) pair
    pub fn processed_subset(&self, preprocessing: &str, dataset: &str) -> PathBuf {
        self.processed_data_dir.join(preprocessing).join(dataset)
    }

    /// Output directory for a sweep with the given experiment id
    pub fn sweep_dir(&self, experiment_id: &str) -> PathBuf {
        self.output_dir.join(experiment_id)
    }

    /// Create all base directories
    pub fn ensure(&self) -> Result<()> {
        ensure_dir_exists(&self.raw_data_dir)?;
        ensure_dir_exists(&self.processed_data_dir)?;
        ensure_dir_exists(&self.output_dir)?;
        Ok(())
    }

    /// List existing sweep directories, newest first by modification time
    pub fn list_sweeps(&self) -> Result<Vec<PathBuf>> {
        let mut sweeps = Vec::new();
        if !self.output_dir.exists() {
            return Ok(sweeps);
        }

        for entry in std::fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_sweep = path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(SWEEP_DIR_PREFIX))
                    .unwrap_or(false);
            if is_sweep {
                sweeps.push(path);
            }
        }

        sweeps.sort_by_key(|p| {
            std::cmp::Reverse(
                std::fs::metadata(p)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });

        Ok(sweeps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_derivation() {
        let paths = WorkspacePaths::new("/work");
        assert_eq!(paths.processed_subset("enhanced", "dataset1"),
                   PathBuf::from("/work/data/processed/enhanced/dataset1"));
        assert_eq!(paths.sweep_dir("sweep_abc"), PathBuf::from("/work/outputs/sweep_abc"));
    }

    #[test]
    fn test_ensure_creates_directories() {
        let dir = TempDir::new().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        paths.ensure().unwrap();
        assert!(paths.raw_data_dir().exists());
        assert!(paths.processed_data_dir().exists());
        assert!(paths.output_dir().exists());
    }

    #[test]
    fn test_list_sweeps_newest_first() {
        let dir = TempDir::new().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        paths.ensure().unwrap();

        for name in ["sweep_a", "sweep_b", "not_a_sweep"] {
            std::fs::create_dir(paths.output_dir().join(name)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let sweeps = paths.list_sweeps().unwrap();
        assert_eq!(sweeps.len(), 2);
        assert_eq!(sweeps[0].file_name().unwrap(), "sweep_b");
        assert_eq!(sweeps[1].file_name().unwrap(), "sweep_a");
    }
}
