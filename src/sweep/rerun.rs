//! Rerun planning
//!
//! Given a prior sweep's output tree and a set of invalidation targets,
//! computes the exact set of files and directories to delete before the
//! rerun. Resolution prefers the sweep's artifact manifest; legacy trees
//! without one fall back to a recursive scan parameterised strictly by the
//! requested target names.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::Architecture;
use crate::error::Result;
use crate::sweep::manifest::{ArtifactManifest, SweepPhase};

/// Cross-validation output directory inside a sweep
pub const CV_DIR: &str = "cross_validation";

/// Top-level cross-validation report file
pub const CV_REPORT_FILE: &str = "cross_validation_report.json";

/// Hyperparameter-optimization output directory inside a sweep
pub const HYPEROPT_DIR: &str = "hyperparameter_optimization";

/// Invalidation request for a rerun
#[derive(Debug, Clone, Default)]
pub struct RerunTargets {
    /// Architectures whose artifacts should be invalidated
    pub architectures: Vec<Architecture>,

    /// Invalidate cross-validation artifacts
    pub cross_validation: bool,

    /// Invalidate hyperparameter-search artifacts
    pub hyperopt: bool,
}

/// One path slated for deletion
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    /// Absolute path
    pub path: PathBuf,

    /// Path relative to the sweep root, for display
    pub label: String,
}

/// Set of paths to delete before a rerun
///
/// Invariant: no entry is a descendant of another entry (directory deletion
/// is recursive, so overlapping entries would double-delete).
#[derive(Debug, Default)]
pub struct RerunPlan {
    entries: Vec<PlanEntry>,
}

impl RerunPlan {
    /// Planned entries, sorted by label
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Whether nothing is slated for deletion
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of planned entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Display labels of all entries
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }
}

/// Result of executing a plan's deletions
#[derive(Debug, Default)]
pub struct RerunOutcome {
    /// Labels of entries that were deleted
    pub removed: Vec<String>,

    /// Labels of entries that were already gone
    pub skipped: Vec<String>,

    /// Labels of entries that could not be deleted
    pub failed: Vec<String>,
}

/// Compute the deletion plan for the given targets
pub fn plan(sweep_root: &Path, targets: &RerunTargets) -> Result<RerunPlan> {
    let mut selection = Selection::new(sweep_root);

    match ArtifactManifest::load(sweep_root)? {
        Some(manifest) => plan_from_manifest(sweep_root, targets, &manifest, &mut selection),
        None => {
            warn!("sweep has no artifact manifest, falling back to directory scan");
            plan_from_scan(sweep_root, targets, &mut selection);
        }
    }

    // The CV report is invalidated whenever cross-validation is, or it would
    // be reloaded as stale state on the rerun.
    if targets.cross_validation {
        selection.add(sweep_root.join(CV_REPORT_FILE));
    }

    let mut entries = selection.into_entries();
    entries.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(RerunPlan { entries })
}

/// Execute a plan's deletions, consuming the plan
///
/// Each entry is isolated: one undeletable path is logged and the rest of
/// the plan continues.
pub fn execute(plan: RerunPlan) -> RerunOutcome {
    let mut outcome = RerunOutcome::default();

    for entry in plan.entries {
        if !entry.path.exists() {
            info!(path = entry.label.as_str(), "already removed, skipping");
            outcome.skipped.push(entry.label);
            continue;
        }

        let result = if entry.path.is_file() {
            std::fs::remove_file(&entry.path)
        } else {
            std::fs::remove_dir_all(&entry.path)
        };

        match result {
            Ok(()) => {
                info!(path = entry.label.as_str(), "removed");
                outcome.removed.push(entry.label);
            }
            Err(e) => {
                error!(path = entry.label.as_str(), "failed to remove: {}", e);
                outcome.failed.push(entry.label);
            }
        }
    }

    outcome
}

fn plan_from_manifest(
    sweep_root: &Path,
    targets: &RerunTargets,
    manifest: &ArtifactManifest,
    selection: &mut Selection,
) {
    let arch_names: HashSet<&str> = targets.architectures.iter().map(|a| a.as_str()).collect();

    for entry in manifest.entries() {
        let matches_arch = arch_names.contains(entry.architecture.as_str());
        let selected = match entry.phase {
            SweepPhase::Architecture => matches_arch,
            SweepPhase::CrossValidation => {
                targets.cross_validation && (arch_names.is_empty() || matches_arch)
            }
            SweepPhase::Hyperopt => targets.hyperopt && (arch_names.is_empty() || matches_arch),
        };

        if selected {
            for path in &entry.artifact_paths {
                selection.add(sweep_root.join(path));
            }
        }
    }

    // With no specific architectures named, the whole refinement trees go.
    if targets.cross_validation && arch_names.is_empty() {
        selection.add(sweep_root.join(CV_DIR));
    }
    if targets.hyperopt && arch_names.is_empty() {
        selection.add(sweep_root.join(HYPEROPT_DIR));
    }
}

fn plan_from_scan(sweep_root: &Path, targets: &RerunTargets, selection: &mut Selection) {
    // Directories first so the descendant filter suppresses files inside
    // already-selected trees.
    for architecture in &targets.architectures {
        let name = architecture.as_str();
        for entry in WalkDir::new(sweep_root).into_iter().filter_map(|e| e.ok()) {
            if entry.depth() == 0 {
                continue;
            }
            if entry.file_type().is_dir() && entry.file_name() == name {
                selection.add(entry.path().to_path_buf());
            }
        }
    }

    for architecture in &targets.architectures {
        let name = architecture.as_str();
        for entry in WalkDir::new(sweep_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if file_name.contains(name) && file_name.ends_with(".json") {
                selection.add(entry.path().to_path_buf());
            }
        }
    }

    if targets.cross_validation && targets.architectures.is_empty() {
        selection.add(sweep_root.join(CV_DIR));
    }

    let hyperopt_dir = sweep_root.join(HYPEROPT_DIR);
    if targets.hyperopt {
        if targets.architectures.is_empty() {
            selection.add(hyperopt_dir);
        } else if hyperopt_dir.exists() {
            for architecture in &targets.architectures {
                let name = architecture.as_str();
                for entry in WalkDir::new(&hyperopt_dir).into_iter().filter_map(|e| e.ok()) {
                    if entry.depth() == 0 {
                        continue;
                    }
                    if entry.file_name().to_string_lossy().contains(name) {
                        selection.add(entry.path().to_path_buf());
                    }
                }
            }
        }
    }
}

/// Selected paths with the no-nested-entries invariant enforced on insert
struct Selection {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl Selection {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            paths: Vec::new(),
        }
    }

    fn add(&mut self, path: PathBuf) {
        if !path.exists() {
            return;
        }

        // Already covered by a selected directory.
        if self
            .paths
            .iter()
            .any(|selected| selected.is_dir() && path.starts_with(selected))
        {
            return;
        }

        // A new directory subsumes any previously selected descendants.
        if path.is_dir() {
            self.paths.retain(|selected| !selected.starts_with(&path));
        }

        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    fn into_entries(self) -> Vec<PlanEntry> {
        self.paths
            .into_iter()
            .map(|path| {
                let label = path
                    .strip_prefix(&self.root)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| path.display().to_string());
                PlanEntry { path, label }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::manifest::ManifestEntry;
    use std::fs;
    use tempfile::TempDir;

    /// Lay out a legacy sweep tree (no manifest)
    fn legacy_tree(root: &Path) {
        for preproc in ["enhanced_preprocessing", "minimal_preprocessing"] {
            for dataset in ["dataset1", "dataset2"] {
                for arch in ["cnn", "siamese"] {
                    let dir = root.join(preproc).join(dataset).join(arch);
                    fs::create_dir_all(dir.join("checkpoints")).unwrap();
                    fs::write(dir.join("unit_summary.json"), "{}").unwrap();
                }
            }
        }
        let cv = root.join(CV_DIR);
        fs::create_dir_all(cv.join("cnn").join("dataset1")).unwrap();
        fs::create_dir_all(cv.join("siamese").join("dataset1")).unwrap();
        fs::write(root.join(CV_REPORT_FILE), "{}").unwrap();
        fs::write(root.join("results_cnn_dataset1.json"), "{}").unwrap();
    }

    #[test]
    fn test_scan_selects_only_requested_architecture() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let targets = RerunTargets {
            architectures: vec![Architecture::Cnn],
            ..RerunTargets::default()
        };
        let plan = plan(dir.path(), &targets).unwrap();

        assert!(!plan.is_empty());
        for label in plan.labels() {
            assert!(
                label.contains("cnn"),
                "plan selected a non-target path: {}",
                label
            );
            assert!(!label.contains("siamese"));
        }
    }

    #[test]
    fn test_no_entry_is_descendant_of_another() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let targets = RerunTargets {
            architectures: vec![Architecture::Cnn, Architecture::Siamese],
            cross_validation: true,
            hyperopt: false,
        };
        let plan = plan(dir.path(), &targets).unwrap();

        for a in plan.entries() {
            for b in plan.entries() {
                if a != b {
                    assert!(
                        !a.path.starts_with(&b.path),
                        "{} is nested under {}",
                        a.label,
                        b.label
                    );
                }
            }
        }
    }

    #[test]
    fn test_result_file_inside_selected_dir_excluded() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let targets = RerunTargets {
            architectures: vec![Architecture::Cnn],
            ..RerunTargets::default()
        };
        let plan = plan(dir.path(), &targets).unwrap();

        // unit_summary.json lives inside the selected cnn directories and
        // must not appear as its own entry.
        assert!(plan.labels().iter().all(|l| !l.ends_with("unit_summary.json")));
        // The top-level result file is outside any selected directory.
        assert!(plan
            .labels()
            .iter()
            .any(|l| *l == "results_cnn_dataset1.json"));
    }

    #[test]
    fn test_cv_whole_directory_when_no_architectures_named() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let targets = RerunTargets {
            cross_validation: true,
            ..RerunTargets::default()
        };
        let plan = plan(dir.path(), &targets).unwrap();

        let labels = plan.labels();
        assert!(labels.contains(&CV_DIR));
        assert!(labels.contains(&CV_REPORT_FILE));
    }

    #[test]
    fn test_plan_is_idempotent_and_empties_after_execution() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let targets = RerunTargets {
            architectures: vec![Architecture::Cnn],
            cross_validation: true,
            hyperopt: true,
        };

        let first = plan(dir.path(), &targets).unwrap();
        let second = plan(dir.path(), &targets).unwrap();
        assert_eq!(first.labels(), second.labels());

        let outcome = execute(first);
        assert!(outcome.failed.is_empty());

        let after = plan(dir.path(), &targets).unwrap();
        assert!(after.is_empty(), "paths survived execution: {:?}", after.labels());
    }

    #[test]
    fn test_execute_isolates_per_path_failures() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("cnn");
        fs::create_dir_all(&good).unwrap();

        let plan = RerunPlan {
            entries: vec![
                PlanEntry {
                    path: dir.path().join("never_existed"),
                    label: "never_existed".to_string(),
                },
                PlanEntry {
                    path: good.clone(),
                    label: "cnn".to_string(),
                },
            ],
        };

        let outcome = execute(plan);
        assert_eq!(outcome.skipped, vec!["never_existed"]);
        assert_eq!(outcome.removed, vec!["cnn"]);
        assert!(!good.exists());
    }

    #[test]
    fn test_manifest_resolution_exact_lookup() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let mut manifest = ArtifactManifest::load_or_new(dir.path()).unwrap();
        manifest
            .record(ManifestEntry {
                unit_id: "enhanced_dataset1_cnn".to_string(),
                architecture: "cnn".to_string(),
                dataset: "dataset1".to_string(),
                phase: SweepPhase::Architecture,
                artifact_paths: vec!["enhanced_preprocessing/dataset1/cnn".to_string()],
            })
            .unwrap();
        manifest
            .record(ManifestEntry {
                unit_id: "enhanced_dataset1_siamese".to_string(),
                architecture: "siamese".to_string(),
                dataset: "dataset1".to_string(),
                phase: SweepPhase::Architecture,
                artifact_paths: vec!["enhanced_preprocessing/dataset1/siamese".to_string()],
            })
            .unwrap();

        let targets = RerunTargets {
            architectures: vec![Architecture::Cnn],
            ..RerunTargets::default()
        };
        let plan = plan(dir.path(), &targets).unwrap();

        assert_eq!(plan.labels(), vec!["enhanced_preprocessing/dataset1/cnn"]);
    }

    #[test]
    fn test_manifest_cv_entries_filtered_by_architecture() {
        let dir = TempDir::new().unwrap();
        legacy_tree(dir.path());

        let mut manifest = ArtifactManifest::load_or_new(dir.path()).unwrap();
        for arch in ["cnn", "siamese"] {
            manifest
                .record(ManifestEntry {
                    unit_id: format!("cv_{}_dataset1", arch),
                    architecture: arch.to_string(),
                    dataset: "dataset1".to_string(),
                    phase: SweepPhase::CrossValidation,
                    artifact_paths: vec![format!("{}/{}/dataset1", CV_DIR, arch)],
                })
                .unwrap();
        }

        let targets = RerunTargets {
            architectures: vec![Architecture::Siamese],
            cross_validation: true,
            hyperopt: false,
        };
        let plan = plan(dir.path(), &targets).unwrap();

        let labels = plan.labels();
        assert!(labels.contains(&"cross_validation/siamese/dataset1"));
        assert!(labels.contains(&CV_REPORT_FILE));
        assert!(!labels.iter().any(|l| l.contains("cross_validation/cnn")));
    }
}
