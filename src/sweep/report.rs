//! Consolidated sweep reports
//!
//! A machine-readable aggregate and a human-readable summary document, both
//! keyed by the sweep's experiment id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sweep::cross_validation::AggregatedCvResult;
use crate::sweep::hyperopt::HyperoptSummary;
use crate::training::UnitSummary;
use crate::utils::io::{write_file_atomic, write_json_atomic};

/// Machine-readable report filename
pub const REPORT_JSON_FILE: &str = "sweep_report.json";

/// Human-readable report filename
pub const REPORT_MD_FILE: &str = "sweep_report.md";

/// Consolidated outcome of one sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sweep experiment id
    pub experiment_id: String,

    /// Output directory the sweep wrote to
    pub output_directory: PathBuf,

    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,

    /// Per-unit results, keyed by unit id
    pub unit_results: BTreeMap<String, UnitSummary>,

    /// Top architectures by mean accuracy, best first
    pub top_architectures: Vec<String>,

    /// Unit ids that failed
    pub failed_units: Vec<String>,

    /// Cross-validation results, keyed by `<architecture>_<dataset>`
    pub cv_results: BTreeMap<String, AggregatedCvResult>,

    /// Cross-validation runs that failed
    pub failed_cv: Vec<String>,

    /// Hyperparameter-search results, keyed by `<architecture>_<dataset>`
    pub hyperopt_results: BTreeMap<String, HyperoptSummary>,

    /// Hyperparameter searches that failed
    pub failed_hyperopt: Vec<String>,
}

impl SweepReport {
    /// Persist both report files into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_json_atomic(dir.join(REPORT_JSON_FILE), self)?;
        write_file_atomic(dir.join(REPORT_MD_FILE), self.render_markdown().as_bytes())?;
        Ok(())
    }

    /// Load the machine-readable report from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(dir.join(REPORT_JSON_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Whether any phase recorded a failure
    pub fn has_failures(&self) -> bool {
        !self.failed_units.is_empty() || !self.failed_cv.is_empty() || !self.failed_hyperopt.is_empty()
    }

    /// Render the human-readable summary
    pub fn render_markdown(&self) -> String {
        let mut out = Vec::new();

        out.push("# Sweep Report".to_string());
        out.push(format!(
            "*Generated: {}*\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        out.push("## Overview".to_string());
        out.push(format!("- **Experiment ID**: {}", self.experiment_id));
        out.push(format!(
            "- **Output directory**: {}",
            self.output_directory.display()
        ));
        out.push(format!("- **Units completed**: {}", self.unit_results.len()));
        out.push(format!("- **Units failed**: {}\n", self.failed_units.len()));

        if !self.top_architectures.is_empty() {
            out.push("## Top Architectures".to_string());
            for (rank, arch) in self.top_architectures.iter().enumerate() {
                out.push(format!("{}. **{}**", rank + 1, arch));
            }
            out.push(String::new());
        }

        out.push("## Unit Results".to_string());
        out.push("| Unit | Architecture | Dataset | Accuracy | Precision | Recall | F1 |".to_string());
        out.push("|------|--------------|---------|----------|-----------|--------|----|".to_string());
        for (unit_id, summary) in &self.unit_results {
            let metrics = summary.test_metrics.first();
            let get = |key: &str| {
                metrics
                    .and_then(|m| m.get(key))
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "-".to_string())
            };
            out.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} |",
                unit_id,
                summary.architecture,
                summary.dataset,
                get("accuracy"),
                get("precision"),
                get("recall"),
                get("f1"),
            ));
        }
        out.push(String::new());

        if !self.cv_results.is_empty() {
            out.push("## Cross-Validation".to_string());
            out.push("| Run | Metric | Mean | Std |".to_string());
            out.push("|-----|--------|------|-----|".to_string());
            for (key, result) in &self.cv_results {
                for (metric, stats) in &result.metrics {
                    out.push(format!(
                        "| {} | {} | {:.4} | {:.4} |",
                        key, metric, stats.mean, stats.std
                    ));
                }
            }
            out.push(String::new());
        }

        if !self.hyperopt_results.is_empty() {
            out.push("## Hyperparameter Search".to_string());
            for (key, summary) in &self.hyperopt_results {
                match (&summary.best_params, summary.best_value) {
                    (Some(params), Some(value)) => out.push(format!(
                        "- **{}**: best score {:.4} (epochs {}, batch size {}, lr {:.2e}) over {} trials",
                        key,
                        value,
                        params.epochs,
                        params.batch_size,
                        params.learning_rate,
                        summary.trials.len(),
                    )),
                    _ => out.push(format!(
                        "- **{}**: no successful trial out of {}",
                        key,
                        summary.trials.len()
                    )),
                }
            }
            out.push(String::new());
        }

        if self.has_failures() {
            out.push("## Failures".to_string());
            if !self.failed_units.is_empty() {
                out.push("### Failed units".to_string());
                for failed in &self.failed_units {
                    out.push(format!("- {}", failed));
                }
            }
            if !self.failed_cv.is_empty() {
                out.push("### Failed cross-validation runs".to_string());
                for failed in &self.failed_cv {
                    out.push(format!("- {}", failed));
                }
            }
            if !self.failed_hyperopt.is_empty() {
                out.push("### Failed hyperparameter searches".to_string());
                for failed in &self.failed_hyperopt {
                    out.push(format!("- {}", failed));
                }
            }
            out.push(String::new());
            out.push("These failures were skipped and the sweep continued.".to_string());
        }

        if let Some((unit_id, summary)) = self.best_unit() {
            out.push(String::new());
            out.push("## Conclusions".to_string());
            out.push(format!("- **Best unit**: {}", unit_id));
            out.push(format!("- **Best architecture**: {}", summary.architecture));
            if let Some(accuracy) = summary.accuracy() {
                out.push(format!("- **Best accuracy**: {:.4}", accuracy));
            }
        }

        out.join("\n")
    }

    fn best_unit(&self) -> Option<(&String, &UnitSummary)> {
        self.unit_results
            .iter()
            .filter(|(_, s)| s.accuracy().is_some())
            .max_by(|a, b| {
                a.1.accuracy()
                    .partial_cmp(&b.1.accuracy())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}
