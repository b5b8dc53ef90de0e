//! Metric improvement comparison
//!
//! The single improvement predicate shared by the checkpoint store's
//! best-model bookkeeping and the early-stopping monitor, so the two never
//! disagree about what counts as "better".

use serde::{Deserialize, Serialize};

/// Direction in which a monitored metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricMode {
    /// Lower is better (e.g. loss)
    Min,
    /// Higher is better (e.g. accuracy)
    Max,
}

impl MetricMode {
    /// String form used in configs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricMode::Min => "min",
            MetricMode::Max => "max",
        }
    }
}

/// Improvement predicate for a monitored metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImprovementRule {
    /// Improvement direction
    pub mode: MetricMode,

    /// Minimum change that counts as an improvement
    pub min_delta: f64,
}

impl ImprovementRule {
    /// Create a rule with the given direction and minimum delta
    pub fn new(mode: MetricMode, min_delta: f64) -> Self {
        Self { mode, min_delta }
    }

    /// Create a rule with no minimum delta
    pub fn strict(mode: MetricMode) -> Self {
        Self::new(mode, 0.0)
    }

    /// Whether `score` improves on `best`
    ///
    /// A score always improves on an absent best.
    pub fn improved(&self, score: f64, best: Option<f64>) -> bool {
        match best {
            None => true,
            Some(best) => match self.mode {
                MetricMode::Min => score < best - self.min_delta,
                MetricMode::Max => score > best + self.min_delta,
            },
        }
    }
}
