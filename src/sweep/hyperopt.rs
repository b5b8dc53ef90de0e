//! Hyperparameter search
//!
//! Adapter around a trial-based optimizer. The optimizer proposes
//! parameters; the objective trains one unit and yields a scalar score. A
//! crashed trial scores 0.0 and never aborts the search. The search budget
//! is a trial count or a wall-clock timeout, whichever is exhausted first.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::training::UnitSummary;

/// Filename a search summary is persisted under
pub const HYPEROPT_SUMMARY_FILE: &str = "hyperopt_summary.json";

/// Hyperparameters sampled for one trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialParams {
    /// Number of training epochs
    pub epochs: u32,

    /// Training batch size
    pub batch_size: usize,

    /// Learning rate
    pub learning_rate: f64,
}

/// Search space bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Inclusive epoch range
    pub epochs: (u32, u32),

    /// Candidate batch sizes
    pub batch_sizes: Vec<usize>,

    /// Learning-rate bounds, sampled log-uniformly
    pub learning_rate: (f64, f64),
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            epochs: (10, 50),
            batch_sizes: vec![16, 32, 64, 128],
            learning_rate: (1e-5, 1e-2),
        }
    }
}

/// Terminal state of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    /// Ran to completion and produced a score
    Complete,
    /// Raised; scored as worst-possible
    Failed,
    /// Cut short by the optimizer
    Pruned,
}

/// One search iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperoptTrial {
    /// Trial number (0-based)
    pub number: usize,

    /// Sampled hyperparameters
    pub params: TrialParams,

    /// Objective score (0.0 for failed trials)
    pub score: f64,

    /// Terminal state
    pub status: TrialStatus,
}

/// External trial-based optimizer interface
///
/// The search algorithm's internals live outside this crate; only the
/// suggest/report/prune surface is consumed here.
pub trait TrialOptimizer {
    /// Propose hyperparameters for the given trial number
    fn suggest(&mut self, trial_number: usize) -> TrialParams;

    /// Observe a finished trial
    fn report(&mut self, _trial: &HyperoptTrial) {}

    /// Whether a running trial should be cut short at the given epoch
    fn should_prune(&self, _trial_number: usize, _epoch: u32, _score: f64) -> bool {
        false
    }
}

/// Seeded random search over a [`SearchSpace`]
#[derive(Debug)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    /// Create a random search over the given space
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TrialOptimizer for RandomSearch {
    fn suggest(&mut self, _trial_number: usize) -> TrialParams {
        let (epoch_lo, epoch_hi) = self.space.epochs;
        let (lr_lo, lr_hi) = self.space.learning_rate;

        let log_lr = self.rng.random_range(lr_lo.ln()..=lr_hi.ln());

        TrialParams {
            epochs: self.rng.random_range(epoch_lo..=epoch_hi),
            batch_size: *self
                .space
                .batch_sizes
                .choose(&mut self.rng)
                .unwrap_or(&32),
            learning_rate: log_lr.exp(),
        }
    }
}

/// Search budget and driver
#[derive(Debug, Clone)]
pub struct HyperoptSearch {
    /// Maximum number of trials
    pub n_trials: usize,

    /// Wall-clock budget
    pub timeout: Duration,
}

/// Search outcome: trial history plus the best-found configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperoptSummary {
    /// Every trial, in order
    pub trials: Vec<HyperoptTrial>,

    /// Number of the best completed trial
    pub best_trial: Option<usize>,

    /// Parameters of the best completed trial
    pub best_params: Option<TrialParams>,

    /// Score of the best completed trial
    pub best_value: Option<f64>,

    /// Result of the final unit trained with the best parameters
    #[serde(default)]
    pub final_summary: Option<UnitSummary>,
}

impl HyperoptSearch {
    /// Create a search with the given trial and wall-clock budget
    pub fn new(n_trials: usize, timeout: Duration) -> Self {
        Self { n_trials, timeout }
    }

    /// Run the search
    ///
    /// The objective builds a unit from the sampled parameters, trains it,
    /// and returns its score. Objective errors are absorbed: the trial is
    /// recorded as failed with score 0.0 and the search continues.
    pub fn run<F>(
        &self,
        optimizer: &mut dyn TrialOptimizer,
        mut objective: F,
    ) -> HyperoptSummary
    where
        F: FnMut(usize, &TrialParams) -> crate::error::Result<f64>,
    {
        let started = Instant::now();
        let mut trials = Vec::new();

        for number in 0..self.n_trials {
            if started.elapsed() >= self.timeout {
                warn!(
                    completed = number,
                    budget = self.n_trials,
                    "search timeout reached"
                );
                break;
            }

            let params = optimizer.suggest(number);
            info!(trial = number, ?params, "running trial");

            let trial = match objective(number, &params) {
                Ok(score) => HyperoptTrial {
                    number,
                    params,
                    score,
                    status: TrialStatus::Complete,
                },
                Err(e) => {
                    error!(trial = number, "trial failed, scoring 0.0: {}", e);
                    HyperoptTrial {
                        number,
                        params,
                        score: 0.0,
                        status: TrialStatus::Failed,
                    }
                }
            };

            optimizer.report(&trial);
            trials.push(trial);
        }

        let best = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Complete)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        HyperoptSummary {
            best_trial: best.map(|t| t.number),
            best_params: best.map(|t| t.params),
            best_value: best.map(|t| t.score),
            trials,
            final_summary: None,
        }
    }
}

/// Extract a trial score from a unit summary
///
/// Prefers best validation accuracy, falls back to test accuracy, then 0.0.
pub fn extract_score(summary: &UnitSummary) -> f64 {
    summary
        .best_validation_metrics
        .get("accuracy")
        .copied()
        .or_else(|| summary.accuracy())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_random_search_stays_in_bounds() {
        let mut search = RandomSearch::new(SearchSpace::default(), 42);
        for n in 0..50 {
            let params = search.suggest(n);
            assert!((10..=50).contains(&params.epochs));
            assert!([16, 32, 64, 128].contains(&params.batch_size));
            assert!(params.learning_rate >= 1e-5 && params.learning_rate <= 1e-2);
        }
    }

    #[test]
    fn test_same_seed_reproduces_suggestions() {
        let mut a = RandomSearch::new(SearchSpace::default(), 7);
        let mut b = RandomSearch::new(SearchSpace::default(), 7);
        for n in 0..10 {
            assert_eq!(a.suggest(n), b.suggest(n));
        }
    }

    #[test]
    fn test_best_trial_selected_by_score() {
        let search = HyperoptSearch::new(5, Duration::from_secs(3600));
        let mut optimizer = RandomSearch::new(SearchSpace::default(), 42);

        let summary = search.run(&mut optimizer, |number, _| Ok(0.5 + number as f64 / 100.0));

        assert_eq!(summary.trials.len(), 5);
        assert_eq!(summary.best_trial, Some(4));
        assert_eq!(summary.best_value, Some(0.54));
    }

    #[test]
    fn test_failed_trial_scores_zero_and_search_continues() {
        let search = HyperoptSearch::new(4, Duration::from_secs(3600));
        let mut optimizer = RandomSearch::new(SearchSpace::default(), 42);

        let summary = search.run(&mut optimizer, |number, _| {
            if number == 1 {
                Err(Error::training("trial crashed"))
            } else {
                Ok(0.7)
            }
        });

        assert_eq!(summary.trials.len(), 4);
        assert_eq!(summary.trials[1].status, TrialStatus::Failed);
        assert_eq!(summary.trials[1].score, 0.0);
        // The failed trial is never the best.
        assert_ne!(summary.best_trial, Some(1));
        assert_eq!(summary.best_value, Some(0.7));
    }

    #[test]
    fn test_all_trials_failed_yields_no_best() {
        let search = HyperoptSearch::new(3, Duration::from_secs(3600));
        let mut optimizer = RandomSearch::new(SearchSpace::default(), 42);

        let summary = search.run(&mut optimizer, |_, _| {
            Err(Error::training("nothing works"))
        });

        assert_eq!(summary.trials.len(), 3);
        assert!(summary.best_trial.is_none());
        assert!(summary.best_params.is_none());
    }

    #[test]
    fn test_timeout_cuts_search_short() {
        let search = HyperoptSearch::new(1000, Duration::from_millis(50));
        let mut optimizer = RandomSearch::new(SearchSpace::default(), 42);

        let summary = search.run(&mut optimizer, |_, _| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(0.5)
        });

        assert!(summary.trials.len() < 1000);
        assert!(!summary.trials.is_empty());
    }
}
