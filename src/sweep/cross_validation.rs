//! K-fold cross-validation
//!
//! Stratified splitting over the label set, per-fold training with
//! fold-specific seeds, and mean/standard-deviation aggregation across
//! successful folds. A fold failure never aborts the remaining folds.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};

/// Filename aggregated CV results are persisted under
pub const AGGREGATED_RESULTS_FILE: &str = "aggregated_results.json";

/// Index sets of one fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    /// Training sample indices (the k-1 non-held-out folds)
    pub train_indices: Vec<usize>,

    /// Held-out validation sample indices
    pub val_indices: Vec<usize>,
}

/// Outcome of one fold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvFoldResult {
    /// Fold index (0-based)
    pub fold: usize,

    /// Fold-specific random seed (`base seed + fold index`)
    pub seed: u64,

    /// Test metrics of the fold
    pub test_metrics: HashMap<String, f64>,
}

/// Mean and standard deviation of one metric across folds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    /// Mean across successful folds
    pub mean: f64,

    /// Population standard deviation across successful folds
    pub std: f64,
}

/// Aggregated outcome of a full cross-validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedCvResult {
    /// Stats per metric; only metrics present in every successful fold
    pub metrics: BTreeMap<String, MetricStats>,

    /// Successful fold results
    pub folds: Vec<CvFoldResult>,

    /// Indices of folds that raised
    pub failed_folds: Vec<usize>,
}

/// Stratified k-way splitter and fold driver
#[derive(Debug, Clone, Copy)]
pub struct CrossValidator {
    /// Number of folds
    pub folds: usize,

    /// Base random seed; fold `i` uses `base_seed + i`
    pub base_seed: u64,
}

impl CrossValidator {
    /// Create a validator with the given fold count and base seed
    pub fn new(folds: usize, base_seed: u64) -> Self {
        Self { folds, base_seed }
    }

    /// Run every fold through `run_fold` and aggregate the outcomes
    ///
    /// `run_fold` receives the fold index, the fold-specific seed, and the
    /// split, and returns the fold's test metrics. A fold that errors is
    /// recorded in `failed_folds` and excluded from aggregation.
    pub fn run<F>(&self, labels: &[usize], mut run_fold: F) -> Result<AggregatedCvResult>
    where
        F: FnMut(usize, u64, &FoldSplit) -> Result<HashMap<String, f64>>,
    {
        let splits = stratified_folds(labels, self.folds, self.base_seed)?;

        let mut folds = Vec::new();
        let mut failed_folds = Vec::new();

        for (fold, split) in splits.iter().enumerate() {
            let seed = self.base_seed + fold as u64;
            info!(fold, seed, "running cross-validation fold");

            match run_fold(fold, seed, split) {
                Ok(test_metrics) => {
                    folds.push(CvFoldResult {
                        fold,
                        seed,
                        test_metrics,
                    });
                }
                Err(e) => {
                    error!(fold, "cross-validation fold failed: {}", e);
                    failed_folds.push(fold);
                }
            }
        }

        Ok(AggregatedCvResult {
            metrics: aggregate(&folds),
            folds,
            failed_folds,
        })
    }
}

/// Stratified k-way split: per-class shuffle, round-robin fold assignment
///
/// Every class contributes as evenly as possible to every fold.
pub fn stratified_folds(labels: &[usize], k: usize, seed: u64) -> Result<Vec<FoldSplit>> {
    if k < 2 {
        return Err(Error::config("cross-validation requires at least 2 folds"));
    }
    if labels.len() < k {
        return Err(Error::config(format!(
            "cannot split {} samples into {} folds",
            labels.len(),
            k
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(index);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut fold_members: Vec<Vec<usize>> = vec![Vec::new(); k];

    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        for (position, &index) in indices.iter().enumerate() {
            fold_members[position % k].push(index);
        }
    }

    Ok((0..k)
        .map(|fold| {
            let val_indices = fold_members[fold].clone();
            let train_indices = fold_members
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != fold)
                .flat_map(|(_, members)| members.iter().copied())
                .collect();
            FoldSplit {
                train_indices,
                val_indices,
            }
        })
        .collect())
}

/// Population standard deviation
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Aggregate metrics present in every successful fold
fn aggregate(folds: &[CvFoldResult]) -> BTreeMap<String, MetricStats> {
    let mut stats = BTreeMap::new();
    let Some(first) = folds.first() else {
        return stats;
    };

    for metric in first.test_metrics.keys() {
        let values: Vec<f64> = folds
            .iter()
            .filter_map(|fold| fold.test_metrics.get(metric).copied())
            .collect();

        // Only metrics every successful fold reported.
        if values.len() != folds.len() {
            continue;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        stats.insert(
            metric.clone(),
            MetricStats {
                mean,
                std: population_std(&values),
            },
        );
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn labels(classes: usize, per_class: usize) -> Vec<usize> {
        (0..classes * per_class).map(|i| i % classes).collect()
    }

    #[test]
    fn test_splits_are_disjoint_and_cover_everything() {
        let labels = labels(10, 12);
        let splits = stratified_folds(&labels, 5, 42).unwrap();
        assert_eq!(splits.len(), 5);

        let mut seen = vec![0usize; labels.len()];
        for split in &splits {
            for &i in &split.val_indices {
                seen[i] += 1;
            }
            // Train and validation never overlap within a fold.
            for &i in &split.val_indices {
                assert!(!split.train_indices.contains(&i));
            }
            assert_eq!(split.train_indices.len() + split.val_indices.len(), labels.len());
        }
        // Every sample is held out exactly once.
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_splits_are_stratified() {
        let labels = labels(4, 20);
        let splits = stratified_folds(&labels, 5, 7).unwrap();

        for split in &splits {
            for class in 0..4 {
                let count = split
                    .val_indices
                    .iter()
                    .filter(|&&i| labels[i] == class)
                    .count();
                assert_eq!(count, 4, "class {} unevenly distributed", class);
            }
        }
    }

    #[test]
    fn test_same_seed_reproduces_split() {
        let labels = labels(6, 10);
        let a = stratified_folds(&labels, 5, 99).unwrap();
        let b = stratified_folds(&labels, 5, 99).unwrap();
        assert_eq!(a, b);

        let c = stratified_folds(&labels, 5, 100).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_fold_seeds_derive_from_base() {
        let labels = labels(5, 10);
        let cv = CrossValidator::new(5, 42);
        let mut seeds = Vec::new();

        cv.run(&labels, |_, seed, _| {
            seeds.push(seed);
            Ok(HashMap::from([("accuracy".to_string(), 0.8)]))
        })
        .unwrap();

        assert_eq!(seeds, vec![42, 43, 44, 45, 46]);
    }

    #[test]
    fn test_aggregation_matches_population_formula() {
        let labels = labels(5, 10);
        let cv = CrossValidator::new(5, 42);
        let accuracies = [0.80, 0.82, 0.78, 0.81, 0.79];

        let result = cv
            .run(&labels, |fold, _, _| {
                Ok(HashMap::from([("accuracy".to_string(), accuracies[fold])]))
            })
            .unwrap();

        let stats = result.metrics.get("accuracy").unwrap();
        assert_relative_eq!(stats.mean, 0.80, epsilon = 1e-12);
        assert_relative_eq!(stats.std, population_std(&accuracies), epsilon = 1e-12);
        assert_relative_eq!(stats.std, 0.0141421356, epsilon = 1e-9);
        assert!(result.failed_folds.is_empty());
    }

    #[test]
    fn test_failed_fold_excluded_from_aggregate() {
        let labels = labels(5, 10);
        let cv = CrossValidator::new(5, 42);
        let accuracies = [0.80, 0.82, 0.78, 0.81, 0.79];

        let result = cv
            .run(&labels, |fold, _, _| {
                if fold == 3 {
                    return Err(Error::training("fold blew up"));
                }
                Ok(HashMap::from([("accuracy".to_string(), accuracies[fold])]))
            })
            .unwrap();

        assert_eq!(result.failed_folds, vec![3]);
        assert_eq!(result.folds.len(), 4);

        let expected = [0.80, 0.82, 0.78, 0.79];
        let stats = result.metrics.get("accuracy").unwrap();
        assert_relative_eq!(
            stats.mean,
            expected.iter().sum::<f64>() / 4.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(stats.std, population_std(&expected), epsilon = 1e-12);
    }

    #[test]
    fn test_metric_missing_from_one_fold_not_aggregated() {
        let labels = labels(5, 10);
        let cv = CrossValidator::new(5, 42);

        let result = cv
            .run(&labels, |fold, _, _| {
                let mut metrics = HashMap::from([("accuracy".to_string(), 0.8)]);
                if fold != 2 {
                    metrics.insert("f1".to_string(), 0.75);
                }
                Ok(metrics)
            })
            .unwrap();

        assert!(result.metrics.contains_key("accuracy"));
        assert!(!result.metrics.contains_key("f1"));
    }

    #[test]
    fn test_too_few_samples_rejected() {
        assert!(stratified_folds(&[0, 1, 0], 5, 42).is_err());
        assert!(stratified_folds(&labels(5, 10), 1, 42).is_err());
    }
}
