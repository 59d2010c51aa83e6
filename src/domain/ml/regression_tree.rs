//! CART-style regression tree.
//!
//! Splits are chosen by variance reduction over a bounded set of sampled
//! thresholds per feature. Feature importance is computed afterwards from
//! Gini impurity over binned target classes, so it reflects how well each
//! split separates target regimes rather than raw variance.

use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use crate::domain::ml::dataset::clean_training_rows;
use crate::domain::ml::learner::{BaseLearner, normalize_importance, uniform_importance};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Upper bound on thresholds evaluated per feature and node.
pub const MAX_CANDIDATE_THRESHOLDS: usize = 50;

/// Wall-clock budget for a single tree induction.
pub const DEFAULT_TREE_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Number of target classes used for impurity-based importance.
pub const IMPORTANCE_CLASS_BINS: usize = 10;

/// Splits must reduce variance by more than this, relative to the node's
/// squared target spread, to be kept.
const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
        }
    }
}

/// One node of a trained tree. Children are exclusively owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        samples: usize,
        class_counts: Vec<usize>,
    },
    /// `sample[feature_index] <= threshold` goes left.
    Internal {
        feature_index: usize,
        threshold: f64,
        value: f64,
        samples: usize,
        class_counts: Vec<usize>,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn value(&self) -> f64 {
        match self {
            TreeNode::Leaf { value, .. } | TreeNode::Internal { value, .. } => *value,
        }
    }

    pub fn samples(&self) -> usize {
        match self {
            TreeNode::Leaf { samples, .. } | TreeNode::Internal { samples, .. } => *samples,
        }
    }

    pub fn class_counts(&self) -> &[usize] {
        match self {
            TreeNode::Leaf { class_counts, .. } | TreeNode::Internal { class_counts, .. } => {
                class_counts
            }
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Internal { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Internal { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

/// Borrowed view of the cleaned training rows for one induction.
struct InductionData<'a> {
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    class_edges: &'a [f64],
    n_features: usize,
}

impl InductionData<'_> {
    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.class_edges.len() + 1];
        for &i in indices {
            counts[class_of(self.class_edges, self.targets[i])] += 1;
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    params: TreeParams,
    root: Option<TreeNode>,
    feature_importance: Vec<f64>,
    budget: Duration,
}

impl RegressionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params: TreeParams {
                min_samples_leaf: params.min_samples_leaf.max(1),
                ..params
            },
            root: None,
            feature_importance: Vec::new(),
            budget: DEFAULT_TREE_BUDGET,
        }
    }

    /// Override the per-tree wall-clock budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Rebuild an untrained tree from persisted hyperparameters. Tree
    /// structure is never persisted, so the result must be retrained.
    pub fn from_hyperparameters(value: &serde_json::Value) -> Result<Self, TrainingError> {
        let params: TreeParams = serde_json::from_value(value.clone())
            .map_err(|e| TrainingError::invalid(format!("bad tree hyperparameters: {}", e)))?;
        Ok(Self::new(params))
    }

    pub fn params(&self) -> TreeParams {
        self.params
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map(TreeNode::depth).unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.root.as_ref().map(TreeNode::node_count).unwrap_or(0)
    }

    fn build_node(
        &self,
        data: &InductionData<'_>,
        indices: Vec<usize>,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<TreeNode, TrainingError> {
        cancel.check()?;

        let samples = indices.len();
        let value = mean_of(indices.iter().map(|&i| data.targets[i]));
        let class_counts = data.class_counts(&indices);

        let first = data.targets[indices[0]];
        let homogeneous = indices.iter().all(|&i| data.targets[i] == first);

        if depth >= self.params.max_depth || samples < self.params.min_samples_split || homogeneous
        {
            return Ok(TreeNode::Leaf {
                value,
                samples,
                class_counts,
            });
        }

        let Some(split) = self.find_best_split(data, &indices, cancel)? else {
            return Ok(TreeNode::Leaf {
                value,
                samples,
                class_counts,
            });
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| data.features[i][split.feature] <= split.threshold);

        let left = self.build_node(data, left_indices, depth + 1, cancel)?;
        let right = self.build_node(data, right_indices, depth + 1, cancel)?;

        Ok(TreeNode::Internal {
            feature_index: split.feature,
            threshold: split.threshold,
            value,
            samples,
            class_counts,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Scan features in order, thresholds in ascending order. Only a
    /// strictly better score replaces the current best, so ties keep the
    /// earlier feature and threshold.
    fn find_best_split(
        &self,
        data: &InductionData<'_>,
        indices: &[usize],
        cancel: &CancellationToken,
    ) -> Result<Option<SplitCandidate>, TrainingError> {
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<SplitCandidate> = None;
        let center = mean_of(indices.iter().map(|&i| data.targets[i]));
        let scale = indices
            .iter()
            .map(|&i| (data.targets[i] - center).abs())
            .fold(0.0, f64::max);
        if !(scale > 0.0 && scale.is_finite()) {
            return Ok(None);
        }

        for feature in 0..data.n_features {
            cancel.check()?;

            let mut pairs: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (data.features[i][feature], data.targets[i]))
                .collect();
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
            let prefix = PrefixSums::new(&pairs, center, scale);

            let values: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let mut found_valid = false;

            for threshold in candidate_thresholds(&values) {
                if let Some(score) = prefix.split_score(&values, threshold, min_leaf) {
                    found_valid = true;
                    consider(&mut best, feature, threshold, score);
                }
            }

            if !found_valid {
                let (min, max) = (values[0], values[values.len() - 1]);
                let threshold = min + (max - min) / 2.0;
                if let Some(score) = prefix.split_score(&values, threshold, min_leaf) {
                    consider(&mut best, feature, threshold, score);
                }
            }
        }

        Ok(best)
    }
}

fn consider(best: &mut Option<SplitCandidate>, feature: usize, threshold: f64, score: f64) {
    if score <= MIN_SPLIT_GAIN {
        return;
    }
    if best.is_none_or(|b| score > b.score) {
        *best = Some(SplitCandidate {
            feature,
            threshold,
            score,
        });
    }
}

/// Mean computed as an offset from the first value, so large magnitudes
/// neither overflow the running sum nor swamp small differences.
fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let mut values = values.peekable();
    let Some(&first) = values.peek() else {
        return 0.0;
    };
    let (n, offset) = values.fold((0usize, 0.0), |(n, acc), y| (n + 1, acc + (y - first)));
    first + offset / n as f64
}

/// Running sums of targets sorted by one feature's value. Targets are
/// shifted by the node mean and divided by the node's largest deviation, so
/// scores are relative to the node's spread. Raw `sum_sq / n - mean^2`
/// cancels out when targets sit far from zero.
struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    fn new(pairs: &[(f64, f64)], center: f64, scale: f64) -> Self {
        let mut sum = Vec::with_capacity(pairs.len() + 1);
        let mut sum_sq = Vec::with_capacity(pairs.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for (_, y) in pairs {
            let d = (y - center) / scale;
            sum.push(sum[sum.len() - 1] + d);
            sum_sq.push(sum_sq[sum_sq.len() - 1] + d * d);
        }
        Self { sum, sum_sq }
    }

    fn variance(&self, start: usize, end: usize) -> f64 {
        let n = (end - start) as f64;
        if n == 0.0 {
            return 0.0;
        }
        let mean = (self.sum[end] - self.sum[start]) / n;
        ((self.sum_sq[end] - self.sum_sq[start]) / n - mean * mean).max(0.0)
    }

    /// Parent variance minus the sample-weighted child variances, or `None`
    /// when either side falls below `min_leaf`.
    fn split_score(&self, sorted_values: &[f64], threshold: f64, min_leaf: usize) -> Option<f64> {
        let n = sorted_values.len();
        let left = sorted_values.partition_point(|&v| v <= threshold);
        let right = n - left;
        if left < min_leaf || right < min_leaf {
            return None;
        }

        let total = n as f64;
        let parent = self.variance(0, n);
        let children = (left as f64 / total) * self.variance(0, left)
            + (right as f64 / total) * self.variance(left, n);
        Some(parent - children)
    }
}

/// Midpoints between adjacent distinct sorted values, thinned to at most
/// [`MAX_CANDIDATE_THRESHOLDS`] uniformly spaced picks.
pub fn candidate_thresholds(sorted_values: &[f64]) -> Vec<f64> {
    let midpoints: Vec<f64> = sorted_values
        .windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| w[0] + (w[1] - w[0]) / 2.0)
        .collect();

    if midpoints.len() <= MAX_CANDIDATE_THRESHOLDS {
        return midpoints;
    }

    let step = (midpoints.len() - 1) as f64 / (MAX_CANDIDATE_THRESHOLDS - 1) as f64;
    let mut picked: Vec<f64> = (0..MAX_CANDIDATE_THRESHOLDS)
        .map(|k| midpoints[((k as f64 * step).round() as usize).min(midpoints.len() - 1)])
        .collect();
    picked.dedup();
    picked
}

/// Class boundaries for importance: midpoints between distinct targets when
/// there are few, otherwise quantile cut points.
fn class_edges(targets: &[f64]) -> Vec<f64> {
    let mut sorted = targets.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut unique = sorted.clone();
    unique.dedup();

    if unique.len() <= IMPORTANCE_CLASS_BINS {
        return unique
            .windows(2)
            .map(|w| w[0] + (w[1] - w[0]) / 2.0)
            .collect();
    }

    let mut edges: Vec<f64> = (1..IMPORTANCE_CLASS_BINS)
        .map(|k| sorted[k * sorted.len() / IMPORTANCE_CLASS_BINS])
        .collect();
    edges.dedup();
    edges
}

fn class_of(edges: &[f64], target: f64) -> usize {
    edges.partition_point(|&e| e < target)
}

fn gini(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

fn accumulate_importance(node: &TreeNode, importance: &mut [f64]) {
    if let TreeNode::Internal {
        feature_index,
        samples,
        class_counts,
        left,
        right,
        ..
    } = node
    {
        let n = *samples as f64;
        let children = (left.samples() as f64 / n) * gini(left.class_counts())
            + (right.samples() as f64 / n) * gini(right.class_counts());
        let drop = (gini(class_counts) - children).max(0.0);
        if let Some(slot) = importance.get_mut(*feature_index) {
            *slot += drop * n;
        }
        accumulate_importance(left, importance);
        accumulate_importance(right, importance);
    }
}

/// Normalized importance; falls back to uniform when fewer than two
/// features received any credit.
fn compute_importance(root: &TreeNode, n_features: usize) -> Vec<f64> {
    let mut raw = vec![0.0; n_features];
    accumulate_importance(root, &mut raw);

    let credited = raw.iter().filter(|&&v| v > 0.0).count();
    if credited < 2 {
        return uniform_importance(n_features);
    }
    normalize_importance(&raw).unwrap_or_else(|| uniform_importance(n_features))
}

impl Default for RegressionTree {
    fn default() -> Self {
        Self::new(TreeParams::default())
    }
}

impl BaseLearner for RegressionTree {
    fn train(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        cancel: &CancellationToken,
    ) -> Result<(), TrainingError> {
        let (features, targets) = clean_training_rows(features, targets)?;
        let cancel = cancel.child_with_budget(self.budget);

        let edges = class_edges(&targets);
        let data = InductionData {
            features: &features,
            targets: &targets,
            class_edges: &edges,
            n_features: features[0].len(),
        };

        let root = self.build_node(&data, (0..targets.len()).collect(), 0, &cancel)?;
        self.feature_importance = compute_importance(&root, data.n_features);

        debug!(
            "RegressionTree: Trained on {} rows (depth {}, {} nodes)",
            targets.len(),
            root.depth(),
            root.node_count()
        );
        self.root = Some(root);
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> f64 {
        let Some(mut node) = self.root.as_ref() else {
            debug!("RegressionTree: Predict on untrained tree, returning 0.0");
            return 0.0;
        };

        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Internal {
                    feature_index,
                    threshold,
                    value,
                    left,
                    right,
                    ..
                } => {
                    let Some(&x) = sample.get(*feature_index).filter(|x| x.is_finite()) else {
                        debug!(
                            "RegressionTree: Feature {} missing or non-finite in {}-wide sample, using node value",
                            feature_index,
                            sample.len()
                        );
                        return *value;
                    };
                    node = if x <= *threshold { left } else { right };
                }
            }
        }
    }

    fn clone_untrained(&self) -> Box<dyn BaseLearner> {
        Box::new(RegressionTree::new(self.params).with_budget(self.budget))
    }

    fn clone_trained(&self) -> Box<dyn BaseLearner> {
        Box::new(self.clone())
    }

    fn feature_importance(&self) -> Vec<f64> {
        self.feature_importance.clone()
    }

    fn name(&self) -> &str {
        "regression_tree"
    }

    fn is_trained(&self) -> bool {
        self.root.is_some()
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({
            "max_depth": self.params.max_depth,
            "min_samples_split": self.params.min_samples_split,
            "min_samples_leaf": self.params.min_samples_leaf,
        })
    }
}
