//! Decision-tree surrogate explaining the fitted segments
//!
//! A depth-bounded tree is trained to predict the canonical segment from the
//! raw RFM values. Its held-out accuracy communicates how well a small,
//! human-readable rule set approximates the clustering boundary; it is never
//! used to accept or reject the segmentation itself.

use std::fmt::Write as _;

use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

use crate::data::FEATURE_NAMES;
use crate::error::{Result, SegmentError};

/// Depth bound keeping the tree readable by a human
pub const MAX_DEPTH: usize = 3;

const MIN_SAMPLES_SPLIT: usize = 2;
const MIN_RECORDS: usize = 4;
const TEST_RATIO: f64 = 0.3;

/// Node of the fitted surrogate tree
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// Feature index for the split; `None` for leaves
    pub feature_idx: Option<usize>,
    /// Threshold for the split; `None` for leaves
    pub threshold: Option<f64>,
    /// Majority segment at this node
    pub prediction: usize,
    /// Samples per segment reaching this node
    pub class_counts: Vec<usize>,
    pub n_samples: usize,
    /// Gini impurity at this node
    pub impurity: f64,
    pub left: Option<Box<TreeNode>>,
    pub right: Option<Box<TreeNode>>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn depth(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            let left = self.left.as_ref().map(|node| node.depth()).unwrap_or(0);
            let right = self.right.as_ref().map(|node| node.depth()).unwrap_or(0);
            1 + left.max(right)
        }
    }

    pub fn n_leaves(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.left.as_ref().map(|node| node.n_leaves()).unwrap_or(0)
                + self.right.as_ref().map(|node| node.n_leaves()).unwrap_or(0)
        }
    }
}

/// Fitted surrogate classifier
#[derive(Debug, Clone, Serialize)]
pub struct SurrogateTree {
    pub root: TreeNode,
    pub n_classes: usize,
}

/// Surrogate tree plus its held-out diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub tree: SurrogateTree,
    /// Feature ordering the tree's indices refer to
    pub feature_names: [&'static str; 3],
    /// Fraction of exact segment matches on the held-out split, in [0, 1]
    pub accuracy: f64,
    pub train_size: usize,
    pub test_size: usize,
}

/// Fit the surrogate tree on a seeded 70/30 split and score it
///
/// # Arguments
/// * `features` - Raw RFM values, shape (n_customers, 3)
/// * `labels` - Canonical segment per customer
/// * `n_classes` - Number of segments (k)
/// * `seed` - RNG seed for the shuffle split
pub fn explain_segments(
    features: &Array2<f64>,
    labels: &[usize],
    n_classes: usize,
    seed: u64,
) -> Result<Explanation> {
    let n = features.nrows();
    if n != labels.len() {
        return Err(SegmentError::Config(format!(
            "feature rows ({n}) and labels ({}) disagree",
            labels.len()
        )));
    }
    if n < MIN_RECORDS {
        return Err(SegmentError::Insufficient(format!(
            "at least {MIN_RECORDS} records are needed for a train/test split, got {n}"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let test_size = ((n as f64) * TEST_RATIO).ceil() as usize;
    let test_size = test_size.clamp(1, n - 1);
    let (test_indices, train_indices) = indices.split_at(test_size);

    let root = build_node(features, labels, train_indices, n_classes, 0);
    let tree = SurrogateTree { root, n_classes };

    let correct = test_indices
        .iter()
        .filter(|&&i| tree.predict_row(features.row(i)) == labels[i])
        .count();
    let accuracy = correct as f64 / test_indices.len() as f64;
    debug!(
        train = train_indices.len(),
        test = test_indices.len(),
        accuracy,
        "surrogate fitted"
    );

    Ok(Explanation {
        tree,
        feature_names: FEATURE_NAMES,
        accuracy,
        train_size: train_indices.len(),
        test_size: test_indices.len(),
    })
}

impl SurrogateTree {
    /// Predict the segment for one feature row
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut node = &self.root;
        loop {
            match (node.feature_idx, node.threshold, &node.left, &node.right) {
                (Some(feature), Some(threshold), Some(left), Some(right)) => {
                    node = if row[feature] <= threshold { left } else { right };
                }
                _ => return node.prediction,
            }
        }
    }

    /// Human-readable rendering of the rule set for the dashboard
    pub fn render_text(&self, feature_names: &[&str]) -> String {
        let mut out = String::new();
        self.render_node(&self.root, feature_names, 0, &mut out);
        out
    }

    fn render_node(&self, node: &TreeNode, feature_names: &[&str], indent: usize, out: &mut String) {
        let prefix = "  ".repeat(indent);
        if node.is_leaf() {
            let _ = writeln!(
                out,
                "{}Leaf: segment {} (samples={}, counts={:?})",
                prefix, node.prediction, node.n_samples, node.class_counts
            );
            return;
        }

        let feature = node
            .feature_idx
            .and_then(|idx| feature_names.get(idx).copied())
            .unwrap_or("?");
        let _ = writeln!(
            out,
            "{}Split: {} <= {:.3} (samples={}, gini={:.3})",
            prefix,
            feature,
            node.threshold.unwrap_or(f64::NAN),
            node.n_samples,
            node.impurity
        );
        if let Some(left) = &node.left {
            let _ = writeln!(out, "{prefix}Left:");
            self.render_node(left, feature_names, indent + 1, out);
        }
        if let Some(right) = &node.right {
            let _ = writeln!(out, "{prefix}Right:");
            self.render_node(right, feature_names, indent + 1, out);
        }
    }
}

fn class_counts(labels: &[usize], indices: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for &i in indices {
        if labels[i] < n_classes {
            counts[labels[i]] += 1;
        }
    }
    counts
}

/// Multi-class Gini impurity: 1 - sum(p_i^2)
fn gini(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&count| {
            let p = count as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Majority class; ties resolve to the lowest segment id
fn majority(counts: &[usize]) -> usize {
    counts
        .iter()
        .enumerate()
        .max_by_key(|&(idx, &count)| (count, std::cmp::Reverse(idx)))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
}

fn build_node(
    features: &Array2<f64>,
    labels: &[usize],
    indices: &[usize],
    n_classes: usize,
    depth: usize,
) -> TreeNode {
    let counts = class_counts(labels, indices, n_classes);
    let impurity = gini(&counts);
    let leaf = |counts: Vec<usize>| TreeNode {
        feature_idx: None,
        threshold: None,
        prediction: majority(&counts),
        n_samples: indices.len(),
        impurity,
        class_counts: counts,
        left: None,
        right: None,
    };

    if depth >= MAX_DEPTH || indices.len() < MIN_SAMPLES_SPLIT || impurity < 1e-12 {
        return leaf(counts);
    }

    let split = match find_best_split(features, labels, indices, n_classes, impurity) {
        Some(split) => split,
        None => return leaf(counts),
    };

    let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| features[[i, split.feature]] <= split.threshold);
    if left_indices.is_empty() || right_indices.is_empty() {
        return leaf(counts);
    }

    let left = build_node(features, labels, &left_indices, n_classes, depth + 1);
    let right = build_node(features, labels, &right_indices, n_classes, depth + 1);

    TreeNode {
        feature_idx: Some(split.feature),
        threshold: Some(split.threshold),
        prediction: majority(&counts),
        n_samples: indices.len(),
        impurity,
        class_counts: counts,
        left: Some(Box::new(left)),
        right: Some(Box::new(right)),
    }
}

/// Best Gini-gain split over all features, found with a single sorted sweep
/// per feature instead of re-partitioning at every candidate threshold.
fn find_best_split(
    features: &Array2<f64>,
    labels: &[usize],
    indices: &[usize],
    n_classes: usize,
    parent_impurity: f64,
) -> Option<BestSplit> {
    let total_counts = class_counts(labels, indices, n_classes);
    let n = indices.len() as f64;

    let mut best: Option<BestSplit> = None;
    let mut best_gain = 1e-12;

    for feature in 0..features.ncols() {
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| {
            features[[a, feature]]
                .partial_cmp(&features[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_counts = vec![0usize; n_classes];
        for position in 1..order.len() {
            let moved = order[position - 1];
            left_counts[labels[moved]] += 1;

            let low = features[[moved, feature]];
            let high = features[[order[position], feature]];
            if high <= low {
                continue;
            }
            let threshold = (low + high) / 2.0;

            let right_counts: Vec<usize> = total_counts
                .iter()
                .zip(&left_counts)
                .map(|(&total, &left)| total - left)
                .collect();
            let n_left = position as f64;
            let n_right = n - n_left;
            let weighted = (n_left * gini(&left_counts) + n_right * gini(&right_counts)) / n;
            let gain = parent_impurity - weighted;

            if gain > best_gain {
                best_gain = gain;
                best = Some(BestSplit { feature, threshold });
            }
        }
    }
    best
}
