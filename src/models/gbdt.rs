//! Gradient-boosted decision tree classifier.
//!
//! Binary logistic boosting with a histogram split search over quantile
//! thresholds. Training is deterministic: among equal-gain splits the lower
//! feature index wins, then the lower threshold.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ScoringError, TrainingError};
use crate::feature_builder::FeatureRecord;
use crate::models::scorer::Scorer;

/// Splits must improve the objective by more than this
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Hessian floor so leaves of saturated samples stay finite
const MIN_HESSIAN: f64 = 1e-16;

/// A tree node. Samples with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub feature: usize,
    pub threshold: f64,
    pub left: u32,
    pub right: u32,
    /// Leaf weight; `None` on internal nodes
    pub value: Option<f64>,
}

impl Node {
    fn leaf(value: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: Some(value),
        }
    }
}

/// Regression tree over the logistic margin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf weight reached by `features`
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;

        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };

            if let Some(value) = node.value {
                return value;
            }

            let x = features.get(node.feature).copied().unwrap_or(0.0);
            idx = if x <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }

    /// Structural check for trees read from disk.
    ///
    /// Children always point forward, so evaluation terminates.
    pub fn validate(&self, feature_count: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            match node.value {
                Some(value) if !value.is_finite() => {
                    return Err(format!("node {} has non-finite leaf value", idx));
                }
                Some(_) => continue,
                None => {}
            }

            if node.feature >= feature_count {
                return Err(format!(
                    "node {} tests feature {} but the model has {}",
                    idx, node.feature, feature_count
                ));
            }

            for child in [node.left, node.right] {
                let child = child as usize;
                if child <= idx || child >= self.nodes.len() {
                    return Err(format!("node {} has invalid child {}", idx, child));
                }
            }
        }

        Ok(())
    }
}

/// Boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub num_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    /// L2 regularisation on leaf weights
    pub lambda: f64,
    /// Maximum number of histogram bins per feature
    pub max_bins: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            num_trees: 200,
            learning_rate: 0.05,
            max_depth: 5,
            min_samples_leaf: 1,
            min_child_weight: 1.0,
            lambda: 1.0,
            max_bins: 64,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_trees == 0 {
            return Err("num_trees must be at least 1".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        if self.min_samples_leaf == 0 {
            return Err("min_samples_leaf must be at least 1".to_string());
        }
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(format!("lambda must be non-negative, got {}", self.lambda));
        }
        if !(self.min_child_weight.is_finite() && self.min_child_weight >= 0.0) {
            return Err(format!(
                "min_child_weight must be non-negative, got {}",
                self.min_child_weight
            ));
        }
        if self.max_bins < 2 || self.max_bins > u16::MAX as usize {
            return Err(format!("max_bins must be in 2..={}, got {}", u16::MAX, self.max_bins));
        }
        Ok(())
    }
}

/// Trained boosted-tree classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Feature layout the model was trained on
    pub feature_names: Vec<String>,
    /// Log-odds of the training label mean
    pub base_margin: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    /// Raw logistic margin
    pub fn margin(&self, features: &[f64]) -> f64 {
        let boost: f64 = self.trees.iter().map(|tree| tree.evaluate(features)).sum();
        self.base_margin + self.learning_rate * boost
    }

    /// Probability of the positive (approved) class
    pub fn probability(&self, features: &[f64]) -> f64 {
        sigmoid(self.margin(features))
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.base_margin.is_finite() || !self.learning_rate.is_finite() {
            return Err("non-finite base margin or learning rate".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_names.len())
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

impl Scorer for GbdtModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, batch: &[FeatureRecord]) -> Vec<Result<f64, ScoringError>> {
        batch
            .iter()
            .map(|record| {
                let features = record.to_finite_vector()?;
                let p = self.probability(&features);
                if p.is_finite() {
                    Ok(p)
                } else {
                    Err(ScoringError::NonFiniteOutput)
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "gbdt"
    }
}

fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Quantised copy of the training matrix, feature-major
struct FeatureBins {
    /// Split candidates per feature, strictly increasing
    thresholds: Vec<Vec<f64>>,
    /// Per feature, per sample: number of thresholds below the value
    bins: Vec<Vec<u16>>,
}

impl FeatureBins {
    fn new(features: &[Vec<f64>], feature_count: usize, max_bins: usize) -> Self {
        let mut thresholds = Vec::with_capacity(feature_count);
        let mut bins = Vec::with_capacity(feature_count);

        for f in 0..feature_count {
            let mut values: Vec<f64> = features.iter().map(|row| row[f]).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();

            let cuts = candidate_thresholds(&values, max_bins);
            let column = features
                .iter()
                .map(|row| cuts.partition_point(|&t| t < row[f]) as u16)
                .collect();

            thresholds.push(cuts);
            bins.push(column);
        }

        Self { thresholds, bins }
    }
}

/// Pick at most `max_bins - 1` thresholds from sorted unique values
fn candidate_thresholds(sorted_unique: &[f64], max_bins: usize) -> Vec<f64> {
    if sorted_unique.len() < 2 {
        return Vec::new();
    }

    // Splitting at the largest value would leave the right side empty
    let candidates = &sorted_unique[..sorted_unique.len() - 1];
    if candidates.len() < max_bins {
        return candidates.to_vec();
    }

    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|k| candidates[(k * candidates.len() / max_bins).min(candidates.len() - 1)])
        .collect();
    cuts.dedup();
    cuts
}

struct Split {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeBuilder<'a> {
    params: &'a GbdtParams,
    bins: &'a FeatureBins,
    gradients: &'a [f64],
    hessians: &'a [f64],
}

impl TreeBuilder<'_> {
    fn build(&self, n_samples: usize) -> Tree {
        let mut nodes = Vec::new();
        let indices: Vec<usize> = (0..n_samples).collect();
        self.build_node(&indices, 0, &mut nodes);
        Tree { nodes }
    }

    fn build_node(&self, indices: &[usize], depth: usize, nodes: &mut Vec<Node>) -> u32 {
        let current = nodes.len() as u32;
        let (g, h) = self.sums(indices);
        let leaf_value = -g / (h + self.params.lambda);

        if depth >= self.params.max_depth || indices.len() < 2 * self.params.min_samples_leaf {
            nodes.push(Node::leaf(leaf_value));
            return current;
        }

        let Some(split) = self.find_best_split(indices, g, h) else {
            nodes.push(Node::leaf(leaf_value));
            return current;
        };

        let column = &self.bins.bins[split.feature];
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| column[i] as usize <= split.bin);

        nodes.push(Node {
            feature: split.feature,
            threshold: self.bins.thresholds[split.feature][split.bin],
            left: 0,
            right: 0,
            value: None,
        });

        let left_idx = self.build_node(&left, depth + 1, nodes);
        let right_idx = self.build_node(&right, depth + 1, nodes);
        nodes[current as usize].left = left_idx;
        nodes[current as usize].right = right_idx;

        current
    }

    fn find_best_split(&self, indices: &[usize], g: f64, h: f64) -> Option<Split> {
        let lambda = self.params.lambda;
        let parent_score = g * g / (h + lambda);
        let mut best: Option<Split> = None;

        for (feature, cuts) in self.bins.thresholds.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }

            let n_bins = cuts.len() + 1;
            let mut grad = vec![0.0; n_bins];
            let mut hess = vec![0.0; n_bins];
            let mut count = vec![0usize; n_bins];
            let column = &self.bins.bins[feature];

            for &i in indices {
                let b = column[i] as usize;
                grad[b] += self.gradients[i];
                hess[b] += self.hessians[i];
                count[b] += 1;
            }

            let (mut gl, mut hl, mut cl) = (0.0, 0.0, 0usize);
            for bin in 0..cuts.len() {
                gl += grad[bin];
                hl += hess[bin];
                cl += count[bin];

                let cr = indices.len() - cl;
                if cl < self.params.min_samples_leaf || cr < self.params.min_samples_leaf {
                    continue;
                }

                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score;
                if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split { feature, bin, gain });
                }
            }
        }

        best
    }

    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        indices.iter().fold((0.0, 0.0), |(g, h), &i| {
            (g + self.gradients[i], h + self.hessians[i])
        })
    }
}

/// Fits [`GbdtModel`]s
pub struct GbdtTrainer {
    params: GbdtParams,
}

impl GbdtTrainer {
    pub fn new(params: GbdtParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GbdtParams {
        &self.params
    }

    /// Fit a classifier on row-major `features` against 0/1 `labels`
    pub fn train(
        &self,
        feature_names: &[&str],
        features: &[Vec<f64>],
        labels: &[u8],
    ) -> Result<GbdtModel, TrainingError> {
        self.params.validate().map_err(TrainingError::InvalidParams)?;

        let n = features.len();
        if n == 0 {
            return Err(TrainingError::EmptyDataset);
        }
        if labels.len() != n {
            return Err(TrainingError::LabelCount {
                features: n,
                labels: labels.len(),
            });
        }

        let feature_count = feature_names.len();
        for (row, values) in features.iter().enumerate() {
            if values.len() != feature_count {
                return Err(TrainingError::RaggedFeatures {
                    row,
                    expected: feature_count,
                    actual: values.len(),
                });
            }
        }

        let positives = labels.iter().filter(|&&y| y != 0).count();
        if positives == 0 {
            return Err(TrainingError::SingleClass { label: 0, count: n });
        }
        if positives == n {
            return Err(TrainingError::SingleClass { label: 1, count: n });
        }

        let targets: Vec<f64> = labels
            .iter()
            .map(|&y| if y != 0 { 1.0 } else { 0.0 })
            .collect();
        let mean = positives as f64 / n as f64;
        let base_margin = (mean / (1.0 - mean)).ln();

        let bins = FeatureBins::new(features, feature_count, self.params.max_bins);
        let mut margins = vec![base_margin; n];
        let mut gradients = vec![0.0; n];
        let mut hessians = vec![0.0; n];
        let mut trees = Vec::with_capacity(self.params.num_trees);

        for tree_idx in 0..self.params.num_trees {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                gradients[i] = p - targets[i];
                hessians[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let builder = TreeBuilder {
                params: &self.params,
                bins: &bins,
                gradients: &gradients,
                hessians: &hessians,
            };
            let tree = builder.build(n);

            for (margin, row) in margins.iter_mut().zip(features.iter()) {
                *margin += self.params.learning_rate * tree.evaluate(row);
            }

            debug!(tree = tree_idx + 1, nodes = tree.nodes.len(), "Fitted tree");
            trees.push(tree);
        }

        let log_loss = margins
            .iter()
            .zip(targets.iter())
            .map(|(&m, &y)| {
                let p = sigmoid(m).clamp(1e-15, 1.0 - 1e-15);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum::<f64>()
            / n as f64;

        info!(
            samples = n,
            positives = positives,
            trees = trees.len(),
            train_log_loss = log_loss,
            "GBDT training complete"
        );

        Ok(GbdtModel {
            feature_names: feature_names.iter().map(|s| s.to_string()).collect(),
            base_margin,
            learning_rate: self.params.learning_rate,
            trees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_builder::{feature_schema, FeatureBuilder};
    use crate::stats::StatsSnapshot;

    fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
        let features = (0..40).map(|x| vec![x as f64, 1.0]).collect();
        let labels = (0..40).map(|x| u8::from(x >= 20)).collect();
        (features, labels)
    }

    fn params() -> GbdtParams {
        GbdtParams {
            num_trees: 20,
            learning_rate: 0.3,
            max_depth: 2,
            ..GbdtParams::default()
        }
    }

    #[test]
    fn test_learns_separable_data() {
        let (features, labels) = separable();
        let model = GbdtTrainer::new(params())
            .train(&["x", "constant"], &features, &labels)
            .unwrap();

        assert_eq!(model.num_trees(), 20);
        assert!(model.probability(&[35.0, 1.0]) > 0.7);
        assert!(model.probability(&[5.0, 1.0]) < 0.3);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_training_is_deterministic() {
        let (features, labels) = separable();
        let trainer = GbdtTrainer::new(params());
        let first = trainer.train(&["x", "constant"], &features, &labels).unwrap();
        let second = trainer.train(&["x", "constant"], &features, &labels).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_class_rejected() {
        let features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let err = GbdtTrainer::new(params())
            .train(&["x"], &features, &[0, 0, 0])
            .unwrap_err();
        assert!(matches!(err, TrainingError::SingleClass { label: 0, count: 3 }));
    }

    #[test]
    fn test_empty_and_ragged_rejected() {
        let trainer = GbdtTrainer::new(params());
        assert!(matches!(
            trainer.train(&["x"], &[], &[]),
            Err(TrainingError::EmptyDataset)
        ));

        let features = vec![vec![1.0], vec![2.0, 3.0]];
        assert!(matches!(
            trainer.train(&["x"], &features, &[0, 1]),
            Err(TrainingError::RaggedFeatures { row: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let trainer = GbdtTrainer::new(GbdtParams {
            num_trees: 0,
            ..GbdtParams::default()
        });
        let (features, labels) = separable();
        assert!(matches!(
            trainer.train(&["x", "constant"], &features, &labels),
            Err(TrainingError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_candidate_thresholds() {
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        assert_eq!(candidate_thresholds(&values, 64).len(), 9);

        let cuts = candidate_thresholds(&values, 4);
        assert_eq!(cuts.len(), 3);
        assert!(cuts.windows(2).all(|w| w[0] < w[1]));
        assert!(candidate_thresholds(&[1.0], 4).is_empty());
    }

    #[test]
    fn test_scorer_rejects_non_finite_features() {
        let model = GbdtModel {
            feature_names: feature_schema(),
            base_margin: 0.0,
            learning_rate: 0.1,
            trees: vec![Tree {
                nodes: vec![Node::leaf(0.0)],
            }],
        };

        let stats = StatsSnapshot::default();
        let good = FeatureBuilder::new().build(&stats, 510123, 1, 1);
        let mut bad = good;
        bad.processor_success_rate = f64::INFINITY;

        let scores = model.predict_proba(&[good, bad]);
        assert_eq!(scores[0], Ok(0.5));
        assert!(matches!(
            scores[1],
            Err(ScoringError::NonFiniteFeature { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_backward_child() {
        let tree = Tree {
            nodes: vec![
                Node {
                    feature: 0,
                    threshold: 1.0,
                    left: 0,
                    right: 1,
                    value: None,
                },
                Node::leaf(0.5),
            ],
        };
        assert!(tree.validate(1).is_err());
    }
}
