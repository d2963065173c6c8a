//! Random forest regressor.
//!
//! Bagged CART regression trees: each tree is grown on a bootstrap sample,
//! splits minimise the weighted child variance, and the forest predicts the
//! mean of its trees. All randomness flows from one seed, so fitting the same
//! data with the same parameters yields the same forest.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("cannot fit with zero samples")]
    Empty,
    #[error("number of samples in x ({x}) and y ({y}) must match")]
    LengthMismatch { x: usize, y: usize },
    #[error("row {row} has {got} features, expected {expected}")]
    RaggedRow { row: usize, got: usize, expected: usize },
    #[error("feature length mismatch: got {got}, expected {expected}")]
    Shape { got: usize, expected: usize },
    #[error("forest has no trees")]
    NotFitted,
    #[error("failed to access model file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("model file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Root has depth 0; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` tries all of them.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: Some(10),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature: usize,
        /// Samples with `x[feature] <= threshold` go left.
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: ForestParams) -> Result<Self, ForestError> {
        if x.len() != y.len() {
            return Err(ForestError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.is_empty() {
            return Err(ForestError::Empty);
        }
        let n_features = x[0].len();
        if let Some((row, r)) = x.iter().enumerate().find(|(_, r)| r.len() != n_features) {
            return Err(ForestError::RaggedRow {
                row,
                got: r.len(),
                expected: n_features,
            });
        }

        let mut forest_rng = StdRng::seed_from_u64(params.seed);
        let n = x.len();
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let mut rng = StdRng::seed_from_u64(forest_rng.gen());
            let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let grower = TreeGrower {
                x,
                y,
                params: &params,
                n_features,
            };
            let root = grower.grow(&mut sample, 0, &mut rng);
            trees.push(RegressionTree { root });
        }

        tracing::debug!(
            "fitted forest: {} trees on {} samples x {} features",
            trees.len(),
            n,
            n_features
        );

        Ok(Self {
            params,
            n_features,
            trees,
        })
    }

    /// Mean prediction of all trees. Not clamped.
    pub fn predict(&self, x: &[f64]) -> Result<f64, ForestError> {
        if x.len() != self.n_features {
            return Err(ForestError::Shape {
                got: x.len(),
                expected: self.n_features,
            });
        }
        if self.trees.is_empty() {
            return Err(ForestError::NotFitted);
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    pub fn predict_many(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ForestError> {
        x.iter().map(|row| self.predict(row)).collect()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn load(path: &Path) -> Result<Self, ForestError> {
        let txt = fs::read_to_string(path).map_err(|source| ForestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let forest: Self = serde_json::from_str(&txt).map_err(|source| ForestError::Json {
            path: path.display().to_string(),
            source,
        })?;
        forest.check_structure().map_err(|reason| ForestError::Corrupt {
            path: path.display().to_string(),
            reason,
        })?;
        Ok(forest)
    }

    /// A deserialized forest must be safe to predict with: at least one tree,
    /// every split feature in bounds, every number finite.
    fn check_structure(&self) -> Result<(), String> {
        if self.n_features == 0 {
            return Err("n_features is 0".into());
        }
        if self.trees.is_empty() {
            return Err("no trees".into());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            let mut stack = vec![&tree.root];
            while let Some(node) = stack.pop() {
                match node {
                    Node::Leaf { value, .. } => {
                        if !value.is_finite() {
                            return Err(format!("tree {i}: leaf value {value} is not finite"));
                        }
                    }
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= self.n_features {
                            return Err(format!(
                                "tree {i}: split on feature {feature}, forest has {}",
                                self.n_features
                            ));
                        }
                        if !threshold.is_finite() {
                            return Err(format!("tree {i}: threshold {threshold} is not finite"));
                        }
                        stack.push(&**left);
                        stack.push(&**right);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ForestError> {
        let txt = serde_json::to_string(self).map_err(|source| ForestError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, txt).map_err(|source| ForestError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

struct TreeGrower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    n_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl TreeGrower<'_> {
    fn grow(&self, idx: &mut [usize], depth: usize, rng: &mut StdRng) -> Node {
        let n = idx.len();
        let (sum, sum_sq) = idx.iter().fold((0.0, 0.0), |(s, sq), &i| {
            (s + self.y[i], sq + self.y[i] * self.y[i])
        });
        let mean = sum / n as f64;
        let leaf = Node::Leaf {
            value: mean,
            n_samples: n,
        };

        let at_max_depth = self.params.max_depth.is_some_and(|d| depth >= d);
        let pure = sum_sq / n as f64 - mean * mean <= 1e-12 * (1.0 + mean * mean);
        if n < self.params.min_samples_split.max(2) || at_max_depth || pure {
            return leaf;
        }

        // parent score: sum^2 / n; a split must beat it
        let Some(best) = self.best_split(idx, rng, sum * sum / n as f64) else {
            return leaf;
        };

        let mid = partition(idx, |i| self.x[i][best.feature] <= best.threshold);
        let (left_idx, right_idx) = idx.split_at_mut(mid);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.grow(left_idx, depth + 1, rng)),
            right: Box::new(self.grow(right_idx, depth + 1, rng)),
        }
    }

    /// Maximises sum_l^2/n_l + sum_r^2/n_r, which is the same as minimising the
    /// summed squared error of the two children.
    fn best_split(&self, idx: &[usize], rng: &mut StdRng, parent_score: f64) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(rng);
        let k = self
            .params
            .max_features
            .map_or(self.n_features, |m| m.clamp(1, self.n_features));

        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = idx.len();
        let total: f64 = idx.iter().map(|&i| self.y[i]).sum();
        let mut order = idx.to_vec();
        let mut best: Option<BestSplit> = None;

        for &f in &features[..k] {
            order.sort_by(|&a, &b| self.x[a][f].total_cmp(&self.x[b][f]));

            let mut left_sum = 0.0;
            for pos in 0..n - 1 {
                left_sum += self.y[order[pos]];
                let n_left = pos + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let lo = self.x[order[pos]][f];
                let hi = self.x[order[pos + 1]][f];
                if lo == hi {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / n_left as f64
                    + right_sum * right_sum / n_right as f64;
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    // midpoint can round up to `hi` for adjacent floats
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(BestSplit {
                        feature: f,
                        threshold,
                        score,
                    });
                }
            }
        }

        best.filter(|b| b.score > parent_score * (1.0 + 1e-12))
    }
}

/// In-place partition; returns the number of elements satisfying `pred`,
/// which end up at the front.
fn partition(idx: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for j in 0..idx.len() {
        if pred(idx[j]) {
            idx.swap(mid, j);
            mid += 1;
        }
    }
    mid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // y depends only on feature 1: 10 below 5, 50 from 5 up
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let a = (i % 7) as f64;
            let b = (i % 10) as f64;
            x.push(vec![a, b]);
            y.push(if b < 5.0 { 10.0 } else { 50.0 });
        }
        (x, y)
    }

    #[test]
    fn test_single_tree_learns_step() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_trees: 1,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&x, &y, params).unwrap();

        assert_eq!(forest.n_trees(), 1);
        let root = forest.trees()[0].root();
        assert!(matches!(root, Node::Split { feature: 1, .. }), "root should split on feature 1");
    }

    #[test]
    fn test_forest_predicts_close_to_targets() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, ForestParams::default()).unwrap();

        let low = forest.predict(&[3.0, 2.0]).unwrap();
        let high = forest.predict(&[3.0, 8.0]).unwrap();
        assert!((low - 10.0).abs() < 5.0, "low prediction was {low}");
        assert!((high - 50.0).abs() < 5.0, "high prediction was {high}");
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let (x, y) = step_data();
        let a = RandomForest::fit(&x, &y, ForestParams::default()).unwrap();
        let b = RandomForest::fit(&x, &y, ForestParams::default()).unwrap();
        assert_eq!(a, b);

        let c = RandomForest::fit(
            &x,
            &y,
            ForestParams {
                seed: 7,
                ..ForestParams::default()
            },
        )
        .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_max_depth_respected() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let params = ForestParams {
            n_trees: 5,
            max_depth: Some(3),
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&x, &y, params).unwrap();
        for tree in forest.trees() {
            assert!(tree.root().depth() <= 3);
        }
    }

    #[test]
    fn test_constant_target_gives_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 1.0]).collect();
        let y = vec![7.5; 10];
        let forest = RandomForest::fit(&x, &y, ForestParams::default()).unwrap();
        assert!(matches!(forest.trees()[0].root(), Node::Leaf { .. }));
        assert_eq!(forest.predict(&[100.0, 1.0]).unwrap(), 7.5);
    }

    #[test]
    fn test_input_validation() {
        assert!(matches!(
            RandomForest::fit(&[], &[], ForestParams::default()),
            Err(ForestError::Empty)
        ));
        assert!(matches!(
            RandomForest::fit(&[vec![1.0]], &[1.0, 2.0], ForestParams::default()),
            Err(ForestError::LengthMismatch { x: 1, y: 2 })
        ));
        assert!(matches!(
            RandomForest::fit(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0], ForestParams::default()),
            Err(ForestError::RaggedRow { row: 1, .. })
        ));

        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, ForestParams::default()).unwrap();
        assert!(matches!(
            forest.predict(&[1.0, 2.0, 3.0]),
            Err(ForestError::Shape { got: 3, expected: 2 })
        ));
    }

    #[test]
    fn test_save_load() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_trees: 3,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&x, &y, params).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        forest.save(&path).unwrap();

        let loaded = RandomForest::load(&path).unwrap();
        assert_eq!(loaded.n_features(), 2);
        for row in &x {
            assert_eq!(loaded.predict(row).unwrap(), forest.predict(row).unwrap());
        }
    }

    /// Rewrites every `"feature"` field of a saved forest.
    fn set_split_features(v: &mut serde_json::Value, to: usize) {
        match v {
            serde_json::Value::Object(map) => {
                if map.contains_key("feature") {
                    map.insert("feature".into(), to.into());
                }
                map.values_mut().for_each(|c| set_split_features(c, to));
            }
            serde_json::Value::Array(items) => {
                items.iter_mut().for_each(|c| set_split_features(c, to));
            }
            _ => {}
        }
    }

    #[test]
    fn test_load_rejects_structurally_corrupt_files() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_trees: 3,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&x, &y, params).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        forest.save(&path).unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        let mut no_trees = saved.clone();
        no_trees["trees"] = serde_json::json!([]);
        fs::write(&path, no_trees.to_string()).unwrap();
        assert!(matches!(RandomForest::load(&path), Err(ForestError::Corrupt { .. })));

        let mut bad_feature = saved;
        set_split_features(&mut bad_feature, 9);
        fs::write(&path, bad_feature.to_string()).unwrap();
        let err = RandomForest::load(&path).unwrap_err();
        assert!(err.to_string().contains("feature 9"), "{err}");
    }

    #[test]
    fn test_partition() {
        let mut v = vec![5, 1, 8, 2, 9, 3];
        let mid = partition(&mut v, |i| i < 5);
        assert_eq!(mid, 3);
        assert!(v[..mid].iter().all(|&i| i < 5));
        assert!(v[mid..].iter().all(|&i| i >= 5));
    }
}
