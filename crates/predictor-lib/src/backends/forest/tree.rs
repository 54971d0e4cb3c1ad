//! CART decision trees
//!
//! Nodes live in a flat arena; children are indices into it. Every node
//! keeps the value a prediction would take if the tree stopped there, which
//! is what decision-path attribution walks.

use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// What a tree predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Task {
    /// Class distribution over `n_classes`, split by Gini impurity
    Classification { n_classes: usize },
    /// Scalar mean, split by variance reduction
    Regression,
}

impl Task {
    pub fn outputs(&self) -> usize {
        match self {
            Task::Classification { n_classes } => *n_classes,
            Task::Regression => 1,
        }
    }
}

/// Growth limits for a single tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features per split; `None` means `ceil(sqrt(n_features))`
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 12,
            min_samples_split: 4,
            min_samples_leaf: 2,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        value: Vec<f64>,
    },
}

impl Node {
    pub fn value(&self) -> &[f64] {
        match self {
            Node::Leaf { value } | Node::Split { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    task: Task,
    n_features: usize,
    nodes: Vec<Node>,
    /// Unnormalized weighted impurity decrease per feature
    impurity_decrease: Vec<f64>,
}

/// Sufficient statistics of a set of targets
#[derive(Debug, Clone)]
enum Stats {
    Counts(Vec<f64>),
    Moments { n: f64, sum: f64, sum_sq: f64 },
}

impl Stats {
    fn empty(task: Task) -> Self {
        match task {
            Task::Classification { n_classes } => Stats::Counts(vec![0.0; n_classes]),
            Task::Regression => Stats::Moments {
                n: 0.0,
                sum: 0.0,
                sum_sq: 0.0,
            },
        }
    }

    fn add(&mut self, y: f64, sign: f64) {
        match self {
            Stats::Counts(counts) => {
                let class = y as usize;
                if let Some(c) = counts.get_mut(class) {
                    *c += sign;
                }
            }
            Stats::Moments { n, sum, sum_sq } => {
                *n += sign;
                *sum += sign * y;
                *sum_sq += sign * y * y;
            }
        }
    }

    fn count(&self) -> f64 {
        match self {
            Stats::Counts(counts) => counts.iter().sum(),
            Stats::Moments { n, .. } => *n,
        }
    }

    /// Gini impurity or variance
    fn impurity(&self) -> f64 {
        let n = self.count();
        if n <= 0.0 {
            return 0.0;
        }
        match self {
            Stats::Counts(counts) => 1.0 - counts.iter().map(|c| (c / n).powi(2)).sum::<f64>(),
            Stats::Moments { sum, sum_sq, .. } => {
                let mean = sum / n;
                (sum_sq / n - mean * mean).max(0.0)
            }
        }
    }

    fn value(&self) -> Vec<f64> {
        let n = self.count();
        match self {
            Stats::Counts(counts) if n > 0.0 => counts.iter().map(|c| c / n).collect(),
            Stats::Counts(counts) => vec![1.0 / counts.len() as f64; counts.len()],
            Stats::Moments { sum, .. } if n > 0.0 => vec![sum / n],
            Stats::Moments { .. } => vec![0.0],
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

struct Builder<'a, R: Rng> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    task: Task,
    params: &'a TreeParams,
    mtry: usize,
    n_total: f64,
    rng: &'a mut R,
    nodes: Vec<Node>,
    impurity_decrease: Vec<f64>,
}

impl<'a, R: Rng> Builder<'a, R> {
    fn stats(&self, indices: &[usize]) -> Stats {
        let mut stats = Stats::empty(self.task);
        for &i in indices {
            stats.add(self.y[i], 1.0);
        }
        stats
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let stats = self.stats(&indices);
        let value = stats.value();
        let impurity = stats.impurity();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: value.clone() });

        if depth >= self.params.max_depth
            || indices.len() < self.params.min_samples_split.max(2)
            || impurity <= f64::EPSILON
        {
            return id;
        }

        let Some(split) = self.best_split(&indices, &stats, impurity) else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[i][split.feature] <= split.threshold);

        self.impurity_decrease[split.feature] += split.decrease;
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            value,
        };
        id
    }

    fn best_split(&mut self, indices: &[usize], parent: &Stats, impurity: f64) -> Option<SplitCandidate> {
        let n_features = self.impurity_decrease.len();
        let candidates = sample(&mut *self.rng, n_features, self.mtry.min(n_features));
        let n = indices.len() as f64;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;

        for feature in candidates.iter() {
            let mut sorted = indices.to_vec();
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut left = Stats::empty(self.task);
            let mut right = parent.clone();

            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                left.add(self.y[i], 1.0);
                right.add(self.y[i], -1.0);

                let current = self.x[i][feature];
                let next = self.x[sorted[pos + 1]][feature];
                if next <= current {
                    continue;
                }
                let n_left = pos + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }

                let weighted = (n_left as f64 * left.impurity()
                    + (sorted.len() - n_left) as f64 * right.impurity())
                    / n;
                let decrease = (n / self.n_total) * (impurity - weighted);
                if decrease > best.as_ref().map_or(f64::EPSILON, |b| b.decrease) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (current + next) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

impl DecisionTree {
    /// Grow a tree on the rows selected by `indices`
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        y: &[f64],
        indices: Vec<usize>,
        task: Task,
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let n_features = x.first().map_or(0, |row| row.len());
        let mtry = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .max(1);

        let mut builder = Builder {
            x,
            y,
            task,
            params,
            mtry,
            n_total: indices.len().max(1) as f64,
            rng,
            nodes: Vec::new(),
            impurity_decrease: vec![0.0; n_features],
        };
        builder.grow(indices, 0);

        Self {
            task,
            n_features,
            nodes: builder.nodes,
            impurity_decrease: builder.impurity_decrease,
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check that child links stay inside the arena and point forward
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if node.value().len() != self.task.outputs() {
                return Err(format!("node {} has {} outputs", id, node.value().len()));
            }
            if let Node::Split { feature, left, right, .. } = node {
                if *feature >= self.n_features {
                    return Err(format!("node {} splits on missing feature {}", id, feature));
                }
                if *left <= id || *right <= id || *left >= self.nodes.len() || *right >= self.nodes.len() {
                    return Err(format!("node {} has invalid children", id));
                }
            }
        }
        Ok(())
    }

    /// Node indices from the root to the leaf reached by `row`
    fn path(&self, row: &[f64]) -> Vec<usize> {
        let mut path = vec![0];
        let mut id = 0;
        while let Some(Node::Split {
            feature,
            threshold,
            left,
            right,
            ..
        }) = self.nodes.get(id)
        {
            let value = row.get(*feature).copied().unwrap_or(0.0);
            id = if value <= *threshold { *left } else { *right };
            path.push(id);
        }
        path
    }

    pub fn predict(&self, row: &[f64]) -> &[f64] {
        let path = self.path(row);
        let leaf = path.last().copied().unwrap_or(0);
        self.nodes[leaf].value()
    }

    /// Root value plus per-feature contributions (`[feature][output]`).
    ///
    /// Each split credits its feature with the change in node value from
    /// parent to child, so root value plus contributions equals the leaf.
    pub fn path_contributions(&self, row: &[f64]) -> (Vec<f64>, Vec<Vec<f64>>) {
        let outputs = self.task.outputs();
        let mut contributions = vec![vec![0.0; outputs]; self.n_features];
        let path = self.path(row);

        for pair in path.windows(2) {
            let (parent, child) = (&self.nodes[pair[0]], &self.nodes[pair[1]]);
            if let Node::Split { feature, .. } = parent {
                for (k, slot) in contributions[*feature].iter_mut().enumerate() {
                    *slot += child.value()[k] - parent.value()[k];
                }
            }
        }
        (self.nodes[0].value().to_vec(), contributions)
    }

    /// Impurity decrease per feature, normalized to sum to 1 (all zero for a stump)
    pub fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.impurity_decrease.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.n_features];
        }
        self.impurity_decrease.iter().map(|d| d / total).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: Some(2),
        }
    }

    #[test]
    fn test_classification_separates_classes() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { 2.0 }).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let tree = DecisionTree::fit(&x, &y, (0..20).collect(), Task::Classification { n_classes: 3 }, &params(), &mut rng);

        assert_eq!(tree.predict(&[2.0, 0.0]), &[1.0, 0.0, 0.0]);
        assert_eq!(tree.predict(&[15.0, 0.0]), &[0.0, 0.0, 1.0]);
        assert!(tree.validate().is_ok());

        let importances = tree.feature_importances();
        assert!((importances[0] - 1.0).abs() < 1e-12);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_regression_fits_step() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..30).map(|i| if i < 15 { 10.0 } else { 50.0 }).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let tree = DecisionTree::fit(&x, &y, (0..30).collect(), Task::Regression, &params(), &mut rng);

        assert_eq!(tree.predict(&[3.0]), &[10.0]);
        assert_eq!(tree.predict(&[29.0]), &[50.0]);
    }

    #[test]
    fn test_path_contributions_sum_to_leaf() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![(i % 7) as f64, (i % 5) as f64, i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| r[0] * 2.0 + r[1]).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let tree = DecisionTree::fit(&x, &y, (0..40).collect(), Task::Regression, &params(), &mut rng);

        for row in x.iter().take(10) {
            let (bias, contributions) = tree.path_contributions(row);
            let total = bias[0] + contributions.iter().map(|c| c[0]).sum::<f64>();
            assert!((total - tree.predict(row)[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_pure_node_is_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![1.0, 1.0, 1.0];
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let tree = DecisionTree::fit(&x, &y, vec![0, 1, 2], Task::Classification { n_classes: 3 }, &params(), &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.feature_importances(), vec![0.0]);
    }
}
