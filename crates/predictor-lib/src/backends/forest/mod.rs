//! Tree-ensemble backend
//!
//! Random forests trained natively on the tabular encoding: a classifier
//! for outcome probabilities and a regressor for days to decision. The
//! regressor's per-tree spread stands in for predictive uncertainty.

mod tree;

pub use tree::{DecisionTree, Node, Task, TreeParams};

use super::output::{OutputConfig, OutputFormatter};
use super::{Backend, Prediction};
use crate::error::{FeatureError, InferenceError};
use crate::explain::{AttributionModel, Explainer, DEFAULT_EXPLAINER_SEED};
use crate::features::{TabularExtractor, FEATURE_NAMES};
use crate::models::{
    BackendKind, CaseOutcome, CaseRecord, Explanation, StatusProbabilities, TimeEstimate, TrainingExample,
};
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Rows kept from the training set as the explainer's reference sample
const BACKGROUND_ROWS: usize = 50;

/// Hyper-parameters of both forests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub tree: TreeParams,
    pub seed: u64,
    /// Fraction of examples held out for the training report
    pub validation_fraction: f64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams::default(),
            seed: 42,
            validation_fraction: 0.2,
        }
    }
}

/// Bagged ensemble of CART trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    task: Task,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit `n_trees` trees, each on a bootstrap sample drawn from a stream
    /// derived from `seed`
    pub fn fit(x: &[Vec<f64>], y: &[f64], task: Task, n_trees: usize, params: &TreeParams, seed: u64) -> Self {
        let n = x.len();
        let n_features = x.first().map_or(0, |row| row.len());
        let mut master = ChaCha8Rng::seed_from_u64(seed);

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let mut rng = ChaCha8Rng::seed_from_u64(master.gen());
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(x, y, bootstrap, task, params, &mut rng)
            })
            .collect();

        Self { task, n_features, trees }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if tree.task() != self.task || tree.n_features() != self.n_features {
                return Err(format!("tree {} does not match the forest shape", i));
            }
            tree.validate().map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Averaged leaf values
    pub fn predict(&self, row: &[f64]) -> Vec<f64> {
        let mut mean = vec![0.0; self.task.outputs()];
        for tree in &self.trees {
            for (m, v) in mean.iter_mut().zip(tree.predict(row)) {
                *m += v;
            }
        }
        let n = self.trees.len().max(1) as f64;
        mean.iter_mut().for_each(|m| *m /= n);
        mean
    }

    /// First output of every tree
    pub fn member_predictions(&self, row: &[f64]) -> Vec<f64> {
        self.trees
            .iter()
            .filter_map(|t| t.predict(row).first().copied())
            .collect()
    }

    /// Mean-decrease-impurity importances, normalized to sum to 1
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (t, v) in total.iter_mut().zip(tree.feature_importances()) {
                *t += v;
            }
        }
        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            total.iter_mut().for_each(|t| *t /= sum);
        }
        total
    }

    /// Decision-path contributions averaged over trees, as `[output][feature]`
    pub fn path_contributions(&self, row: &[f64]) -> Vec<Vec<f64>> {
        let outputs = self.task.outputs();
        let mut per_output = vec![vec![0.0; self.n_features]; outputs];
        for tree in &self.trees {
            let (_, contributions) = tree.path_contributions(row);
            for (feature, values) in contributions.iter().enumerate() {
                for (k, v) in values.iter().enumerate() {
                    per_output[k][feature] += v;
                }
            }
        }
        let n = self.trees.len().max(1) as f64;
        for output in per_output.iter_mut() {
            output.iter_mut().for_each(|v| *v /= n);
        }
        per_output
    }
}

/// Everything the tree-ensemble backend persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestBundle {
    pub extractor: TabularExtractor,
    pub status_forest: RandomForest,
    pub time_forest: RandomForest,
    /// Encoded training rows used as the explanation reference sample
    pub background: Vec<Vec<f64>>,
    /// Date the numeric scaling was fitted against
    pub reference_date: NaiveDate,
}

impl ForestBundle {
    /// Fit extractor and both forests on labeled examples.
    ///
    /// Returns the bundle and held-out metrics for the training report.
    pub fn train(
        examples: &[TrainingExample],
        reference_date: NaiveDate,
        config: &ForestConfig,
    ) -> Result<(Self, BTreeMap<String, f64>), FeatureError> {
        if examples.is_empty() {
            return Err(FeatureError::EmptyCorpus);
        }

        let mut order: Vec<usize> = (0..examples.len()).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(config.seed));
        let holdout = ((examples.len() as f64) * config.validation_fraction.clamp(0.0, 0.5)) as usize;
        let (valid_idx, train_idx) = order.split_at(holdout.min(examples.len() - 1));

        let train: Vec<&TrainingExample> = train_idx.iter().map(|&i| &examples[i]).collect();
        let cases: Vec<CaseRecord> = train.iter().map(|e| e.case.clone()).collect();

        let mut extractor = TabularExtractor::new();
        extractor.fit(&cases, reference_date)?;
        let x = extractor.transform(&cases, reference_date)?;
        let y_status: Vec<f64> = train.iter().map(|e| e.outcome.index() as f64).collect();
        let y_time: Vec<f64> = train.iter().map(|e| e.days_to_decision).collect();

        info!(
            examples = train.len(),
            trees = config.n_trees,
            "Training tree-ensemble forests"
        );
        let status_forest = RandomForest::fit(
            &x,
            &y_status,
            Task::Classification {
                n_classes: CaseOutcome::ALL.len(),
            },
            config.n_trees,
            &config.tree,
            config.seed,
        );
        let time_forest = RandomForest::fit(
            &x,
            &y_time,
            Task::Regression,
            config.n_trees,
            &config.tree,
            config.seed.wrapping_add(1),
        );

        let step = (x.len() / BACKGROUND_ROWS).max(1);
        let background = x.iter().step_by(step).take(BACKGROUND_ROWS).cloned().collect();

        let bundle = Self {
            extractor,
            status_forest,
            time_forest,
            background,
            reference_date,
        };

        let validation: Vec<&TrainingExample> = valid_idx.iter().map(|&i| &examples[i]).collect();
        let mut metrics = bundle.evaluate(&validation, reference_date)?;
        metrics.insert("train_size".to_string(), train.len() as f64);
        Ok((bundle, metrics))
    }

    /// Accuracy, MAE and interval coverage over `examples`
    fn evaluate(
        &self,
        examples: &[&TrainingExample],
        as_of: NaiveDate,
    ) -> Result<BTreeMap<String, f64>, FeatureError> {
        let mut metrics = BTreeMap::new();
        if examples.is_empty() {
            return Ok(metrics);
        }

        let formatter = OutputFormatter::new();
        let (mut correct, mut abs_error, mut covered) = (0usize, 0.0, 0usize);
        for example in examples {
            let row = self.extractor.transform_one(&example.case, as_of)?;
            let probs = self.status_forest.predict(&row);
            let predicted = argmax(&probs);
            if predicted == example.outcome.index() {
                correct += 1;
            }
            if let Ok(time) = formatter.format_member_spread(&self.time_forest.member_predictions(&row)) {
                abs_error += (time.median() as f64 - example.days_to_decision).abs();
                if (time.lower() as f64..=time.upper() as f64).contains(&example.days_to_decision) {
                    covered += 1;
                }
            }
        }
        let n = examples.len() as f64;
        metrics.insert("validation_size".to_string(), n);
        metrics.insert("status_accuracy".to_string(), correct as f64 / n);
        metrics.insert("time_mae".to_string(), abs_error / n);
        metrics.insert("interval_coverage".to_string(), covered as f64 / n);
        Ok(metrics)
    }

    /// Structural checks run by the loader before serving
    pub fn validate(&self) -> Result<(), String> {
        if !self.extractor.is_fitted() {
            return Err("tabular extractor is not fitted".to_string());
        }
        let width = self.extractor.width();
        self.status_forest.validate().map_err(|e| format!("status forest: {}", e))?;
        self.time_forest.validate().map_err(|e| format!("time forest: {}", e))?;
        if self.status_forest.task().outputs() != CaseOutcome::ALL.len() {
            return Err("status forest does not predict three outcomes".to_string());
        }
        if self.time_forest.task() != Task::Regression {
            return Err("time forest is not a regressor".to_string());
        }
        if self.status_forest.n_features() != width || self.time_forest.n_features() != width {
            return Err(format!("forests were not trained on {} features", width));
        }
        if self.background.iter().any(|row| row.len() != width) {
            return Err("background rows have the wrong width".to_string());
        }
        Ok(())
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if *v > best.1 { (i, *v) } else { best })
        .0
}

/// Attribution view over the status classifier
struct StatusAttribution<'a> {
    forest: &'a RandomForest,
}

impl AttributionModel for StatusAttribution<'_> {
    fn feature_names(&self) -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn path_attributions(&self, row: &[f64]) -> Option<Vec<Vec<f64>>> {
        Some(self.forest.path_contributions(row))
    }

    fn class_scores(&self, row: &[f64]) -> Option<Vec<f64>> {
        Some(self.forest.predict(row))
    }

    fn importances(&self) -> Option<Vec<f64>> {
        Some(self.forest.feature_importances())
    }
}

/// Backend serving a trained [`ForestBundle`]
pub struct TreeEnsembleBackend {
    bundle: ForestBundle,
    formatter: OutputFormatter,
    explainer: Explainer,
}

impl TreeEnsembleBackend {
    pub fn new(bundle: ForestBundle, output: OutputConfig) -> Self {
        let explainer = Explainer::new(bundle.background.clone(), DEFAULT_EXPLAINER_SEED);
        Self {
            bundle,
            formatter: OutputFormatter::with_config(output),
            explainer,
        }
    }

    pub fn bundle(&self) -> &ForestBundle {
        &self.bundle
    }

    fn encode(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<Vec<f64>, InferenceError> {
        Ok(self.bundle.extractor.transform_one(case, as_of)?)
    }

    fn status_from_row(&self, row: &[f64]) -> Result<StatusProbabilities, InferenceError> {
        let probs = self.bundle.status_forest.predict(row);
        let status = self.formatter.format_status(&probs)?;
        if let Some(reason) = self.formatter.low_confidence_reason(&status) {
            debug!(reason = %reason, "Low-confidence status prediction");
        }
        Ok(status)
    }

    fn time_from_row(&self, row: &[f64]) -> Result<TimeEstimate, InferenceError> {
        self.formatter
            .format_member_spread(&self.bundle.time_forest.member_predictions(row))
    }

    fn explain_row(&self, row: &[f64], class_index: Option<usize>, top_n: usize) -> Explanation {
        let model = StatusAttribution {
            forest: &self.bundle.status_forest,
        };
        self.explainer.explain(&model, row, class_index, top_n)
    }
}

impl Backend for TreeEnsembleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Baseline
    }

    fn version(&self) -> &str {
        BackendKind::Baseline.version()
    }

    fn predict_status(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<StatusProbabilities, InferenceError> {
        let row = self.encode(case, as_of)?;
        self.status_from_row(&row)
    }

    fn predict_time(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<TimeEstimate, InferenceError> {
        let row = self.encode(case, as_of)?;
        self.time_from_row(&row)
    }

    fn explain(&self, case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Result<Explanation, InferenceError> {
        let row = self.encode(case, as_of)?;
        Ok(self.explain_row(&row, None, top_n))
    }

    fn predict(&self, case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Result<Prediction, InferenceError> {
        let row = self.encode(case, as_of)?;
        let status = self.status_from_row(&row)?;
        let time = self.time_from_row(&row)?;
        let explanation = self.explain_row(&row, Some(status.most_likely().index()), top_n);
        Ok(Prediction {
            status,
            time,
            explanation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing::{labeled_corpus, probe_cases, reference_date};

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_trees: 15,
            tree: TreeParams {
                max_depth: 6,
                ..TreeParams::default()
            },
            seed: 7,
            validation_fraction: 0.2,
        }
    }

    fn trained() -> (ForestBundle, BTreeMap<String, f64>) {
        ForestBundle::train(&labeled_corpus(200, 5), reference_date(), &small_config()).unwrap()
    }

    #[test]
    fn test_training_is_reproducible() {
        let (a, _) = trained();
        let (b, _) = trained();
        assert_eq!(a, b);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_training_report_metrics() {
        let (_, metrics) = trained();
        assert_eq!(metrics["validation_size"], 40.0);
        assert!((0.0..=1.0).contains(&metrics["status_accuracy"]));
        assert!((0.0..=1.0).contains(&metrics["interval_coverage"]));
        assert!(metrics["time_mae"] >= 0.0);
    }

    #[test]
    fn test_predictions_are_well_formed() {
        let backend = TreeEnsembleBackend::new(trained().0, OutputConfig::default());
        for case in probe_cases() {
            let p = backend.predict(&case, reference_date(), 5).unwrap();
            let sum: f64 = p.status.as_array().iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(p.time.lower() <= p.time.median() && p.time.median() <= p.time.upper());
            assert_eq!(p.explanation.top_factors.len(), 5);
            assert!((0.0..=1.0).contains(&p.explanation.model_confidence));
            for factor in &p.explanation.top_factors {
                assert!(p.explanation.feature_importance.contains(&factor.feature));
            }
        }
    }

    #[test]
    fn test_explanation_confidence_matches_distribution() {
        let backend = TreeEnsembleBackend::new(trained().0, OutputConfig::default());
        let case = CaseRecord::illustrative();
        let status = backend.predict_status(&case, reference_date()).unwrap();
        let explanation = backend.explain(&case, reference_date(), 5).unwrap();
        assert!((explanation.model_confidence - status.max_probability()).abs() < 1e-9);
    }

    #[test]
    fn test_importances_sum_to_one() {
        let (bundle, _) = trained();
        let importances = bundle.status_forest.feature_importances();
        assert_eq!(importances.len(), FEATURE_NAMES.len());
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unfitted_bundle_fails_validation() {
        let (mut bundle, _) = trained();
        bundle.extractor = TabularExtractor::new();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn test_wider_interval_with_higher_confidence() {
        let (bundle, _) = trained();
        let narrow = TreeEnsembleBackend::new(
            bundle.clone(),
            OutputConfig {
                interval_confidence: 0.5,
                ..OutputConfig::default()
            },
        );
        let wide = TreeEnsembleBackend::new(
            bundle,
            OutputConfig {
                interval_confidence: 0.95,
                ..OutputConfig::default()
            },
        );
        let case = CaseRecord::illustrative();
        let n = narrow.predict_time(&case, reference_date()).unwrap();
        let w = wide.predict_time(&case, reference_date()).unwrap();
        assert_eq!(n.median(), w.median());
        assert!(w.lower() <= n.lower());
        assert!(w.upper() >= n.upper());
    }
}
