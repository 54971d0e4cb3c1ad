//! Prediction heads on top of text embeddings
//!
//! The quantile head builds its interval structurally:
//!
//! ```text
//! median = softplus(m)
//! lower  = median - softplus(l - median + 1)
//! upper  = median + softplus(u - median + 1)
//! ```
//!
//! then scales all three by a positive day factor. Softplus is never
//! negative, so `lower <= median <= upper` holds for every input and every
//! parameter setting.

use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Quantile levels trained for (lower, median, upper)
pub const QUANTILES: [f64; 3] = [0.10, 0.50, 0.90];

/// Days represented by one unit of head output
pub const DAY_SCALE: f64 = 30.0;

/// Median the untrained head predicts, in days
pub const PRIOR_MEDIAN_DAYS: f64 = 45.0;

/// Outcome frequencies the untrained classification head starts from
pub const PRIOR_OUTCOME_RATES: [f64; 3] = [0.70, 0.20, 0.10];

pub fn softplus(x: f64) -> f64 {
    // ln(1 + e^x) without overflow for large x
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn inverse_softplus(y: f64) -> f64 {
    y.exp_m1().ln()
}

fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let exp = logits.mapv(|z| (z - max).exp());
    let total = exp.sum();
    exp / total
}

/// Derivative of the pinball loss at level `q` with respect to the prediction
fn pinball_grad(q: f64, prediction: f64, target: f64) -> f64 {
    if target > prediction {
        -q
    } else {
        1.0 - q
    }
}

pub fn pinball_loss(q: f64, prediction: f64, target: f64) -> f64 {
    let diff = target - prediction;
    (q * diff).max((q - 1.0) * diff)
}

/// SGD settings shared by both heads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadTrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub hidden_units: usize,
    pub seed: u64,
}

impl Default for HeadTrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            learning_rate: 0.05,
            hidden_units: 32,
            seed: 42,
        }
    }
}

fn init_matrix(rng: &mut ChaCha8Rng, rows: usize, cols: usize) -> Array2<f64> {
    let bound = 1.0 / (cols.max(1) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
}

fn shuffled(rng: &mut ChaCha8Rng, n: usize) -> Vec<usize> {
    use rand::seq::SliceRandom;
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    order
}

/// Linear softmax classifier over outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationHead {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl ClassificationHead {
    /// Small random weights with bias at the prior outcome log-rates
    pub fn initialized(input_dim: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weights = init_matrix(&mut rng, PRIOR_OUTCOME_RATES.len(), input_dim) * 0.1;
        let bias = Array1::from_iter(PRIOR_OUTCOME_RATES.iter().map(|p| p.ln()));
        Self { weights, bias }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn classes(&self) -> usize {
        self.weights.nrows()
    }

    pub fn predict_proba(&self, embedding: ArrayView1<f64>) -> Vec<f64> {
        softmax(&(self.weights.dot(&embedding) + &self.bias)).to_vec()
    }

    /// Cross-entropy SGD; returns mean loss of the final epoch
    pub fn train(&mut self, embeddings: &[Array1<f64>], labels: &[usize], config: &HeadTrainingConfig) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut last_loss = 0.0;

        for _ in 0..config.epochs {
            let mut total = 0.0;
            for i in shuffled(&mut rng, embeddings.len()) {
                let x = &embeddings[i];
                let probs = softmax(&(self.weights.dot(x) + &self.bias));
                let label = labels[i].min(self.classes() - 1);
                total -= probs[label].max(1e-12).ln();

                let mut grad = probs;
                grad[label] -= 1.0;
                for (k, g) in grad.iter().enumerate() {
                    let mut row = self.weights.row_mut(k);
                    row.scaled_add(-config.learning_rate * g, x);
                    self.bias[k] -= config.learning_rate * g;
                }
            }
            last_loss = total / embeddings.len().max(1) as f64;
        }
        last_loss
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.classes() != PRIOR_OUTCOME_RATES.len() || self.bias.len() != self.classes() {
            return Err(format!("classification head has {} classes", self.classes()));
        }
        if self.weights.iter().chain(self.bias.iter()).any(|v| !v.is_finite()) {
            return Err("classification head has non-finite weights".to_string());
        }
        Ok(())
    }
}

/// Intermediate values of one forward pass, kept for backpropagation
struct Forward {
    pre: Array1<f64>,
    hidden: Array1<f64>,
    raw: [f64; 3],
    /// (median, lower, upper) in output units
    out: [f64; 3],
}

/// One-hidden-layer regression head with three structurally ordered outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileHead {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
    day_scale: f64,
}

impl QuantileHead {
    /// Seeded weights whose outputs start near the prior median
    pub fn initialized(input_dim: usize, hidden_units: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let hidden_units = hidden_units.max(1);
        let w1 = init_matrix(&mut rng, hidden_units, input_dim);
        let b1 = Array1::zeros(hidden_units);
        let w2 = init_matrix(&mut rng, 3, hidden_units) * 0.1;

        let m = inverse_softplus(PRIOR_MEDIAN_DAYS / DAY_SCALE);
        let median = PRIOR_MEDIAN_DAYS / DAY_SCALE;
        // Start with a 15-day spread below and 18 days above the median
        let l = median - 1.0 + inverse_softplus(15.0 / DAY_SCALE);
        let u = median - 1.0 + inverse_softplus(18.0 / DAY_SCALE);
        let b2 = Array1::from_vec(vec![m, l, u]);

        Self {
            w1,
            b1,
            w2,
            b2,
            day_scale: DAY_SCALE,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w1.ncols()
    }

    fn forward(&self, x: ArrayView1<f64>) -> Forward {
        let pre = self.w1.dot(&x) + &self.b1;
        let hidden = pre.mapv(|v| v.max(0.0));
        let z = self.w2.dot(&hidden) + &self.b2;
        let raw = [z[0], z[1], z[2]];

        let median = softplus(raw[0]);
        let lower = median - softplus(raw[1] - median + 1.0);
        let upper = median + softplus(raw[2] - median + 1.0);

        Forward {
            pre,
            hidden,
            raw,
            out: [median, lower, upper],
        }
    }

    /// `(median, lower, upper)` in days, always ordered
    pub fn predict(&self, embedding: ArrayView1<f64>) -> (f64, f64, f64) {
        let [median, lower, upper] = self.forward(embedding).out;
        (median * self.day_scale, lower * self.day_scale, upper * self.day_scale)
    }

    /// Mean pinball loss over (lower, median, upper) at [`QUANTILES`]
    pub fn loss(&self, embeddings: &[Array1<f64>], days: &[f64]) -> f64 {
        let mut total = 0.0;
        for (x, y) in embeddings.iter().zip(days) {
            let [median, lower, upper] = self.forward(x.view()).out;
            let t = y / self.day_scale;
            total += (pinball_loss(QUANTILES[0], lower, t)
                + pinball_loss(QUANTILES[1], median, t)
                + pinball_loss(QUANTILES[2], upper, t))
                / 3.0;
        }
        total / embeddings.len().max(1) as f64
    }

    /// Pinball-loss SGD; returns mean loss after the final epoch
    pub fn train(&mut self, embeddings: &[Array1<f64>], days: &[f64], config: &HeadTrainingConfig) -> f64 {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));
        let lr = config.learning_rate;

        for _ in 0..config.epochs {
            for i in shuffled(&mut rng, embeddings.len()) {
                let x = &embeddings[i];
                let t = days[i] / self.day_scale;
                let fwd = self.forward(x.view());
                let [median, lower, upper] = fwd.out;
                let [m, l, u] = fwd.raw;

                let g_lower = pinball_grad(QUANTILES[0], lower, t);
                let g_median = pinball_grad(QUANTILES[1], median, t);
                let g_upper = pinball_grad(QUANTILES[2], upper, t);

                let sa = sigmoid(l - median + 1.0);
                let sb = sigmoid(u - median + 1.0);

                // lower and upper both depend on median through their offsets
                let d_median = g_median + g_lower * (1.0 + sa) + g_upper * (1.0 - sb);
                let dz = Array1::from_vec(vec![
                    d_median * sigmoid(m) / 3.0,
                    -g_lower * sa / 3.0,
                    g_upper * sb / 3.0,
                ]);

                let d_hidden = self.w2.t().dot(&dz);
                let d_pre = d_hidden * fwd.pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });

                for (k, g) in dz.iter().enumerate() {
                    self.w2.row_mut(k).scaled_add(-lr * g, &fwd.hidden);
                }
                self.b2.scaled_add(-lr, &dz);
                for (j, g) in d_pre.iter().enumerate() {
                    if *g != 0.0 {
                        self.w1.row_mut(j).scaled_add(-lr * g, x);
                    }
                }
                self.b1.scaled_add(-lr, &d_pre);
            }
        }
        self.loss(embeddings, days)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.w1.nrows() != self.b1.len() || self.w2.ncols() != self.b1.len() {
            return Err("quantile head hidden layer shapes disagree".to_string());
        }
        if self.w2.nrows() != 3 || self.b2.len() != 3 {
            return Err("quantile head must have three outputs".to_string());
        }
        if !(self.day_scale.is_finite() && self.day_scale > 0.0) {
            return Err(format!("day scale {} is not positive", self.day_scale));
        }
        let params = self.w1.iter().chain(&self.b1).chain(&self.w2).chain(&self.b2);
        if params.into_iter().any(|v| !v.is_finite()) {
            return Err("quantile head has non-finite weights".to_string());
        }
        Ok(())
    }
}
