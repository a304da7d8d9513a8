//! Deterministic linear estimators
//!
//! Both estimators are fit by full-batch gradient descent from a fixed
//! starting point, so identical inputs always produce identical models.

use serde::{Deserialize, Serialize};

/// A fitted model scoring already-transformed feature vectors.
pub trait Estimator {
    /// Raw score (log-odds for classifiers, target units for regressors).
    fn decision(&self, x: &[f64]) -> f64;

    /// Per-feature linear weights, when the model has them.
    fn coefficients(&self) -> Option<&[f64]> {
        None
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Gradient-descent settings shared by both estimators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    /// L2 penalty on the weights (the intercept is not penalized)
    pub l2: f64,
    pub learning_rate: f64,
    pub max_iter: usize,
    /// Stop when the largest gradient component falls below this
    pub tolerance: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            l2: 1e-2,
            learning_rate: 0.1,
            max_iter: 5000,
            tolerance: 1e-6,
        }
    }
}

/// L2-regularized logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl LogisticRegression {
    /// Fit on rows `x` with boolean labels `y`.
    ///
    /// With `class_balanced`, each class contributes equal total weight.
    pub fn fit(x: &[Vec<f64>], y: &[bool], params: SolverParams, class_balanced: bool) -> Self {
        let width = x.first().map_or(0, Vec::len);
        let mut model = Self {
            coef: vec![0.0; width],
            intercept: 0.0,
        };
        if x.is_empty() {
            return model;
        }

        let weights = sample_weights(y, class_balanced);
        let total: f64 = weights.iter().sum();

        for _ in 0..params.max_iter {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for ((row, &label), &w) in x.iter().zip(y).zip(&weights) {
                let target = if label { 1.0 } else { 0.0 };
                let err = w * (sigmoid(model.decision(row)) - target);
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }

            let mut largest = (grad_b / total).abs();
            for (g, c) in grad_w.iter_mut().zip(&model.coef) {
                *g = *g / total + params.l2 * c;
                largest = largest.max(g.abs());
            }
            if largest < params.tolerance {
                break;
            }

            for (c, g) in model.coef.iter_mut().zip(&grad_w) {
                *c -= params.learning_rate * g;
            }
            model.intercept -= params.learning_rate * grad_b / total;
        }
        model
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.decision(x))
    }
}

impl Estimator for LogisticRegression {
    fn decision(&self, x: &[f64]) -> f64 {
        self.intercept + self.coef.iter().zip(x).map(|(c, v)| c * v).sum::<f64>()
    }

    fn coefficients(&self) -> Option<&[f64]> {
        Some(&self.coef)
    }
}

fn sample_weights(y: &[bool], class_balanced: bool) -> Vec<f64> {
    if !class_balanced {
        return vec![1.0; y.len()];
    }
    let n = y.len() as f64;
    let positives = y.iter().filter(|&&v| v).count() as f64;
    let negatives = n - positives;
    y.iter()
        .map(|&v| {
            let count = if v { positives } else { negatives };
            n / (2.0 * count)
        })
        .collect()
}

/// L2-regularized linear regression under Huber loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuberRegressor {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl HuberRegressor {
    /// Residuals beyond `epsilon` contribute a linear (not quadratic) loss.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: SolverParams, epsilon: f64) -> Self {
        let width = x.first().map_or(0, Vec::len);
        let mut model = Self {
            coef: vec![0.0; width],
            intercept: median(y),
        };
        if x.is_empty() {
            return model;
        }
        let n = x.len() as f64;

        for _ in 0..params.max_iter {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for (row, &target) in x.iter().zip(y) {
                let r = model.decision(row) - target;
                let g = r.clamp(-epsilon, epsilon);
                for (gw, v) in grad_w.iter_mut().zip(row) {
                    *gw += g * v;
                }
                grad_b += g;
            }

            let mut largest = (grad_b / n).abs();
            for (g, c) in grad_w.iter_mut().zip(&model.coef) {
                *g = *g / n + params.l2 * c;
                largest = largest.max(g.abs());
            }
            if largest < params.tolerance {
                break;
            }

            for (c, g) in model.coef.iter_mut().zip(&grad_w) {
                *c -= params.learning_rate * g;
            }
            model.intercept -= params.learning_rate * grad_b / n;
        }
        model
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.decision(x)
    }
}

impl Estimator for HuberRegressor {
    fn decision(&self, x: &[f64]) -> f64 {
        self.intercept + self.coef.iter().zip(x).map(|(c, v)| c * v).sum::<f64>()
    }

    fn coefficients(&self) -> Option<&[f64]> {
        Some(&self.coef)
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let len = sorted.len();
    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<bool>) {
        let x: Vec<Vec<f64>> = (-5..=5).map(|i| vec![i as f64 / 2.0]).collect();
        let y = x.iter().map(|r| r[0] > 0.0).collect();
        (x, y)
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(-800.0).is_finite());
    }

    #[test]
    fn logistic_learns_direction() {
        let (x, y) = separable();
        let model = LogisticRegression::fit(&x, &y, SolverParams::default(), false);
        assert!(model.coef[0] > 0.0);
        assert!(model.predict_proba(&[2.0]) > 0.5);
        assert!(model.predict_proba(&[-2.0]) < 0.5);
    }

    #[test]
    fn stronger_penalty_shrinks_weights() {
        let (x, y) = separable();
        let weak = LogisticRegression::fit(&x, &y, SolverParams { l2: 1e-3, ..Default::default() }, false);
        let strong = LogisticRegression::fit(&x, &y, SolverParams { l2: 1.0, ..Default::default() }, false);
        assert!(strong.coef[0].abs() < weak.coef[0].abs());
    }

    #[test]
    fn class_balancing_equalizes_total_weight() {
        let y = vec![true, false, false, false];
        let w = sample_weights(&y, true);
        assert_eq!(w[0], 2.0);
        assert!((w[1..].iter().sum::<f64>() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn logistic_fit_is_deterministic() {
        let (x, y) = separable();
        let a = LogisticRegression::fit(&x, &y, SolverParams::default(), true);
        let b = LogisticRegression::fit(&x, &y, SolverParams::default(), true);
        assert_eq!(a, b);
    }

    #[test]
    fn huber_resists_outlier() {
        let x: Vec<Vec<f64>> = (0..9).map(|_| vec![0.0]).collect();
        let mut y = vec![4.0; 9];
        y[8] = 100.0;
        let params = SolverParams { l2: 1e-4, ..Default::default() };
        let model = HuberRegressor::fit(&x, &y, params, 0.1);
        assert!((model.predict(&[0.0]) - 4.0).abs() < 0.5);
    }

    #[test]
    fn empty_training_set_yields_zero_model() {
        let model = LogisticRegression::fit(&[], &[], SolverParams::default(), true);
        assert!(model.coef.is_empty());
        assert_eq!(model.predict_proba(&[]), 0.5);
    }
}
