//! Post-hoc sigmoid (Platt) calibration with cross-fitted folds
//!
//! Each fold fits a base pipeline on the other folds and a sigmoid on the
//! held-out scores. Calibrated probability is the mean across folds.

use crate::features::FeatureRow;
use crate::linear::LogisticRegression;
use crate::model::Pipeline;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `p = 1 / (1 + exp(a * score + b))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl PlattScaling {
    /// Newton's method with backtracking on the regularized targets of
    /// Platt (1999), following the Lin–Lin–Weng formulation.
    pub fn fit(scores: &[f64], labels: &[bool]) -> Self {
        let prior1 = labels.iter().filter(|&&y| y).count() as f64;
        let prior0 = labels.len() as f64 - prior1;
        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let targets: Vec<f64> = labels.iter().map(|&y| if y { hi } else { lo }).collect();

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(scores, &targets, a, b);

        for _ in 0..100 {
            let (mut h11, mut h22, mut h21) = (1e-12, 1e-12, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&s, &t) in scores.iter().zip(&targets) {
                let f = s * a + b;
                let (p, q) = if f >= 0.0 {
                    let e = (-f).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = f.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += s * s * d2;
                h22 += d2;
                h21 += s * d2;
                let d1 = t - p;
                g1 += s * d1;
                g2 += d1;
            }
            if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= 1e-10 {
                let (na, nb) = (a + step * da, b + step * db);
                let nf = objective(scores, &targets, na, nb);
                if nf < fval + 1e-4 * step * gd {
                    a = na;
                    b = nb;
                    fval = nf;
                    break;
                }
                step /= 2.0;
            }
            if step < 1e-10 {
                break;
            }
        }
        Self { a, b }
    }

    pub fn probability(&self, score: f64) -> f64 {
        crate::linear::sigmoid(-(self.a * score + self.b))
    }
}

fn objective(scores: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    scores
        .iter()
        .zip(targets)
        .map(|(&s, &t)| {
            let f = s * a + b;
            if f >= 0.0 {
                t * f + (-f).exp().ln_1p()
            } else {
                (t - 1.0) * f + f.exp().ln_1p()
            }
        })
        .sum()
}

/// Base pipeline plus the sigmoid fit on its held-out scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedFold {
    pub estimator: Pipeline<LogisticRegression>,
    pub calibrator: PlattScaling,
}

/// Ensemble of calibrated folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedPipeline {
    pub folds: Vec<CalibratedFold>,
}

impl CalibratedPipeline {
    /// Cross-fit `folds` calibrated copies of the base pipeline produced by `fit_base`.
    ///
    /// Folds are stratified and keep the original row order. The usable
    /// fold count is capped by the minority-class count; below two, a single
    /// base pipeline is fit on every row and calibrated on its own scores.
    pub fn fit<F>(rows: &[FeatureRow], labels: &[bool], folds: usize, fit_base: F) -> Self
    where
        F: Fn(&[FeatureRow], &[bool]) -> Pipeline<LogisticRegression>,
    {
        let positives = labels.iter().filter(|&&y| y).count();
        let negatives = labels.len() - positives;
        let k = folds.min(positives).min(negatives);

        if k < 2 {
            debug!(requested = folds, usable = k, "calibrating on in-sample scores");
            let estimator = fit_base(rows, labels);
            let scores: Vec<f64> = rows.iter().map(|r| estimator.decision(r)).collect();
            let calibrator = PlattScaling::fit(&scores, labels);
            return Self {
                folds: vec![CalibratedFold {
                    estimator,
                    calibrator,
                }],
            };
        }

        let assignment = stratified_folds(labels, k);
        let folds = (0..k)
            .map(|fold| {
                let (mut train_rows, mut train_labels) = (Vec::new(), Vec::new());
                let (mut held_rows, mut held_labels) = (Vec::new(), Vec::new());
                for ((row, &label), &f) in rows.iter().zip(labels).zip(&assignment) {
                    if f == fold {
                        held_rows.push(row.clone());
                        held_labels.push(label);
                    } else {
                        train_rows.push(row.clone());
                        train_labels.push(label);
                    }
                }
                let estimator = fit_base(&train_rows, &train_labels);
                let scores: Vec<f64> = held_rows.iter().map(|r| estimator.decision(r)).collect();
                CalibratedFold {
                    estimator,
                    calibrator: PlattScaling::fit(&scores, &held_labels),
                }
            })
            .collect();
        Self { folds }
    }

    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        if self.folds.is_empty() {
            return 0.5;
        }
        let total: f64 = self
            .folds
            .iter()
            .map(|f| f.calibrator.probability(f.estimator.decision(row)))
            .sum();
        total / self.folds.len() as f64
    }

    /// The first fold's base pipeline.
    pub fn base(&self) -> Option<&Pipeline<LogisticRegression>> {
        self.folds.first().map(|f| &f.estimator)
    }
}

/// i-th positive goes to fold i mod k, likewise for negatives.
fn stratified_folds(labels: &[bool], k: usize) -> Vec<usize> {
    let (mut pos, mut neg) = (0usize, 0usize);
    labels
        .iter()
        .map(|&y| {
            let counter = if y { &mut pos } else { &mut neg };
            let fold = *counter % k;
            *counter += 1;
            fold
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platt_is_monotone_in_score() {
        let scores = vec![-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0, -0.5, 0.5];
        let labels = vec![false, false, false, true, true, true, true, false, false];
        let platt = PlattScaling::fit(&scores, &labels);
        assert!(platt.probability(2.0) > platt.probability(-2.0));
        assert!(platt.a < 0.0);
    }

    #[test]
    fn platt_with_single_class_stays_finite() {
        let platt = PlattScaling::fit(&[0.1, 0.2, 0.3], &[false, false, false]);
        let p = platt.probability(0.2);
        assert!(p.is_finite() && p > 0.0 && p < 0.5);
    }

    #[test]
    fn folds_are_stratified_and_ordered() {
        let labels = vec![true, false, false, true, false, true, false];
        let folds = stratified_folds(&labels, 2);
        assert_eq!(folds, vec![0, 0, 1, 1, 0, 0, 1]);
    }
}
