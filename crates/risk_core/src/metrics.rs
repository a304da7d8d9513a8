//! Evaluation metrics for probability and regression outputs

use serde::{Deserialize, Serialize};

/// Occurrence-model evaluation recorded in the bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub n_positives: usize,
    pub pos_rate_train: Option<f64>,
    pub pos_rate_test: Option<f64>,
    /// Ranking quality; null unless the test split has both classes
    pub auc: Option<f64>,
    pub auprc: Option<f64>,
    /// Probability accuracy; null when the test split is empty
    pub brier: Option<f64>,
    pub logloss: Option<f64>,
    pub calibrated: bool,
    pub feature_schema_version: String,
    pub label_shift_days: usize,
}

/// Severity-model evaluation recorded in the bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityMetrics {
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub mae_intensity: Option<f64>,
    pub feature_schema_version: String,
    pub label_shift_days: usize,
}

/// Fraction of positive labels; `None` for an empty slice.
pub fn positive_rate(labels: &[bool]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    Some(labels.iter().filter(|&&y| y).count() as f64 / labels.len() as f64)
}

pub fn has_both_classes(labels: &[bool]) -> bool {
    labels.iter().any(|&y| y) && labels.iter().any(|&y| !y)
}

/// Area under the ROC curve via the rank-sum statistic (ties count half).
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Option<f64> {
    if !has_both_classes(labels) {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&i, &j| scores[i].total_cmp(&scores[j]));

    // Average ranks over tied groups
    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }

    let n_pos = labels.iter().filter(|&&y| y).count() as f64;
    let n_neg = labels.len() as f64 - n_pos;
    let rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|(_, y)| **y)
        .map(|(r, _)| r)
        .sum();
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Average precision: precision at each distinct threshold weighted by the recall gained.
pub fn average_precision(labels: &[bool], scores: &[f64]) -> Option<f64> {
    if !has_both_classes(labels) {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&i, &j| scores[j].total_cmp(&scores[i]));

    let total_pos = labels.iter().filter(|&&y| y).count() as f64;
    let (mut tp, mut fp, mut prev_recall, mut ap) = (0.0, 0.0, 0.0, 0.0);
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let recall = tp / total_pos;
        let precision = tp / (tp + fp);
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

pub fn brier_score(labels: &[bool], probs: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    let total: f64 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| (p - if y { 1.0 } else { 0.0 }).powi(2))
        .sum();
    Some(total / labels.len() as f64)
}

/// Binary cross-entropy with probabilities clipped away from 0 and 1.
pub fn log_loss(labels: &[bool], probs: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    const EPS: f64 = 1e-15;
    let total: f64 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            if y {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    Some(total / labels.len() as f64)
}

pub fn mean_absolute_error(targets: &[f64], predictions: &[f64]) -> Option<f64> {
    if targets.is_empty() {
        return None;
    }
    let total: f64 = targets
        .iter()
        .zip(predictions)
        .map(|(t, p)| (t - p).abs())
        .sum();
    Some(total / targets.len() as f64)
}
