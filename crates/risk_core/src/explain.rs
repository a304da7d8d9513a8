//! Per-feature attribution for linear occurrence models

use crate::features::FeatureRow;
use crate::model::Attributable;
use serde::{Deserialize, Serialize};

/// Contributions at or below this magnitude are noise.
pub const CONTRIBUTION_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Transformed feature name, e.g. `stress_level` or `weekday_4`
    pub feature: String,
    pub contribution: f64,
}

/// Top contributions in each direction, or a note saying why there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub top_positive: Vec<Contribution>,
    pub top_negative: Vec<Contribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Explanation {
    pub fn unavailable(note: impl Into<String>) -> Self {
        Self {
            top_positive: Vec::new(),
            top_negative: Vec::new(),
            note: Some(note.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.note.is_none()
    }
}

/// Attribute one row's score to its transformed features.
///
/// Contribution of feature j is `x_j * w_j` in the preprocessed space.
/// Positives are listed largest first, negatives most negative first.
pub fn explain(model: &dyn Attributable, row: &FeatureRow, top_k: usize) -> Explanation {
    let Some(linear) = model.attribution() else {
        return Explanation::unavailable("Explanation unavailable for this model type.");
    };

    let x = linear.transform(row);
    let names = linear.feature_names();
    let coef = linear.coefficients();
    if x.len() != coef.len() || names.len() != coef.len() {
        return Explanation::unavailable("Model has no linear coefficients.");
    }

    let mut scored: Vec<Contribution> = names
        .into_iter()
        .zip(x.iter().zip(coef).map(|(xi, wi)| xi * wi))
        .map(|(feature, contribution)| Contribution {
            feature,
            contribution,
        })
        .collect();
    // Stable sort keeps column order among ties
    scored.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));

    let top_positive = scored
        .iter()
        .take_while(|c| c.contribution > CONTRIBUTION_EPSILON)
        .take(top_k)
        .cloned()
        .collect();
    let top_negative = scored
        .iter()
        .rev()
        .take_while(|c| c.contribution < -CONTRIBUTION_EPSILON)
        .take(top_k)
        .cloned()
        .collect();

    Explanation {
        top_positive,
        top_negative,
        note: None,
    }
}
