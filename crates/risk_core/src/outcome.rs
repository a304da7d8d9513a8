//! Structured results of training and prediction
//!
//! "Not enough data" is an expected outcome and is carried here as a
//! [`FailureReason`], never as an error.

use crate::bundle::{BundleMetrics, Scope};
use crate::errors::RiskError;
use crate::explain::Explanation;
use crate::records::UserId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;

/// Machine-checkable reason for a declined operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoData,
    InsufficientUserHistory,
    ModelNotTrained,
    NoSeverityData,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoData => "no_data",
            FailureReason::InsufficientUserHistory => "insufficient_user_history",
            FailureReason::ModelNotTrained => "model_not_trained",
            FailureReason::NoSeverityData => "no_severity_data",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one training run.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    Trained {
        scope: Scope,
        metrics: BundleMetrics,
        path: PathBuf,
    },
    Declined {
        scope: Scope,
        reason: FailureReason,
        /// Observed counts, attached when the eligibility gate declines
        n_days: Option<usize>,
        n_positives: Option<usize>,
    },
    /// Infrastructure fault isolated to this scope during batch training
    Failed {
        scope: Scope,
        code: String,
        message: String,
    },
}

impl TrainOutcome {
    pub fn declined(scope: Scope, reason: FailureReason) -> Self {
        TrainOutcome::Declined {
            scope,
            reason,
            n_days: None,
            n_positives: None,
        }
    }

    pub fn failed(scope: Scope, err: &RiskError) -> Self {
        TrainOutcome::Failed {
            scope,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TrainOutcome::Trained { .. })
    }

    pub fn scope(&self) -> Scope {
        match self {
            TrainOutcome::Trained { scope, .. }
            | TrainOutcome::Declined { scope, .. }
            | TrainOutcome::Failed { scope, .. } => *scope,
        }
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            TrainOutcome::Declined { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TrainOutcome::Trained {
                scope,
                metrics,
                path,
            } => json!({
                "ok": true,
                "scope": scope,
                "metrics": metrics,
                "path": path.display().to_string(),
            }),
            TrainOutcome::Declined {
                scope,
                reason,
                n_days,
                n_positives,
            } => {
                let mut out = json!({ "ok": false, "scope": scope, "reason": reason });
                if let Some(n) = n_days {
                    out["n_days"] = json!(n);
                }
                if let Some(n) = n_positives {
                    out["n_positives"] = json!(n);
                }
                out
            }
            TrainOutcome::Failed {
                scope,
                code,
                message,
            } => json!({
                "ok": false,
                "scope": scope,
                "reason": "error",
                "error": { "code": code, "message": message },
            }),
        }
    }
}

/// Which probability the final number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionPath {
    GlobalOnly,
    Blended,
}

/// Next-day risk for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub user_id: UserId,
    /// Date of the feature row the prediction was made from
    pub as_of: NaiveDate,
    pub p_global: f64,
    pub p_user: Option<f64>,
    pub p_final: f64,
    pub blend_weight: f64,
    /// Labelled rows behind the blend weight
    pub n_user_rows: usize,
    pub explain: Option<Explanation>,
    pub used: PredictionPath,
    /// Global severity estimate; never blended
    pub expected_intensity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictOutcome {
    Predicted(Prediction),
    Declined { reason: FailureReason },
}

impl PredictOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, PredictOutcome::Predicted(_))
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            PredictOutcome::Predicted(p) => Some(p),
            PredictOutcome::Declined { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            PredictOutcome::Declined { reason } => Some(*reason),
            PredictOutcome::Predicted(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PredictOutcome::Predicted(prediction) => {
                let mut out = serde_json::to_value(prediction).unwrap_or_else(|_| json!({}));
                out["ok"] = json!(true);
                out
            }
            PredictOutcome::Declined { reason } => json!({ "ok": false, "reason": reason }),
        }
    }
}
