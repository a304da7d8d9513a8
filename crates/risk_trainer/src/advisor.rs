//! Retrain advice
//!
//! A bundle records how many labelled rows it was fit on. Comparing that
//! with the current dataset size tells whether enough new logs arrived to
//! justify another run.

use crate::trainer::{is_eligible, RiskTrainer};
use migraine_risk_core::{LogSource, OccurrenceBundle, Result, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrainDecision {
    /// No bundle yet and enough data to train one
    Missing { current_rows: usize },
    Stale { trained_rows: usize, current_rows: usize },
    Fresh { trained_rows: usize, current_rows: usize },
    /// No bundle and the data would not pass the gate
    Ineligible { n_days: usize, n_positives: usize },
}

impl RetrainDecision {
    pub fn should_retrain(&self) -> bool {
        matches!(self, RetrainDecision::Missing { .. } | RetrainDecision::Stale { .. })
    }
}

fn compare(bundle: Option<OccurrenceBundle>, current_rows: usize, threshold: usize) -> Option<RetrainDecision> {
    let trained_rows = bundle?.metrics.n_samples();
    Some(if current_rows.saturating_sub(trained_rows) >= threshold {
        RetrainDecision::Stale {
            trained_rows,
            current_rows,
        }
    } else {
        RetrainDecision::Fresh {
            trained_rows,
            current_rows,
        }
    })
}

/// Decides which scopes are due for retraining.
#[derive(Debug, Clone, Copy)]
pub struct RetrainAdvisor<'a> {
    trainer: &'a RiskTrainer,
}

impl<'a> RetrainAdvisor<'a> {
    pub fn new(trainer: &'a RiskTrainer) -> Self {
        Self { trainer }
    }

    pub fn global(&self, source: &dyn LogSource) -> Result<RetrainDecision> {
        let dataset = self.trainer.builder().build_population(source)?;
        let current_rows = dataset.len();
        let threshold = self.trainer.config().global_min_new_logs;
        let decision = match compare(self.trainer.store().load_global()?, current_rows, threshold) {
            Some(decision) => decision,
            None if current_rows == 0 => RetrainDecision::Ineligible {
                n_days: 0,
                n_positives: 0,
            },
            None => RetrainDecision::Missing { current_rows },
        };
        debug!(?decision, "global retrain decision");
        Ok(decision)
    }

    pub fn user(&self, source: &dyn LogSource, user_id: UserId) -> Result<RetrainDecision> {
        let dataset = self.trainer.builder().build_for_user(source, user_id)?;
        let config = self.trainer.config();
        let (n_days, n_positives) = (dataset.len(), dataset.positives());
        let stored = self.trainer.store().load_user(user_id)?;
        let decision = match compare(stored, n_days, config.user_retrain_new_logs) {
            Some(decision) => decision,
            None if is_eligible(n_days, n_positives, config) => RetrainDecision::Missing {
                current_rows: n_days,
            },
            None => RetrainDecision::Ineligible { n_days, n_positives },
        };
        debug!(user_id, ?decision, "user retrain decision");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_and_stale_retrain() {
        assert!(RetrainDecision::Missing { current_rows: 40 }.should_retrain());
        assert!(RetrainDecision::Stale {
            trained_rows: 30,
            current_rows: 40
        }
        .should_retrain());
        assert!(!RetrainDecision::Fresh {
            trained_rows: 35,
            current_rows: 40
        }
        .should_retrain());
        assert!(!RetrainDecision::Ineligible {
            n_days: 3,
            n_positives: 0
        }
        .should_retrain());
    }

    #[test]
    fn decision_serializes_with_status_tag() {
        let json = serde_json::to_value(RetrainDecision::Stale {
            trained_rows: 1,
            current_rows: 11,
        })
        .unwrap();
        assert_eq!(json["status"], "stale");
        assert_eq!(json["current_rows"], 11);
    }
}
