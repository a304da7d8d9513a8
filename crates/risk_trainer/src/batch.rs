//! Batch training of every known user
//!
//! Users are trained independently on a rayon pool. A user's decline or
//! fault lands in that user's slot and never aborts the batch.

use crate::advisor::{RetrainAdvisor, RetrainDecision};
use crate::errors::{Result, TrainerError};
use crate::trainer::RiskTrainer;
use chrono::{DateTime, Utc};
use migraine_risk_core::{LogSource, Scope, TrainOutcome, UserId};
use rayon::prelude::*;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    #[default]
    All,
    /// Skip users whose bundle is fresh or who cannot pass the gate
    OnlyStale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserJob {
    Ran(TrainOutcome),
    Skipped(RetrainDecision),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserResult {
    pub user_id: UserId,
    pub job: UserJob,
}

impl UserResult {
    pub fn to_json(&self) -> Value {
        match &self.job {
            UserJob::Ran(outcome) => {
                let mut out = outcome.to_json();
                out["user_id"] = json!(self.user_id);
                out
            }
            UserJob::Skipped(decision) => json!({
                "ok": false,
                "user_id": self.user_id,
                "scope": Scope::User(self.user_id),
                "skipped": true,
                "decision": decision,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub users: Vec<UserResult>,
    pub finished_at: DateTime<Utc>,
}

impl BatchOutcome {
    pub fn trained(&self) -> usize {
        self.users
            .iter()
            .filter(|u| matches!(&u.job, UserJob::Ran(o) if o.is_ok()))
            .count()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "ok": true,
            "trained": self.trained(),
            "finished_at": self.finished_at,
            "users": self.users.iter().map(UserResult::to_json).collect::<Vec<_>>(),
        })
    }
}

impl RiskTrainer {
    fn train_one(&self, source: &dyn LogSource, user_id: UserId, mode: BatchMode) -> UserJob {
        let scope = Scope::User(user_id);
        if mode == BatchMode::OnlyStale {
            match RetrainAdvisor::new(self).user(source, user_id) {
                Ok(decision) if !decision.should_retrain() => return UserJob::Skipped(decision),
                Ok(_) => {}
                Err(err) => {
                    warn!(user_id, error = %err, "retrain check failed");
                    return UserJob::Ran(TrainOutcome::failed(scope, &err));
                }
            }
        }
        match self.train_user_occurrence(source, user_id) {
            Ok(outcome) => UserJob::Ran(outcome),
            Err(err) => {
                warn!(user_id, error = %err, "user training failed");
                UserJob::Ran(TrainOutcome::failed(scope, &err))
            }
        }
    }

    /// Train (or re-check) every user the source knows about.
    ///
    /// `threads` caps the pool size; `None` uses rayon's default.
    #[instrument(skip(self, source))]
    pub fn train_all_users(
        &self,
        source: &dyn LogSource,
        mode: BatchMode,
        threads: Option<usize>,
    ) -> Result<BatchOutcome> {
        let user_ids = source.user_ids()?;
        info!(users = user_ids.len(), ?mode, "starting batch training");

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| TrainerError::ThreadPool(e.to_string()))?;

        let users: Vec<UserResult> = pool.install(|| {
            user_ids
                .par_iter()
                .map(|&user_id| UserResult {
                    user_id,
                    job: self.train_one(source, user_id, mode),
                })
                .collect()
        });

        let outcome = BatchOutcome {
            users,
            finished_at: Utc::now(),
        };
        info!(
            users = outcome.users.len(),
            trained = outcome.trained(),
            "batch training finished"
        );
        Ok(outcome)
    }
}
