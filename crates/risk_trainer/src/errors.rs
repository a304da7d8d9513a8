use migraine_risk_core::RiskError;
use thiserror::Error;

/// Errors returned by the trainers.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("risk core error: {0}")]
    Core(#[from] RiskError),

    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
