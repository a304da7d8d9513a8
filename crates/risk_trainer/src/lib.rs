//! Migraine risk trainer
//!
//! Fits the population occurrence and severity models and the per-user
//! occurrence models, then writes them to the model store that the
//! predictor reads.

pub mod advisor;
pub mod batch;
pub mod errors;
pub mod split;
pub mod trainer;

pub use advisor::{RetrainAdvisor, RetrainDecision};
pub use batch::{BatchMode, BatchOutcome, UserJob, UserResult};
pub use errors::TrainerError;
pub use split::{global_split, user_split, SplitPlan};
pub use trainer::{is_eligible, RiskTrainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
