//! Next-day migraine risk core
//!
//! Turns ordered daily logs into leakage-free feature rows, fits a
//! population occurrence model (calibrated) plus optional per-user models,
//! and blends their probabilities with a weight that grows with the
//! user's own history.
//!
//! Modules:
//! - `records`: Daily log records and the log-source seam
//! - `features`: Dataset builder (lags, deltas, rolling aggregates, shifted labels)
//! - `preprocess`: Impute/scale/one-hot transform fit from a column list
//! - `linear`: Deterministic logistic and Huber estimators
//! - `calibration`: Platt scaling over stratified folds
//! - `model`: Fitted pipelines and the occurrence-model wrapper
//! - `metrics`: Ranking, probability and regression metrics
//! - `bundle` / `store`: Model bundles and their on-disk store
//! - `cache`: Bounded bundle cache
//! - `predict`: Predictor and blender
//! - `explain`: Linear attribution
//! - `config`: Tunables and their manager

pub mod bundle;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod errors;
pub mod explain;
pub mod features;
pub mod linear;
pub mod metrics;
pub mod model;
pub mod outcome;
pub mod predict;
pub mod preprocess;
pub mod records;
pub mod store;

pub use bundle::{BundleMetrics, ModelBundle, OccurrenceBundle, Scope, SeverityBundle};
pub use cache::{BundleCache, CacheStats};
pub use calibration::{CalibratedPipeline, PlattScaling};
pub use config::{ConfigManager, RiskConfig};
pub use errors::{Result, RiskError};
pub use explain::{explain, Contribution, Explanation};
pub use features::{feature_columns, BuiltDataset, DatasetBuilder, FeatureRow};
pub use linear::{HuberRegressor, LogisticRegression, SolverParams};
pub use metrics::{OccurrenceMetrics, SeverityMetrics};
pub use model::{OccurrenceModel, Pipeline, ProbabilityModel, SeverityModel};
pub use outcome::{FailureReason, PredictOutcome, Prediction, PredictionPath, TrainOutcome};
pub use predict::{blend_weight, clip_probability, Predictor};
pub use records::{InMemoryLogStore, LogRecord, LogSource, UserId};
pub use store::{content_hash, ModelStore, SaveReceipt};

/// Crate version string for bundle metadata and reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
