//! Pipeline configuration and its manager

use crate::errors::{Result, RiskError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tunables for dataset construction, training, blending and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Predict the outcome this many days after the feature row
    pub label_shift_days: usize,
    /// Trailing window sizes for rolling aggregates
    pub roll_windows: Vec<usize>,

    /// Eligibility gate: minimum labelled rows for a personal model
    pub user_min_days: usize,
    /// Eligibility gate: minimum positive labels for a personal model
    pub user_min_positives: usize,
    /// New labelled rows after which a personal model is considered stale
    pub user_retrain_new_logs: usize,
    /// New population rows after which the global model is considered stale
    pub global_min_new_logs: usize,

    /// Trust-curve constant: blend weight is 0.5 at this many user rows
    pub blend_n0: f64,
    /// Bumped whenever feature engineering changes
    pub feature_schema_version: String,

    pub global_test_fraction: f64,
    /// Below this many rows the global split evaluates on the train rows
    pub global_small_threshold: usize,
    pub user_test_fraction: f64,
    pub user_small_test_fraction: f64,
    /// At or above this many rows the user split uses `user_test_fraction`
    pub user_large_threshold: usize,
    pub calibration_folds: usize,

    pub global_l2: f64,
    pub user_l2: f64,
    pub severity_l2: f64,
    pub huber_epsilon: f64,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub tolerance: f64,

    pub explain_top_k: usize,
    /// Probabilities are clipped into [prob_clip, 1 - prob_clip]
    pub prob_clip: f64,
    /// Maximum per-user bundles held by the predictor cache
    pub user_cache_capacity: usize,
    /// Base directory of the model store
    pub model_dir: PathBuf,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            label_shift_days: 1,
            roll_windows: vec![3, 7],
            user_min_days: 30,
            user_min_positives: 5,
            user_retrain_new_logs: 10,
            global_min_new_logs: 100,
            blend_n0: 120.0,
            feature_schema_version: "v1".to_string(),
            global_test_fraction: 0.3,
            global_small_threshold: 5,
            user_test_fraction: 0.2,
            user_small_test_fraction: 0.3,
            user_large_threshold: 50,
            calibration_folds: 2,
            global_l2: 5e-2,
            user_l2: 1e-1,
            severity_l2: 1e-4,
            huber_epsilon: 0.1,
            learning_rate: 0.1,
            max_iter: 5000,
            tolerance: 1e-6,
            explain_top_k: 5,
            prob_clip: 1e-4,
            user_cache_capacity: 128,
            model_dir: PathBuf::from("./models"),
        }
    }
}

impl RiskConfig {
    /// Check the configuration, returning non-fatal warnings.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.roll_windows.is_empty() || self.roll_windows.contains(&0) {
            return Err(RiskError::InvalidConfig(
                "roll_windows must be non-empty and positive".into(),
            ));
        }
        for (name, value) in [
            ("global_test_fraction", self.global_test_fraction),
            ("user_test_fraction", self.user_test_fraction),
            ("user_small_test_fraction", self.user_small_test_fraction),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(RiskError::InvalidConfig(format!(
                    "{name} must lie in (0, 1), got {value}"
                )));
            }
        }
        if !(self.prob_clip > 0.0 && self.prob_clip < 0.5) {
            return Err(RiskError::InvalidConfig(format!(
                "prob_clip must lie in (0, 0.5), got {}",
                self.prob_clip
            )));
        }
        if !(self.blend_n0 > 0.0) {
            return Err(RiskError::InvalidConfig("blend_n0 must be positive".into()));
        }
        if self.max_iter == 0 || !(self.learning_rate > 0.0) {
            return Err(RiskError::InvalidConfig(
                "max_iter and learning_rate must be positive".into(),
            ));
        }
        if self.feature_schema_version.trim().is_empty() {
            return Err(RiskError::InvalidConfig(
                "feature_schema_version must not be empty".into(),
            ));
        }

        if self.user_l2 <= self.global_l2 {
            warnings.push(format!(
                "user_l2 ({}) is not stronger than global_l2 ({})",
                self.user_l2, self.global_l2
            ));
        }
        if self.calibration_folds < 2 {
            warnings.push("calibration_folds < 2 disables cross-fitted calibration".into());
        }
        if self.user_min_positives > self.user_min_days {
            warnings.push("user_min_positives exceeds user_min_days; no user can qualify".into());
        }
        if self.user_cache_capacity == 0 {
            warnings.push("user_cache_capacity is 0; per-user bundles are never cached".into());
        }

        Ok(warnings)
    }
}

/// Configuration manager with file and environment layering
pub struct ConfigManager {
    config: RwLock<RiskConfig>,
    overrides: RwLock<HashMap<String, serde_json::Value>>,
}

impl ConfigManager {
    /// Create a manager holding the defaults
    pub fn new() -> Self {
        Self {
            config: RwLock::new(RiskConfig::default()),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let config: RiskConfig = toml::from_str(&content)
            .map_err(|e| RiskError::InvalidConfig(format!("Failed to parse config: {}", e)))?;

        self.update_config(config);
        Ok(())
    }

    /// Apply `MIGRAINE_RISK_*` environment overrides
    pub fn load_from_env(&self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.get_config();
        let mut overrides = self.overrides.write();

        if let Some(val) = lookup("MIGRAINE_RISK_MODEL_DIR") {
            config.model_dir = PathBuf::from(&val);
            overrides.insert("model_dir".into(), serde_json::Value::String(val));
        }
        if let Some(val) = lookup("MIGRAINE_RISK_SCHEMA_VERSION") {
            config.feature_schema_version = val.clone();
            overrides.insert(
                "feature_schema_version".into(),
                serde_json::Value::String(val),
            );
        }
        if let Some(val) = lookup("MIGRAINE_RISK_LABEL_SHIFT_DAYS") {
            config.label_shift_days = parse_env("MIGRAINE_RISK_LABEL_SHIFT_DAYS", &val)?;
            overrides.insert(
                "label_shift_days".into(),
                serde_json::Value::from(config.label_shift_days),
            );
        }
        if let Some(val) = lookup("MIGRAINE_RISK_BLEND_N0") {
            config.blend_n0 = parse_env("MIGRAINE_RISK_BLEND_N0", &val)?;
            overrides.insert("blend_n0".into(), serde_json::Value::from(config.blend_n0));
        }
        if let Some(val) = lookup("MIGRAINE_RISK_USER_MIN_DAYS") {
            config.user_min_days = parse_env("MIGRAINE_RISK_USER_MIN_DAYS", &val)?;
            overrides.insert(
                "user_min_days".into(),
                serde_json::Value::from(config.user_min_days),
            );
        }
        if let Some(val) = lookup("MIGRAINE_RISK_USER_MIN_POSITIVES") {
            config.user_min_positives = parse_env("MIGRAINE_RISK_USER_MIN_POSITIVES", &val)?;
            overrides.insert(
                "user_min_positives".into(),
                serde_json::Value::from(config.user_min_positives),
            );
        }
        if let Some(val) = lookup("MIGRAINE_RISK_USER_CACHE_CAPACITY") {
            config.user_cache_capacity = parse_env("MIGRAINE_RISK_USER_CACHE_CAPACITY", &val)?;
            overrides.insert(
                "user_cache_capacity".into(),
                serde_json::Value::from(config.user_cache_capacity),
            );
        }

        drop(overrides);
        self.update_config(config);
        Ok(())
    }

    /// Current configuration snapshot
    pub fn get_config(&self) -> RiskConfig {
        self.config.read().clone()
    }

    /// Replace the configuration
    pub fn update_config(&self, config: RiskConfig) {
        *self.config.write() = config;
        info!("Configuration updated");
    }

    /// Value applied from the environment for `key`, if any
    pub fn get_override(&self, key: &str) -> Option<serde_json::Value> {
        self.overrides.read().get(key).cloned()
    }

    /// Validate the current configuration and log warnings
    pub fn validate(&self) -> Result<Vec<String>> {
        let warnings = self.get_config().validate()?;
        for w in &warnings {
            warn!("Configuration warning: {}", w);
        }
        Ok(warnings)
    }

    /// Save the current configuration as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(&self.get_config())
            .map_err(|e| RiskError::InvalidConfig(format!("Failed to encode config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        info!("Configuration saved to: {}", path.as_ref().display());
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RiskError::InvalidConfig(format!("{key}: cannot parse '{raw}'")))
}
