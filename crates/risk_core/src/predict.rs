//! Next-day risk prediction and global/user blending

use crate::bundle::{OccurrenceBundle, Scope, SeverityBundle};
use crate::cache::BundleCache;
use crate::config::RiskConfig;
use crate::errors::Result;
use crate::explain::explain;
use crate::features::DatasetBuilder;
use crate::model::ProbabilityModel;
use crate::outcome::{FailureReason, PredictOutcome, Prediction, PredictionPath};
use crate::records::{LogSource, UserId};
use crate::store::ModelStore;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Upper bound of the intensity scale
const MAX_INTENSITY: f64 = 10.0;

/// Trust in the personal model after `n` labelled rows: `n / (n + n0)`.
pub fn blend_weight(n: usize, n0: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    (n / (n + n0.max(0.0))).clamp(0.0, 1.0)
}

/// Keep a probability inside `[eps, 1 - eps]`, with `eps` itself held to `[0, 0.5]`.
pub fn clip_probability(p: f64, eps: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    let eps = if eps.is_nan() { 0.0 } else { eps.clamp(0.0, 0.5) };
    p.clamp(eps, 1.0 - eps)
}

/// Serves predictions from stored bundles.
///
/// Bundles are read through a bounded cache. Retraining in the same
/// process should call [`Predictor::invalidate`] for the retrained scope;
/// otherwise the cached bundle keeps being served until it is evicted.
#[derive(Debug)]
pub struct Predictor {
    config: RiskConfig,
    builder: DatasetBuilder,
    store: ModelStore,
    cache: BundleCache,
}

impl Predictor {
    /// Validate the configuration and read bundles from `config.model_dir`.
    pub fn new(config: RiskConfig) -> Result<Self> {
        let store = ModelStore::new(config.model_dir.clone());
        Self::with_store(config, store)
    }

    pub fn with_store(config: RiskConfig, store: ModelStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            builder: DatasetBuilder::from_config(&config),
            cache: BundleCache::new(config.user_cache_capacity),
            config,
            store,
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn cache(&self) -> &BundleCache {
        &self.cache
    }

    /// Forget the cached bundle for a scope so the next request reloads it.
    pub fn invalidate(&self, scope: Scope) {
        self.cache.invalidate(scope);
    }

    fn global_bundle(&self) -> Result<Option<Arc<OccurrenceBundle>>> {
        if let Some(bundle) = self.cache.global() {
            return Ok(Some(bundle));
        }
        Ok(self.store.load_global()?.map(|bundle| {
            let bundle = Arc::new(bundle);
            self.cache.put_global(Arc::clone(&bundle));
            bundle
        }))
    }

    fn severity_bundle(&self) -> Result<Option<Arc<SeverityBundle>>> {
        if let Some(bundle) = self.cache.severity() {
            return Ok(Some(bundle));
        }
        Ok(self.store.load_severity()?.map(|bundle| {
            let bundle = Arc::new(bundle);
            self.cache.put_severity(Arc::clone(&bundle));
            bundle
        }))
    }

    fn user_bundle(&self, user_id: UserId) -> Result<Option<Arc<OccurrenceBundle>>> {
        if let Some(bundle) = self.cache.user(user_id) {
            return Ok(Some(bundle));
        }
        Ok(self.store.load_user(user_id)?.map(|bundle| {
            let bundle = Arc::new(bundle);
            self.cache.put_user(user_id, Arc::clone(&bundle));
            bundle
        }))
    }

    /// Risk of an episode on the day after the user's latest log.
    ///
    /// Declines with `model_not_trained` when no global bundle exists and
    /// with `no_data` when the user has no records. Storage faults and
    /// schema mismatches are errors.
    #[instrument(skip(self, source))]
    pub fn predict_next_day_risk(
        &self,
        source: &dyn LogSource,
        user_id: UserId,
        with_explain: bool,
    ) -> Result<PredictOutcome> {
        let Some(global) = self.global_bundle()? else {
            info!("global model not trained yet");
            return Ok(PredictOutcome::Declined {
                reason: FailureReason::ModelNotTrained,
            });
        };

        let dataset = self.builder.build_for_user(source, user_id)?;
        let Some(row) = dataset.latest_row(user_id) else {
            return Ok(PredictOutcome::Declined {
                reason: FailureReason::NoData,
            });
        };

        let columns = self.builder.feature_columns();
        let version = self.config.feature_schema_version.as_str();
        global.check_schema(version, &columns)?;

        let eps = self.config.prob_clip;
        let p_global = clip_probability(global.model.predict_proba(row), eps);

        // Severity is supplementary: a stale severity bundle drops the estimate only.
        let expected_intensity = match self.severity_bundle()? {
            Some(severity) => match severity.check_schema(version, &columns) {
                Ok(()) => Some(severity.model.predict(row).clamp(0.0, MAX_INTENSITY)),
                Err(err) => {
                    warn!(error = %err, "severity bundle skipped");
                    None
                }
            },
            None => None,
        };

        let n_user_rows = dataset.len();
        let top_k = self.config.explain_top_k;

        let prediction = match self.user_bundle(user_id)? {
            None => Prediction {
                user_id,
                as_of: row.date,
                p_global,
                p_user: None,
                p_final: p_global,
                blend_weight: 0.0,
                n_user_rows,
                explain: with_explain.then(|| explain(&global.model, row, top_k)),
                used: PredictionPath::GlobalOnly,
                expected_intensity,
            },
            Some(user) => {
                user.check_schema(version, &columns)?;
                let p_user = clip_probability(user.model.predict_proba(row), eps);
                let weight = blend_weight(n_user_rows, self.config.blend_n0);
                Prediction {
                    user_id,
                    as_of: row.date,
                    p_global,
                    p_user: Some(p_user),
                    p_final: weight * p_user + (1.0 - weight) * p_global,
                    blend_weight: weight,
                    n_user_rows,
                    explain: with_explain.then(|| explain(&user.model, row, top_k)),
                    used: PredictionPath::Blended,
                    expected_intensity,
                }
            }
        };

        debug!(
            p_global = prediction.p_global,
            p_final = prediction.p_final,
            weight = prediction.blend_weight,
            used = ?prediction.used,
            "prediction computed"
        );
        Ok(PredictOutcome::Predicted(prediction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_weight_anchor_points() {
        assert_eq!(blend_weight(0, 120.0), 0.0);
        assert_eq!(blend_weight(120, 120.0), 0.5);
        assert!(blend_weight(1_000_000, 120.0) < 1.0);
        assert!(blend_weight(30, 120.0) < blend_weight(31, 120.0));
    }

    #[test]
    fn clip_bounds_extremes() {
        assert_eq!(clip_probability(0.0, 1e-4), 1e-4);
        assert_eq!(clip_probability(1.0, 1e-4), 1.0 - 1e-4);
        assert_eq!(clip_probability(0.42, 1e-4), 0.42);
        assert_eq!(clip_probability(f64::NAN, 1e-4), 0.5);
    }

    #[test]
    fn clip_tolerates_out_of_range_eps() {
        assert_eq!(clip_probability(0.9, 0.6), 0.5);
        assert_eq!(clip_probability(0.1, 0.6), 0.5);
        assert_eq!(clip_probability(1.2, -1.0), 1.0);
        assert_eq!(clip_probability(0.3, f64::NAN), 0.3);
    }
}
