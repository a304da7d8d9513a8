//! Occurrence and severity trainers
//!
//! Every run rebuilds its dataset from the log source, splits it
//! chronologically, fits, evaluates on the held-out tail and replaces the
//! scope's artifact in the model store.

use crate::errors::Result as TrainerResult;
use crate::split::{global_split, user_split, SplitPlan};
use migraine_risk_core::metrics::{
    average_precision, brier_score, log_loss, mean_absolute_error, positive_rate, roc_auc,
};
use migraine_risk_core::{
    BundleMetrics, CalibratedPipeline, DatasetBuilder, FailureReason, FeatureRow, LogSource,
    ModelBundle, ModelStore, OccurrenceMetrics, OccurrenceModel, Pipeline, ProbabilityModel,
    Result, RiskConfig, Scope, SeverityMetrics, SolverParams, TrainOutcome, UserId,
};
use tracing::{debug, info, instrument};

/// Eligibility gate for a personal model.
pub fn is_eligible(n_days: usize, n_positives: usize, config: &RiskConfig) -> bool {
    n_days >= config.user_min_days && n_positives >= config.user_min_positives
}

/// Trains every scope against one model store.
#[derive(Debug, Clone)]
pub struct RiskTrainer {
    config: RiskConfig,
    builder: DatasetBuilder,
    store: ModelStore,
}

impl RiskTrainer {
    /// Validate the configuration and open the store at `config.model_dir`.
    pub fn new(config: RiskConfig) -> TrainerResult<Self> {
        let store = ModelStore::new(config.model_dir.clone());
        Self::with_store(config, store)
    }

    pub fn with_store(config: RiskConfig, store: ModelStore) -> TrainerResult<Self> {
        config.validate()?;
        Ok(Self {
            builder: DatasetBuilder::from_config(&config),
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

    pub fn builder(&self) -> &DatasetBuilder {
        &self.builder
    }

    fn solver(&self, l2: f64) -> SolverParams {
        SolverParams {
            l2,
            learning_rate: self.config.learning_rate,
            max_iter: self.config.max_iter,
            tolerance: self.config.tolerance,
        }
    }

    /// Population occurrence classifier, class-balanced and calibrated.
    #[instrument(skip(self, source))]
    pub fn train_global_occurrence(&self, source: &dyn LogSource) -> Result<TrainOutcome> {
        let dataset = self.builder.build_population(source)?;
        if dataset.is_empty() {
            info!("no population data");
            return Ok(TrainOutcome::declined(Scope::Global, FailureReason::NoData));
        }

        let plan = global_split(
            dataset.len(),
            self.config.global_test_fraction,
            self.config.global_small_threshold,
        );
        let columns = dataset.feature_columns.clone();
        let params = self.solver(self.config.global_l2);
        let (train_rows, train_labels) = (
            &dataset.features[plan.train.clone()],
            &dataset.occurrence_labels[plan.train.clone()],
        );
        debug!(n_train = plan.n_train(), n_test = plan.n_test(), "fitting global model");

        let calibrated = CalibratedPipeline::fit(
            train_rows,
            train_labels,
            self.config.calibration_folds,
            |rows, labels| Pipeline::fit_classifier(&columns, rows, labels, params, true),
        );
        let model = OccurrenceModel::Calibrated(calibrated);
        let metrics = self.occurrence_metrics(
            &model,
            &dataset.features,
            &dataset.occurrence_labels,
            &plan,
            None,
        );

        self.persist(Scope::Global, model, BundleMetrics::Occurrence(metrics), columns)
    }

    /// Population severity regressor on episode days.
    #[instrument(skip(self, source))]
    pub fn train_global_severity(&self, source: &dyn LogSource) -> Result<TrainOutcome> {
        let dataset = self.builder.build_population(source)?;
        let rows = &dataset.severity_features;
        if rows.is_empty() {
            info!("no severity data");
            return Ok(TrainOutcome::declined(
                Scope::GlobalSeverity,
                FailureReason::NoSeverityData,
            ));
        }

        let targets = &dataset.intensity_labels;
        let plan = global_split(
            rows.len(),
            self.config.global_test_fraction,
            self.config.global_small_threshold,
        );
        let columns = dataset.feature_columns.clone();
        let model = Pipeline::fit_regressor(
            &columns,
            &rows[plan.train.clone()],
            &targets[plan.train.clone()],
            self.solver(self.config.severity_l2),
            self.config.huber_epsilon,
        );

        let predictions: Vec<f64> = rows[plan.test.clone()].iter().map(|r| model.predict(r)).collect();
        let metrics = SeverityMetrics {
            n_samples: rows.len(),
            n_train: plan.n_train(),
            n_test: plan.n_test(),
            mae_intensity: mean_absolute_error(&targets[plan.test.clone()], &predictions),
            feature_schema_version: self.config.feature_schema_version.clone(),
            label_shift_days: self.config.label_shift_days,
        };

        self.persist(Scope::GlobalSeverity, model, BundleMetrics::Severity(metrics), columns)
    }

    /// Personal occurrence classifier, only past the eligibility gate.
    ///
    /// Uses stronger regularization than the population model and no
    /// calibration layer.
    #[instrument(skip(self, source))]
    pub fn train_user_occurrence(&self, source: &dyn LogSource, user_id: UserId) -> Result<TrainOutcome> {
        let scope = Scope::User(user_id);
        let dataset = self.builder.build_for_user(source, user_id)?;
        if dataset.is_empty() {
            return Ok(TrainOutcome::declined(scope, FailureReason::NoData));
        }

        let (n_days, n_positives) = (dataset.len(), dataset.positives());
        if !is_eligible(n_days, n_positives, &self.config) {
            info!(n_days, n_positives, "not enough history for a personal model");
            return Ok(TrainOutcome::Declined {
                scope,
                reason: FailureReason::InsufficientUserHistory,
                n_days: Some(n_days),
                n_positives: Some(n_positives),
            });
        }

        let plan = user_split(
            n_days,
            self.config.user_test_fraction,
            self.config.user_small_test_fraction,
            self.config.user_large_threshold,
        );
        let columns = dataset.feature_columns.clone();
        let pipeline = Pipeline::fit_classifier(
            &columns,
            &dataset.features[plan.train.clone()],
            &dataset.occurrence_labels[plan.train.clone()],
            self.solver(self.config.user_l2),
            false,
        );
        let model = OccurrenceModel::Raw(pipeline);
        let metrics = self.occurrence_metrics(
            &model,
            &dataset.features,
            &dataset.occurrence_labels,
            &plan,
            Some(user_id),
        );

        self.persist(scope, model, BundleMetrics::Occurrence(metrics), columns)
    }

    fn occurrence_metrics(
        &self,
        model: &OccurrenceModel,
        rows: &[FeatureRow],
        labels: &[bool],
        plan: &SplitPlan,
        user_id: Option<UserId>,
    ) -> OccurrenceMetrics {
        let test_labels = &labels[plan.test.clone()];
        let probs: Vec<f64> = rows[plan.test.clone()]
            .iter()
            .map(|r| model.predict_proba(r))
            .collect();

        OccurrenceMetrics {
            user_id,
            n_samples: rows.len(),
            n_train: plan.n_train(),
            n_test: plan.n_test(),
            n_positives: labels.iter().filter(|&&y| y).count(),
            pos_rate_train: positive_rate(&labels[plan.train.clone()]),
            pos_rate_test: positive_rate(test_labels),
            auc: roc_auc(test_labels, &probs),
            auprc: average_precision(test_labels, &probs),
            brier: brier_score(test_labels, &probs),
            logloss: log_loss(test_labels, &probs),
            calibrated: model.is_calibrated(),
            feature_schema_version: self.config.feature_schema_version.clone(),
            label_shift_days: self.config.label_shift_days,
        }
    }

    fn persist<M: serde::Serialize>(
        &self,
        scope: Scope,
        model: M,
        metrics: BundleMetrics,
        columns: Vec<String>,
    ) -> Result<TrainOutcome> {
        let bundle = ModelBundle::new(
            scope,
            model,
            metrics,
            columns,
            self.config.feature_schema_version.clone(),
        );
        let receipt = self.store.save(&bundle)?;
        info!(scope = %scope, n_samples = bundle.metrics.n_samples(), "model trained");
        Ok(TrainOutcome::Trained {
            scope,
            metrics: bundle.metrics,
            path: receipt.path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_requires_both_thresholds() {
        let config = RiskConfig::default();
        assert!(!is_eligible(29, 6, &config));
        assert!(!is_eligible(31, 4, &config));
        assert!(is_eligible(31, 5, &config));
        assert!(is_eligible(30, 5, &config));
    }
}
