//! Fitted pipelines and the occurrence-model wrapper
//!
//! A [`Pipeline`] is a fitted preprocessor followed by an estimator.
//! [`OccurrenceModel`] is either a raw pipeline (per-user models) or a
//! calibrated ensemble (the global model); both unwrap to a base pipeline.

use crate::calibration::CalibratedPipeline;
use crate::features::FeatureRow;
use crate::linear::{sigmoid, Estimator, HuberRegressor, LogisticRegression, SolverParams};
use crate::preprocess::{FittedPreprocessor, PreprocessorSpec};
use serde::{Deserialize, Serialize};

/// Preprocess, then score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline<E> {
    pub preprocessor: FittedPreprocessor,
    pub estimator: E,
}

impl<E: Estimator> Pipeline<E> {
    pub fn decision(&self, row: &FeatureRow) -> f64 {
        self.estimator.decision(&self.preprocessor.transform_row(row))
    }
}

impl Pipeline<LogisticRegression> {
    /// Fit preprocessing and a logistic classifier on the same rows.
    pub fn fit_classifier(
        columns: &[String],
        rows: &[FeatureRow],
        labels: &[bool],
        params: SolverParams,
        class_balanced: bool,
    ) -> Self {
        let preprocessor = PreprocessorSpec::from_columns(columns).fit(rows);
        let x = preprocessor.transform(rows);
        let estimator = LogisticRegression::fit(&x, labels, params, class_balanced);
        Self {
            preprocessor,
            estimator,
        }
    }

    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        sigmoid(self.decision(row))
    }
}

impl Pipeline<HuberRegressor> {
    /// Fit preprocessing and a Huber regressor on the same rows.
    pub fn fit_regressor(
        columns: &[String],
        rows: &[FeatureRow],
        targets: &[f64],
        params: SolverParams,
        epsilon: f64,
    ) -> Self {
        let preprocessor = PreprocessorSpec::from_columns(columns).fit(rows);
        let x = preprocessor.transform(rows);
        let estimator = HuberRegressor::fit(&x, targets, params, epsilon);
        Self {
            preprocessor,
            estimator,
        }
    }

    pub fn predict(&self, row: &FeatureRow) -> f64 {
        self.decision(row)
    }
}

/// Severity regressor pipeline
pub type SeverityModel = Pipeline<HuberRegressor>;

/// Anything that yields an occurrence probability for one feature row.
pub trait ProbabilityModel {
    fn predict_proba(&self, row: &FeatureRow) -> f64;
}

/// Linear attribution capability: a transform stage plus coefficients.
pub trait LinearAttributable {
    fn transform(&self, row: &FeatureRow) -> Vec<f64>;
    fn feature_names(&self) -> Vec<String>;
    fn coefficients(&self) -> &[f64];
}

/// Models that may expose [`LinearAttributable`].
pub trait Attributable {
    fn attribution(&self) -> Option<&dyn LinearAttributable>;
}

impl<E: Estimator> LinearAttributable for Pipeline<E> {
    fn transform(&self, row: &FeatureRow) -> Vec<f64> {
        self.preprocessor.transform_row(row)
    }

    fn feature_names(&self) -> Vec<String> {
        self.preprocessor.feature_names_out()
    }

    fn coefficients(&self) -> &[f64] {
        self.estimator.coefficients().unwrap_or(&[])
    }
}

impl<E: Estimator> Attributable for Pipeline<E> {
    fn attribution(&self) -> Option<&dyn LinearAttributable> {
        let coef = self.estimator.coefficients()?;
        (coef.len() == self.preprocessor.output_width()).then_some(self as &dyn LinearAttributable)
    }
}

/// Occurrence classifier, with or without a calibration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OccurrenceModel {
    Raw(Pipeline<LogisticRegression>),
    Calibrated(CalibratedPipeline),
}

impl OccurrenceModel {
    /// The fitted base pipeline beneath any calibration layer.
    pub fn unwrap_base(&self) -> Option<&Pipeline<LogisticRegression>> {
        match self {
            OccurrenceModel::Raw(pipeline) => Some(pipeline),
            OccurrenceModel::Calibrated(calibrated) => calibrated.base(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, OccurrenceModel::Calibrated(_))
    }
}

impl ProbabilityModel for OccurrenceModel {
    fn predict_proba(&self, row: &FeatureRow) -> f64 {
        match self {
            OccurrenceModel::Raw(pipeline) => pipeline.predict_proba(row),
            OccurrenceModel::Calibrated(calibrated) => calibrated.predict_proba(row),
        }
    }
}

impl Attributable for OccurrenceModel {
    fn attribution(&self) -> Option<&dyn LinearAttributable> {
        self.unwrap_base()?.attribution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rows() -> (Vec<String>, Vec<FeatureRow>, Vec<bool>) {
        let columns = vec!["stress_level".to_string(), "weekday".to_string()];
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let rows: Vec<FeatureRow> = (0..12)
            .map(|i| FeatureRow {
                user_id: 1,
                date: date + chrono::Duration::days(i),
                values: vec![Some((i % 5) as f64 + 1.0), Some((i % 7) as f64)],
            })
            .collect();
        let labels = rows.iter().map(|r| r.values[0] >= Some(4.0)).collect();
        (columns, rows, labels)
    }

    #[test]
    fn calibrated_model_unwraps_to_first_fold() {
        let (columns, rows, labels) = rows();
        let params = SolverParams::default();
        let calibrated = CalibratedPipeline::fit(&rows, &labels, 2, |r, y| {
            Pipeline::fit_classifier(&columns, r, y, params, true)
        });
        let expected = calibrated.folds[0].estimator.clone();
        let model = OccurrenceModel::Calibrated(calibrated);
        assert_eq!(model.unwrap_base(), Some(&expected));
        assert!(model.is_calibrated());

        let p = model.predict_proba(&rows[3]);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn raw_pipeline_exposes_attribution() {
        let (columns, rows, labels) = rows();
        let pipeline = Pipeline::fit_classifier(&columns, &rows, &labels, SolverParams::default(), false);
        let model = OccurrenceModel::Raw(pipeline);
        let attribution = model.attribution().unwrap();
        assert_eq!(attribution.coefficients().len(), attribution.feature_names().len());
        assert_eq!(attribution.transform(&rows[0]).len(), attribution.coefficients().len());
    }

    #[test]
    fn occurrence_model_serde_is_tagged() {
        let (columns, rows, labels) = rows();
        let pipeline = Pipeline::fit_classifier(&columns, &rows, &labels, SolverParams::default(), false);
        let json = serde_json::to_value(OccurrenceModel::Raw(pipeline.clone())).unwrap();
        assert_eq!(json["kind"], "raw");
        let back: OccurrenceModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, OccurrenceModel::Raw(pipeline));
    }
}
