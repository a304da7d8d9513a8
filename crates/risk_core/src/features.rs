//! Leakage-free feature derivation and labelled dataset construction
//!
//! Per user, records are sorted by date and turned into one feature row per
//! day. Lags, deltas and rolling aggregates attached to day `t` only read
//! records strictly before `t`; the day's own outcome never enters its row.
//! Labels are the outcome `label_shift_days` records later.

use crate::config::RiskConfig;
use crate::errors::Result;
use crate::records::{LogRecord, LogSource, UserId};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Calendar columns, treated as categorical by the preprocessor
pub const CALENDAR_COLUMNS: [&str; 2] = ["weekday", "month"];

/// Per-record measurement that can feed a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    SleepHours,
    ActivityMinutes,
    ActivityDifficulty,
    StressLevel,
    CaffeineMg,
    HeavyMeals,
    HydrationLiters,
    AlcoholConsumption,
    TemperatureC,
    Humidity,
    PressureHpa,
    Menstruation,
    HadMigraine,
}

impl Measure {
    pub fn name(self) -> &'static str {
        match self {
            Measure::SleepHours => "sleep_hours",
            Measure::ActivityMinutes => "physical_activity_minutes",
            Measure::ActivityDifficulty => "physical_activity_difficulty",
            Measure::StressLevel => "stress_level",
            Measure::CaffeineMg => "caffeine_mg",
            Measure::HeavyMeals => "heavy_meals",
            Measure::HydrationLiters => "hydration_liters",
            Measure::AlcoholConsumption => "alcohol_consumption",
            Measure::TemperatureC => "weather_temp_c",
            Measure::Humidity => "weather_humidity",
            Measure::PressureHpa => "weather_pressure_hpa",
            Measure::Menstruation => "menstruation",
            Measure::HadMigraine => "had_migraine",
        }
    }

    pub fn value(self, record: &LogRecord) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Measure::SleepHours => Some(record.sleep_hours),
            Measure::ActivityMinutes => Some(record.physical_activity_minutes),
            Measure::ActivityDifficulty => Some(record.physical_activity_difficulty),
            Measure::StressLevel => Some(record.stress_level),
            Measure::CaffeineMg => Some(record.caffeine_mg),
            Measure::HeavyMeals => Some(record.heavy_meals),
            Measure::HydrationLiters => Some(record.hydration_liters),
            Measure::AlcoholConsumption => Some(record.alcohol_consumption),
            Measure::TemperatureC => record.weather_temp_c,
            Measure::Humidity => record.weather_humidity,
            Measure::PressureHpa => record.weather_pressure_hpa,
            Measure::Menstruation => Some(flag(record.menstruation)),
            Measure::HadMigraine => Some(flag(record.had_migraine)),
        }
    }
}

/// Same-day measurements used as-is
const SAME_DAY: [Measure; 12] = [
    Measure::SleepHours,
    Measure::ActivityMinutes,
    Measure::ActivityDifficulty,
    Measure::StressLevel,
    Measure::CaffeineMg,
    Measure::HeavyMeals,
    Measure::HydrationLiters,
    Measure::AlcoholConsumption,
    Measure::TemperatureC,
    Measure::Humidity,
    Measure::PressureHpa,
    Measure::Menstruation,
];

const LAGGED: [Measure; 9] = [
    Measure::HadMigraine,
    Measure::SleepHours,
    Measure::StressLevel,
    Measure::CaffeineMg,
    Measure::HydrationLiters,
    Measure::AlcoholConsumption,
    Measure::PressureHpa,
    Measure::TemperatureC,
    Measure::Humidity,
];

const DELTAS: [Measure; 3] = [Measure::PressureHpa, Measure::TemperatureC, Measure::Humidity];

const ROLLING_MEANS: [Measure; 6] = [
    Measure::SleepHours,
    Measure::StressLevel,
    Measure::CaffeineMg,
    Measure::HydrationLiters,
    Measure::AlcoholConsumption,
    Measure::HeavyMeals,
];

/// Ordered feature-column names for the given rolling windows.
pub fn feature_columns(roll_windows: &[usize]) -> Vec<String> {
    let mut columns: Vec<String> = SAME_DAY.iter().map(|m| m.name().to_string()).collect();
    columns.extend(CALENDAR_COLUMNS.iter().map(|c| c.to_string()));
    columns.extend(LAGGED.iter().map(|m| format!("{}_lag1", m.name())));
    columns.extend(DELTAS.iter().map(|m| format!("{}_delta1", m.name())));
    for w in roll_windows {
        columns.extend(ROLLING_MEANS.iter().map(|m| format!("{}_roll_mean_{w}", m.name())));
        columns.push(format!("migraine_roll_sum_{w}"));
    }
    columns
}

/// Feature values for one (user, date), aligned to the dataset's columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// A feature row joined to its shifted outcome labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRow {
    pub features: FeatureRow,
    pub occurred: bool,
    pub intensity: Option<f64>,
    pub duration: Option<f64>,
}

/// Output of the dataset builder.
#[derive(Debug, Clone, Default)]
pub struct BuiltDataset {
    pub feature_columns: Vec<String>,
    /// Occurrence dataset: every row with a known label
    pub features: Vec<FeatureRow>,
    pub occurrence_labels: Vec<bool>,
    /// Severity dataset: positive rows with intensity and duration present
    pub severity_features: Vec<FeatureRow>,
    pub intensity_labels: Vec<f64>,
    pub duration_labels: Vec<f64>,
    /// Most recent feature row per user, labelled or not
    latest: BTreeMap<UserId, FeatureRow>,
}

impl BuiltDataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.occurrence_labels.iter().filter(|&&y| y).count()
    }

    /// Features of the user's latest known day.
    pub fn latest_row(&self, user_id: UserId) -> Option<&FeatureRow> {
        self.latest.get(&user_id)
    }
}

/// Builds feature tables and labels from ordered log histories.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    label_shift_days: usize,
    roll_windows: Vec<usize>,
}

impl DatasetBuilder {
    pub fn new(label_shift_days: usize, roll_windows: Vec<usize>) -> Self {
        Self {
            label_shift_days,
            roll_windows,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.label_shift_days, config.roll_windows.clone())
    }

    pub fn feature_columns(&self) -> Vec<String> {
        feature_columns(&self.roll_windows)
    }

    /// Dataset for a single user.
    #[instrument(skip(self, source))]
    pub fn build_for_user(&self, source: &dyn LogSource, user_id: UserId) -> Result<BuiltDataset> {
        let records = source.records_for_user(user_id)?;
        Ok(self.build(records))
    }

    /// Population dataset across all users.
    #[instrument(skip(self, source))]
    pub fn build_population(&self, source: &dyn LogSource) -> Result<BuiltDataset> {
        let records = source.all_records()?;
        Ok(self.build(records))
    }

    /// Build from raw records of one or many users, in any order.
    ///
    /// Each user is processed independently. The concatenated rows are
    /// ordered by (date, user) so that a trailing split is chronological.
    pub fn build(&self, records: Vec<LogRecord>) -> BuiltDataset {
        if records.is_empty() {
            return BuiltDataset::default();
        }

        let mut by_user: BTreeMap<UserId, Vec<LogRecord>> = BTreeMap::new();
        for record in records {
            by_user.entry(record.user_id).or_default().push(record);
        }

        let mut labeled = Vec::new();
        let mut latest = BTreeMap::new();
        for (user_id, mut history) in by_user {
            history.sort_by_key(|r| r.date);
            let rows = self.derive_features(&history);
            if let Some(last) = rows.last() {
                latest.insert(user_id, last.clone());
            }
            labeled.extend(self.attach_labels(rows, &history));
        }
        labeled.sort_by_key(|row| (row.features.date, row.features.user_id));

        let mut dataset = BuiltDataset {
            feature_columns: self.feature_columns(),
            latest,
            ..BuiltDataset::default()
        };
        for row in labeled {
            if row.occurred {
                if let (Some(intensity), Some(duration)) = (row.intensity, row.duration) {
                    dataset.severity_features.push(row.features.clone());
                    dataset.intensity_labels.push(intensity);
                    dataset.duration_labels.push(duration);
                }
            }
            dataset.occurrence_labels.push(row.occurred);
            dataset.features.push(row.features);
        }

        debug!(
            rows = dataset.len(),
            positives = dataset.positives(),
            severity_rows = dataset.severity_features.len(),
            "dataset built"
        );
        dataset
    }

    /// One feature row per record of a single user's date-sorted history.
    pub fn derive_features(&self, history: &[LogRecord]) -> Vec<FeatureRow> {
        let width = feature_columns(&self.roll_windows).len();
        let mut rows = Vec::with_capacity(history.len());

        for (i, record) in history.iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| &history[p]);
            let mut values = Vec::with_capacity(width);

            values.extend(SAME_DAY.iter().map(|m| m.value(record)));
            values.push(Some(record.date.weekday().num_days_from_monday() as f64));
            values.push(Some(record.date.month() as f64));

            values.extend(LAGGED.iter().map(|m| previous.and_then(|p| m.value(p))));

            for m in DELTAS {
                let delta = match (m.value(record), previous.and_then(|p| m.value(p))) {
                    (Some(today), Some(yesterday)) => Some(today - yesterday),
                    _ => None,
                };
                values.push(delta);
            }

            for &w in &self.roll_windows {
                // Lagged series over the trailing w positions = raw records [i-w, i)
                let prior = &history[i.saturating_sub(w)..i];
                for m in ROLLING_MEANS {
                    values.push(mean(prior.iter().filter_map(|r| m.value(r))));
                }
                values.push(sum(prior.iter().filter_map(|r| Measure::HadMigraine.value(r))));
            }

            rows.push(FeatureRow {
                user_id: record.user_id,
                date: record.date,
                values,
            });
        }
        rows
    }

    fn attach_labels(&self, rows: Vec<FeatureRow>, history: &[LogRecord]) -> Vec<LabeledRow> {
        let shift = self.label_shift_days;
        rows.into_iter()
            .enumerate()
            .filter_map(|(i, features)| {
                let target = history.get(i + shift)?;
                Some(LabeledRow {
                    features,
                    occurred: target.had_migraine,
                    intensity: target.migraine_intensity.map(f64::from),
                    duration: target.migraine_duration_hours,
                })
            })
            .collect()
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (total, count) = values.fold((0.0, 0usize), |(t, c), v| (t + v, c + 1));
    (count > 0).then(|| total / count as f64)
}

fn sum<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (total, count) = values.fold((0.0, 0usize), |(t, c), v| (t + v, c + 1));
    (count > 0).then_some(total)
}
