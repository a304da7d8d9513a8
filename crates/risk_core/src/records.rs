//! Daily log records and the upstream log-source seam
//!
//! The store behind [`LogSource`] is external; [`InMemoryLogStore`] is the
//! reference implementation used by the CLI and the tests.

use crate::errors::{Result, RiskError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Numeric identifier of a tracked user
pub type UserId = u64;

/// One observation per (user, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub user_id: UserId,
    pub date: NaiveDate,

    pub sleep_hours: f64,
    pub physical_activity_minutes: f64,
    #[serde(default)]
    pub physical_activity_difficulty: f64,
    pub stress_level: f64,
    pub caffeine_mg: f64,
    #[serde(default)]
    pub heavy_meals: f64,
    #[serde(default)]
    pub hydration_liters: f64,
    #[serde(default)]
    pub alcohol_consumption: f64,
    #[serde(default)]
    pub menstruation: bool,

    /// Weather snapshot captured when the log was written
    #[serde(default)]
    pub weather_temp_c: Option<f64>,
    #[serde(default)]
    pub weather_humidity: Option<f64>,
    #[serde(default)]
    pub weather_pressure_hpa: Option<f64>,

    #[serde(default)]
    pub had_migraine: bool,
    #[serde(default)]
    pub migraine_intensity: Option<u8>,
    #[serde(default)]
    pub migraine_duration_hours: Option<f64>,

    #[serde(default)]
    pub meds_taken: String,
    #[serde(default)]
    pub notes: String,
}

impl LogRecord {
    /// Record with the given outcome and mid-range lifestyle values.
    pub fn new(user_id: UserId, date: NaiveDate, had_migraine: bool) -> Self {
        Self {
            user_id,
            date,
            sleep_hours: 7.0,
            physical_activity_minutes: 30.0,
            physical_activity_difficulty: 0.0,
            stress_level: 3.0,
            caffeine_mg: 100.0,
            heavy_meals: 0.0,
            hydration_liters: 1.5,
            alcohol_consumption: 0.0,
            menstruation: false,
            weather_temp_c: None,
            weather_humidity: None,
            weather_pressure_hpa: None,
            had_migraine,
            migraine_intensity: None,
            migraine_duration_hours: None,
            meds_taken: String::new(),
            notes: String::new(),
        }
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, f64, f64, f64); 8] = [
            ("sleep_hours", self.sleep_hours, 0.0, 24.0),
            (
                "physical_activity_minutes",
                self.physical_activity_minutes,
                0.0,
                1440.0,
            ),
            (
                "physical_activity_difficulty",
                self.physical_activity_difficulty,
                0.0,
                5.0,
            ),
            ("stress_level", self.stress_level, 1.0, 5.0),
            ("caffeine_mg", self.caffeine_mg, 0.0, 3000.0),
            ("heavy_meals", self.heavy_meals, 0.0, 5.0),
            ("hydration_liters", self.hydration_liters, 0.0, 20.0),
            ("alcohol_consumption", self.alcohol_consumption, 0.0, 5.0),
        ];
        for (field, value, lo, hi) in checks {
            if !(value >= lo && value <= hi) {
                return Err(self.invalid(format!("{field}={value} outside [{lo}, {hi}]")));
            }
        }
        if let Some(intensity) = self.migraine_intensity {
            if intensity > 10 {
                return Err(self.invalid(format!("migraine_intensity={intensity} outside [0, 10]")));
            }
        }
        if let Some(hours) = self.migraine_duration_hours {
            if !(0.0..=72.0).contains(&hours) {
                return Err(self.invalid(format!(
                    "migraine_duration_hours={hours} outside [0, 72]"
                )));
            }
        }
        Ok(())
    }

    /// Episode-only fields are meaningless without an episode; clear them.
    pub fn normalized(mut self) -> Self {
        if !self.had_migraine {
            self.migraine_intensity = None;
            self.migraine_duration_hours = None;
            self.meds_taken.clear();
        }
        self
    }

    fn invalid(&self, detail: String) -> RiskError {
        RiskError::InvalidRecord(format!("user {} on {}: {}", self.user_id, self.date, detail))
    }
}

/// Upstream time-series store.
///
/// Implementations must return records ordered by date ascending, at most
/// one per (user, date).
pub trait LogSource: Send + Sync {
    /// All records for one user
    fn records_for_user(&self, user_id: UserId) -> Result<Vec<LogRecord>>;

    /// All records for every user, ordered by (user_id, date)
    fn all_records(&self) -> Result<Vec<LogRecord>>;

    /// Every user that has at least one record
    fn user_ids(&self) -> Result<Vec<UserId>>;
}

/// Ordered in-memory log store keyed by (user, date).
#[derive(Debug, Default, Clone)]
pub struct InMemoryLogStore {
    users: BTreeMap<UserId, BTreeMap<NaiveDate, LogRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated record; a second record for the same day is rejected.
    pub fn insert(&mut self, record: LogRecord) -> Result<()> {
        record.validate()?;
        let days = self.users.entry(record.user_id).or_default();
        if days.contains_key(&record.date) {
            return Err(RiskError::InvalidRecord(format!(
                "duplicate record for user {} on {}",
                record.user_id, record.date
            )));
        }
        days.insert(record.date, record.normalized());
        Ok(())
    }

    /// Replace (or create) the record for its (user, date).
    pub fn upsert(&mut self, record: LogRecord) -> Result<()> {
        record.validate()?;
        self.users
            .entry(record.user_id)
            .or_default()
            .insert(record.date, record.normalized());
        Ok(())
    }

    /// Build a store from an iterator of records.
    pub fn from_records<I: IntoIterator<Item = LogRecord>>(records: I) -> Result<Self> {
        let mut store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    /// Load a JSON array export of log records.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<LogRecord> = serde_json::from_str(&content)?;
        Self::from_records(records)
    }

    /// Total number of records across users.
    pub fn len(&self) -> usize {
        self.users.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl LogSource for InMemoryLogStore {
    fn records_for_user(&self, user_id: UserId) -> Result<Vec<LogRecord>> {
        Ok(self
            .users
            .get(&user_id)
            .map(|days| days.values().cloned().collect())
            .unwrap_or_default())
    }

    fn all_records(&self) -> Result<Vec<LogRecord>> {
        Ok(self
            .users
            .values()
            .flat_map(|days| days.values().cloned())
            .collect())
    }

    fn user_ids(&self) -> Result<Vec<UserId>> {
        Ok(self.users.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn rejects_out_of_range_stress() {
        let mut record = LogRecord::new(1, day(1), false);
        record.stress_level = 0.0;
        assert!(matches!(record.validate(), Err(RiskError::InvalidRecord(_))));
    }

    #[test]
    fn rejects_intensity_above_ten() {
        let mut record = LogRecord::new(1, day(1), true);
        record.migraine_intensity = Some(11);
        assert!(record.validate().is_err());
    }

    #[test]
    fn normalization_clears_episode_fields() {
        let mut record = LogRecord::new(1, day(1), false);
        record.migraine_intensity = Some(4);
        record.migraine_duration_hours = Some(3.0);
        record.meds_taken = "ibuprofen".into();
        let record = record.normalized();
        assert_eq!(record.migraine_intensity, None);
        assert_eq!(record.migraine_duration_hours, None);
        assert!(record.meds_taken.is_empty());
    }

    #[test]
    fn store_orders_by_date_and_rejects_duplicates() {
        let mut store = InMemoryLogStore::new();
        store.insert(LogRecord::new(7, day(3), false)).unwrap();
        store.insert(LogRecord::new(7, day(1), true)).unwrap();
        store.insert(LogRecord::new(2, day(2), false)).unwrap();
        assert!(store.insert(LogRecord::new(7, day(1), false)).is_err());

        let dates: Vec<_> = store
            .records_for_user(7)
            .unwrap()
            .iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec![day(1), day(3)]);
        assert_eq!(store.user_ids().unwrap(), vec![2, 7]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn unknown_user_has_no_records() {
        let store = InMemoryLogStore::new();
        assert!(store.records_for_user(99).unwrap().is_empty());
    }

    #[test]
    fn parses_json_export_with_defaults() {
        let json = r#"[{"user_id":1,"date":"2024-03-01","sleep_hours":6.5,
            "physical_activity_minutes":20,"stress_level":4,"caffeine_mg":200,
            "had_migraine":true,"migraine_intensity":6,"migraine_duration_hours":5.5}]"#;
        let records: Vec<LogRecord> = serde_json::from_str(json).unwrap();
        let store = InMemoryLogStore::from_records(records).unwrap();
        let got = store.records_for_user(1).unwrap();
        assert_eq!(got[0].migraine_intensity, Some(6));
        assert_eq!(got[0].weather_pressure_hpa, None);
        assert_eq!(got[0].hydration_liters, 0.0);
    }
}
