//! Integration tests for the trainers
//!
//! Covers the eligibility gate boundaries, batch isolation, reproducible
//! fits and the hand-off to the predictor.

use chrono::NaiveDate;
use migraine_risk_core::{
    BundleMetrics, FailureReason, InMemoryLogStore, LogRecord, LogSource, PredictionPath,
    Predictor, RiskConfig, RiskError, Scope, TrainOutcome, UserId,
};
use migraine_risk_trainer::{BatchMode, RetrainAdvisor, RetrainDecision, RiskTrainer, UserJob};
use tempfile::{tempdir, TempDir};

fn day(n: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 1).unwrap() + chrono::Duration::days(n as i64)
}

/// `labelled` labelled rows (one extra trailing day), the first `positives` labels positive.
fn history(user: UserId, labelled: usize, positives: usize) -> Vec<LogRecord> {
    (0..=labelled)
        .map(|d| {
            let migraine = d >= 1 && d <= positives;
            let mut r = LogRecord::new(user, day(d), migraine);
            r.stress_level = if migraine { 5.0 } else { 1.0 + (d % 3) as f64 };
            r.sleep_hours = 5.0 + (d % 4) as f64;
            r.weather_pressure_hpa = Some(1005.0 + (d % 6) as f64);
            if migraine {
                r.migraine_intensity = Some(3 + (d % 5) as u8);
                r.migraine_duration_hours = Some(1.5 + (d % 3) as f64);
            }
            r
        })
        .collect()
}

/// Episodes follow stressful days with some noise.
fn population(users: std::ops::RangeInclusive<UserId>, days: usize) -> Vec<LogRecord> {
    let mut records = Vec::new();
    for user in users {
        for d in 0..days {
            let stress = ((d * 3 + user as usize) % 5 + 1) as f64;
            let migraine = d > 0 && (((d - 1) * 3 + user as usize) % 5 >= 3 || d % 11 == 0);
            let mut r = LogRecord::new(user, day(d), migraine);
            r.stress_level = stress;
            r.caffeine_mg = 80.0 + (d % 5) as f64 * 40.0;
            r.weather_humidity = Some(40.0 + (d % 7) as f64 * 5.0);
            if migraine {
                r.migraine_intensity = Some(2 + (d % 7) as u8);
                r.migraine_duration_hours = Some(2.0 + (d % 4) as f64);
            }
            records.push(r);
        }
    }
    records
}

fn setup() -> (TempDir, RiskTrainer) {
    let dir = tempdir().unwrap();
    let config = RiskConfig {
        model_dir: dir.path().to_path_buf(),
        max_iter: 400,
        ..RiskConfig::default()
    };
    (dir, RiskTrainer::new(config).unwrap())
}

fn store_of(records: Vec<LogRecord>) -> InMemoryLogStore {
    InMemoryLogStore::from_records(records).unwrap()
}

#[test]
fn gate_declines_short_history_with_counts() {
    let (_dir, trainer) = setup();
    let logs = store_of(history(1, 29, 6));

    let outcome = trainer.train_user_occurrence(&logs, 1).unwrap();
    assert_eq!(
        outcome,
        TrainOutcome::Declined {
            scope: Scope::User(1),
            reason: FailureReason::InsufficientUserHistory,
            n_days: Some(29),
            n_positives: Some(6),
        }
    );
    assert!(!trainer.store().exists(Scope::User(1)));
}

#[test]
fn gate_declines_too_few_positives() {
    let (_dir, trainer) = setup();
    let logs = store_of(history(1, 31, 4));

    let outcome = trainer.train_user_occurrence(&logs, 1).unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::InsufficientUserHistory));
    let json = outcome.to_json();
    assert_eq!(json["n_days"], 31);
    assert_eq!(json["n_positives"], 4);
}

#[test]
fn gate_trains_at_threshold() {
    let (dir, trainer) = setup();
    let logs = store_of(history(1, 31, 5));

    let outcome = trainer.train_user_occurrence(&logs, 1).unwrap();
    let TrainOutcome::Trained { metrics, path, .. } = outcome else {
        panic!("expected a trained outcome, got {outcome:?}");
    };
    assert_eq!(path, dir.path().join("users/1/occurrence/latest.json"));

    let BundleMetrics::Occurrence(m) = metrics else {
        panic!("expected occurrence metrics");
    };
    assert_eq!(m.user_id, Some(1));
    assert_eq!((m.n_samples, m.n_train, m.n_test), (31, 21, 10));
    assert_eq!(m.n_positives, 5);
    assert!(!m.calibrated);
    // All positives fall in the train split
    assert_eq!(m.auc, None);
    assert!(m.brier.is_some());

    let bundle = trainer.store().load_user(1).unwrap().unwrap();
    assert!(!bundle.model.is_calibrated());
}

#[test]
fn unknown_user_has_no_data() {
    let (_dir, trainer) = setup();
    let logs = store_of(history(1, 10, 2));
    let outcome = trainer.train_user_occurrence(&logs, 42).unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::NoData));
}

#[test]
fn global_training_reports_chronological_split() {
    let (_dir, trainer) = setup();
    let logs = store_of(population(1..=4, 30));

    let outcome = trainer.train_global_occurrence(&logs).unwrap();
    let TrainOutcome::Trained { metrics, .. } = outcome else {
        panic!("expected a trained outcome, got {outcome:?}");
    };
    let BundleMetrics::Occurrence(m) = metrics else {
        panic!("expected occurrence metrics");
    };
    assert_eq!(m.n_samples, 4 * 29);
    assert_eq!(m.n_train, 81);
    assert_eq!(m.n_test, 35);
    assert!(m.calibrated);
    assert_eq!(m.user_id, None);
    for p in [m.brier, m.logloss] {
        assert!(p.unwrap().is_finite());
    }

    let bundle = trainer.store().load_global().unwrap().unwrap();
    assert!(bundle.model.is_calibrated());
    assert_eq!(bundle.feature_columns, trainer.builder().feature_columns());
}

#[test]
fn empty_logs_decline_instead_of_failing() {
    let (_dir, trainer) = setup();
    let logs = InMemoryLogStore::new();

    let global = trainer.train_global_occurrence(&logs).unwrap();
    assert_eq!(global.reason(), Some(FailureReason::NoData));

    let severity = trainer.train_global_severity(&logs).unwrap();
    assert_eq!(severity.reason(), Some(FailureReason::NoSeverityData));
}

#[test]
fn severity_needs_episode_days() {
    let (_dir, trainer) = setup();
    let logs = store_of(history(1, 20, 0));
    let outcome = trainer.train_global_severity(&logs).unwrap();
    assert_eq!(outcome.reason(), Some(FailureReason::NoSeverityData));

    let logs = store_of(population(1..=3, 25));
    let outcome = trainer.train_global_severity(&logs).unwrap();
    let TrainOutcome::Trained { metrics, .. } = outcome else {
        panic!("expected a trained outcome, got {outcome:?}");
    };
    let BundleMetrics::Severity(m) = metrics else {
        panic!("expected severity metrics");
    };
    assert_eq!(m.n_train + m.n_test, m.n_samples);
    assert!(m.mae_intensity.unwrap() >= 0.0);
}

#[test]
fn training_is_reproducible() {
    let logs = store_of(population(1..=3, 30));
    let (_a, first) = setup();
    let (_b, second) = setup();
    first.train_global_occurrence(&logs).unwrap();
    second.train_global_occurrence(&logs).unwrap();

    let a = first.store().load_global().unwrap().unwrap();
    let b = second.store().load_global().unwrap().unwrap();
    assert_eq!(a.model, b.model);
    assert_eq!(a.metrics, b.metrics);
}

/// Log source that fails for one user.
struct FlakySource {
    inner: InMemoryLogStore,
    broken: UserId,
}

impl LogSource for FlakySource {
    fn records_for_user(&self, user_id: UserId) -> migraine_risk_core::Result<Vec<LogRecord>> {
        if user_id == self.broken {
            return Err(RiskError::LogSource(format!("user {user_id} unavailable")));
        }
        self.inner.records_for_user(user_id)
    }

    fn all_records(&self) -> migraine_risk_core::Result<Vec<LogRecord>> {
        self.inner.all_records()
    }

    fn user_ids(&self) -> migraine_risk_core::Result<Vec<UserId>> {
        self.inner.user_ids()
    }
}

#[test]
fn batch_isolates_declines_and_faults() {
    let (_dir, trainer) = setup();
    let mut records = history(1, 35, 8);
    records.extend(history(2, 12, 3));
    records.extend(history(3, 40, 9));
    let source = FlakySource {
        inner: store_of(records),
        broken: 3,
    };

    let batch = trainer.train_all_users(&source, BatchMode::All, Some(2)).unwrap();
    assert_eq!(batch.users.len(), 3);
    assert_eq!(batch.trained(), 1);

    let by_user = |id: UserId| {
        batch
            .users
            .iter()
            .find(|u| u.user_id == id)
            .map(|u| u.job.clone())
            .unwrap()
    };
    assert!(matches!(by_user(1), UserJob::Ran(o) if o.is_ok()));
    assert!(matches!(
        by_user(2),
        UserJob::Ran(o) if o.reason() == Some(FailureReason::InsufficientUserHistory)
    ));
    assert!(matches!(by_user(3), UserJob::Ran(TrainOutcome::Failed { ref code, .. }) if code == "log_source"));

    let json = batch.to_json();
    assert_eq!(json["ok"], true);
    assert_eq!(json["users"].as_array().unwrap().len(), 3);
}

#[test]
fn only_stale_mode_skips_fresh_and_ineligible_users() {
    let (_dir, trainer) = setup();
    let mut records = history(1, 35, 8);
    records.extend(history(2, 12, 3));
    let logs = store_of(records);

    trainer.train_all_users(&logs, BatchMode::All, None).unwrap();
    let rerun = trainer.train_all_users(&logs, BatchMode::OnlyStale, None).unwrap();
    assert_eq!(rerun.trained(), 0);
    for user in &rerun.users {
        assert!(matches!(user.job, UserJob::Skipped(_)));
    }

    // Ten more labelled days make user 1 stale
    let logs = store_of({
        let mut grown = history(1, 45, 8);
        grown.extend(history(2, 12, 3));
        grown
    });
    let advisor = RetrainAdvisor::new(&trainer);
    assert_eq!(
        advisor.user(&logs, 1).unwrap(),
        RetrainDecision::Stale {
            trained_rows: 35,
            current_rows: 45
        }
    );
    let rerun = trainer.train_all_users(&logs, BatchMode::OnlyStale, None).unwrap();
    assert_eq!(rerun.trained(), 1);
}

#[test]
fn advisor_tracks_global_growth() {
    let (_dir, trainer) = setup();
    let logs = store_of(population(1..=2, 20));
    let advisor = RetrainAdvisor::new(&trainer);
    assert_eq!(
        advisor.global(&logs).unwrap(),
        RetrainDecision::Missing { current_rows: 38 }
    );

    trainer.train_global_occurrence(&logs).unwrap();
    assert!(!advisor.global(&logs).unwrap().should_retrain());

    let grown = store_of(population(1..=4, 60));
    assert!(advisor.global(&grown).unwrap().should_retrain());
}

#[test]
fn trained_models_feed_the_predictor() {
    let (dir, trainer) = setup();
    let mut records = population(1..=3, 40);
    records.extend(history(9, 35, 8));
    let logs = store_of(records);

    assert!(trainer.train_global_occurrence(&logs).unwrap().is_ok());
    assert!(trainer.train_global_severity(&logs).unwrap().is_ok());

    let predictor = Predictor::new(RiskConfig {
        model_dir: dir.path().to_path_buf(),
        ..RiskConfig::default()
    })
    .unwrap();
    let before = predictor.predict_next_day_risk(&logs, 9, true).unwrap();
    assert_eq!(before.prediction().unwrap().used, PredictionPath::GlobalOnly);
    assert!(before.prediction().unwrap().expected_intensity.is_some());

    assert!(trainer.train_user_occurrence(&logs, 9).unwrap().is_ok());
    predictor.invalidate(Scope::User(9));
    let after = predictor.predict_next_day_risk(&logs, 9, true).unwrap();
    let p = after.prediction().unwrap();
    assert_eq!(p.used, PredictionPath::Blended);
    assert_eq!(p.n_user_rows, 35);
    let expected = p.blend_weight * p.p_user.unwrap() + (1.0 - p.blend_weight) * p.p_global;
    assert_eq!(p.p_final, expected);
}
