//! Model bundles and their scopes

use crate::errors::{Result, RiskError};
use crate::metrics::{OccurrenceMetrics, SeverityMetrics};
use crate::model::{OccurrenceModel, SeverityModel};
use crate::records::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which population a bundle was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Global,
    GlobalSeverity,
    User(UserId),
}

impl Scope {
    /// Directory of the scope relative to the store base.
    pub fn relative_dir(&self) -> PathBuf {
        match self {
            Scope::Global => PathBuf::from("global").join("occurrence"),
            Scope::GlobalSeverity => PathBuf::from("global").join("severity"),
            Scope::User(id) => PathBuf::from("users").join(id.to_string()).join("occurrence"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::GlobalSeverity => write!(f, "global-severity"),
            Scope::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "global" => Ok(Scope::Global),
            "global-severity" => Ok(Scope::GlobalSeverity),
            other => other
                .strip_prefix("user:")
                .and_then(|id| id.parse().ok())
                .map(Scope::User)
                .ok_or_else(|| format!("unknown scope '{other}'")),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Evaluation attached to a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BundleMetrics {
    Occurrence(OccurrenceMetrics),
    Severity(SeverityMetrics),
}

impl BundleMetrics {
    pub fn n_samples(&self) -> usize {
        match self {
            BundleMetrics::Occurrence(m) => m.n_samples,
            BundleMetrics::Severity(m) => m.n_samples,
        }
    }
}

/// Immutable training artifact for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle<M> {
    pub scope: Scope,
    pub model: M,
    pub metrics: BundleMetrics,
    /// Feature columns, in fit-time order
    pub feature_columns: Vec<String>,
    pub feature_schema_version: String,
    pub trained_at: DateTime<Utc>,
}

pub type OccurrenceBundle = ModelBundle<OccurrenceModel>;
pub type SeverityBundle = ModelBundle<SeverityModel>;

impl<M> ModelBundle<M> {
    pub fn new(
        scope: Scope,
        model: M,
        metrics: BundleMetrics,
        feature_columns: Vec<String>,
        feature_schema_version: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            model,
            metrics,
            feature_columns,
            feature_schema_version: feature_schema_version.into(),
            trained_at: Utc::now(),
        }
    }

    /// Refuse to score rows laid out differently from the fit-time schema.
    pub fn check_schema(&self, schema_version: &str, columns: &[String]) -> Result<()> {
        if self.feature_schema_version != schema_version {
            return Err(RiskError::SchemaMismatch {
                scope: self.scope.to_string(),
                expected: schema_version.to_string(),
                actual: self.feature_schema_version.clone(),
            });
        }
        if self.feature_columns != columns {
            return Err(RiskError::SchemaMismatch {
                scope: self.scope.to_string(),
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", self.feature_columns.len()),
            });
        }
        Ok(())
    }
}
