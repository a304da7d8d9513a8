//! Preprocessing pipeline factory
//!
//! Numeric columns: median imputation, then standardization.
//! Calendar columns: most-frequent imputation, then one-hot encoding where
//! categories unseen at fit time encode to all zeros.
//!
//! A [`PreprocessorSpec`] is a pure function of the feature-column list, so the same
//! transform layout is reconstructed at training and inference time.

use crate::features::{FeatureRow, CALENDAR_COLUMNS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column partition derived from a feature-column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessorSpec {
    input_columns: Vec<String>,
    numeric: Vec<usize>,
    categorical: Vec<usize>,
}

impl PreprocessorSpec {
    pub fn from_columns(columns: &[String]) -> Self {
        let (categorical, numeric): (Vec<usize>, Vec<usize>) = (0..columns.len())
            .partition(|&i| CALENDAR_COLUMNS.contains(&columns[i].as_str()));
        Self {
            input_columns: columns.to_vec(),
            numeric,
            categorical,
        }
    }

    /// Learn imputation, scaling and category statistics.
    pub fn fit(&self, rows: &[FeatureRow]) -> FittedPreprocessor {
        let numeric = self
            .numeric
            .iter()
            .map(|&index| {
                let observed: Vec<f64> = column(rows, index).collect();
                let fill = median(&observed).unwrap_or(0.0);
                let imputed: Vec<f64> = rows
                    .iter()
                    .map(|r| cell(r, index).unwrap_or(fill))
                    .collect();
                let (mean, scale) = mean_and_scale(&imputed);
                NumericColumn {
                    index,
                    name: self.input_columns[index].clone(),
                    fill,
                    mean,
                    scale,
                }
            })
            .collect();

        let categorical = self
            .categorical
            .iter()
            .map(|&index| {
                let observed: Vec<i64> = column(rows, index).map(|v| v.round() as i64).collect();
                let fill = most_frequent(&observed).unwrap_or(0);
                let mut categories: Vec<i64> = rows
                    .iter()
                    .map(|r| cell(r, index).map(|v| v.round() as i64).unwrap_or(fill))
                    .collect();
                categories.sort_unstable();
                categories.dedup();
                CategoricalColumn {
                    index,
                    name: self.input_columns[index].clone(),
                    fill,
                    categories,
                }
            })
            .collect();

        FittedPreprocessor {
            input_columns: self.input_columns.clone(),
            numeric,
            categorical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NumericColumn {
    index: usize,
    name: String,
    fill: f64,
    mean: f64,
    scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoricalColumn {
    index: usize,
    name: String,
    fill: i64,
    categories: Vec<i64>,
}

/// Fitted transform: numeric block first, then one-hot blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    input_columns: Vec<String>,
    numeric: Vec<NumericColumn>,
    categorical: Vec<CategoricalColumn>,
}

impl FittedPreprocessor {
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    /// Width of the transformed vector.
    pub fn output_width(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.categories.len()).sum::<usize>()
    }

    /// Transformed feature names, aligned with [`Self::transform_row`].
    pub fn feature_names_out(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|c| c.name.clone()).collect();
        for c in &self.categorical {
            names.extend(c.categories.iter().map(|v| format!("{}_{}", c.name, v)));
        }
        names
    }

    pub fn transform_row(&self, row: &FeatureRow) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.output_width());
        for c in &self.numeric {
            let v = cell(row, c.index).unwrap_or(c.fill);
            out.push((v - c.mean) / c.scale);
        }
        for c in &self.categorical {
            let v = cell(row, c.index).map(|v| v.round() as i64).unwrap_or(c.fill);
            out.extend(c.categories.iter().map(|&k| if k == v { 1.0 } else { 0.0 }));
        }
        out
    }

    pub fn transform(&self, rows: &[FeatureRow]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

fn cell(row: &FeatureRow, index: usize) -> Option<f64> {
    row.values
        .get(index)
        .copied()
        .flatten()
        .filter(|v| v.is_finite())
}

fn column(rows: &[FeatureRow], index: usize) -> impl Iterator<Item = f64> + '_ {
    rows.iter().filter_map(move |r| cell(r, index))
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let len = sorted.len();
    Some(if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    })
}

/// Ties resolve to the smallest category.
fn most_frequent(values: &[i64]) -> Option<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &v in values {
        *counts.entry(v).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(i64, usize)>, (v, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((v, n)),
        })
        .map(|(v, _)| v)
}

/// Population mean and standard deviation; constant columns scale by 1.
fn mean_and_scale(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    (mean, if std > 1e-12 { std } else { 1.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(values: Vec<Option<f64>>) -> FeatureRow {
        FeatureRow {
            user_id: 1,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            values,
        }
    }

    fn columns() -> Vec<String> {
        vec!["sleep_hours".into(), "weekday".into(), "caffeine_mg".into()]
    }

    #[test]
    fn partitions_calendar_columns() {
        let spec = PreprocessorSpec::from_columns(&columns());
        assert_eq!(spec.numeric, vec![0, 2]);
        assert_eq!(spec.categorical, vec![1]);
        assert_eq!(spec, PreprocessorSpec::from_columns(&columns()));
    }

    #[test]
    fn imputes_median_and_standardizes() {
        let rows = vec![
            row(vec![Some(4.0), Some(0.0), Some(100.0)]),
            row(vec![None, Some(1.0), Some(100.0)]),
            row(vec![Some(8.0), Some(1.0), Some(100.0)]),
        ];
        let fitted = PreprocessorSpec::from_columns(&columns()).fit(&rows);

        // Median 6 fills the gap, so the column is [4, 6, 8] with mean 6
        let t = fitted.transform_row(&rows[1]);
        assert_eq!(t[0], 0.0);
        // Constant column scales by one
        assert_eq!(t[1], 0.0);

        let t0 = fitted.transform_row(&rows[0]);
        let std = (8.0f64 / 3.0).sqrt();
        assert!((t0[0] - (-2.0 / std)).abs() < 1e-12);
    }

    #[test]
    fn one_hot_names_and_unknown_category() {
        let rows = vec![
            row(vec![Some(7.0), Some(2.0), Some(0.0)]),
            row(vec![Some(7.0), Some(4.0), Some(0.0)]),
            row(vec![Some(7.0), None, Some(0.0)]),
        ];
        let fitted = PreprocessorSpec::from_columns(&columns()).fit(&rows);
        assert_eq!(
            fitted.feature_names_out(),
            vec!["sleep_hours", "caffeine_mg", "weekday_2", "weekday_4"]
        );
        assert_eq!(fitted.output_width(), 4);

        // Missing calendar value takes the most frequent (tie -> smallest)
        assert_eq!(fitted.transform_row(&rows[2])[2..], [1.0, 0.0]);

        let unseen = row(vec![Some(7.0), Some(6.0), Some(0.0)]);
        assert_eq!(fitted.transform_row(&unseen)[2..], [0.0, 0.0]);
    }

    #[test]
    fn all_missing_numeric_column_is_zero_filled() {
        let rows = vec![row(vec![None, Some(1.0), Some(3.0)]), row(vec![None, Some(1.0), Some(5.0)])];
        let fitted = PreprocessorSpec::from_columns(&columns()).fit(&rows);
        let t = fitted.transform_row(&rows[0]);
        assert_eq!(t[0], 0.0);
        assert!(t.iter().all(|v| v.is_finite()));
    }
}
