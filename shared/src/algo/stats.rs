//! Reduction statistics for pixel data
//!
//! Provides the closed set of statistics used to collapse pixel blocks and
//! overscan strips into single values. Each statistic is an enum variant
//! dispatched through a `match`, and is parsed from its lowercase name
//! (`"nanmedian"`, `"mean"`, ...) when read from configuration.
//!
//! The `Nan*` variants ignore NaN samples; the plain variants propagate them,
//! matching the usual array-library conventions.

use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a statistic name does not match any supported variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown statistic '{0}'")]
pub struct UnknownStatistic(pub String);

/// Reduction statistic applied to a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Mean,
    NanMean,
    Median,
    NanMedian,
    Sum,
    NanSum,
    Std,
    NanStd,
    Min,
    NanMin,
    Max,
    NanMax,
}

impl Statistic {
    /// All supported statistics, in declaration order.
    pub const ALL: [Statistic; 12] = [
        Statistic::Mean,
        Statistic::NanMean,
        Statistic::Median,
        Statistic::NanMedian,
        Statistic::Sum,
        Statistic::NanSum,
        Statistic::Std,
        Statistic::NanStd,
        Statistic::Min,
        Statistic::NanMin,
        Statistic::Max,
        Statistic::NanMax,
    ];

    /// Lowercase name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::NanMean => "nanmean",
            Statistic::Median => "median",
            Statistic::NanMedian => "nanmedian",
            Statistic::Sum => "sum",
            Statistic::NanSum => "nansum",
            Statistic::Std => "std",
            Statistic::NanStd => "nanstd",
            Statistic::Min => "min",
            Statistic::NanMin => "nanmin",
            Statistic::Max => "max",
            Statistic::NanMax => "nanmax",
        }
    }

    /// Whether NaN samples are skipped rather than propagated.
    pub fn ignores_nan(&self) -> bool {
        matches!(
            self,
            Statistic::NanMean
                | Statistic::NanMedian
                | Statistic::NanSum
                | Statistic::NanStd
                | Statistic::NanMin
                | Statistic::NanMax
        )
    }

    /// Reduce a set of samples to a single value.
    ///
    /// Empty input (or input that is entirely NaN for the `Nan*` variants)
    /// yields NaN, except for `NanSum` which yields 0 like its array-library
    /// counterpart.
    pub fn reduce(&self, values: &[f64]) -> f64 {
        if !self.ignores_nan() && values.iter().any(|v| v.is_nan()) {
            return f64::NAN;
        }

        let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();

        match self {
            Statistic::Mean | Statistic::NanMean => mean(&valid),
            Statistic::Median | Statistic::NanMedian => median_in_place(&mut valid),
            Statistic::Sum => {
                if valid.is_empty() {
                    f64::NAN
                } else {
                    valid.iter().sum()
                }
            }
            Statistic::NanSum => valid.iter().sum(),
            Statistic::Std | Statistic::NanStd => std_dev(&valid),
            Statistic::Min | Statistic::NanMin => valid
                .iter()
                .copied()
                .reduce(f64::min)
                .unwrap_or(f64::NAN),
            Statistic::Max | Statistic::NanMax => valid
                .iter()
                .copied()
                .reduce(f64::max)
                .unwrap_or(f64::NAN),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Statistic {
    type Err = UnknownStatistic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Statistic::ALL
            .iter()
            .copied()
            .find(|stat| stat.as_str() == lowered)
            .ok_or_else(|| UnknownStatistic(s.to_string()))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let mu = mean(values);
    if mu.is_nan() {
        return mu;
    }
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Median of NaN-free samples, reordering the slice.
fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Median ignoring NaN samples.
///
/// Returns `None` when no valid sample remains.
pub fn nan_median(values: &[f64]) -> Option<f64> {
    let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        None
    } else {
        Some(median_in_place(&mut valid))
    }
}

/// Median absolute deviation around the median, ignoring NaN samples.
///
/// Unscaled: no normal-consistency factor is applied.
pub fn median_abs_deviation(values: &[f64]) -> Option<f64> {
    let center = nan_median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - center).abs())
        .collect();
    nan_median(&deviations)
}

/// Collapse a 2D array along `axis` with the given statistic.
///
/// Collapsing `Axis(1)` reduces every row to one value (output length =
/// number of rows); `Axis(0)` reduces every column.
pub fn collapse_axis(data: ArrayView2<f64>, axis: Axis, stat: Statistic) -> Array1<f64> {
    data.map_axis(axis, |lane| {
        let values: Vec<f64> = lane.iter().copied().collect();
        stat.reduce(&values)
    })
}
