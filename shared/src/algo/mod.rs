//! Numeric algorithms for pixel-array processing
//!
//! - **stats**: closed set of reduction statistics and NaN-aware helpers
//! - **polyfit**: least-squares polynomial fitting that skips NaN samples
//! - **rebin**: integer block reduction of 2D arrays

pub mod polyfit;
pub mod rebin;
pub mod stats;

pub use polyfit::{fit_index_model, fit_polynomial, FitError, Polynomial};
pub use rebin::{rebin, rebinned_shape, RebinError};
pub use stats::{collapse_axis, median_abs_deviation, nan_median, Statistic};
