//! Least-squares polynomial fitting
//!
//! Fits `y = p(x)` of a given degree to sampled data, skipping NaN samples.
//! The abscissa is mapped onto `[-1, 1]` and the ordinate is centered on its
//! mean before solving, which keeps the Vandermonde system well conditioned
//! for the few-thousand-sample profiles found in overscan strips.

use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use thiserror::Error;

/// Errors that can occur during polynomial fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Not enough valid (non-NaN) samples for the requested degree
    #[error("insufficient data: need at least {needed} valid samples, got {got}")]
    InsufficientData { needed: usize, got: usize },
    /// x and y have different lengths
    #[error("length mismatch: x has {x_len} samples, y has {y_len}")]
    LengthMismatch { x_len: usize, y_len: usize },
    /// The least-squares system could not be solved
    #[error("least-squares system is singular")]
    Singular,
}

/// A fitted polynomial in normalized coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    /// Coefficients in ascending power of the normalized abscissa
    coefficients: Vec<f64>,
    x_center: f64,
    x_scale: f64,
    y_offset: f64,
}

impl Polynomial {
    /// Degree of the polynomial
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Evaluate at `x` (Horner scheme)
    pub fn evaluate(&self, x: f64) -> f64 {
        let t = (x - self.x_center) / self.x_scale;
        let poly = self
            .coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * t + c);
        poly + self.y_offset
    }

    /// Evaluate at every integer index `0..len`
    pub fn evaluate_indices(&self, len: usize) -> Array1<f64> {
        Array1::from_shape_fn(len, |i| self.evaluate(i as f64))
    }
}

/// Fit a polynomial of `degree` to `(x, y)` samples, ignoring NaN pairs.
///
/// # Arguments
/// * `x` - Sample abscissae
/// * `y` - Sample values; NaN entries are excluded from the fit
/// * `degree` - Polynomial degree (0 fits the mean)
///
/// # Returns
/// * `Ok(Polynomial)` - The least-squares solution
/// * `Err(FitError)` - Mismatched inputs or fewer than `degree + 1` valid samples
pub fn fit_polynomial(x: &[f64], y: &[f64], degree: usize) -> Result<Polynomial, FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }

    let samples: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(xi, yi)| !xi.is_nan() && !yi.is_nan())
        .map(|(&xi, &yi)| (xi, yi))
        .collect();

    let needed = degree + 1;
    if samples.len() < needed {
        return Err(FitError::InsufficientData {
            needed,
            got: samples.len(),
        });
    }

    let (x_min, x_max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(xi, _)| {
            (lo.min(xi), hi.max(xi))
        });
    let x_center = (x_min + x_max) / 2.0;
    let half_range = (x_max - x_min) / 2.0;
    let x_scale = if half_range > 0.0 { half_range } else { 1.0 };
    let y_offset = samples.iter().map(|&(_, yi)| yi).sum::<f64>() / samples.len() as f64;

    let design = DMatrix::from_fn(samples.len(), needed, |i, k| {
        ((samples[i].0 - x_center) / x_scale).powi(k as i32)
    });
    let rhs = DVector::from_iterator(samples.len(), samples.iter().map(|&(_, yi)| yi - y_offset));

    let svd = design.svd(true, true);
    let solution = svd.solve(&rhs, 1e-12).map_err(|_| FitError::Singular)?;

    Ok(Polynomial {
        coefficients: solution.iter().copied().collect(),
        x_center,
        x_scale,
        y_offset,
    })
}

/// Fit `values` against their indices and evaluate the fit at every index.
///
/// The output always has the same length as the input.
pub fn fit_index_model(values: &[f64], degree: usize) -> Result<Array1<f64>, FitError> {
    let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let poly = fit_polynomial(&x, values, degree)?;
    Ok(poly.evaluate_indices(values.len()))
}
