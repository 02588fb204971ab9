//! Block rebinning of 2D arrays
//!
//! Reduces an array by an integer factor along both axes, collapsing each
//! `factor x factor` block with a [`Statistic`]. Output rows are computed in
//! parallel with rayon.

use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

use super::stats::Statistic;

/// Errors raised when a rebin factor is incompatible with an array.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebinError {
    #[error("rebin factor must be at least 1")]
    ZeroFactor,
    #[error("rebin factor {factor} does not evenly divide shape {rows}x{cols}")]
    NotDivisible {
        rows: usize,
        cols: usize,
        factor: usize,
    },
}

/// Check that `factor` evenly divides a `(rows, cols)` shape and return the
/// rebinned shape.
pub fn rebinned_shape(shape: (usize, usize), factor: usize) -> Result<(usize, usize), RebinError> {
    let (rows, cols) = shape;
    if factor == 0 {
        return Err(RebinError::ZeroFactor);
    }
    if rows % factor != 0 || cols % factor != 0 {
        return Err(RebinError::NotDivisible {
            rows,
            cols,
            factor,
        });
    }
    Ok((rows / factor, cols / factor))
}

/// Rebin `data` by `factor` using `stat` to reduce each block.
///
/// # Arguments
/// * `data` - Input array of shape (rows, cols)
/// * `factor` - Block edge length; must divide both rows and cols
/// * `stat` - Statistic applied to the `factor * factor` samples of each block
///
/// # Returns
/// Array of shape (rows / factor, cols / factor)
pub fn rebin(data: ArrayView2<f64>, factor: usize, stat: Statistic) -> Result<Array2<f64>, RebinError> {
    let out_shape = rebinned_shape(data.dim(), factor)?;
    if factor == 1 {
        return Ok(data.to_owned());
    }

    let mut output = Array2::<f64>::zeros(out_shape);
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row_idx, mut out_row)| {
            let row_start = row_idx * factor;
            let mut block = Vec::with_capacity(factor * factor);
            for (col_idx, pixel) in out_row.iter_mut().enumerate() {
                let col_start = col_idx * factor;
                block.clear();
                block.extend(
                    data.slice(s![row_start..row_start + factor, col_start..col_start + factor])
                        .iter()
                        .copied(),
                );
                *pixel = stat.reduce(&block);
            }
        });

    Ok(output)
}
