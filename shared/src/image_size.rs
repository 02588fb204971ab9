//! Pixel array shapes

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algo::rebin::{rebinned_shape, RebinError};

/// Shape of a 2D pixel array
///
/// Uses the row-major convention of ndarray: rows (height) come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelShape {
    /// Number of rows (image height)
    pub rows: usize,
    /// Number of columns (image width)
    pub cols: usize,
}

impl PixelShape {
    /// Create a new PixelShape
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Create an array of this shape filled with `value`
    pub fn filled(&self, value: f64) -> Array2<f64> {
        Array2::from_elem(self.dim(), value)
    }

    /// Create a NaN-filled array of this shape ("no data")
    pub fn nan_array(&self) -> Array2<f64> {
        self.filled(f64::NAN)
    }

    /// Shape after rebinning by `factor`
    pub fn rebinned(&self, factor: usize) -> Result<Self, RebinError> {
        rebinned_shape(self.dim(), factor).map(Self::from)
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Shape as an ndarray-style `(rows, cols)` tuple
    pub const fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl From<(usize, usize)> for PixelShape {
    fn from((rows, cols): (usize, usize)) -> Self {
        Self { rows, cols }
    }
}

impl From<PixelShape> for (usize, usize) {
    fn from(shape: PixelShape) -> Self {
        shape.dim()
    }
}

impl fmt::Display for PixelShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim_and_display() {
        let shape = PixelShape::new(3080, 3072);
        assert_eq!(shape.dim(), (3080, 3072));
        assert_eq!(shape.to_string(), "3080x3072");
        assert_eq!(shape.pixel_count(), 3080 * 3072);
        assert_eq!(PixelShape::from((2, 3)), PixelShape::new(2, 3));
    }

    #[test]
    fn test_nan_array() {
        let gap = PixelShape::new(2, 4).nan_array();
        assert_eq!(gap.dim(), (2, 4));
        assert!(gap.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_rebinned() {
        let shape = PixelShape::new(3080, 3072);
        assert_eq!(shape.rebinned(4), Ok(PixelShape::new(770, 768)));
        assert!(shape.rebinned(3).is_err());
    }
}
