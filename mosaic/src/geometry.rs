//! Fixed instrument geometry
//!
//! Quadrant and overscan shapes are fixed per instrument. The defaults are
//! those of the 16-CCD wide-field camera: 3080x3072 science pixels per
//! amplifier with a 3080x30 overscan strip, and physical inter-CCD gaps of
//! 488 pixels between columns and 672 pixels between rows of CCDs.

use serde::{Deserialize, Serialize};
use shared::PixelShape;

use crate::error::{MosaicError, Result};

/// Pixel shapes of one quadrant readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadrantGeometry {
    /// Science data shape
    pub data: PixelShape,
    /// Overscan strip shape (same number of rows as the data)
    pub overscan: PixelShape,
}

impl QuadrantGeometry {
    /// Geometry of the wide-field camera quadrants
    pub const WIDE_FIELD: Self = Self {
        data: PixelShape::new(3080, 3072),
        overscan: PixelShape::new(3080, 30),
    };

    /// Create a geometry; data and overscan must have the same row count.
    pub fn new(data: PixelShape, overscan: PixelShape) -> Result<Self> {
        if data.rows != overscan.rows {
            return Err(MosaicError::ShapeMismatch {
                what: "overscan rows must match data rows".to_string(),
                expected: (data.rows, overscan.cols),
                found: overscan.dim(),
            });
        }
        Ok(Self { data, overscan })
    }

    /// Shape of the data with its overscan stacked on the right
    pub fn stacked(&self) -> PixelShape {
        PixelShape::new(self.data.rows, self.data.cols + self.overscan.cols)
    }

    /// Shape of an assembled 2x2 CCD
    pub fn ccd(&self) -> PixelShape {
        PixelShape::new(2 * self.data.rows, 2 * self.data.cols)
    }
}

impl Default for QuadrantGeometry {
    fn default() -> Self {
        Self::WIDE_FIELD
    }
}

/// Physical gaps between CCDs, in unbinned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocalPlaneGaps {
    /// Width of the NaN strip between horizontally adjacent CCDs
    pub column_gap: usize,
    /// Height of the NaN strip between vertically adjacent CCD rows
    pub row_gap: usize,
}

impl FocalPlaneGaps {
    pub const WIDE_FIELD: Self = Self {
        column_gap: 488,
        row_gap: 672,
    };

    /// Gap sizes `(column_gap, row_gap)` after binning by `rebin`.
    ///
    /// Sizes are rounded to the nearest pixel.
    pub fn scaled(&self, rebin: usize) -> (usize, usize) {
        let factor = rebin.max(1) as f64;
        (
            (self.column_gap as f64 / factor).round() as usize,
            (self.row_gap as f64 / factor).round() as usize,
        )
    }
}

impl Default for FocalPlaneGaps {
    fn default() -> Self {
        Self::WIDE_FIELD
    }
}

/// Placement of the four quadrants inside a CCD mosaic.
///
/// Fixed per camera generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CcdOrientation {
    /// top `[q2, q1]`, bottom `[q3, q4]`
    #[default]
    Standard,
    /// top `[q4, q3]`, bottom `[q1, q2]`
    Inverted,
}

impl CcdOrientation {
    /// Quadrant ids as `(top, bottom)` rows, each listed left to right.
    pub fn layout(&self) -> ([usize; 2], [usize; 2]) {
        match self {
            CcdOrientation::Standard => ([2, 1], [3, 4]),
            CcdOrientation::Inverted => ([4, 3], [1, 2]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_field_shapes() {
        let geometry = QuadrantGeometry::default();
        assert_eq!(geometry.ccd(), PixelShape::new(6160, 6144));
        assert_eq!(geometry.stacked(), PixelShape::new(3080, 3102));
    }

    #[test]
    fn test_geometry_rejects_row_mismatch() {
        let result = QuadrantGeometry::new(PixelShape::new(10, 8), PixelShape::new(12, 2));
        assert!(matches!(result, Err(MosaicError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_gap_scaling() {
        let gaps = FocalPlaneGaps::default();
        assert_eq!(gaps.scaled(1), (488, 672));
        assert_eq!(gaps.scaled(4), (122, 168));
        assert_eq!(gaps.scaled(0), (488, 672));
    }

    #[test]
    fn test_orientation_layouts() {
        assert_eq!(CcdOrientation::Standard.layout(), ([2, 1], [3, 4]));
        assert_eq!(CcdOrientation::Inverted.layout(), ([4, 3], [1, 2]));
    }
}
