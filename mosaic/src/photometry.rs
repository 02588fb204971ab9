//! Aperture photometry collaborator
//!
//! Photometry is measured by an external implementation. The correction
//! pipeline only hands it the corrected array and passes its results through.

use ndarray::{Array1, Array2, ArrayView2};

use crate::error::{MosaicError, Result};

/// Circular apertures to measure on one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApertureRequest {
    /// Source centers, column coordinate
    pub x: Vec<f64>,
    /// Source centers, row coordinate
    pub y: Vec<f64>,
    /// Aperture radii, in pixels
    pub radii: Vec<f64>,
    /// Inner and outer radius of the background annulus
    pub background_annulus: Option<(f64, f64)>,
    /// Pixels to ignore (true = masked)
    pub mask: Option<Array2<bool>>,
    /// Per-pixel uncertainty
    pub error: Option<Array2<f64>>,
}

impl ApertureRequest {
    pub fn new(x: Vec<f64>, y: Vec<f64>, radii: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(MosaicError::ShapeMismatch {
                what: "aperture centers".to_string(),
                expected: (x.len(), 1),
                found: (y.len(), 1),
            });
        }
        Ok(Self {
            x,
            y,
            radii,
            ..Self::default()
        })
    }

    pub fn n_sources(&self) -> usize {
        self.x.len()
    }
}

/// Measured fluxes, errors and flags, one row per source and one column
/// per radius.
#[derive(Debug, Clone, PartialEq)]
pub struct ApertureTable {
    pub flux: Array2<f64>,
    pub error: Array2<f64>,
    pub flag: Array2<u32>,
}

impl ApertureTable {
    pub fn new(flux: Array2<f64>, error: Array2<f64>, flag: Array2<u32>) -> Result<Self> {
        for (what, dim) in [("aperture errors", error.dim()), ("aperture flags", flag.dim())] {
            if dim != flux.dim() {
                return Err(MosaicError::ShapeMismatch {
                    what: what.to_string(),
                    expected: flux.dim(),
                    found: dim,
                });
            }
        }
        Ok(Self { flux, error, flag })
    }

    pub fn n_sources(&self) -> usize {
        self.flux.nrows()
    }

    pub fn n_radii(&self) -> usize {
        self.flux.ncols()
    }

    /// Column names in table order: `f_k` fluxes, then `f_k_e` errors, then
    /// `f_k_f` flags.
    pub fn column_names(&self) -> Vec<String> {
        let n = self.n_radii();
        (0..n)
            .map(|k| format!("f_{k}"))
            .chain((0..n).map(|k| format!("f_{k}_e")))
            .chain((0..n).map(|k| format!("f_{k}_f")))
            .collect()
    }

    /// Values of one named column, flags converted to floats.
    pub fn column(&self, name: &str) -> Option<Array1<f64>> {
        let rest = name.strip_prefix("f_")?;
        let (index, suffix) = match rest.split_once('_') {
            Some((index, suffix)) => (index, Some(suffix)),
            None => (rest, None),
        };
        let k: usize = index.parse().ok()?;
        if k >= self.n_radii() {
            return None;
        }
        match suffix {
            None => Some(self.flux.column(k).to_owned()),
            Some("e") => Some(self.error.column(k).to_owned()),
            Some("f") => Some(self.flag.column(k).mapv(f64::from)),
            Some(_) => None,
        }
    }
}

/// External aperture photometry implementation.
pub trait AperturePhotometry: Send + Sync {
    fn measure(&self, image: ArrayView2<f64>, request: &ApertureRequest) -> Result<ApertureTable>;
}
