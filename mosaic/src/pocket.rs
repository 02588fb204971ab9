//! Pocket-effect correction glue
//!
//! The charge-trap ("pocket") model itself is an external collaborator. It
//! works on amplifier read order: data with its overscan columns appended on
//! the right, `(0, 0)` being the first pixel read. This module only defines
//! the collaborator interfaces and the shape bookkeeping around a call.

use ndarray::{s, Array2, ArrayView2};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MosaicError, Result};
use crate::ids::{check_ccdid, check_qid};

/// A configured pocket-effect model for one quadrant.
pub trait PocketCorrector: Send + Sync {
    /// Correct `data`, `read`-frame pixels followed by `n_overscan` overscan
    /// columns. The output must have the input's shape.
    fn correct(&self, data: ArrayView2<f64>, n_overscan: usize) -> Result<Array2<f64>>;
}

/// Source of configured pocket-effect models.
pub trait PocketModelProvider: Send + Sync {
    /// Corrector for quadrant `qid` of CCD `ccdid`; `LookupFailure` when no
    /// configuration exists.
    fn corrector(&self, ccdid: usize, qid: usize) -> Result<Arc<dyn PocketCorrector>>;
}

/// Run `corrector` on stacked data + overscan and keep the data columns.
pub fn apply_pocket(
    corrector: &dyn PocketCorrector,
    stacked: ArrayView2<f64>,
    n_overscan: usize,
) -> Result<Array2<f64>> {
    let (rows, cols) = stacked.dim();
    if n_overscan > cols {
        return Err(MosaicError::DimensionError(format!(
            "{n_overscan} overscan columns requested from a {rows}x{cols} array"
        )));
    }

    let corrected = corrector.correct(stacked, n_overscan)?;
    if corrected.dim() != (rows, cols) {
        return Err(MosaicError::ShapeMismatch {
            what: "pocket-effect corrected data".to_string(),
            expected: (rows, cols),
            found: corrected.dim(),
        });
    }
    Ok(corrected.slice(s![.., ..cols - n_overscan]).to_owned())
}

/// Per-quadrant corrector registry with an optional fallback.
#[derive(Default, Clone)]
pub struct PocketRegistry {
    by_quadrant: HashMap<(usize, usize), Arc<dyn PocketCorrector>>,
    fallback: Option<Arc<dyn PocketCorrector>>,
}

impl PocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the corrector of quadrant `qid` of CCD `ccdid`.
    pub fn insert(&mut self, ccdid: usize, qid: usize, corrector: Arc<dyn PocketCorrector>) -> Result<()> {
        check_ccdid(ccdid)?;
        check_qid(qid)?;
        self.by_quadrant.insert((ccdid, qid), corrector);
        Ok(())
    }

    /// Corrector used for quadrants without their own entry
    pub fn with_fallback(mut self, corrector: Arc<dyn PocketCorrector>) -> Self {
        self.fallback = Some(corrector);
        self
    }

    pub fn len(&self) -> usize {
        self.by_quadrant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_quadrant.is_empty() && self.fallback.is_none()
    }
}

impl PocketModelProvider for PocketRegistry {
    fn corrector(&self, ccdid: usize, qid: usize) -> Result<Arc<dyn PocketCorrector>> {
        self.by_quadrant
            .get(&(ccdid, qid))
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                MosaicError::LookupFailure(format!(
                    "no pocket-effect configuration for ccdid {ccdid}, qid {qid}"
                ))
            })
    }
}
