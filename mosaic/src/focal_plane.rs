//! Focal-plane assembly
//!
//! Sixteen CCD mosaics tiled as a 4x4 grid. Each line of the grid lists its
//! CCDs left to right; lines are stacked along axis 0 in order:
//!
//! ```text
//!   4  3  2  1
//!   8  7  6  5
//!  12 11 10  9
//!  16 15 14 13
//! ```
//!
//! Optional NaN strips stand in for the physical gaps between CCDs. Their
//! size is given in unbinned pixels and divided by the total rebin factor
//! applied upstream.

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use shared::PixelShape;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ccd::{Ccd, CcdDataOptions, Coverage};
use crate::deferred_array::DeferredArray;
use crate::error::{MosaicError, Result};
use crate::geometry::{FocalPlaneGaps, QuadrantGeometry};
use crate::ids::{check_ccdid, rcid_to_ccdid_qid, NUM_CCDS};
use crate::quadrant::QuadrantImage;
use crate::raw::{Calibration, RawCcd, RawFocalPlane};
use crate::source::RawPixelSource;

/// CCD ids of each grid line, left to right, in stacking order
pub const ROW_LAYOUT: [[usize; 4]; 4] = [[4, 3, 2, 1], [8, 7, 6, 5], [12, 11, 10, 9], [16, 15, 14, 13]];

/// Gap strip orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// Between horizontally adjacent CCDs of a line: CCD rows tall
    Column,
    /// Between two lines: a full line wide
    Row,
}

/// Options of [`FocalPlane::get_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "O: Deserialize<'de> + Default"))]
pub struct FocalPlaneDataOptions<O> {
    /// Options handed to every CCD
    pub ccd: CcdDataOptions<O>,
    /// Insert NaN gap strips between CCDs
    pub include_gaps: bool,
    /// Evaluate and cache the assembled mosaic
    pub persist: bool,
}

impl<O: Default> Default for FocalPlaneDataOptions<O> {
    fn default() -> Self {
        Self {
            ccd: CcdDataOptions::default(),
            include_gaps: false,
            persist: false,
        }
    }
}

/// Full camera: up to sixteen CCDs keyed by ccdid.
#[derive(Debug, Clone)]
pub struct FocalPlane<Q> {
    ccds: BTreeMap<usize, Ccd<Q>>,
    gaps: FocalPlaneGaps,
}

impl<Q> Default for FocalPlane<Q> {
    fn default() -> Self {
        Self {
            ccds: BTreeMap::new(),
            gaps: FocalPlaneGaps::default(),
        }
    }
}

impl<Q: QuadrantImage> FocalPlane<Q> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gaps(mut self, gaps: FocalPlaneGaps) -> Self {
        self.gaps = gaps;
        self
    }

    pub fn gaps(&self) -> FocalPlaneGaps {
        self.gaps
    }

    pub fn from_ccds(ccds: impl IntoIterator<Item = Ccd<Q>>) -> Result<Self> {
        let mut plane = Self::new();
        for ccd in ccds {
            plane.set_ccd(ccd)?;
        }
        Ok(plane)
    }

    /// Insert a CCD at its own ccdid, returning the one it replaces.
    pub fn set_ccd(&mut self, ccd: Ccd<Q>) -> Result<Option<Ccd<Q>>> {
        let ccdid = ccd.ccdid().ok_or_else(|| {
            MosaicError::InvalidIdentifier("cannot place a CCD without a ccdid".to_string())
        })?;
        Ok(self.ccds.insert(check_ccdid(ccdid)?, ccd))
    }

    pub fn get_ccd(&self, ccdid: usize) -> Option<&Ccd<Q>> {
        self.ccds.get(&ccdid)
    }

    pub fn get_ccd_mut(&mut self, ccdid: usize) -> Option<&mut Ccd<Q>> {
        self.ccds.get_mut(&ccdid)
    }

    /// CCDs in ccdid order
    pub fn ccds(&self) -> impl Iterator<Item = &Ccd<Q>> {
        self.ccds.values()
    }

    /// Quadrant at focal-plane index `rcid`, when its CCD and quadrant are set.
    pub fn get_quadrant(&self, rcid: usize) -> Result<Option<&Q>> {
        let (ccdid, qid) = rcid_to_ccdid_qid(rcid)?;
        Ok(self.ccds.get(&ccdid).and_then(|ccd| ccd.get_quadrant(qid)))
    }

    pub fn has_ccds(&self, coverage: Coverage) -> bool {
        match coverage {
            Coverage::All => self.ccds.len() == NUM_CCDS,
            Coverage::Any => !self.ccds.is_empty(),
        }
    }

    pub fn missing_ccds(&self) -> Vec<usize> {
        (1..=NUM_CCDS)
            .filter(|ccdid| !self.ccds.contains_key(ccdid))
            .collect()
    }

    /// Unbinned CCD shape, taken from the first CCD set.
    pub fn ccd_shape(&self) -> Result<PixelShape> {
        self.ccds
            .values()
            .next()
            .ok_or_else(|| MosaicError::MissingComponent("focal plane has no CCDs".to_string()))?
            .shape()
    }

    /// Shape of one gap strip after binning by `rebin`.
    pub fn gap_shape(&self, kind: GapKind, rebin: usize) -> Result<PixelShape> {
        let ccd = self.ccd_shape()?.rebinned(rebin)?;
        Ok(self.gap_shape_for(kind, ccd, rebin))
    }

    fn gap_shape_for(&self, kind: GapKind, ccd: PixelShape, rebin: usize) -> PixelShape {
        let (column_gap, row_gap) = self.gaps.scaled(rebin);
        match kind {
            GapKind::Column => PixelShape::new(ccd.rows, column_gap),
            GapKind::Row => PixelShape::new(row_gap, 4 * ccd.cols + 3 * column_gap),
        }
    }

    /// Unbinned shape of the assembled focal plane.
    pub fn shape(&self, include_gaps: bool) -> Result<PixelShape> {
        let ccd = self.ccd_shape()?;
        let (rows, cols) = (4 * ccd.rows, 4 * ccd.cols);
        if include_gaps {
            let (column_gap, row_gap) = self.gaps.scaled(1);
            Ok(PixelShape::new(rows + 3 * row_gap, cols + 3 * column_gap))
        } else {
            Ok(PixelShape::new(rows, cols))
        }
    }

    /// Assembled focal-plane mosaic.
    ///
    /// Fails with `MissingComponent` unless all sixteen CCDs are set.
    pub fn get_data(&self, options: &FocalPlaneDataOptions<Q::Options>) -> Result<DeferredArray> {
        let missing = self.missing_ccds();
        if !missing.is_empty() {
            return Err(MosaicError::MissingComponent(format!(
                "focal plane is missing CCDs {missing:?}"
            )));
        }

        let mut data = self
            .ccds
            .iter()
            .map(|(ccdid, ccd)| Ok((*ccdid, ccd.get_data(&options.ccd)?)))
            .collect::<Result<BTreeMap<usize, DeferredArray>>>()?;
        let rebin = Ccd::<Q>::rebin_factor(&options.ccd);

        let mut lines = Vec::with_capacity(2 * ROW_LAYOUT.len());
        for (i, line) in ROW_LAYOUT.iter().enumerate() {
            let mut parts = Vec::with_capacity(2 * line.len());
            for (j, ccdid) in line.iter().enumerate() {
                let ccd = data.remove(ccdid).ok_or_else(|| {
                    MosaicError::MissingComponent(format!("focal plane has no CCD {ccdid}"))
                })?;
                if options.include_gaps && j > 0 {
                    let gap = self.gap_shape_for(GapKind::Column, ccd.shape(), rebin);
                    if gap.cols > 0 {
                        parts.push(DeferredArray::nan(gap));
                    }
                }
                parts.push(ccd);
            }
            let line = DeferredArray::concatenate(Axis(1), &parts)?;

            if options.include_gaps && i > 0 {
                let (_, row_gap) = self.gaps.scaled(rebin);
                if row_gap > 0 {
                    lines.push(DeferredArray::nan(PixelShape::new(row_gap, line.shape().cols)));
                }
            }
            lines.push(line);
        }

        let mut mosaic = DeferredArray::concatenate(Axis(0), &lines)?;
        log::debug!(
            "focal plane assembled as {} (gaps: {}, rebin: {rebin})",
            mosaic.shape(),
            options.include_gaps
        );
        if options.persist {
            mosaic = mosaic.persist()?;
        }
        Ok(mosaic)
    }
}

impl RawFocalPlane {
    /// Lazily load sixteen raw CCD files, given as `(ccdid, path)` pairs.
    pub fn from_sources<P: Into<PathBuf>>(
        source: Arc<dyn RawPixelSource>,
        paths: impl IntoIterator<Item = (usize, P)>,
        geometry: QuadrantGeometry,
    ) -> Result<Self> {
        let mut plane = Self::new();
        for (ccdid, path) in paths {
            plane.set_ccd(RawCcd::from_source(Arc::clone(&source), path, ccdid, geometry)?)?;
        }
        Ok(plane)
    }

    /// Inject the same calibration collaborators into every quadrant.
    pub fn with_calibration(mut self, calibration: &Calibration) -> Self {
        self.ccds = std::mem::take(&mut self.ccds)
            .into_iter()
            .map(|(ccdid, ccd)| (ccdid, ccd.with_calibration(calibration)))
            .collect();
        self
    }
}
