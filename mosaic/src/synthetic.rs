//! Deterministic synthetic raw exposures
//!
//! Generates raw quadrant data and overscan strips with a known bias
//! structure (constant level plus a drift along raw rows), Gaussian read
//! noise and a sky background with a column gradient. The arrays are
//! stored in an [`InMemorySource`] laid out like raw CCD files, so the full
//! loading and correction pipeline can run on them.

use ndarray::{Array2, ArrayViewMut2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{MosaicError, Result};
use crate::geometry::QuadrantGeometry;
use crate::header::Header;
use crate::ids::{ccdid_qid_to_rcid, NUM_CCDS, QUADRANTS_PER_CCD};
use crate::raw::RawFocalPlane;
use crate::source::{data_extension, overscan_extension, InMemorySource};

/// Rows per parallel chunk when generating noise
const CHUNK_ROWS: usize = 64;

/// Fill `array` in parallel row chunks, each with its own seeded RNG.
fn fill_in_parallel_chunks<F>(mut array: Array2<f64>, seed: u64, fill: F) -> Array2<f64>
where
    F: Fn(&mut ArrayViewMut2<f64>, usize, &mut StdRng) + Send + Sync,
{
    array
        .axis_chunks_iter_mut(Axis(0), CHUNK_ROWS)
        .into_par_iter()
        .enumerate()
        .for_each(|(chunk_idx, mut chunk)| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(chunk_idx as u64));
            fill(&mut chunk, chunk_idx * CHUNK_ROWS, &mut rng);
        });
    array
}

/// Parameters of a synthetic raw exposure, in ADU.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticExposure {
    pub geometry: QuadrantGeometry,
    /// Constant bias level
    pub bias: f64,
    /// Bias change per raw row, shared by data and overscan
    pub bias_drift: f64,
    /// Read noise standard deviation
    pub read_noise: f64,
    /// Sky level at the first raw column
    pub sky: f64,
    /// Sky change per raw column
    pub sky_gradient: f64,
    pub gain: f64,
    pub filter: String,
    pub obs_jd: f64,
    pub exposure_time: f64,
    pub seed: u64,
}

impl Default for SyntheticExposure {
    fn default() -> Self {
        Self {
            geometry: QuadrantGeometry::default(),
            bias: 400.0,
            bias_drift: 0.01,
            read_noise: 5.0,
            sky: 150.0,
            sky_gradient: 0.0,
            gain: 6.2,
            filter: "ZTF_r".to_string(),
            obs_jd: 2_459_000.75,
            exposure_time: 30.0,
            seed: 42,
        }
    }
}

impl SyntheticExposure {
    /// Default exposure parameters over `geometry`
    pub fn with_geometry(geometry: QuadrantGeometry) -> Self {
        Self {
            geometry,
            ..Self::default()
        }
    }

    fn noise(&self) -> Result<Normal<f64>> {
        if !(self.read_noise.is_finite() && self.read_noise >= 0.0) {
            return Err(MosaicError::Source(format!(
                "synthetic read noise must be finite and non-negative, got {}",
                self.read_noise
            )));
        }
        Normal::new(0.0, self.read_noise).map_err(|e| {
            MosaicError::Source(format!("invalid synthetic read noise {}: {e}", self.read_noise))
        })
    }

    fn bias_at(&self, row: usize) -> f64 {
        self.bias + self.bias_drift * row as f64
    }

    /// Raw-frame data and overscan of quadrant `(ccdid, qid)`.
    pub fn quadrant_arrays(&self, ccdid: usize, qid: usize) -> Result<(Array2<f64>, Array2<f64>)> {
        let rcid = ccdid_qid_to_rcid(ccdid, qid)? as u64;
        let noise = self.noise()?;
        let seed = self.seed.wrapping_mul(1_000_003).wrapping_add(rcid << 20);

        let data = fill_in_parallel_chunks(self.geometry.data.filled(0.0), seed, |chunk, first_row, rng| {
            for ((r, c), pixel) in chunk.indexed_iter_mut() {
                let sky = self.sky + self.sky_gradient * c as f64;
                *pixel = self.bias_at(first_row + r) + sky + noise.sample(rng);
            }
        });
        let overscan = fill_in_parallel_chunks(
            self.geometry.overscan.filled(0.0),
            seed ^ 0x5eed,
            |chunk, first_row, rng| {
                for ((r, _), pixel) in chunk.indexed_iter_mut() {
                    *pixel = self.bias_at(first_row + r) + noise.sample(rng);
                }
            },
        );
        Ok((data, overscan))
    }

    /// Header of quadrant `(ccdid, qid)`.
    pub fn quadrant_header(&self, ccdid: usize, qid: usize) -> Header {
        Header::new()
            .with("CCD_ID", ccdid as i64)
            .with("AMP_ID", qid as i64 - 1)
            .with("FILTER", self.filter.as_str())
            .with("EXPTIME", self.exposure_time)
            .with("OBSJD", self.obs_jd)
            .with("GAIN", self.gain)
            .with("READNOI", self.read_noise)
            .with("DARKCUR", 0.0)
    }

    /// Path under which CCD `ccdid` is stored.
    pub fn ccd_path(ccdid: usize) -> PathBuf {
        PathBuf::from(format!("synthetic_c{ccdid:02}_o.fits"))
    }

    /// Store the four quadrants of CCD `ccdid` in `source`.
    pub fn insert_ccd(&self, source: &mut InMemorySource, ccdid: usize) -> Result<PathBuf> {
        let path = Self::ccd_path(ccdid);
        for qid in 1..=QUADRANTS_PER_CCD {
            let (data, overscan) = self.quadrant_arrays(ccdid, qid)?;
            source.insert_array(&path, data_extension(qid), data);
            source.insert_array(&path, overscan_extension(qid), overscan);
            source.insert_header(&path, data_extension(qid), self.quadrant_header(ccdid, qid));
        }
        Ok(path)
    }

    /// Store all sixteen CCDs and return `(ccdid, path)` pairs.
    pub fn insert_focal_plane(&self, source: &mut InMemorySource) -> Result<Vec<(usize, PathBuf)>> {
        (1..=NUM_CCDS)
            .map(|ccdid| Ok((ccdid, self.insert_ccd(source, ccdid)?)))
            .collect()
    }

    /// Generate a whole exposure and load it lazily as a raw focal plane.
    pub fn focal_plane(&self) -> Result<(Arc<InMemorySource>, RawFocalPlane)> {
        let mut source = InMemorySource::new();
        let paths = self.insert_focal_plane(&mut source)?;
        let source = Arc::new(source);
        let plane = RawFocalPlane::from_sources(source.clone(), paths, self.geometry)?;
        log::info!(
            "generated synthetic focal plane: {} CCD files of {} quadrants",
            NUM_CCDS,
            self.geometry.data
        );
        Ok((source, plane))
    }
}
