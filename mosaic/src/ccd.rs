//! CCD assembly
//!
//! A [`Ccd`] collects the four quadrants of one sensor and tiles their
//! sky-oriented data into a single 2x2 mosaic. The tiling depends on the
//! quadrant type's [`CcdOrientation`](crate::geometry::CcdOrientation):
//!
//! ```text
//!   standard        inverted
//!   q2 | q1         q4 | q3
//!   -------         -------
//!   q3 | q4         q1 | q2
//! ```
//!
//! The bottom row comes first along axis 0, matching a lower-left array
//! origin in sky orientation.

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use shared::algo::Statistic;
use shared::PixelShape;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::deferred_array::DeferredArray;
use crate::error::{MosaicError, Result};
use crate::geometry::QuadrantGeometry;
use crate::header::Header;
use crate::ids::{check_ccdid, check_qid, QUADRANTS_PER_CCD};
use crate::quadrant::QuadrantImage;
use crate::raw::{Calibration, RawCcd, RawQuadrant};
use crate::source::RawPixelSource;

/// How many children a collection must hold to satisfy a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    /// Every slot is filled
    #[default]
    All,
    /// At least one slot is filled
    Any,
}

/// Options of [`Ccd::get_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "O: Deserialize<'de> + Default"))]
pub struct CcdDataOptions<O> {
    /// Options handed to every quadrant
    pub quadrant: O,
    /// CCD-level rebin factor, applied after assembly
    pub rebin: Option<usize>,
    /// Statistic for the CCD-level rebin
    pub rebin_stat: Statistic,
    /// Evaluate and cache the assembled mosaic
    pub persist: bool,
}

impl<O: Default> Default for CcdDataOptions<O> {
    fn default() -> Self {
        Self {
            quadrant: O::default(),
            rebin: None,
            rebin_stat: Statistic::Mean,
            persist: false,
        }
    }
}

impl<O> CcdDataOptions<O> {
    pub fn new(quadrant: O) -> Self
    where
        O: Default,
    {
        Self {
            quadrant,
            ..Self::default()
        }
    }
}

/// One sensor made of up to four quadrants keyed by qid.
#[derive(Debug, Clone)]
pub struct Ccd<Q> {
    ccdid: Option<usize>,
    quadrants: BTreeMap<usize, Q>,
}

impl<Q> Default for Ccd<Q> {
    fn default() -> Self {
        Self {
            ccdid: None,
            quadrants: BTreeMap::new(),
        }
    }
}

impl<Q: QuadrantImage> Ccd<Q> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ccdid(ccdid: usize) -> Result<Self> {
        Ok(Self {
            ccdid: Some(check_ccdid(ccdid)?),
            quadrants: BTreeMap::new(),
        })
    }

    /// Collect quadrants into a CCD; later quadrants replace earlier ones
    /// with the same qid.
    pub fn from_quadrants(quadrants: impl IntoIterator<Item = Q>) -> Result<Self> {
        let mut ccd = Self::new();
        for quadrant in quadrants {
            ccd.set_quadrant(quadrant)?;
        }
        Ok(ccd)
    }

    pub fn ccdid(&self) -> Option<usize> {
        self.ccdid
    }

    /// Insert a quadrant at its own qid, returning the one it replaces.
    ///
    /// A quadrant that knows its CCD must belong to this one; the first such
    /// quadrant sets the CCD id when it is still unknown.
    pub fn set_quadrant(&mut self, quadrant: Q) -> Result<Option<Q>> {
        let qid = check_qid(quadrant.qid())?;
        match (self.ccdid, quadrant.ccdid()) {
            (Some(own), Some(theirs)) if own != theirs => {
                return Err(MosaicError::InvalidIdentifier(format!(
                    "quadrant {qid} belongs to CCD {theirs}, not CCD {own}"
                )));
            }
            (None, Some(theirs)) => self.ccdid = Some(check_ccdid(theirs)?),
            _ => {}
        }
        Ok(self.quadrants.insert(qid, quadrant))
    }

    pub fn get_quadrant(&self, qid: usize) -> Option<&Q> {
        self.quadrants.get(&qid)
    }

    pub fn get_quadrant_mut(&mut self, qid: usize) -> Option<&mut Q> {
        self.quadrants.get_mut(&qid)
    }

    /// Quadrants in qid order
    pub fn quadrants(&self) -> impl Iterator<Item = &Q> {
        self.quadrants.values()
    }

    pub fn has_quadrants(&self, coverage: Coverage) -> bool {
        match coverage {
            Coverage::All => self.quadrants.len() == QUADRANTS_PER_CCD,
            Coverage::Any => !self.quadrants.is_empty(),
        }
    }

    pub fn missing_quadrants(&self) -> Vec<usize> {
        (1..=QUADRANTS_PER_CCD)
            .filter(|qid| !self.quadrants.contains_key(qid))
            .collect()
    }

    /// Header of every quadrant present, keyed by qid.
    pub fn quadrant_headers(&self) -> Result<BTreeMap<usize, Header>> {
        self.quadrants
            .iter()
            .map(|(qid, quadrant)| Ok((*qid, quadrant.get_header()?)))
            .collect()
    }

    /// Unbinned shape of the assembled CCD.
    pub fn shape(&self) -> Result<PixelShape> {
        let quadrant = self.quadrants.values().next().ok_or_else(|| {
            MosaicError::MissingComponent(format!("{} has no quadrants", self.describe()))
        })?;
        let shape = quadrant.shape();
        Ok(PixelShape::new(2 * shape.rows, 2 * shape.cols))
    }

    /// Total rebin factor `options` apply, quadrant level times CCD level.
    pub fn rebin_factor(options: &CcdDataOptions<Q::Options>) -> usize {
        Q::rebin_factor(&options.quadrant) * options.rebin.unwrap_or(1)
    }

    /// Lazy data of every quadrant, keyed by qid.
    pub fn get_quadrant_data(&self, options: &Q::Options) -> Result<BTreeMap<usize, DeferredArray>> {
        self.quadrants
            .iter()
            .map(|(qid, quadrant)| Ok((*qid, quadrant.get_data(options)?)))
            .collect()
    }

    /// Assembled CCD mosaic.
    ///
    /// Fails with `MissingComponent` unless all four quadrants are set.
    pub fn get_data(&self, options: &CcdDataOptions<Q::Options>) -> Result<DeferredArray> {
        let missing = self.missing_quadrants();
        if !missing.is_empty() {
            return Err(MosaicError::MissingComponent(format!(
                "{} is missing quadrants {missing:?}",
                self.describe()
            )));
        }

        let mut data = self.get_quadrant_data(&options.quadrant)?;
        let mut take = |qid: usize| {
            data.remove(&qid).ok_or_else(|| {
                MosaicError::MissingComponent(format!("{} has no quadrant {qid}", self.describe()))
            })
        };

        let (top, bottom) = Q::CCD_ORIENTATION.layout();
        let top = DeferredArray::concatenate(Axis(1), &[take(top[0])?, take(top[1])?])?;
        let bottom = DeferredArray::concatenate(Axis(1), &[take(bottom[0])?, take(bottom[1])?])?;
        let mut ccd = DeferredArray::concatenate(Axis(0), &[bottom, top])?;

        if let Some(factor) = options.rebin {
            ccd = ccd.rebin(factor, options.rebin_stat)?;
        }
        log::debug!("{} assembled as {}", self.describe(), ccd.shape());

        if options.persist {
            ccd = ccd.persist()?;
        }
        Ok(ccd)
    }

    fn describe(&self) -> String {
        match self.ccdid {
            Some(ccdid) => format!("CCD {ccdid}"),
            None => "CCD".to_string(),
        }
    }
}

impl RawCcd {
    /// Lazily load the four quadrants of the raw CCD file at `path`.
    pub fn from_source(
        source: Arc<dyn RawPixelSource>,
        path: impl Into<PathBuf>,
        ccdid: usize,
        geometry: QuadrantGeometry,
    ) -> Result<Self> {
        let path = path.into();
        let mut ccd = Self::with_ccdid(ccdid)?;
        for qid in 1..=QUADRANTS_PER_CCD {
            ccd.set_quadrant(RawQuadrant::from_source(
                Arc::clone(&source),
                path.clone(),
                ccdid,
                qid,
                geometry,
            )?)?;
        }
        Ok(ccd)
    }

    /// Inject the same calibration collaborators into every quadrant.
    pub fn with_calibration(mut self, calibration: &Calibration) -> Self {
        for quadrant in self.quadrants.values_mut() {
            quadrant.set_calibration(calibration.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CcdOrientation;
    use crate::quadrant::{Quadrant, QuadrantDataOptions};
    use crate::source::InMemorySource;
    use ndarray::Array2;

    fn labelled(qid: usize, shape: (usize, usize)) -> Quadrant {
        Quadrant::new(qid, Array2::from_elem(shape, qid as f64)).unwrap()
    }

    fn full_ccd(shape: (usize, usize)) -> Ccd<Quadrant> {
        Ccd::from_quadrants((1..=4).map(|qid| labelled(qid, shape))).unwrap()
    }

    /// Plain quadrant placed with the inverted layout.
    #[derive(Debug)]
    struct InvertedQuadrant(Quadrant);

    impl QuadrantImage for InvertedQuadrant {
        type Options = QuadrantDataOptions;

        const CCD_ORIENTATION: CcdOrientation = CcdOrientation::Inverted;

        fn qid(&self) -> usize {
            self.0.qid()
        }

        fn ccdid(&self) -> Option<usize> {
            self.0.ccdid()
        }

        fn shape(&self) -> PixelShape {
            self.0.shape()
        }

        fn get_data(&self, options: &QuadrantDataOptions) -> Result<DeferredArray> {
            self.0.get_data(options)
        }

        fn rebin_factor(options: &QuadrantDataOptions) -> usize {
            Quadrant::rebin_factor(options)
        }

        fn get_header(&self) -> Result<Header> {
            self.0.get_header()
        }
    }

    #[test]
    fn test_standard_layout() {
        let ccd = full_ccd((2, 3));
        let data = ccd.get_data(&CcdDataOptions::default()).unwrap().compute().unwrap();
        assert_eq!(data.dim(), (4, 6));
        // bottom row [q3, q4] first, top row [q2, q1] second
        assert_eq!(data[[0, 0]], 3.0);
        assert_eq!(data[[0, 5]], 4.0);
        assert_eq!(data[[3, 0]], 2.0);
        assert_eq!(data[[3, 5]], 1.0);
    }

    #[test]
    fn test_inverted_layout() {
        let ccd = Ccd::from_quadrants((1..=4).map(|qid| InvertedQuadrant(labelled(qid, (2, 2))))).unwrap();
        let data = ccd.get_data(&CcdDataOptions::default()).unwrap().compute().unwrap();
        assert_eq!(data[[0, 0]], 1.0);
        assert_eq!(data[[0, 3]], 2.0);
        assert_eq!(data[[3, 0]], 4.0);
        assert_eq!(data[[3, 3]], 3.0);
    }

    #[test]
    fn test_missing_quadrant_fails() {
        let mut ccd = Ccd::with_ccdid(5).unwrap();
        for qid in 1..=3 {
            ccd.set_quadrant(labelled(qid, (2, 2))).unwrap();
        }
        assert!(ccd.has_quadrants(Coverage::Any));
        assert!(!ccd.has_quadrants(Coverage::All));
        assert_eq!(ccd.missing_quadrants(), vec![4]);
        let err = ccd.get_data(&CcdDataOptions::default()).unwrap_err();
        assert!(matches!(err, MosaicError::MissingComponent(msg) if msg.contains("CCD 5")));
    }

    #[test]
    fn test_two_stage_rebin() {
        let ccd = full_ccd((4, 4));
        let options = CcdDataOptions {
            quadrant: QuadrantDataOptions {
                rebin: Some(2),
                ..Default::default()
            },
            rebin: Some(2),
            ..Default::default()
        };
        assert_eq!(Ccd::<Quadrant>::rebin_factor(&options), 4);
        let data = ccd.get_data(&options).unwrap().compute().unwrap();
        assert_eq!(data.dim(), (2, 2));
        assert_eq!(data[[1, 0]], 2.0);

        let bad = CcdDataOptions {
            rebin: Some(3),
            ..Default::default()
        };
        assert!(matches!(ccd.get_data(&bad), Err(MosaicError::DimensionError(_))));
    }

    #[test]
    fn test_quadrant_shapes_must_agree() {
        let mut ccd = full_ccd((2, 2));
        ccd.set_quadrant(labelled(1, (2, 3))).unwrap();
        assert!(matches!(
            ccd.get_data(&CcdDataOptions::default()),
            Err(MosaicError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_ccdid_consistency() {
        let mut ccd = Ccd::new();
        ccd.set_quadrant(labelled(1, (1, 1)).with_ccdid(3).unwrap()).unwrap();
        assert_eq!(ccd.ccdid(), Some(3));
        assert!(matches!(
            ccd.set_quadrant(labelled(2, (1, 1)).with_ccdid(4).unwrap()),
            Err(MosaicError::InvalidIdentifier(_))
        ));
        let replaced = ccd.set_quadrant(labelled(1, (1, 1))).unwrap();
        assert!(replaced.is_some());
    }

    #[test]
    fn test_persist_flag() {
        let ccd = full_ccd((2, 2));
        let options = CcdDataOptions {
            persist: true,
            ..CcdDataOptions::<QuadrantDataOptions>::default()
        };
        assert!(ccd.get_data(&options).unwrap().is_persisted());
    }

    #[test]
    fn test_raw_ccd_from_source() {
        let source = Arc::new(InMemorySource::new());
        let ccd = RawCcd::from_source(source.clone(), "ccd07.fits", 7, QuadrantGeometry::default()).unwrap();
        assert!(ccd.has_quadrants(Coverage::All));
        assert_eq!(ccd.shape().unwrap(), PixelShape::new(6160, 6144));
        assert_eq!(ccd.get_quadrant(3).unwrap().rcid(), Some(26));

        let data = ccd.get_data(&CcdDataOptions::default()).unwrap();
        assert_eq!(data.shape(), PixelShape::new(6160, 6144));
        assert_eq!(source.array_reads(), 0);
    }
}
