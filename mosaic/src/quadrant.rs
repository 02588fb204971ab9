//! Quadrant capability trait and the plain quadrant
//!
//! [`QuadrantImage`] is what CCD and focal-plane assembly need from a
//! quadrant: its identity, its unbinned shape and a lazy sky-oriented data
//! array built from quadrant-specific options. [`Quadrant`] is the simplest
//! implementation: data that is already corrected and oriented.

use serde::{Deserialize, Serialize};
use shared::algo::Statistic;
use shared::PixelShape;
use std::fmt;

use crate::deferred_array::DeferredArray;
use crate::error::{MosaicError, Result};
use crate::geometry::CcdOrientation;
use crate::header::Header;
use crate::ids::{ccdid_qid_to_rcid, check_ccdid, check_qid};
use crate::photometry::{AperturePhotometry, ApertureRequest, ApertureTable};

/// A single amplifier readout that can be assembled into a CCD.
pub trait QuadrantImage: Send + Sync {
    /// Options controlling how `get_data` builds the array
    type Options: Clone + Default + fmt::Debug + Send + Sync;

    /// Placement of this quadrant type inside a CCD
    const CCD_ORIENTATION: CcdOrientation = CcdOrientation::Standard;

    /// Position within the CCD, 1..=4
    fn qid(&self) -> usize;

    /// CCD the quadrant belongs to, when known
    fn ccdid(&self) -> Option<usize>;

    /// Unbinned shape of the data returned by `get_data`
    fn shape(&self) -> PixelShape;

    /// Lazy sky-oriented data array
    fn get_data(&self, options: &Self::Options) -> Result<DeferredArray>;

    /// Rebin factor `options` apply to the data (1 when none)
    fn rebin_factor(options: &Self::Options) -> usize;

    /// Quadrant header; empty when the quadrant has none
    fn get_header(&self) -> Result<Header>;

    /// Focal-plane quadrant index, when the CCD is known
    fn rcid(&self) -> Option<usize> {
        self.ccdid()
            .and_then(|ccdid| ccdid_qid_to_rcid(ccdid, self.qid()).ok())
    }

    /// Measure apertures on the corrected data.
    ///
    /// The array is forced and handed to `photometry` unchanged; its results
    /// are returned as-is.
    fn get_aperture(
        &self,
        photometry: &dyn AperturePhotometry,
        request: &ApertureRequest,
        options: &Self::Options,
    ) -> Result<ApertureTable> {
        let data = self.get_data(options)?.force()?;
        photometry.measure(data.view(), request)
    }
}

/// What a plain quadrant's `get_data` returns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFill {
    /// The pixel data
    #[default]
    Data,
    /// A constant broadcast over the quadrant shape
    Constant(f64),
    /// A numeric header card broadcast over the quadrant shape
    HeaderKey(String),
}

/// Options of [`Quadrant::get_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadrantDataOptions {
    pub fill: DataFill,
    /// Block rebin factor; `None` keeps full resolution
    pub rebin: Option<usize>,
    pub rebin_stat: Statistic,
}

impl Default for QuadrantDataOptions {
    fn default() -> Self {
        Self {
            fill: DataFill::Data,
            rebin: None,
            rebin_stat: Statistic::NanMean,
        }
    }
}

/// Quadrant holding already corrected, sky-oriented data.
#[derive(Debug, Clone)]
pub struct Quadrant {
    qid: usize,
    ccdid: Option<usize>,
    data: DeferredArray,
    header: Option<Header>,
}

impl Quadrant {
    pub fn new(qid: usize, data: impl Into<DeferredArray>) -> Result<Self> {
        Ok(Self {
            qid: check_qid(qid)?,
            ccdid: None,
            data: data.into(),
            header: None,
        })
    }

    pub fn with_ccdid(mut self, ccdid: usize) -> Result<Self> {
        self.ccdid = Some(check_ccdid(ccdid)?);
        Ok(self)
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Some(header);
        self
    }

    /// Replace the data; the shape must not change.
    pub fn set_data(&mut self, data: impl Into<DeferredArray>) -> Result<()> {
        let data = data.into();
        if data.shape() != self.data.shape() {
            return Err(MosaicError::ShapeMismatch {
                what: format!("quadrant {} data", self.qid),
                expected: self.data.dim(),
                found: data.dim(),
            });
        }
        self.data = data;
        Ok(())
    }

    pub fn set_header(&mut self, header: Header) {
        self.header = Some(header);
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Numeric header card, when present
    pub fn header_value(&self, key: &str) -> Option<f64> {
        self.header.as_ref().and_then(|h| h.get_f64(key))
    }
}

impl QuadrantImage for Quadrant {
    type Options = QuadrantDataOptions;

    fn qid(&self) -> usize {
        self.qid
    }

    fn ccdid(&self) -> Option<usize> {
        self.ccdid
    }

    fn shape(&self) -> PixelShape {
        self.data.shape()
    }

    fn get_data(&self, options: &QuadrantDataOptions) -> Result<DeferredArray> {
        let shape = self.shape();
        let data = match &options.fill {
            DataFill::Data => self.data.clone(),
            DataFill::Constant(value) => DeferredArray::full(shape, *value),
            DataFill::HeaderKey(key) => {
                let value = self.header_value(key).ok_or_else(|| {
                    MosaicError::LookupFailure(format!(
                        "quadrant {} has no numeric header card '{key}'",
                        self.qid
                    ))
                })?;
                DeferredArray::full(shape, value)
            }
        };
        match options.rebin {
            Some(factor) => data.rebin(factor, options.rebin_stat),
            None => Ok(data),
        }
    }

    fn rebin_factor(options: &QuadrantDataOptions) -> usize {
        options.rebin.unwrap_or(1)
    }

    fn get_header(&self) -> Result<Header> {
        Ok(self.header.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2, ArrayView2};

    struct CentralPixel;

    impl AperturePhotometry for CentralPixel {
        fn measure(&self, image: ArrayView2<f64>, request: &ApertureRequest) -> Result<ApertureTable> {
            let n = request.n_sources();
            let flux = Array2::from_shape_fn((n, request.radii.len()), |(i, _)| {
                image[[request.y[i] as usize, request.x[i] as usize]]
            });
            ApertureTable::new(flux.clone(), flux.mapv(f64::sqrt), Array2::zeros(flux.dim()))
        }
    }

    #[test]
    fn test_constant_and_header_fills() {
        let quadrant = Quadrant::new(2, Array2::<f64>::zeros((4, 4)))
            .unwrap()
            .with_header(Header::new().with("GAIN", 6.2));

        let constant = QuadrantDataOptions {
            fill: DataFill::Constant(3.0),
            ..Default::default()
        };
        assert!(quadrant.get_data(&constant).unwrap().compute().unwrap().iter().all(|&v| v == 3.0));

        let gain = QuadrantDataOptions {
            fill: DataFill::HeaderKey("GAIN".to_string()),
            rebin: Some(2),
            ..Default::default()
        };
        let gain_map = quadrant.get_data(&gain).unwrap().compute().unwrap();
        assert_eq!(gain_map.dim(), (2, 2));
        assert_relative_eq!(gain_map[[1, 1]], 6.2);

        let missing = QuadrantDataOptions {
            fill: DataFill::HeaderKey("READNOI".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            quadrant.get_data(&missing),
            Err(MosaicError::LookupFailure(_))
        ));
    }

    #[test]
    fn test_identity() {
        assert!(Quadrant::new(0, Array2::<f64>::zeros((1, 1))).is_err());
        let quadrant = Quadrant::new(3, Array2::<f64>::zeros((1, 1))).unwrap();
        assert_eq!(quadrant.rcid(), None);
        let quadrant = quadrant.with_ccdid(11).unwrap();
        assert_eq!(quadrant.rcid(), Some(42));
        assert!(quadrant.get_header().unwrap().is_empty());
    }

    #[test]
    fn test_set_data_keeps_shape() {
        let mut quadrant = Quadrant::new(1, Array2::<f64>::zeros((2, 2))).unwrap();
        assert!(quadrant.set_data(Array2::<f64>::ones((2, 2))).is_ok());
        assert!(matches!(
            quadrant.set_data(Array2::<f64>::ones((3, 2))),
            Err(MosaicError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_aperture_pass_through() {
        let quadrant = Quadrant::new(1, array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let request = ApertureRequest::new(vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 2.0]).unwrap();
        let table = quadrant
            .get_aperture(&CentralPixel, &request, &QuadrantDataOptions::default())
            .unwrap();
        assert_eq!(table.column("f_0").unwrap(), array![2.0, 3.0]);
        assert_relative_eq!(table.error[[1, 1]], 3.0_f64.sqrt());
    }
}
