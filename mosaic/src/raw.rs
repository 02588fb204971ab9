//! Raw quadrant and its correction pipeline
//!
//! A [`RawQuadrant`] owns the raw pixel data and overscan strip of one
//! amplifier readout, both in `raw` frame, plus its header. Corrected data is
//! built lazily as a chain of [`DeferredArray`] stages:
//!
//! ```text
//! raw data [+ overscan] -> overscan subtraction -> non-linearity
//!     -> pocket effect -> rebin -> reorder to sky
//! ```
//!
//! Every stage is optional. The order is fixed. Calibration collaborators
//! (non-linearity table, pocket-effect models) are injected through
//! [`Calibration`] and resolved when the chain is composed where possible, so
//! configuration errors surface before any pixel is read.

use chrono::NaiveDate;
use ndarray::{s, Array2, Axis};
use serde::{Deserialize, Serialize};
use shared::algo::Statistic;
use shared::{Deferred, PixelShape};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ccd::Ccd;
use crate::deferred_array::DeferredArray;
use crate::error::{MosaicError, Result};
use crate::focal_plane::FocalPlane;
use crate::frame::{reorder, Frame};
use crate::geometry::QuadrantGeometry;
use crate::header::Header;
use crate::ids::{ccdid_qid_to_rcid, check_ccdid, check_qid};
use crate::nonlinearity::{self, NonlinearityCoefficients, NonlinearityTable};
use crate::overscan::{
    display_overscan, overscan_spectrum, restrict_columns, subtract_profile, OverscanConfig,
    OverscanModel, OverscanOutput, OverscanView,
};
use crate::pocket::{apply_pocket, PocketCorrector, PocketModelProvider};
use crate::quadrant::QuadrantImage;
use crate::source::{data_extension, overscan_extension, RawPixelSource};

type HeaderHandle = Deferred<Header, MosaicError>;

/// CCD assembled from raw quadrants
pub type RawCcd = Ccd<RawQuadrant>;

/// Focal plane assembled from raw quadrants
pub type RawFocalPlane = FocalPlane<RawQuadrant>;

/// Options of [`RawQuadrant::get_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDataOptions {
    /// Subtract the overscan bias model
    pub corr_overscan: bool,
    /// Apply the non-linearity correction
    pub corr_nl: bool,
    /// Apply the pocket-effect correction
    pub corr_pocket: bool,
    /// Block rebin factor; `None` keeps full resolution
    pub rebin: Option<usize>,
    /// Statistic reducing each rebin block
    pub rebin_stat: Statistic,
    /// Reorder the output to `sky` frame
    pub reorder: bool,
    /// Overscan model parameters
    pub overscan: OverscanConfig,
}

impl Default for RawDataOptions {
    fn default() -> Self {
        Self {
            corr_overscan: false,
            corr_nl: false,
            corr_pocket: false,
            rebin: None,
            rebin_stat: Statistic::NanMean,
            reorder: true,
            overscan: OverscanConfig::default(),
        }
    }
}

impl RawDataOptions {
    /// All corrections enabled
    pub fn corrected() -> Self {
        Self {
            corr_overscan: true,
            corr_nl: true,
            corr_pocket: true,
            ..Self::default()
        }
    }

    /// Stages these options run, in order, with any advisories.
    pub fn plan(&self) -> CorrectionPlan {
        let mut stages = Vec::new();
        let mut advisories = Vec::new();

        if self.corr_overscan {
            stages.push(CorrectionStage::Overscan);
        }
        if self.corr_nl {
            stages.push(CorrectionStage::Nonlinearity);
        }
        if self.corr_pocket {
            if !self.corr_overscan || !self.corr_nl {
                advisories.push(
                    "pocket-effect correction is expected to run after overscan and non-linearity correction"
                        .to_string(),
                );
            }
            stages.push(CorrectionStage::Pocket);
        }
        if let Some(factor) = self.rebin.filter(|f| *f != 1) {
            stages.push(CorrectionStage::Rebin(factor));
        }
        let input_frame = if self.corr_pocket { Frame::Read } else { Frame::Raw };
        let output_frame = if self.reorder {
            stages.push(CorrectionStage::Reorder);
            Frame::Sky
        } else {
            input_frame
        };

        CorrectionPlan {
            stages,
            advisories,
            input_frame,
            output_frame,
        }
    }
}

/// One stage of the correction chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStage {
    Overscan,
    Nonlinearity,
    Pocket,
    Rebin(usize),
    Reorder,
}

impl fmt::Display for CorrectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionStage::Overscan => write!(f, "overscan"),
            CorrectionStage::Nonlinearity => write!(f, "nonlinearity"),
            CorrectionStage::Pocket => write!(f, "pocket"),
            CorrectionStage::Rebin(factor) => write!(f, "rebin({factor})"),
            CorrectionStage::Reorder => write!(f, "reorder"),
        }
    }
}

/// Ordered stages of a correction chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionPlan {
    pub stages: Vec<CorrectionStage>,
    /// Non-fatal warnings about the requested combination
    pub advisories: Vec<String>,
    /// Frame the chain works in before the final reorder
    pub input_frame: Frame,
    /// Frame of the output array
    pub output_frame: Frame,
}

impl fmt::Display for CorrectionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        if names.is_empty() {
            write!(f, "no stages, {} frame", self.output_frame)
        } else {
            write!(f, "{} -> {} frame", names.join(" -> "), self.output_frame)
        }
    }
}

/// Calibration collaborators injected into raw quadrants.
#[derive(Clone, Default)]
pub struct Calibration {
    pub nonlinearity: Option<Arc<dyn NonlinearityTable>>,
    pub pocket: Option<Arc<dyn PocketModelProvider>>,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nonlinearity(mut self, table: Arc<dyn NonlinearityTable>) -> Self {
        self.nonlinearity = Some(table);
        self
    }

    pub fn with_pocket(mut self, provider: Arc<dyn PocketModelProvider>) -> Self {
        self.pocket = Some(provider);
        self
    }
}

impl fmt::Debug for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calibration")
            .field("nonlinearity", &self.nonlinearity.is_some())
            .field("pocket", &self.pocket.is_some())
            .finish()
    }
}

/// Data and overscan in `read` frame, see [`RawQuadrant::get_data_and_overscan`].
#[derive(Debug, Clone)]
pub enum DataAndOverscan {
    /// `rows x (cols + overscan_cols)`, overscan on the right
    Stacked(DeferredArray),
    Separate {
        data: DeferredArray,
        overscan: DeferredArray,
    },
}

/// Resolves non-linearity coefficients, possibly from the header, inside a
/// deferred stage.
#[derive(Clone)]
struct CoefficientLookup {
    table: Arc<dyn NonlinearityTable>,
    header: HeaderHandle,
    ccdid: Option<usize>,
    qid: usize,
    obs_date: Option<NaiveDate>,
}

impl CoefficientLookup {
    fn resolve(&self) -> Result<NonlinearityCoefficients> {
        if let (Some(ccdid), Some(date)) = (self.ccdid, self.obs_date) {
            return nonlinearity::lookup(self.table.as_ref(), ccdid, self.qid, Some(date));
        }
        let header = self.header.persist()?.force()?;
        let ccdid = self.ccdid.or_else(|| header.ccdid()).ok_or_else(|| {
            MosaicError::LookupFailure(format!(
                "quadrant {} has no CCD id; cannot resolve non-linearity coefficients",
                self.qid
            ))
        })?;
        let date = self.obs_date.or_else(|| header.obs_date());
        nonlinearity::lookup(self.table.as_ref(), ccdid, self.qid, date)
    }
}

/// One raw amplifier readout: data, overscan strip and header.
#[derive(Debug, Clone)]
pub struct RawQuadrant {
    qid: usize,
    ccdid: Option<usize>,
    geometry: QuadrantGeometry,
    data: DeferredArray,
    overscan: DeferredArray,
    header: HeaderHandle,
    obs_date: Option<NaiveDate>,
    calibration: Calibration,
}

impl RawQuadrant {
    /// Build a quadrant from raw-frame data and overscan.
    ///
    /// The geometry is taken from the arrays; data and overscan must have the
    /// same number of rows.
    pub fn new(qid: usize, data: impl Into<DeferredArray>, overscan: impl Into<DeferredArray>) -> Result<Self> {
        let data = data.into();
        let overscan = overscan.into();
        let geometry = QuadrantGeometry::new(data.shape(), overscan.shape())?;
        Self::with_geometry(qid, data, overscan, geometry)
    }

    /// Build a quadrant whose arrays must match `geometry` exactly.
    pub fn with_geometry(
        qid: usize,
        data: impl Into<DeferredArray>,
        overscan: impl Into<DeferredArray>,
        geometry: QuadrantGeometry,
    ) -> Result<Self> {
        let data = data.into();
        let overscan = overscan.into();
        for (what, expected, found) in [
            ("quadrant data", geometry.data, data.shape()),
            ("quadrant overscan", geometry.overscan, overscan.shape()),
        ] {
            if expected != found {
                return Err(MosaicError::ShapeMismatch {
                    what: what.to_string(),
                    expected: expected.dim(),
                    found: found.dim(),
                });
            }
        }
        Ok(Self {
            qid: check_qid(qid)?,
            ccdid: None,
            geometry,
            data,
            overscan,
            header: Deferred::ready(Header::new()),
            obs_date: None,
            calibration: Calibration::default(),
        })
    }

    /// Lazily load quadrant `qid` of the raw CCD file at `path`.
    ///
    /// Data comes from extension `qid`, overscan from extension `qid + 4` and
    /// the header from extension `qid`. Nothing is read until data is forced;
    /// the header is read once, on first use.
    pub fn from_source(
        source: Arc<dyn RawPixelSource>,
        path: impl Into<PathBuf>,
        ccdid: usize,
        qid: usize,
        geometry: QuadrantGeometry,
    ) -> Result<Self> {
        check_ccdid(ccdid)?;
        check_qid(qid)?;
        let path: Arc<Path> = Arc::from(path.into());

        let data = {
            let (source, path) = (Arc::clone(&source), Arc::clone(&path));
            DeferredArray::from_fn(geometry.data, move || source.read_array(&path, data_extension(qid)))
        };
        let overscan = {
            let (source, path) = (Arc::clone(&source), Arc::clone(&path));
            DeferredArray::from_fn(geometry.overscan, move || {
                source.read_array(&path, overscan_extension(qid))
            })
        };
        let header = Deferred::new(move || source.read_header(&path, data_extension(qid)));

        let mut quadrant = Self::with_geometry(qid, data, overscan, geometry)?;
        quadrant.ccdid = Some(ccdid);
        quadrant.header = header;
        Ok(quadrant)
    }

    /// Load the quadrant stored in extension `ext` of `path`, identifying it
    /// from its `AMP_ID` and `CCD_ID` header cards.
    ///
    /// Reads the header immediately; pixel data stays lazy.
    pub fn from_source_header(
        source: Arc<dyn RawPixelSource>,
        path: impl Into<PathBuf>,
        ext: usize,
        geometry: QuadrantGeometry,
    ) -> Result<Self> {
        let path = path.into();
        let header = source.read_header(&path, ext)?;
        let qid = header.qid().ok_or_else(|| {
            MosaicError::InvalidIdentifier(format!("no AMP_ID card in extension {ext} of {}", path.display()))
        })?;
        let ccdid = header.ccdid().ok_or_else(|| {
            MosaicError::InvalidIdentifier(format!("no CCD_ID card in extension {ext} of {}", path.display()))
        })?;
        let quadrant = Self::from_source(source, path, ccdid, qid, geometry)?;
        Ok(quadrant.with_header(header))
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Deferred::ready(header);
        self
    }

    pub fn with_ccdid(mut self, ccdid: usize) -> Result<Self> {
        self.ccdid = Some(check_ccdid(ccdid)?);
        Ok(self)
    }

    /// Observation date overriding the header's `OBSJD`
    pub fn with_obs_date(mut self, date: NaiveDate) -> Self {
        self.obs_date = Some(date);
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn geometry(&self) -> QuadrantGeometry {
        self.geometry
    }

    /// Raw data, `raw` frame
    pub fn data(&self) -> &DeferredArray {
        &self.data
    }

    /// Raw overscan strip, `raw` frame
    pub fn overscan(&self) -> &DeferredArray {
        &self.overscan
    }

    /// Header, read and cached on first use.
    pub fn header(&self) -> Result<Arc<Header>> {
        self.header.persist()?.force()
    }

    fn header_or_warn(&self, what: &str) -> Option<Arc<Header>> {
        match self.header() {
            Ok(header) => Some(header),
            Err(err) => {
                log::warn!("quadrant {}: cannot load header for {what}: {err}", self.qid);
                None
            }
        }
    }

    /// Gain in ADU per electron; NaN when unknown.
    pub fn gain(&self) -> f64 {
        self.header_or_warn("gain")
            .map(|h| h.gain())
            .unwrap_or(f64::NAN)
    }

    pub fn dark_current(&self) -> Option<f64> {
        self.header_or_warn("dark current")
            .and_then(|h| h.dark_current())
    }

    pub fn read_noise(&self) -> Option<f64> {
        self.header_or_warn("read noise")
            .and_then(|h| h.read_noise())
    }

    pub fn filter_name(&self) -> String {
        self.header_or_warn("filter name")
            .map(|h| h.filter_name())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn exposure_time(&self) -> f64 {
        self.header_or_warn("exposure time")
            .map(|h| h.exposure_time())
            .unwrap_or(f64::NAN)
    }

    /// Observation date: the explicit override or the header's `OBSJD`.
    pub fn obs_date(&self) -> Result<Option<NaiveDate>> {
        match self.obs_date {
            Some(date) => Ok(Some(date)),
            None => Ok(self.header()?.obs_date()),
        }
    }

    /// Reorder a quadrant array between frames, lazily.
    pub fn reorder_data(&self, array: &DeferredArray, from: Frame, to: Frame) -> DeferredArray {
        if from == to {
            return array.clone();
        }
        let qid = self.qid;
        array.map(move |a| Ok(reorder(a, qid, from, to)))
    }

    /// Data and overscan in `read` frame, stacked or separate.
    pub fn get_data_and_overscan(&self, stacked: bool) -> Result<DataAndOverscan> {
        let data = self.reorder_data(&self.data, Frame::Raw, Frame::Read);
        let overscan = self.reorder_data(&self.overscan, Frame::Raw, Frame::Read);
        if stacked {
            Ok(DataAndOverscan::Stacked(DeferredArray::concatenate(
                Axis(1),
                &[data, overscan],
            )?))
        } else {
            Ok(DataAndOverscan::Separate { data, overscan })
        }
    }

    fn coefficient_lookup(&self) -> Result<CoefficientLookup> {
        let table = self.calibration.nonlinearity.clone().ok_or_else(|| {
            MosaicError::LookupFailure(format!(
                "no non-linearity table configured for quadrant {}",
                self.qid
            ))
        })?;
        Ok(CoefficientLookup {
            table,
            header: self.header.clone(),
            ccdid: self.ccdid,
            qid: self.qid,
            obs_date: self.obs_date,
        })
    }

    /// Non-linearity coefficients of this quadrant on its observation date.
    pub fn nonlinearity_coefficients(&self) -> Result<NonlinearityCoefficients> {
        self.coefficient_lookup()?.resolve()
    }

    fn pocket_corrector(&self) -> Result<Arc<dyn PocketCorrector>> {
        let provider = self.calibration.pocket.as_ref().ok_or_else(|| {
            MosaicError::LookupFailure(format!(
                "no pocket-effect models configured for quadrant {}",
                self.qid
            ))
        })?;
        let ccdid = self.ccdid.ok_or_else(|| {
            MosaicError::LookupFailure(format!(
                "quadrant {} has no CCD id; cannot resolve its pocket-effect model",
                self.qid
            ))
        })?;
        provider.corrector(ccdid, self.qid)
    }

    /// Overscan bias model, forcing the overscan strip.
    pub fn overscan_model(&self, config: &OverscanConfig) -> Result<OverscanModel> {
        let overscan = self.overscan.force()?;
        OverscanModel::from_overscan(overscan.view(), self.qid, config)
    }

    /// Overscan in one of its representations.
    ///
    /// `corr_nl` and `corr_overscan` only apply to the 2D views (`Raw` and
    /// `Data`); non-linearity is applied first.
    pub fn get_overscan(
        &self,
        view: OverscanView,
        config: &OverscanConfig,
        corr_overscan: bool,
        corr_nl: bool,
    ) -> Result<OverscanOutput> {
        let raw = self.overscan.force()?;
        match view {
            OverscanView::Raw | OverscanView::Data => {
                let mut strip = if view == OverscanView::Data {
                    restrict_columns(display_overscan(raw.view(), self.qid).view(), config.userange)?
                } else {
                    raw.as_ref().clone()
                };
                if corr_nl {
                    strip = self.nonlinearity_coefficients()?.apply(strip.view());
                }
                if corr_overscan {
                    let model = OverscanModel::from_overscan(raw.view(), self.qid, config)?;
                    strip = if view == OverscanView::Data {
                        subtract_profile(strip.view(), model.profile.view())?
                    } else {
                        model.subtract_from(strip.view(), self.qid, Frame::Raw)?
                    };
                }
                Ok(OverscanOutput::Image(strip))
            }
            OverscanView::Spec => {
                let display = display_overscan(raw.view(), self.qid);
                let strip = restrict_columns(display.view(), config.userange)?;
                Ok(OverscanOutput::Profile(overscan_spectrum(strip.view(), config)))
            }
            OverscanView::Model => Ok(OverscanOutput::Profile(
                OverscanModel::from_overscan(raw.view(), self.qid, config)?.profile,
            )),
        }
    }

    /// [`RawQuadrant::get_overscan`] with the view given by name.
    pub fn get_overscan_named(
        &self,
        which: &str,
        config: &OverscanConfig,
        corr_overscan: bool,
        corr_nl: bool,
    ) -> Result<OverscanOutput> {
        self.get_overscan(which.parse()?, config, corr_overscan, corr_nl)
    }

    /// Corrected data as a lazy array.
    pub fn get_data(&self, options: &RawDataOptions) -> Result<DeferredArray> {
        let plan = options.plan();
        for advisory in &plan.advisories {
            log::warn!("quadrant {}: {advisory}", self.qid);
        }
        log::debug!("quadrant {} correction plan: {plan}", self.qid);

        let qid = self.qid;
        let frame = plan.input_frame;

        let lookup = if options.corr_nl {
            Some(self.coefficient_lookup()?)
        } else {
            None
        };
        let pocket = if options.corr_pocket {
            Some(self.pocket_corrector()?)
        } else {
            None
        };

        let mut current = match pocket {
            Some(_) => match self.get_data_and_overscan(true)? {
                DataAndOverscan::Stacked(stacked) => stacked,
                DataAndOverscan::Separate { data, .. } => data,
            },
            None => self.data.clone(),
        };

        if options.corr_overscan {
            let config = options.overscan.clone();
            let model_len = config.spectrum_len(self.geometry.overscan);
            if model_len != current.shape().rows {
                return Err(MosaicError::ShapeMismatch {
                    what: "overscan model length must match data rows".to_string(),
                    expected: (model_len, current.shape().cols),
                    found: current.dim(),
                });
            }
            current = current.zip_map(&self.overscan, move |data, overscan| {
                let model = OverscanModel::from_overscan(overscan, qid, &config)?;
                model.subtract_from(data, qid, frame)
            });
        }

        if let Some(lookup) = lookup {
            current = current.map(move |data| Ok(lookup.resolve()?.apply(data)));
        }

        if let Some(corrector) = pocket {
            let n_overscan = self.geometry.overscan.cols;
            current = current.map_to(self.geometry.data, move |stacked| {
                apply_pocket(corrector.as_ref(), stacked, n_overscan)
            });
        }

        if let Some(factor) = options.rebin {
            current = current.rebin(factor, options.rebin_stat)?;
        }

        if options.reorder {
            current = self.reorder_data(&current, frame, Frame::Sky);
        }
        Ok(current)
    }

    /// The `n` data columns closest to the overscan, paired with the first
    /// `n` overscan columns.
    ///
    /// Data is sky-oriented (from `options`, without rebinning); the overscan
    /// is the raw strip. Both are ordered so that column 0 is the one nearest
    /// the data/overscan boundary.
    pub fn get_lastdata_firstoverscan(
        &self,
        n: usize,
        options: &RawDataOptions,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let data_options = RawDataOptions {
            reorder: true,
            rebin: None,
            ..options.clone()
        };
        let data = self.get_data(&data_options)?.compute()?;
        let overscan = self
            .get_overscan(
                OverscanView::Raw,
                &options.overscan,
                options.corr_overscan,
                options.corr_nl,
            )?
            .into_image()
            .ok_or_else(|| MosaicError::InvalidMode("raw overscan view is 2D".to_string()))?;

        let width = data.ncols().min(overscan.ncols());
        if n == 0 || n > width {
            return Err(MosaicError::DimensionError(format!(
                "cannot take {n} boundary columns from {width}-column arrays"
            )));
        }

        if matches!(self.qid, 1 | 4) {
            Ok((
                data.slice(s![.., ..n]).to_owned(),
                overscan.slice(s![.., ..n]).to_owned(),
            ))
        } else {
            let (dc, oc) = (data.ncols(), overscan.ncols());
            Ok((
                data.slice(s![.., dc - n..;-1]).to_owned(),
                overscan.slice(s![.., oc - n..;-1]).to_owned(),
            ))
        }
    }
}

impl QuadrantImage for RawQuadrant {
    type Options = RawDataOptions;

    fn qid(&self) -> usize {
        self.qid
    }

    fn ccdid(&self) -> Option<usize> {
        self.ccdid
    }

    fn shape(&self) -> PixelShape {
        self.geometry.data
    }

    fn get_data(&self, options: &RawDataOptions) -> Result<DeferredArray> {
        RawQuadrant::get_data(self, options)
    }

    fn rebin_factor(options: &RawDataOptions) -> usize {
        options.rebin.unwrap_or(1)
    }

    fn get_header(&self) -> Result<Header> {
        Ok(self.header()?.as_ref().clone())
    }
}

impl RawQuadrant {
    /// Focal-plane quadrant index; requires the CCD id.
    pub fn require_rcid(&self) -> Result<usize> {
        let ccdid = self.ccdid.ok_or_else(|| {
            MosaicError::InvalidIdentifier(format!("quadrant {} has no CCD id", self.qid))
        })?;
        ccdid_qid_to_rcid(ccdid, self.qid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonlinearity::CoefficientTable;
    use crate::pocket::PocketRegistry;
    use crate::source::InMemorySource;
    use approx::assert_relative_eq;
    use ndarray::{array, ArrayView2};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()
    }

    fn ramp(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64)
    }

    /// Doubles every pixel of the data region, leaves overscan columns alone.
    struct DoubleData;

    impl PocketCorrector for DoubleData {
        fn correct(&self, data: ArrayView2<f64>, n_overscan: usize) -> Result<Array2<f64>> {
            let mut out = data.to_owned();
            let cols = out.ncols();
            out.slice_mut(s![.., ..cols - n_overscan]).mapv_inplace(|v| 2.0 * v);
            Ok(out)
        }
    }

    fn calibration(a: f64, b: f64) -> Calibration {
        let mut pockets = PocketRegistry::new();
        pockets.insert(1, 3, Arc::new(DoubleData)).unwrap();
        Calibration::new()
            .with_nonlinearity(Arc::new(CoefficientTable::uniform(
                NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
                NonlinearityCoefficients::new(a, b),
            )))
            .with_pocket(Arc::new(pockets))
    }

    #[test]
    fn test_default_output_is_sky_oriented_raw_data() {
        let data = ramp(4, 6);
        let quadrant = RawQuadrant::new(2, data.clone(), Array2::<f64>::zeros((4, 3))).unwrap();
        let out = quadrant.get_data(&RawDataOptions::default()).unwrap().compute().unwrap();
        assert_eq!(out, reorder(data.view(), 2, Frame::Raw, Frame::Sky));

        let raw = RawDataOptions {
            reorder: false,
            ..Default::default()
        };
        assert_eq!(quadrant.get_data(&raw).unwrap().compute().unwrap(), data);
    }

    #[test]
    fn test_constant_overscan_correction_zeroes_data() {
        for qid in 1..=4 {
            let quadrant = RawQuadrant::new(
                qid,
                Array2::from_elem((40, 8), 10.0),
                Array2::from_elem((40, 30), 10.0),
            )
            .unwrap();
            let options = RawDataOptions {
                corr_overscan: true,
                ..Default::default()
            };
            let out = quadrant.get_data(&options).unwrap().compute().unwrap();
            assert!(out.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_overscan_gradient_is_removed_row_by_row() {
        // Bias grows with raw row index in both data and overscan.
        let bias = |r: usize| 500.0 + 3.0 * r as f64;
        for qid in 1..=4 {
            let data = Array2::from_shape_fn((30, 6), |(r, _)| bias(r));
            let overscan = Array2::from_shape_fn((30, 30), |(r, _)| bias(r));
            let quadrant = RawQuadrant::new(qid, data, overscan).unwrap();
            let options = RawDataOptions {
                corr_overscan: true,
                reorder: false,
                ..Default::default()
            };
            let out = quadrant.get_data(&options).unwrap().compute().unwrap();
            for &v in out.iter() {
                assert_relative_eq!(v, 0.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_nonlinearity_applied_after_overscan() {
        let quadrant = RawQuadrant::new(
            1,
            Array2::from_elem((40, 4), 110.0),
            Array2::from_elem((40, 30), 10.0),
        )
        .unwrap()
        .with_ccdid(1)
        .unwrap()
        .with_obs_date(date())
        .with_calibration(calibration(1e-4, 0.0));

        let options = RawDataOptions {
            corr_overscan: true,
            corr_nl: true,
            ..Default::default()
        };
        let out = quadrant.get_data(&options).unwrap().compute().unwrap();
        assert_relative_eq!(out[[0, 0]], 100.0 / 2.0);
    }

    #[test]
    fn test_identity_nonlinearity() {
        let data = ramp(4, 4);
        let quadrant = RawQuadrant::new(4, data.clone(), Array2::<f64>::zeros((4, 30)))
            .unwrap()
            .with_ccdid(7)
            .unwrap()
            .with_obs_date(date())
            .with_calibration(calibration(0.0, 0.0));
        let options = RawDataOptions {
            corr_nl: true,
            reorder: false,
            ..Default::default()
        };
        assert_eq!(quadrant.get_data(&options).unwrap().compute().unwrap(), data);
    }

    #[test]
    fn test_missing_table_fails_at_composition() {
        let quadrant = RawQuadrant::new(1, ramp(2, 2), Array2::<f64>::zeros((2, 3))).unwrap();
        let options = RawDataOptions {
            corr_nl: true,
            ..Default::default()
        };
        assert!(matches!(
            quadrant.get_data(&options),
            Err(MosaicError::LookupFailure(_))
        ));
    }

    #[test]
    fn test_nonlinearity_date_from_header() {
        let header = Header::new().with("OBSJD", 2_459_000.5).with("CCD_ID", 1_i64);
        let quadrant = RawQuadrant::new(1, Array2::from_elem((2, 2), 10.0), Array2::<f64>::zeros((2, 3)))
            .unwrap()
            .with_header(header)
            .with_calibration(calibration(0.0, 0.1));
        let coeffs = quadrant.nonlinearity_coefficients().unwrap();
        assert_relative_eq!(coeffs.b, 0.1);

        let undated = RawQuadrant::new(1, ramp(2, 2), Array2::<f64>::zeros((2, 3)))
            .unwrap()
            .with_ccdid(1)
            .unwrap()
            .with_calibration(calibration(0.0, 0.1));
        let options = RawDataOptions {
            corr_nl: true,
            ..Default::default()
        };
        let deferred = undated.get_data(&options).unwrap();
        assert!(matches!(deferred.compute(), Err(MosaicError::LookupFailure(_))));
    }

    #[test]
    fn test_pocket_runs_in_read_frame_and_drops_overscan() {
        let data = ramp(4, 6);
        let quadrant = RawQuadrant::new(3, data.clone(), Array2::<f64>::zeros((4, 3)))
            .unwrap()
            .with_ccdid(1)
            .unwrap()
            .with_obs_date(date())
            .with_calibration(calibration(0.0, 0.0));

        let options = RawDataOptions {
            corr_pocket: true,
            ..Default::default()
        };
        assert_eq!(options.plan().advisories.len(), 1);

        let out = quadrant.get_data(&options).unwrap().compute().unwrap();
        let expected = reorder(data.view(), 3, Frame::Raw, Frame::Sky).mapv(|v| 2.0 * v);
        assert_eq!(out, expected);

        let in_read = RawDataOptions {
            corr_pocket: true,
            reorder: false,
            ..Default::default()
        };
        let out = quadrant.get_data(&in_read).unwrap().compute().unwrap();
        assert_eq!(out.dim(), (4, 6));
        assert_eq!(out, reorder(data.view(), 3, Frame::Raw, Frame::Read).mapv(|v| 2.0 * v));
    }

    #[test]
    fn test_pocket_without_model_fails() {
        let quadrant = RawQuadrant::new(2, ramp(4, 6), Array2::<f64>::zeros((4, 3)))
            .unwrap()
            .with_ccdid(1)
            .unwrap()
            .with_calibration(calibration(0.0, 0.0));
        let options = RawDataOptions {
            corr_pocket: true,
            ..Default::default()
        };
        assert!(matches!(
            quadrant.get_data(&options),
            Err(MosaicError::LookupFailure(_))
        ));
    }

    #[test]
    fn test_full_plan_has_no_advisory() {
        let plan = RawDataOptions {
            rebin: Some(4),
            ..RawDataOptions::corrected()
        }
        .plan();
        assert!(plan.advisories.is_empty());
        assert_eq!(
            plan.stages,
            vec![
                CorrectionStage::Overscan,
                CorrectionStage::Nonlinearity,
                CorrectionStage::Pocket,
                CorrectionStage::Rebin(4),
                CorrectionStage::Reorder,
            ]
        );
        assert_eq!(plan.output_frame, Frame::Sky);
        assert_eq!(plan.to_string(), "overscan -> nonlinearity -> pocket -> rebin(4) -> reorder -> sky frame");
    }

    #[test]
    fn test_rebin_must_divide_shape() {
        let quadrant = RawQuadrant::new(1, ramp(6, 6), Array2::<f64>::zeros((6, 3))).unwrap();
        let options = RawDataOptions {
            rebin: Some(4),
            ..Default::default()
        };
        assert!(matches!(
            quadrant.get_data(&options),
            Err(MosaicError::DimensionError(_))
        ));
        let options = RawDataOptions {
            rebin: Some(3),
            ..Default::default()
        };
        assert_eq!(quadrant.get_data(&options).unwrap().dim(), (2, 2));
    }

    #[test]
    fn test_overscan_views() {
        let overscan = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let quadrant = RawQuadrant::new(2, Array2::<f64>::zeros((2, 2)), overscan.clone()).unwrap();
        let config = OverscanConfig {
            userange: Some((1, 3)),
            sigma_clipping: None,
            degree: 0,
            ..Default::default()
        };

        let raw = quadrant.get_overscan(OverscanView::Raw, &config, false, false).unwrap();
        assert_eq!(raw.into_image().unwrap(), overscan);

        let data = quadrant.get_overscan(OverscanView::Data, &config, false, false).unwrap();
        assert_eq!(data.into_image().unwrap(), array![[5.0, 4.0], [2.0, 1.0]]);

        let spec = quadrant.get_overscan(OverscanView::Spec, &config, false, false).unwrap();
        assert_eq!(spec.into_profile().unwrap(), array![4.5, 1.5]);

        let model = quadrant.get_overscan(OverscanView::Model, &config, false, false).unwrap();
        let model = model.into_profile().unwrap();
        assert_relative_eq!(model[0], 3.0);
        assert_relative_eq!(model[1], 3.0);

        assert!(matches!(
            quadrant.get_overscan_named("image", &config, false, false),
            Err(MosaicError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_data_and_overscan_stacked_in_read_frame() {
        let data = ramp(2, 3);
        let overscan = array![[100.0, 101.0], [102.0, 103.0]];
        let quadrant = RawQuadrant::new(3, data.clone(), overscan.clone()).unwrap();
        let DataAndOverscan::Stacked(stacked) = quadrant.get_data_and_overscan(true).unwrap() else {
            panic!("expected stacked output");
        };
        let stacked = stacked.compute().unwrap();
        assert_eq!(stacked.dim(), (2, 5));
        assert_eq!(
            stacked.slice(s![.., 3..]),
            reorder(overscan.view(), 3, Frame::Raw, Frame::Read)
        );
        assert!(matches!(
            quadrant.get_data_and_overscan(false).unwrap(),
            DataAndOverscan::Separate { .. }
        ));
    }

    #[test]
    fn test_lastdata_firstoverscan() {
        let data = ramp(2, 4);
        let overscan = array![[10.0, 11.0, 12.0], [13.0, 14.0, 15.0]];

        let q1 = RawQuadrant::new(1, data.clone(), overscan.clone()).unwrap();
        let (last, first) = q1.get_lastdata_firstoverscan(1, &RawDataOptions::default()).unwrap();
        let sky = reorder(data.view(), 1, Frame::Raw, Frame::Sky);
        assert_eq!(last, sky.slice(s![.., ..1]));
        assert_eq!(first, array![[10.0], [13.0]]);

        let q2 = RawQuadrant::new(2, data.clone(), overscan.clone()).unwrap();
        let (last, first) = q2.get_lastdata_firstoverscan(2, &RawDataOptions::default()).unwrap();
        let sky = reorder(data.view(), 2, Frame::Raw, Frame::Sky);
        assert_eq!(last, array![[sky[[0, 3]], sky[[0, 2]]], [sky[[1, 3]], sky[[1, 2]]]]);
        assert_eq!(first, array![[12.0, 11.0], [15.0, 14.0]]);

        assert!(q2.get_lastdata_firstoverscan(5, &RawDataOptions::default()).is_err());
    }

    #[test]
    fn test_from_source_is_lazy() {
        let mut source = InMemorySource::new();
        source.insert_array("raw_c01.fits", 2, Array2::from_elem((4, 4), 7.0));
        source.insert_array("raw_c01.fits", 6, Array2::from_elem((4, 2), 7.0));
        source.insert_header("raw_c01.fits", 2, Header::new().with("GAIN", 5.5));
        let source = Arc::new(source);

        let geometry = QuadrantGeometry::new(PixelShape::new(4, 4), PixelShape::new(4, 2)).unwrap();
        let quadrant = RawQuadrant::from_source(source.clone(), "raw_c01.fits", 1, 2, geometry).unwrap();
        let options = RawDataOptions {
            corr_overscan: true,
            rebin: Some(2),
            overscan: OverscanConfig {
                userange: None,
                ..Default::default()
            },
            ..Default::default()
        };
        let deferred = quadrant.get_data(&options).unwrap();
        assert_eq!(source.array_reads(), 0);
        assert_eq!(source.header_reads(), 0);

        let out = deferred.compute().unwrap();
        assert_eq!(out.dim(), (2, 2));
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(source.array_reads(), 2);

        assert_relative_eq!(quadrant.gain(), 5.5);
        assert_relative_eq!(quadrant.gain(), 5.5);
        assert_eq!(source.header_reads(), 1);
        assert_eq!(quadrant.require_rcid().unwrap(), 1);
    }

    #[test]
    fn test_header_failure_is_not_fatal_for_accessors() {
        let source = Arc::new(InMemorySource::new());
        let quadrant =
            RawQuadrant::from_source(source, "missing.fits", 3, 1, QuadrantGeometry::default()).unwrap();
        assert!(quadrant.gain().is_nan());
        assert_eq!(quadrant.read_noise(), None);
        assert_eq!(quadrant.filter_name(), "unknown");
        assert!(quadrant.header().is_err());
    }

    #[test]
    fn test_geometry_enforced() {
        let result = RawQuadrant::with_geometry(
            1,
            Array2::<f64>::zeros((3080, 3000)),
            Array2::<f64>::zeros((3080, 30)),
            QuadrantGeometry::default(),
        );
        assert!(matches!(result, Err(MosaicError::ShapeMismatch { .. })));
    }
}
