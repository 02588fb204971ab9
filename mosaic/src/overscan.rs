//! Overscan bias model
//!
//! The overscan strip is read out after every row of science pixels and
//! carries the electronic bias but no light. The bias model is derived in
//! four steps:
//!
//! 1. put the strip in display orientation (first overscan column at index 0,
//!    north up) and keep the `userange` columns;
//! 2. collapse it to a 1D spectrum with a [`Statistic`];
//! 3. reject outliers farther than `sigma * MAD` from the median (set to NaN);
//! 4. fit a polynomial to the remaining samples and evaluate it at every
//!    index of the spectrum.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use shared::algo::{collapse_axis, fit_index_model, median_abs_deviation, nan_median, Statistic};
use shared::PixelShape;
use std::fmt;
use std::str::FromStr;

use crate::error::{MosaicError, Result};
use crate::frame::{flip, overscan_display_flips, Frame};

/// Representation of the overscan returned by `get_overscan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverscanView {
    /// 2D strip as stored
    Raw,
    /// 2D strip in display orientation, restricted to `userange`
    #[default]
    Data,
    /// 1D clipped spectrum of `Data`
    Spec,
    /// Polynomial model of `Spec`
    Model,
}

impl OverscanView {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverscanView::Raw => "raw",
            OverscanView::Data => "data",
            OverscanView::Spec => "spec",
            OverscanView::Model => "model",
        }
    }
}

impl fmt::Display for OverscanView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverscanView {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(OverscanView::Raw),
            "data" => Ok(OverscanView::Data),
            "spec" => Ok(OverscanView::Spec),
            "model" => Ok(OverscanView::Model),
            _ => Err(MosaicError::InvalidMode(format!(
                "overscan view must be raw, data, spec or model; {s} given"
            ))),
        }
    }
}

/// Direction along which the overscan is collapsed into a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollapseAxis {
    /// Reduce across columns: one value per row (the bias profile)
    #[default]
    Columns,
    /// Reduce across rows: one value per overscan column
    Rows,
}

impl CollapseAxis {
    /// ndarray axis that is reduced
    pub fn axis(&self) -> Axis {
        match self {
            CollapseAxis::Columns => Axis(1),
            CollapseAxis::Rows => Axis(0),
        }
    }
}

impl FromStr for CollapseAxis {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "columns" | "1" => Ok(CollapseAxis::Columns),
            "rows" | "0" => Ok(CollapseAxis::Rows),
            _ => Err(MosaicError::InvalidMode(format!(
                "collapse axis must be columns or rows; {s} given"
            ))),
        }
    }
}

/// Parameters of the overscan model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverscanConfig {
    /// Half-open `[start, end)` range of display-orientation columns to use
    pub userange: Option<(usize, usize)>,
    /// Statistic collapsing the strip into a spectrum
    pub statistic: Statistic,
    /// Clipping threshold in MADs; `None` or non-positive disables clipping
    pub sigma_clipping: Option<f64>,
    /// Degree of the fitted polynomial
    pub degree: usize,
    /// Collapse direction
    pub axis: CollapseAxis,
}

impl Default for OverscanConfig {
    fn default() -> Self {
        Self {
            userange: Some((20, 30)),
            statistic: Statistic::NanMedian,
            sigma_clipping: Some(3.0),
            degree: 3,
            axis: CollapseAxis::Columns,
        }
    }
}

impl OverscanConfig {
    /// Length of the spectrum (and model) derived from a strip of `overscan` shape
    pub fn spectrum_len(&self, overscan: PixelShape) -> usize {
        match self.axis {
            CollapseAxis::Columns => overscan.rows,
            CollapseAxis::Rows => match self.userange {
                Some((start, end)) => end.saturating_sub(start),
                None => overscan.cols,
            },
        }
    }
}

/// Output of `get_overscan`: a 2D strip or a 1D profile.
#[derive(Debug, Clone, PartialEq)]
pub enum OverscanOutput {
    Image(Array2<f64>),
    Profile(Array1<f64>),
}

impl OverscanOutput {
    pub fn into_image(self) -> Option<Array2<f64>> {
        match self {
            OverscanOutput::Image(image) => Some(image),
            OverscanOutput::Profile(_) => None,
        }
    }

    pub fn into_profile(self) -> Option<Array1<f64>> {
        match self {
            OverscanOutput::Profile(profile) => Some(profile),
            OverscanOutput::Image(_) => None,
        }
    }
}

/// Put a raw overscan strip of quadrant `qid` in display orientation.
pub fn display_overscan(raw: ArrayView2<f64>, qid: usize) -> Array2<f64> {
    let (rows, cols) = overscan_display_flips(qid);
    flip(raw, rows, cols)
}

/// Keep the `[start, end)` columns of `data`.
pub fn restrict_columns(data: ArrayView2<f64>, userange: Option<(usize, usize)>) -> Result<Array2<f64>> {
    match userange {
        None => Ok(data.to_owned()),
        Some((start, end)) => {
            if start >= end || end > data.ncols() {
                return Err(MosaicError::DimensionError(format!(
                    "overscan userange [{start}, {end}) invalid for {} columns",
                    data.ncols()
                )));
            }
            Ok(data.slice(s![.., start..end]).to_owned())
        }
    }
}

/// Replace samples farther than `sigma * MAD` from the median with NaN.
///
/// Returns the number of clipped samples.
pub fn sigma_clip(spectrum: &mut Array1<f64>, sigma: f64) -> usize {
    let values = spectrum.to_vec();
    let (Some(median), Some(mad)) = (nan_median(&values), median_abs_deviation(&values)) else {
        return 0;
    };
    let (low, high) = (median - sigma * mad, median + sigma * mad);

    let mut clipped = 0;
    for value in spectrum.iter_mut() {
        if *value > high || *value < low {
            *value = f64::NAN;
            clipped += 1;
        }
    }
    clipped
}

/// Collapse a display-orientation strip into a clipped 1D spectrum.
pub fn overscan_spectrum(data: ArrayView2<f64>, config: &OverscanConfig) -> Array1<f64> {
    let mut spectrum = collapse_axis(data, config.axis.axis(), config.statistic);
    if let Some(sigma) = config.sigma_clipping.filter(|s| *s > 0.0) {
        let clipped = sigma_clip(&mut spectrum, sigma);
        log::debug!("overscan spectrum: {clipped} of {} samples clipped", spectrum.len());
    }
    spectrum
}

/// Smooth 1D bias profile derived from an overscan strip.
#[derive(Debug, Clone, PartialEq)]
pub struct OverscanModel {
    /// Model evaluated at every spectrum index, display orientation
    pub profile: Array1<f64>,
    /// Polynomial degree used
    pub degree: usize,
    /// Clipping threshold used
    pub sigma_clipping: Option<f64>,
}

impl OverscanModel {
    /// Fit a model to an already collapsed spectrum.
    pub fn from_spectrum(spectrum: ArrayView1<f64>, config: &OverscanConfig) -> Result<Self> {
        let values = spectrum.to_vec();
        let profile = fit_index_model(&values, config.degree)?;
        Ok(Self {
            profile,
            degree: config.degree,
            sigma_clipping: config.sigma_clipping,
        })
    }

    /// Derive the model from the raw overscan strip of quadrant `qid`.
    pub fn from_overscan(raw: ArrayView2<f64>, qid: usize, config: &OverscanConfig) -> Result<Self> {
        let display = display_overscan(raw, qid);
        let data = restrict_columns(display.view(), config.userange)?;
        let spectrum = overscan_spectrum(data.view(), config);
        Self::from_spectrum(spectrum.view(), config)
    }

    pub fn len(&self) -> usize {
        self.profile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_empty()
    }

    /// Profile indexed like the rows of quadrant `qid` data sitting in `frame`.
    pub fn aligned_to(&self, qid: usize, frame: Frame) -> Array1<f64> {
        let (display_rows, _) = overscan_display_flips(qid);
        let (frame_rows, _) = frame.flips(qid);
        if display_rows != frame_rows {
            self.profile.slice(s![..;-1]).to_owned()
        } else {
            self.profile.clone()
        }
    }

    /// Subtract the profile from every column of `data`, which sits in `frame`.
    pub fn subtract_from(&self, data: ArrayView2<f64>, qid: usize, frame: Frame) -> Result<Array2<f64>> {
        subtract_profile(data, self.aligned_to(qid, frame).view())
    }
}

/// Subtract `profile[i]` from every pixel of row `i` of `data`.
pub fn subtract_profile(data: ArrayView2<f64>, profile: ArrayView1<f64>) -> Result<Array2<f64>> {
    if profile.len() != data.nrows() {
        return Err(MosaicError::ShapeMismatch {
            what: "overscan model length must match data rows".to_string(),
            expected: (profile.len(), data.ncols()),
            found: data.dim(),
        });
    }
    Ok(&data - &profile.insert_axis(Axis(1)))
}
