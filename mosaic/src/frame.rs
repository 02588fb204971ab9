//! Coordinate frames of a quadrant readout
//!
//! - `raw`: pixel order as stored by the acquisition system
//! - `read`: pixel order as seen by the amplifier, `(0, 0)` being the first
//!   pixel read (the frame the pocket-effect model works in)
//! - `sky`: north up, the deliverable orientation
//!
//! Every frame is an axis reversal relative to `raw`, so a transform between
//! two frames reverses each axis whose flip differs between them. Transforms
//! are therefore involutions and `sky <-> read` composes through `raw`.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MosaicError, Result};

/// A named quadrant coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    Raw,
    Read,
    Sky,
}

impl Frame {
    pub const ALL: [Frame; 3] = [Frame::Raw, Frame::Read, Frame::Sky];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frame::Raw => "raw",
            Frame::Read => "read",
            Frame::Sky => "sky",
        }
    }

    /// Axis reversals `(rows, cols)` taking a `raw` array of quadrant `qid`
    /// into this frame.
    ///
    /// `read` reverses columns for quadrants 2 and 3 and rows for quadrants
    /// 3 and 4; `sky` always reverses both.
    pub fn flips(&self, qid: usize) -> (bool, bool) {
        match self {
            Frame::Raw => (false, false),
            Frame::Read => (matches!(qid, 3 | 4), matches!(qid, 2 | 3)),
            Frame::Sky => (true, true),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frame {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Frame::Raw),
            "read" => Ok(Frame::Read),
            "sky" => Ok(Frame::Sky),
            _ => Err(MosaicError::InvalidFrame(s.to_string())),
        }
    }
}

/// Copy of `array` with the requested axes reversed.
pub fn flip(array: ArrayView2<f64>, rows: bool, cols: bool) -> Array2<f64> {
    let mut view = array;
    if rows {
        view.invert_axis(Axis(0));
    }
    if cols {
        view.invert_axis(Axis(1));
    }
    view.to_owned()
}

/// Axis reversals `(rows, cols)` taking quadrant `qid` data from `from` to `to`.
pub fn transform_flips(qid: usize, from: Frame, to: Frame) -> (bool, bool) {
    let (from_rows, from_cols) = from.flips(qid);
    let (to_rows, to_cols) = to.flips(qid);
    (from_rows != to_rows, from_cols != to_cols)
}

/// Reorder quadrant `qid` data from frame `from` to frame `to`.
///
/// Always returns an independently owned array, also when `from == to`.
pub fn reorder(array: ArrayView2<f64>, qid: usize, from: Frame, to: Frame) -> Array2<f64> {
    let (rows, cols) = transform_flips(qid, from, to);
    flip(array, rows, cols)
}

/// [`reorder`] with frames given by name; unknown names are `InvalidFrame`.
pub fn reorder_named(array: ArrayView2<f64>, qid: usize, from: &str, to: &str) -> Result<Array2<f64>> {
    Ok(reorder(array, qid, from.parse()?, to.parse()?))
}

/// Axis reversals `(rows, cols)` putting a raw overscan strip in display
/// orientation (first overscan column at index 0, north up).
pub fn overscan_display_flips(qid: usize) -> (bool, bool) {
    (true, matches!(qid, 2 | 3))
}
