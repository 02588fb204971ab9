//! Non-linearity correction
//!
//! The sensor response bends at high signal. It is corrected pixel by pixel
//! with a quadratic model:
//!
//! ```text
//! corrected = data / (a * data^2 + b * data + 1)
//! ```
//!
//! Coefficients `(a, b)` depend on the quadrant (`rcid`) and on the
//! observation date and come from an external reference table. Near-zero
//! denominators are not guarded: NaN and infinities propagate.

use chrono::NaiveDate;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MosaicError, Result};
use crate::ids::{ccdid_qid_to_rcid, NUM_RCIDS};

/// Quadratic non-linearity coefficients of one quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonlinearityCoefficients {
    pub a: f64,
    pub b: f64,
}

impl NonlinearityCoefficients {
    /// Coefficients leaving data unchanged
    pub const IDENTITY: Self = Self { a: 0.0, b: 0.0 };

    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Correct a single pixel value
    pub fn correct(&self, value: f64) -> f64 {
        value / (self.a * value * value + self.b * value + 1.0)
    }

    /// Correct every pixel of `data`
    pub fn apply(&self, data: ArrayView2<f64>) -> Array2<f64> {
        data.mapv(|v| self.correct(v))
    }
}

/// Reference table of non-linearity coefficients.
///
/// Implementations are read-only and shared between concurrent corrections.
pub trait NonlinearityTable: Send + Sync {
    /// Coefficients of quadrant `rcid` valid on `date`.
    ///
    /// Absence is a `LookupFailure`, never a silent identity.
    fn coefficients(&self, rcid: usize, date: NaiveDate) -> Result<NonlinearityCoefficients>;
}

/// One table row: coefficients of `rcid` valid from `valid_from` onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub rcid: usize,
    pub valid_from: NaiveDate,
    pub a: f64,
    pub b: f64,
}

/// JSON-backed coefficient table.
///
/// Each row applies from its `valid_from` date until superseded by a later
/// row for the same `rcid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    pub rows: Vec<CoefficientRow>,
}

impl CoefficientTable {
    pub fn new(rows: Vec<CoefficientRow>) -> Self {
        Self { rows }
    }

    /// Same coefficients for every quadrant from `valid_from` onwards.
    pub fn uniform(valid_from: NaiveDate, coefficients: NonlinearityCoefficients) -> Self {
        Self {
            rows: (0..NUM_RCIDS)
                .map(|rcid| CoefficientRow {
                    rcid,
                    valid_from,
                    a: coefficients.a,
                    b: coefficients.b,
                })
                .collect(),
        }
    }

    pub fn push(&mut self, row: CoefficientRow) {
        self.rows.push(row);
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> std::result::Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> std::result::Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl NonlinearityTable for CoefficientTable {
    fn coefficients(&self, rcid: usize, date: NaiveDate) -> Result<NonlinearityCoefficients> {
        let row = self
            .rows
            .iter()
            .filter(|row| row.rcid == rcid && row.valid_from <= date)
            .max_by_key(|row| row.valid_from)
            .ok_or_else(|| {
                MosaicError::LookupFailure(format!(
                    "no non-linearity coefficients for rcid {rcid} on {date}"
                ))
            })?;
        log::debug!(
            "non-linearity rcid {rcid} on {date}: a={}, b={} (valid from {})",
            row.a,
            row.b,
            row.valid_from
        );
        Ok(NonlinearityCoefficients::new(row.a, row.b))
    }
}

/// Resolve coefficients for quadrant `qid` of CCD `ccdid`.
pub fn lookup(
    table: &dyn NonlinearityTable,
    ccdid: usize,
    qid: usize,
    date: Option<NaiveDate>,
) -> Result<NonlinearityCoefficients> {
    let rcid = ccdid_qid_to_rcid(ccdid, qid)?;
    let date = date.ok_or_else(|| {
        MosaicError::LookupFailure(format!(
            "observation date unknown for rcid {rcid}; cannot resolve non-linearity coefficients"
        ))
    })?;
    table.coefficients(rcid, date)
}
