//! Error taxonomy for correction and assembly
//!
//! Every failure is local and synchronous: it is returned at the point of
//! detection and never downgraded to a warning. The only advisory in the
//! system (pocket-effect correction requested out of order) is logged, not
//! raised.

use shared::algo::stats::UnknownStatistic;
use shared::algo::{FitError, RebinError};
use thiserror::Error;

/// Errors raised by the correction pipeline and mosaic assembly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MosaicError {
    /// An array does not match the fixed shape declared for its component
    #[error("{what}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Unrecognized coordinate frame name
    #[error("invalid coordinate frame '{0}' (expected raw, read or sky)")]
    InvalidFrame(String),

    /// Unrecognized mode or statistic name
    #[error("invalid mode '{0}'")]
    InvalidMode(String),

    /// An assembly was asked for data while children are unset
    #[error("{0}")]
    MissingComponent(String),

    /// Calibration reference data absent for the requested sensor/date
    #[error("lookup failure: {0}")]
    LookupFailure(String),

    /// Rebin factor incompatible with the array shape
    #[error("dimension error: {0}")]
    DimensionError(String),

    /// Identifier outside its valid range
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Polynomial model could not be fitted
    #[error("overscan model fit failed: {0}")]
    Fit(#[from] FitError),

    /// Failure reported by an external data source
    #[error("source error: {0}")]
    Source(String),
}

impl From<RebinError> for MosaicError {
    fn from(err: RebinError) -> Self {
        MosaicError::DimensionError(err.to_string())
    }
}

impl From<UnknownStatistic> for MosaicError {
    fn from(err: UnknownStatistic) -> Self {
        MosaicError::InvalidMode(err.0)
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MosaicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebin_error_maps_to_dimension_error() {
        let err: MosaicError = RebinError::NotDivisible {
            rows: 10,
            cols: 10,
            factor: 3,
        }
        .into();
        assert!(matches!(err, MosaicError::DimensionError(msg) if msg.contains("10x10")));
    }

    #[test]
    fn test_unknown_statistic_is_invalid_mode() {
        let err: MosaicError = "mode".parse::<shared::algo::Statistic>().unwrap_err().into();
        assert_eq!(err, MosaicError::InvalidMode("mode".to_string()));
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = MosaicError::ShapeMismatch {
            what: "quadrant data".to_string(),
            expected: (3080, 3072),
            found: (3080, 3000),
        };
        assert_eq!(
            err.to_string(),
            "quadrant data: expected shape (3080, 3072), found (3080, 3000)"
        );
    }
}
