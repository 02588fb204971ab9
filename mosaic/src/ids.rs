//! Sensor identifiers
//!
//! A focal plane holds 16 CCDs (`ccdid` 1..=16), each read by 4 amplifiers
//! (`qid` 1..=4). The focal-plane-wide quadrant index is
//! `rcid = 4 * (ccdid - 1) + (qid - 1)`, in `0..64`.

use crate::error::{MosaicError, Result};

/// Number of CCDs on the focal plane
pub const NUM_CCDS: usize = 16;
/// Number of quadrants (amplifiers) per CCD
pub const QUADRANTS_PER_CCD: usize = 4;
/// Number of quadrants on the focal plane
pub const NUM_RCIDS: usize = NUM_CCDS * QUADRANTS_PER_CCD;

/// Check that `qid` is in `1..=4`
pub fn check_qid(qid: usize) -> Result<usize> {
    if (1..=QUADRANTS_PER_CCD).contains(&qid) {
        Ok(qid)
    } else {
        Err(MosaicError::InvalidIdentifier(format!(
            "qid must be 1, 2, 3 or 4; {qid} given"
        )))
    }
}

/// Check that `ccdid` is in `1..=16`
pub fn check_ccdid(ccdid: usize) -> Result<usize> {
    if (1..=NUM_CCDS).contains(&ccdid) {
        Ok(ccdid)
    } else {
        Err(MosaicError::InvalidIdentifier(format!(
            "ccdid must be in 1..=16; {ccdid} given"
        )))
    }
}

/// Focal-plane quadrant index of quadrant `qid` on CCD `ccdid`
pub fn ccdid_qid_to_rcid(ccdid: usize, qid: usize) -> Result<usize> {
    check_ccdid(ccdid)?;
    check_qid(qid)?;
    Ok(QUADRANTS_PER_CCD * (ccdid - 1) + qid - 1)
}

/// Inverse of [`ccdid_qid_to_rcid`]
pub fn rcid_to_ccdid_qid(rcid: usize) -> Result<(usize, usize)> {
    if rcid >= NUM_RCIDS {
        return Err(MosaicError::InvalidIdentifier(format!(
            "rcid must be in 0..64; {rcid} given"
        )));
    }
    Ok((rcid / QUADRANTS_PER_CCD + 1, rcid % QUADRANTS_PER_CCD + 1))
}
