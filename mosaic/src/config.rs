//! Pipeline configuration stored as JSON.
//!
//! One file describes a whole correction + assembly run: the per-quadrant
//! correction options, the CCD-level rebin, gap handling and the instrument
//! geometry. Every field has a default, so a partial file is valid.

use serde::{Deserialize, Serialize};
use shared::algo::Statistic;
use std::path::Path;

use crate::ccd::CcdDataOptions;
use crate::focal_plane::FocalPlaneDataOptions;
use crate::geometry::{FocalPlaneGaps, QuadrantGeometry};
use crate::raw::RawDataOptions;

/// Settings for correcting and assembling raw exposures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-quadrant correction options
    pub quadrant: RawDataOptions,
    /// CCD-level rebin factor, applied after quadrant assembly
    pub ccd_rebin: Option<usize>,
    /// Statistic for the CCD-level rebin
    pub ccd_stat: Statistic,
    /// Insert NaN strips for the inter-CCD gaps
    pub include_gaps: bool,
    /// Evaluate and cache assembled mosaics
    pub persist: bool,
    pub geometry: QuadrantGeometry,
    pub gaps: FocalPlaneGaps,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quadrant: RawDataOptions::default(),
            ccd_rebin: None,
            ccd_stat: Statistic::Mean,
            include_gaps: false,
            persist: false,
            geometry: QuadrantGeometry::default(),
            gaps: FocalPlaneGaps::default(),
        }
    }
}

impl PipelineConfig {
    /// Options for a single CCD
    pub fn ccd_options(&self) -> CcdDataOptions<RawDataOptions> {
        CcdDataOptions {
            quadrant: self.quadrant.clone(),
            rebin: self.ccd_rebin,
            rebin_stat: self.ccd_stat,
            persist: false,
        }
    }

    /// Options for a focal plane; `persist` applies to the final mosaic only
    pub fn focal_plane_options(&self) -> FocalPlaneDataOptions<RawDataOptions> {
        FocalPlaneDataOptions {
            ccd: self.ccd_options(),
            include_gaps: self.include_gaps,
            persist: self.persist,
        }
    }

    /// Total rebin factor, quadrant level times CCD level
    pub fn total_rebin(&self) -> usize {
        self.quadrant.rebin.unwrap_or(1) * self.ccd_rebin.unwrap_or(1)
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overscan::CollapseAxis;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "quadrant": { "corr_overscan": true, "rebin": 4, "overscan": { "degree": 1 } },
            "ccd_rebin": 2,
            "include_gaps": true
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!(config.quadrant.corr_overscan);
        assert!(!config.quadrant.corr_nl);
        assert!(config.quadrant.reorder);
        assert_eq!(config.quadrant.overscan.degree, 1);
        assert_eq!(config.quadrant.overscan.userange, Some((20, 30)));
        assert_eq!(config.quadrant.overscan.axis, CollapseAxis::Columns);
        assert_eq!(config.total_rebin(), 8);
        assert_eq!(config.ccd_stat, Statistic::Mean);
        assert_eq!(config.gaps, FocalPlaneGaps::WIDE_FIELD);

        let options = config.focal_plane_options();
        assert!(options.include_gaps);
        assert_eq!(options.ccd.rebin, Some(2));
        assert_eq!(options.ccd.quadrant.rebin, Some(4));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let config = PipelineConfig {
            quadrant: RawDataOptions {
                rebin_stat: Statistic::NanMedian,
                ..RawDataOptions::corrected()
            },
            persist: true,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(PipelineConfig::load_from_file(&path).unwrap(), config);

        std::fs::write(&path, "{ \"ccd_stat\": \"mode\" }").unwrap();
        let err = PipelineConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
