//! Raw quadrant correction and mosaic assembly for a multi-CCD camera.
//!
//! Raw exposures are read one amplifier quadrant at a time. Each quadrant is
//! corrected lazily (overscan bias, non-linearity, pocket effect), rebinned,
//! and reoriented to sky frame; four quadrants tile a CCD and sixteen CCDs
//! tile the focal plane, optionally with NaN strips for the physical gaps.
//!
//! Nothing is computed or read until a [`DeferredArray`] is forced or
//! persisted.
//!
//! ```no_run
//! use mosaic::{FocalPlaneDataOptions, RawDataOptions, SyntheticExposure};
//!
//! let (_source, plane) = SyntheticExposure::default().focal_plane()?;
//! let mut options = FocalPlaneDataOptions::<RawDataOptions>::default();
//! options.ccd.quadrant.corr_overscan = true;
//! options.include_gaps = true;
//! let mosaic = plane.get_data(&options)?.compute()?;
//! println!("{:?}", mosaic.dim());
//! # Ok::<(), mosaic::MosaicError>(())
//! ```

pub mod ccd;
pub mod config;
pub mod deferred_array;
pub mod error;
pub mod focal_plane;
pub mod frame;
pub mod geometry;
pub mod header;
pub mod ids;
pub mod nonlinearity;
pub mod overscan;
pub mod photometry;
pub mod pocket;
pub mod quadrant;
pub mod raw;
pub mod source;
pub mod synthetic;

pub use ccd::{Ccd, CcdDataOptions, Coverage};
pub use config::PipelineConfig;
pub use deferred_array::DeferredArray;
pub use error::{MosaicError, Result};
pub use focal_plane::{FocalPlane, FocalPlaneDataOptions, GapKind};
pub use frame::Frame;
pub use geometry::{CcdOrientation, FocalPlaneGaps, QuadrantGeometry};
pub use header::Header;
pub use nonlinearity::{CoefficientTable, NonlinearityCoefficients, NonlinearityTable};
pub use overscan::{OverscanConfig, OverscanModel, OverscanView};
pub use pocket::{PocketCorrector, PocketModelProvider, PocketRegistry};
pub use quadrant::{Quadrant, QuadrantImage};
pub use raw::{Calibration, RawCcd, RawDataOptions, RawFocalPlane, RawQuadrant};
pub use source::{InMemorySource, RawPixelSource};
pub use synthetic::SyntheticExposure;
