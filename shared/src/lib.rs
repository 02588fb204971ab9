//! Shared numeric components for raw image correction and mosaic assembly.
//!
//! This crate holds the domain-free pieces: reduction statistics, polynomial
//! fitting, block rebinning, pixel shapes and the single-flight deferred
//! evaluation handle used to build lazy array graphs.

pub mod algo;
pub mod deferred;
pub mod image_size;

pub use deferred::Deferred;
pub use image_size::PixelShape;
