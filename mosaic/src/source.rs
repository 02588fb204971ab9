//! Raw pixel sources
//!
//! Reading pixel arrays and headers from files or remote stores belongs to
//! an external collaborator. A raw CCD file holds the four quadrant data
//! arrays in extensions 1..=4 and their overscan strips in extensions 5..=8;
//! each quadrant header sits with its data extension.

use ndarray::Array2;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{MosaicError, Result};
use crate::header::Header;

/// Extension holding the data of quadrant `qid`
pub fn data_extension(qid: usize) -> usize {
    qid
}

/// Extension holding the overscan of quadrant `qid`
pub fn overscan_extension(qid: usize) -> usize {
    qid + 4
}

/// Reader of raw pixel arrays and headers.
pub trait RawPixelSource: Send + Sync {
    /// 2D array stored in extension `ext` of `path`
    fn read_array(&self, path: &Path, ext: usize) -> Result<Array2<f64>>;

    /// Header of extension `ext` of `path`
    fn read_header(&self, path: &Path, ext: usize) -> Result<Header>;
}

/// Source serving arrays and headers held in memory.
///
/// Counts reads so callers can check that nothing is loaded before data is
/// forced.
#[derive(Debug, Default)]
pub struct InMemorySource {
    arrays: HashMap<(PathBuf, usize), Array2<f64>>,
    headers: HashMap<(PathBuf, usize), Header>,
    array_reads: AtomicUsize,
    header_reads: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_array(&mut self, path: impl Into<PathBuf>, ext: usize, array: Array2<f64>) {
        self.arrays.insert((path.into(), ext), array);
    }

    pub fn insert_header(&mut self, path: impl Into<PathBuf>, ext: usize, header: Header) {
        self.headers.insert((path.into(), ext), header);
    }

    /// Number of `read_array` calls served so far
    pub fn array_reads(&self) -> usize {
        self.array_reads.load(Ordering::SeqCst)
    }

    /// Number of `read_header` calls served so far
    pub fn header_reads(&self) -> usize {
        self.header_reads.load(Ordering::SeqCst)
    }

    /// Paths holding at least one array, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.arrays.keys().map(|(p, _)| p.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

impl RawPixelSource for InMemorySource {
    fn read_array(&self, path: &Path, ext: usize) -> Result<Array2<f64>> {
        self.array_reads.fetch_add(1, Ordering::SeqCst);
        self.arrays
            .get(&(path.to_path_buf(), ext))
            .cloned()
            .ok_or_else(|| {
                MosaicError::Source(format!("no array in extension {ext} of {}", path.display()))
            })
    }

    fn read_header(&self, path: &Path, ext: usize) -> Result<Header> {
        self.header_reads.fetch_add(1, Ordering::SeqCst);
        self.headers
            .get(&(path.to_path_buf(), ext))
            .cloned()
            .ok_or_else(|| {
                MosaicError::Source(format!("no header in extension {ext} of {}", path.display()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_layout() {
        assert_eq!(data_extension(3), 3);
        assert_eq!(overscan_extension(3), 7);
    }

    #[test]
    fn test_reads_are_counted() {
        let mut source = InMemorySource::new();
        source.insert_array("ccd01.fits", 1, Array2::zeros((2, 2)));
        source.insert_header("ccd01.fits", 1, Header::new().with("GAIN", 6.0));

        assert_eq!(source.array_reads(), 0);
        assert!(source.read_array(Path::new("ccd01.fits"), 1).is_ok());
        assert!(matches!(
            source.read_array(Path::new("ccd01.fits"), 5),
            Err(MosaicError::Source(_))
        ));
        assert_eq!(source.array_reads(), 2);
        assert_eq!(source.read_header(Path::new("ccd01.fits"), 1).unwrap().gain(), 6.0);
        assert_eq!(source.header_reads(), 1);
        assert_eq!(source.paths(), vec![PathBuf::from("ccd01.fits")]);
    }
}
