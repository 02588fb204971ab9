//! Shape-tracking lazy pixel arrays
//!
//! [`DeferredArray`] pairs a [`Deferred`] 2D array with its shape, known at
//! composition time. Shape checks (concatenation, rebin divisibility) are
//! therefore raised when a pipeline is built, before any pixel is read, and
//! every evaluated array is verified against the declared shape.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use shared::algo::{rebin, Statistic};
use shared::deferred::DeferredState;
use shared::{Deferred, PixelShape};
use std::sync::Arc;

use crate::error::{MosaicError, Result};

type ArrayHandle = Deferred<Array2<f64>, MosaicError>;

/// Lazy 2D pixel array with a statically known shape.
#[derive(Clone, Debug)]
pub struct DeferredArray {
    shape: PixelShape,
    inner: ArrayHandle,
}

fn check_shape(what: &str, shape: PixelShape, array: &Array2<f64>) -> Result<()> {
    if array.dim() != shape.dim() {
        return Err(MosaicError::ShapeMismatch {
            what: what.to_string(),
            expected: shape.dim(),
            found: array.dim(),
        });
    }
    Ok(())
}

impl DeferredArray {
    /// Wrap an existing array; the handle is already persisted.
    pub fn from_array(array: Array2<f64>) -> Self {
        Self {
            shape: PixelShape::from(array.dim()),
            inner: Deferred::ready(array),
        }
    }

    /// Record a computation producing an array of `shape`.
    ///
    /// The produced array is checked against `shape` when evaluated.
    pub fn from_fn<F>(shape: PixelShape, f: F) -> Self
    where
        F: Fn() -> Result<Array2<f64>> + Send + Sync + 'static,
    {
        Self {
            shape,
            inner: Deferred::new(move || {
                let array = f()?;
                check_shape("deferred array", shape, &array)?;
                Ok(array)
            }),
        }
    }

    /// Lazily filled constant array
    pub fn full(shape: PixelShape, value: f64) -> Self {
        Self::from_fn(shape, move || Ok(shape.filled(value)))
    }

    /// Lazily filled NaN array ("no data", used for gaps)
    pub fn nan(shape: PixelShape) -> Self {
        Self::full(shape, f64::NAN)
    }

    pub fn shape(&self) -> PixelShape {
        self.shape
    }

    pub fn dim(&self) -> (usize, usize) {
        self.shape.dim()
    }

    pub fn state(&self) -> DeferredState {
        self.inner.state()
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.is_persisted()
    }

    /// Shape-preserving lazy transform.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(ArrayView2<f64>) -> Result<Array2<f64>> + Send + Sync + 'static,
    {
        self.map_to(self.shape, f)
    }

    /// Lazy transform producing an array of a different `shape`.
    pub fn map_to<F>(&self, shape: PixelShape, f: F) -> Self
    where
        F: Fn(ArrayView2<f64>) -> Result<Array2<f64>> + Send + Sync + 'static,
    {
        Self {
            shape,
            inner: self.inner.map(move |array| {
                let out = f(array.view())?;
                check_shape("transformed array", shape, &out)?;
                Ok(out)
            }),
        }
    }

    /// Lazy transform taking a second array as input; both inputs are forced
    /// in parallel and the output keeps this array's shape.
    pub fn zip_map<F>(&self, other: &DeferredArray, f: F) -> Self
    where
        F: Fn(ArrayView2<f64>, ArrayView2<f64>) -> Result<Array2<f64>> + Send + Sync + 'static,
    {
        let shape = self.shape;
        let inner = Deferred::join(vec![self.inner.clone(), other.inner.clone()], move |parts| {
            let out = f(parts[0].view(), parts[1].view())?;
            check_shape("combined array", shape, &out)?;
            Ok(out)
        });
        Self { shape, inner }
    }

    /// Lazily concatenate `parts` along `axis`.
    ///
    /// Axis 0 stacks vertically (the first part on top), axis 1 horizontally.
    /// The parts must agree on the other axis.
    pub fn concatenate(axis: Axis, parts: &[DeferredArray]) -> Result<Self> {
        let first = parts.first().ok_or_else(|| {
            MosaicError::MissingComponent("nothing to concatenate".to_string())
        })?;

        let shape = match axis.index() {
            0 => {
                let cols = first.shape.cols;
                for part in parts {
                    if part.shape.cols != cols {
                        return Err(MosaicError::ShapeMismatch {
                            what: "vertical concatenation".to_string(),
                            expected: (part.shape.rows, cols),
                            found: part.dim(),
                        });
                    }
                }
                PixelShape::new(parts.iter().map(|p| p.shape.rows).sum(), cols)
            }
            1 => {
                let rows = first.shape.rows;
                for part in parts {
                    if part.shape.rows != rows {
                        return Err(MosaicError::ShapeMismatch {
                            what: "horizontal concatenation".to_string(),
                            expected: (rows, part.shape.cols),
                            found: part.dim(),
                        });
                    }
                }
                PixelShape::new(rows, parts.iter().map(|p| p.shape.cols).sum())
            }
            other => {
                return Err(MosaicError::DimensionError(format!(
                    "cannot concatenate 2D arrays along axis {other}"
                )))
            }
        };

        let handles = parts.iter().map(|p| p.inner.clone()).collect();
        let inner = Deferred::join(handles, move |arrays: &[Arc<Array2<f64>>]| {
            let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
            let out = concatenate(axis, &views)
                .map_err(|err| MosaicError::DimensionError(err.to_string()))?;
            check_shape("concatenated array", shape, &out)?;
            Ok(out)
        });
        Ok(Self { shape, inner })
    }

    /// Lazily rebin by `factor` using `stat` for each block.
    ///
    /// Fails immediately with `DimensionError` if `factor` does not divide
    /// both dimensions. A factor of 1 returns the handle unchanged.
    pub fn rebin(&self, factor: usize, stat: Statistic) -> Result<Self> {
        let shape = self.shape.rebinned(factor)?;
        if factor == 1 {
            return Ok(self.clone());
        }
        Ok(self.map_to(shape, move |array| Ok(rebin(array, factor, stat)?)))
    }

    /// Evaluate without caching and return a shared reference to the result.
    pub fn force(&self) -> Result<Arc<Array2<f64>>> {
        self.inner.force()
    }

    /// Evaluate without caching and return an owned array.
    pub fn compute(&self) -> Result<Array2<f64>> {
        let array = self.force()?;
        Ok(Arc::try_unwrap(array).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    /// Evaluate once, cache, and return a handle sharing the cached value.
    pub fn persist(&self) -> Result<Self> {
        let inner = self.inner.persist()?;
        log::debug!("persisted {} array", self.shape);
        Ok(Self {
            shape: self.shape,
            inner,
        })
    }

    /// Start persisting on the rayon pool and return immediately.
    pub fn persist_in_background(&self) {
        self.inner.persist_in_background();
    }
}

impl From<Array2<f64>> for DeferredArray {
    fn from(array: Array2<f64>) -> Self {
        Self::from_array(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(counter: Arc<AtomicUsize>, shape: PixelShape, value: f64) -> DeferredArray {
        DeferredArray::from_fn(shape, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(shape.filled(value))
        })
    }

    #[test]
    fn test_composition_does_not_evaluate() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = counted(counter.clone(), PixelShape::new(4, 6), 1.0);
        let b = counted(counter.clone(), PixelShape::new(4, 2), 2.0);

        let stacked = DeferredArray::concatenate(Axis(1), &[a, b]).unwrap();
        let binned = stacked.rebin(2, Statistic::Mean).unwrap();

        assert_eq!(binned.shape(), PixelShape::new(2, 4));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concatenate_values() {
        let top = DeferredArray::from_array(array![[1.0, 2.0]]);
        let bottom = DeferredArray::from_array(array![[3.0, 4.0]]);

        let vertical = DeferredArray::concatenate(Axis(0), &[top.clone(), bottom.clone()]).unwrap();
        assert_eq!(vertical.compute().unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);

        let horizontal = DeferredArray::concatenate(Axis(1), &[top, bottom]).unwrap();
        assert_eq!(horizontal.compute().unwrap(), array![[1.0, 2.0, 3.0, 4.0]]);
    }

    #[test]
    fn test_concatenate_rejects_incompatible_parts() {
        let a = DeferredArray::nan(PixelShape::new(2, 3));
        let b = DeferredArray::nan(PixelShape::new(3, 3));
        assert!(matches!(
            DeferredArray::concatenate(Axis(1), &[a.clone(), b.clone()]),
            Err(MosaicError::ShapeMismatch { .. })
        ));
        assert_eq!(
            DeferredArray::concatenate(Axis(0), &[a, b]).unwrap().shape(),
            PixelShape::new(5, 3)
        );
    }

    #[test]
    fn test_rebin_divisibility_checked_at_composition() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = counted(counter.clone(), PixelShape::new(6, 6), 1.0);
        assert!(matches!(
            a.rebin(4, Statistic::Mean),
            Err(MosaicError::DimensionError(_))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rebin_values() {
        let a = DeferredArray::from_array(array![
            [1.0, 3.0, 5.0, 5.0],
            [1.0, 3.0, 5.0, 5.0]
        ]);
        let binned = a.rebin(2, Statistic::Mean).unwrap().compute().unwrap();
        assert_relative_eq!(binned[[0, 0]], 2.0);
        assert_relative_eq!(binned[[0, 1]], 5.0);
    }

    #[test]
    fn test_declared_shape_is_verified() {
        let liar = DeferredArray::from_fn(PixelShape::new(2, 2), || Ok(Array2::zeros((3, 2))));
        assert!(matches!(
            liar.compute(),
            Err(MosaicError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_persist_evaluates_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = counted(counter.clone(), PixelShape::new(2, 2), 5.0);
        let doubled = a.map(|v| Ok(v.mapv(|x| 2.0 * x)));

        let persisted = doubled.persist().unwrap();
        assert!(doubled.is_persisted());
        for _ in 0..3 {
            assert_relative_eq!(persisted.compute().unwrap()[[1, 1]], 10.0);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zip_map() {
        let a = DeferredArray::full(PixelShape::new(2, 3), 3.0);
        let b = DeferredArray::full(PixelShape::new(2, 1), 1.0);
        let diff = a.zip_map(&b, |x, y| Ok(&x - &y));
        assert_eq!(diff.shape(), PixelShape::new(2, 3));
        assert!(diff.compute().unwrap().iter().all(|&v| v == 2.0));

        let wrong = a.zip_map(&b, |_, y| Ok(y.to_owned()));
        assert!(matches!(wrong.compute(), Err(MosaicError::ShapeMismatch { .. })));
    }
}
