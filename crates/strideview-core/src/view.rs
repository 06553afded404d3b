use std::sync::Arc;

#[cfg(feature = "rand")]
use rand_distr::{Distribution, StandardNormal};

use crate::{
    cpu::{fetch, for_each_index},
    DType, Device, Enforcer, InvariantError, Matrix, MatrixBasePtr, Shape, StorageError,
    TensorDType, TensorShape,
};

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("Element type mismatch: the view holds {expected} but the storage object holds {actual}.")]
    DTypeMismatch { expected: DType, actual: DType },
    #[error("Shape {shape} addresses locations [{begin}, {end}) outside of a storage object with {len} elements.")]
    ShapeOutOfBounds {
        shape: String,
        begin: isize,
        end: isize,
        len: usize,
    },
    #[error("Input {input} of a reducing operation aliases the output {output}.")]
    OutputAliasesInput { input: usize, output: String },
    #[error("{fail_count} samples not close - AVGE={avg_error} MAE={max_abs_error} at {at:?}")]
    NotClose {
        fail_count: usize,
        avg_error: f64,
        max_abs_error: f64,
        at: Vec<usize>,
    },
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A strided window onto a shared storage object.
///
/// Views never own their storage: cloning a view, or building a new view over
/// the same [Matrix], shares the underlying allocation.
#[derive(Clone)]
pub struct TensorView<T: TensorDType> {
    shape: TensorShape,
    sob: Arc<Matrix<T>>,
}

impl<T: TensorDType> TensorView<T> {
    /// Builds a view over a type-erased storage object, which must hold `T`.
    pub fn new(sob: MatrixBasePtr, shape: TensorShape) -> Result<Self, TensorError> {
        let actual = sob.dt();
        let mismatch = || TensorError::DTypeMismatch {
            expected: T::dt(),
            actual,
        };
        if actual != T::dt() {
            return Err(mismatch());
        }
        let sob = Matrix::<T>::downcast(sob).ok_or_else(mismatch)?;
        Self::from_matrix(sob, shape)
    }

    pub fn from_matrix(sob: Arc<Matrix<T>>, shape: TensorShape) -> Result<Self, TensorError> {
        #[cfg(debug_assertions)]
        {
            let range = shape.location_range();
            let len = sob.num_elements();
            if shape.num_elements() > 0 && (range.start < 0 || range.end > len as isize) {
                return Err(TensorError::ShapeOutOfBounds {
                    shape: shape.to_string(),
                    begin: range.start,
                    end: range.end,
                    len,
                });
            }
        }
        Ok(Self { shape, sob })
    }

    /// Views the whole matrix as a `[rows x cols]` tensor.
    pub fn from_sob(sob: Arc<Matrix<T>>) -> Self {
        let shape = TensorShape::dense([sob.num_rows(), sob.num_cols()]);
        Self { shape, sob }
    }

    /// Creates a dense view over a fresh matrix holding `data` (axis 0 fastest).
    pub fn from_data(
        data: Vec<T>,
        dims: impl Into<Shape>,
        device: Device,
    ) -> Result<Self, TensorError> {
        let dims = dims.into();
        let (rows, cols) = matrix_dims(&dims);
        let sob = Matrix::from_data(data, rows, cols, device)?;
        Self::from_matrix(Arc::new(sob), TensorShape::dense(dims))
    }

    pub fn zeros(dims: impl Into<Shape>, device: Device) -> Self {
        let dims = dims.into();
        let (rows, cols) = matrix_dims(&dims);
        Self {
            shape: TensorShape::dense(dims),
            sob: Arc::new(Matrix::zeros(rows, cols, device)),
        }
    }

    #[cfg(feature = "rand")]
    pub fn randn(dims: impl Into<Shape>, device: Device) -> Self {
        let dims = dims.into();
        let (rows, cols) = matrix_dims(&dims);
        let mut rng = rand::thread_rng();
        let data = (0..dims.numel())
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut rng);
                T::from_f64_lossy(sample)
            })
            .collect::<Vec<_>>();
        let sob = Matrix::from_data(data, rows, cols, device)
            .unwrap_or_else(|_| Matrix::zeros(rows, cols, device));
        Self {
            shape: TensorShape::dense(dims),
            sob: Arc::new(sob),
        }
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dims(&self) -> &Shape {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn sob(&self) -> &Arc<Matrix<T>> {
        &self.sob
    }

    pub fn device(&self) -> Device {
        self.sob.device()
    }

    /// Another view onto the same storage object.
    pub fn reviewed(&self, shape: TensorShape) -> Result<Self, TensorError> {
        Self::from_matrix(self.sob.clone(), shape)
    }

    pub fn reshaped(&self, dims: impl Into<Shape>) -> Result<Self, TensorError> {
        let shape = self.shape.reshaped(dims)?;
        self.reviewed(shape)
    }

    /// The view's elements, axis 0 fastest.
    pub fn to_vec(&self) -> Result<Vec<T>, TensorError> {
        let data = self.sob.copy_to_vec();
        let mut out = Vec::with_capacity(self.shape.num_elements());
        for_each_index(
            self.shape.dims(),
            std::slice::from_ref(self.shape.strides()),
            &[self.shape.offset() as isize],
            |pos| {
                out.push(fetch(&data, pos[0])?);
                Ok(())
            },
        )?;
        Ok(out)
    }

    /// Storage locations touched by this view, in allocation coordinates.
    fn storage_range(&self) -> std::ops::Range<isize> {
        let range = self.shape.location_range();
        let base = self.sob.storage_offset() as isize;
        range.start + base..range.end + base
    }

    /// Do both views reach a common location of one storage allocation?
    pub fn overlaps(&self, other: &TensorView<T>) -> bool {
        if !self.sob.same_storage(&other.sob) {
            return false;
        }
        let (a, b) = (self.storage_range(), other.storage_range());
        a.start < b.end && b.start < a.end
    }

    pub(crate) fn check_not_aliased(&self, inputs: &[&TensorView<T>]) -> Result<(), TensorError> {
        match inputs.iter().position(|input| input.overlaps(self)) {
            Some(input) => Err(TensorError::OutputAliasesInput {
                input,
                output: self.shape.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Reinterprets a view of rank <= 2 as a matrix, sharing storage.
    ///
    /// The storage object itself is returned when the view covers it exactly.
    pub fn as_matrix(&self) -> Result<Arc<Matrix<T>>, TensorError> {
        Enforcer::assert_matrix_rank(&self.shape)?;
        let (rows, cols) = (self.shape.dim(0), self.shape.dim(1));
        let not_dense = |axis| InvariantError::NotDense {
            context: "as_matrix",
            shape: self.shape.to_string(),
            axis,
        };
        if rows > 1 && self.shape.strides()[0] != 1 {
            return Err(not_dense(0).into());
        }
        if cols > 1 && self.shape.strides()[1] != rows as isize {
            return Err(not_dense(1).into());
        }

        let offset = self.shape.offset();
        if offset == 0 && rows == self.sob.num_rows() && cols == self.sob.num_cols() {
            return Ok(self.sob.clone());
        }
        log::trace!("as_matrix: slicing {} out of {:?}", self.shape, self.sob);
        let mut slice = self.contiguous_slice()?;
        slice.reshape(rows, cols)?;
        Ok(Arc::new(slice))
    }

    /// A matrix over exactly the view's elements. Sparse storage is sliced by
    /// whole columns, dense storage as a single-row span.
    fn contiguous_slice(&self) -> Result<Matrix<T>, TensorError> {
        let offset = self.shape.offset();
        let numel = self.shape.num_elements();
        if self.sob.is_sparse() {
            let sob_rows = self.sob.num_rows();
            if sob_rows == 0 || offset % sob_rows != 0 || numel % sob_rows != 0 {
                return Err(InvariantError::SparseMisaligned(self.shape.to_string()).into());
            }
            return Ok(self
                .sob
                .column_slice(offset / sob_rows, numel / sob_rows, None)?);
        }
        Ok(self
            .sob
            .column_slice(offset, numel, Some(self.sob.num_elements()))?)
    }

    /// Can the storage object stand in for this (dense) view as is?
    pub(crate) fn can_pass_sob(&self) -> Result<bool, TensorError> {
        self.shape.verify_is_dense("get_sob_view_ptr")?;
        Ok(self.shape.offset() == 0 && self.shape.num_elements() == self.sob.num_elements())
    }

    /// The storage object if the view covers it exactly, otherwise a new
    /// matrix over the view's span of it. The view must be dense.
    pub fn get_sob_view_ptr(&self) -> Result<Arc<Matrix<T>>, TensorError> {
        if self.can_pass_sob()? {
            return Ok(self.sob.clone());
        }
        Ok(Arc::new(self.contiguous_slice()?))
    }

    pub fn all_close(&self, other: &Self, atol: f64, rtol: f64) -> Result<(), TensorError> {
        if self.dims() != other.dims() {
            return Err(InvariantError::IncompatibleDimensions {
                axis: 0,
                operand: 1,
                shape: other.shape.to_string(),
                op_shape: self.shape.to_string(),
            }
            .into());
        }
        let (lhs, rhs) = (self.to_vec()?, other.to_vec()?);
        let mut stats = CloseStats::new(atol, rtol);
        for (i, (a, b)) in lhs.iter().zip(rhs.iter()).enumerate() {
            stats.update(a.to_f64_lossy(), b.to_f64_lossy(), i);
        }

        if stats.fail_count > 0 {
            return Err(TensorError::NotClose {
                fail_count: stats.fail_count,
                avg_error: stats.avg_error(),
                max_abs_error: stats.max_abs_error,
                at: unravel(stats.max_abs_error_idx, self.dims()),
            });
        }
        log::debug!(
            "All close - AVGE={} MAE={} at {:?}",
            stats.avg_error(),
            stats.max_abs_error,
            unravel(stats.max_abs_error_idx, self.dims())
        );
        Ok(())
    }
}

impl<T: TensorDType> std::fmt::Debug for TensorView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorView")
            .field("shape", &self.shape)
            .field("sob", &self.sob)
            .finish()
    }
}

/// Matrix extents holding `dims` densely: axis 0 becomes the rows.
fn matrix_dims(dims: &Shape) -> (usize, usize) {
    let rows = dims.get(0).copied().unwrap_or(1);
    let cols = dims.numel().checked_div(rows).unwrap_or(0);
    (rows, cols)
}

fn unravel(mut linear: usize, dims: &Shape) -> Vec<usize> {
    dims.iter()
        .map(|&d| {
            let i = linear % d.max(1);
            linear /= d.max(1);
            i
        })
        .collect()
}

struct CloseStats {
    total_error: f64,
    max_abs_error: f64,
    max_abs_error_idx: usize,
    element_count: usize,
    fail_count: usize,
    atol: f64,
    rtol: f64,
}

impl CloseStats {
    fn new(atol: f64, rtol: f64) -> Self {
        Self {
            total_error: 0.0,
            max_abs_error: 0.0,
            max_abs_error_idx: 0,
            element_count: 0,
            fail_count: 0,
            atol,
            rtol,
        }
    }

    fn update(&mut self, a: f64, b: f64, index: usize) {
        let abs_diff = (a - b).abs();
        self.total_error += abs_diff;
        self.element_count += 1;

        if abs_diff > self.max_abs_error {
            self.max_abs_error = abs_diff;
            self.max_abs_error_idx = index;
        }

        if !(abs_diff <= self.atol + self.rtol * b.abs()) {
            self.fail_count += 1;
        }
    }

    fn avg_error(&self) -> f64 {
        self.total_error / self.element_count.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, Strides};

    #[test]
    fn type_checked_construction() {
        let sob: MatrixBasePtr = Arc::new(Matrix::<f32>::zeros(2, 3, Device::CPU));
        assert_eq!(sob.matrix_kind(), crate::MatrixKind::Dense);
        let err = TensorView::<f64>::new(sob.clone(), TensorShape::dense(shape![2, 3]));
        assert!(matches!(
            err,
            Err(TensorError::DTypeMismatch {
                expected: DType::F64,
                actual: DType::F32
            })
        ));
        let view = TensorView::<f32>::new(sob, TensorShape::dense(shape![3, 2])).unwrap();
        assert_eq!(view.dims(), &shape![3, 2]);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn out_of_bounds_shape_is_rejected() {
        let sob = Arc::new(Matrix::<f32>::zeros(2, 3, Device::CPU));
        let shape = TensorShape::dense(shape![2, 3]).with_offset(1);
        assert!(matches!(
            TensorView::from_matrix(sob, shape),
            Err(TensorError::ShapeOutOfBounds { end: 7, len: 6, .. })
        ));
    }

    #[test]
    fn as_matrix_returns_the_same_object() {
        let view = TensorView::<f32>::zeros(shape![4, 5], Device::CPU);
        let m = view.as_matrix().unwrap();
        assert!(Arc::ptr_eq(&m, view.sob()));
    }

    #[test]
    fn as_matrix_slices_and_reshapes() {
        let data = (0..12).map(|v| v as f32).collect();
        let view = TensorView::from_data(data, shape![3, 4], Device::CPU).unwrap();
        let inner = view
            .reviewed(TensorShape::dense(shape![2, 3]).with_offset(4))
            .unwrap();
        let m = inner.as_matrix().unwrap();
        assert!(!Arc::ptr_eq(&m, view.sob()));
        assert!(m.same_storage(view.sob()));
        assert_eq!((m.num_rows(), m.num_cols()), (2, 3));
        assert_eq!(m.copy_to_vec(), vec![4., 5., 6., 7., 8., 9.]);
    }

    #[test]
    fn as_matrix_rejects_bad_layouts() {
        let view = TensorView::<f32>::zeros(shape![2, 3, 4], Device::CPU);
        assert!(matches!(
            view.as_matrix(),
            Err(TensorError::Invariant(InvariantError::TooManyAxes(_)))
        ));
        let transposed = view
            .reviewed(TensorShape::new(shape![3, 2], Strides::from(vec![2, 1]), 0))
            .unwrap();
        assert!(matches!(
            transposed.as_matrix(),
            Err(TensorError::Invariant(InvariantError::NotDense { axis: 0, .. }))
        ));
    }

    #[test]
    fn sparse_as_matrix() {
        let dense: Vec<f32> = vec![1., 0., 0., 2., 3., 0.];
        let sob = Arc::new(Matrix::sparse_from_dense(&dense, 2, 3, Device::CPU).unwrap());
        let columns = TensorView::from_matrix(sob.clone(), TensorShape::dense(shape![2, 2]).with_offset(2))
            .unwrap();
        assert_eq!(columns.as_matrix().unwrap().copy_to_vec(), vec![0., 2., 3., 0.]);

        let misaligned = TensorView::from_matrix(sob.clone(), TensorShape::dense(shape![2]).with_offset(1))
            .unwrap();
        assert!(matches!(
            misaligned.as_matrix(),
            Err(TensorError::Invariant(InvariantError::SparseMisaligned(_)))
        ));

        let reshaped = TensorView::from_matrix(sob, TensorShape::dense(shape![4]).with_offset(2))
            .unwrap();
        assert!(matches!(
            reshaped.as_matrix(),
            Err(TensorError::Storage(StorageError::SparseReshape { .. }))
        ));
    }

    #[test]
    fn to_vec_follows_strides() {
        let data = (0..6).map(|v| v as f32).collect();
        let view = TensorView::from_data(data, shape![2, 3], Device::CPU).unwrap();
        let transposed = view
            .reviewed(TensorShape::new(shape![3, 2], Strides::from(vec![2, 1]), 0))
            .unwrap();
        assert_eq!(transposed.to_vec().unwrap(), vec![0., 2., 4., 1., 3., 5.]);
    }

    #[test]
    fn overlap_detection() {
        let view = TensorView::<f32>::zeros(shape![4, 4], Device::CPU);
        let left = view.reviewed(TensorShape::dense(shape![4, 2])).unwrap();
        let right = view
            .reviewed(TensorShape::dense(shape![4, 2]).with_offset(8))
            .unwrap();
        assert!(view.overlaps(&left));
        assert!(!left.overlaps(&right));
        let other = TensorView::<f32>::zeros(shape![4, 4], Device::CPU);
        assert!(!other.overlaps(&view));
    }

    #[test]
    fn get_sob_view_ptr_requires_density() {
        let view = TensorView::<f32>::zeros(shape![4, 4], Device::CPU);
        assert!(Arc::ptr_eq(&view.get_sob_view_ptr().unwrap(), view.sob()));
        let column = view
            .reviewed(TensorShape::dense(shape![4]).with_offset(4))
            .unwrap();
        let m = column.get_sob_view_ptr().unwrap();
        assert_eq!((m.num_rows(), m.num_cols()), (1, 4));
        let row = view
            .reviewed(TensorShape::new(shape![4], Strides::from(vec![4]), 0))
            .unwrap();
        assert!(row.get_sob_view_ptr().is_err());
    }

    #[test]
    fn reshaped_views_share_storage() {
        let view = TensorView::<f32>::zeros(shape![2, 6], Device::CPU);
        let r = view.reshaped(shape![3, 4]).unwrap();
        assert!(Arc::ptr_eq(r.sob(), view.sob()));
        assert!(view.reshaped(shape![5]).is_err());
    }
}
