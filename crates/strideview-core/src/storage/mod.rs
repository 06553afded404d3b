mod sparse;

pub use sparse::*;

use std::{any::Any, sync::Arc};

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::{DType, Device, TensorDType};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Sparse matrices can only be column sliced, reshaping {rows}x{cols} to {target_rows}x{target_cols} is not supported.")]
    SparseReshape {
        rows: usize,
        cols: usize,
        target_rows: usize,
        target_cols: usize,
    },
    #[error("{0}: the output matrix must be dense.")]
    SparseOutput(&'static str),
    #[error("Column slice [{first}, {first}+{count}) is out of bounds for a matrix with {cols} columns.")]
    SliceOutOfBounds {
        first: usize,
        count: usize,
        cols: usize,
    },
    #[error("Cannot reshape a {rows}x{cols} matrix to {target_rows}x{target_cols}.")]
    ReshapeMismatch {
        rows: usize,
        cols: usize,
        target_rows: usize,
        target_cols: usize,
    },
    #[error("{context}: dimension mismatch, {details}.")]
    DimensionMismatch {
        context: &'static str,
        details: String,
    },
    #[error("Storage location {location} is out of bounds for {len} elements.")]
    OutOfBounds { location: isize, len: usize },
    #[error("{len} elements cannot fill a {rows}x{cols} matrix.")]
    ElementCount { len: usize, rows: usize, cols: usize },
    #[error("Invalid sparse matrix: {0}.")]
    InvalidSparse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixKind {
    Dense,
    Sparse,
}

/// One storage allocation, shared by every [Matrix] window sliced from it.
#[derive(Debug)]
pub enum MatrixData<T> {
    Dense(Vec<T>),
    Sparse(CscData<T>),
}

impl<T: TensorDType> MatrixData<T> {
    /// Column-major dense copy of the whole allocation.
    pub(crate) fn densify(&self) -> Vec<T> {
        match self {
            MatrixData::Dense(v) => v.clone(),
            MatrixData::Sparse(csc) => csc.densify_columns(0, csc.cols()),
        }
    }
}

/// A column-major `rows x cols` window onto a shared allocation.
///
/// Element `(r, c)` of the window lives at `offset + r + c * rows` in the
/// allocation. Column slices share the allocation of the matrix they were cut
/// from, so writes through one are visible through the other.
#[derive(Clone)]
pub struct Matrix<T: TensorDType> {
    data: Arc<RwLock<MatrixData<T>>>,
    offset: usize,
    rows: usize,
    cols: usize,
    kind: MatrixKind,
    device: Device,
}

impl<T: TensorDType> Matrix<T> {
    fn from_storage(data: MatrixData<T>, rows: usize, cols: usize, device: Device) -> Self {
        let kind = match data {
            MatrixData::Dense(_) => MatrixKind::Dense,
            MatrixData::Sparse(_) => MatrixKind::Sparse,
        };
        Self {
            data: Arc::new(RwLock::new(data)),
            offset: 0,
            rows,
            cols,
            kind,
            device,
        }
    }

    pub fn zeros(rows: usize, cols: usize, device: Device) -> Self {
        Self::from_storage(
            MatrixData::Dense(vec![T::zero(); rows * cols]),
            rows,
            cols,
            device,
        )
    }

    /// Wraps column-major `data`.
    pub fn from_data(
        data: Vec<T>,
        rows: usize,
        cols: usize,
        device: Device,
    ) -> Result<Self, StorageError> {
        if data.len() != rows * cols {
            return Err(StorageError::ElementCount {
                len: data.len(),
                rows,
                cols,
            });
        }
        Ok(Self::from_storage(MatrixData::Dense(data), rows, cols, device))
    }

    pub fn from_csc(csc: CscData<T>, device: Device) -> Self {
        let (rows, cols) = (csc.rows(), csc.cols());
        Self::from_storage(MatrixData::Sparse(csc), rows, cols, device)
    }

    /// Sparse copy of column-major `data`.
    pub fn sparse_from_dense(
        data: &[T],
        rows: usize,
        cols: usize,
        device: Device,
    ) -> Result<Self, StorageError> {
        if data.len() != rows * cols {
            return Err(StorageError::ElementCount {
                len: data.len(),
                rows,
                cols,
            });
        }
        Ok(Self::from_csc(CscData::from_dense(data, rows, cols), device))
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_cols(&self) -> usize {
        self.cols
    }

    pub fn num_elements(&self) -> usize {
        self.rows * self.cols
    }

    pub fn kind(&self) -> MatrixKind {
        self.kind
    }

    pub fn is_sparse(&self) -> bool {
        self.kind == MatrixKind::Sparse
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Position of element `(0, 0)` within the allocation.
    pub fn storage_offset(&self) -> usize {
        self.offset
    }

    /// Do both windows look into the same allocation?
    pub fn same_storage(&self, other: &Matrix<T>) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Cuts columns `first..first + count` out of this matrix without copying.
    ///
    /// With `pretend_cols`, the window is first regarded as having that many
    /// columns (and `num_elements / pretend_cols` rows). Sparse matrices can only
    /// be sliced along their own columns.
    pub fn column_slice(
        &self,
        first: usize,
        count: usize,
        pretend_cols: Option<usize>,
    ) -> Result<Self, StorageError> {
        let (rows, cols) = match pretend_cols {
            Some(p) if p != self.cols => {
                let target_rows = if p == 0 { 0 } else { self.num_elements() / p };
                if self.is_sparse() {
                    return Err(StorageError::SparseReshape {
                        rows: self.rows,
                        cols: self.cols,
                        target_rows,
                        target_cols: p,
                    });
                }
                if target_rows * p != self.num_elements() {
                    return Err(StorageError::ReshapeMismatch {
                        rows: self.rows,
                        cols: self.cols,
                        target_rows,
                        target_cols: p,
                    });
                }
                (target_rows, p)
            }
            _ => (self.rows, self.cols),
        };
        if first + count > cols {
            return Err(StorageError::SliceOutOfBounds { first, count, cols });
        }
        log::trace!(
            "Column slice [{}, {}) of a {}x{} window at {}",
            first,
            first + count,
            rows,
            cols,
            self.offset
        );
        Ok(Self {
            data: self.data.clone(),
            offset: self.offset + first * rows,
            rows,
            cols: count,
            kind: self.kind,
            device: self.device,
        })
    }

    /// Reinterprets the window with new extents. Dense matrices only.
    pub fn reshape(&mut self, rows: usize, cols: usize) -> Result<(), StorageError> {
        if rows == self.rows && cols == self.cols {
            return Ok(());
        }
        if self.is_sparse() {
            return Err(StorageError::SparseReshape {
                rows: self.rows,
                cols: self.cols,
                target_rows: rows,
                target_cols: cols,
            });
        }
        if rows * cols != self.num_elements() {
            return Err(StorageError::ReshapeMismatch {
                rows: self.rows,
                cols: self.cols,
                target_rows: rows,
                target_cols: cols,
            });
        }
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }

    pub fn reshaped(&self, rows: usize, cols: usize) -> Result<Self, StorageError> {
        let mut m = self.clone();
        m.reshape(rows, cols)?;
        Ok(m)
    }

    /// The window's elements in column-major order.
    pub fn copy_to_vec(&self) -> Vec<T> {
        match &*self.data.read_recursive() {
            MatrixData::Dense(v) => v[self.offset..self.offset + self.num_elements()].to_vec(),
            MatrixData::Sparse(csc) => {
                let first = self.offset.checked_div(self.rows).unwrap_or(0);
                csc.densify_columns(first, self.cols)
            }
        }
    }

    /// A dense copy in a fresh allocation.
    pub fn to_dense(&self) -> Self {
        Self::from_storage(
            MatrixData::Dense(self.copy_to_vec()),
            self.rows,
            self.cols,
            self.device,
        )
    }

    pub fn get(&self, row: usize, col: usize) -> Result<T, StorageError> {
        if row >= self.rows || col >= self.cols {
            return Err(StorageError::OutOfBounds {
                location: (row + col * self.rows) as isize,
                len: self.num_elements(),
            });
        }
        Ok(match &*self.data.read_recursive() {
            MatrixData::Dense(v) => v[self.offset + row + col * self.rows],
            MatrixData::Sparse(csc) => csc.get(row, self.offset / self.rows + col),
        })
    }

    /// Read access to the whole allocation, in allocation coordinates.
    pub(crate) fn read_data(&self) -> RwLockReadGuard<'_, MatrixData<T>> {
        self.data.read_recursive()
    }

    /// Read access to a dense allocation, `None` for sparse matrices.
    pub(crate) fn read_dense(&self) -> Option<MappedRwLockReadGuard<'_, [T]>> {
        RwLockReadGuard::try_map(self.data.read_recursive(), |d| match d {
            MatrixData::Dense(v) => Some(v.as_slice()),
            MatrixData::Sparse(_) => None,
        })
        .ok()
    }

    /// Write access to a dense allocation, in allocation coordinates.
    pub(crate) fn write_dense(
        &self,
        context: &'static str,
    ) -> Result<MappedRwLockWriteGuard<'_, [T]>, StorageError> {
        RwLockWriteGuard::try_map(self.data.write(), |d| match d {
            MatrixData::Dense(v) => Some(v.as_mut_slice()),
            MatrixData::Sparse(_) => None,
        })
        .map_err(|_| StorageError::SparseOutput(context))
    }

    /// Recovers a typed matrix from a type-erased handle.
    pub fn downcast(base: MatrixBasePtr) -> Option<Arc<Self>> {
        base.into_any().downcast::<Self>().ok()
    }
}

impl<T: TensorDType> std::fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("dt", &T::dt())
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("kind", &self.kind)
            .field("device", &self.device)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Element-type erased matrix handle.
pub trait MatrixBase: std::fmt::Debug + Send + Sync + 'static {
    fn dt(&self) -> DType;
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    fn matrix_kind(&self) -> MatrixKind;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub type MatrixBasePtr = Arc<dyn MatrixBase>;

impl<T: TensorDType> MatrixBase for Matrix<T> {
    fn dt(&self) -> DType {
        T::dt()
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn matrix_kind(&self) -> MatrixKind {
        self.kind
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(rows: usize, cols: usize) -> Matrix<f32> {
        let data = (0..rows * cols).map(|v| v as f32).collect();
        Matrix::from_data(data, rows, cols, Device::CPU).unwrap()
    }

    #[test]
    fn column_slices_share_storage() {
        let m = iota(3, 4);
        let s = m.column_slice(1, 2, None).unwrap();
        assert!(s.same_storage(&m));
        assert_eq!(s.storage_offset(), 3);
        assert_eq!(s.copy_to_vec(), vec![3., 4., 5., 6., 7., 8.]);
        assert!(m.column_slice(3, 2, None).is_err());
    }

    #[test]
    fn pretend_columns_slices_a_row_span() {
        let m = iota(3, 4);
        let mut s = m.column_slice(2, 6, Some(12)).unwrap();
        assert_eq!((s.num_rows(), s.num_cols()), (1, 6));
        s.reshape(2, 3).unwrap();
        assert_eq!(s.get(1, 2).unwrap(), 7.);
        assert!(s.reshape(4, 2).is_err());
    }

    #[test]
    fn sparse_matrices_only_slice_columns() {
        let dense = [1f32, 0., 0., 2., 0., 3.];
        let m = Matrix::sparse_from_dense(&dense, 2, 3, Device::CPU).unwrap();
        assert_eq!(m.kind(), MatrixKind::Sparse);
        let s = m.column_slice(1, 2, None).unwrap();
        assert_eq!(s.copy_to_vec(), vec![0., 2., 0., 3.]);
        assert_eq!(s.get(1, 1).unwrap(), 3.);
        assert!(matches!(
            m.column_slice(0, 6, Some(6)),
            Err(StorageError::SparseReshape { .. })
        ));
        let mut s = s;
        assert!(matches!(s.reshape(1, 4), Err(StorageError::SparseReshape { .. })));
        assert_eq!(m.to_dense().kind(), MatrixKind::Dense);
    }

    #[test]
    fn type_erased_downcast() {
        let m: MatrixBasePtr = Arc::new(iota(2, 2));
        assert_eq!(m.dt(), DType::F32);
        assert!(Matrix::<f64>::downcast(m.clone()).is_none());
        let typed = Matrix::<f32>::downcast(m).unwrap();
        assert_eq!(typed.num_elements(), 4);
    }

    #[test]
    fn from_data_checks_length() {
        assert!(matches!(
            Matrix::<f32>::from_data(vec![0.; 5], 2, 3, Device::CPU),
            Err(StorageError::ElementCount { len: 5, .. })
        ));
    }
}
