use crate::{StorageError, TensorDType};

/// Compressed sparse column data.
///
/// Column `j` holds the entries `col_ptr[j]..col_ptr[j + 1]` of `row_idx` and
/// `values`, with row indices strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct CscData<T> {
    rows: usize,
    cols: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: TensorDType> CscData<T> {
    pub fn new(
        rows: usize,
        cols: usize,
        col_ptr: Vec<usize>,
        row_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, StorageError> {
        let invalid = |details: String| StorageError::InvalidSparse(details);
        if col_ptr.len() != cols + 1 {
            return Err(invalid(format!(
                "expected {} column pointers, got {}",
                cols + 1,
                col_ptr.len()
            )));
        }
        if row_idx.len() != values.len() || col_ptr.last() != Some(&values.len()) {
            return Err(invalid(format!(
                "{} row indices and {} values for {} stored entries",
                row_idx.len(),
                values.len(),
                col_ptr.last().copied().unwrap_or_default()
            )));
        }
        for j in 0..cols {
            let (begin, end) = (col_ptr[j], col_ptr[j + 1]);
            let column = match row_idx.get(begin..end) {
                Some(column) if begin <= end => column,
                _ => {
                    return Err(invalid(format!(
                        "column {j} spans entries [{begin}, {end}) of {}",
                        row_idx.len()
                    )));
                }
            };
            if column.windows(2).any(|w| w[0] >= w[1]) || column.iter().any(|&r| r >= rows) {
                return Err(invalid(format!("column {j} has unsorted or out of range rows")));
            }
        }
        Ok(Self {
            rows,
            cols,
            col_ptr,
            row_idx,
            values,
        })
    }

    /// Keeps the non-zero entries of a column-major dense buffer.
    pub fn from_dense(data: &[T], rows: usize, cols: usize) -> Self {
        let mut col_ptr = Vec::with_capacity(cols + 1);
        let mut row_idx = vec![];
        let mut values = vec![];
        col_ptr.push(0);
        for column in data.chunks(rows.max(1)).take(cols) {
            for (r, &v) in column.iter().enumerate() {
                if !v.is_zero() {
                    row_idx.push(r);
                    values.push(v);
                }
            }
            col_ptr.push(values.len());
        }
        Self {
            rows,
            cols,
            col_ptr,
            row_idx,
            values,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        let (begin, end) = (self.col_ptr[col], self.col_ptr[col + 1]);
        match self.row_idx[begin..end].binary_search(&row) {
            Ok(i) => self.values[begin + i],
            Err(_) => T::zero(),
        }
    }

    /// Column-major dense copy of columns `first..first + count`.
    pub fn densify_columns(&self, first: usize, count: usize) -> Vec<T> {
        let mut dense = vec![T::zero(); self.rows * count];
        for (dst_col, col) in (first..first + count).enumerate() {
            for i in self.col_ptr[col]..self.col_ptr[col + 1] {
                dense[dst_col * self.rows + self.row_idx[i]] = self.values[i];
            }
        }
        dense
    }
}
