use std::ops::Range;

use crate::{InvariantError, Shape, Strides};

/// Describes how a tensor is laid out inside a flat storage object.
///
/// Each axis has an extent and a stride, and the whole shape sits at `offset`
/// elements from the start of the storage object. Axis 0 varies fastest when the
/// shape is dense.
#[derive(Clone, PartialEq, Eq, Hash, Default, derive_new::new)]
pub struct TensorShape {
    dims: Shape,
    strides: Strides,
    offset: usize,
}

impl TensorShape {
    pub fn dense(dims: impl Into<Shape>) -> Self {
        let dims = dims.into();
        let strides = Strides::from(&dims);
        Self {
            dims,
            strides,
            offset: 0,
        }
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn dims(&self) -> &Shape {
        &self.dims
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.dims.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.dims.numel()
    }

    /// Extent of axis `k`, axes past the rank have extent 1.
    pub fn dim(&self, k: usize) -> usize {
        self.dims.get(k).copied().unwrap_or(1)
    }

    /// Half-open range of storage locations touched by this shape.
    pub fn location_range(&self) -> Range<isize> {
        let mut begin = self.offset as isize;
        let mut end = self.offset as isize + 1;
        for (&d, &s) in self.dims.iter().zip(self.strides.iter()) {
            let span = (d as isize - 1) * s;
            if span < 0 {
                begin += span;
            } else {
                end += span;
            }
        }
        begin..end
    }

    /// True if the axes enumerate `[offset, offset + num_elements)` in order,
    /// axis 0 fastest. Unit axes may carry any stride.
    pub fn is_dense(&self) -> bool {
        self.first_gap().is_none()
    }

    pub fn verify_is_dense(&self, context: &'static str) -> Result<(), InvariantError> {
        match self.first_gap() {
            Some(axis) => Err(InvariantError::NotDense {
                context,
                shape: self.to_string(),
                axis,
            }),
            None => Ok(()),
        }
    }

    fn first_gap(&self) -> Option<usize> {
        let mut expected = 1isize;
        for (k, (&d, &s)) in self.dims.iter().zip(self.strides.iter()).enumerate() {
            if d == 1 {
                continue;
            }
            if s != expected {
                return Some(k);
            }
            expected *= d as isize;
        }
        None
    }

    pub fn pad_rank(&self, rank: usize) -> Self {
        let mut padded = self.clone();
        padded.pad_rank_in_place(rank);
        padded
    }

    /// Appends unit axes until the shape has `rank` axes.
    pub fn pad_rank_in_place(&mut self, rank: usize) -> &mut Self {
        while self.rank() < rank {
            let next_stride = match (self.dims.last(), self.strides.last()) {
                (Some(&d), Some(&s)) => s * d as isize,
                _ => 1,
            };
            self.dims.push(1);
            self.strides.push(next_stride);
        }
        self
    }

    /// Can axes `k - 1` and `k` be merged without skipping storage locations?
    ///
    /// False if `k` does not name an axis with a predecessor.
    pub fn can_flatten(&self, k: usize) -> bool {
        if k == 0 || k >= self.rank() {
            return false;
        }
        if self.dims[k] == 1 || self.dims[k - 1] == 1 {
            return true;
        }
        self.strides[k] == self.strides[k - 1] * self.dims[k - 1] as isize
    }

    /// Merges axis `k - 1` into axis `k`. The rank is preserved: axis `k - 1` is
    /// left behind with extent 1.
    pub fn flatten_in_place(&mut self, k: usize) -> &mut Self {
        debug_assert!(self.can_flatten(k));
        let merged_stride = if self.dims[k - 1] == 1 {
            self.strides[k]
        } else {
            self.strides[k - 1]
        };
        self.dims[k] *= self.dims[k - 1];
        self.strides[k] = merged_stride;
        self.dims[k - 1] = 1;
        self
    }

    pub fn drop_dims(&self, drop: &[bool]) -> Self {
        Self {
            dims: self.dims.drop_dims(drop),
            strides: self.strides.drop_dims(drop),
            offset: self.offset,
        }
    }

    pub fn drop_dims_in_place(&mut self, drop: &[bool]) -> &mut Self {
        *self = self.drop_dims(drop);
        self
    }

    /// Zeroes the stride of every axis on which this operand is smaller than the
    /// operation, so that stepping along it replays the same element.
    pub fn set_broadcast_strides(&mut self, op_dims: &Shape) -> &mut Self {
        for k in 0..self.rank() {
            if self.dims[k] < op_dims[k] {
                self.strides[k] = 0;
            }
        }
        self
    }

    /// Restricts `axis` to the index range `[begin, end)`.
    pub fn narrow_to(&self, axis: usize, begin: usize, end: usize) -> Result<Self, InvariantError> {
        let out_of_range = || InvariantError::NarrowOutOfRange {
            shape: self.to_string(),
            axis,
            begin,
            end,
        };
        if axis >= self.rank() || begin >= end || end > self.dims[axis] {
            return Err(out_of_range());
        }
        let offset = self.offset as isize + begin as isize * self.strides[axis];
        let offset = usize::try_from(offset).map_err(|_| out_of_range())?;
        let mut narrowed = self.clone();
        narrowed.dims[axis] = end - begin;
        narrowed.offset = offset;
        Ok(narrowed)
    }

    /// Collapses axes `[0, split)` and `[split, rank)` into one axis each.
    ///
    /// Each of the two axis ranges must be dense on its own.
    pub fn flatten_to_2d(&self, split: usize, context: &'static str) -> Result<Self, InvariantError> {
        let padded = self.pad_rank(split);
        let (rows, row_stride) = padded.collapse(0..split, context)?;
        let (cols, col_stride) = padded.collapse(split..padded.rank(), context)?;
        let row_stride = row_stride.unwrap_or(1);
        let col_stride = col_stride.unwrap_or(row_stride * rows as isize);
        Ok(Self {
            dims: Shape::from([rows, cols]),
            strides: Strides::from(vec![row_stride, col_stride]),
            offset: self.offset,
        })
    }

    fn collapse(
        &self,
        axes: Range<usize>,
        context: &'static str,
    ) -> Result<(usize, Option<isize>), InvariantError> {
        let mut extent = 1usize;
        let mut stride = None;
        for k in axes {
            let d = self.dims[k];
            if d == 1 {
                continue;
            }
            match stride {
                None => stride = Some(self.strides[k]),
                Some(s) if self.strides[k] == s * extent as isize => {}
                Some(_) => {
                    return Err(InvariantError::NotDense {
                        context,
                        shape: self.to_string(),
                        axis: k,
                    })
                }
            }
            extent *= d;
        }
        Ok((extent, stride))
    }

    /// A dense shape with new extents over the same storage locations.
    pub fn reshaped(&self, dims: impl Into<Shape>) -> Result<Self, InvariantError> {
        let dims = dims.into();
        self.verify_is_dense("reshape")?;
        if dims.numel() != self.num_elements() {
            return Err(InvariantError::ElementCountMismatch {
                shape: self.to_string(),
                target: format!("{:?}", dims),
                actual: self.num_elements(),
                expected: dims.numel(),
            });
        }
        Ok(Self::dense(dims).with_offset(self.offset))
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.dims)?;
        if !self.is_dense() {
            write!(f, ":{:?}", self.strides)?;
        }
        if self.offset != 0 {
            write!(f, "@{}", self.offset)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorShape")
            .field("dims", &self.dims)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .finish()
    }
}

impl From<Shape> for TensorShape {
    fn from(dims: Shape) -> Self {
        Self::dense(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rvec, shape};

    #[test]
    fn dense_strides_are_column_major() {
        let s = TensorShape::dense(shape![2, 3, 4]);
        assert_eq!(s.strides().to_vec(), vec![1, 2, 6]);
        assert!(s.is_dense());
        assert_eq!(s.location_range(), 0..24);
    }

    #[test]
    fn transposed_is_not_dense() {
        let s = TensorShape::new(shape![3, 2], Strides::from(vec![2, 1]), 0);
        assert!(!s.is_dense());
        assert!(s.verify_is_dense("test").is_err());
        assert_eq!(s.location_range(), 0..6);
    }

    #[test]
    fn negative_strides_location_range() {
        let s = TensorShape::new(shape![4], Strides::from(vec![-1]), 3);
        assert_eq!(s.location_range(), 0..4);
    }

    #[test]
    fn pad_and_flatten() {
        let mut s = TensorShape::dense(shape![2, 3]).pad_rank(4);
        assert_eq!(s.dims(), &shape![2, 3, 1, 1]);
        assert!(s.can_flatten(1));
        s.flatten_in_place(1);
        assert_eq!(s.dims(), &shape![1, 6, 1, 1]);
        assert_eq!(s.strides()[1], 1);
    }

    #[test]
    fn cannot_flatten_gaps() {
        let s = TensorShape::new(shape![2, 3], Strides::from(vec![1, 4]), 0);
        assert!(!s.can_flatten(1));
        assert!(!s.can_flatten(0));
        assert!(!s.can_flatten(2));
    }

    #[test]
    fn narrow() {
        let s = TensorShape::dense(shape![4, 6]);
        let n = s.narrow_to(1, 2, 5).unwrap();
        assert_eq!(n.dims(), &shape![4, 3]);
        assert_eq!(n.offset(), 8);
        assert!(s.narrow_to(1, 5, 7).is_err());
        assert!(s.narrow_to(2, 0, 1).is_err());
    }

    #[test]
    fn flatten_to_2d_splits_axes() {
        let s = TensorShape::dense(shape![2, 3, 4, 5]);
        let m = s.flatten_to_2d(2, "test").unwrap();
        assert_eq!(m.dims(), &shape![6, 20]);
        assert_eq!(m.strides().to_vec(), vec![1, 6]);

        let v = TensorShape::dense(shape![7]);
        let m = v.flatten_to_2d(1, "test").unwrap();
        assert_eq!(m.dims(), &shape![7, 1]);
        let m = v.flatten_to_2d(0, "test").unwrap();
        assert_eq!(m.dims(), &shape![1, 7]);
    }

    #[test]
    fn flatten_to_2d_rejects_gaps() {
        let s = TensorShape::new(shape![2, 3, 4], Strides::from(vec![1, 3, 9]), 0);
        assert!(matches!(
            s.flatten_to_2d(1, "test"),
            Err(InvariantError::NotDense { axis: 2, .. })
        ));
    }

    #[test]
    fn reshaped_keeps_offset() {
        let s = TensorShape::dense(shape![6]).with_offset(4);
        let r = s.reshaped(shape![2, 3]).unwrap();
        assert_eq!(r.offset(), 4);
        assert_eq!(r.strides().to_vec(), vec![1, 2]);
        assert!(s.reshaped(shape![4]).is_err());
    }

    #[test]
    fn drop_dims() {
        let s = TensorShape::dense(shape![2, 1, 3]);
        let d = s.drop_dims(&[false, true, false]);
        assert_eq!(d.dims(), &Shape::new(rvec![2, 3]));
        assert_eq!(d.strides().to_vec(), vec![1, 2]);
    }

    #[test]
    fn display() {
        assert_eq!(TensorShape::dense(shape![2, 3]).to_string(), "[2x3]");
        let s = TensorShape::new(shape![3, 2], Strides::from(vec![2, 1]), 1);
        assert_eq!(s.to_string(), "[3x2]:[2x1]@1");
    }
}
