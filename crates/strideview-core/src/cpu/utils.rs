use std::ops::Deref;

use parking_lot::MappedRwLockReadGuard;

use crate::{rvec, DRVec, ExecutionPlan, Matrix, RVec, Shape, StorageError, Strides, TensorDType};

/// Input elements addressed in allocation coordinates.
pub(crate) enum Source<'a, T> {
    Locked(MappedRwLockReadGuard<'a, [T]>),
    Owned(Vec<T>),
}

impl<T> Deref for Source<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        match self {
            Source::Locked(guard) => &**guard,
            Source::Owned(v) => v.as_slice(),
        }
    }
}

/// Inputs sharing the output's allocation are snapshotted so the output can be
/// locked for writing. Sparse inputs are densified.
pub(crate) fn input_source<'a, T: TensorDType>(
    input: &'a Matrix<T>,
    output: &Matrix<T>,
) -> Source<'a, T> {
    if input.same_storage(output) {
        return Source::Owned(input.read_data().densify());
    }
    match input.read_dense() {
        Some(guard) => Source::Locked(guard),
        None => Source::Owned(input.read_data().densify()),
    }
}

pub(crate) fn fetch<T: Copy>(data: &[T], location: isize) -> Result<T, StorageError> {
    usize::try_from(location)
        .ok()
        .and_then(|i| data.get(i))
        .copied()
        .ok_or(StorageError::OutOfBounds {
            location,
            len: data.len(),
        })
}

pub(crate) fn store<T>(data: &mut [T], location: isize, value: T) -> Result<(), StorageError> {
    let len = data.len();
    let slot = usize::try_from(location)
        .ok()
        .and_then(|i| data.get_mut(i))
        .ok_or(StorageError::OutOfBounds { location, len })?;
    *slot = value;
    Ok(())
}

/// Allocation position of every operand's first element.
pub(crate) fn start_positions<T: TensorDType>(
    plan: &ExecutionPlan,
    operands: &[&Matrix<T>],
) -> DRVec<isize> {
    plan.offsets
        .iter()
        .zip(operands)
        .map(|(&offset, m)| (m.storage_offset() + offset) as isize)
        .collect()
}

pub(crate) fn check_operands(
    context: &'static str,
    plan: &ExecutionPlan,
    count: usize,
) -> Result<(), StorageError> {
    let consistent = plan.num_operands() == count
        && plan.regular_strides.len() == count
        && plan.reducing_strides.len() == count
        && plan
            .regular_strides
            .iter()
            .all(|s| s.rank() == plan.regular_op_dims.rank())
        && plan
            .reducing_strides
            .iter()
            .all(|s| s.rank() == plan.reducing_op_dims.rank());
    if !consistent {
        return Err(StorageError::DimensionMismatch {
            context,
            details: format!("plan {:?} does not describe {} operands", plan, count),
        });
    }
    Ok(())
}

/// Walks every index of `dims` (axis 0 fastest), calling `f` with the position
/// of each operand.
pub(crate) fn for_each_index<F>(
    dims: &Shape,
    strides: &[Strides],
    start: &[isize],
    mut f: F,
) -> Result<(), StorageError>
where
    F: FnMut(&[isize]) -> Result<(), StorageError>,
{
    if dims.numel() == 0 {
        return Ok(());
    }
    let rank = dims.rank();
    let mut index: RVec<usize> = rvec![0; rank];
    let mut pos: DRVec<isize> = start.iter().copied().collect();
    loop {
        f(&pos)?;
        let mut k = 0;
        loop {
            if k == rank {
                return Ok(());
            }
            index[k] += 1;
            for (p, s) in pos.iter_mut().zip(strides) {
                *p += s[k];
            }
            if index[k] < dims[k] {
                break;
            }
            for (p, s) in pos.iter_mut().zip(strides) {
                *p -= s[k] * dims[k] as isize;
            }
            index[k] = 0;
            k += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;

    #[test]
    fn odometer_visits_axis_zero_fastest() {
        let strides = [Strides::from(vec![1, 10]), Strides::from(vec![0, 1])];
        let mut seen = vec![];
        for_each_index(&shape![2, 3], &strides, &[0, 5], |pos| {
            seen.push((pos[0], pos[1]));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![(0, 5), (1, 5), (10, 6), (11, 6), (20, 7), (21, 7)]
        );
    }

    #[test]
    fn rank_zero_visits_once() {
        let mut count = 0;
        for_each_index(&shape![], &[Strides::default()], &[3], |pos| {
            assert_eq!(pos, &[3]);
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let data = [1f32, 2.];
        assert_eq!(fetch(&data, 1).unwrap(), 2.);
        assert!(fetch(&data, 2).is_err());
        assert!(fetch(&data, -1).is_err());
    }
}
