use num_traits::One;

use crate::{Enforcer, TensorDType, TensorError, TensorShape, TensorView};

/// Can the items be batched as consecutive column blocks of `batch`?
///
/// All items must be dense with identical extents, and `axis` must be the last
/// axis of the batch, where the extents add up.
fn can_gather_scatter_batch<T: TensorDType>(
    batch: &TensorShape,
    items: &[&TensorView<T>],
    axis: usize,
    context: &'static str,
) -> Result<bool, TensorError> {
    Enforcer::assert_not_scalar(batch, context)?;
    let Some(first) = items.first() else {
        return Ok(false);
    };
    let shape0 = first.shape();
    let out_rank = batch.rank();
    if axis != out_rank - 1 || !shape0.is_dense() {
        return Ok(false);
    }
    let fraction_matches = (0..out_rank).all(|k| {
        let dim = shape0.dim(k) * if k == axis { items.len() } else { 1 };
        dim == batch.dim(k)
    });
    let uniform = items[1..]
        .iter()
        .all(|item| item.dims() == shape0.dims() && item.shape().is_dense());
    Ok(fraction_matches && uniform)
}

/// Height of an item's slice of the batch.
fn slice_height(item: &TensorShape, axis: usize) -> usize {
    if axis < item.rank() {
        item.dim(axis)
    } else {
        1
    }
}

impl<T: TensorDType> TensorView<T> {
    /// Splices `inputs` along `axis` into this view.
    pub fn do_gather_batch_of(
        &self,
        inputs: &[&TensorView<T>],
        axis: usize,
    ) -> Result<(), TensorError> {
        if can_gather_scatter_batch(self.shape(), inputs, axis, "do_gather_batch_of")? {
            let numel = self.shape().num_elements();
            if numel == 0 {
                return Ok(());
            }
            let num_rows = numel / self.shape().dim(axis);
            log::debug!("Gathering {} items of {} rows", inputs.len(), num_rows);
            return self
                .get_sob_view_ptr()?
                .gather_batch(num_rows, inputs.len(), |i| inputs[i].get_sob_view_ptr());
        }

        log::debug!("Gathering {} items one by one along axis {}", inputs.len(), axis);
        let mut start = 0;
        for input in inputs {
            let height = slice_height(input.shape(), axis);
            if height == 0 {
                continue;
            }
            let slice = self.shape().narrow_to(axis, start, start + height)?;
            self.reviewed(slice)?.assign_copy_of(input)?;
            start += height;
        }
        Ok(())
    }

    /// Redistributes this view along `axis` into `outputs`, as
    /// `output = beta * output + slice`.
    ///
    /// Overlapping outputs are not detected; pass `beta = 1` if they overlap.
    pub fn do_scatter_batch_of(
        &self,
        beta: T,
        outputs: &[&TensorView<T>],
        axis: usize,
    ) -> Result<(), TensorError> {
        if can_gather_scatter_batch(self.shape(), outputs, axis, "do_scatter_batch_of")? {
            let numel = self.shape().num_elements();
            if numel == 0 {
                return Ok(());
            }
            let num_rows = numel / self.shape().dim(axis);
            log::debug!("Scattering {} items of {} rows", outputs.len(), num_rows);
            return self.get_sob_view_ptr()?.scatter_batch(
                beta,
                num_rows,
                outputs.len(),
                |i| outputs[i].get_sob_view_ptr(),
            );
        }

        log::debug!("Scattering {} items one by one along axis {}", outputs.len(), axis);
        let mut start = 0;
        for output in outputs {
            let height = slice_height(output.shape(), axis);
            if height == 0 {
                continue;
            }
            let slice = self.shape().narrow_to(axis, start, start + height)?;
            output.do_copy_of(beta, &self.reviewed(slice)?, T::one())?;
            start += height;
        }
        Ok(())
    }
}
