mod gemm;
mod utils;

use std::sync::Arc;

use num_traits::Zero;

pub(crate) use utils::*;

use crate::{rvec, ElementWiseOperator, ExecutionPlan, Matrix, RVec, StorageError, TensorDType};

impl<T: TensorDType> Matrix<T> {
    /// `self = beta * self + alpha * reduce(op(inputs...))` over the iteration
    /// space of `plan`. Operand `i` of the plan is `inputs[i]`, the last one is
    /// `self`.
    pub fn tensor_op(
        &self,
        beta: T,
        inputs: &[&Matrix<T>],
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
        plan: &ExecutionPlan,
    ) -> Result<(), StorageError> {
        let n = inputs.len();
        check_operands("tensor_op", plan, n + 1)?;
        let operands: RVec<&Matrix<T>> = inputs.iter().copied().chain([self]).collect();
        let start = start_positions(plan, &operands);

        let sources: RVec<Source<'_, T>> = inputs.iter().map(|m| input_source(m, self)).collect();
        let mut out = self.write_dense("tensor_op")?;
        let mut args: RVec<T> = rvec![T::zero(); n];

        for_each_index(&plan.regular_op_dims, &plan.regular_strides, &start, |pos| {
            // seeded with the first element, so a plan without reducing axes
            // never calls reduce
            let mut acc: Option<T> = None;
            for_each_index(
                &plan.reducing_op_dims,
                &plan.reducing_strides,
                pos,
                |at| {
                    for (arg, (source, &location)) in args.iter_mut().zip(sources.iter().zip(at)) {
                        *arg = fetch(source, location)?;
                    }
                    let value = op.apply(&args);
                    acc = Some(match acc {
                        Some(acc) => reduction_op.reduce(acc, value),
                        None => value,
                    });
                    Ok(())
                },
            )?;
            let acc = acc.unwrap_or_else(|| reduction_op.reduction_identity::<T>());
            let location = pos[n];
            let value = if beta.is_zero() {
                alpha * acc
            } else {
                beta * fetch(&out, location)? + alpha * acc
            };
            store(&mut out, location, value)
        })
    }

    /// Writes, for every output element, the position of the extreme input
    /// element within the reduced sub-space (axis 0 fastest).
    pub fn tensor_arg_op(
        &self,
        input: &Matrix<T>,
        reduction_op: ElementWiseOperator,
        plan: &ExecutionPlan,
    ) -> Result<(), StorageError> {
        check_operands("tensor_arg_op", plan, 2)?;
        let start = start_positions(plan, &[input, self]);
        let source = input_source(input, self);
        let mut out = self.write_dense("tensor_arg_op")?;

        for_each_index(&plan.regular_op_dims, &plan.regular_strides, &start, |pos| {
            let mut best: Option<(usize, T)> = None;
            let mut index = 0;
            for_each_index(
                &plan.reducing_op_dims,
                &plan.reducing_strides,
                pos,
                |at| {
                    let v = fetch(&source, at[0])?;
                    match best {
                        Some((_, b)) if !reduction_op.prefers(v, b) => {}
                        _ => best = Some((index, v)),
                    }
                    index += 1;
                    Ok(())
                },
            )?;
            let arg = best.map_or(0, |(i, _)| i);
            store(&mut out, pos[1], T::from_usize_lossy(arg))
        })
    }

    /// Copies the items returned by `item` one after the other into this
    /// matrix, each as a block of `num_rows`-row columns.
    pub fn gather_batch<E, F>(&self, num_rows: usize, num_items: usize, item: F) -> Result<(), E>
    where
        E: From<StorageError>,
        F: FnMut(usize) -> Result<Arc<Matrix<T>>, E>,
    {
        let items = (0..num_items).map(item).collect::<Result<Vec<_>, E>>()?;
        check_batch("gather_batch", self, num_rows, &items)?;
        let columns: Vec<Vec<T>> = items.iter().map(|m| m.copy_to_vec()).collect();

        let mut out = self.write_dense("gather_batch")?;
        let mut cursor = self.storage_offset();
        for column in columns {
            out[cursor..cursor + column.len()].copy_from_slice(&column);
            cursor += column.len();
        }
        Ok(())
    }

    /// Splits this matrix into consecutive blocks and writes block `i` into
    /// the item returned by `item(i)`, as `item = beta * item + block`.
    pub fn scatter_batch<E, F>(
        &self,
        beta: T,
        num_rows: usize,
        num_items: usize,
        item: F,
    ) -> Result<(), E>
    where
        E: From<StorageError>,
        F: FnMut(usize) -> Result<Arc<Matrix<T>>, E>,
    {
        let items = (0..num_items).map(item).collect::<Result<Vec<_>, E>>()?;
        check_batch("scatter_batch", self, num_rows, &items)?;
        let source = self.copy_to_vec();

        let mut cursor = 0;
        for m in items.iter() {
            let len = m.num_elements();
            let base = m.storage_offset();
            let mut dst = m.write_dense("scatter_batch")?;
            for (d, &s) in dst[base..base + len]
                .iter_mut()
                .zip(&source[cursor..cursor + len])
            {
                *d = if beta.is_zero() { s } else { beta * *d + s };
            }
            cursor += len;
        }
        Ok(())
    }
}

fn check_batch<T: TensorDType>(
    context: &'static str,
    batch: &Matrix<T>,
    num_rows: usize,
    items: &[Arc<Matrix<T>>],
) -> Result<(), StorageError> {
    let total: usize = items.iter().map(|m| m.num_elements()).sum();
    let ragged = num_rows == 0
        || batch.num_elements() % num_rows != 0
        || items.iter().any(|m| m.num_elements() % num_rows != 0);
    if ragged || total != batch.num_elements() {
        return Err(StorageError::DimensionMismatch {
            context,
            details: format!(
                "{} items with {} elements in total for a batch of {} elements with {} rows",
                items.len(),
                total,
                batch.num_elements(),
                num_rows
            ),
        });
    }
    log::trace!("{}: {} items of {} rows", context, items.len(), num_rows);
    Ok(())
}
