use gemm::{gemm, Parallelism};
use num_traits::Zero;

use crate::{Matrix, QuantizedMultiplier, StorageError, TensorDType};

fn transposed_dims<T: TensorDType>(m: &Matrix<T>, trans: bool) -> (usize, usize) {
    if trans {
        (m.num_cols(), m.num_rows())
    } else {
        (m.num_rows(), m.num_cols())
    }
}

fn describe<T: TensorDType>(m: &Matrix<T>, trans: bool) -> String {
    format!(
        "{}x{}{}",
        m.num_rows(),
        m.num_cols(),
        if trans { "'" } else { "" }
    )
}

/// Column-major copy of `op(m)`.
fn materialize<T: TensorDType>(data: Vec<T>, rows: usize, cols: usize, trans: bool) -> Vec<T> {
    if !trans {
        return data;
    }
    let mut out = Vec::with_capacity(data.len());
    for r in 0..rows {
        for c in 0..cols {
            out.push(data[r + c * rows]);
        }
    }
    out
}

fn weighted<T: TensorDType>(beta: T, old: T, value: T) -> T {
    if beta.is_zero() {
        value
    } else {
        beta * old + value
    }
}

impl<T: TensorDType> Matrix<T> {
    /// `c = alpha * op(a) * op(b) + beta * c`.
    ///
    /// Inputs are read through copies, so `c` may share storage with `a` or `b`.
    #[allow(clippy::too_many_arguments)]
    pub fn multiply_and_weighted_add(
        alpha: T,
        a: &Matrix<T>,
        trans_a: bool,
        b: &Matrix<T>,
        trans_b: bool,
        beta: T,
        c: &Matrix<T>,
        quantizer: Option<&QuantizedMultiplier>,
    ) -> Result<(), StorageError> {
        let (m, k) = transposed_dims(a, trans_a);
        let (kb, n) = transposed_dims(b, trans_b);
        if k != kb || c.num_rows() != m || c.num_cols() != n {
            return Err(StorageError::DimensionMismatch {
                context: "multiply_and_weighted_add",
                details: format!(
                    "{} * {} -> {}",
                    describe(a, trans_a),
                    describe(b, trans_b),
                    describe(c, false)
                ),
            });
        }
        log::debug!(
            "GEMM m: {m}, n: {n}, k: {k}, trans_a: {trans_a}, trans_b: {trans_b}, quantized: {}",
            quantizer.is_some()
        );

        let lhs = a.copy_to_vec();
        let rhs = b.copy_to_vec();
        let base = c.storage_offset();
        let mut out = c.write_dense("multiply_and_weighted_add")?;
        let dst = &mut out[base..base + m * n];

        if let Some(q) = quantizer {
            let lhs = materialize(lhs, a.num_rows(), a.num_cols(), trans_a);
            let rhs = materialize(rhs, b.num_rows(), b.num_cols(), trans_b);
            let product = q.multiply(m, n, k, &lhs, &rhs);
            for (d, p) in dst.iter_mut().zip(product) {
                *d = weighted(beta, *d, alpha * p);
            }
            return Ok(());
        }

        if m * n == 0 {
            return Ok(());
        }
        if k == 0 {
            for d in dst.iter_mut() {
                *d = weighted(beta, *d, T::zero());
            }
            return Ok(());
        }

        let (lhs_rs, lhs_cs) = if trans_a {
            (a.num_rows() as isize, 1)
        } else {
            (1, a.num_rows() as isize)
        };
        let (rhs_rs, rhs_cs) = if trans_b {
            (b.num_rows() as isize, 1)
        } else {
            (1, b.num_rows() as isize)
        };
        let (dst_rs, dst_cs) = (1, m as isize);
        let parallelism = Parallelism::None;

        // gemm computes dst = alpha * dst + beta * lhs * rhs
        unsafe {
            gemm(
                m,
                n,
                k,
                dst.as_mut_ptr(),
                dst_cs,
                dst_rs,
                !beta.is_zero(),
                lhs.as_ptr(),
                lhs_cs,
                lhs_rs,
                rhs.as_ptr(),
                rhs_cs,
                rhs_rs,
                beta,
                alpha,
                false,
                false,
                false,
                parallelism,
            )
        }
        Ok(())
    }

    /// Dot products of matching columns (`column_wise`) or rows of `a` and
    /// `b`, assigned to `c`.
    pub fn inner_product(
        a: &Matrix<T>,
        b: &Matrix<T>,
        c: &Matrix<T>,
        column_wise: bool,
    ) -> Result<(), StorageError> {
        let (rows, cols) = (a.num_rows(), a.num_cols());
        let expected = if column_wise { cols } else { rows };
        if b.num_rows() != rows || b.num_cols() != cols || c.num_elements() != expected {
            return Err(StorageError::DimensionMismatch {
                context: "inner_product",
                details: format!(
                    "{} . {} -> {}",
                    describe(a, false),
                    describe(b, false),
                    describe(c, false)
                ),
            });
        }
        log::debug!("Inner product {}x{}, column wise: {}", rows, cols, column_wise);

        let lhs = a.copy_to_vec();
        let rhs = b.copy_to_vec();
        let base = c.storage_offset();
        let mut out = c.write_dense("inner_product")?;
        let dst = &mut out[base..base + expected];
        for (i, d) in dst.iter_mut().enumerate() {
            let (start, step, len) = if column_wise {
                (i * rows, 1, rows)
            } else {
                (i, rows, cols)
            };
            *d = (0..len)
                .map(|p| lhs[start + p * step] * rhs[start + p * step])
                .fold(T::zero(), |acc, v| acc + v);
        }
        Ok(())
    }

    /// `c = beta * c + alpha * a * diag(v)`: column `j` of `a` is scaled by
    /// `v[j]`.
    pub fn columnwise_scale_and_weighted_add(
        alpha: T,
        a: &Matrix<T>,
        v: &Matrix<T>,
        beta: T,
        c: &Matrix<T>,
    ) -> Result<(), StorageError> {
        let (rows, cols) = (a.num_rows(), a.num_cols());
        if v.num_elements() != cols || c.num_rows() != rows || c.num_cols() != cols {
            return Err(StorageError::DimensionMismatch {
                context: "columnwise_scale_and_weighted_add",
                details: format!(
                    "{} * diag({}) -> {}",
                    describe(a, false),
                    describe(v, false),
                    describe(c, false)
                ),
            });
        }
        log::debug!("Column-wise scale {}x{}", rows, cols);

        let data = a.copy_to_vec();
        let scale = v.copy_to_vec();
        let base = c.storage_offset();
        let mut out = c.write_dense("columnwise_scale_and_weighted_add")?;
        let dst = &mut out[base..base + rows * cols];
        for (j, &s) in scale.iter().enumerate() {
            for i in 0..rows {
                let at = i + j * rows;
                dst[at] = weighted(beta, dst[at], alpha * data[at] * s);
            }
        }
        Ok(())
    }
}
