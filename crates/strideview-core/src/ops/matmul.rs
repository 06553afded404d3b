use crate::{
    InvariantError, Matrix, QuantizedMultiplier, TensorDType, TensorError, TensorShape,
    TensorView,
};

fn product_format(
    a: &TensorShape,
    trans_a: bool,
    b: &TensorShape,
    trans_b: bool,
    c: &TensorShape,
    trans_c: bool,
) -> String {
    let t = |trans: bool| if trans { "'" } else { "" };
    format!(
        "{}{} * {}{} -> {}{}",
        a,
        t(trans_a),
        b,
        t(trans_b),
        c,
        t(trans_c)
    )
}

/// Collapses `shape` into a matrix whose second axis starts at `split`
/// (counted from the end when transposed).
fn flatten_to_matrix(
    shape: &TensorShape,
    trans: bool,
    split: usize,
) -> Result<TensorShape, InvariantError> {
    let split = if trans {
        shape.rank().saturating_sub(split)
    } else {
        split
    };
    shape.flatten_to_2d(split, "do_matrix_product_of")
}

impl<T: TensorDType> TensorView<T> {
    /// `self = beta * self + alpha * op(a) * op(b)`, or its transpose when
    /// `trans_c` is set.
    ///
    /// Trailing axes of `a` are contracted with the same number of leading
    /// axes of `b`; that number follows from the three ranks. A rank-1 `a` is
    /// read as a row vector.
    #[allow(clippy::too_many_arguments)]
    pub fn do_matrix_product_of(
        &self,
        beta: T,
        trans_c: bool,
        a: &TensorView<T>,
        trans_a: bool,
        b: &TensorView<T>,
        trans_b: bool,
        alpha: T,
        quantizer: Option<&QuantizedMultiplier>,
    ) -> Result<(), TensorError> {
        let (shape_a, shape_b, shape_c) = (a.shape(), b.shape(), self.shape());
        let trans_a = if shape_a.rank() == 1 {
            shape_b.rank() > 0
        } else {
            trans_a
        };
        let format = || product_format(shape_a, trans_a, shape_b, trans_b, shape_c, trans_c);

        let (rank_a, rank_b, rank_c) = (shape_a.rank(), shape_b.rank(), shape_c.rank());
        if rank_a + rank_b < rank_c {
            return Err(InvariantError::RankMismatch(format()).into());
        }
        let removed = rank_a + rank_b - rank_c;
        if removed % 2 != 0 {
            return Err(InvariantError::RankMismatch(format()).into());
        }
        let num_reduced = removed / 2;
        let first_reduced = rank_a.saturating_sub(num_reduced);

        let flat_a = flatten_to_matrix(shape_a, trans_a, first_reduced)?;
        let flat_b = flatten_to_matrix(shape_b, trans_b, num_reduced)?;
        let flat_c = flatten_to_matrix(shape_c, trans_c, first_reduced)?;

        let (ta, tb, tc) = (trans_a as usize, trans_b as usize, trans_c as usize);
        let output_ok = flat_a.dim(ta) == flat_c.dim(tc);
        let input_ok = flat_b.dim(1 - tb) == flat_c.dim(1 - tc);
        let reduction_ok = flat_a.dim(1 - ta) == flat_b.dim(tb);
        if !(output_ok && input_ok && reduction_ok) {
            return Err(InvariantError::FlattenedDimsMismatch(product_format(
                &flat_a, trans_a, &flat_b, trans_b, &flat_c, trans_c,
            ))
            .into());
        }
        log::debug!(
            "Matrix product {}",
            product_format(&flat_a, trans_a, &flat_b, trans_b, &flat_c, trans_c)
        );

        let ma = a.reviewed(flat_a)?.as_matrix()?;
        let mb = b.reviewed(flat_b)?.as_matrix()?;
        let mc = self.reviewed(flat_c)?.as_matrix()?;
        if trans_c {
            // c' = a * b  <=>  c = b' * a'
            Matrix::multiply_and_weighted_add(
                alpha, &mb, !trans_b, &ma, !trans_a, beta, &mc, quantizer,
            )?;
        } else {
            Matrix::multiply_and_weighted_add(
                alpha, &ma, trans_a, &mb, trans_b, beta, &mc, quantizer,
            )?;
        }
        Ok(())
    }
}
