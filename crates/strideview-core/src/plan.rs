use crate::{InvariantError, RVec, Shape, Strides, TensorShape};

/// Normalized iteration space of an N-ary element-wise operation.
///
/// The kernel produces one output element per index of `regular_op_dims` and
/// folds over every index of `reducing_op_dims` for each of them. Operand `i`
/// starts at `offsets[i]` and steps by `regular_strides[i]` / `reducing_strides[i]`.
/// The last operand is the output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub offsets: RVec<usize>,
    pub regular_op_dims: Shape,
    pub regular_strides: RVec<Strides>,
    pub reducing_op_dims: Shape,
    pub reducing_strides: RVec<Strides>,
}

impl ExecutionPlan {
    pub fn num_operands(&self) -> usize {
        self.offsets.len()
    }

    pub fn has_reduction(&self) -> bool {
        !self.reducing_op_dims.is_empty()
    }

    /// Number of output elements the kernel writes.
    pub fn num_outputs(&self) -> usize {
        self.regular_op_dims.numel()
    }
}

/// Brings all operand shapes into a common, minimal rank.
///
/// Returns the operation shape together with the rewritten operands. Axes that
/// can be walked as one are merged, axes of extent 1 everywhere are dropped, and
/// broadcasting operands get stride 0 on the axes they are replicated along.
pub fn normalize_operands(
    shapes: &[TensorShape],
) -> Result<(Shape, RVec<TensorShape>), InvariantError> {
    let rank = shapes.iter().map(TensorShape::rank).max().unwrap_or(0).max(1);
    let mut shapes: RVec<TensorShape> = shapes.iter().map(|s| s.pad_rank(rank)).collect();

    let mut op_dims: Shape = (0..rank)
        .map(|k| shapes.iter().map(|s| s.dims()[k]).max().unwrap_or(1))
        .collect();

    for k in 0..rank {
        for (operand, s) in shapes.iter().enumerate() {
            let d = s.dims()[k];
            if d != op_dims[k] && d != 1 {
                return Err(InvariantError::IncompatibleDimensions {
                    axis: k,
                    operand,
                    shape: s.to_string(),
                    op_shape: format!("{:?}", op_dims),
                });
            }
        }
    }
    log::trace!("Operands before flattening: {:?} over {:?}", shapes, op_dims);

    for k in 1..rank {
        let mergeable = shapes.iter().all(|s| {
            if !s.can_flatten(k) {
                return false;
            }
            let (lo, hi) = (s.dims()[k - 1], s.dims()[k]);
            let both_regular = lo == op_dims[k - 1] && hi == op_dims[k];
            let both_broadcast = lo == 1 && hi == 1;
            both_regular || both_broadcast
        });
        if !mergeable {
            continue;
        }
        for s in shapes.iter_mut() {
            s.flatten_in_place(k);
        }
        op_dims[k] *= op_dims[k - 1];
        op_dims[k - 1] = 1;
    }

    // After flattening an axis of op extent 1 has extent 1 in every operand.
    let singletons: RVec<bool> = op_dims.iter().map(|&d| d == 1).collect();
    let op_dims = op_dims.drop_dims(&singletons);
    for s in shapes.iter_mut() {
        s.drop_dims_in_place(&singletons).set_broadcast_strides(&op_dims);
    }
    log::trace!("Operands after flattening: {:?} over {:?}", shapes, op_dims);

    Ok((op_dims, shapes))
}

/// Derives the execution plan for an N-ary operation whose last operand is the
/// output. Output axes of extent 1 over a larger operation extent are reduced.
pub fn prepare_tensor_operands(shapes: &[TensorShape]) -> Result<ExecutionPlan, InvariantError> {
    let (op_dims, shapes) = normalize_operands(shapes)?;

    let reducing: RVec<bool> = match shapes.last() {
        Some(out) => out.dims().iter().map(|&d| d == 1).collect(),
        None => RVec::from_elem(false, op_dims.rank()),
    };
    let regular: RVec<bool> = reducing.iter().map(|r| !r).collect();

    let plan = ExecutionPlan {
        offsets: shapes.iter().map(TensorShape::offset).collect(),
        regular_op_dims: op_dims.drop_dims(&reducing),
        regular_strides: shapes.iter().map(|s| s.strides().drop_dims(&reducing)).collect(),
        reducing_op_dims: op_dims.drop_dims(&regular),
        reducing_strides: shapes.iter().map(|s| s.strides().drop_dims(&regular)).collect(),
    };
    log::debug!(
        "Execution plan: regular {:?} {:?}, reducing {:?} {:?}, offsets {:?}",
        plan.regular_op_dims,
        plan.regular_strides,
        plan.reducing_op_dims,
        plan.reducing_strides,
        plan.offsets
    );
    Ok(plan)
}
