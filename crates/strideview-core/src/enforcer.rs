use crate::{ElementWiseOperator, TensorShape};

/// Invalid arguments: the call site has to be fixed, retrying never helps.
#[derive(Debug, thiserror::Error)]
pub enum InvariantError {
    #[error("Dimension {axis} of input [{operand}] is incompatible with operation dimensions ({shape} vs. {op_shape}).")]
    IncompatibleDimensions {
        axis: usize,
        operand: usize,
        shape: String,
        op_shape: String,
    },
    #[error("'{0}' is not a valid element-wise operation code.")]
    UnknownOperator(String),
    #[error("Operator {op:?} takes {expected} inputs, {actual} were given.")]
    OperatorArity {
        op: ElementWiseOperator,
        expected: usize,
        actual: usize,
    },
    #[error("{op:?} is not a valid reduction operator.")]
    InvalidReduction { op: ElementWiseOperator },
    #[error("{context}: Shape {shape} is not dense at dimension {axis}.")]
    NotDense {
        context: &'static str,
        shape: String,
        axis: usize,
    },
    #[error("The {0} tensor has too many axes to be interpreted as a matrix (max 2).")]
    TooManyAxes(String),
    #[error("Ranks {0} mismatch, the number of reduced dimensions must be a non-negative integer.")]
    RankMismatch(String),
    #[error("Flattened tensor dimensions {0} mismatch.")]
    FlattenedDimsMismatch(String),
    #[error("{0}: the batched tensor cannot be a scalar.")]
    ScalarBatch(&'static str),
    #[error("Sparse {0} tensor has an offset or width that is not a multiple of the storage object's row dimension.")]
    SparseMisaligned(String),
    #[error("Cannot reshape {shape} ({actual} elements) to {target} ({expected} elements).")]
    ElementCountMismatch {
        shape: String,
        target: String,
        actual: usize,
        expected: usize,
    },
    #[error("Cannot narrow axis {axis} of {shape} to [{begin},{end}).")]
    NarrowOutOfRange {
        shape: String,
        axis: usize,
        begin: usize,
        end: usize,
    },
}

/// # Enforcer
///
/// Enforcer enforces common invariants on tensor shapes.
pub struct Enforcer;

impl Enforcer {
    pub fn check_arity(op: ElementWiseOperator, actual: usize) -> Result<(), InvariantError> {
        let expected = op.arity();
        if expected != actual {
            return Err(InvariantError::OperatorArity {
                op,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn check_reduction(op: ElementWiseOperator) -> Result<(), InvariantError> {
        if !op.is_reduction() {
            return Err(InvariantError::InvalidReduction { op });
        }
        Ok(())
    }

    pub fn check_arg_reduction(op: ElementWiseOperator) -> Result<(), InvariantError> {
        if !op.is_arg_reduction() {
            return Err(InvariantError::InvalidReduction { op });
        }
        Ok(())
    }

    pub fn assert_matrix_rank(shape: &TensorShape) -> Result<(), InvariantError> {
        if shape.rank() > 2 {
            return Err(InvariantError::TooManyAxes(shape.to_string()));
        }
        Ok(())
    }

    pub fn assert_not_scalar(
        shape: &TensorShape,
        context: &'static str,
    ) -> Result<(), InvariantError> {
        if shape.rank() == 0 {
            return Err(InvariantError::ScalarBatch(context));
        }
        Ok(())
    }
}
