use lazy_static::lazy_static;
use num_traits::{One, Zero};
use rustc_hash::FxHashMap;
use strum::IntoEnumIterator;

use crate::{InvariantError, TensorDType};

#[cfg(test)]
use test_strategy::Arbitrary;

/// Scalar kernels applied by the element-wise family, and the reductions that
/// fold their results over reducing axes.
///
/// Derivative operators take the incoming gradient first and the forward output
/// (or input, as named) second.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::EnumIter,
    strum_macros::IntoStaticStr,
)]
pub enum ElementWiseOperator {
    // nullary
    ConstOne,
    // unary
    Copy,
    Negate,
    Not,
    Abs,
    Floor,
    Reciprocal,
    Sigmoid,
    Tanh,
    Sqr,
    Sqrt,
    Exp,
    Log,
    LinearRectifier,
    Cosine,
    Sine,
    // binary
    Sum,
    Difference,
    ElementwiseProduct,
    ElementwiseQuotient,
    LogSum,
    Pow,
    Max,
    Min,
    Argmax,
    Argmin,
    EQ,
    NE,
    GT,
    LT,
    GE,
    LE,
    And,
    Or,
    Xor,
    MaskNegative,
    CopyIf,
    CopyIfNot,
    SqrOfDifference,
    ElementwiseProductWithSigmoidDerivativeFromOutput,
    ElementwiseProductWithTanhDerivativeFromOutput,
    ElementwiseProductWithLinearRectifierDerivativeFromOutput,
    ElementwiseProductWithLogDerivativeFromOutput,
    ElementwiseProductWithCosDerivative,
    ElementwiseProductWithSinDerivative,
    ElementwiseProductWithAbsDerivative,
    ElementwiseProductWithReciprocalDerivative,
    ElementwiseProductWithSqrtDerivative,
    // ternary
    Cond,
    CopyIfEqual,
    Clip,
    ElementwiseProductWithLogSumDerivative,
    // quaternary
    AxBPlusCxD,
}

lazy_static! {
    static ref OPERATORS_BY_NAME: FxHashMap<&'static str, ElementWiseOperator> =
        ElementWiseOperator::iter().map(|op| (op.name(), op)).collect();
}

impl ElementWiseOperator {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Looks an operator up by its symbolic name.
    pub fn from_name(name: &str) -> Result<Self, InvariantError> {
        OPERATORS_BY_NAME
            .get(name)
            .copied()
            .ok_or_else(|| InvariantError::UnknownOperator(name.to_string()))
    }

    pub fn arity(&self) -> usize {
        use ElementWiseOperator::*;
        match self {
            ConstOne => 0,
            Copy | Negate | Not | Abs | Floor | Reciprocal | Sigmoid | Tanh | Sqr | Sqrt | Exp
            | Log | LinearRectifier | Cosine | Sine => 1,
            Cond | CopyIfEqual | Clip | ElementwiseProductWithLogSumDerivative => 3,
            AxBPlusCxD => 4,
            _ => 2,
        }
    }

    /// Value-producing reductions accepted by the element-wise family.
    pub fn is_reduction(&self) -> bool {
        use ElementWiseOperator::*;
        matches!(self, Sum | LogSum | Min | Max | ElementwiseProduct)
    }

    /// Index-producing reductions accepted by the arg-reduction entry point.
    pub fn is_arg_reduction(&self) -> bool {
        matches!(self, ElementWiseOperator::Argmax | ElementWiseOperator::Argmin)
    }

    /// Neutral element of the reduction: folding it in changes nothing.
    pub fn reduction_identity<T: TensorDType>(&self) -> T {
        use ElementWiseOperator::*;
        match self {
            LogSum | Max | Argmax => T::neg_infinity(),
            Min | Argmin => T::infinity(),
            ElementwiseProduct => T::one(),
            _ => T::zero(),
        }
    }

    pub fn reduce<T: TensorDType>(&self, acc: T, value: T) -> T {
        use ElementWiseOperator::*;
        match self {
            LogSum => log_add(acc, value),
            Max | Argmax => acc.max(value),
            Min | Argmin => acc.min(value),
            ElementwiseProduct => acc * value,
            _ => acc + value,
        }
    }

    /// For arg reductions: does `candidate` replace the current `best`?
    pub fn prefers<T: TensorDType>(&self, candidate: T, best: T) -> bool {
        match self {
            ElementWiseOperator::Argmin => candidate < best,
            _ => candidate > best,
        }
    }

    /// Evaluates the operator on one element per operand. `args` must hold
    /// exactly [Self::arity] values.
    pub fn apply<T: TensorDType>(&self, args: &[T]) -> T {
        use ElementWiseOperator::*;
        let a = || args[0];
        let b = || args[1];
        let c = || args[2];
        match self {
            ConstOne => T::one(),

            Copy => a(),
            Negate => -a(),
            Not => flag(a().is_zero()),
            Abs => a().abs(),
            Floor => a().floor(),
            Reciprocal => a().recip(),
            Sigmoid => sigmoid(a()),
            Tanh => a().tanh(),
            Sqr => a() * a(),
            Sqrt => a().sqrt(),
            Exp => a().exp(),
            Log => a().ln(),
            LinearRectifier => a().max(T::zero()),
            Cosine => a().cos(),
            Sine => a().sin(),

            Sum => a() + b(),
            Difference => a() - b(),
            ElementwiseProduct => a() * b(),
            ElementwiseQuotient => a() / b(),
            LogSum => log_add(a(), b()),
            Pow => a().powf(b()),
            Max | Argmax => a().max(b()),
            Min | Argmin => a().min(b()),
            EQ => flag(a() == b()),
            NE => flag(a() != b()),
            GT => flag(a() > b()),
            LT => flag(a() < b()),
            GE => flag(a() >= b()),
            LE => flag(a() <= b()),
            And => flag(!a().is_zero() && !b().is_zero()),
            Or => flag(!a().is_zero() || !b().is_zero()),
            Xor => flag(a().is_zero() != b().is_zero()),
            MaskNegative => select(b() >= T::zero(), a()),
            CopyIf => select(!a().is_zero(), b()),
            CopyIfNot => select(a().is_zero(), b()),
            SqrOfDifference => (a() - b()) * (a() - b()),
            ElementwiseProductWithSigmoidDerivativeFromOutput => a() * b() * (T::one() - b()),
            ElementwiseProductWithTanhDerivativeFromOutput => a() * (T::one() - b() * b()),
            ElementwiseProductWithLinearRectifierDerivativeFromOutput => {
                select(b() > T::zero(), a())
            }
            ElementwiseProductWithLogDerivativeFromOutput => a() * (-b()).exp(),
            ElementwiseProductWithCosDerivative => -a() * b().sin(),
            ElementwiseProductWithSinDerivative => a() * b().cos(),
            ElementwiseProductWithAbsDerivative => a() * sign(b()),
            ElementwiseProductWithReciprocalDerivative => -a() * b() * b(),
            ElementwiseProductWithSqrtDerivative => a() / (b() + b()),

            Cond => {
                if a().is_zero() {
                    c()
                } else {
                    b()
                }
            }
            CopyIfEqual => select(a() == b(), c()),
            Clip => c().max(a()).min(b()),
            ElementwiseProductWithLogSumDerivative => a() * sigmoid(c() - b()),

            AxBPlusCxD => a() * b() + c() * args[3],
        }
    }
}

impl std::fmt::Display for ElementWiseOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn flag<T: TensorDType>(v: bool) -> T {
    if v {
        T::one()
    } else {
        T::zero()
    }
}

fn select<T: TensorDType>(keep: bool, v: T) -> T {
    if keep {
        v
    } else {
        T::zero()
    }
}

fn sign<T: TensorDType>(v: T) -> T {
    if v.is_zero() {
        T::zero()
    } else {
        v.signum()
    }
}

fn sigmoid<T: TensorDType>(v: T) -> T {
    // exp of a non-positive argument only, so large |v| cannot overflow
    if v >= T::zero() {
        T::one() / (T::one() + (-v).exp())
    } else {
        let e = v.exp();
        e / (T::one() + e)
    }
}

/// `ln(exp(a) + exp(b))` without leaving the log domain.
fn log_add<T: TensorDType>(a: T, b: T) -> T {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == T::neg_infinity() {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}
