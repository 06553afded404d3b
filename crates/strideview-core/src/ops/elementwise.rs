use num_traits::{One, Zero};

use crate::{
    prepare_tensor_operands, ElementWiseOperator, Enforcer, ExecutionPlan, Matrix, RVec,
    TensorDType, TensorError, TensorShape, TensorView,
};

/// Does the plan describe column-wise dot products?
///
/// One reducing axis walked densely by both inputs, and at most one regular
/// axis stepping both inputs by the reduced length and the output by 1.
pub fn is_dot_product(plan: &ExecutionPlan) -> bool {
    if plan.num_operands() != 3 || plan.reducing_op_dims.rank() != 1 {
        return false;
    }
    let r = &plan.reducing_strides;
    if (r[0][0], r[1][0], r[2][0]) != (1, 1, 0) {
        return false;
    }
    match plan.regular_op_dims.rank() {
        0 => true,
        1 => {
            let reduced = plan.reducing_op_dims[0] as isize;
            let g = &plan.regular_strides;
            (g[0][0], g[1][0], g[2][0]) == (reduced, reduced, 1)
        }
        _ => false,
    }
}

/// Does the plan scale the columns of one input by the elements of the other?
///
/// Returns the operand indices of `(data, weight)`: the weight is constant
/// along axis 0 and consecutive along axis 1, the data and the output are dense.
pub fn is_dot_product_gradient(plan: &ExecutionPlan) -> Option<(usize, usize)> {
    let rank = plan.regular_op_dims.rank();
    if plan.num_operands() != 3 || plan.has_reduction() || rank == 0 || rank > 2 {
        return None;
    }
    let g = &plan.regular_strides;
    let (data, weight) = match (g[0][0], g[1][0]) {
        (1, 0) => (0, 1),
        (0, 1) => (1, 0),
        _ => return None,
    };
    if g[2][0] != 1 {
        return None;
    }
    if rank == 2 {
        let height = plan.regular_op_dims[0] as isize;
        if g[data][1] != height || g[weight][1] != 1 || g[2][1] != height {
            return None;
        }
    }
    Some((data, weight))
}

impl<T: TensorDType> TensorView<T> {
    /// `self = beta * self + alpha * reduce(op())`.
    pub fn do_nullary_op_of(
        &self,
        beta: T,
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        self.do_nary_op_of(beta, &[], alpha, op, reduction_op)
    }

    pub fn do_unary_op_of(
        &self,
        beta: T,
        a: &TensorView<T>,
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        self.do_nary_op_of(beta, &[a], alpha, op, reduction_op)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn do_binary_op_of(
        &self,
        beta: T,
        a: &TensorView<T>,
        b: &TensorView<T>,
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        self.do_nary_op_of(beta, &[a, b], alpha, op, reduction_op)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn do_ternary_op_of(
        &self,
        beta: T,
        a: &TensorView<T>,
        b: &TensorView<T>,
        c: &TensorView<T>,
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        self.do_nary_op_of(beta, &[a, b, c], alpha, op, reduction_op)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn do_quaternary_op_of(
        &self,
        beta: T,
        a: &TensorView<T>,
        b: &TensorView<T>,
        c: &TensorView<T>,
        d: &TensorView<T>,
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        self.do_nary_op_of(beta, &[a, b, c, d], alpha, op, reduction_op)
    }

    /// `self = beta * self + alpha * a`, summing over axes `self` lacks.
    pub fn do_copy_of(&self, beta: T, a: &TensorView<T>, alpha: T) -> Result<(), TensorError> {
        self.do_unary_op_of(
            beta,
            a,
            alpha,
            ElementWiseOperator::Copy,
            ElementWiseOperator::Sum,
        )
    }

    pub fn assign_copy_of(&self, a: &TensorView<T>) -> Result<(), TensorError> {
        self.do_copy_of(T::zero(), a, T::one())
    }

    /// Writes the position of the extreme element of `a` along the axes this
    /// view reduces.
    pub fn do_arg_reduction_op_of(
        &self,
        a: &TensorView<T>,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        Enforcer::check_arg_reduction(reduction_op)?;
        let plan = prepare_tensor_operands(&[a.shape().clone(), self.shape().clone()])?;
        if plan.has_reduction() {
            self.check_not_aliased(&[a])?;
        }
        self.sob().tensor_arg_op(a.sob(), reduction_op, &plan)?;
        Ok(())
    }

    fn do_nary_op_of(
        &self,
        beta: T,
        inputs: &[&TensorView<T>],
        alpha: T,
        op: ElementWiseOperator,
        reduction_op: ElementWiseOperator,
    ) -> Result<(), TensorError> {
        Enforcer::check_arity(op, inputs.len())?;
        Enforcer::check_reduction(reduction_op)?;

        let shapes: RVec<TensorShape> = inputs
            .iter()
            .map(|v| v.shape().clone())
            .chain([self.shape().clone()])
            .collect();
        let plan = prepare_tensor_operands(&shapes)?;
        if plan.has_reduction() {
            self.check_not_aliased(inputs)?;
        }

        if let [a, b] = inputs {
            if op == ElementWiseOperator::ElementwiseProduct
                && reduction_op == ElementWiseOperator::Sum
                && self.try_product_fast_path(beta, a, b, alpha, &plan)?
            {
                return Ok(());
            }
        }

        let matrices: RVec<&Matrix<T>> = inputs.iter().map(|v| v.sob().as_ref()).collect();
        self.sob()
            .tensor_op(beta, &matrices, alpha, op, reduction_op, &plan)?;
        Ok(())
    }

    /// Routes products matching the dot product (or its gradient) layout to the
    /// dedicated matrix kernels. Returns false if the generic path must run.
    fn try_product_fast_path(
        &self,
        beta: T,
        a: &TensorView<T>,
        b: &TensorView<T>,
        alpha: T,
        plan: &ExecutionPlan,
    ) -> Result<bool, TensorError> {
        if [a, b, self].iter().any(|v| v.sob().is_sparse()) {
            return Ok(false);
        }
        let operands = [a, b, self];
        let window = |i: usize, rows: usize, cols: usize| {
            operands[i]
                .reviewed(TensorShape::dense([rows, cols]).with_offset(plan.offsets[i]))?
                .as_matrix()
        };

        // the inner product assigns its result
        if beta.is_zero() && alpha.is_one() && is_dot_product(plan) {
            let reduced = plan.reducing_op_dims[0];
            let cols = plan.regular_op_dims.numel();
            log::debug!("Dot product fast path: {} columns of {}", cols, reduced);
            let ma = window(0, reduced, cols)?;
            let mb = window(1, reduced, cols)?;
            let mc = window(2, 1, cols)?;
            Matrix::inner_product(&ma, &mb, &mc, true)?;
            return Ok(true);
        }

        if let Some((data, weight)) = is_dot_product_gradient(plan) {
            let height = plan.regular_op_dims[0];
            let cols = plan.regular_op_dims.get(1).copied().unwrap_or(1);
            log::debug!("Dot product gradient fast path: {}x{}", height, cols);
            let md = window(data, height, cols)?;
            let mw = window(weight, 1, cols)?;
            let mc = window(2, height, cols)?;
            Matrix::columnwise_scale_and_weighted_add(alpha, &md, &mw, beta, &mc)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, Device, InvariantError, Strides};

    fn iota(dims: crate::Shape) -> TensorView<f32> {
        let data = (0..dims.numel()).map(|v| v as f32).collect();
        TensorView::from_data(data, dims, Device::CPU).unwrap()
    }

    #[test]
    fn broadcast_binary_sum() {
        let a = iota(shape![3]);
        let b = iota(shape![1, 2]);
        let c = TensorView::<f32>::zeros(shape![3, 2], Device::CPU);
        c.do_binary_op_of(
            0.,
            &a,
            &b,
            1.,
            ElementWiseOperator::Sum,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![0., 1., 2., 1., 2., 3.]);
    }

    #[test]
    fn reduce_into_row() {
        let a = iota(shape![3, 2]);
        let c = TensorView::<f32>::zeros(shape![1, 2], Device::CPU);
        c.do_copy_of(0., &a, 1.).unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![3., 12.]);
        c.do_copy_of(1., &a, 0.5).unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![4.5, 18.]);
    }

    #[test]
    fn nullary_fill() {
        let c = TensorView::<f64>::zeros(shape![2, 2], Device::CPU);
        c.do_nullary_op_of(
            0.,
            3.,
            ElementWiseOperator::ConstOne,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![3.; 4]);
    }

    #[test]
    fn ternary_and_quaternary() {
        let cond = TensorView::from_data(vec![1f32, 0.], shape![2], Device::CPU).unwrap();
        let x = iota(shape![2]);
        let y = TensorView::from_data(vec![10f32, 20.], shape![2], Device::CPU).unwrap();
        let c = TensorView::<f32>::zeros(shape![2], Device::CPU);
        c.do_ternary_op_of(
            0.,
            &cond,
            &x,
            &y,
            1.,
            ElementWiseOperator::Cond,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![0., 20.]);
        c.do_quaternary_op_of(
            0.,
            &x,
            &y,
            &y,
            &x,
            1.,
            ElementWiseOperator::AxBPlusCxD,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![0., 40.]);
    }

    #[test]
    fn arity_is_checked() {
        let a = iota(shape![2]);
        let c = TensorView::<f32>::zeros(shape![2], Device::CPU);
        let result = c.do_unary_op_of(
            0.,
            &a,
            1.,
            ElementWiseOperator::Sum,
            ElementWiseOperator::Sum,
        );
        assert!(matches!(
            result,
            Err(TensorError::Invariant(InvariantError::OperatorArity {
                expected: 2,
                actual: 1,
                ..
            }))
        ));
    }

    #[test]
    fn reducing_into_an_input_fails() {
        let a = iota(shape![4, 4]);
        let out = a.reviewed(TensorShape::dense(shape![4, 1])).unwrap();
        let result = out.do_binary_op_of(
            0.,
            &a,
            &a,
            1.,
            ElementWiseOperator::ElementwiseProduct,
            ElementWiseOperator::Sum,
        );
        assert!(matches!(
            result,
            Err(TensorError::OutputAliasesInput { input: 0, .. })
        ));
        // without reduction, in place is fine
        a.do_unary_op_of(
            0.,
            &a,
            1.,
            ElementWiseOperator::Negate,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(a.to_vec().unwrap()[1], -1.);
    }

    #[test]
    fn dot_product_fast_path() {
        let a = iota(shape![3, 2]);
        let b = TensorView::from_data(vec![1f32; 6], shape![3, 2], Device::CPU).unwrap();
        let c = TensorView::<f32>::zeros(shape![1, 2], Device::CPU);
        let plan =
            prepare_tensor_operands(&[a.shape().clone(), b.shape().clone(), c.shape().clone()])
                .unwrap();
        assert!(is_dot_product(&plan));
        c.do_binary_op_of(
            0.,
            &a,
            &b,
            1.,
            ElementWiseOperator::ElementwiseProduct,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![3., 12.]);
    }

    #[test]
    fn dot_product_gradient_fast_path() {
        let data = iota(shape![2, 3]);
        let weight = TensorView::from_data(vec![1f32, 10., 100.], shape![1, 3], Device::CPU)
            .unwrap();
        let c = TensorView::from_data(vec![1f32; 6], shape![2, 3], Device::CPU).unwrap();
        let plan = prepare_tensor_operands(&[
            weight.shape().clone(),
            data.shape().clone(),
            c.shape().clone(),
        ])
        .unwrap();
        assert_eq!(is_dot_product_gradient(&plan), Some((1, 0)));
        c.do_binary_op_of(
            1.,
            &weight,
            &data,
            2.,
            ElementWiseOperator::ElementwiseProduct,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![1., 3., 41., 61., 801., 1001.]);
    }

    #[test]
    fn transposed_output_uses_generic_path() {
        let data = iota(shape![2, 3]);
        let weight = TensorView::from_data(vec![1f32, 10., 100.], shape![1, 3], Device::CPU)
            .unwrap();
        let sob = TensorView::<f32>::zeros(shape![3, 2], Device::CPU);
        let c = sob
            .reviewed(TensorShape::new(shape![2, 3], Strides::from(vec![3, 1]), 0))
            .unwrap();
        let plan = prepare_tensor_operands(&[
            data.shape().clone(),
            weight.shape().clone(),
            c.shape().clone(),
        ])
        .unwrap();
        assert_eq!(is_dot_product_gradient(&plan), None);
        c.do_binary_op_of(
            0.,
            &data,
            &weight,
            1.,
            ElementWiseOperator::ElementwiseProduct,
            ElementWiseOperator::Sum,
        )
        .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![0., 1., 20., 30., 400., 500.]);
    }

    #[test]
    fn arg_max_reduction() {
        let a = TensorView::from_data(vec![1f32, 5., 3., 2., 0., 4.], shape![3, 2], Device::CPU)
            .unwrap();
        let c = TensorView::<f32>::zeros(shape![1, 2], Device::CPU);
        c.do_arg_reduction_op_of(&a, ElementWiseOperator::Argmax)
            .unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![1., 2.]);
        assert!(c
            .do_arg_reduction_op_of(&a, ElementWiseOperator::Sum)
            .is_err());
    }

    #[test]
    fn arg_reduction_into_an_input_fails() {
        let a = TensorView::from_data(vec![1f32, 5., 3., 2., 0., 4.], shape![3, 2], Device::CPU)
            .unwrap();
        let out = a.reviewed(TensorShape::dense(shape![1, 2])).unwrap();
        let result = out.do_arg_reduction_op_of(&a, ElementWiseOperator::Argmax);
        assert!(matches!(
            result,
            Err(TensorError::OutputAliasesInput { input: 0, .. })
        ));
        assert_eq!(a.to_vec().unwrap(), vec![1., 5., 3., 2., 0., 4.]);
    }

    #[test]
    fn max_without_reduction_propagates_nan() {
        let a = TensorView::from_data(vec![f32::NAN, 1.], shape![2], Device::CPU).unwrap();
        let c = TensorView::<f32>::zeros(shape![2], Device::CPU);
        c.do_unary_op_of(
            0.,
            &a,
            1.,
            ElementWiseOperator::Copy,
            ElementWiseOperator::Max,
        )
        .unwrap();
        let out = c.to_vec().unwrap();
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.);
    }
}
