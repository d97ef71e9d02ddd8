//! Implicit linear operators
//!
//! The solver never sees a matrix. It only needs `out = A p` for blocks `p`
//! of a fixed shape, which a [`KernelOperator`] provides by binding `p` into
//! the linear slot of a `Sum` reduction and adding a ridge term.

use genred_core::{GenredError, GenredResult, Scalar};
use genred_exec::{Extents, Genred};
use scirs2_core::ndarray_ext::{ArrayView2, ArrayViewMut2};

/// A linear map acting on `(rows, cols)` blocks
pub trait LinearOperator<T: Scalar> {
    /// Shape of the blocks the operator maps to and from
    fn shape(&self) -> (usize, usize);

    /// Overwrite `out` with `A p`
    fn apply(&self, p: ArrayView2<'_, T>, out: ArrayViewMut2<'_, T>) -> GenredResult<()>;
}

/// `p ↦ α p + K p` where `K p` is a `Sum` reduction linear in one operand
///
/// All operands other than the linear one stay bound for the lifetime of the
/// operator. Symmetry of `K` is not checked.
#[derive(Debug, Clone)]
pub struct KernelOperator<'a, T: Scalar> {
    genred: &'a Genred,
    args: Vec<ArrayView2<'a, T>>,
    linear: usize,
    ridge: T,
    extents: Extents,
}

impl<'a, T: Scalar> KernelOperator<'a, T> {
    /// Bind `args` to `genred`; the view at the linear position only fixes its shape
    pub fn new(genred: &'a Genred, args: &[ArrayView2<'a, T>], ridge: T) -> GenredResult<Self> {
        let formula = genred.formula();
        let linear = formula.linear_variable().ok_or_else(|| {
            GenredError::operation(
                "KernelOperator",
                format!("formula {} has no linear variable", formula.signature()),
            )
        })?;
        let extents = genred.extents(args)?;

        let shape = (genred.outer_extent(extents), genred.output_dim());
        let bound = args[linear].dim();
        if bound != shape {
            return Err(GenredError::dimension_mismatch(
                "KernelOperator",
                vec![shape.0, shape.1],
                vec![bound.0, bound.1],
                "the linear operand must have the shape of the reduction output",
            ));
        }

        Ok(Self {
            genred,
            args: args.to_vec(),
            linear,
            ridge,
            extents,
        })
    }

    pub fn ridge(&self) -> T {
        self.ridge
    }

    pub fn extents(&self) -> Extents {
        self.extents
    }
}

impl<T: Scalar> LinearOperator<T> for KernelOperator<'_, T> {
    fn shape(&self) -> (usize, usize) {
        (
            self.genred.outer_extent(self.extents),
            self.genred.output_dim(),
        )
    }

    fn apply(&self, p: ArrayView2<'_, T>, mut out: ArrayViewMut2<'_, T>) -> GenredResult<()> {
        let mut bound: Vec<ArrayView2<'_, T>> = self.args.clone();
        bound[self.linear] = p;
        self.genred.evaluate_into(&bound, out.view_mut())?;

        let ridge = self.ridge;
        out.zip_mut_with(&p, |kp, &v| *kp = ridge * v + *kp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genred_core::{kernel_product, KernelKind};
    use genred_exec::{Axis, ReductionOp};
    use scirs2_core::ndarray_ext::{array, Array2};

    fn gaussian() -> Genred {
        Genred::new(
            kernel_product(KernelKind::Gaussian, 1, 1).unwrap(),
            ReductionOp::Sum,
            Axis::OverJ,
        )
        .unwrap()
    }

    #[test]
    fn test_apply_adds_ridge() {
        let genred = gaussian();
        let x: Array2<f64> = array![[0.0], [1.0]];
        let b = array![[0.0], [0.0]];
        let g = array![[1.0]];
        let op = KernelOperator::new(&genred, &[x.view(), x.view(), b.view(), g.view()], 2.0)
            .unwrap();
        assert_eq!(op.shape(), (2, 1));
        assert_eq!(op.extents(), Extents { m: 2, n: 2 });

        let p = array![[1.0], [0.0]];
        let mut out = Array2::zeros((2, 1));
        op.apply(p.view(), out.view_mut()).unwrap();

        // K = [[1, e^-1], [e^-1, 1]]
        assert!((out[[0, 0]] - 3.0).abs() < 1e-15);
        assert!((out[[1, 0]] - (-1.0f64).exp()).abs() < 1e-15);
    }

    #[test]
    fn test_linear_operand_shape() {
        let genred = gaussian();
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![[0.0], [1.0]];
        let b = array![[0.0], [0.0]];
        let g = array![[1.0]];
        let err = KernelOperator::new(&genred, &[x.view(), y.view(), b.view(), g.view()], 1.0)
            .unwrap_err();
        assert!(matches!(err, GenredError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_requires_linear_variable() {
        let formula = genred_core::FormulaBuilder::new()
            .vi("X", 1)
            .vj("Y", 1)
            .build(&genred_core::expr::sqdist(
                genred_core::expr::var("X"),
                genred_core::expr::var("Y"),
            ))
            .unwrap();
        let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap();
        let x = array![[0.0]];
        let err = KernelOperator::new(&genred, &[x.view(), x.view()], 1.0).unwrap_err();
        assert!(err.to_string().contains("no linear variable"));
    }
}
