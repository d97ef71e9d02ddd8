//! Gradient plans for Sum and LogSumExp reductions
//!
//! For a forward reduction `out[r] = ⊕_c F(args; r, c)` and an upstream
//! cotangent `G = ∂L/∂out`, the gradient with respect to a variable `V` is
//! again a generic reduction:
//!
//! ```text
//! Sum:        ∂L/∂V = Σ  vjp(F, V, G)
//! LogSumExp:  ∂L/∂V = Σ  vjp(F, V, G ⊙ exp(F - out))
//! ```
//!
//! where the sum runs over the axis that does *not* index `V`. The cotangent
//! (and, for LogSumExp, the forward output) enter the gradient formula as
//! engine-internal variables `@grad` and `@out` indexed like the forward
//! output rows. Gradients with respect to `Pm` variables are reduced per
//! forward row and then folded over the rows.
//!
//! Because a plan's backward pass is an ordinary [`Genred`], plans compose:
//! differentiating a backward pass yields second-order terms.
//!
//! # Example
//!
//! ```
//! use genred_ad::GradientPlan;
//! use genred_core::{kernel_product, KernelKind};
//! use genred_exec::{Axis, Genred, ReductionOp};
//! use scirs2_core::ndarray_ext::{array, Array2};
//!
//! let forward = Genred::new(
//!     kernel_product(KernelKind::Gaussian, 1, 1).unwrap(),
//!     ReductionOp::Sum,
//!     Axis::OverJ,
//! )
//! .unwrap();
//! let plan = GradientPlan::new(&forward, "X").unwrap();
//!
//! let x = array![[0.0], [1.0]];
//! let y = array![[0.0], [1.0], [2.0]];
//! let b = array![[1.0], [1.0], [1.0]];
//! let g = array![[1.0]];
//! let cotangent = Array2::ones((2, 1));
//! let grad = plan
//!     .evaluate(&[x.view(), y.view(), b.view(), g.view()], cotangent.view())
//!     .unwrap();
//! assert_eq!(grad.dim(), (2, 1));
//! ```

use crate::diff::vjp;
use genred_core::{
    BinaryOp, Category, Formula, FormulaError, GenredError, GenredResult, Node, Scalar,
    UnaryOp, VarTable, Variable,
};
use genred_exec::{Axis, Extents, Genred, ProgramCache, Reduction, ReductionOp};
use scirs2_core::ndarray_ext::{Array2, ArrayView2, Axis as ArrayAxis};
use std::sync::Arc;

/// Name of the cotangent variable in backward formulas
pub const COTANGENT: &str = "@grad";

/// Name of the forward-output variable in LogSumExp backward formulas
pub const FORWARD_OUTPUT: &str = "@out";

/// Backward pass of one reduction with respect to one variable
#[derive(Debug, Clone)]
pub struct GradientPlan {
    forward: Genred,
    target: Variable,
    backward: Option<Genred>,
}

impl GradientPlan {
    /// Differentiate `forward` with respect to the variable named `target`
    ///
    /// # Errors
    ///
    /// - [`FormulaError::UnknownVariable`] if `target` is not declared
    /// - [`GenredError::UnsupportedReduction`] unless the reduction is `Sum`
    ///   or `LogSumExp`
    pub fn new(forward: &Genred, target: &str) -> GenredResult<Self> {
        let reduction = forward.reduction();
        if !matches!(reduction.op, ReductionOp::Sum | ReductionOp::LogSumExp) {
            return Err(GenredError::unsupported_reduction(
                reduction.op.name(),
                "gradients are defined for Sum and LogSumExp reductions only",
            ));
        }

        let formula = forward.formula();
        let target = formula
            .vars()
            .lookup(target)
            .cloned()
            .ok_or_else(|| FormulaError::UnknownVariable {
                name: target.into(),
            })?;

        let backward = match backward_formula(formula, reduction, &target)? {
            Some(grad) => {
                log::debug!(
                    "gradient of {} over {} w.r.t. '{}': {}",
                    formula,
                    reduction,
                    target.name(),
                    grad
                );
                let axis = match target.category() {
                    Category::Pm => reduction.axis,
                    category => Axis::indexing(category),
                };
                Some(
                    Genred::new(grad, ReductionOp::Sum, axis)?
                        .with_config(forward.config().clone())?,
                )
            }
            None => {
                log::debug!(
                    "{} does not depend on '{}'; gradient is zero",
                    formula,
                    target.name()
                );
                None
            }
        };

        Ok(Self {
            forward: forward.clone(),
            target,
            backward,
        })
    }

    /// Fetch the backward program (and the LogSumExp forward program) from `cache`
    pub fn with_cache(mut self, cache: &ProgramCache) -> Self {
        self.forward = self.forward.with_cache(cache);
        self.backward = self.backward.map(|b| b.with_cache(cache));
        self
    }

    /// Variable the plan differentiates with respect to
    pub fn target(&self) -> &Variable {
        &self.target
    }

    pub fn forward(&self) -> &Genred {
        &self.forward
    }

    /// The backward reduction; `None` when the gradient is identically zero
    pub fn backward(&self) -> Option<&Genred> {
        self.backward.as_ref()
    }

    /// Gradient formula; `None` when the gradient is identically zero
    pub fn formula(&self) -> Option<&Formula> {
        self.backward.as_ref().map(Genred::formula)
    }

    /// Whether the forward formula ignores the target
    pub fn is_zero(&self) -> bool {
        self.backward.is_none()
    }

    /// Fail with [`GenredError::NotDifferentiable`] when the gradient is
    /// identically zero because the formula ignores the target
    pub fn ensure_differentiable(&self) -> GenredResult<()> {
        if self.is_zero() {
            Err(GenredError::not_differentiable(self.target.name()))
        } else {
            Ok(())
        }
    }

    /// Shape the cotangent buffer must have: the forward output shape
    pub fn cotangent_shape(&self, extents: Extents) -> (usize, usize) {
        (self.forward.outer_extent(extents), self.forward.output_dim())
    }

    /// Shape of the gradient: the target operand's shape
    pub fn gradient_shape(&self, extents: Extents) -> (usize, usize) {
        let rows = match self.target.category() {
            Category::Vi => extents.m,
            Category::Vj => extents.n,
            Category::Pm => 1,
        };
        (rows, self.target.dim())
    }

    /// Vector-Jacobian product with extents inferred from the forward operands
    pub fn evaluate<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        cotangent: ArrayView2<'_, T>,
    ) -> GenredResult<Array2<T>> {
        let extents = self.forward.extents(args)?;
        self.evaluate_with_extents(args, cotangent, extents)
    }

    /// Vector-Jacobian product with explicit extents
    ///
    /// `args` are the forward operands in declaration order; `cotangent` has
    /// the forward output shape. The result has the target operand's shape.
    pub fn evaluate_with_extents<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        cotangent: ArrayView2<'_, T>,
        extents: Extents,
    ) -> GenredResult<Array2<T>> {
        let expected = self.cotangent_shape(extents);
        if cotangent.dim() != expected {
            return Err(GenredError::dimension_mismatch(
                "gradient",
                vec![expected.0, expected.1],
                vec![cotangent.nrows(), cotangent.ncols()],
                format!("cotangent of {}", self.forward.reduction()),
            ));
        }

        let backward = match &self.backward {
            Some(backward) => backward,
            None => return Ok(Array2::zeros(self.gradient_shape(extents))),
        };

        let forward_output = match self.forward.reduction().op {
            ReductionOp::LogSumExp => {
                Some(self.forward.evaluate_with_extents(args, extents.m, extents.n)?)
            }
            _ => None,
        };

        let mut operands: Vec<ArrayView2<'_, T>> = args.to_vec();
        operands.push(cotangent);
        if let Some(out) = &forward_output {
            operands.push(out.view());
        }

        let grad = backward.evaluate_with_extents(&operands, extents.m, extents.n)?;
        match self.target.category() {
            Category::Pm => Ok(grad.sum_axis(ArrayAxis(0)).insert_axis(ArrayAxis(0))),
            _ => Ok(grad),
        }
    }
}

/// Differentiate a formula given as parts
///
/// Shorthand for [`GradientPlan::new`] on a freshly built [`Genred`].
pub fn gradient(formula: Formula, reduction: Reduction, target: &str) -> GenredResult<GradientPlan> {
    let forward = Genred::new(formula, reduction.op, reduction.axis)?;
    GradientPlan::new(&forward, target)
}

/// Build the backward formula over the forward table extended with the
/// cotangent (and forward output) variables
fn backward_formula(
    formula: &Formula,
    reduction: Reduction,
    target: &Variable,
) -> GenredResult<Option<Formula>> {
    if !formula.root().depends_on(target.position()) {
        return Ok(None);
    }

    let outer = reduction.axis.outer_category();
    let mut vars = VarTable::clone(formula.vars());
    let cotangent = vars.declare_internal(&fresh_name(&vars, COTANGENT), outer, formula.dim())?;
    let forward_output = match reduction.op {
        ReductionOp::LogSumExp => Some(vars.declare_internal(
            &fresh_name(&vars, FORWARD_OUTPUT),
            outer,
            formula.dim(),
        )?),
        _ => None,
    };

    let mut u = Node::var(&vars, cotangent)?;
    if let Some(out) = forward_output {
        // d(log Σ exp F)/dF = exp(F - out)
        let shifted = Node::binary(BinaryOp::Sub, formula.root().clone(), Node::var(&vars, out)?)?;
        u = Node::binary(BinaryOp::Mul, u, Node::unary(UnaryOp::Exp, shifted))?;
    }

    match vjp(formula.root(), target.position(), u)? {
        Some(root) => Ok(Some(Formula::new(root, Arc::new(vars))?)),
        None => Ok(None),
    }
}

/// `base`, or `base_1`, `base_2`, ... when already taken by an earlier plan
fn fresh_name(vars: &VarTable, base: &str) -> String {
    let mut name = base.to_string();
    let mut suffix = 0;
    while vars.lookup(&name).is_some() {
        suffix += 1;
        name = format!("{}_{}", base, suffix);
    }
    name
}
