//! `(αI + K) a = b` without forming `K`
//!
//! A [`KernelSolve`] pairs a formula linear in one variable with the axis it
//! is summed over. Operands are passed exactly as to the forward reduction:
//! the buffer bound to the linear variable is the right-hand side `b`, and the
//! solution has the same shape. `K` acts on the outer points, so both point
//! sets must have the same extent (`M == N`); in practice the same buffer is
//! passed on both sides.
//!
//! The operator must be self-adjoint for the iteration to be meaningful. This
//! is not checked.

use crate::cg::{conjugate_gradient, CancelToken, SolverInfo};
use crate::operator::KernelOperator;
use genred_core::{Formula, FormulaError, GenredError, GenredResult, Scalar};
use genred_exec::{Axis, EvalConfig, Genred, ProgramCache, ReductionOp};
use scirs2_core::ndarray_ext::{Array2, ArrayView2};

/// Stopping rule and evaluation options for a solve
#[derive(Debug, Clone)]
pub struct SolveConfig {
    /// Absolute bound on the residual norm
    pub tolerance: f64,

    /// Iteration cap; `None` means the number of unknowns
    pub max_iterations: Option<usize>,

    pub cancel: Option<CancelToken>,

    /// Options for the reductions run inside the loop
    pub eval: EvalConfig,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: None,
            cancel: None,
            eval: EvalConfig::default(),
        }
    }
}

impl SolveConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_eval_config(mut self, eval: EvalConfig) -> Self {
        self.eval = eval;
        self
    }

    pub fn validate(&self) -> GenredResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(GenredError::operation(
                "SolveConfig",
                format!("tolerance must be positive and finite, got {}", self.tolerance),
            ));
        }
        self.eval.validate()
    }
}

/// Matrix-free ridge-regularized kernel solve
#[derive(Debug, Clone)]
pub struct KernelSolve {
    genred: Genred,
    config: SolveConfig,
    /// Operand position of the solved-for variable
    linear: usize,
}

impl KernelSolve {
    /// Solve for `linear`, the variable summed over `axis`
    ///
    /// `linear` must be indexed by the reduced axis, occur linearly, and have
    /// the feature dimension of the formula output.
    pub fn new(formula: Formula, linear: &str, axis: Axis) -> GenredResult<Self> {
        let formula = formula.with_linear_variable(linear)?;
        let position = formula
            .position_of(linear)
            .ok_or_else(|| FormulaError::UnknownVariable {
                name: linear.to_string(),
            })?;
        let var = formula.vars().get(position).ok_or_else(|| {
            FormulaError::UnknownVariable {
                name: linear.to_string(),
            }
        })?;

        if var.category() != axis.inner_category() {
            return Err(FormulaError::InvalidLinearVariable {
                name: linear.to_string(),
                reason: format!(
                    "a {} variable is not summed over by a reduction with {}",
                    var.category(),
                    axis
                ),
            }
            .into());
        }
        if var.dim() != formula.dim() {
            return Err(GenredError::dimension_mismatch(
                "KernelSolve",
                vec![var.dim()],
                vec![formula.dim()],
                format!("formula output must have the dimension of '{}'", linear),
            ));
        }

        Ok(Self {
            genred: Genred::new(formula, ReductionOp::Sum, axis)?,
            config: SolveConfig::default(),
            linear: position,
        })
    }

    /// Same as [`new`](Self::new) with the axis given as `0` (over `i`) or `1` (over `j`)
    pub fn from_index(formula: Formula, linear: &str, axis: usize) -> GenredResult<Self> {
        Self::new(formula, linear, Axis::from_index(axis)?)
    }

    pub fn with_config(mut self, config: SolveConfig) -> GenredResult<Self> {
        config.validate()?;
        self.genred = self.genred.with_config(config.eval.clone())?;
        self.config = config;
        Ok(self)
    }

    /// Share compiled programs with other reductions
    pub fn with_cache(mut self, cache: &ProgramCache) -> Self {
        self.genred = self.genred.with_cache(cache);
        self
    }

    pub fn genred(&self) -> &Genred {
        &self.genred
    }

    pub fn config(&self) -> &SolveConfig {
        &self.config
    }

    /// Position of the solved-for variable in the operand list
    pub fn linear_position(&self) -> usize {
        self.linear
    }

    /// Solve `(αI + K) a = b`, with `b` bound at the linear position of `args`
    pub fn solve<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        alpha: T,
    ) -> GenredResult<(Array2<T>, SolverInfo)> {
        let position = self.linear_position();
        let b = args.get(position).copied().ok_or_else(|| {
            GenredError::dimension_mismatch(
                "KernelSolve::solve",
                vec![self.genred.formula().vars().len()],
                vec![args.len()],
                "operand count",
            )
        })?;
        self.solve_with_rhs(args, b, alpha)
    }

    /// Backward pass of [`solve`](Self::solve) with respect to `b`
    ///
    /// For a self-adjoint operator the cotangent of `b` is
    /// `(αI + K)⁻¹ grad_a`, one more solve with the same operands.
    pub fn rhs_gradient<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        alpha: T,
        grad_a: ArrayView2<'_, T>,
    ) -> GenredResult<(Array2<T>, SolverInfo)> {
        self.solve_with_rhs(args, grad_a, alpha)
    }

    fn solve_with_rhs<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        rhs: ArrayView2<'_, T>,
        alpha: T,
    ) -> GenredResult<(Array2<T>, SolverInfo)> {
        if alpha.is_nan() || alpha < T::zero() {
            return Err(GenredError::operation(
                "KernelSolve",
                format!("ridge must be non-negative, got {}", alpha),
            ));
        }

        let extents = self.genred.extents(args)?;
        if extents.m != extents.n {
            return Err(GenredError::dimension_mismatch(
                "KernelSolve",
                vec![extents.m, extents.m],
                vec![extents.m, extents.n],
                "the kernel matrix must be square",
            ));
        }

        let op = KernelOperator::new(&self.genred, args, alpha)?;
        log::debug!(
            "KernelSolve {} over {} unknowns ({}), alpha = {}",
            self.genred.reduction(),
            rhs.len(),
            T::PRECISION,
            alpha
        );
        conjugate_gradient(&op, rhs, &self.config)
    }
}
