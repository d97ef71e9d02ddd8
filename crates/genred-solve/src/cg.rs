//! Conjugate gradient on implicit operators
//!
//! Multi-column right-hand sides are solved jointly: every inner product runs
//! over all entries of the `(rows, cols)` block, so the iteration is plain CG
//! on the flattened system.
//!
//! # Examples
//!
//! ```rust
//! use genred_core::GenredResult;
//! use genred_solve::cg::{conjugate_gradient, SolveStatus};
//! use genred_solve::{LinearOperator, SolveConfig};
//! use scirs2_core::ndarray_ext::{array, ArrayView2, ArrayViewMut2};
//!
//! /// diag(2, 4)
//! struct Diagonal;
//!
//! impl LinearOperator<f64> for Diagonal {
//!     fn shape(&self) -> (usize, usize) {
//!         (2, 1)
//!     }
//!
//!     fn apply(&self, p: ArrayView2<'_, f64>, mut out: ArrayViewMut2<'_, f64>) -> GenredResult<()> {
//!         out[[0, 0]] = 2.0 * p[[0, 0]];
//!         out[[1, 0]] = 4.0 * p[[1, 0]];
//!         Ok(())
//!     }
//! }
//!
//! let b = array![[2.0], [2.0]];
//! let (a, info) = conjugate_gradient(&Diagonal, b.view(), &SolveConfig::default()).unwrap();
//! assert_eq!(info.status, SolveStatus::Converged);
//! assert!((a[[0, 0]] - 1.0).abs() < 1e-12);
//! assert!((a[[1, 0]] - 0.5).abs() < 1e-12);
//! ```

use crate::operator::LinearOperator;
use crate::solve::SolveConfig;
use genred_core::{GenredError, GenredResult, Scalar};
use scirs2_core::ndarray_ext::{Array2, ArrayView2};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that stops a running solve at the next iteration boundary
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a solve ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Residual norm fell below the tolerance
    Converged,
    /// Iteration cap reached; the estimate is the last iterate
    DidNotConverge,
    /// Stopped by a [`CancelToken`]; the estimate is the last iterate
    Cancelled,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Converged => write!(f, "converged"),
            SolveStatus::DidNotConverge => write!(f, "did not converge"),
            SolveStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Solver convergence information
#[derive(Debug, Clone, PartialEq)]
pub struct SolverInfo {
    /// Number of operator applications
    pub iterations: usize,
    /// Final residual norm `||b - A a||` as tracked by the recurrence
    pub residual: f64,
    pub status: SolveStatus,
}

impl SolverInfo {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

impl fmt::Display for SolverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Solver: {} in {} iterations, residual = {:.2e}",
            self.status, self.iterations, self.residual
        )
    }
}

/// Solve `A a = b` for a self-adjoint positive definite `A`, starting from `a = 0`
///
/// Stops when `sqrt(r·r) < tolerance`, after `max_iterations` operator
/// applications (default: the number of unknowns), or when the cancel token
/// fires. The last two are reported through [`SolveStatus`] rather than as
/// errors. A vanishing or non-finite curvature `p·Ap` is a breakdown and fails.
pub fn conjugate_gradient<T, A>(
    op: &A,
    b: ArrayView2<'_, T>,
    config: &SolveConfig,
) -> GenredResult<(Array2<T>, SolverInfo)>
where
    T: Scalar,
    A: LinearOperator<T> + ?Sized,
{
    let shape = op.shape();
    if b.dim() != shape {
        return Err(GenredError::dimension_mismatch(
            "conjugate_gradient",
            vec![shape.0, shape.1],
            vec![b.nrows(), b.ncols()],
            "right-hand side",
        ));
    }
    config.validate()?;
    let max_iterations = config.max_iterations.unwrap_or(shape.0 * shape.1);

    let mut a = Array2::<T>::zeros(shape);
    let mut r = b.to_owned();
    let mut p = r.clone();
    let mut ap = Array2::<T>::zeros(shape);
    let mut rs_old = dot(&r, &r);

    if rs_old.as_f64().sqrt() < config.tolerance {
        return Ok((a, finish(0, rs_old, SolveStatus::Converged)));
    }

    for iteration in 0..max_iterations {
        if config.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            log::warn!(
                "conjugate gradient cancelled after {} iterations, residual {:.3e}",
                iteration,
                rs_old.as_f64().sqrt()
            );
            return Ok((a, finish(iteration, rs_old, SolveStatus::Cancelled)));
        }

        op.apply(p.view(), ap.view_mut())?;

        let curvature = dot(&p, &ap);
        if curvature == T::zero() || !curvature.is_finite() {
            return Err(GenredError::operation(
                "conjugate_gradient",
                format!(
                    "breakdown at iteration {}: p·Ap = {}",
                    iteration + 1,
                    curvature
                ),
            ));
        }
        let step = rs_old / curvature;

        a.zip_mut_with(&p, |a, &p| *a = *a + step * p);
        r.zip_mut_with(&ap, |r, &q| *r = *r - step * q);

        let rs_new = dot(&r, &r);
        let residual = rs_new.as_f64().sqrt();
        log::trace!("cg iteration {}: residual {:.3e}", iteration + 1, residual);

        if residual < config.tolerance {
            return Ok((a, finish(iteration + 1, rs_new, SolveStatus::Converged)));
        }

        let beta = rs_new / rs_old;
        p.zip_mut_with(&r, |p, &r| *p = r + beta * *p);
        rs_old = rs_new;
    }

    log::warn!(
        "conjugate gradient did not converge in {} iterations, residual {:.3e} (tolerance {:.1e})",
        max_iterations,
        rs_old.as_f64().sqrt(),
        config.tolerance
    );
    Ok((a, finish(max_iterations, rs_old, SolveStatus::DidNotConverge)))
}

fn finish<T: Scalar>(iterations: usize, rs: T, status: SolveStatus) -> SolverInfo {
    SolverInfo {
        iterations,
        residual: rs.as_f64().sqrt(),
        status,
    }
}

fn dot<T: Scalar>(a: &Array2<T>, b: &Array2<T>) -> T {
    a.iter()
        .zip(b.iter())
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}
