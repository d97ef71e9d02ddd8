//! # genred-solve
//!
//! Matrix-free solves of `(αI + K) a = b`, where `K a` is a genred `Sum`
//! reduction linear in `a`. The kernel matrix is never formed: every
//! conjugate-gradient iteration runs one tiled reduction.
//!
//! ## Modules
//!
//! - [`operator`]: the [`LinearOperator`] seam and the ridge-shifted [`KernelOperator`]
//! - [`cg`]: conjugate gradient with iteration cap and cancellation
//! - [`solve`]: [`KernelSolve`], its configuration and the adjoint solve
//!
//! ## Example
//!
//! ```
//! use genred_core::{kernel_product, KernelKind};
//! use genred_exec::Axis;
//! use genred_solve::KernelSolve;
//! use scirs2_core::ndarray_ext::array;
//!
//! let solver = KernelSolve::new(
//!     kernel_product(KernelKind::Gaussian, 1, 1).unwrap(),
//!     "B",
//!     Axis::OverJ,
//! )
//! .unwrap();
//!
//! let x = array![[0.0], [0.3], [1.1], [2.0]];
//! let b = array![[1.0], [0.0], [-1.0], [0.5]];
//! let g = array![[2.0]];
//! let (a, info) = solver
//!     .solve(&[x.view(), x.view(), b.view(), g.view()], 0.1)
//!     .unwrap();
//!
//! assert!(info.converged());
//! assert_eq!(a.dim(), (4, 1));
//! ```

pub mod cg;
pub mod operator;
pub mod solve;

pub use cg::{conjugate_gradient, CancelToken, SolveStatus, SolverInfo};
pub use operator::{KernelOperator, LinearOperator};
pub use solve::{KernelSolve, SolveConfig};
