//! # genred - Symbolic tiled pairwise reductions
//!
//! Reductions of the form
//!
//! ```text
//! out[i] = ⊕_j F(x_i, y_j, p)      or      out[j] = ⊕_i F(x_i, y_j, p)
//! ```
//!
//! evaluated tile by tile, so the `M × N` matrix of `F` values never exists in
//! memory. On top of the engine sit symbolic gradients (each backward pass is
//! another reduction) and a matrix-free conjugate-gradient solver for
//! `(αI + K) a = b`.
//!
//! This is the **meta crate** that re-exports all genred components.
//!
//! ## Quick Start
//!
//! ```
//! use genred::prelude::*;
//! use scirs2_core::ndarray_ext::array;
//!
//! // Σ_j exp(-g ||x_i - y_j||²) b_j
//! let formula = FormulaBuilder::new()
//!     .vi("X", 1)
//!     .vj("Y", 1)
//!     .vj("B", 1)
//!     .pm("G", 1)
//!     .build(&((-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("B")))?;
//! let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ)?;
//!
//! let x = array![[0.0], [1.0]];
//! let b = array![[1.0], [1.0]];
//! let g = array![[1.0]];
//! let out = genred.evaluate(&[x.view(), x.view(), b.view(), g.view()])?;
//! assert!((out[[0, 0]] - (1.0 + (-1.0f64).exp())).abs() < 1e-15);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Components
//!
//! ### Formulas ([`core`])
//!
//! Variables, categories, the formula AST with its builder, kernel
//! constructors and the error taxonomy.
//!
//! ### Evaluation ([`exec`])
//!
//! Reduction operators, the tiled engine, tiling policy and the program cache.
//!
//! ```
//! use genred::core::{kernel_product, KernelKind};
//! use genred::exec::{Axis, EvalConfig, Genred, ReductionOp};
//!
//! let genred = Genred::new(
//!     kernel_product(KernelKind::Laplacian, 3, 1).unwrap(),
//!     ReductionOp::Sum,
//!     Axis::OverI,
//! )
//! .unwrap()
//! .with_config(EvalConfig::serial().with_tile(64, 256))
//! .unwrap();
//! assert_eq!(genred.output_dim(), 1);
//! ```
//!
//! ### Gradients ([`ad`])
//!
//! Gradient plans for `Sum` and `LogSumExp` reductions, a finite-difference
//! checker and a tape adapter.
//!
//! ### Kernel solves ([`solve`])
//!
//! Conjugate gradient over the reduction as an implicit operator.
//!
//! ## Features
//!
//! - `parallel` (default): sweep outer tiles on the thread pool

pub use genred_ad as ad;
pub use genred_core as core;
pub use genred_exec as exec;
pub use genred_solve as solve;

pub mod prelude {
    //! Prelude module for convenient imports
    //!
    //! # Example
    //!
    //! ```
    //! use genred::prelude::*;
    //!
    //! let formula = kernel_product(KernelKind::Cauchy, 2, 1).unwrap();
    //! let solver = KernelSolve::new(formula, "B", Axis::OverJ).unwrap();
    //! assert_eq!(solver.linear_position(), 2);
    //! ```

    // Formulas
    pub use crate::core::expr::{cst, norm2, sqdist, sqnorm2, var};
    pub use crate::core::{
        kernel_product, Category, Expr, Formula, FormulaBuilder, FormulaError, GenredError,
        GenredResult, KernelKind, Scalar,
    };

    // Evaluation
    pub use crate::exec::{Axis, EvalConfig, Genred, ProgramCache, Reduction, ReductionOp, SumScheme};

    // Gradients
    pub use crate::ad::{gradient, GradientPlan};

    // Solves
    pub use crate::solve::{CancelToken, KernelSolve, SolveConfig, SolveStatus, SolverInfo};
}
