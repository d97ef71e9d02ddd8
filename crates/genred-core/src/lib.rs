//! # genred-core
//!
//! Formula representation for pairwise reductions of the form
//! `Reduce_j F(x_i, y_j, p)` or `Reduce_i F(x_i, y_j, p)`.
//!
//! This crate provides the pieces every other genred crate builds on:
//!
//! - **Variables** ([`Variable`], [`VarTable`]) tagged with an indexing
//!   [`Category`] (`Vi`, `Vj`, `Pm`) and a fixed feature dimension
//! - **Expressions** ([`Expr`]) as handed over by a front-end, referencing
//!   variables by name
//! - **Formulas** ([`Formula`], [`Node`]) validated once by
//!   [`FormulaBuilder`], with dimensions computed bottom-up
//! - **Linearity check** used to guard matrix-free kernel solves
//! - **Kernel families** ([`KernelKind`]) and [`kernel_product`]
//! - **Error taxonomy** ([`FormulaError`], [`GenredError`])
//! - **Precision** ([`Scalar`], [`Precision`]) for `f32`/`f64` buffers
//!
//! ## Quick Start
//!
//! ```
//! use genred_core::expr::{sqdist, var};
//! use genred_core::FormulaBuilder;
//!
//! let gaussian = (-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("B");
//! let formula = FormulaBuilder::new()
//!     .vi("X", 3)
//!     .vj("Y", 3)
//!     .vj("B", 2)
//!     .pm("G", 1)
//!     .build(&gaussian)
//!     .unwrap();
//!
//! assert_eq!(formula.dim(), 2);
//! assert_eq!(formula.to_string(), "(Exp(Minus((G*SqDist(X,Y))))*B)");
//! ```
//!
//! ## SciRS2 Integration
//!
//! Numeric traits come from `scirs2-core`; no direct `num-traits` dependency.

pub mod error;
pub mod expr;
pub mod formula;
pub mod kernels;
mod linearity;
pub mod scalar;
pub mod var;


// Re-exports
pub use error::{FormulaError, GenredError, GenredResult};
pub use expr::{Expr, FormulaBuilder};
pub use formula::{BinaryOp, Formula, Node, NodeKind, UnaryOp};
pub use kernels::{kernel_product, KernelKind};
pub use scalar::{Precision, Scalar};
pub use var::{Category, VarTable, Variable};
