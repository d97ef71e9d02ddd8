//! # genred-exec
//!
//! Tiled, bounded-memory evaluation of generic pairwise reductions.
//!
//! Given a validated [`Formula`](genred_core::Formula) `F`, a [`ReductionOp`]
//! `⊕` and an [`Axis`], [`Genred`] computes
//!
//! ```text
//! out[i] = ⊕_{j < N} F(x_i, y_j, p)      (Axis::OverJ)
//! out[j] = ⊕_{i < M} F(x_i, y_j, p)      (Axis::OverI)
//! ```
//!
//! with memory independent of `M` and `N`.
//!
//! ## Modules
//!
//! - [`reduction`]: operators, axes, identities and output layout
//! - [`accumulator`]: streaming per-row reduction state
//! - [`program`]: formula compilation to flat slot programs
//! - [`tiling`]: tile extents under a working-set budget
//! - [`engine`]: the tiled sweep (serial or on the thread pool)
//! - [`cache`]: content-addressed cache of compiled programs
//! - [`dynamic`]: operands whose width is chosen at runtime
//!
//! ## Features
//!
//! - `parallel` (default): sweep outer tiles on the `scirs2-core` thread pool
//!
//! ## Example
//!
//! ```
//! use genred_core::{kernel_product, KernelKind};
//! use genred_exec::{Axis, EvalConfig, Genred, ReductionOp};
//! use scirs2_core::ndarray_ext::Array2;
//!
//! let formula = kernel_product(KernelKind::Cauchy, 3, 2).unwrap();
//! let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ)
//!     .unwrap()
//!     .with_config(EvalConfig::default().with_tile(32, 128))
//!     .unwrap();
//!
//! let x = Array2::<f64>::zeros((100, 3));
//! let y = Array2::<f64>::zeros((200, 3));
//! let b = Array2::<f64>::ones((200, 2));
//! let g = Array2::<f64>::ones((1, 1));
//! let out = genred
//!     .evaluate(&[x.view(), y.view(), b.view(), g.view()])
//!     .unwrap();
//!
//! // every pair is at distance 0, so K = 1 and each row sums 200 ones
//! assert_eq!(out.dim(), (100, 2));
//! assert!(out.iter().all(|&v| v == 200.0));
//! ```

pub mod accumulator;
pub mod cache;
pub mod config;
pub mod dynamic;
pub mod engine;
mod operands;
pub mod program;
mod reference;
pub mod reduction;
pub mod tiling;


pub use accumulator::TileAccumulator;
pub use cache::{CacheStats, EvictionPolicy, ProgramCache, ProgramKey};
pub use config::{EvalConfig, SumScheme, TilePolicy};
pub use dynamic::{DynOperand, DynOutput};
pub use engine::Genred;
pub use operands::Extents;
pub use program::{Program, Role, Stage};
pub use reduction::{Axis, Reduction, ReductionOp};
pub use tiling::{resolve_tiles, CacheConfig, CacheLevel, Footprint, TileSize};
