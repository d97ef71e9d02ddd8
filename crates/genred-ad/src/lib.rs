//! # genred-ad
//!
//! Reverse-mode gradients of genred reductions.
//!
//! This crate provides:
//! - Symbolic vector-Jacobian products of formula trees ([`diff`])
//! - Gradient plans for `Sum` and `LogSumExp` reductions with respect to any
//!   `Vi`, `Vj` or `Pm` variable ([`grad`]); a backward pass is itself a tiled
//!   `Sum` reduction, so it runs in bounded memory
//! - Finite-difference gradient checking ([`gradcheck`])
//! - Integration hooks for external AD tapes ([`hooks`])

pub mod diff;
pub mod grad;
pub mod gradcheck;
pub mod hooks;


pub use diff::vjp;
pub use grad::{gradient, GradientPlan, COTANGENT, FORWARD_OUTPUT};
pub use gradcheck::{check_genred_gradient, check_gradient, GradCheckConfig, GradCheckResult};
pub use hooks::{AdContext, AdOperation, GenredOp, OperationId, RecordingTape};
