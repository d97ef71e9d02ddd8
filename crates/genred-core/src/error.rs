//! Error types for formula construction and reduction evaluation
//!
//! # Design
//!
//! - **`FormulaError`**: raised while an expression is validated into a
//!   [`Formula`](crate::Formula). Always fatal, always surfaced before any
//!   evaluation runs.
//! - **`GenredError`**: top-level error for every engine operation. Formula
//!   errors convert into it through `#[from]`.
//!
//! Solver non-convergence is deliberately *not* an error: it is reported as a
//! status next to the best-effort solution.
//!
//! # Examples
//!
//! ```
//! use genred_core::error::{FormulaError, GenredError};
//!
//! let err: GenredError = FormulaError::UnknownVariable { name: "Z".into() }.into();
//! assert!(err.to_string().contains("unknown variable 'Z'"));
//! ```

use thiserror::Error;

/// Errors raised while validating a formula
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("unknown kernel '{name}'")]
    UnknownKernel { name: String },

    #[error("variable '{name}' is declared more than once")]
    DuplicateVariable { name: String },

    #[error("variable '{name}' has invalid feature dimension {dim}: must be positive")]
    InvalidDimension { name: String, dim: usize },

    #[error("invalid variable name '{name}': expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName { name: String },

    #[error("{operation}: incompatible feature dimensions {lhs} and {rhs}")]
    DimensionMismatch {
        operation: String,
        lhs: usize,
        rhs: usize,
    },

    #[error("{operation}: component {index} out of range for dimension {dim}")]
    IndexOutOfRange {
        operation: String,
        index: usize,
        dim: usize,
    },

    #[error("formula is not linear in '{variable}': {reason}")]
    NonLinear { variable: String, reason: String },

    #[error("'{name}' cannot be the linear variable: {reason}")]
    InvalidLinearVariable { name: String, reason: String },

    #[error("variable reference #{position} does not match the variable table: {reason}")]
    InvalidReference { position: usize, reason: String },
}

/// Top-level error type for all genred operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenredError {
    /// Build-time formula errors
    #[error("formula error: {0}")]
    Formula(#[from] FormulaError),

    /// Evaluate-time extent, shape or precision disagreement
    #[error("{operation}: dimension mismatch - expected {expected:?}, got {actual:?}. {context}")]
    DimensionMismatch {
        operation: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
        context: String,
    },

    /// Reduction kind that is unknown or incompatible with the formula
    #[error("unsupported reduction '{reduction}': {reason}")]
    UnsupportedReduction { reduction: String, reason: String },

    /// Requested a strict gradient with respect to a variable the formula ignores
    #[error("formula does not depend on '{variable}'")]
    NotDifferentiable { variable: String },

    /// Generic operation failure with context
    #[error("{operation}: {message}")]
    Operation { operation: String, message: String },
}

/// Result type for genred operations
pub type GenredResult<T> = Result<T, GenredError>;

impl GenredError {
    /// Create a dimension mismatch error
    pub fn dimension_mismatch(
        operation: impl Into<String>,
        expected: Vec<usize>,
        actual: Vec<usize>,
        context: impl Into<String>,
    ) -> Self {
        GenredError::DimensionMismatch {
            operation: operation.into(),
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Create an unsupported reduction error
    pub fn unsupported_reduction(reduction: impl Into<String>, reason: impl Into<String>) -> Self {
        GenredError::UnsupportedReduction {
            reduction: reduction.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-differentiable error
    pub fn not_differentiable(variable: impl Into<String>) -> Self {
        GenredError::NotDifferentiable {
            variable: variable.into(),
        }
    }

    /// Create a generic operation error
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        GenredError::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
