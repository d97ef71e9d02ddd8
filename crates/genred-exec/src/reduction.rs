//! Reduction operators and axes
//!
//! A [`Reduction`] pairs a [`ReductionOp`] with the [`Axis`] it reduces over.
//! Reducing over `j` produces one row per `i` (extent `M`); reducing over `i`
//! produces one row per `j` (extent `N`).
//!
//! # Output layout
//!
//! | Operator | Output columns for a formula of dimension `D` |
//! |----------|-----------------------------------------------|
//! | `Sum`, `Max`, `Min`, `LogSumExp` | `D` |
//! | `ArgMin`, `ArgMax` | `D` (indices, stored in the value type) |
//! | `Min_ArgMin`, `Max_ArgMax` | `2D` (values, then indices) |
//!
//! All operators act componentwise on vector-valued formulas.

use genred_core::{Category, GenredError, GenredResult};
use std::fmt;
use std::str::FromStr;

/// Reduction operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReductionOp {
    Sum,
    Max,
    Min,
    /// Streaming, overflow-free `log Σ exp`
    LogSumExp,
    ArgMin,
    ArgMax,
    MinArgMin,
    MaxArgMax,
}

impl ReductionOp {
    /// All operators, in a stable order
    pub const ALL: [ReductionOp; 8] = [
        ReductionOp::Sum,
        ReductionOp::Max,
        ReductionOp::Min,
        ReductionOp::LogSumExp,
        ReductionOp::ArgMin,
        ReductionOp::ArgMax,
        ReductionOp::MinArgMin,
        ReductionOp::MaxArgMax,
    ];

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            ReductionOp::Sum => "Sum",
            ReductionOp::Max => "Max",
            ReductionOp::Min => "Min",
            ReductionOp::LogSumExp => "LogSumExp",
            ReductionOp::ArgMin => "ArgMin",
            ReductionOp::ArgMax => "ArgMax",
            ReductionOp::MinArgMin => "Min_ArgMin",
            ReductionOp::MaxArgMax => "Max_ArgMax",
        }
    }

    /// Number of output columns for a formula of dimension `formula_dim`
    pub fn output_dim(self, formula_dim: usize) -> usize {
        match self {
            ReductionOp::MinArgMin | ReductionOp::MaxArgMax => 2 * formula_dim,
            _ => formula_dim,
        }
    }

    /// Identity element of the accumulator's value part
    pub fn identity(self) -> f64 {
        match self {
            ReductionOp::Sum => 0.0,
            ReductionOp::Max | ReductionOp::ArgMax | ReductionOp::MaxArgMax => f64::NEG_INFINITY,
            ReductionOp::LogSumExp => f64::NEG_INFINITY,
            ReductionOp::Min | ReductionOp::ArgMin | ReductionOp::MinArgMin => f64::INFINITY,
        }
    }

    /// Whether the operator tracks the winning index
    pub fn tracks_index(self) -> bool {
        matches!(
            self,
            ReductionOp::ArgMin | ReductionOp::ArgMax | ReductionOp::MinArgMin | ReductionOp::MaxArgMax
        )
    }
}

impl fmt::Display for ReductionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ReductionOp {
    type Err = GenredError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        ReductionOp::ALL
            .iter()
            .copied()
            .find(|op| op.name().replace('_', "").to_ascii_lowercase() == normalized)
            .ok_or_else(|| {
                GenredError::unsupported_reduction(
                    s,
                    "expected one of Sum, Max, Min, LogSumExp, ArgMin, ArgMax, Min_ArgMin, Max_ArgMax",
                )
            })
    }
}

/// Index that is reduced away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Reduce over `i`: one output row per `j`
    OverI,
    /// Reduce over `j`: one output row per `i`
    OverJ,
}

impl Axis {
    /// Axis from the conventional integer (`0` reduces over `i`, `1` over `j`)
    pub fn from_index(axis: usize) -> GenredResult<Self> {
        match axis {
            0 => Ok(Axis::OverI),
            1 => Ok(Axis::OverJ),
            other => Err(GenredError::unsupported_reduction(
                format!("axis={}", other),
                "axis must be 0 (over i) or 1 (over j)",
            )),
        }
    }

    /// Category of the variables indexed by output rows
    pub fn outer_category(self) -> Category {
        match self {
            Axis::OverJ => Category::Vi,
            Axis::OverI => Category::Vj,
        }
    }

    /// Category of the variables that are reduced away
    pub fn inner_category(self) -> Category {
        match self {
            Axis::OverJ => Category::Vj,
            Axis::OverI => Category::Vi,
        }
    }

    /// The axis whose output rows are indexed by `category`
    ///
    /// `Pm` has no rows of its own; it maps to [`Axis::OverJ`].
    pub fn indexing(category: Category) -> Self {
        match category {
            Category::Vj => Axis::OverI,
            Category::Vi | Category::Pm => Axis::OverJ,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::OverI => write!(f, "axis=0"),
            Axis::OverJ => write!(f, "axis=1"),
        }
    }
}

/// A reduction operator applied over one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reduction {
    pub op: ReductionOp,
    pub axis: Axis,
}

impl Reduction {
    pub fn new(op: ReductionOp, axis: Axis) -> Self {
        Self { op, axis }
    }

    /// Sum over `j`
    pub fn sum_j() -> Self {
        Self::new(ReductionOp::Sum, Axis::OverJ)
    }

    /// Sum over `i`
    pub fn sum_i() -> Self {
        Self::new(ReductionOp::Sum, Axis::OverI)
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.op, self.axis)
    }
}
