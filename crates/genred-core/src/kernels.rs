//! Radial kernel families
//!
//! Each kernel is a function of `r² = ||x - y||²` scaled by a bandwidth
//! parameter `g`:
//!
//! | Kernel | Formula |
//! |--------|---------|
//! | gaussian | `exp(-g·r²)` |
//! | laplacian | `exp(-sqrt(g·r²))` |
//! | cauchy | `1 / (1 + g·r²)` |
//! | inverse_multiquadric | `1 / sqrt(1 + g·r²)` |
//!
//! [`kernel_product`] assembles the classic convolution `Σ_j K(x_i, y_j) b_j`
//! as a formula over `X = Vi(d)`, `Y = Vj(d)`, `B = Vj(e)`, `G = Pm(1)`,
//! validated as linear in `B`.

use crate::error::FormulaError;
use crate::expr::{cst, sqdist, var, Expr, FormulaBuilder};
use crate::formula::{Formula, UnaryOp};
use std::fmt;
use std::str::FromStr;

/// Supported radial kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    Gaussian,
    Laplacian,
    Cauchy,
    InverseMultiquadric,
}

impl KernelKind {
    /// All kernel kinds, in a stable order
    pub const ALL: [KernelKind; 4] = [
        KernelKind::Gaussian,
        KernelKind::Laplacian,
        KernelKind::Cauchy,
        KernelKind::InverseMultiquadric,
    ];

    /// Kernel expression for points `x`, `y` and bandwidth `g`
    pub fn expr(self, x: Expr, y: Expr, g: Expr) -> Expr {
        let scaled = g * sqdist(x, y);
        match self {
            KernelKind::Gaussian => (-scaled).exp(),
            KernelKind::Laplacian => (-scaled.sqrt()).exp(),
            KernelKind::Cauchy => (cst(1.0) + scaled).inv(),
            KernelKind::InverseMultiquadric => (cst(1.0) + scaled).rsqrt(),
        }
    }

    /// Evaluate the kernel profile at a squared distance
    pub fn profile(self, g: f64, r2: f64) -> f64 {
        let s = g * r2;
        match self {
            KernelKind::Gaussian => UnaryOp::Exp.apply(-s),
            KernelKind::Laplacian => UnaryOp::Exp.apply(-UnaryOp::Sqrt.apply(s)),
            KernelKind::Cauchy => UnaryOp::Inv.apply(1.0 + s),
            KernelKind::InverseMultiquadric => UnaryOp::Rsqrt.apply(1.0 + s),
        }
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::Gaussian => "gaussian",
            KernelKind::Laplacian => "laplacian",
            KernelKind::Cauchy => "cauchy",
            KernelKind::InverseMultiquadric => "inverse_multiquadric",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for KernelKind {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KernelKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| FormulaError::UnknownKernel { name: s.into() })
    }
}

/// Formula for `K(x_i, y_j) * b_j` with `X=Vi(dim)`, `Y=Vj(dim)`, `B=Vj(signal_dim)`, `G=Pm(1)`
pub fn kernel_product(
    kind: KernelKind,
    dim: usize,
    signal_dim: usize,
) -> Result<Formula, FormulaError> {
    let expr = kind.expr(var("X"), var("Y"), var("G")) * var("B");
    FormulaBuilder::new()
        .vi("X", dim)
        .vj("Y", dim)
        .vj("B", signal_dim)
        .pm("G", 1)
        .linear_in("B")
        .build(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_product_shapes() {
        for kind in KernelKind::ALL {
            let formula = kernel_product(kind, 3, 2).unwrap();
            assert_eq!(formula.dim(), 2);
            assert_eq!(formula.linear_variable(), Some(2));
        }
    }

    #[test]
    fn test_profiles_at_origin() {
        for kind in KernelKind::ALL {
            assert_eq!(kind.profile(0.7, 0.0), 1.0);
        }
        assert!((KernelKind::Cauchy.profile(1.0, 1.0) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_parse_kernel_names() {
        assert_eq!(
            "inverse_multiquadric".parse::<KernelKind>().unwrap(),
            KernelKind::InverseMultiquadric
        );
        assert!("sigmoid".parse::<KernelKind>().is_err());
    }
}
