//! Pre-parsed expressions and the formula builder
//!
//! [`Expr`] is the unvalidated syntax tree a front-end hands to the engine:
//! variables are referenced by name and nothing is checked yet.
//! [`FormulaBuilder`] declares the variables and turns an `Expr` into a
//! validated [`Formula`], rejecting unknown names, duplicate declarations,
//! incompatible dimensions and (optionally) non-linearity in a designated
//! variable.
//!
//! # Example
//!
//! ```
//! use genred_core::expr::{sqdist, var};
//! use genred_core::FormulaBuilder;
//!
//! // Gaussian kernel product: Exp(-G*SqDist(X,Y)) * A
//! let expr = (-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("A");
//!
//! let formula = FormulaBuilder::new()
//!     .vi("X", 2)
//!     .vj("Y", 2)
//!     .vj("A", 1)
//!     .pm("G", 1)
//!     .linear_in("A")
//!     .build(&expr)
//!     .unwrap();
//!
//! assert_eq!(formula.dim(), 1);
//! assert_eq!(formula.linear_variable(), Some(2));
//! ```

use crate::error::FormulaError;
use crate::formula::{BinaryOp, Formula, Node, UnaryOp};
use crate::var::{Category, VarTable};
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Unvalidated expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Const(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    SqDist(Box<Expr>, Box<Expr>),
    SqNorm2(Box<Expr>),
    Norm2(Box<Expr>),
    Sum(Box<Expr>),
    Elem(Box<Expr>, usize),
}

/// Reference a variable by name
pub fn var(name: &str) -> Expr {
    Expr::Var(name.into())
}

/// Scalar literal
pub fn cst(value: f64) -> Expr {
    Expr::Const(value)
}

/// Squared Euclidean distance
pub fn sqdist(a: Expr, b: Expr) -> Expr {
    Expr::SqDist(Box::new(a), Box::new(b))
}

/// Squared Euclidean norm
pub fn sqnorm2(a: Expr) -> Expr {
    Expr::SqNorm2(Box::new(a))
}

/// Euclidean norm
pub fn norm2(a: Expr) -> Expr {
    Expr::Norm2(Box::new(a))
}

impl Expr {
    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary(op, Box::new(self))
    }

    pub fn exp(self) -> Expr {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(self) -> Expr {
        self.unary(UnaryOp::Log)
    }

    pub fn sqrt(self) -> Expr {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn rsqrt(self) -> Expr {
        self.unary(UnaryOp::Rsqrt)
    }

    pub fn inv(self) -> Expr {
        self.unary(UnaryOp::Inv)
    }

    pub fn square(self) -> Expr {
        self.unary(UnaryOp::Square)
    }

    pub fn abs(self) -> Expr {
        self.unary(UnaryOp::Abs)
    }

    pub fn sign(self) -> Expr {
        self.unary(UnaryOp::Sign)
    }

    pub fn sin(self) -> Expr {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(self) -> Expr {
        self.unary(UnaryOp::Cos)
    }

    pub fn pow(self, n: i32) -> Expr {
        self.unary(UnaryOp::Pow(n))
    }

    /// Sum over feature components
    pub fn sum(self) -> Expr {
        Expr::Sum(Box::new(self))
    }

    /// Extract one feature component
    pub fn elem(self, index: usize) -> Expr {
        Expr::Elem(Box::new(self), index)
    }

    fn binary(self, op: BinaryOp, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(rhs))
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        self.unary(UnaryOp::Neg)
    }
}

macro_rules! impl_binary_ops {
    ($($trait:ident, $method:ident, $op:expr;)*) => {
        $(
            impl $trait for Expr {
                type Output = Expr;

                fn $method(self, rhs: Expr) -> Expr {
                    self.binary($op, rhs)
                }
            }

            impl $trait<f64> for Expr {
                type Output = Expr;

                fn $method(self, rhs: f64) -> Expr {
                    self.binary($op, Expr::Const(rhs))
                }
            }

            impl $trait<Expr> for f64 {
                type Output = Expr;

                fn $method(self, rhs: Expr) -> Expr {
                    Expr::Const(self).binary($op, rhs)
                }
            }
        )*
    };
}

impl_binary_ops! {
    Add, add, BinaryOp::Add;
    Sub, sub, BinaryOp::Sub;
    Mul, mul, BinaryOp::Mul;
    Div, div, BinaryOp::Div;
}

/// Declares variables and validates expressions into formulas
#[derive(Debug, Clone, Default)]
pub struct FormulaBuilder {
    declarations: Vec<(String, Category, usize)>,
    linear: Option<String>,
}

impl FormulaBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable of any category
    pub fn declare(mut self, name: &str, category: Category, dim: usize) -> Self {
        self.declarations.push((name.into(), category, dim));
        self
    }

    /// Declare a target-indexed variable
    pub fn vi(self, name: &str, dim: usize) -> Self {
        self.declare(name, Category::Vi, dim)
    }

    /// Declare a source-indexed variable
    pub fn vj(self, name: &str, dim: usize) -> Self {
        self.declare(name, Category::Vj, dim)
    }

    /// Declare a global parameter
    pub fn pm(self, name: &str, dim: usize) -> Self {
        self.declare(name, Category::Pm, dim)
    }

    /// Require the formula to be linear in `name`
    pub fn linear_in(mut self, name: &str) -> Self {
        self.linear = Some(name.into());
        self
    }

    /// Validate `expr` against the declarations
    pub fn build(&self, expr: &Expr) -> Result<Formula, FormulaError> {
        let mut vars = VarTable::new();
        for (name, category, dim) in &self.declarations {
            vars.declare(name, *category, *dim)?;
        }

        let root = lower(expr, &vars)?;
        let formula = Formula::new(root, Arc::new(vars))?;
        match &self.linear {
            Some(name) => formula.with_linear_variable(name),
            None => Ok(formula),
        }
    }
}

fn lower(expr: &Expr, vars: &VarTable) -> Result<Arc<Node>, FormulaError> {
    Ok(match expr {
        Expr::Var(name) => {
            let var = vars
                .lookup(name)
                .ok_or_else(|| FormulaError::UnknownVariable { name: name.clone() })?;
            Node::var(vars, var.position())?
        }
        Expr::Const(value) => Node::constant(*value),
        Expr::Unary(op, a) => Node::unary(*op, lower(a, vars)?),
        Expr::Binary(op, a, b) => Node::binary(*op, lower(a, vars)?, lower(b, vars)?)?,
        Expr::SqDist(a, b) => Node::sqdist(lower(a, vars)?, lower(b, vars)?)?,
        Expr::SqNorm2(a) => Node::sqnorm2(lower(a, vars)?),
        Expr::Norm2(a) => Node::norm2(lower(a, vars)?),
        Expr::Sum(a) => Node::sum(lower(a, vars)?),
        Expr::Elem(a, index) => Node::elem(lower(a, vars)?, *index)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_laplacian_formula() {
        let expr = (-(var("G") * norm2(var("X") - var("Y")))).exp() * var("A");
        let formula = FormulaBuilder::new()
            .vi("X", 2)
            .vj("Y", 2)
            .vj("A", 1)
            .pm("G", 1)
            .build(&expr)
            .unwrap();

        assert_eq!(formula.dim(), 1);
        assert_eq!(formula.to_string(), "(Exp(Minus((G*Norm2((X-Y)))))*A)");
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let expr = var("X") * var("Z");
        let err = FormulaBuilder::new().vi("X", 1).build(&expr).unwrap_err();
        assert_eq!(err, FormulaError::UnknownVariable { name: "Z".into() });
    }

    #[test]
    fn test_duplicate_declaration_rejected_at_build() {
        let err = FormulaBuilder::new()
            .vi("X", 1)
            .vj("X", 1)
            .build(&var("X"))
            .unwrap_err();
        assert_eq!(err, FormulaError::DuplicateVariable { name: "X".into() });
    }

    #[test]
    fn test_dimension_mismatch_rejected_at_build() {
        let expr = var("X") + var("B");
        let err = FormulaBuilder::new()
            .vi("X", 3)
            .vj("B", 2)
            .build(&expr)
            .unwrap_err();
        assert!(matches!(err, FormulaError::DimensionMismatch { lhs: 3, rhs: 2, .. }));
    }

    #[test]
    fn test_scalar_literals_broadcast() {
        let expr = 2.0 * var("X") + 1.0;
        let formula = FormulaBuilder::new().vi("X", 4).build(&expr).unwrap();
        assert_eq!(formula.dim(), 4);
        assert_eq!(formula.to_string(), "((2.0*X)+1.0)");
    }

    #[test]
    fn test_elem_and_sum() {
        let expr = (var("X") * var("Y")).sum() + var("X").elem(1);
        let formula = FormulaBuilder::new()
            .vi("X", 3)
            .vj("Y", 3)
            .build(&expr)
            .unwrap();
        assert_eq!(formula.dim(), 1);

        let out_of_range = var("X").elem(3);
        assert!(FormulaBuilder::new().vi("X", 3).build(&out_of_range).is_err());
    }
}
