//! Symbolic vector-Jacobian products of formula trees
//!
//! For a node `y = f(a, b, ...)` of dimension `d` and a cotangent node `u` of
//! the same dimension, [`vjp`] builds the formula for `uᵀ ∂y/∂target`. The
//! rewrite walks the tree once, applying the chain rule node by node:
//!
//! | node | contribution to each child |
//! |------|----------------------------|
//! | `Minus(a)` | `-u` |
//! | `Exp(a)` | `u * Exp(a)` (the node itself) |
//! | `Log(a)` | `u / a` |
//! | `Sqrt(a)` | `u * 0.5 * Rsqrt(a)` |
//! | `Rsqrt(a)` | `u * -0.5 * Pow(y, 3)` |
//! | `Inv(a)` | `-(u * Square(y))` |
//! | `Square(a)` | `u * 2 * a` |
//! | `Abs(a)` | `u * Sign(a)` |
//! | `Sign(a)` | none |
//! | `Sin(a)` / `Cos(a)` | `u * Cos(a)` / `-(u * Sin(a))` |
//! | `Pow(a, n)` | `u * n * Pow(a, n - 1)` |
//! | `a + b`, `a - b` | `u`, `±u` |
//! | `a * b` | `u * b`, `u * a` |
//! | `a / b` | `u / b`, `-(u * y / b)` |
//! | `SqDist(a, b)` | `2u(a - b)`, `-2u(a - b)` |
//! | `SqNorm2(a)` | `2u * a` |
//! | `Norm2(a)` | `u * Rsqrt(SqNorm2(a)) * a` |
//! | `Sum(a)` | `Broadcast(u)` |
//! | `Elem(a, k)` / `ElemT(a, k)` | `ElemT(u, k)` / `Elem(u, k)` |
//! | `Broadcast(a)` | `Sum(u)` |
//!
//! `Rsqrt(0)` evaluates to `0`, so the `Sqrt` and `Norm2` rules give a zero
//! cotangent at the origin, which is the symmetric difference quotient there.
//!
//! A child of dimension 1 that was broadcast against a wider sibling receives
//! `Sum` of its contribution. Forward subexpressions are referenced, never
//! copied, so the compiled gradient recomputes them once per pair.

use genred_core::{BinaryOp, FormulaError, Node, NodeKind, UnaryOp};
use std::sync::Arc;

type Built = Result<Arc<Node>, FormulaError>;

/// `uᵀ ∂node/∂(variable at target)`, or `None` when the node does not depend
/// on the target (or its derivative vanishes identically)
///
/// `u` must have the dimension of `node`; the result has the dimension of the
/// target variable.
pub fn vjp(
    node: &Arc<Node>,
    target: usize,
    u: Arc<Node>,
) -> Result<Option<Arc<Node>>, FormulaError> {
    if u.dim() != node.dim() {
        return Err(FormulaError::DimensionMismatch {
            operation: "Vjp".into(),
            lhs: node.dim(),
            rhs: u.dim(),
        });
    }
    if !node.depends_on(target) {
        return Ok(None);
    }

    match node.kind() {
        NodeKind::Var { position, .. } => Ok((*position == target).then_some(u)),
        NodeKind::Const(_) => Ok(None),
        NodeKind::Unary(op, a) => match unary_cotangent(*op, node, a, u)? {
            Some(w) => vjp(a, target, w),
            None => Ok(None),
        },
        NodeKind::Binary(op, a, b) => {
            let (wa, wb) = binary_cotangents(*op, node, a, b, target, u)?;
            let da = match wa {
                Some(w) => vjp(a, target, reduce_to(w, a.dim())?)?,
                None => None,
            };
            let db = match wb {
                Some(w) => vjp(b, target, reduce_to(w, b.dim())?)?,
                None => None,
            };
            accumulate(da, db)
        }
        NodeKind::SqDist(a, b) => {
            let diff = Node::binary(BinaryOp::Sub, a.clone(), b.clone())?;
            let wa = mul(scale(2.0, u)?, diff)?;
            let wb = Node::unary(UnaryOp::Neg, wa.clone());
            let da = vjp(a, target, wa)?;
            let db = vjp(b, target, wb)?;
            accumulate(da, db)
        }
        NodeKind::SqNorm2(a) => vjp(a, target, mul(scale(2.0, u)?, a.clone())?),
        NodeKind::Norm2(a) => {
            let inv_norm = Node::unary(UnaryOp::Rsqrt, Node::sqnorm2(a.clone()));
            let w = mul(mul(u, inv_norm)?, a.clone())?;
            vjp(a, target, w)
        }
        NodeKind::Sum(a) => vjp(a, target, Node::broadcast(u, a.dim())?),
        NodeKind::Elem(a, k) => vjp(a, target, Node::elem_t(u, *k, a.dim())?),
        NodeKind::ElemT(a, k) => vjp(a, target, Node::elem(u, *k)?),
        NodeKind::Broadcast(a) => vjp(a, target, Node::sum(u)),
    }
}

/// Cotangent of the argument of `y = op(a)`
fn unary_cotangent(
    op: UnaryOp,
    y: &Arc<Node>,
    a: &Arc<Node>,
    u: Arc<Node>,
) -> Result<Option<Arc<Node>>, FormulaError> {
    let w = match op {
        UnaryOp::Neg => Node::unary(UnaryOp::Neg, u),
        UnaryOp::Exp => mul(u, y.clone())?,
        UnaryOp::Log => Node::binary(BinaryOp::Div, u, a.clone())?,
        UnaryOp::Sqrt => mul(scale(0.5, u)?, Node::unary(UnaryOp::Rsqrt, a.clone()))?,
        UnaryOp::Rsqrt => mul(scale(-0.5, u)?, Node::unary(UnaryOp::Pow(3), y.clone()))?,
        UnaryOp::Inv => Node::unary(
            UnaryOp::Neg,
            mul(u, Node::unary(UnaryOp::Square, y.clone()))?,
        ),
        UnaryOp::Square => mul(scale(2.0, u)?, a.clone())?,
        UnaryOp::Abs => mul(u, Node::unary(UnaryOp::Sign, a.clone()))?,
        UnaryOp::Sign | UnaryOp::Pow(0) => return Ok(None),
        UnaryOp::Sin => mul(u, Node::unary(UnaryOp::Cos, a.clone()))?,
        UnaryOp::Cos => Node::unary(
            UnaryOp::Neg,
            mul(u, Node::unary(UnaryOp::Sin, a.clone()))?,
        ),
        UnaryOp::Pow(1) => u,
        UnaryOp::Pow(2) => mul(scale(2.0, u)?, a.clone())?,
        UnaryOp::Pow(n) => mul(
            scale(f64::from(n), u)?,
            Node::unary(UnaryOp::Pow(n - 1), a.clone()),
        )?,
    };
    Ok(Some(w))
}

/// Cotangents of both operands of `y = a op b`, at the dimension of `y`
///
/// Operands that do not depend on the target get `None`.
#[allow(clippy::type_complexity)]
fn binary_cotangents(
    op: BinaryOp,
    y: &Arc<Node>,
    a: &Arc<Node>,
    b: &Arc<Node>,
    target: usize,
    u: Arc<Node>,
) -> Result<(Option<Arc<Node>>, Option<Arc<Node>>), FormulaError> {
    let wa = if a.depends_on(target) {
        Some(match op {
            BinaryOp::Add | BinaryOp::Sub => u.clone(),
            BinaryOp::Mul => mul(u.clone(), b.clone())?,
            BinaryOp::Div => Node::binary(BinaryOp::Div, u.clone(), b.clone())?,
        })
    } else {
        None
    };
    let wb = if b.depends_on(target) {
        Some(match op {
            BinaryOp::Add => u,
            BinaryOp::Sub => Node::unary(UnaryOp::Neg, u),
            BinaryOp::Mul => mul(u, a.clone())?,
            BinaryOp::Div => Node::unary(
                UnaryOp::Neg,
                Node::binary(BinaryOp::Div, mul(u, y.clone())?, b.clone())?,
            ),
        })
    } else {
        None
    };
    Ok((wa, wb))
}

/// Bring a cotangent down to the dimension of a (possibly broadcast) operand
fn reduce_to(w: Arc<Node>, dim: usize) -> Built {
    if w.dim() == dim {
        Ok(w)
    } else if dim == 1 {
        Ok(Node::sum(w))
    } else {
        Err(FormulaError::DimensionMismatch {
            operation: "Vjp".into(),
            lhs: dim,
            rhs: w.dim(),
        })
    }
}

fn accumulate(
    lhs: Option<Arc<Node>>,
    rhs: Option<Arc<Node>>,
) -> Result<Option<Arc<Node>>, FormulaError> {
    match (lhs, rhs) {
        (Some(l), Some(r)) => Node::binary(BinaryOp::Add, l, r).map(Some),
        (l, None) => Ok(l),
        (None, r) => Ok(r),
    }
}

fn mul(lhs: Arc<Node>, rhs: Arc<Node>) -> Built {
    Node::binary(BinaryOp::Mul, lhs, rhs)
}

fn scale(factor: f64, u: Arc<Node>) -> Built {
    mul(Node::constant(factor), u)
}
