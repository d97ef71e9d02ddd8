//! Static linearity check for kernel solves
//!
//! A matrix-free solve treats `v ↦ Σ_j F(x_i, y_j, v_j)` as a linear operator,
//! which only holds when `F` is linear in `v`. The check here is structural:
//! the variable must occur exactly once, and every node on the path from the
//! root to that occurrence must be linear in the child holding it.
//!
//! Linear positions:
//! - `Minus(v)`, `Sum(v)`, `Elem(v, k)`, `ElemT(v, k)`, `Broadcast(v)`
//! - `v * c` and `c * v` where `c` does not involve `v`
//! - `v / c` where `c` does not involve `v`
//!
//! Additions are rejected even when the other term is independent of `v`,
//! since `v + c` is affine, not linear.

use crate::error::FormulaError;
use crate::formula::{BinaryOp, Formula, Node, NodeKind, UnaryOp};
use crate::var::Category;

/// Verify that `formula` is linear in `name` and return the variable position
pub(crate) fn check_linear(formula: &Formula, name: &str) -> Result<usize, FormulaError> {
    let var = formula
        .vars()
        .lookup(name)
        .ok_or_else(|| FormulaError::UnknownVariable { name: name.into() })?;

    if var.category() == Category::Pm {
        return Err(FormulaError::InvalidLinearVariable {
            name: name.into(),
            reason: "global (Pm) variables have no per-sample extent".into(),
        });
    }

    let position = var.position();
    match formula.root().occurrences(position) {
        1 => {}
        0 => {
            return Err(FormulaError::NonLinear {
                variable: name.into(),
                reason: "variable does not occur in the formula".into(),
            })
        }
        n => {
            return Err(FormulaError::NonLinear {
                variable: name.into(),
                reason: format!("variable occurs {} times, expected exactly once", n),
            })
        }
    }

    linear_path(formula.root(), position).map_err(|reason| FormulaError::NonLinear {
        variable: name.into(),
        reason,
    })?;
    Ok(position)
}

/// Walk from `node` down to the single occurrence of `position`
fn linear_path(node: &Node, position: usize) -> Result<(), String> {
    match node.kind() {
        NodeKind::Var { .. } => Ok(()),
        NodeKind::Const(_) => Err("unreachable constant on linear path".into()),
        NodeKind::Unary(UnaryOp::Neg, a)
        | NodeKind::Sum(a)
        | NodeKind::Elem(a, _)
        | NodeKind::ElemT(a, _)
        | NodeKind::Broadcast(a) => linear_path(a, position),
        NodeKind::Unary(op, _) => Err(format!("appears inside {}", op.name())),
        NodeKind::Binary(op, a, b) => {
            let in_a = a.depends_on(position);
            match (op, in_a) {
                (BinaryOp::Mul, true) => linear_path(a, position),
                (BinaryOp::Mul, false) => linear_path(b, position),
                (BinaryOp::Div, true) => linear_path(a, position),
                (BinaryOp::Div, false) => Err("appears in a denominator".into()),
                (BinaryOp::Add | BinaryOp::Sub, _) => Err(format!(
                    "appears in an affine {} term",
                    op.name().to_lowercase()
                )),
            }
        }
        NodeKind::SqDist(..) => Err("appears inside SqDist".into()),
        NodeKind::SqNorm2(_) => Err("appears inside SqNorm2".into()),
        NodeKind::Norm2(_) => Err("appears inside Norm2".into()),
    }
}
