//! Integration tests for genred-core
//!
//! These tests drive the public builder API the way a front-end would.

use anyhow::Result;
use genred_core::expr::{cst, norm2, sqdist, sqnorm2, var};
use genred_core::{
    Category, Formula, FormulaBuilder, FormulaError, GenredError, KernelKind, Node, NodeKind,
    UnaryOp,
};
use std::sync::Arc;

#[test]
fn test_rbf_interpolation_formulas() -> Result<()> {
    // 1-D Gaussian variogram
    let gaussian = FormulaBuilder::new()
        .vi("X", 1)
        .vj("Y", 1)
        .vj("A", 1)
        .pm("G", 1)
        .linear_in("A")
        .build(&((-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("A")))?;
    assert_eq!(gaussian.linear_variable(), Some(2));

    // 2-D exponential variogram
    let laplacian = FormulaBuilder::new()
        .vi("X", 2)
        .vj("Y", 2)
        .vj("A", 1)
        .pm("G", 1)
        .linear_in("A")
        .build(&((-(var("G") * norm2(var("X") - var("Y")))).exp() * var("A")))?;
    assert_eq!(laplacian.dim(), 1);
    assert_eq!(laplacian.vars().of_category(Category::Vj).count(), 2);

    Ok(())
}

#[test]
fn test_formula_errors_lift_into_genred_error() {
    let result: Result<Formula, GenredError> = FormulaBuilder::new()
        .vi("X", 2)
        .build(&(var("X") + var("Y")))
        .map_err(GenredError::from);

    match result {
        Err(GenredError::Formula(FormulaError::UnknownVariable { name })) => assert_eq!(name, "Y"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_nodes_can_be_assembled_directly() -> Result<()> {
    let base = FormulaBuilder::new()
        .vi("X", 3)
        .vj("Y", 3)
        .build(&sqnorm2(var("X") - var("Y")))?;

    // Rebuild Exp(-root) over the same table without going through Expr
    let root = Node::unary(
        UnaryOp::Exp,
        Node::unary(UnaryOp::Neg, base.root().clone()),
    );
    let derived = Formula::new(root, Arc::clone(base.vars()))?;
    assert_eq!(derived.to_string(), "Exp(Minus(SqNorm2((X-Y))))");
    assert!(matches!(derived.root().kind(), NodeKind::Unary(UnaryOp::Exp, _)));

    Ok(())
}

#[test]
fn test_kernel_exprs_build_for_every_kind() -> Result<()> {
    for kind in KernelKind::ALL {
        let expr = kind.expr(var("X"), var("Y"), cst(0.5));
        let formula = FormulaBuilder::new().vi("X", 2).vj("Y", 2).build(&expr)?;
        assert_eq!(formula.dim(), 1, "{} should be scalar", kind);
    }
    Ok(())
}
