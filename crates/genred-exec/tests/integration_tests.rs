//! Integration tests for genred-exec
//!
//! End-to-end reductions checked against hand-written double loops.

use anyhow::Result;
use genred_core::expr::{sqdist, var};
use genred_core::{kernel_product, Formula, FormulaBuilder, KernelKind};
use genred_exec::{
    Axis, DynOperand, EvalConfig, Genred, ProgramCache, ReductionOp, SumScheme,
};
use scirs2_core::ndarray_ext::{array, Array2};
use scirs2_core::random::{rngs::StdRng, Rng, SeedableRng};

fn random_array(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-1.0..1.0))
}

fn gaussian_1d() -> Result<Formula> {
    let expr = (-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("A");
    Ok(FormulaBuilder::new()
        .vi("X", 1)
        .vj("Y", 1)
        .vj("A", 1)
        .pm("G", 1)
        .build(&expr)?)
}

/// M = N = 4, D = 1: the tiled sum is bit-identical to the plain loop
#[test]
fn test_gaussian_sum_bit_exact_against_double_loop() -> Result<()> {
    let x: Array2<f64> = array![[0.1], [0.7], [-1.3], [2.0]];
    let y = array![[0.0], [-0.4], [1.1], [0.9]];
    let a = array![[1.0], [-2.0], [0.5], [3.0]];
    let g = array![[1.0]];

    let genred = Genred::new(gaussian_1d()?, ReductionOp::Sum, Axis::OverJ)?
        .with_config(EvalConfig::default().with_tile(3, 3))?;
    let out = genred.evaluate(&[x.view(), y.view(), a.view(), g.view()])?;

    for i in 0..4 {
        let mut expected = 0.0f64;
        for j in 0..4 {
            let d = x[[i, 0]] - y[[j, 0]];
            expected += (-(g[[0, 0]] * (d * d))).exp() * a[[j, 0]];
        }
        assert_eq!(out[[i, 0]].to_bits(), expected.to_bits(), "row {}", i);
    }
    Ok(())
}

/// Sum, Max and Min agree with the naive double loop on random inputs
#[test]
fn test_reductions_match_naive_loop_50x50() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let x = random_array(&mut rng, 50, 3);
    let y = random_array(&mut rng, 50, 3);
    let b = random_array(&mut rng, 50, 2);
    let g = array![[0.8]];
    let args = [x.view(), y.view(), b.view(), g.view()];

    for op in [ReductionOp::Sum, ReductionOp::Max, ReductionOp::Min] {
        let genred = Genred::new(kernel_product(KernelKind::Gaussian, 3, 2)?, op, Axis::OverJ)?
            .with_config(EvalConfig::default().with_tile(8, 16))?;
        let out = genred.evaluate(&args)?;

        for i in 0..50 {
            for k in 0..2 {
                let values = (0..50).map(|j| {
                    let mut d2 = 0.0;
                    for c in 0..3 {
                        let d = x[[i, c]] - y[[j, c]];
                        d2 += d * d;
                    }
                    (-(0.8 * d2)).exp() * b[[j, k]]
                });
                let expected = match op {
                    ReductionOp::Sum => values.sum::<f64>(),
                    ReductionOp::Max => values.fold(f64::NEG_INFINITY, f64::max),
                    _ => values.fold(f64::INFINITY, f64::min),
                };
                assert!(
                    (out[[i, k]] - expected).abs() <= 1e-12,
                    "{} row {} comp {}: {} vs {}",
                    op,
                    i,
                    k,
                    out[[i, k]],
                    expected
                );
            }
        }
    }
    Ok(())
}

/// Streaming LogSumExp stays finite for values up to 1e30 in magnitude
#[test]
fn test_logsumexp_no_overflow_at_1e30() -> Result<()> {
    let formula = FormulaBuilder::new()
        .vi("X", 1)
        .vj("Y", 1)
        .build(&(var("X") * var("Y")))?;
    let genred = Genred::new(formula, ReductionOp::LogSumExp, Axis::OverJ)?
        .with_config(EvalConfig::default().with_tile(1, 2))?;

    let x: Array2<f64> = array![[1e15], [-1e15], [1.0]];
    let y = array![[1e15], [3e14], [-1e15], [0.5]];
    let out = genred.evaluate(&[x.view(), y.view()])?;

    assert!(out.iter().all(|v| v.is_finite()));
    // the largest term dominates completely at this scale
    assert_eq!(out[[0, 0]], 1e30);
    assert_eq!(out[[1, 0]], 1e30);

    let small: f64 = [1e15f64, 3e14, -1e15, 0.5]
        .iter()
        .map(|v| v.exp())
        .sum::<f64>()
        .ln();
    assert_eq!(small, f64::INFINITY);
    let expected = 1e15 + (1.0 + (3e14f64 - 1e15).exp()).ln();
    assert_eq!(out[[2, 0]], expected);
    Ok(())
}

/// Several `+inf` terms: LogSumExp and Max both saturate instead of `inf - inf`
#[test]
fn test_positive_infinity_terms() -> Result<()> {
    let formula = FormulaBuilder::new()
        .vi("X", 1)
        .vj("Y", 1)
        .build(&(var("X") / var("Y")))?;
    let x = array![[1.0], [2.0]];
    let y = array![[0.0], [0.0], [4.0]];

    for op in [ReductionOp::LogSumExp, ReductionOp::Max] {
        for tj in 1..=3 {
            let genred = Genred::new(formula.clone(), op, Axis::OverJ)?
                .with_config(EvalConfig::default().with_tile(1, tj))?;
            let out = genred.evaluate(&[x.view(), y.view()])?;
            assert!(out.iter().all(|&v| v == f64::INFINITY), "{} tj = {}: {:?}", op, tj, out);
            assert_eq!(genred.evaluate_naive(&[x.view(), y.view()])?, out);
        }
    }

    let genred = Genred::new(formula, ReductionOp::MaxArgMax, Axis::OverJ)?;
    let out = genred.evaluate(&[x.view(), y.view()])?;
    assert_eq!(out, array![[f64::INFINITY, 0.0], [f64::INFINITY, 0.0]]);
    Ok(())
}

/// Arg reductions with nothing to choose from report a NaN index
#[test]
fn test_arg_reduction_without_candidates() -> Result<()> {
    let formula = FormulaBuilder::new()
        .vi("X", 1)
        .vj("Y", 1)
        .build(&(var("X") - var("Y")))?;
    let x = array![[0.0], [f64::NAN]];
    let y = array![[1.0], [-2.0]];
    let empty = Array2::<f64>::zeros((0, 1));

    let genred = Genred::new(formula, ReductionOp::MinArgMin, Axis::OverJ)?;
    let out = genred.evaluate(&[x.view(), y.view()])?;
    assert_eq!(out.row(0).to_vec(), vec![-1.0, 0.0]);
    assert_eq!(out[[1, 0]], f64::INFINITY);
    assert!(out[[1, 1]].is_nan());

    let naive = genred.evaluate_naive(&[x.view(), y.view()])?;
    assert_eq!(naive.row(0), out.row(0));
    assert!(naive[[1, 1]].is_nan());

    for out in [
        genred.evaluate(&[x.view(), empty.view()])?,
        genred.evaluate_naive(&[x.view(), empty.view()])?,
    ] {
        assert!(out.column(0).iter().all(|&v| v == f64::INFINITY));
        assert!(out.column(1).iter().all(|v| v.is_nan()));
    }
    Ok(())
}

/// Ties in ArgMin resolve to the smallest index, across tile boundaries
#[test]
fn test_argmin_ties_return_first_index() -> Result<()> {
    let formula = FormulaBuilder::new()
        .vi("X", 1)
        .vj("Y", 1)
        .build(&sqdist(var("X"), var("Y")))?;
    let x = array![[0.0], [5.0]];
    let y = array![[3.0], [1.0], [-1.0], [4.0], [6.0], [1.0]];

    for tj in 1..=6 {
        let genred = Genred::new(formula.clone(), ReductionOp::ArgMin, Axis::OverJ)?
            .with_config(EvalConfig::default().with_tile(1, tj))?;
        let out = genred.evaluate(&[x.view(), y.view()])?;
        assert_eq!(out, array![[1.0], [3.0]], "tj = {}", tj);
    }
    Ok(())
}

/// Reductions over i mirror reductions over j with roles swapped
#[test]
fn test_axis_symmetry() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let x = random_array(&mut rng, 13, 2);
    let y = random_array(&mut rng, 21, 2);

    let over_j = FormulaBuilder::new()
        .vi("X", 2)
        .vj("Y", 2)
        .build(&sqdist(var("X"), var("Y")).exp())?;
    let over_i = FormulaBuilder::new()
        .vj("X", 2)
        .vi("Y", 2)
        .build(&sqdist(var("X"), var("Y")).exp())?;

    let a = Genred::new(over_j, ReductionOp::LogSumExp, Axis::OverI)?
        .evaluate(&[x.view(), y.view()])?;
    let b = Genred::new(over_i, ReductionOp::LogSumExp, Axis::OverJ)?
        .evaluate(&[x.view(), y.view()])?;

    assert_eq!(a.dim(), (21, 1));
    for (u, v) in a.iter().zip(b.iter()) {
        assert!((u - v).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn test_single_precision_and_dynamic_operands() -> Result<()> {
    let genred = Genred::new(
        kernel_product(KernelKind::InverseMultiquadric, 2, 1)?,
        ReductionOp::Sum,
        Axis::OverJ,
    )?;

    let x = Array2::<f32>::zeros((5, 2));
    let y = Array2::<f32>::zeros((9, 2));
    let b = Array2::<f32>::ones((9, 1));
    let g = Array2::<f32>::ones((1, 1));
    let out = genred.evaluate(&[x.view(), y.view(), b.view(), g.view()])?;
    assert!(out.iter().all(|&v| v == 9.0f32));

    let dyn_out = genred.evaluate_dyn(&[
        DynOperand::from(x.view()),
        DynOperand::from(y.view()),
        DynOperand::from(b.view()),
        DynOperand::from(g.view()),
    ])?;
    assert_eq!(dyn_out.into_f64(), Array2::from_elem((5, 1), 9.0));

    let g64 = Array2::<f64>::ones((1, 1));
    let mixed = genred.evaluate_dyn(&[
        DynOperand::from(x.view()),
        DynOperand::from(y.view()),
        DynOperand::from(b.view()),
        DynOperand::from(g64.view()),
    ]);
    assert!(mixed.is_err());
    Ok(())
}

#[test]
fn test_every_kernel_with_shared_cache() -> Result<()> {
    let cache = ProgramCache::new_lfu(8);
    let mut rng = StdRng::seed_from_u64(3);
    let x = random_array(&mut rng, 17, 3);
    let y = random_array(&mut rng, 29, 3);
    let b = random_array(&mut rng, 29, 1);
    let g = array![[2.0]];
    let args = [x.view(), y.view(), b.view(), g.view()];

    for kind in KernelKind::ALL {
        for scheme in [SumScheme::Direct, SumScheme::Kahan, SumScheme::BlockSum] {
            let genred = Genred::new(kernel_product(kind, 3, 1)?, ReductionOp::Sum, Axis::OverJ)?
                .with_config(EvalConfig::default().with_tile(4, 8).with_sum_scheme(scheme))?
                .with_cache(&cache);
            let out = genred.evaluate(&args)?;

            for i in 0..17 {
                let expected: f64 = (0..29)
                    .map(|j| {
                        let r2: f64 = (0..3).map(|c| (x[[i, c]] - y[[j, c]]).powi(2)).sum();
                        kind.profile(2.0, r2) * b[[j, 0]]
                    })
                    .sum();
                assert!((out[[i, 0]] - expected).abs() < 1e-10, "{} {:?}", kind, scheme);
            }
        }
    }
    // the sum scheme does not change the compiled program
    assert_eq!(cache.len(), KernelKind::ALL.len());
    Ok(())
}
