//! Gradients of kernel convolutions with respect to the target points
//!
//! This example demonstrates:
//! - Building the backward pass of `Σ_j k(x_i, y_j) b_j` as a gradient plan
//! - Evaluating it against a cotangent `a` for the four radial kernels
//! - Checking the result against the closed-form chain rule
//!
//! For `L = Σ_i a_i · Σ_j k(|x_i - y_j|²) b_j` the gradient is
//! `∂L/∂x_i = Σ_j 2 k'(|x_i - y_j|²) (a_i · b_j) (x_i - y_j)`.
//!
//! Run with: cargo run --example grad_convolution

use anyhow::Result;
use genred_ad::GradientPlan;
use genred_core::{kernel_product, KernelKind};
use genred_exec::{Axis, Genred, ReductionOp};
use scirs2_core::ndarray_ext::Array2;
use scirs2_core::random::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;

const M: usize = 2000;
const N: usize = 2000;
const D: usize = 3;
const E: usize = 3;
const REPEAT: usize = 3;

/// Derivative of the kernel profile with respect to the squared distance
fn profile_derivative(kind: KernelKind, g: f64, r2: f64) -> f64 {
    let s = g * r2;
    match kind {
        KernelKind::Gaussian => -g * (-s).exp(),
        KernelKind::Laplacian if s == 0.0 => 0.0,
        KernelKind::Laplacian => -0.5 * g / s.sqrt() * (-s.sqrt()).exp(),
        KernelKind::Cauchy => -g / (1.0 + s).powi(2),
        KernelKind::InverseMultiquadric => -0.5 * g * (1.0 + s).powf(-1.5),
    }
}

/// Plain double loop over all pairs
fn chain_rule(
    kind: KernelKind,
    a: &Array2<f64>,
    x: &Array2<f64>,
    y: &Array2<f64>,
    b: &Array2<f64>,
    g: f64,
) -> Array2<f64> {
    let mut grad = Array2::zeros((x.nrows(), D));
    for i in 0..x.nrows() {
        for j in 0..y.nrows() {
            let r2: f64 = (0..D).map(|k| (x[[i, k]] - y[[j, k]]).powi(2)).sum();
            let ab: f64 = (0..E).map(|e| a[[i, e]] * b[[j, e]]).sum();
            let w = 2.0 * profile_derivative(kind, g, r2) * ab;
            for k in 0..D {
                grad[[i, k]] += w * (x[[i, k]] - y[[j, k]]);
            }
        }
    }
    grad
}

fn median(mut times: Vec<f64>) -> f64 {
    times.sort_by(f64::total_cmp);
    times[times.len() / 2]
}

fn main() -> Result<()> {
    println!("=== Convolution Gradients ===\n");
    let mut rng = StdRng::seed_from_u64(0);

    let a = Array2::from_shape_fn((M, E), |_| rng.random_range(0.0..1.0));
    let x = Array2::from_shape_fn((M, D), |_| rng.random_range(0.0..1.0));
    let y = Array2::from_shape_fn((N, D), |_| rng.random_range(0.0..1.0));
    let b = Array2::from_shape_fn((N, E), |_| rng.random_range(0.0..1.0));
    let sigma = 0.4;
    let gamma = 1.0 / (sigma * sigma);
    let g = Array2::from_elem((1, 1), gamma);
    let args = [x.view(), y.view(), b.view(), g.view()];

    println!("Timings for {}x{} convolution gradients:", M, N);
    for kind in KernelKind::ALL {
        println!("kernel: {}", kind);

        let genred = Genred::new(kernel_product(kind, D, E)?, ReductionOp::Sum, Axis::OverJ)?;
        let plan = GradientPlan::new(&genred, "X")?;

        let start = Instant::now();
        let reference = chain_rule(kind, &a, &x, &y, &b, gamma);
        println!("Time for double loop:    {:.4}s", start.elapsed().as_secs_f64());

        let grad = plan.evaluate(&args, a.view())?;
        let times = (0..REPEAT)
            .map(|_| {
                let start = Instant::now();
                plan.evaluate(&args, a.view())
                    .map(|_| start.elapsed().as_secs_f64())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let error = (&grad - &reference)
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()));
        println!(
            "Time for gradient plan:  {:.4}s   (absolute error: {:.3e})",
            median(times),
            error
        );
    }

    Ok(())
}
