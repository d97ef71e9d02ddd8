//! Gradient checking utilities
//!
//! Verifies symbolic gradients against finite differences of the forward
//! reduction:
//! - **Central difference**: `f'(x) ≈ [f(x+h) - f(x-h)] / (2h)` (error `O(h²)`)
//! - **Forward difference**: `f'(x) ≈ [f(x+h) - f(x)] / h` (error `O(h)`)
//!
//! The optimal central step for `f64` is around `ε^{1/3} ≈ 1e-5`, where the
//! total error is `O(ε^{2/3})`.
//!
//! # Example
//!
//! ```
//! use genred_ad::gradcheck::{check_genred_gradient, GradCheckConfig};
//! use genred_core::{kernel_product, KernelKind};
//! use genred_exec::{Axis, Genred, ReductionOp};
//! use scirs2_core::ndarray_ext::{array, Array2};
//!
//! let genred = Genred::new(
//!     kernel_product(KernelKind::Gaussian, 1, 1).unwrap(),
//!     ReductionOp::Sum,
//!     Axis::OverJ,
//! )
//! .unwrap();
//!
//! let args = vec![
//!     array![[0.1], [0.9]],
//!     array![[0.0], [0.5], [1.0]],
//!     array![[1.0], [-1.0], [2.0]],
//!     array![[1.5]],
//! ];
//! let cotangent = Array2::ones((2, 1));
//! let result =
//!     check_genred_gradient(&genred, &args, "X", &cotangent, &GradCheckConfig::default())
//!         .unwrap();
//! assert!(result.passed);
//! ```

use crate::grad::GradientPlan;
use anyhow::{anyhow, Result};
use genred_core::Scalar;
use genred_exec::Genred;
use scirs2_core::ndarray_ext::{Array2, ArrayView2};

/// Gradient checking configuration
#[derive(Debug, Clone)]
pub struct GradCheckConfig {
    /// Step size for finite differences (default: 1e-5)
    pub epsilon: f64,

    /// Relative tolerance for gradient comparison (default: 1e-3)
    pub rtol: f64,

    /// Absolute tolerance for gradient comparison (default: 1e-5)
    pub atol: f64,

    /// Use central difference (twice the forward evaluations)
    pub use_central_diff: bool,

    /// Log every mismatching element
    pub verbose: bool,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            rtol: 1e-3,
            atol: 1e-5,
            use_central_diff: true,
            verbose: false,
        }
    }
}

/// Result of gradient checking
#[derive(Debug, Clone)]
pub struct GradCheckResult {
    /// Maximum absolute difference between analytical and numerical gradients
    pub max_abs_diff: f64,

    /// Maximum relative difference
    pub max_rel_diff: f64,

    /// Whether every element is within tolerance
    pub passed: bool,

    /// Number of elements checked
    pub num_elements: usize,

    /// Number of elements that failed the check
    pub num_failures: usize,
}

/// Check an analytical gradient against finite differences
///
/// # Arguments
///
/// * `f` - Forward function: x -> y
/// * `df` - Gradient function: (x, grad_y) -> grad_x
/// * `x` - Point to check gradients at
/// * `grad_y` - Upstream gradient (∂L/∂y)
/// * `config` - Tolerances and step size
pub fn check_gradient<T, F, G>(
    f: F,
    df: G,
    x: &Array2<T>,
    grad_y: &Array2<T>,
    config: &GradCheckConfig,
) -> Result<GradCheckResult>
where
    T: Scalar,
    F: Fn(&Array2<T>) -> Result<Array2<T>>,
    G: Fn(&Array2<T>, &Array2<T>) -> Result<Array2<T>>,
{
    let analytical = df(x, grad_y)?;
    if analytical.dim() != x.dim() {
        return Err(anyhow!(
            "Gradient shape {:?} doesn't match input shape {:?}",
            analytical.dim(),
            x.dim()
        ));
    }

    let numerical = numerical_gradient(f, x, grad_y, config)?;
    Ok(compare_gradients(&analytical, &numerical, config))
}

/// Check the symbolic gradient of `genred` with respect to `target`
///
/// `args` are the forward operands in declaration order; the operand bound to
/// `target` is perturbed elementwise.
pub fn check_genred_gradient<T: Scalar>(
    genred: &Genred,
    args: &[Array2<T>],
    target: &str,
    cotangent: &Array2<T>,
    config: &GradCheckConfig,
) -> Result<GradCheckResult> {
    let plan = GradientPlan::new(genred, target)?;
    let position = plan.target().position();
    let x = args
        .get(position)
        .ok_or_else(|| anyhow!("no operand bound to '{}' at position {}", target, position))?;

    let f = |x: &Array2<T>| -> Result<Array2<T>> {
        Ok(genred.evaluate(&bind(args, position, x))?)
    };
    let df = |x: &Array2<T>, grad_y: &Array2<T>| -> Result<Array2<T>> {
        Ok(plan.evaluate(&bind(args, position, x), grad_y.view())?)
    };

    check_gradient(f, df, x, cotangent, config)
}

/// Operand views with `x` substituted at `position`
fn bind<'a, T: Scalar>(
    args: &'a [Array2<T>],
    position: usize,
    x: &'a Array2<T>,
) -> Vec<ArrayView2<'a, T>> {
    args.iter()
        .enumerate()
        .map(|(p, a)| if p == position { x.view() } else { a.view() })
        .collect()
}

/// `⟨grad_y, ∂f/∂x_k⟩` for every element `x_k`
fn numerical_gradient<T, F>(
    f: F,
    x: &Array2<T>,
    grad_y: &Array2<T>,
    config: &GradCheckConfig,
) -> Result<Array2<T>>
where
    T: Scalar,
    F: Fn(&Array2<T>) -> Result<Array2<T>>,
{
    let epsilon = T::from_f64_lossy(config.epsilon);
    let base = if config.use_central_diff {
        None
    } else {
        Some(f(x)?)
    };

    let mut numerical = Array2::zeros(x.dim());
    for ((r, c), slot) in numerical.indexed_iter_mut() {
        let mut x_plus = x.clone();
        x_plus[[r, c]] = x[[r, c]] + epsilon;
        let y_plus = f(&x_plus)?;

        *slot = match &base {
            None => {
                let mut x_minus = x.clone();
                x_minus[[r, c]] = x[[r, c]] - epsilon;
                let y_minus = f(&x_minus)?;
                dot_difference(grad_y, &y_plus, &y_minus)? / (epsilon + epsilon)
            }
            Some(y) => dot_difference(grad_y, &y_plus, y)? / epsilon,
        };
    }
    Ok(numerical)
}

/// `⟨w, a - b⟩`
fn dot_difference<T: Scalar>(w: &Array2<T>, a: &Array2<T>, b: &Array2<T>) -> Result<T> {
    if w.dim() != a.dim() || a.dim() != b.dim() {
        return Err(anyhow!(
            "Shape mismatch: cotangent {:?}, outputs {:?} and {:?}",
            w.dim(),
            a.dim(),
            b.dim()
        ));
    }
    Ok(w.iter()
        .zip(a.iter().zip(b.iter()))
        .fold(T::zero(), |acc, (&w, (&a, &b))| acc + w * (a - b)))
}

fn compare_gradients<T: Scalar>(
    analytical: &Array2<T>,
    numerical: &Array2<T>,
    config: &GradCheckConfig,
) -> GradCheckResult {
    let mut max_abs_diff = 0.0_f64;
    let mut max_rel_diff = 0.0_f64;
    let mut num_failures = 0;

    for ((index, &a), &n) in analytical.indexed_iter().zip(numerical.iter()) {
        let (a, n) = (a.as_f64(), n.as_f64());
        let abs_diff = (a - n).abs();
        let rel_diff = if n.abs() > f64::EPSILON {
            abs_diff / n.abs()
        } else {
            abs_diff
        };

        // NaN never compares greater, so count it explicitly
        let failed = !(abs_diff <= config.atol || rel_diff <= config.rtol);
        if failed {
            num_failures += 1;
            if config.verbose {
                log::info!(
                    "gradient mismatch at {:?}: analytical={}, numerical={}, abs_diff={:.2e}, rel_diff={:.2e}",
                    index,
                    a,
                    n,
                    abs_diff,
                    rel_diff
                );
            }
        }
        max_abs_diff = max_abs_diff.max(abs_diff);
        max_rel_diff = max_rel_diff.max(rel_diff);
    }

    let passed = num_failures == 0;
    if config.verbose {
        log::info!(
            "gradient check {}: {}/{} elements out of tolerance, max abs {:.2e}, max rel {:.2e}",
            if passed { "passed" } else { "failed" },
            num_failures,
            analytical.len(),
            max_abs_diff,
            max_rel_diff
        );
    }

    GradCheckResult {
        max_abs_diff,
        max_rel_diff,
        passed,
        num_elements: analytical.len(),
        num_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genred_core::expr::var;
    use genred_core::FormulaBuilder;
    use genred_exec::{Axis, ReductionOp};
    use scirs2_core::ndarray_ext::array;

    #[test]
    fn test_gradcheck_identity() {
        let f = |x: &Array2<f64>| Ok(x.clone());
        let df = |_x: &Array2<f64>, grad_y: &Array2<f64>| Ok(grad_y.clone());

        let x = Array2::ones((2, 3));
        let grad_y = Array2::ones((2, 3));

        let result = check_gradient(f, df, &x, &grad_y, &GradCheckConfig::default()).unwrap();
        assert!(result.passed, "Gradient check should pass for identity");
        assert!(result.max_abs_diff < 1e-6);
        assert_eq!(result.num_elements, 6);
    }

    #[test]
    fn test_gradcheck_detects_wrong_gradient() {
        let f = |x: &Array2<f64>| Ok(x.mapv(|v| v * v));
        let wrong = |x: &Array2<f64>, grad_y: &Array2<f64>| Ok(x * grad_y);

        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let grad_y = Array2::ones((2, 2));
        let result = check_gradient(f, wrong, &x, &grad_y, &GradCheckConfig::default()).unwrap();
        assert!(!result.passed);
        assert_eq!(result.num_failures, 4);
    }

    #[test]
    fn test_gradcheck_forward_difference() {
        let f = |x: &Array2<f64>| Ok(x.mapv(|v| v * v));
        let df = |x: &Array2<f64>, grad_y: &Array2<f64>| Ok(x * grad_y * 2.0);

        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let grad_y = Array2::ones((2, 2));
        let config = GradCheckConfig {
            use_central_diff: false,
            ..GradCheckConfig::default()
        };
        let result = check_gradient(f, df, &x, &grad_y, &config).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn test_gradcheck_shape_mismatch() {
        let f = |x: &Array2<f64>| Ok(x.clone());
        let df = |_x: &Array2<f64>, _g: &Array2<f64>| Ok(Array2::zeros((1, 1)));
        let x = Array2::ones((2, 2));
        assert!(check_gradient(f, df, &x, &x, &GradCheckConfig::default()).is_err());
    }

    #[test]
    fn test_genred_gradient_of_quotient() {
        let formula = FormulaBuilder::new()
            .vi("X", 2)
            .vj("Y", 2)
            .build(&((var("X") / (var("Y").square() + 1.0)).sum()))
            .unwrap();
        let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap();
        let args = vec![
            array![[0.3, -1.0], [2.0, 0.5]],
            array![[1.0, 2.0], [-0.5, 0.1], [0.0, 3.0]],
        ];
        let cotangent = array![[1.0], [-2.0]];

        for target in ["X", "Y"] {
            let result = check_genred_gradient(
                &genred,
                &args,
                target,
                &cotangent,
                &GradCheckConfig::default(),
            )
            .unwrap();
            assert!(result.passed, "{}: {:?}", target, result);
        }
    }

    #[test]
    fn test_config_default() {
        let config = GradCheckConfig::default();
        assert_eq!(config.epsilon, 1e-5);
        assert_eq!(config.rtol, 1e-3);
        assert!(config.use_central_diff);
    }
}
