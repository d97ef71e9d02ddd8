//! Runtime-typed operands
//!
//! Bindings that only learn the floating-point width at runtime wrap their
//! buffers in [`DynOperand`]. One call evaluates in exactly one width: a mix
//! of `f32` and `f64` operands is rejected before anything runs.

use crate::engine::Genred;
use genred_core::{GenredError, GenredResult, Precision};
use scirs2_core::ndarray_ext::{Array2, ArrayView2};

/// Operand buffer of either width
#[derive(Debug, Clone)]
pub enum DynOperand<'a> {
    F32(ArrayView2<'a, f32>),
    F64(ArrayView2<'a, f64>),
}

impl DynOperand<'_> {
    pub fn precision(&self) -> Precision {
        match self {
            DynOperand::F32(_) => Precision::F32,
            DynOperand::F64(_) => Precision::F64,
        }
    }

    /// `(rows, cols)` of the buffer
    pub fn dim(&self) -> (usize, usize) {
        match self {
            DynOperand::F32(v) => v.dim(),
            DynOperand::F64(v) => v.dim(),
        }
    }
}

impl<'a> From<ArrayView2<'a, f32>> for DynOperand<'a> {
    fn from(view: ArrayView2<'a, f32>) -> Self {
        DynOperand::F32(view)
    }
}

impl<'a> From<ArrayView2<'a, f64>> for DynOperand<'a> {
    fn from(view: ArrayView2<'a, f64>) -> Self {
        DynOperand::F64(view)
    }
}

/// Output buffer in the width of the call
#[derive(Debug, Clone, PartialEq)]
pub enum DynOutput {
    F32(Array2<f32>),
    F64(Array2<f64>),
}

impl DynOutput {
    pub fn precision(&self) -> Precision {
        match self {
            DynOutput::F32(_) => Precision::F32,
            DynOutput::F64(_) => Precision::F64,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        match self {
            DynOutput::F32(a) => a.dim(),
            DynOutput::F64(a) => a.dim(),
        }
    }

    /// Widen to `f64`
    pub fn into_f64(self) -> Array2<f64> {
        match self {
            DynOutput::F32(a) => a.mapv(f64::from),
            DynOutput::F64(a) => a,
        }
    }
}

impl Genred {
    /// Evaluate operands whose width is only known at runtime
    ///
    /// All operands must share one width; the output has that width.
    pub fn evaluate_dyn(&self, args: &[DynOperand<'_>]) -> GenredResult<DynOutput> {
        let precision = args.first().map(DynOperand::precision).ok_or_else(|| {
            GenredError::operation("evaluate_dyn", "no operands to take the precision from")
        })?;

        if let Some((position, other)) = args
            .iter()
            .enumerate()
            .find(|(_, a)| a.precision() != precision)
        {
            return Err(GenredError::dimension_mismatch(
                "evaluate_dyn",
                vec![precision.bytes()],
                vec![other.precision().bytes()],
                format!(
                    "element width of operand {}: {} given in a {} call",
                    position,
                    other.precision(),
                    precision
                ),
            ));
        }

        match precision {
            Precision::F32 => {
                let views: Vec<ArrayView2<'_, f32>> = args
                    .iter()
                    .filter_map(|a| match a {
                        DynOperand::F32(v) => Some(v.view()),
                        DynOperand::F64(_) => None,
                    })
                    .collect();
                self.evaluate(&views).map(DynOutput::F32)
            }
            Precision::F64 => {
                let views: Vec<ArrayView2<'_, f64>> = args
                    .iter()
                    .filter_map(|a| match a {
                        DynOperand::F64(v) => Some(v.view()),
                        DynOperand::F32(_) => None,
                    })
                    .collect();
                self.evaluate(&views).map(DynOutput::F64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::{Axis, ReductionOp};
    use genred_core::expr::var;
    use genred_core::FormulaBuilder;
    use scirs2_core::ndarray_ext::array;

    fn genred() -> Genred {
        let formula = FormulaBuilder::new()
            .vi("X", 1)
            .vj("Y", 1)
            .build(&(var("X") * var("Y")))
            .unwrap();
        Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap()
    }

    #[test]
    fn test_single_width_calls() {
        let x = array![[1.0f32], [2.0]];
        let y = array![[3.0f32], [4.0]];
        let out = genred()
            .evaluate_dyn(&[x.view().into(), y.view().into()])
            .unwrap();
        assert_eq!(out.precision(), Precision::F32);
        assert_eq!(out.into_f64(), array![[7.0], [14.0]]);

        let x = array![[1.0f64]];
        let y = array![[0.5f64]];
        let out = genred()
            .evaluate_dyn(&[DynOperand::F64(x.view()), DynOperand::F64(y.view())])
            .unwrap();
        assert_eq!(out, DynOutput::F64(array![[0.5]]));
    }

    #[test]
    fn test_mixed_widths_rejected() {
        let x = array![[1.0f32]];
        let y = array![[1.0f64]];
        let err = genred()
            .evaluate_dyn(&[x.view().into(), y.view().into()])
            .unwrap_err();
        assert!(matches!(err, GenredError::DimensionMismatch { .. }));
        assert!(err.to_string().contains("f64 given in a f32 call"));
    }

    #[test]
    fn test_no_operands_rejected() {
        assert!(genred().evaluate_dyn(&[]).is_err());
    }
}
