//! Untiled reference evaluation
//!
//! [`Genred::evaluate_naive`] runs the textbook double loop: for every output
//! row it materializes the whole row of formula values and reduces it in one
//! pass (two for LogSumExp). It shares nothing with the tiled sweep except the
//! per-pair formula evaluation, which makes it a cross-check for the
//! accumulators, the tiling and the parallel split.

use crate::engine::Genred;
use crate::operands::Extents;
use crate::reduction::{Axis, ReductionOp};
use genred_core::{GenredResult, Scalar};
use scirs2_core::ndarray_ext::{Array2, ArrayView2};

impl Genred {
    /// Evaluate with a plain double loop over all `(i, j)` pairs
    ///
    /// Memory is `O(N · D)` per output row; use only for validation.
    pub fn evaluate_naive<T: Scalar>(&self, args: &[ArrayView2<'_, T>]) -> GenredResult<Array2<T>> {
        let extents = self.extents(args)?;
        self.evaluate_naive_with_extents(args, extents)
    }

    /// [`evaluate_naive`](Self::evaluate_naive) with explicit extents
    pub fn evaluate_naive_with_extents<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        extents: Extents,
    ) -> GenredResult<Array2<T>> {
        let program = self.program(T::PRECISION)?;
        let op = self.reduction().op;
        let dim = self.formula().dim();
        let (outer, inner) = match self.reduction().axis {
            Axis::OverJ => (extents.m, extents.n),
            Axis::OverI => (extents.n, extents.m),
        };

        let mut out = Array2::<T>::zeros((outer, self.output_dim()));
        let mut scratch = program.prepare_scratch(args);

        for (row, mut out_row) in out.outer_iter_mut().enumerate() {
            let values: Vec<Vec<T>> = (0..inner)
                .map(|col| program.eval_pair(args, row, col, &mut scratch))
                .collect();

            for k in 0..dim {
                let column: Vec<T> = values.iter().map(|v| v[k]).collect();
                let (value, index) = reduce_column(op, &column);
                match op {
                    ReductionOp::ArgMin | ReductionOp::ArgMax => {
                        out_row[k] = index.map_or_else(T::nan, T::from_index)
                    }
                    ReductionOp::MinArgMin | ReductionOp::MaxArgMax => {
                        out_row[k] = value;
                        out_row[dim + k] = index.map_or_else(T::nan, T::from_index);
                    }
                    _ => out_row[k] = value,
                }
            }
        }
        Ok(out)
    }
}

/// Reduce one component across the inner range: `(value, winning index)`
///
/// The index is `None` when no non-NaN value was seen.
fn reduce_column<T: Scalar>(op: ReductionOp, column: &[T]) -> (T, Option<usize>) {
    let first_best = |better: fn(T, T) -> bool, start: T| {
        let mut best = (start, None);
        for (j, &v) in column.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            if best.1.is_none() || better(v, best.0) {
                best = (v, Some(j));
            }
        }
        best
    };

    match op {
        ReductionOp::Sum => (column.iter().fold(T::zero(), |acc, &v| acc + v), None),
        ReductionOp::Max | ReductionOp::ArgMax | ReductionOp::MaxArgMax => {
            first_best(|v, best| v > best, T::neg_infinity())
        }
        ReductionOp::Min | ReductionOp::ArgMin | ReductionOp::MinArgMin => {
            first_best(|v, best| v < best, T::infinity())
        }
        ReductionOp::LogSumExp => {
            let (max, _) = first_best(|v, best| v > best, T::neg_infinity());
            if max.is_infinite() {
                return (max, None);
            }
            let total = column
                .iter()
                .fold(T::zero(), |acc, &v| acc + (v - max).exp());
            (max + total.ln(), None)
        }
    }
}
