//! Per-row reduction state for one outer tile
//!
//! A [`TileAccumulator`] holds one accumulator per `(row, component)` of an
//! outer tile, laid out row-major in flat buffers. Values are folded in the
//! order the engine visits them, which is increasing `j` (or `i`) within a
//! row; no fold ever reorders, so `Direct` sums are reproducible bit for bit.
//!
//! # LogSumExp
//!
//! The running state is a maximum `m` and a scaled sum `s = Σ exp(v - m)`:
//!
//! - `v = -inf` leaves the state unchanged, and so does anything once `m = +inf`
//! - `v > m` rescales: `s ← s·exp(m - v) + 1`, `m ← v`
//! - otherwise `s ← s + exp(v - m)`
//!
//! and the result is `m + ln(s)`, or `m` itself when `m` is infinite. Every
//! exponent is non-positive, so no intermediate overflows.
//!
//! # Arg reductions
//!
//! The first non-NaN value always wins a row; after that the best value is
//! only replaced on a strict improvement, so among equal values the first
//! index visited wins. A row that saw no non-NaN value (an empty inner range
//! or an all-NaN row) reports a NaN index.

use crate::config::SumScheme;
use crate::reduction::ReductionOp;
use genred_core::Scalar;

/// Index slot of an arg reduction that has not seen a value yet
const NO_INDEX: usize = usize::MAX;

/// Accumulators for `rows × dim` reduced components
#[derive(Debug, Clone)]
pub struct TileAccumulator<T: Scalar> {
    op: ReductionOp,
    scheme: SumScheme,
    dim: usize,
    /// Running value: sum, extremum or LSE maximum
    values: Vec<T>,
    /// Kahan compensation, block partial sum or LSE scaled sum
    aux: Vec<T>,
    /// Winning index for arg reductions
    index: Vec<usize>,
}

impl<T: Scalar> TileAccumulator<T> {
    /// Fresh accumulators set to the identity of `op`
    pub fn new(op: ReductionOp, scheme: SumScheme, rows: usize, dim: usize) -> Self {
        let len = rows * dim;
        let index = if op.tracks_index() {
            vec![NO_INDEX; len]
        } else {
            Vec::new()
        };
        Self {
            op,
            scheme,
            dim,
            values: vec![T::from_f64_lossy(op.identity()); len],
            aux: vec![T::zero(); len],
            index,
        }
    }

    /// Number of rows held
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.values.len() / self.dim
        }
    }

    /// Reset every row to the identity
    pub fn reset(&mut self) {
        let identity = T::from_f64_lossy(self.op.identity());
        self.values.iter_mut().for_each(|v| *v = identity);
        self.aux.iter_mut().for_each(|v| *v = T::zero());
        self.index.iter_mut().for_each(|k| *k = NO_INDEX);
    }

    /// Fold the formula value of pair `(row, index)` into the row's accumulators
    #[inline]
    pub fn fold(&mut self, row: usize, value: &[T], index: usize) {
        debug_assert_eq!(value.len(), self.dim);
        let base = row * self.dim;

        for (k, &v) in value.iter().enumerate() {
            let slot = base + k;
            match self.op {
                ReductionOp::Sum => match self.scheme {
                    SumScheme::Direct => self.values[slot] = self.values[slot] + v,
                    SumScheme::BlockSum => self.aux[slot] = self.aux[slot] + v,
                    SumScheme::Kahan => {
                        let y = v - self.aux[slot];
                        let t = self.values[slot] + y;
                        self.aux[slot] = (t - self.values[slot]) - y;
                        self.values[slot] = t;
                    }
                },
                ReductionOp::Max => {
                    if v > self.values[slot] {
                        self.values[slot] = v;
                    }
                }
                ReductionOp::Min => {
                    if v < self.values[slot] {
                        self.values[slot] = v;
                    }
                }
                ReductionOp::LogSumExp => {
                    let m = self.values[slot];
                    if v == T::neg_infinity() || m == T::infinity() {
                        continue;
                    }
                    if v > m {
                        self.aux[slot] = self.aux[slot] * (m - v).exp() + T::one();
                        self.values[slot] = v;
                    } else {
                        self.aux[slot] = self.aux[slot] + (v - m).exp();
                    }
                }
                ReductionOp::ArgMin | ReductionOp::MinArgMin => {
                    let first = self.index[slot] == NO_INDEX && !v.is_nan();
                    if first || v < self.values[slot] {
                        self.values[slot] = v;
                        self.index[slot] = index;
                    }
                }
                ReductionOp::ArgMax | ReductionOp::MaxArgMax => {
                    let first = self.index[slot] == NO_INDEX && !v.is_nan();
                    if first || v > self.values[slot] {
                        self.values[slot] = v;
                        self.index[slot] = index;
                    }
                }
            }
        }
    }

    /// Close the current inner tile
    ///
    /// Only `BlockSum` keeps per-tile state: the tile's partial sums are added
    /// to the row totals.
    pub fn end_tile(&mut self) {
        if self.op == ReductionOp::Sum && self.scheme == SumScheme::BlockSum {
            for (total, partial) in self.values.iter_mut().zip(self.aux.iter_mut()) {
                *total = *total + *partial;
                *partial = T::zero();
            }
        }
    }

    /// Write the final reduced row into `out`
    ///
    /// `out` must hold `op.output_dim(dim)` elements.
    pub fn finalize_row(&self, row: usize, out: &mut [T]) {
        debug_assert_eq!(out.len(), self.op.output_dim(self.dim));
        let base = row * self.dim;
        let values = &self.values[base..base + self.dim];

        match self.op {
            ReductionOp::Sum => {
                let aux = &self.aux[base..base + self.dim];
                for ((o, &v), &a) in out.iter_mut().zip(values).zip(aux) {
                    *o = match self.scheme {
                        SumScheme::BlockSum => v + a,
                        SumScheme::Direct | SumScheme::Kahan => v,
                    };
                }
            }
            ReductionOp::Max | ReductionOp::Min => out.copy_from_slice(values),
            ReductionOp::LogSumExp => {
                let scaled = &self.aux[base..base + self.dim];
                for ((o, &m), &s) in out.iter_mut().zip(values).zip(scaled) {
                    *o = if m.is_infinite() {
                        m
                    } else {
                        m + s.ln()
                    };
                }
            }
            ReductionOp::ArgMin | ReductionOp::ArgMax => {
                let index = &self.index[base..base + self.dim];
                for (o, &k) in out.iter_mut().zip(index) {
                    *o = index_value(k);
                }
            }
            ReductionOp::MinArgMin | ReductionOp::MaxArgMax => {
                let index = &self.index[base..base + self.dim];
                let (value_out, index_out) = out.split_at_mut(self.dim);
                value_out.copy_from_slice(values);
                for (o, &k) in index_out.iter_mut().zip(index) {
                    *o = index_value(k);
                }
            }
        }
    }
}

fn index_value<T: Scalar>(k: usize) -> T {
    if k == NO_INDEX {
        T::nan()
    } else {
        T::from_index(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduce(op: ReductionOp, scheme: SumScheme, values: &[f64]) -> Vec<f64> {
        let mut acc = TileAccumulator::<f64>::new(op, scheme, 1, 1);
        for (j, v) in values.iter().enumerate() {
            acc.fold(0, &[*v], j);
            if j % 2 == 1 {
                acc.end_tile();
            }
        }
        acc.end_tile();
        let mut out = vec![0.0; op.output_dim(1)];
        acc.finalize_row(0, &mut out);
        out
    }

    #[test]
    fn test_sum_schemes_agree_on_exact_values() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        for scheme in [SumScheme::Direct, SumScheme::BlockSum, SumScheme::Kahan] {
            assert_eq!(reduce(ReductionOp::Sum, scheme, &values), vec![15.0]);
        }
    }

    #[test]
    fn test_kahan_recovers_lost_digits() {
        let mut values = vec![1.0];
        values.extend(std::iter::repeat(1e-16).take(1000));
        let direct = reduce(ReductionOp::Sum, SumScheme::Direct, &values)[0];
        let kahan = reduce(ReductionOp::Sum, SumScheme::Kahan, &values)[0];
        assert_eq!(direct, 1.0);
        assert!((kahan - (1.0 + 1e-13)).abs() < 1e-15);
    }

    #[test]
    fn test_extrema_ignore_nan() {
        let values = [3.0, f64::NAN, 7.0, -1.0];
        assert_eq!(reduce(ReductionOp::Max, SumScheme::Direct, &values), vec![7.0]);
        assert_eq!(reduce(ReductionOp::Min, SumScheme::Direct, &values), vec![-1.0]);
    }

    #[test]
    fn test_logsumexp_is_overflow_free() {
        let out = reduce(ReductionOp::LogSumExp, SumScheme::Direct, &[1e30, 1e30]);
        assert!(out[0].is_finite());
        assert!((out[0] - 1e30).abs() <= 1e30 * f64::EPSILON);

        let out = reduce(ReductionOp::LogSumExp, SumScheme::Direct, &[0.0, 0.0]);
        assert!((out[0] - 2f64.ln()).abs() < 1e-15);

        let out = reduce(ReductionOp::LogSumExp, SumScheme::Direct, &[-1e30, -1e30]);
        assert!(out[0].is_finite());
    }

    #[test]
    fn test_logsumexp_empty_and_negative_infinity() {
        let out = reduce(ReductionOp::LogSumExp, SumScheme::Direct, &[]);
        assert_eq!(out[0], f64::NEG_INFINITY);

        let out = reduce(
            ReductionOp::LogSumExp,
            SumScheme::Direct,
            &[f64::NEG_INFINITY, 0.0],
        );
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_logsumexp_positive_infinity() {
        let inf = f64::INFINITY;
        let rows: [&[f64]; 3] = [&[inf, inf], &[1.0, inf, 2.0, inf], &[inf, f64::NEG_INFINITY, 3.0]];
        for values in rows {
            let out = reduce(ReductionOp::LogSumExp, SumScheme::Direct, values);
            assert_eq!(out[0], inf, "{:?}", values);
        }
        assert_eq!(reduce(ReductionOp::Max, SumScheme::Direct, &[inf, inf]), vec![inf]);
    }

    #[test]
    fn test_arg_without_candidates_is_nan() {
        let out = reduce(ReductionOp::ArgMin, SumScheme::Direct, &[]);
        assert!(out[0].is_nan());

        let out = reduce(ReductionOp::MaxArgMax, SumScheme::Direct, &[f64::NAN, f64::NAN]);
        assert_eq!(out[0], f64::NEG_INFINITY);
        assert!(out[1].is_nan());

        // a value equal to the identity still wins the row
        let out = reduce(ReductionOp::MinArgMin, SumScheme::Direct, &[f64::NAN, f64::INFINITY]);
        assert_eq!(out, vec![f64::INFINITY, 1.0]);
    }

    #[test]
    fn test_arg_ties_keep_first_index() {
        let values = [2.0, 1.0, 5.0, 1.0, 5.0];
        assert_eq!(reduce(ReductionOp::ArgMin, SumScheme::Direct, &values), vec![1.0]);
        assert_eq!(reduce(ReductionOp::ArgMax, SumScheme::Direct, &values), vec![2.0]);
        assert_eq!(
            reduce(ReductionOp::MinArgMin, SumScheme::Direct, &values),
            vec![1.0, 1.0]
        );
        assert_eq!(
            reduce(ReductionOp::MaxArgMax, SumScheme::Direct, &values),
            vec![5.0, 2.0]
        );
    }

    #[test]
    fn test_rows_are_independent() {
        let mut acc = TileAccumulator::<f32>::new(ReductionOp::Sum, SumScheme::Direct, 2, 2);
        acc.fold(0, &[1.0, 2.0], 0);
        acc.fold(1, &[10.0, 20.0], 0);
        acc.fold(1, &[1.0, 1.0], 1);

        let mut row = [0.0f32; 2];
        acc.finalize_row(0, &mut row);
        assert_eq!(row, [1.0, 2.0]);
        acc.finalize_row(1, &mut row);
        assert_eq!(row, [11.0, 21.0]);
        assert_eq!(acc.rows(), 2);

        acc.reset();
        acc.finalize_row(1, &mut row);
        assert_eq!(row, [0.0, 0.0]);
    }
}
