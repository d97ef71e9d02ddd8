//! Tiled generic reductions
//!
//! [`Genred`] evaluates `out[i] = ⊕_j F(x_i, y_j, p)` (or the transposed
//! reduction over `i`) without ever materializing the `M × N` grid.
//!
//! # Sweep
//!
//! The outer range is cut into tiles of `ti` rows. Each outer tile is owned by
//! exactly one worker, which:
//!
//! 1. initializes one accumulator per `(row, component)` to the identity,
//! 2. walks the inner range in tiles of `tj` rows, in increasing order,
//!    packing each inner tile's operand rows into a contiguous buffer,
//! 3. folds every pair's formula value into its row's accumulator, in
//!    increasing inner index,
//! 4. finalizes its rows straight into its disjoint slice of the output.
//!
//! Because every row is folded in the same order whatever `ti` and `tj` are,
//! `Direct` sums, extrema, arg reductions and LogSumExp are bit-identical
//! across tile sizes and thread counts.
//!
//! # Examples
//!
//! ```
//! use genred_core::expr::{sqdist, var};
//! use genred_core::FormulaBuilder;
//! use genred_exec::{Axis, Genred, ReductionOp};
//! use scirs2_core::ndarray_ext::array;
//!
//! let expr = (-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("B");
//! let formula = FormulaBuilder::new()
//!     .vi("X", 1)
//!     .vj("Y", 1)
//!     .vj("B", 1)
//!     .pm("G", 1)
//!     .build(&expr)
//!     .unwrap();
//!
//! let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap();
//!
//! let x = array![[0.0], [1.0]];
//! let y = array![[0.0], [1.0], [2.0]];
//! let b = array![[1.0], [1.0], [1.0]];
//! let g = array![[1.0]];
//! let out = genred
//!     .evaluate(&[x.view(), y.view(), b.view(), g.view()])
//!     .unwrap();
//!
//! assert_eq!(out.dim(), (2, 1));
//! let expected = 1.0 + (-1.0f64).exp() + (-4.0f64).exp();
//! assert!((out[[0, 0]] - expected).abs() < 1e-12);
//! ```

use crate::accumulator::TileAccumulator;
use crate::cache::{ProgramCache, ProgramKey};
use crate::config::EvalConfig;
use crate::operands::{resolve_extents, ExtentHint, Extents};
use crate::program::Program;
use crate::reduction::{Axis, Reduction, ReductionOp};
use crate::tiling::{resolve_tiles, Footprint, TileSize};
use genred_core::{Formula, GenredError, GenredResult, Precision, Scalar};
use scirs2_core::ndarray_ext::{Array2, ArrayView2, ArrayViewMut2};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use scirs2_core::parallel_ops::*;

#[derive(Clone)]
enum ProgramSource {
    Owned(Arc<Program>),
    Cached(ProgramCache),
}

/// A formula bound to a reduction, ready to evaluate
#[derive(Clone)]
pub struct Genred {
    formula: Formula,
    reduction: Reduction,
    config: EvalConfig,
    source: ProgramSource,
}

impl fmt::Debug for Genred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Genred")
            .field("formula", &self.formula.to_string())
            .field("reduction", &self.reduction)
            .field("config", &self.config)
            .field("cached", &matches!(self.source, ProgramSource::Cached(_)))
            .finish()
    }
}

impl Genred {
    /// Bind `formula` to a reduction `op` over `axis`
    pub fn new(formula: Formula, op: ReductionOp, axis: Axis) -> GenredResult<Self> {
        let reduction = Reduction::new(op, axis);
        let program = Program::compile(&formula, axis)?;
        Ok(Self {
            formula,
            reduction,
            config: EvalConfig::default(),
            source: ProgramSource::Owned(Arc::new(program)),
        })
    }

    /// Parse the reduction by name (`"Sum"`, `"LogSumExp"`, `"Min_ArgMin"`, ...)
    pub fn from_names(formula: Formula, op: &str, axis: usize) -> GenredResult<Self> {
        Self::new(formula, op.parse()?, Axis::from_index(axis)?)
    }

    /// Replace the evaluation options
    pub fn with_config(mut self, config: EvalConfig) -> GenredResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Fetch compiled programs from `cache` instead of owning one
    pub fn with_cache(mut self, cache: &ProgramCache) -> Self {
        self.source = ProgramSource::Cached(cache.clone());
        self
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Columns of the output buffer
    pub fn output_dim(&self) -> usize {
        self.reduction.op.output_dim(self.formula.dim())
    }

    /// Compiled program for one precision
    pub fn program(&self, precision: Precision) -> GenredResult<Arc<Program>> {
        match &self.source {
            ProgramSource::Owned(program) => Ok(program.clone()),
            ProgramSource::Cached(cache) => {
                let key = ProgramKey::new(&self.formula, self.reduction, &self.config, precision);
                cache.get_or_compile(&key, &self.formula)
            }
        }
    }

    /// Validate operands and infer `(M, N)` from them
    pub fn extents<T: Scalar>(&self, args: &[ArrayView2<'_, T>]) -> GenredResult<Extents> {
        resolve_extents(&self.formula, args, ExtentHint::default())
    }

    /// Evaluate with extents inferred from the operands
    pub fn evaluate<T: Scalar>(&self, args: &[ArrayView2<'_, T>]) -> GenredResult<Array2<T>> {
        let extents = resolve_extents(&self.formula, args, ExtentHint::default())?;
        self.evaluate_resolved(args, extents)
    }

    /// Evaluate with explicit `M` and `N`
    ///
    /// Needed when one side of the grid has no variables; when operands do
    /// carry an extent it must agree with the explicit one.
    pub fn evaluate_with_extents<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        m: usize,
        n: usize,
    ) -> GenredResult<Array2<T>> {
        let hint = ExtentHint {
            m: Some(m),
            n: Some(n),
        };
        let extents = resolve_extents(&self.formula, args, hint)?;
        self.evaluate_resolved(args, extents)
    }

    /// Evaluate into a caller-provided `(outer extent, output_dim)` buffer
    ///
    /// The buffer's row count doubles as the outer extent when no operand
    /// carries it. On error `out` is left untouched.
    pub fn evaluate_into<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        mut out: ArrayViewMut2<'_, T>,
    ) -> GenredResult<()> {
        let rows = out.nrows();
        let hint = match self.reduction.axis {
            Axis::OverJ => ExtentHint {
                m: Some(rows),
                n: None,
            },
            Axis::OverI => ExtentHint {
                m: None,
                n: Some(rows),
            },
        };
        let extents = resolve_extents(&self.formula, args, hint)?;
        self.check_output(extents, out.dim())?;
        let program = self.program(T::PRECISION)?;

        match out.as_slice_mut() {
            Some(slice) => self.sweep(&program, args, extents, slice),
            None => {
                let mut buffer = vec![T::zero(); out.len()];
                self.sweep(&program, args, extents, &mut buffer);
                for (dst, src) in out.iter_mut().zip(buffer) {
                    *dst = src;
                }
            }
        }
        Ok(())
    }

    fn evaluate_resolved<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        extents: Extents,
    ) -> GenredResult<Array2<T>> {
        let program = self.program(T::PRECISION)?;
        let mut out = Array2::<T>::zeros((self.outer_extent(extents), self.output_dim()));
        let slice = out.as_slice_mut().ok_or_else(|| {
            GenredError::operation("evaluate", "freshly allocated output is not contiguous")
        })?;
        self.sweep(&program, args, extents, slice);
        Ok(out)
    }

    /// Rows of the output for the given extents
    pub fn outer_extent(&self, extents: Extents) -> usize {
        match self.reduction.axis {
            Axis::OverJ => extents.m,
            Axis::OverI => extents.n,
        }
    }

    fn inner_extent(&self, extents: Extents) -> usize {
        match self.reduction.axis {
            Axis::OverJ => extents.n,
            Axis::OverI => extents.m,
        }
    }

    fn check_output(&self, extents: Extents, shape: (usize, usize)) -> GenredResult<()> {
        let expected = (self.outer_extent(extents), self.output_dim());
        if shape != expected {
            return Err(GenredError::dimension_mismatch(
                "evaluate_into",
                vec![expected.0, expected.1],
                vec![shape.0, shape.1],
                format!("output buffer for {}", self.reduction),
            ));
        }
        Ok(())
    }

    fn footprint(&self, program: &Program) -> Footprint {
        let dim = self.formula.dim();
        Footprint {
            outer_row_width: program.outer_width() + 2 * dim + self.output_dim(),
            inner_row_width: program.inner_width().max(1),
            scratch_width: program.scratch_width(),
        }
    }

    /// Fill the row-major output slice; operands are already validated
    fn sweep<T: Scalar>(
        &self,
        program: &Program,
        args: &[ArrayView2<'_, T>],
        extents: Extents,
        out: &mut [T],
    ) {
        let outer = self.outer_extent(extents);
        let inner = self.inner_extent(extents);
        let tiles = resolve_tiles(
            self.config.tile,
            &self.footprint(program),
            T::PRECISION,
            outer,
            inner,
        );
        log::debug!(
            "{} over {}x{} ({}): tiles {}x{}, {} outer tiles",
            self.reduction,
            extents.m,
            extents.n,
            T::PRECISION,
            tiles.ti,
            tiles.tj,
            tiles.outer_tiles(outer)
        );

        let base = program.prepare_scratch(args);
        let chunk = tiles.ti * self.output_dim();
        let run = |(tile, rows): (usize, &mut [T])| {
            self.sweep_tile(program, args, &base, tiles, tile * tiles.ti, inner, rows);
        };

        #[cfg(feature = "parallel")]
        {
            if self.config.parallel && outer > tiles.ti {
                out.par_chunks_mut(chunk).enumerate().for_each(run);
                return;
            }
        }

        out.chunks_mut(chunk).enumerate().for_each(run);
    }

    /// Reduce one outer tile starting at row `first` into `out`
    #[allow(clippy::too_many_arguments)]
    fn sweep_tile<T: Scalar>(
        &self,
        program: &Program,
        args: &[ArrayView2<'_, T>],
        base: &[T],
        tiles: TileSize,
        first: usize,
        inner: usize,
        out: &mut [T],
    ) {
        let out_dim = self.output_dim();
        let rows = out.len() / out_dim;
        let width = program.inner_width();

        let mut scratch = base.to_vec();
        let mut acc = TileAccumulator::new(
            self.reduction.op,
            self.config.sum_scheme,
            rows,
            self.formula.dim(),
        );
        let mut pack = vec![T::zero(); tiles.tj * width];

        let mut start = 0;
        while start < inner {
            let end = (start + tiles.tj).min(inner);
            program.pack_inner(args, start..end, &mut pack);

            for row in 0..rows {
                program.load_outer(args, first + row, &mut scratch);
                for (offset, index) in (start..end).enumerate() {
                    let packed = &pack[offset * width..(offset + 1) * width];
                    let value = program.eval_packed(packed, &mut scratch);
                    acc.fold(row, value, index);
                }
            }

            acc.end_tile();
            start = end;
        }

        for (row, dst) in out.chunks_exact_mut(out_dim).enumerate() {
            acc.finalize_row(row, dst);
        }
    }
}
