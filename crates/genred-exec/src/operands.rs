//! Operand binding and extent inference
//!
//! Operands are bound positionally to the variable table. Each buffer is a
//! row-major `(extent, dim)` view: `Vi` buffers have `M` rows, `Vj` buffers
//! `N` rows and `Pm` buffers exactly one row. Every check runs before the
//! engine touches the output, so a rejected call leaves it unchanged.

use genred_core::{Category, Formula, GenredError, GenredResult, Scalar};
use scirs2_core::ndarray_ext::ArrayView2;

/// Extents of the `i` and `j` ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extents {
    pub m: usize,
    pub n: usize,
}

/// Extents supplied by the caller, if any
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExtentHint {
    pub m: Option<usize>,
    pub n: Option<usize>,
}

/// Validate operand shapes against the variable table and resolve `(M, N)`
pub(crate) fn resolve_extents<T: Scalar>(
    formula: &Formula,
    args: &[ArrayView2<'_, T>],
    hint: ExtentHint,
) -> GenredResult<Extents> {
    let vars = formula.vars();
    if args.len() != vars.len() {
        return Err(GenredError::dimension_mismatch(
            "evaluate",
            vec![vars.len()],
            vec![args.len()],
            format!("operand count for variables [{}]", vars),
        ));
    }

    let mut m = hint.m;
    let mut n = hint.n;

    for (var, view) in vars.iter().zip(args) {
        let (rows, cols) = view.dim();
        if cols != var.dim() {
            return Err(GenredError::dimension_mismatch(
                "evaluate",
                vec![var.dim()],
                vec![cols],
                format!("feature dimension of variable '{}' ({})", var.name(), var.category()),
            ));
        }

        let extent = match var.category() {
            Category::Vi => &mut m,
            Category::Vj => &mut n,
            Category::Pm => {
                if rows != 1 {
                    return Err(GenredError::dimension_mismatch(
                        "evaluate",
                        vec![1, cols],
                        vec![rows, cols],
                        format!("parameter '{}' must have exactly one row", var.name()),
                    ));
                }
                continue;
            }
        };

        match *extent {
            Some(expected) if expected != rows => {
                return Err(GenredError::dimension_mismatch(
                    "evaluate",
                    vec![expected, cols],
                    vec![rows, cols],
                    format!(
                        "row count of variable '{}' ({})",
                        var.name(),
                        var.category()
                    ),
                ));
            }
            Some(_) => {}
            None => *extent = Some(rows),
        }
    }

    let missing = |axis: &str, category: Category| {
        GenredError::operation(
            "evaluate",
            format!(
                "cannot infer {} without a {} variable; pass extents explicitly",
                axis, category
            ),
        )
    };
    Ok(Extents {
        m: m.ok_or_else(|| missing("M", Category::Vi))?,
        n: n.ok_or_else(|| missing("N", Category::Vj))?,
    })
}
