//! Floating-point element types accepted by the engine
//!
//! Every evaluation call is monomorphized over a single [`Scalar`] type, so an
//! `f32` operand can never be mixed with an `f64` one inside a call. Callers
//! that only know the width at runtime go through the dynamic operand layer
//! in `genred-exec`, which rejects mixed widths explicitly.

use scirs2_core::numeric::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// Floating-point width of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    F32,
    F64,
}

impl Precision {
    /// Size of one element in bytes
    pub fn bytes(self) -> usize {
        match self {
            Precision::F32 => 4,
            Precision::F64 => 8,
        }
    }
}

impl Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::F32 => write!(f, "f32"),
            Precision::F64 => write!(f, "f64"),
        }
    }
}

/// Element type of operand and output buffers
pub trait Scalar:
    Float + FromPrimitive + Default + Debug + Display + Send + Sync + 'static
{
    /// Width tag used in cache keys and precision checks
    const PRECISION: Precision;

    /// Convert a formula literal (always stored as `f64`)
    fn from_f64_lossy(value: f64) -> Self;

    /// Widen to `f64` for tolerance checks and reporting
    fn as_f64(self) -> f64;

    /// Convert an index (arg-reductions store indices in the value type)
    fn from_index(index: usize) -> Self {
        Self::from_f64_lossy(index as f64)
    }
}

impl Scalar for f32 {
    const PRECISION: Precision = Precision::F32;

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Scalar for f64 {
    const PRECISION: Precision = Precision::F64;

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_tags() {
        assert_eq!(<f32 as Scalar>::PRECISION, Precision::F32);
        assert_eq!(<f64 as Scalar>::PRECISION, Precision::F64);
        assert_eq!(Precision::F32.bytes(), 4);
        assert_eq!(Precision::F64.bytes(), 8);
        assert_eq!(Precision::F32.to_string(), "f32");
    }

    #[test]
    fn test_index_conversion() {
        assert_eq!(<f32 as Scalar>::from_index(7), 7.0f32);
        assert_eq!(<f64 as Scalar>::from_index(1 << 20), 1048576.0);
    }
}
