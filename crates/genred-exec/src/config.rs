//! Evaluation options
//!
//! Evaluation options let callers steer how the tiled engine sweeps the
//! `(i, j)` grid without changing results beyond floating-point reassociation
//! (and, for [`SumScheme::Direct`], not at all).
//!
//! # Examples
//!
//! ```
//! use genred_exec::{EvalConfig, SumScheme, TilePolicy};
//!
//! let config = EvalConfig::default()
//!     .with_tile(64, 256)
//!     .with_sum_scheme(SumScheme::Kahan)
//!     .with_parallel(false);
//!
//! assert_eq!(config.tile, TilePolicy::Fixed { ti: 64, tj: 256 });
//! ```

use crate::tiling::{CacheConfig, CacheLevel};
use genred_core::{GenredError, GenredResult};

/// How tile extents are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TilePolicy {
    /// Explicit outer (`ti`) and inner (`tj`) tile extents
    Fixed { ti: usize, tj: usize },
    /// Choose extents so one worker's working set stays under a byte budget
    Auto { working_set_bytes: usize },
}

impl TilePolicy {
    /// Automatic extents whose working set fits one level of `cache`
    pub fn fit_cache(cache: &CacheConfig, level: CacheLevel) -> Self {
        TilePolicy::Auto {
            working_set_bytes: cache.size(level),
        }
    }
}

impl Default for TilePolicy {
    fn default() -> Self {
        Self::fit_cache(&CacheConfig::default(), CacheLevel::default())
    }
}

/// Summation strategy for `Sum` reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SumScheme {
    /// Plain running sum in `j` order
    #[default]
    Direct,
    /// Partial sum per inner tile, added to the row total at the end of the tile
    BlockSum,
    /// Compensated (Kahan) summation
    Kahan,
}

/// Options for one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvalConfig {
    /// Tile extent policy
    pub tile: TilePolicy,

    /// Summation strategy for `Sum`
    pub sum_scheme: SumScheme,

    /// Sweep outer tiles on the thread pool (needs the `parallel` feature)
    pub parallel: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            tile: TilePolicy::default(),
            sum_scheme: SumScheme::Direct,
            parallel: true,
        }
    }
}

impl EvalConfig {
    /// Single-threaded evaluation with default tiling
    pub fn serial() -> Self {
        Self::default().with_parallel(false)
    }

    /// Fixed tile extents
    pub fn with_tile(mut self, ti: usize, tj: usize) -> Self {
        self.tile = TilePolicy::Fixed { ti, tj };
        self
    }

    /// Automatic tile extents sized for one cache level
    pub fn with_cache_level(mut self, level: CacheLevel) -> Self {
        self.tile = TilePolicy::fit_cache(&CacheConfig::default(), level);
        self
    }

    /// Automatic tile extents under a working-set budget
    pub fn with_working_set(mut self, working_set_bytes: usize) -> Self {
        self.tile = TilePolicy::Auto { working_set_bytes };
        self
    }

    pub fn with_sum_scheme(mut self, scheme: SumScheme) -> Self {
        self.sum_scheme = scheme;
        self
    }

    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.parallel = enable;
        self
    }

    /// Reject policies the engine cannot honor
    pub fn validate(&self) -> GenredResult<()> {
        match self.tile {
            TilePolicy::Fixed { ti, tj } if ti == 0 || tj == 0 => Err(GenredError::operation(
                "EvalConfig",
                format!("tile extents must be positive, got {}x{}", ti, tj),
            )),
            TilePolicy::Auto { working_set_bytes: 0 } => Err(GenredError::operation(
                "EvalConfig",
                "working-set budget must be positive",
            )),
            _ => Ok(()),
        }
    }
}
