//! Tile extents for the pairwise sweep
//!
//! The engine never materializes the `M × N` grid. One worker holds an outer
//! tile of `ti` rows (their outer-variable slices, accumulators and output
//! rows) and one packed inner tile of `tj` rows at a time, so its working set
//! is
//!
//! ```text
//! ti · outer_row_width + tj · inner_row_width + scratch_width      (elements)
//! ```
//!
//! independent of `M` and `N`. [`resolve_tiles`] picks `ti` and `tj` for a
//! [`TilePolicy`](crate::TilePolicy), shrinking the larger contribution first
//! until the working set fits the byte budget. The default budget is the L2
//! size of [`CacheConfig`]; [`TilePolicy::fit_cache`](crate::TilePolicy::fit_cache)
//! sizes it for another level.

use crate::config::TilePolicy;
use genred_core::Precision;

/// Outer tiles never exceed this many rows, so large sweeps still split into
/// enough tiles to keep every worker busy.
pub const MAX_OUTER_TILE: usize = 256;

/// Cache level a worker's working set is sized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheLevel {
    L1,
    #[default]
    L2,
    L3,
}

/// Cache sizes used to derive default working-set budgets
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// L1 cache size in bytes (default: 32 KB)
    pub l1_size: usize,

    /// L2 cache size in bytes (default: 256 KB)
    pub l2_size: usize,

    /// L3 cache size in bytes (default: 8 MB)
    pub l3_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_size: 32 * 1024,
            l2_size: 256 * 1024,
            l3_size: 8 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Size in bytes of `level`
    pub fn size(&self, level: CacheLevel) -> usize {
        match level {
            CacheLevel::L1 => self.l1_size,
            CacheLevel::L2 => self.l2_size,
            CacheLevel::L3 => self.l3_size,
        }
    }
}

/// Per-row element counts of one compiled reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    /// Outer-variable elements plus accumulator and output elements per outer row
    pub outer_row_width: usize,
    /// Packed inner-variable elements per inner row
    pub inner_row_width: usize,
    /// Scratch elements per worker
    pub scratch_width: usize,
}

impl Footprint {
    /// Working set in bytes for the given extents
    pub fn working_set_bytes(&self, tiles: TileSize, precision: Precision) -> usize {
        (tiles.ti * self.outer_row_width + tiles.tj * self.inner_row_width + self.scratch_width)
            * precision.bytes()
    }
}

/// Resolved tile extents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSize {
    pub ti: usize,
    pub tj: usize,
}

impl TileSize {
    /// Number of outer tiles covering `outer` rows
    pub fn outer_tiles(&self, outer: usize) -> usize {
        outer.div_ceil(self.ti)
    }

    /// Number of inner tiles covering `inner` rows
    pub fn inner_tiles(&self, inner: usize) -> usize {
        inner.div_ceil(self.tj)
    }
}

/// Choose tile extents for an `outer × inner` sweep
///
/// Fixed extents are clamped to the grid; a tile larger than its range
/// degenerates to one tile. Extents are always at least 1, so an empty range
/// still has a well-formed (empty) sweep.
pub fn resolve_tiles(
    policy: TilePolicy,
    footprint: &Footprint,
    precision: Precision,
    outer: usize,
    inner: usize,
) -> TileSize {
    let clamp = |t: usize, extent: usize| t.min(extent.max(1)).max(1);

    match policy {
        TilePolicy::Fixed { ti, tj } => TileSize {
            ti: clamp(ti, outer),
            tj: clamp(tj, inner),
        },
        TilePolicy::Auto { working_set_bytes } => {
            let mut tiles = TileSize {
                ti: clamp(MAX_OUTER_TILE, outer),
                tj: clamp(inner, inner),
            };

            while footprint.working_set_bytes(tiles, precision) > working_set_bytes
                && (tiles.ti > 1 || tiles.tj > 1)
            {
                let outer_bytes = tiles.ti * footprint.outer_row_width;
                let inner_bytes = tiles.tj * footprint.inner_row_width;
                if (inner_bytes >= outer_bytes && tiles.tj > 1) || tiles.ti == 1 {
                    tiles.tj = tiles.tj.div_ceil(2);
                } else {
                    tiles.ti = tiles.ti.div_ceil(2);
                }
            }

            tiles
        }
    }
}
