//! Content-addressed cache of compiled programs
//!
//! Compiling a formula is cheap next to evaluating it, but gradient plans and
//! solver loops rebuild the same reductions over and over. A [`ProgramCache`]
//! memoizes compiled [`Program`]s under a [`ProgramKey`]: the formula
//! signature, the reduction, the tile policy and the floating-point width.
//!
//! The cache has caller-controlled lifetime: it is an ordinary value, cheap to
//! clone (clones share storage), and nothing is cached unless a cache is
//! attached to a [`Genred`](crate::Genred).
//!
//! # Eviction Policies
//!
//! - **LRU (Least Recently Used)**: evicts the entry accessed longest ago
//! - **LFU (Least Frequently Used)**: evicts the entry accessed least often,
//!   breaking ties by recency
//!
//! # Examples
//!
//! ```
//! use genred_core::{kernel_product, KernelKind, Precision};
//! use genred_exec::{Axis, EvalConfig, ProgramCache, ProgramKey, Reduction, ReductionOp};
//!
//! let cache = ProgramCache::new_lru(16);
//! let formula = kernel_product(KernelKind::Gaussian, 2, 1).unwrap();
//! let key = ProgramKey::new(
//!     &formula,
//!     Reduction::new(ReductionOp::Sum, Axis::OverJ),
//!     &EvalConfig::default(),
//!     Precision::F64,
//! );
//!
//! let first = cache.get_or_compile(&key, &formula).unwrap();
//! let second = cache.get_or_compile(&key, &formula).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&first, &second));
//! assert_eq!(cache.hit_rate(), 0.5);
//! ```

use crate::config::{EvalConfig, TilePolicy};
use crate::program::Program;
use crate::reduction::Reduction;
use genred_core::{Formula, GenredResult, Precision};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cache eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least Recently Used - evicts based on access recency
    LRU,
    /// Least Frequently Used - evicts based on access frequency
    LFU,
}

/// Identifies one compiled program
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    /// Formula signature (declarations plus expression)
    signature: String,
    reduction: Reduction,
    tile: TilePolicy,
    precision: Precision,
}

impl ProgramKey {
    pub fn new(
        formula: &Formula,
        reduction: Reduction,
        config: &EvalConfig,
        precision: Precision,
    ) -> Self {
        Self {
            signature: formula.signature(),
            reduction,
            tile: config.tile,
            precision,
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }
}

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Number of cache evictions
    pub evictions: usize,
    /// Current number of cached programs
    pub entries: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    program: Arc<Program>,
    access_count: usize,
    last_access: usize,
}

/// Thread-safe cache of compiled programs
///
/// # Design
///
/// - **Key**: [`ProgramKey`]
/// - **Value**: `Arc<Program>`, shared with every evaluator that asked for it
/// - **Eviction**: LRU or LFU when capacity is exceeded
/// - **Thread Safety**: `Arc<Mutex<...>>`; compilation runs outside the lock
#[derive(Clone)]
pub struct ProgramCache {
    inner: Arc<Mutex<ProgramCacheInner>>,
}

struct ProgramCacheInner {
    capacity: usize,
    cache: HashMap<ProgramKey, CacheEntry>,
    /// Logical clock for recency
    current_time: usize,
    stats: CacheStats,
    policy: EvictionPolicy,
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ProgramCache")
            .field("capacity", &inner.capacity)
            .field("policy", &inner.policy)
            .field("entries", &inner.cache.len())
            .finish()
    }
}

impl ProgramCache {
    /// Create a cache with LRU eviction
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        Self::new_lru(capacity)
    }

    /// Create a cache with LRU eviction
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new_lru(capacity: usize) -> Self {
        Self::with_policy(capacity, EvictionPolicy::LRU)
    }

    /// Create a cache with LFU eviction
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new_lfu(capacity: usize) -> Self {
        Self::with_policy(capacity, EvictionPolicy::LFU)
    }

    fn with_policy(capacity: usize, policy: EvictionPolicy) -> Self {
        assert!(capacity > 0, "Cache capacity must be greater than 0");
        Self {
            inner: Arc::new(Mutex::new(ProgramCacheInner {
                capacity,
                cache: HashMap::new(),
                current_time: 0,
                stats: CacheStats::default(),
                policy,
            })),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, ProgramCacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.lock().policy
    }

    /// Cached program for `key`, compiling `formula` on a miss
    pub fn get_or_compile(&self, key: &ProgramKey, formula: &Formula) -> GenredResult<Arc<Program>> {
        if let Some(program) = self.get(key) {
            log::debug!("program cache hit: {} {}", key.reduction, key.signature);
            return Ok(program);
        }

        log::debug!("program cache miss: {} {}", key.reduction, key.signature);
        let program = Arc::new(Program::compile(formula, key.reduction.axis)?);
        self.insert(key.clone(), program.clone());
        Ok(program)
    }

    /// Cached program for `key`, counting a hit or a miss
    pub fn get(&self, key: &ProgramKey) -> Option<Arc<Program>> {
        let mut inner = self.lock();
        let now = inner.current_time;

        match inner.cache.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access = now;
                let program = entry.program.clone();
                inner.stats.hits += 1;
                inner.current_time += 1;
                Some(program)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a compiled program, evicting one entry if the cache is full
    pub fn insert(&self, key: ProgramKey, program: Arc<Program>) {
        let mut inner = self.lock();

        if !inner.cache.contains_key(&key) && inner.cache.len() >= inner.capacity {
            inner.evict();
        }

        let entry = CacheEntry {
            program,
            access_count: 1,
            last_access: inner.current_time,
        };
        inner.cache.insert(key, entry);
        inner.current_time += 1;
        inner.stats.entries = inner.cache.len();
    }

    /// Whether `key` is cached (does not touch statistics)
    pub fn contains(&self, key: &ProgramKey) -> bool {
        self.lock().cache.contains_key(key)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.cache.clear();
        inner.stats.entries = 0;
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        self.lock().stats.hit_rate()
    }

    /// Reset statistics, keeping the entry count
    pub fn reset_stats(&self) {
        let mut inner = self.lock();
        inner.stats = CacheStats {
            entries: inner.cache.len(),
            ..Default::default()
        };
    }
}

impl ProgramCacheInner {
    fn evict(&mut self) {
        let victim = match self.policy {
            EvictionPolicy::LRU => self
                .cache
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::LFU => self
                .cache
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.last_access))
                .map(|(k, _)| k.clone()),
        };

        if let Some(key) = victim {
            log::debug!("program cache evicting {}", key.signature);
            self.cache.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::{Axis, ReductionOp};
    use genred_core::expr::var;
    use genred_core::FormulaBuilder;

    fn formula(scale: f64) -> Formula {
        FormulaBuilder::new()
            .vi("X", 1)
            .vj("Y", 1)
            .build(&(var("X") * var("Y") * scale))
            .unwrap()
    }

    fn key(f: &Formula) -> ProgramKey {
        ProgramKey::new(f, Reduction::sum_j(), &EvalConfig::default(), Precision::F64)
    }

    #[test]
    fn test_cache_basic() {
        let cache = ProgramCache::new(10);
        let f = formula(1.0);
        let k = key(&f);

        assert!(cache.get(&k).is_none());
        cache.get_or_compile(&k, &f).unwrap();
        assert!(cache.contains(&k));
        cache.get_or_compile(&k, &f).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_key_distinguishes_precision_and_reduction() {
        let f = formula(1.0);
        let base = key(&f);
        let f32_key = ProgramKey::new(&f, Reduction::sum_j(), &EvalConfig::default(), Precision::F32);
        let max_key = ProgramKey::new(
            &f,
            Reduction::new(ReductionOp::Max, Axis::OverJ),
            &EvalConfig::default(),
            Precision::F64,
        );
        let tiled_key = ProgramKey::new(
            &f,
            Reduction::sum_j(),
            &EvalConfig::default().with_tile(8, 8),
            Precision::F64,
        );
        assert_ne!(base, f32_key);
        assert_ne!(base, max_key);
        assert_ne!(base, tiled_key);
        assert_eq!(base, key(&formula(1.0)));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ProgramCache::new_lru(2);
        let (f1, f2, f3) = (formula(1.0), formula(2.0), formula(3.0));

        cache.get_or_compile(&key(&f1), &f1).unwrap();
        cache.get_or_compile(&key(&f2), &f2).unwrap();
        // touch f1 so f2 becomes least recent
        cache.get(&key(&f1));
        cache.get_or_compile(&key(&f3), &f3).unwrap();

        assert!(cache.contains(&key(&f1)));
        assert!(!cache.contains(&key(&f2)));
        assert!(cache.contains(&key(&f3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lfu_eviction() {
        let cache = ProgramCache::new_lfu(2);
        let (f1, f2, f3) = (formula(1.0), formula(2.0), formula(3.0));

        cache.get_or_compile(&key(&f1), &f1).unwrap();
        cache.get_or_compile(&key(&f2), &f2).unwrap();
        for _ in 0..3 {
            cache.get(&key(&f2));
        }
        cache.get(&key(&f1));
        cache.get_or_compile(&key(&f3), &f3).unwrap();

        assert!(!cache.contains(&key(&f1)));
        assert!(cache.contains(&key(&f2)));
        assert_eq!(cache.policy(), EvictionPolicy::LFU);
    }

    #[test]
    fn test_clear_and_reset() {
        let cache = ProgramCache::new(4);
        let f = formula(1.0);
        cache.get_or_compile(&key(&f), &f).unwrap();
        cache.reset_stats();
        assert_eq!(cache.stats().misses, 0);
        assert_eq!(cache.stats().entries, 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "Cache capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = ProgramCache::new(0);
    }
}
