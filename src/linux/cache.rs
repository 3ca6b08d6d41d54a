//! Previous-scan counters and rate calculation

use std::collections::HashMap;
use std::time::Instant;

use crate::types::{EngineCounters, EngineUsage};

/// Identifies one GPU context of one process on one device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Process ID
    pub pid: u32,
    /// Device identifier
    pub device_id: String,
    /// Context key
    pub context: u64,
}

impl CacheKey {
    /// Create a key
    pub fn new(pid: u32, device_id: &str, context: u64) -> Self {
        Self {
            pid,
            device_id: device_id.to_string(),
            context,
        }
    }
}

/// Counters of one context as of a previous scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cumulative engine busy time
    pub counters: EngineCounters,
    /// Start of the scan that read the counters
    pub timestamp: Instant,
}

/// Counters from the last completed scan
///
/// A scan fills a fresh cache and swaps it in when done, so entries for
/// processes or contexts that were not seen again disappear on their own.
#[derive(Debug, Clone, Default)]
pub struct UsageCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl UsageCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache sized for `capacity` contexts
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Look up the previous counters of a context
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Record counters read at `timestamp`
    pub fn insert(&mut self, key: CacheKey, counters: EngineCounters, timestamp: Instant) {
        self.entries.insert(key, CacheEntry { counters, timestamp });
    }

    /// Number of cached contexts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Busy percentage of one engine between two counter reads
///
/// Returns 0 when there is no previous read, no elapsed time, a counter that
/// went backwards, or more busy time than wall time.
pub fn busy_percent(prev: Option<u64>, curr: u64, elapsed_ns: u64) -> f64 {
    let Some(prev) = prev else {
        return 0.0;
    };
    if elapsed_ns == 0 || curr < prev {
        return 0.0;
    }
    let delta = curr - prev;
    if delta > elapsed_ns {
        return 0.0;
    }
    100.0 * delta as f64 / elapsed_ns as f64
}

/// Utilization of every engine since `prev` was cached
pub fn engine_usage(prev: Option<&CacheEntry>, curr: &EngineCounters, now: Instant) -> EngineUsage {
    let Some(prev) = prev else {
        return EngineUsage::default();
    };
    let elapsed_ns = u64::try_from(now.saturating_duration_since(prev.timestamp).as_nanos())
        .unwrap_or(u64::MAX);
    let old = &prev.counters;

    EngineUsage {
        gfx_percent: busy_percent(Some(old.gfx_ns), curr.gfx_ns, elapsed_ns),
        compute_percent: busy_percent(Some(old.compute_ns), curr.compute_ns, elapsed_ns),
        encode_percent: busy_percent(Some(old.encode_ns), curr.encode_ns, elapsed_ns),
        decode_percent: busy_percent(Some(old.decode_ns), curr.decode_ns, elapsed_ns),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_busy_percent_rules() {
        assert_eq!(busy_percent(None, 500, 1000), 0.0);
        assert_eq!(busy_percent(Some(100), 200, 0), 0.0);
        assert_eq!(busy_percent(Some(300), 200, 1000), 0.0);
        assert_eq!(busy_percent(Some(0), 2000, 1000), 0.0);
        assert_eq!(busy_percent(Some(100), 600, 1000), 50.0);
        assert_eq!(busy_percent(Some(0), 1000, 1000), 100.0);
    }

    #[test]
    fn test_busy_percent_bounded() {
        for elapsed in [1u64, 7, 1000, 1_000_000_007] {
            for delta in [0u64, 1, elapsed / 3, elapsed] {
                let p = busy_percent(Some(10), 10 + delta, elapsed);
                assert!((0.0..=100.0).contains(&p));
                assert!((p - 100.0 * delta as f64 / elapsed as f64).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_identical_counters_idle() {
        let t0 = Instant::now();
        let counters = EngineCounters::new(10, 20, 30, 40);
        let prev = CacheEntry {
            counters,
            timestamp: t0,
        };
        let usage = engine_usage(Some(&prev), &counters, t0 + Duration::from_millis(500));
        assert_eq!(usage, EngineUsage::default());
    }

    #[test]
    fn test_engine_usage_half_gfx() {
        let t0 = Instant::now();
        let prev = CacheEntry {
            counters: EngineCounters::new(1_000_000_000, 0, 0, 0),
            timestamp: t0,
        };
        let curr = EngineCounters::new(1_500_000_000, 0, 250_000_000, 0);
        let usage = engine_usage(Some(&prev), &curr, t0 + Duration::from_secs(1));
        assert!((usage.gfx_percent - 50.0).abs() < 1e-9);
        assert!((usage.encode_percent - 25.0).abs() < 1e-9);
        assert_eq!(usage.compute_percent, 0.0);
    }

    #[test]
    fn test_clock_going_backwards() {
        let t0 = Instant::now();
        let prev = CacheEntry {
            counters: EngineCounters::default(),
            timestamp: t0 + Duration::from_secs(1),
        };
        let usage = engine_usage(Some(&prev), &EngineCounters::new(5, 5, 5, 5), t0);
        assert_eq!(usage, EngineUsage::default());
    }

    #[test]
    fn test_cache_keys_distinguish_devices() {
        let now = Instant::now();
        let mut cache = UsageCache::new();
        cache.insert(CacheKey::new(1, "a", 3), EngineCounters::new(1, 0, 0, 0), now);
        cache.insert(CacheKey::new(1, "b", 3), EngineCounters::new(2, 0, 0, 0), now);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&CacheKey::new(1, "a", 3)).map(|e| e.counters.gfx_ns), Some(1));
        assert_eq!(cache.get(&CacheKey::new(1, "b", 3)).map(|e| e.counters.gfx_ns), Some(2));
        assert!(cache.get(&CacheKey::new(2, "a", 3)).is_none());
    }
}
