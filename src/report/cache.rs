//! Short-lived cache of parsed reports for stateless requests.
//!
//! Requests without a requester id are never persisted, so repeated calls
//! for the same patent and kind would regenerate from scratch. The
//! coordinator consults a [`ReportCache`] for those calls only.
//!
//! # Usage
//!
//! ```ignore
//! use patent_report::report::{CacheKey, InMemoryReportCache, ReportCache, ReportKind};
//!
//! let cache = InMemoryReportCache::new(); // 50 entries, 5 minute TTL
//! let key = CacheKey::new("1020230000001", ReportKind::Market);
//! if let Some(report) = cache.get(&key) {
//!     return Ok(report);
//! }
//! ```

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use super::types::{ReportKind, StructuredReport};

/// Identity of a cached report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub application_number: String,
    pub report_kind: ReportKind,
}

impl CacheKey {
    pub fn new(application_number: impl Into<String>, report_kind: ReportKind) -> Self {
        Self {
            application_number: application_number.into(),
            report_kind,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.application_number, self.report_kind)
    }
}

/// Cache collaborator injected into the coordinator.
pub trait ReportCache: Send + Sync {
    /// Return a live entry, if any.
    fn get(&self, key: &CacheKey) -> Option<StructuredReport>;

    /// Store a report, evicting the oldest entry when full.
    fn set(&self, key: CacheKey, report: StructuredReport);

    /// Remove and return the key of the oldest entry.
    fn evict_oldest(&self) -> Option<CacheKey>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    report: StructuredReport,
    created_at: Instant,
}

/// Configuration for the in-memory report cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Entries older than this are treated as absent.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries_added: u64,
    pub entries_evicted: u64,
}

impl CacheStats {
    /// Hit rate as a value between 0.0 and 1.0, or 0.0 if no accesses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe in-memory [`ReportCache`] with TTL and oldest-first eviction.
pub struct InMemoryReportCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl Default for InMemoryReportCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReportCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().expect("stats read lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache read lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.write().expect("stats write lock poisoned");
        update(&mut stats);
    }

    fn remove_oldest(&self, entries: &mut HashMap<CacheKey, CacheEntry>) -> Option<CacheKey> {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone())?;
        entries.remove(&oldest);
        self.record(|s| s.entries_evicted += 1);
        Some(oldest)
    }
}

impl ReportCache for InMemoryReportCache {
    fn get(&self, key: &CacheKey) -> Option<StructuredReport> {
        let hit = {
            let entries = self.entries.read().expect("cache read lock poisoned");
            entries
                .get(key)
                .filter(|entry| entry.created_at.elapsed() < self.config.ttl)
                .map(|entry| entry.report.clone())
        };

        match hit {
            Some(report) => {
                self.record(|s| s.hits += 1);
                tracing::debug!(key = %key, "Report cache hit");
                Some(report)
            }
            None => {
                self.record(|s| s.misses += 1);
                let mut entries = self.entries.write().expect("cache write lock poisoned");
                if entries.remove(key).is_some() {
                    self.record(|s| s.entries_evicted += 1);
                }
                None
            }
        }
    }

    fn set(&self, key: CacheKey, report: StructuredReport) {
        let mut entries = self.entries.write().expect("cache write lock poisoned");

        let ttl = self.config.ttl;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
        let expired = (before - entries.len()) as u64;
        if expired > 0 {
            self.record(|s| s.entries_evicted += expired);
        }

        if !entries.contains_key(&key) {
            while entries.len() >= self.config.max_entries.max(1) {
                if self.remove_oldest(&mut entries).is_none() {
                    break;
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                report,
                created_at: Instant::now(),
            },
        );
        self.record(|s| s.entries_added += 1);
    }

    fn evict_oldest(&self) -> Option<CacheKey> {
        let mut entries = self.entries.write().expect("cache write lock poisoned");
        self.remove_oldest(&mut entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::parse_report;

    fn report(text: &str) -> StructuredReport {
        parse_report(ReportKind::Market, text)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_and_set() {
        let cache = InMemoryReportCache::new();
        let key = CacheKey::new("1020230000001", ReportKind::Market);
        assert!(cache.get(&key).is_none());

        cache.set(key.clone(), report("## A\nbody"));
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.sections[0].title, "A");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryReportCache::new();
        let key = CacheKey::new("1", ReportKind::Business);
        cache.set(key.clone(), report("text"));

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest() {
        let cache = InMemoryReportCache::with_config(CacheConfig {
            max_entries: 3,
            ttl: Duration::from_secs(300),
        });
        for n in 0..3 {
            cache.set(CacheKey::new(n.to_string(), ReportKind::Market), report("x"));
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        cache.set(CacheKey::new("3", ReportKind::Market), report("x"));

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&CacheKey::new("0", ReportKind::Market)).is_none());
        assert!(cache.get(&CacheKey::new("3", ReportKind::Market)).is_some());
        assert_eq!(cache.stats().entries_evicted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_oldest_returns_key() {
        let cache = InMemoryReportCache::new();
        assert!(cache.evict_oldest().is_none());
        cache.set(CacheKey::new("a", ReportKind::Market), report("x"));
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.set(CacheKey::new("b", ReportKind::Market), report("x"));

        assert_eq!(
            cache.evict_oldest(),
            Some(CacheKey::new("a", ReportKind::Market))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_display() {
        let key = CacheKey::new("1020230000001", ReportKind::Business);
        assert_eq!(key.to_string(), "1020230000001_business");
    }
}
