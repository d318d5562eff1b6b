//! Tag-invalidated result cache.
//!
//! Caches fetched rows keyed by a hash of the statement and its parameters.
//! Every entry carries a set of tags (`models`, `<table>`, `<table>/<id>`,
//! ...); writes invalidate by tag rather than by key, so a single UPDATE
//! drops every cached read that touched the row.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tablebind_core::{Row, Value};

/// A cached result set.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub rows: Vec<Row>,
    pub tags: Vec<String>,
    /// When this entry was last accessed.
    pub last_used: Instant,
    /// Number of times this result has been served.
    pub hit_count: u64,
}

/// LRU-bounded result cache with tag invalidation.
///
/// # Example
///
/// ```
/// use tablebind_core::{Row, Value};
/// use tablebind_query::cache::{QueryCache, cache_key};
///
/// let mut cache = QueryCache::new(100);
/// let key = cache_key("SELECT * FROM \"users\" WHERE \"id\" = ?1", &[Value::BigInt(1)]);
/// let row = Row::from_pairs([("id", Value::BigInt(1))]);
/// cache.insert(key, vec![row], vec!["users".to_string(), "users/1".to_string()]);
/// assert!(cache.get(key).is_some());
///
/// assert_eq!(cache.invalidate(&["users/1".to_string()]), 1);
/// assert!(cache.get(key).is_none());
/// ```
#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<u64, CachedResult>,
    by_tag: HashMap<String, HashSet<u64>>,
    max_size: usize,
}

impl QueryCache {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size.min(256)),
            by_tag: HashMap::new(),
            max_size: max_size.max(1),
        }
    }

    /// Look up a cached result, refreshing its LRU position.
    pub fn get(&mut self, key: u64) -> Option<Vec<Row>> {
        let entry = self.entries.get_mut(&key)?;
        entry.last_used = Instant::now();
        entry.hit_count += 1;
        tracing::trace!(key, hits = entry.hit_count, "Result cache hit");
        Some(entry.rows.clone())
    }

    /// Store a result under `key` with the given tags.
    pub fn insert(&mut self, key: u64, rows: Vec<Row>, tags: Vec<String>) {
        if self.entries.contains_key(&key) {
            self.remove(key);
        } else if self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        for tag in &tags {
            self.by_tag.entry(tag.clone()).or_default().insert(key);
        }
        self.entries.insert(
            key,
            CachedResult {
                rows,
                tags,
                last_used: Instant::now(),
                hit_count: 0,
            },
        );
    }

    /// Drop every entry carrying any of `tags`. Returns the number dropped.
    pub fn invalidate(&mut self, tags: &[String]) -> usize {
        let keys: HashSet<u64> = tags
            .iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flat_map(|keys| keys.iter().copied())
            .collect();
        for key in &keys {
            self.remove(*key);
        }
        if !keys.is_empty() {
            tracing::debug!(?tags, dropped = keys.len(), "Invalidated cached results");
        }
        keys.len()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_tag.clear();
    }

    fn remove(&mut self, key: u64) {
        let Some(entry) = self.entries.remove(&key) else {
            return;
        };
        for tag in &entry.tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    /// Evict the least-recently-used entry.
    fn evict_lru(&mut self) {
        if let Some(lru_key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(&key, _)| key)
        {
            self.remove(lru_key);
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Compute a cache key from a statement and its parameters.
pub fn cache_key(sql: &str, params: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    format!("{params:?}").hash(&mut hasher);
    hasher.finish()
}
