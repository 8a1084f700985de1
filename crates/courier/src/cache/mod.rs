//! # Response cache
//!
//! Persistent URL -> response mapping with HTTP-correct freshness and a
//! bounded on-disk footprint, fronted by a small in-memory cache.
//!
//! Cache failures never surface to the owning request: every public method
//! absorbs errors, logs them, and degrades to a cache miss.

mod freshness;
mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CourierError;

use store::{CleanupOutcome, SqliteStore};

/// One stored response, keyed by URL.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response_id: i64,
    pub url: String,
    pub content_size: i64,
    /// Epoch seconds when the entry was stored or last revalidated.
    pub stored_at: i64,
    /// Epoch second after which the entry must be revalidated. Earlier than
    /// `stored_at` when the response carried no usable freshness headers.
    pub expires: i64,
    /// Raw response header lines, in arrival order.
    pub headers: Vec<String>,
    pub body: Bytes,
}

impl CacheEntry {
    /// Whether the entry may still be served without revalidation.
    pub fn is_stale(&self, now: i64) -> bool {
        now > self.expires
    }

    /// Conditional-request headers (`If-None-Match`, `If-Modified-Since`)
    /// derived from the stored response headers.
    pub fn validation_headers(&self) -> Vec<String> {
        freshness::validation_headers(&self.headers)
    }
}

/// Current time as epoch seconds, the clock all cache operations use.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Persistent, size-bounded response cache.
///
/// Constructed once at the composition root and injected wherever needed;
/// there is no global instance.
pub struct ResponseCache {
    store: SqliteStore,
    front: moka::sync::Cache<String, CacheEntry>,
    max_item_size: u64,
}

impl ResponseCache {
    /// Open (or create) the cache described by `config`.
    pub fn open(config: &CacheConfig) -> Result<Self, CourierError> {
        let path = config.resolved_path();
        let store = SqliteStore::open(&path, config.high_watermark, config.low_watermark)?;
        let front = moka::sync::Cache::builder()
            .max_capacity(config.memory_capacity)
            .weigher(|_url: &String, entry: &CacheEntry| {
                (entry.body.len() as u32).saturating_add(1)
            })
            .build();
        debug!(path = %path.display(), "Opened response cache");
        Ok(Self {
            store,
            front,
            max_item_size: config.max_item_size,
        })
    }

    /// Return the stored entry for `url`, if any. Does not judge freshness;
    /// callers decide with [`CacheEntry::is_stale`].
    pub fn lookup(&self, url: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.front.get(url) {
            return Some(entry);
        }
        match self.store.lookup(url) {
            Ok(Some(entry)) => {
                self.front.insert(url.to_string(), entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(url, error = %error, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Store a successful response if its headers allow caching and the body
    /// fits under the per-item cap. Responses that forbid caching evict any
    /// previous entry for the URL.
    pub fn store(&self, url: &str, headers: &[String], body: &Bytes, now: i64) {
        if body.len() as u64 > self.max_item_size {
            debug!(url, size = body.len(), "Body exceeds cache item cap, not caching");
            self.remove(url);
            return;
        }

        let freshness = freshness::evaluate(headers, now);
        if !freshness.cacheable {
            debug!(url, "Response forbids caching, evicting any stored entry");
            self.remove(url);
            return;
        }

        match self.store.store(url, headers, body, now, freshness.max_age) {
            Ok(id) => {
                self.front.insert(
                    url.to_string(),
                    CacheEntry {
                        response_id: id,
                        url: url.to_string(),
                        content_size: body.len() as i64,
                        stored_at: now,
                        expires: now.saturating_add(freshness.max_age),
                        headers: headers.to_vec(),
                        body: body.clone(),
                    },
                );
            }
            Err(error) => {
                warn!(url, error = %error, "Failed to store cache entry");
            }
        }
    }

    /// Refresh an entry's timestamp after a 304 validation, preserving its
    /// freshness window and leaving the body untouched.
    pub fn touch(&self, entry: &CacheEntry, now: i64) {
        if let Err(error) = self.store.touch(entry.response_id, now) {
            warn!(url = %entry.url, error = %error, "Failed to touch cache entry");
            return;
        }
        let mut refreshed = entry.clone();
        refreshed.expires = now.saturating_add(entry.expires.saturating_sub(entry.stored_at));
        refreshed.stored_at = now;
        self.front.insert(entry.url.clone(), refreshed);
    }

    /// Cascading delete of the entry for `url`, if present.
    pub fn remove(&self, url: &str) {
        self.front.invalidate(url);
        if let Err(error) = self.store.remove(url) {
            warn!(url, error = %error, "Failed to remove cache entry");
        }
    }

    /// Total stored body size in bytes.
    pub fn total_size(&self) -> u64 {
        match self.store.total_size() {
            Ok(total) => total,
            Err(error) => {
                warn!(error = %error, "Failed to read cache size");
                0
            }
        }
    }

    /// Watermark eviction sweep. A no-op while the cache is under the high
    /// watermark.
    pub fn cleanup(&self) {
        match self.store.cleanup() {
            Ok(CleanupOutcome::Untouched) => {}
            Ok(CleanupOutcome::Evicted(count)) => {
                debug!(count, "Evicted cache entries past the size watermark");
                self.front.invalidate_all();
            }
            Ok(CleanupOutcome::Cleared) => {
                warn!("Watermark split unsatisfiable, cleared the response cache");
                self.front.invalidate_all();
            }
            Err(error) => {
                warn!(error = %error, "Cache cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn test_cache(dir: &std::path::Path, high: u64, low: u64, max_item: u64) -> ResponseCache {
        ResponseCache::open(&CacheConfig {
            path: Some(dir.join("cache.sqlite")),
            high_watermark: high,
            low_watermark: low,
            max_item_size: max_item,
            memory_capacity: 1024 * 1024,
        })
        .unwrap()
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_freshness_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);

        let headers = lines(&[
            "Cache-Control: max-age=60",
            "ETag: \"v1\"",
            "Last-Modified: Sun, 06 Nov 1994 08:49:37 GMT",
        ]);
        let now = 1_000_000;
        cache.store("http://x/a", &headers, &Bytes::from_static(b"hello"), now);

        let entry = cache.lookup("http://x/a").expect("entry stored");
        assert!(!entry.is_stale(now + 30));
        assert!(entry.is_stale(now + 90));
        assert_eq!(
            entry.validation_headers(),
            vec![
                "If-None-Match: \"v1\"".to_string(),
                "If-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT".to_string(),
            ]
        );
        assert_eq!(&entry.body[..], b"hello");
    }

    #[test]
    fn test_no_freshness_headers_always_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);

        let now = 1_000_000;
        cache.store("http://x/b", &lines(&["Content-Type: text/plain"]), &Bytes::from_static(b"x"), now);
        let entry = cache.lookup("http://x/b").expect("entry stored");
        assert!(entry.is_stale(now));
    }

    #[test]
    fn test_touch_preserves_window_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);

        let now = 1_000_000;
        cache.store(
            "http://x/c",
            &lines(&["Cache-Control: max-age=60"]),
            &Bytes::from_static(b"body"),
            now,
        );
        let entry = cache.lookup("http://x/c").unwrap();

        let later = now + 200;
        cache.touch(&entry, later);

        let refreshed = cache.lookup("http://x/c").unwrap();
        assert_eq!(refreshed.stored_at, later);
        assert!(!refreshed.is_stale(later + 30));
        assert!(refreshed.is_stale(later + 90));
        assert_eq!(&refreshed.body[..], b"body");
    }

    #[test]
    fn test_store_same_url_twice_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);

        // Two in-flight requests for one URL both completing is not an
        // error; the later body wins.
        let now = 1_000_000;
        let headers = lines(&["Cache-Control: max-age=60"]);
        cache.store("http://x/race", &headers, &Bytes::from_static(b"first"), now);
        cache.store("http://x/race", &headers, &Bytes::from_static(b"second"), now + 1);

        let entry = cache.lookup("http://x/race").unwrap();
        assert_eq!(&entry.body[..], b"second");
        assert_eq!(entry.stored_at, now + 1);
    }

    #[test]
    fn test_huge_max_age_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);

        let now = 1_000_000;
        cache.store(
            "http://x/forever",
            &lines(&["Cache-Control: max-age=9223372036854775807"]),
            &Bytes::from_static(b"x"),
            now,
        );
        let entry = cache.lookup("http://x/forever").unwrap();
        assert_eq!(entry.expires, i64::MAX);
        assert!(!entry.is_stale(i64::MAX));
    }

    #[test]
    fn test_no_store_evicts_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);

        let now = 1_000_000;
        cache.store(
            "http://x/d",
            &lines(&["Cache-Control: max-age=60"]),
            &Bytes::from_static(b"keep"),
            now,
        );
        assert!(cache.lookup("http://x/d").is_some());

        cache.store(
            "http://x/d",
            &lines(&["Cache-Control: no-store"]),
            &Bytes::from_static(b"drop"),
            now + 1,
        );
        assert!(cache.lookup("http://x/d").is_none());
    }

    #[test]
    fn test_item_cap_skips_storage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 8);

        let now = 1_000_000;
        cache.store(
            "http://x/e",
            &lines(&["Cache-Control: max-age=60"]),
            &Bytes::from(vec![0u8; 64]),
            now,
        );
        assert!(cache.lookup("http://x/e").is_none());
    }

    #[test]
    fn test_watermark_eviction_removes_coldest() {
        let dir = tempfile::tempdir().unwrap();
        // high 1000, low 600; four 300-byte entries push total to 1200.
        let cache = test_cache(dir.path(), 1000, 600, 1 << 16);

        let body = Bytes::from(vec![0u8; 300]);
        let now = 1_000_000;
        for (i, max_age) in [10, 20, 30, 40].iter().enumerate() {
            cache.store(
                &format!("http://x/{i}"),
                &lines(&[&format!("Cache-Control: max-age={max_age}")]),
                &body,
                now,
            );
        }
        assert_eq!(cache.total_size(), 1200);

        cache.cleanup();
        assert!(cache.total_size() <= 600);
        // The oldest-expiry entries go first.
        assert!(cache.lookup("http://x/0").is_none());
        assert!(cache.lookup("http://x/1").is_none());
        assert!(cache.lookup("http://x/3").is_some());

        // Re-running under the watermark is a no-op.
        let before = cache.total_size();
        cache.cleanup();
        assert_eq!(cache.total_size(), before);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_000_000;
        {
            let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);
            cache.store(
                "http://x/persist",
                &lines(&["Cache-Control: max-age=60"]),
                &Bytes::from_static(b"durable"),
                now,
            );
        }
        let cache = test_cache(dir.path(), 1 << 20, 1 << 19, 1 << 16);
        let entry = cache.lookup("http://x/persist").expect("entry persisted");
        assert_eq!(&entry.body[..], b"durable");
        assert_eq!(entry.stored_at, now);
    }
}
