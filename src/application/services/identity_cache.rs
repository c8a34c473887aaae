//! Short-lived LRU cache for participant details.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::domain::entities::Details;

const CAPACITY: usize = 50;
const IDLE_TTL: Duration = Duration::from_secs(60);

struct CachedDetails {
    details: Details,
    fetched_at: Instant,
}

/// Caches participant details per `(space_id, identity)` pair so message
/// dependency enrichment does not hit the space index on every flush.
pub struct IdentityCache {
    inner: Mutex<LruCache<(String, String), CachedDetails>>,
    ttl: Duration,
}

impl IdentityCache {
    /// Creates a cache with the default capacity and idle TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(IDLE_TTL)
    }

    /// Creates a cache with a custom TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached details for an identity in a space, unless expired.
    #[must_use]
    pub fn get(&self, space_id: &str, identity: &str) -> Option<Details> {
        let key = (space_id.to_owned(), identity.to_owned());
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Some(entry.details.clone());
            }
            cache.pop(&key);
        }
        None
    }

    /// Stores fresh details for an identity in a space.
    pub fn insert(&self, space_id: &str, identity: &str, details: Details) {
        let key = (space_id.to_owned(), identity.to_owned());
        self.inner.lock().put(
            key,
            CachedDetails {
                details,
                fetched_at: Instant::now(),
            },
        );
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}
