//! Bounded cache of recently observed message nonces, used for loop
//! prevention. Nonces are keyed by their CRC-32 hash; eviction drops roughly
//! the oldest quarter of the cache whenever it fills.

use std::collections::HashMap;
use std::sync::Mutex;

pub const CACHE_SIZE: usize = 4 * 1024;
pub const CACHE_DISCOUNT: usize = CACHE_SIZE / 4;

#[derive(Debug)]
struct CacheInner {
    recent: HashMap<u32, u32>,
    reverse: HashMap<u32, u32>,
    counter: u32,
}

/// Tracks recently seen messages by nonce hash.
///
/// False negatives occur only on CRC collisions; state is process-lifetime
/// and rebuilt empty on restart.
#[derive(Debug)]
pub struct RecentCache {
    inner: Mutex<CacheInner>,
}

impl Default for RecentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                recent: HashMap::with_capacity(CACHE_SIZE),
                reverse: HashMap::with_capacity(CACHE_SIZE),
                counter: 0,
            }),
        }
    }

    /// Returns whether this nonce should be filtered out by loop detection,
    /// recording it if it has not been seen.
    pub fn seen_recently(&self, nonce: &[u8]) -> bool {
        let mut inner = self.inner.lock().expect("nonce cache lock poisoned");
        let nonce_hash = crc32fast::hash(nonce);

        let seen = inner.recent.contains_key(&nonce_hash);
        if !seen {
            let counter = inner.counter;
            inner.recent.insert(nonce_hash, counter);
            inner.reverse.insert(counter, nonce_hash);
            // counter range is bounded by i32 so sorting stays total after wrap
            if inner.counter == i32::MAX as u32 {
                inner.counter = 0;
            } else {
                inner.counter += 1;
            }
        }

        // garbage collection
        let size = inner.recent.len();
        if size >= CACHE_SIZE {
            let mut values: Vec<u32> = inner.recent.values().copied().collect();
            values.sort_unstable();
            let discount = (CACHE_SIZE - size) + CACHE_DISCOUNT;
            for counter in values.into_iter().take(discount) {
                if let Some(hash) = inner.reverse.remove(&counter) {
                    inner.recent.remove(&hash);
                }
            }
        }
        seen
    }
}
