//! Bounded LRU cache for embedding vectors.
//!
//! Embedding calls are billed and rate-limited, and the same text shows up
//! repeatedly: overlapping chunks share long prefixes and re-ingestion
//! replays identical chunks. Entries are keyed by the first 256 bytes of the
//! text, so effectively-identical inputs reuse one vector.

use std::collections::HashMap;

use parking_lot::Mutex;

/// How much of the text participates in the cache key.
pub const KEY_PREFIX_BYTES: usize = 256;
/// Default number of cached vectors.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Thread-safe LRU cache mapping text prefixes to embedding vectors.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<String, Vec<f32>>,
    order: Vec<String>,
    capacity: usize,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` vectors.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                order: Vec::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Look up the vector cached for this text's prefix, promoting it to
    /// most-recently-used on a hit.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = cache_key(text);
        let mut inner = self.inner.lock();

        let vector = inner.entries.get(key)?.clone();
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            let key = inner.order.remove(pos);
            inner.order.push(key);
        }
        Some(vector)
    }

    /// Cache a vector under this text's prefix, evicting the least-recently
    /// used entry once the capacity is reached.
    pub fn put(&self, text: &str, vector: Vec<f32>) {
        let key = cache_key(text).to_string();
        let mut inner = self.inner.lock();

        if inner.entries.insert(key.clone(), vector).is_some() {
            inner.order.retain(|k| k != &key);
            inner.order.push(key);
            return;
        }

        while inner.entries.len() > inner.capacity && !inner.order.is_empty() {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }
        inner.order.push(key);
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// First [`KEY_PREFIX_BYTES`] of `text`, shortened to a character boundary.
fn cache_key(text: &str) -> &str {
    if text.len() <= KEY_PREFIX_BYTES {
        return text;
    }
    let mut end = KEY_PREFIX_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
