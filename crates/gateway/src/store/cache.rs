//! A TTL cache: expiration on read plus a periodic sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

pub struct TtlCache<K, V> {
    ttl: Duration,
    inner: RwLock<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a live entry. Expired entries count as misses and are
    /// removed on the spot.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let inner = self.inner.read();
            match inner.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Some(value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Stale: drop it under the write lock.
        self.inner.write().remove(key);
        None
    }

    pub fn put(&self, key: K, value: V) {
        self.inner
            .write()
            .insert(key, (value, Instant::now() + self.ttl));
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, (_, expires_at)| *expires_at > now);
        before - inner.len()
    }
}
