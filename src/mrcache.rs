//! Memory registration cache with LRU eviction.
//!
//! Registration is expensive and callers re-register the same buffers
//! constantly, so registrations are cached under a composite
//! (address, length, access) key. Two structures live under one lock: an
//! ordered index for exact lookup and a recency list with the most
//! recently used entry at the head. A third index by external key resolves
//! a segment's 32-bit key back to its region on the submission path.
//!
//! Capacity is a soft bound: a borrowed tail entry is never evicted and
//! never blocks an insert.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fabric::{Access, MemoryDomain};
use crate::keymap::KeyTable;
use crate::mr::RegisteredRegion;

/// Composite lookup key: address first, then length, then access.
type CacheKey = (u64, u64, Access);

struct CacheEntry {
    region: Arc<RegisteredRegion>,
    /// Concurrent borrowers. Evictable only at zero.
    refs: AtomicU32,
    last_used: AtomicU64,
}

struct Inner {
    /// Ordered index by composite key.
    index: BTreeMap<CacheKey, Arc<CacheEntry>>,
    /// Recency list, most recently used at the head.
    lru: VecDeque<CacheKey>,
    /// Resolution index by external 32-bit key.
    by_key: HashMap<u32, Arc<CacheEntry>>,
}

/// Counters exported by [`MrCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Memory registration cache.
pub struct MrCache {
    domain: Arc<dyn MemoryDomain>,
    keys: Arc<KeyTable>,
    inner: Mutex<Inner>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    tick: AtomicU64,
}

impl MrCache {
    pub fn new(domain: Arc<dyn MemoryDomain>, keys: Arc<KeyTable>, max_entries: usize) -> Self {
        info!("mr cache created (max_entries={})", max_entries);
        Self {
            domain,
            keys,
            inner: Mutex::new(Inner {
                index: BTreeMap::new(),
                lru: VecDeque::new(),
                by_key: HashMap::new(),
            }),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            tick: AtomicU64::new(0),
        }
    }

    /// Borrow the region registered for exactly (addr, len, access),
    /// registering it on a miss.
    ///
    /// A miss that fails to register propagates the error and leaves no
    /// partial entry behind.
    pub fn get(&self, addr: u64, len: u64, access: Access) -> Result<Arc<RegisteredRegion>> {
        let key = (addr, len, access);

        {
            let mut inner = self.inner.lock().unwrap();
            Self::check_indexes(&inner)?;
            if let Some(entry) = inner.index.get(&key).cloned() {
                self.touch(&mut inner, &key, &entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("mr cache hit addr={:#x} len={}", addr, len);
                return Ok(Arc::clone(&entry.region));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("mr cache miss addr={:#x} len={}", addr, len);

        let region = RegisteredRegion::register(&*self.domain, &self.keys, addr, len, access)?;

        let evicted = {
            let mut inner = self.inner.lock().unwrap();

            // Another thread may have registered the same tuple while we
            // were outside the lock; keep its entry and roll ours back.
            if let Some(existing) = inner.index.get(&key).cloned() {
                self.touch(&mut inner, &key, &existing);
                drop(inner);
                if let Err(e) = region.release(&*self.domain, &self.keys) {
                    warn!("duplicate registration rollback failed: {}", e);
                }
                return Ok(Arc::clone(&existing.region));
            }

            let evicted = if inner.index.len() >= self.max_entries {
                self.evict_tail(&mut inner)
            } else {
                None
            };

            let entry = Arc::new(CacheEntry {
                region: Arc::clone(&region),
                refs: AtomicU32::new(1),
                last_used: AtomicU64::new(self.tick.fetch_add(1, Ordering::Relaxed)),
            });
            inner.by_key.insert(region.key, Arc::clone(&entry));
            inner.index.insert(key, entry);
            inner.lru.push_front(key);
            evicted
        };

        if let Some(entry) = evicted {
            self.release_entry(&entry);
        }
        Ok(region)
    }

    /// Return a borrowed region. Eviction stays lazy; the entry just
    /// becomes an eviction candidate again once its count reaches zero.
    pub fn put(&self, region: &RegisteredRegion) {
        let inner = self.inner.lock().unwrap();
        match inner.by_key.get(&region.key) {
            Some(entry) => {
                let prev = entry.refs.fetch_sub(1, Ordering::AcqRel);
                if prev == 0 {
                    entry.refs.store(0, Ordering::Release);
                    warn!("put on unborrowed region key={:#x}", region.key);
                }
            }
            None => warn!("put on region not in cache key={:#x}", region.key),
        }
    }

    /// Resolve an external key to its cached region without borrowing it.
    pub fn resolve(&self, key: u32) -> Result<Arc<RegisteredRegion>> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_key
            .get(&key)
            .map(|e| Arc::clone(&e.region))
            .ok_or(Error::InvalidKey(key))
    }

    /// Evict every entry with no borrowers. Idempotent.
    pub fn flush(&self) {
        let victims = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<CacheKey> = inner
                .index
                .iter()
                .filter(|(_, e)| e.refs.load(Ordering::Acquire) == 0)
                .map(|(k, _)| *k)
                .collect();
            keys.iter()
                .filter_map(|k| Self::remove_entry(&mut inner, k))
                .collect::<Vec<_>>()
        };

        for entry in &victims {
            self.release_entry(entry);
        }
        info!("mr cache flushed: {} entries removed", victims.len());
    }

    /// Deregister every remaining entry and release the cache.
    ///
    /// Callers must ensure all borrowers have released their references
    /// first. Deregistration failures are logged and do not abort the
    /// remaining teardown.
    pub fn destroy(&self) {
        let victims = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<CacheKey> = inner.index.keys().copied().collect();
            keys.iter()
                .filter_map(|k| Self::remove_entry(&mut inner, k))
                .collect::<Vec<_>>()
        };

        for entry in &victims {
            // Teardown proceeds past borrowed entries; leaking a fabric
            // registration beyond the device would be worse.
            entry.refs.store(0, Ordering::Release);
            self.release_entry(entry);
        }

        let stats = self.stats();
        let total = stats.hits + stats.misses;
        let hit_rate = if total > 0 { stats.hits * 100 / total } else { 0 };
        info!(
            "mr cache destroyed (hits={} misses={} hit_rate={}%)",
            stats.hits, stats.misses, hit_rate
        );
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.lock().unwrap().index.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_indexes(inner: &Inner) -> Result<()> {
        if inner.index.len() != inner.lru.len() || inner.index.len() != inner.by_key.len() {
            return Err(Error::Internal("cache index and recency list diverged"));
        }
        Ok(())
    }

    /// Mark an entry borrowed and move it to the recency head.
    fn touch(&self, inner: &mut Inner, key: &CacheKey, entry: &Arc<CacheEntry>) {
        entry.refs.fetch_add(1, Ordering::AcqRel);
        entry
            .last_used
            .store(self.tick.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        if let Some(pos) = inner.lru.iter().position(|k| k == key) {
            inner.lru.remove(pos);
        }
        inner.lru.push_front(*key);
    }

    /// Detach the least recently used entry if it has no borrowers.
    fn evict_tail(&self, inner: &mut Inner) -> Option<Arc<CacheEntry>> {
        let tail_key = *inner.lru.back()?;
        let tail = inner.index.get(&tail_key)?;
        if tail.refs.load(Ordering::Acquire) != 0 {
            // Soft bound: accept transient over-capacity over evicting a
            // borrowed entry or blocking.
            return None;
        }
        debug!("mr cache evicting addr={:#x} len={}", tail_key.0, tail_key.1);
        Self::remove_entry(inner, &tail_key)
    }

    fn remove_entry(inner: &mut Inner, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = inner.index.remove(key)?;
        inner.by_key.remove(&entry.region.key);
        if let Some(pos) = inner.lru.iter().position(|k| k == key) {
            inner.lru.remove(pos);
        }
        Some(entry)
    }

    fn release_entry(&self, entry: &CacheEntry) {
        if let Err(e) = entry.region.release(&*self.domain, &self.keys) {
            warn!("deregister of key={:#x} failed: {}", entry.region.key, e);
        }
    }
}
