//! Bidirectional 32-bit/64-bit memory key translation.
//!
//! Callers reference regions by 32-bit keys; the fabric assigns 64-bit
//! keys. The table keeps an ordered index by external key and a hash index
//! by fabric key, both mutated under one lock so a reader never observes a
//! mapping present in one index and absent from the other.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::error::{Error, Result};

/// External keys start above the reserved low range so they never collide
/// with externally meaningful small values.
pub const KEY_BASE: u32 = 0x10000;

struct Indexes {
    /// Ordered by external 32-bit key.
    by_external: BTreeMap<u32, u64>,
    /// Hashed by fabric 64-bit key for O(1) reverse lookup.
    by_fabric: HashMap<u64, u32>,
}

/// Bidirectional key translation table.
pub struct KeyTable {
    indexes: Mutex<Indexes>,
    next_key: AtomicU32,
}

impl KeyTable {
    pub fn new() -> Self {
        Self {
            indexes: Mutex::new(Indexes {
                by_external: BTreeMap::new(),
                by_fabric: HashMap::new(),
            }),
            next_key: AtomicU32::new(KEY_BASE),
        }
    }

    /// Register a fabric key and mint a fresh external key for it.
    ///
    /// Fails with `AlreadyExists` only if the monotonic generator wraps
    /// and collides, which is a fatal allocation bug rather than an
    /// expected condition.
    pub fn register(&self, fabric_key: u64) -> Result<u32> {
        let external = self.next_key.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        let mut idx = self.indexes.lock().unwrap();
        if idx.by_external.contains_key(&external) {
            return Err(Error::AlreadyExists);
        }
        idx.by_external.insert(external, fabric_key);
        idx.by_fabric.insert(fabric_key, external);
        drop(idx);

        debug!("key mapping registered {:#x} -> {:#x}", fabric_key, external);
        Ok(external)
    }

    /// Look up the fabric key for an external key.
    pub fn lookup_by_external(&self, external: u32) -> Result<u64> {
        let idx = self.indexes.lock().unwrap();
        idx.by_external.get(&external).copied().ok_or(Error::NotFound)
    }

    /// Look up the external key for a fabric key.
    pub fn lookup_by_fabric(&self, fabric_key: u64) -> Result<u32> {
        let idx = self.indexes.lock().unwrap();
        idx.by_fabric.get(&fabric_key).copied().ok_or(Error::NotFound)
    }

    /// Remove a mapping. Idempotent: unregistering an already-removed key
    /// is a no-op because deregistration paths may race with cache
    /// eviction.
    pub fn unregister(&self, external: u32) {
        let mut idx = self.indexes.lock().unwrap();
        if let Some(fabric_key) = idx.by_external.remove(&external) {
            // Only drop the reverse entry if it still points back here; a
            // re-registration of the same fabric key may own it now.
            if idx.by_fabric.get(&fabric_key) == Some(&external) {
                idx.by_fabric.remove(&fabric_key);
            }
            debug!("key mapping unregistered {:#x}", external);
        }
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.indexes.lock().unwrap().by_external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every mapping. Used by device teardown.
    pub fn clear(&self) {
        let mut idx = self.indexes.lock().unwrap();
        idx.by_external.clear();
        idx.by_fabric.clear();
    }
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::new()
    }
}
