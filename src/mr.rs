//! Registered memory regions.
//!
//! Registration couples two steps: obtaining a fabric-native handle with a
//! 64-bit key from the domain, then minting the 32-bit external key the
//! caller sees. Both sides are torn down together on release.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::fabric::{Access, FabricMr, LocalDesc, MemoryDomain};
use crate::keymap::KeyTable;

/// One memory registration.
///
/// The same 32-bit key serves as local and remote key.
#[derive(Debug)]
pub struct RegisteredRegion {
    /// Base address.
    pub addr: u64,
    /// Length in bytes.
    pub len: u64,
    /// Access rights the region was registered with.
    pub access: Access,
    /// The 64-bit fabric-native key.
    pub fabric_key: u64,
    /// The 32-bit externally visible key (lkey and rkey).
    pub key: u32,
    handle: FabricMr,
    desc: LocalDesc,
    users: AtomicU32,
}

impl RegisteredRegion {
    /// Register `addr..addr+len` with the fabric and mint its external key.
    ///
    /// On key-minting failure the fabric registration is rolled back, so a
    /// failed call leaves nothing behind.
    pub fn register(
        domain: &dyn MemoryDomain,
        keys: &KeyTable,
        addr: u64,
        len: u64,
        access: Access,
    ) -> Result<Arc<Self>> {
        if len == 0 {
            return Err(Error::InvalidArgument("zero-length region"));
        }

        let handle = domain.register(addr, len, access.to_fabric(), None)?;
        let key = match keys.register(handle.key) {
            Ok(key) => key,
            Err(e) => {
                if let Err(close_err) = domain.deregister(&handle) {
                    warn!("rollback deregister failed: {}", close_err);
                }
                return Err(e);
            }
        };

        debug!(
            "registered region addr={:#x} len={} key={:#x} fabric_key={:#x}",
            addr, len, key, handle.key
        );

        Ok(Arc::new(Self {
            addr,
            len,
            access,
            fabric_key: handle.key,
            key,
            desc: domain.local_desc(&handle),
            handle,
            users: AtomicU32::new(1),
        }))
    }

    /// Local-access descriptor for issuing operations against this region.
    #[inline]
    pub fn local_desc(&self) -> LocalDesc {
        self.desc
    }

    /// Take an additional use of the region.
    #[inline]
    pub fn hold(&self) {
        self.users.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one use of the region.
    #[inline]
    pub fn unhold(&self) {
        self.users.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Relaxed)
    }

    /// Deregister the region and remove its key mapping.
    ///
    /// Refuses to tear down a region that still has borrowers beyond the
    /// owner's own use.
    pub fn release(&self, domain: &dyn MemoryDomain, keys: &KeyTable) -> Result<()> {
        if self.users() > 1 {
            warn!("release of region key={:#x} with {} users", self.key, self.users());
            return Err(Error::Internal("region released while in use"));
        }

        keys.unregister(self.key);
        domain.deregister(&self.handle)?;
        debug!("released region key={:#x}", self.key);
        Ok(())
    }
}
