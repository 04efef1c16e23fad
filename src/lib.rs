//! fabverbs: a verbs-style RDMA surface over a single-operation fabric.
//!
//! Callers written against the queue-pair model (chained work requests,
//! 32-bit memory keys, completion polling) run unchanged over a fabric
//! interface with the opposite shape: one operation per call, 64-bit keys,
//! and no automatic progress. Four pieces bridge the gap:
//!
//! - [`mrcache::MrCache`] caches memory registrations under a composite
//!   (address, length, access) key with LRU eviction, so repeated
//!   registration of the same buffers costs one lookup.
//! - [`keymap::KeyTable`] maintains the bijection between minted 32-bit
//!   keys and fabric-native 64-bit keys.
//! - [`qp::QueuePair`] walks work-request chains and issues one fabric
//!   operation per descriptor; [`completion::VerbsCq`] maps completion
//!   records back, preserving the caller's opaque identifiers.
//! - [`progress::ProgressEngine`] runs one polling worker per device,
//!   since the fabric completes nothing unless polled.
//!
//! The fabric itself stays behind the traits in [`fabric`]; everything
//! above them is provider-agnostic.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fabverbs::{MrCache, KeyTable, TransportConfig};
//! use fabverbs::fabric::{Access, MemoryDomain};
//!
//! fn warm(domain: Arc<dyn MemoryDomain>) -> fabverbs::Result<()> {
//!     let config = TransportConfig::default();
//!     let keys = Arc::new(KeyTable::new());
//!     let cache = MrCache::new(domain, keys, config.mr_cache_entries);
//!     let region = cache.get(0x1000, 4096, Access::LOCAL_WRITE)?;
//!     let lkey = region.key;
//!     cache.put(&region);
//!     let _ = lkey;
//!     Ok(())
//! }
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod fabric;
pub mod keymap;
pub mod mr;
pub mod mrcache;
pub mod progress;
pub mod qp;
pub mod wr;

pub use completion::VerbsCq;
pub use config::TransportConfig;
pub use error::{ChainError, Error, Result};
pub use keymap::KeyTable;
pub use mr::RegisteredRegion;
pub use mrcache::{CacheStats, MrCache};
pub use progress::{DeviceId, ProgressEngine};
pub use qp::{AuthKey, QpState, QueuePair};
pub use wr::{
    RecvWr, RemoteTarget, SendOpcode, SendWr, Sge, WcOpcode, WcStatus, WorkCompletion,
};
