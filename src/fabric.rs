//! Boundary traits and record types for the underlying fabric interface.
//!
//! The fabric model is endpoint-centric: one operation per call, 64-bit
//! memory keys, non-blocking completion-queue reads, and no automatic
//! progress. Device, domain, and completion-queue lifecycle live with the
//! provider behind these traits; the translation core only consumes them.

use std::fmt;

use bitflags::bitflags;

/// Fabric error codes.
///
/// General codes are offset from standard errno values to avoid conflicts;
/// provider-specific codes use a second offset.
pub mod errno {
    const OFFSET: i32 = 256;
    const PROV_OFFSET: i32 = 512;

    pub const EAGAIN: i32 = OFFSET + 1;
    pub const EACCES: i32 = OFFSET + 2;
    pub const ECANCELED: i32 = OFFSET + 3;
    pub const EINVAL: i32 = OFFSET + 4;
    pub const ENOMEM: i32 = OFFSET + 5;
    pub const ENODATA: i32 = OFFSET + 6;
    pub const EMSGSIZE: i32 = OFFSET + 7;
    pub const ENOSYS: i32 = OFFSET + 8;
    pub const ENOENT: i32 = OFFSET + 9;
    pub const EBUSY: i32 = OFFSET + 10;
    pub const ENETDOWN: i32 = OFFSET + 11;
    pub const ENETUNREACH: i32 = OFFSET + 12;
    pub const ECONNREFUSED: i32 = OFFSET + 13;
    pub const ECONNRESET: i32 = OFFSET + 14;
    pub const ETIMEDOUT: i32 = OFFSET + 15;
    pub const ENOTCONN: i32 = OFFSET + 16;

    pub const ETRUNC: i32 = PROV_OFFSET + 1;
    pub const EOVERRUN: i32 = PROV_OFFSET + 2;
    pub const EOTHER: i32 = PROV_OFFSET + 3;
}

/// An error reported by a fabric call, carrying one of the [`errno`] codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricError(i32);

impl FabricError {
    pub fn new(code: i32) -> Self {
        FabricError(code)
    }

    #[inline]
    pub fn code(&self) -> i32 {
        self.0
    }

    /// Resource temporarily unavailable. The caller should retry rather
    /// than treat the operation as failed.
    #[inline]
    pub fn is_again(&self) -> bool {
        self.0 == errno::EAGAIN
    }
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fabric error {}", self.0)
    }
}

impl std::error::Error for FabricError {}

/// Result type for fabric calls.
pub type FabricResult<T> = std::result::Result<T, FabricError>;

bitflags! {
    /// Fabric operation/capability flags.
    ///
    /// Used both as memory access bits at registration time and as
    /// operation-type bits on completion records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u64 {
        const SEND = 1 << 0;
        const RECV = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const REMOTE_READ = 1 << 4;
        const REMOTE_WRITE = 1 << 5;
    }
}

bitflags! {
    /// Caller-visible memory access rights.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Access: u32 {
        const LOCAL_WRITE = 1 << 0;
        const REMOTE_WRITE = 1 << 1;
        const REMOTE_READ = 1 << 2;
        const REMOTE_ATOMIC = 1 << 3;
    }
}

impl Access {
    /// Translate caller access rights to fabric access bits.
    ///
    /// The fabric has no separate atomic right; remote atomic collapses
    /// to remote write.
    pub fn to_fabric(self) -> OpFlags {
        let mut flags = OpFlags::READ;
        if self.contains(Access::LOCAL_WRITE) {
            flags |= OpFlags::WRITE;
        }
        if self.contains(Access::REMOTE_WRITE) {
            flags |= OpFlags::REMOTE_WRITE;
        }
        if self.contains(Access::REMOTE_READ) {
            flags |= OpFlags::REMOTE_READ;
        }
        if self.contains(Access::REMOTE_ATOMIC) {
            flags |= OpFlags::REMOTE_WRITE;
        }
        flags
    }
}

/// A fabric-native memory registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricMr {
    /// Provider handle token.
    pub handle: u64,
    /// The 64-bit fabric-native key.
    pub key: u64,
}

/// Opaque local-access descriptor for a registered region, passed
/// alongside address/length when issuing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDesc(pub u64);

/// Resolved destination/source address token from the address vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricAddr(pub u64);

/// One contiguous buffer span handed to a fabric operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSeg {
    pub addr: u64,
    pub len: u64,
}

/// Memory registration capability of a fabric domain.
pub trait MemoryDomain: Send + Sync {
    /// Register a region. `requested_key` of `None` lets the provider
    /// choose the fabric key.
    fn register(
        &self,
        addr: u64,
        len: u64,
        access: OpFlags,
        requested_key: Option<u64>,
    ) -> FabricResult<FabricMr>;

    /// Deregister a previously registered region.
    fn deregister(&self, mr: &FabricMr) -> FabricResult<()>;

    /// Descriptor used for local access when issuing operations.
    fn local_desc(&self, mr: &FabricMr) -> LocalDesc;
}

/// Send/receive/RDMA primitives of a fabric endpoint.
///
/// Every call returns immediately: `Ok` means accepted, `EAGAIN` means
/// backpressure, anything else is a hard error. `ctx` is an opaque
/// completion identifier echoed back on the matching completion record.
pub trait FabricEndpoint: Send + Sync {
    /// Insert the remote raw address into the address vector and bind it,
    /// yielding the address token used by subsequent operations.
    fn bind_remote(&self, raw_addr: &[u8]) -> FabricResult<FabricAddr>;

    /// Activate the endpoint for traffic.
    fn enable(&self) -> FabricResult<()>;

    fn send(&self, seg: IoSeg, desc: LocalDesc, dest: FabricAddr, ctx: u64) -> FabricResult<()>;

    fn sendv(
        &self,
        segs: &[IoSeg],
        descs: &[LocalDesc],
        dest: FabricAddr,
        ctx: u64,
    ) -> FabricResult<()>;

    fn recv(&self, seg: IoSeg, desc: LocalDesc, src: FabricAddr, ctx: u64) -> FabricResult<()>;

    fn recvv(
        &self,
        segs: &[IoSeg],
        descs: &[LocalDesc],
        src: FabricAddr,
        ctx: u64,
    ) -> FabricResult<()>;

    fn read(
        &self,
        seg: IoSeg,
        desc: LocalDesc,
        src: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()>;

    fn readv(
        &self,
        segs: &[IoSeg],
        descs: &[LocalDesc],
        src: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()>;

    fn write(
        &self,
        seg: IoSeg,
        desc: LocalDesc,
        dest: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()>;

    fn writev(
        &self,
        segs: &[IoSeg],
        descs: &[LocalDesc],
        dest: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()>;
}

/// A data completion record read from a fabric completion queue.
#[derive(Debug, Clone, Copy)]
pub struct CqEntry {
    /// The opaque completion identifier from submission.
    pub context: u64,
    /// Operation-type flags.
    pub flags: OpFlags,
    /// Bytes transferred.
    pub len: u64,
}

/// An out-of-band error record.
#[derive(Debug, Clone, Copy)]
pub struct CqErrEntry {
    /// The opaque completion identifier from submission.
    pub context: u64,
    /// One of the [`errno`] codes.
    pub err: i32,
    /// Provider-specific error detail.
    pub prov_errno: i32,
}

/// Non-blocking completion queue read interface.
pub trait CompletionQueue: Send + Sync {
    /// Read up to `max` completion records into `out`.
    ///
    /// Returns the number of records read, or `EAGAIN` when the queue is
    /// empty. Any other error indicates an error record is pending (fetch
    /// it with [`read_error`](CompletionQueue::read_error)) or a device
    /// fault.
    fn read(&self, out: &mut Vec<CqEntry>, max: usize) -> FabricResult<usize>;

    /// Fetch a pending error record, if any.
    fn read_error(&self) -> Option<CqErrEntry>;
}
