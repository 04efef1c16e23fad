//! Work request and work completion descriptors.
//!
//! These are the caller-facing verbs-style types: chained descriptors become
//! an owned slice walked once per submission, and completions carry the
//! opaque identifier the caller supplied.

/// One (buffer, key) pair within a descriptor's scatter/gather list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sge {
    /// Buffer address.
    pub addr: u64,
    /// Buffer length in bytes.
    pub length: u32,
    /// External 32-bit key of the region covering the buffer.
    pub lkey: u32,
}

/// Remote buffer named by an RDMA operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Remote address.
    pub addr: u64,
    /// Remote external 32-bit key.
    pub rkey: u32,
}

/// Send-side opcode classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOpcode {
    Send,
    /// Degrades to a plain send: the fabric has no remote-invalidate
    /// primitive. The completion reports success for the degraded
    /// semantics.
    SendWithInvalidate { invalidate_rkey: u32 },
    RdmaWrite,
    /// Degrades to a plain write: immediate data has no fabric
    /// equivalent on this path.
    RdmaWriteWithImmediate { imm: u32 },
    RdmaRead,
}

/// One send-side work request.
#[derive(Debug, Clone)]
pub struct SendWr {
    /// Opaque caller-supplied identifier, echoed on the completion.
    pub wr_id: u64,
    pub opcode: SendOpcode,
    /// Scatter/gather list.
    pub sge: Vec<Sge>,
    /// Required for RDMA opcodes, ignored for sends.
    pub remote: Option<RemoteTarget>,
}

/// One receive-side work request.
#[derive(Debug, Clone)]
pub struct RecvWr {
    /// Opaque caller-supplied identifier, echoed on the completion.
    pub wr_id: u64,
    /// Scatter/gather list.
    pub sge: Vec<Sge>,
}

/// Opcode class reported on a work completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WcOpcode {
    Send,
    Receive,
    RdmaRead,
    RdmaWrite,
}

/// Completion status, a closed set independent of fabric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WcStatus {
    Success,
    /// Local length error (e.g. truncated transfer).
    LocalLengthError,
    /// Local protection error (access violation).
    LocalProtectionError,
    /// Operation flushed (canceled during teardown).
    FlushError,
    /// Remote side rejected access.
    RemoteAccessError,
    /// Operation timed out.
    TimeoutError,
    /// Any fabric error without a specific mapping.
    GeneralError,
}

/// One work completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkCompletion {
    /// The identifier from the submitted work request.
    pub wr_id: u64,
    pub status: WcStatus,
    pub opcode: WcOpcode,
    /// Bytes transferred. Zero on error completions.
    pub byte_len: u32,
}
