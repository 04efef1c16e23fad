//! Error types for fabverbs.

use std::fmt;

use crate::fabric::{errno, FabricError};

/// Error type for translation-layer operations.
///
/// Callers only ever see this taxonomy; fabric-native error codes are
/// mapped into it at the boundary and never propagate upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed request (zero-length buffer, empty segment list, ...).
    InvalidArgument(&'static str),
    /// Allocation failure or fabric resource exhaustion.
    ResourceExhausted,
    /// Key or entry lookup miss.
    NotFound,
    /// Key generator collision. Never expected in normal operation.
    AlreadyExists,
    /// Fabric backpressure. Retry the same descriptor.
    TemporarilyUnavailable,
    /// Opcode or region type with no translation.
    Unsupported(&'static str),
    /// Operation attempted outside the required endpoint state.
    NotReady,
    /// A segment or remote buffer named a key with no live mapping.
    InvalidKey(u32),
    /// Scatter/gather list exceeds the configured maximum.
    TooManySegments { got: usize, max: usize },
    /// Invariant violation, e.g. dual-index inconsistency.
    Internal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            Error::ResourceExhausted => write!(f, "resource exhausted"),
            Error::NotFound => write!(f, "not found"),
            Error::AlreadyExists => write!(f, "already exists"),
            Error::TemporarilyUnavailable => write!(f, "temporarily unavailable, retry"),
            Error::Unsupported(what) => write!(f, "unsupported: {}", what),
            Error::NotReady => write!(f, "endpoint not in required state"),
            Error::InvalidKey(key) => write!(f, "no mapping for key {:#x}", key),
            Error::TooManySegments { got, max } => {
                write!(f, "{} segments exceeds maximum {}", got, max)
            }
            Error::Internal(what) => write!(f, "internal invariant violated: {}", what),
        }
    }
}

impl std::error::Error for Error {}

impl From<FabricError> for Error {
    fn from(e: FabricError) -> Self {
        match e.code() {
            errno::EAGAIN => Error::TemporarilyUnavailable,
            errno::ENOMEM => Error::ResourceExhausted,
            errno::EINVAL => Error::InvalidArgument("rejected by fabric"),
            errno::ENOENT => Error::NotFound,
            errno::ENOSYS => Error::Unsupported("rejected by fabric"),
            _ => Error::Internal("unexpected fabric error"),
        }
    }
}

/// Result type for translation-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error from posting a chain of work requests.
///
/// Descriptors before `index` were submitted; descriptors at and after
/// `index` were not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainError {
    /// Index of the descriptor that failed.
    pub index: usize,
    /// Why it failed.
    pub error: Error,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work request {} failed: {}", self.index, self.error)
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
