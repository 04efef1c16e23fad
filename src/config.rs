//! Configuration types for fabverbs.

use std::time::Duration;

/// Transport configuration.
///
/// Controls translation limits, cache sizing, and progress-engine pacing.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum scatter/gather entries per work request.
    /// Default: 16
    pub max_sge: usize,
    /// Maximum inline data size in bytes.
    /// Default: 512
    pub max_inline_data: usize,
    /// Completion records fetched per completion-queue read.
    /// Default: 16
    pub cq_batch: usize,
    /// Completion queue depth.
    /// Default: 1024
    pub cq_size: usize,
    /// Send/receive queue depth.
    /// Default: 256
    pub qp_depth: usize,
    /// Soft maximum number of cached memory registrations.
    /// Default: 1024
    pub mr_cache_entries: usize,
    /// Progress worker sleep when the completion queue is idle.
    /// Default: 50µs
    pub idle_backoff: Duration,
    /// Progress worker sleep after a hard completion-queue error.
    /// Default: 2ms
    pub error_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_sge: 16,
            max_inline_data: 512,
            cq_batch: 16,
            cq_size: 1024,
            qp_depth: 256,
            mr_cache_entries: 1024,
            idle_backoff: Duration::from_micros(50),
            error_backoff: Duration::from_millis(2),
        }
    }
}

impl TransportConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum scatter/gather entries per work request.
    pub fn with_max_sge(mut self, max_sge: usize) -> Self {
        self.max_sge = max_sge;
        self
    }

    /// Set the completion-queue read batch size.
    pub fn with_cq_batch(mut self, cq_batch: usize) -> Self {
        self.cq_batch = cq_batch;
        self
    }

    /// Set the soft maximum number of cached registrations.
    pub fn with_mr_cache_entries(mut self, entries: usize) -> Self {
        self.mr_cache_entries = entries;
        self
    }

    /// Set the idle backoff of the progress worker.
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Set the error backoff of the progress worker.
    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}
