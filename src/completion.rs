//! Completion translation.
//!
//! Fabric completion queues yield data records and out-of-band error
//! records; both are mapped to verbs-style work completions here. Every
//! in-flight operation is tracked in a pending table keyed by the context
//! value handed to the fabric, and consumed exactly once when its
//! completion (success or error) is observed.

use std::sync::{Arc, Mutex};

use log::warn;
use slab::Slab;

use crate::error::{Error, Result};
use crate::fabric::{errno, CompletionQueue, CqEntry, OpFlags};
use crate::wr::{WcOpcode, WcStatus, WorkCompletion};

/// Map a fabric error code to a completion status.
///
/// The table is fixed; unmapped codes resolve to [`WcStatus::GeneralError`]
/// so no error is ever silently dropped and the caller's status space
/// stays closed.
pub fn status_from_errno(err: i32) -> WcStatus {
    match err {
        0 => WcStatus::Success,
        errno::ETRUNC | errno::EMSGSIZE => WcStatus::LocalLengthError,
        errno::EACCES => WcStatus::LocalProtectionError,
        errno::ECANCELED => WcStatus::FlushError,
        errno::ETIMEDOUT => WcStatus::TimeoutError,
        errno::ECONNREFUSED | errno::ECONNRESET | errno::ENOTCONN => WcStatus::RemoteAccessError,
        _ => WcStatus::GeneralError,
    }
}

/// Infer the opcode class from completion flags.
///
/// Checked in fixed priority order: send, receive, read, write.
fn opcode_from_flags(flags: OpFlags) -> Option<WcOpcode> {
    if flags.contains(OpFlags::SEND) {
        Some(WcOpcode::Send)
    } else if flags.contains(OpFlags::RECV) {
        Some(WcOpcode::Receive)
    } else if flags.contains(OpFlags::READ) {
        Some(WcOpcode::RdmaRead)
    } else if flags.contains(OpFlags::WRITE) {
        Some(WcOpcode::RdmaWrite)
    } else {
        None
    }
}

struct Pending {
    wr_id: u64,
    class: WcOpcode,
}

/// A verbs-style completion queue over a fabric completion queue.
///
/// Owns the pending-operation table shared by every endpoint bound to the
/// underlying queue.
pub struct VerbsCq {
    cq: Arc<dyn CompletionQueue>,
    pending: Mutex<Slab<Pending>>,
}

impl VerbsCq {
    pub fn new(cq: Arc<dyn CompletionQueue>) -> Self {
        Self {
            cq,
            pending: Mutex::new(Slab::new()),
        }
    }

    /// Record an in-flight operation; the returned token is the context
    /// value to hand to the fabric call.
    pub(crate) fn track(&self, wr_id: u64, class: WcOpcode) -> u64 {
        self.pending.lock().unwrap().insert(Pending { wr_id, class }) as u64
    }

    /// Forget a tracked operation whose fabric call never went out.
    pub(crate) fn untrack(&self, ctx: u64) {
        self.pending.lock().unwrap().try_remove(ctx as usize);
    }

    /// Number of operations awaiting completion.
    pub fn pending_ops(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Consume the pending entry for a completed context.
    ///
    /// An unknown context still produces a reportable identity rather than
    /// dropping the completion.
    fn consume(&self, ctx: u64) -> (u64, Option<WcOpcode>) {
        match self.pending.lock().unwrap().try_remove(ctx as usize) {
            Some(p) => (p.wr_id, Some(p.class)),
            None => {
                warn!("completion for untracked context {}", ctx);
                (ctx, None)
            }
        }
    }

    /// Poll for up to `max` work completions. Never blocks; an empty
    /// queue is an empty result, not an error.
    pub fn poll(&self, max: usize) -> Result<Vec<WorkCompletion>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut entries: Vec<CqEntry> = Vec::with_capacity(max);
        match self.cq.read(&mut entries, max) {
            Ok(n) => Ok(entries
                .iter()
                .take(n)
                .map(|e| self.translate_data(e))
                .collect()),
            Err(e) if e.is_again() => Ok(Vec::new()),
            Err(e) => {
                if let Some(err) = self.cq.read_error() {
                    let (wr_id, class) = self.consume(err.context);
                    Ok(vec![WorkCompletion {
                        wr_id,
                        status: status_from_errno(err.err),
                        opcode: class.unwrap_or(WcOpcode::Send),
                        byte_len: 0,
                    }])
                } else {
                    warn!("completion queue read failed: {}", e);
                    Err(Error::Internal("completion queue read failed"))
                }
            }
        }
    }

    fn translate_data(&self, entry: &CqEntry) -> WorkCompletion {
        let (wr_id, class) = self.consume(entry.context);
        let opcode = opcode_from_flags(entry.flags)
            .or(class)
            .unwrap_or(WcOpcode::Send);
        WorkCompletion {
            wr_id,
            status: WcStatus::Success,
            opcode,
            byte_len: entry.len as u32,
        }
    }
}
