//! Queue-pair translation engine.
//!
//! A [`QueuePair`] exposes the chained work-request surface callers expect
//! and issues one fabric operation per descriptor underneath. Chains are
//! walked strictly in order; the first descriptor that fails to translate
//! stops the walk, reports its index, and leaves the rest unsubmitted.
//!
//! The send path and receive path are serialized independently: a send in
//! flight never blocks a receive.

use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::completion::VerbsCq;
use crate::config::TransportConfig;
use crate::error::{ChainError, Error, Result};
use crate::fabric::{FabricAddr, FabricEndpoint, IoSeg, LocalDesc};
use crate::keymap::KeyTable;
use crate::mrcache::MrCache;
use crate::wr::{RecvWr, SendOpcode, SendWr, WcOpcode};

/// Endpoint state machine. Monotonic, except that any state may
/// transition to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpState {
    Reset,
    /// Authentication/addressing context acquired.
    Init,
    /// Remote address resolved and bound.
    ReadyToReceive,
    /// Endpoint enabled for traffic. The only state accepting
    /// send/read/write submissions.
    ReadyToSend,
    Error,
}

/// Authentication credentials for the fabric service.
///
/// Sourcing these (mount options, environment, service lookup) is the
/// caller's concern; the queue pair only carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthKey {
    pub network_id: u16,
    pub service_id: u16,
    pub traffic_class: u8,
}

struct Control {
    state: QpState,
    auth: Option<AuthKey>,
    peer: Option<FabricAddr>,
}

/// A verbs-style queue pair backed by a single fabric endpoint.
pub struct QueuePair {
    ep: Arc<dyn FabricEndpoint>,
    send_cq: Arc<VerbsCq>,
    recv_cq: Arc<VerbsCq>,
    cache: Arc<MrCache>,
    keys: Arc<KeyTable>,
    control: Mutex<Control>,
    sq_lock: Mutex<()>,
    rq_lock: Mutex<()>,
    max_sge: usize,
}

impl QueuePair {
    pub fn new(
        ep: Arc<dyn FabricEndpoint>,
        send_cq: Arc<VerbsCq>,
        recv_cq: Arc<VerbsCq>,
        cache: Arc<MrCache>,
        keys: Arc<KeyTable>,
        config: &TransportConfig,
    ) -> Self {
        Self {
            ep,
            send_cq,
            recv_cq,
            cache,
            keys,
            control: Mutex::new(Control {
                state: QpState::Reset,
                auth: None,
                peer: None,
            }),
            sq_lock: Mutex::new(()),
            rq_lock: Mutex::new(()),
            max_sge: config.max_sge,
        }
    }

    pub fn state(&self) -> QpState {
        self.control.lock().unwrap().state
    }

    pub fn send_cq(&self) -> &Arc<VerbsCq> {
        &self.send_cq
    }

    pub fn recv_cq(&self) -> &Arc<VerbsCq> {
        &self.recv_cq
    }

    /// `Reset → Init`: store the authentication context.
    pub fn init(&self, auth: AuthKey) -> Result<()> {
        let mut control = self.control.lock().unwrap();
        if control.state != QpState::Reset {
            return Err(Error::NotReady);
        }
        control.auth = Some(auth);
        control.state = QpState::Init;
        Ok(())
    }

    /// `Init → ReadyToReceive`: resolve and bind the remote address.
    pub fn ready_to_receive(&self, remote_raw_addr: &[u8]) -> Result<()> {
        if remote_raw_addr.is_empty() {
            return Err(Error::InvalidArgument("empty remote address"));
        }
        let mut control = self.control.lock().unwrap();
        if control.state != QpState::Init {
            return Err(Error::NotReady);
        }
        let peer = self.ep.bind_remote(remote_raw_addr)?;
        control.peer = Some(peer);
        control.state = QpState::ReadyToReceive;
        Ok(())
    }

    /// `ReadyToReceive → ReadyToSend`: enable the endpoint for traffic.
    pub fn ready_to_send(&self) -> Result<()> {
        let mut control = self.control.lock().unwrap();
        if control.state != QpState::ReadyToReceive {
            return Err(Error::NotReady);
        }
        self.ep.enable()?;
        control.state = QpState::ReadyToSend;
        info!("queue pair active");
        Ok(())
    }

    /// Move to the error state. Allowed from anywhere.
    pub fn set_error(&self) {
        self.control.lock().unwrap().state = QpState::Error;
    }

    /// The stored authentication context, if `init` has run.
    pub fn auth(&self) -> Option<AuthKey> {
        self.control.lock().unwrap().auth
    }

    /// Post a chain of send-side work requests.
    ///
    /// Descriptors are issued strictly in order. On failure the error
    /// names the failing index; earlier descriptors are already submitted
    /// and later ones were not attempted.
    pub fn post_send(&self, wrs: &[SendWr]) -> std::result::Result<(), ChainError> {
        let _sq = self.sq_lock.lock().unwrap();
        let peer = self.require_ready()?;

        for (index, wr) in wrs.iter().enumerate() {
            self.submit_send(wr, peer)
                .map_err(|error| ChainError { index, error })?;
        }
        Ok(())
    }

    /// Post a chain of receive-side work requests.
    ///
    /// Receives are accepted once the endpoint can receive, i.e. in
    /// `ReadyToReceive` or `ReadyToSend`.
    pub fn post_recv(&self, wrs: &[RecvWr]) -> std::result::Result<(), ChainError> {
        let _rq = self.rq_lock.lock().unwrap();
        let peer = {
            let control = self.control.lock().unwrap();
            match control.state {
                QpState::ReadyToReceive | QpState::ReadyToSend => control.peer,
                _ => None,
            }
            .ok_or(ChainError {
                index: 0,
                error: Error::NotReady,
            })?
        };

        for (index, wr) in wrs.iter().enumerate() {
            self.submit_recv(wr, peer)
                .map_err(|error| ChainError { index, error })?;
        }
        Ok(())
    }

    fn require_ready(&self) -> std::result::Result<FabricAddr, ChainError> {
        let control = self.control.lock().unwrap();
        if control.state != QpState::ReadyToSend {
            return Err(ChainError {
                index: 0,
                error: Error::NotReady,
            });
        }
        control.peer.ok_or(ChainError {
            index: 0,
            error: Error::Internal("active queue pair has no peer address"),
        })
    }

    /// Resolve every segment of a scatter/gather list to fabric spans and
    /// local descriptors.
    fn resolve_sge(
        &self,
        sge: &[crate::wr::Sge],
    ) -> Result<(Vec<IoSeg>, Vec<LocalDesc>)> {
        if sge.is_empty() {
            return Err(Error::InvalidArgument("empty scatter/gather list"));
        }
        if sge.len() > self.max_sge {
            return Err(Error::TooManySegments {
                got: sge.len(),
                max: self.max_sge,
            });
        }

        let mut segs = Vec::with_capacity(sge.len());
        let mut descs = Vec::with_capacity(sge.len());
        for entry in sge {
            if entry.length == 0 {
                return Err(Error::InvalidArgument("zero-length segment"));
            }
            let region = self.cache.resolve(entry.lkey)?;
            segs.push(IoSeg {
                addr: entry.addr,
                len: entry.length as u64,
            });
            descs.push(region.local_desc());
        }
        Ok((segs, descs))
    }

    fn submit_send(&self, wr: &SendWr, peer: FabricAddr) -> Result<()> {
        let (segs, descs) = self.resolve_sge(&wr.sge)?;

        let class = match wr.opcode {
            SendOpcode::Send => WcOpcode::Send,
            SendOpcode::SendWithInvalidate { invalidate_rkey } => {
                // No remote-invalidate primitive underneath; degrade to a
                // plain send.
                debug!(
                    "send-with-invalidate (rkey={:#x}) degraded to plain send",
                    invalidate_rkey
                );
                WcOpcode::Send
            }
            SendOpcode::RdmaWrite => WcOpcode::RdmaWrite,
            SendOpcode::RdmaWriteWithImmediate { imm } => {
                // Immediate data has no equivalent on this path.
                debug!("write-with-immediate (imm={:#x}) degraded to plain write", imm);
                WcOpcode::RdmaWrite
            }
            SendOpcode::RdmaRead => WcOpcode::RdmaRead,
        };

        let remote = match class {
            WcOpcode::RdmaWrite | WcOpcode::RdmaRead => {
                let target = wr
                    .remote
                    .ok_or(Error::InvalidArgument("rdma request without remote target"))?;
                let fabric_rkey = self
                    .keys
                    .lookup_by_external(target.rkey)
                    .map_err(|_| Error::InvalidKey(target.rkey))?;
                Some((target.addr, fabric_rkey))
            }
            _ => None,
        };

        let ctx = self.send_cq.track(wr.wr_id, class);
        let single = segs.len() == 1;
        let outcome = match (class, remote) {
            (WcOpcode::RdmaWrite, Some((raddr, rkey))) => {
                if single {
                    self.ep.write(segs[0], descs[0], peer, raddr, rkey, ctx)
                } else {
                    self.ep.writev(&segs, &descs, peer, raddr, rkey, ctx)
                }
            }
            (WcOpcode::RdmaRead, Some((raddr, rkey))) => {
                if single {
                    self.ep.read(segs[0], descs[0], peer, raddr, rkey, ctx)
                } else {
                    self.ep.readv(&segs, &descs, peer, raddr, rkey, ctx)
                }
            }
            _ => {
                if single {
                    self.ep.send(segs[0], descs[0], peer, ctx)
                } else {
                    self.ep.sendv(&segs, &descs, peer, ctx)
                }
            }
        };

        if let Err(e) = outcome {
            self.send_cq.untrack(ctx);
            return Err(e.into());
        }
        Ok(())
    }

    fn submit_recv(&self, wr: &RecvWr, peer: FabricAddr) -> Result<()> {
        let (segs, descs) = self.resolve_sge(&wr.sge)?;

        let ctx = self.recv_cq.track(wr.wr_id, WcOpcode::Receive);
        let outcome = if segs.len() == 1 {
            self.ep.recv(segs[0], descs[0], peer, ctx)
        } else {
            self.ep.recvv(&segs, &descs, peer, ctx)
        };

        if let Err(e) = outcome {
            self.recv_cq.untrack(ctx);
            return Err(e.into());
        }
        Ok(())
    }
}
