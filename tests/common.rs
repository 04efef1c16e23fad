//! Shared fakes for the integration tests: an in-memory fabric that
//! records every call and completes accepted operations immediately.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fabverbs::fabric::{
    errno, Access, CompletionQueue, CqEntry, CqErrEntry, FabricAddr, FabricEndpoint, FabricError,
    FabricMr, FabricResult, IoSeg, LocalDesc, MemoryDomain, OpFlags,
};
use fabverbs::{AuthKey, KeyTable, MrCache, QueuePair, TransportConfig, VerbsCq};

/// Memory domain that hands out sequential fabric keys and counts calls.
pub struct FakeDomain {
    next: AtomicU64,
    pub registered: AtomicUsize,
    pub deregistered: AtomicUsize,
    fail_next: Mutex<Option<i32>>,
}

impl FakeDomain {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            registered: AtomicUsize::new(0),
            deregistered: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
        }
    }

    /// Make the next register call fail with the given fabric errno.
    pub fn fail_next_register(&self, code: i32) {
        *self.fail_next.lock().unwrap() = Some(code);
    }

    pub fn live_registrations(&self) -> usize {
        self.registered.load(Ordering::SeqCst) - self.deregistered.load(Ordering::SeqCst)
    }
}

impl MemoryDomain for FakeDomain {
    fn register(
        &self,
        _addr: u64,
        _len: u64,
        _access: OpFlags,
        _requested_key: Option<u64>,
    ) -> FabricResult<FabricMr> {
        if let Some(code) = self.fail_next.lock().unwrap().take() {
            return Err(FabricError::new(code));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok(FabricMr {
            handle: n,
            key: 0x1_0000_0000 + n,
        })
    }

    fn deregister(&self, _mr: &FabricMr) -> FabricResult<()> {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn local_desc(&self, mr: &FabricMr) -> LocalDesc {
        LocalDesc(mr.handle)
    }
}

/// Scriptable completion queue: data records and error records are queued
/// by the test (or by [`FakeEndpoint`]) and drained through the
/// [`CompletionQueue`] interface.
pub struct FakeCq {
    data: Mutex<VecDeque<CqEntry>>,
    errors: Mutex<VecDeque<CqErrEntry>>,
}

impl FakeCq {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, entry: CqEntry) {
        self.data.lock().unwrap().push_back(entry);
    }

    pub fn push_error(&self, entry: CqErrEntry) {
        self.errors.lock().unwrap().push_back(entry);
    }
}

impl CompletionQueue for FakeCq {
    fn read(&self, out: &mut Vec<CqEntry>, max: usize) -> FabricResult<usize> {
        if !self.errors.lock().unwrap().is_empty() {
            return Err(FabricError::new(errno::EOTHER));
        }
        let mut data = self.data.lock().unwrap();
        if data.is_empty() {
            return Err(FabricError::new(errno::EAGAIN));
        }
        let n = max.min(data.len());
        out.extend(data.drain(..n));
        Ok(n)
    }

    fn read_error(&self) -> Option<CqErrEntry> {
        self.errors.lock().unwrap().pop_front()
    }
}

/// Everything a [`FakeEndpoint`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    BindRemote(Vec<u8>),
    Enable,
    Send { ctx: u64, segs: usize, len: u64 },
    Recv { ctx: u64, segs: usize, len: u64 },
    Read { ctx: u64, segs: usize, remote_addr: u64, remote_key: u64 },
    Write { ctx: u64, segs: usize, remote_addr: u64, remote_key: u64 },
}

/// Endpoint that records operations and immediately pushes a matching
/// data completion onto the right fake queue.
pub struct FakeEndpoint {
    pub ops: Mutex<Vec<Op>>,
    send_cq: Arc<FakeCq>,
    recv_cq: Arc<FakeCq>,
    fail_next: Mutex<Option<i32>>,
}

impl FakeEndpoint {
    pub fn new(send_cq: Arc<FakeCq>, recv_cq: Arc<FakeCq>) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            send_cq,
            recv_cq,
            fail_next: Mutex::new(None),
        }
    }

    /// Make the next data operation fail with the given fabric errno.
    pub fn fail_next(&self, code: i32) {
        *self.fail_next.lock().unwrap() = Some(code);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    fn admit(&self) -> FabricResult<()> {
        match self.fail_next.lock().unwrap().take() {
            Some(code) => Err(FabricError::new(code)),
            None => Ok(()),
        }
    }

    fn complete(&self, cq: &FakeCq, ctx: u64, flags: OpFlags, len: u64) {
        cq.push(CqEntry { context: ctx, flags, len });
    }
}

fn total_len(segs: &[IoSeg]) -> u64 {
    segs.iter().map(|s| s.len).sum()
}

impl FabricEndpoint for FakeEndpoint {
    fn bind_remote(&self, raw_addr: &[u8]) -> FabricResult<FabricAddr> {
        self.admit()?;
        self.ops.lock().unwrap().push(Op::BindRemote(raw_addr.to_vec()));
        Ok(FabricAddr(1))
    }

    fn enable(&self) -> FabricResult<()> {
        self.admit()?;
        self.ops.lock().unwrap().push(Op::Enable);
        Ok(())
    }

    fn send(&self, seg: IoSeg, _desc: LocalDesc, dest: FabricAddr, ctx: u64) -> FabricResult<()> {
        self.sendv(&[seg], &[], dest, ctx)
    }

    fn sendv(
        &self,
        segs: &[IoSeg],
        _descs: &[LocalDesc],
        _dest: FabricAddr,
        ctx: u64,
    ) -> FabricResult<()> {
        self.admit()?;
        let len = total_len(segs);
        self.ops.lock().unwrap().push(Op::Send {
            ctx,
            segs: segs.len(),
            len,
        });
        self.complete(&self.send_cq, ctx, OpFlags::SEND, len);
        Ok(())
    }

    fn recv(&self, seg: IoSeg, _desc: LocalDesc, src: FabricAddr, ctx: u64) -> FabricResult<()> {
        self.recvv(&[seg], &[], src, ctx)
    }

    fn recvv(
        &self,
        segs: &[IoSeg],
        _descs: &[LocalDesc],
        _src: FabricAddr,
        ctx: u64,
    ) -> FabricResult<()> {
        self.admit()?;
        let len = total_len(segs);
        self.ops.lock().unwrap().push(Op::Recv {
            ctx,
            segs: segs.len(),
            len,
        });
        self.complete(&self.recv_cq, ctx, OpFlags::RECV, len);
        Ok(())
    }

    fn read(
        &self,
        seg: IoSeg,
        _desc: LocalDesc,
        src: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()> {
        self.readv(&[seg], &[], src, remote_addr, remote_key, ctx)
    }

    fn readv(
        &self,
        segs: &[IoSeg],
        _descs: &[LocalDesc],
        _src: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()> {
        self.admit()?;
        self.ops.lock().unwrap().push(Op::Read {
            ctx,
            segs: segs.len(),
            remote_addr,
            remote_key,
        });
        self.complete(&self.send_cq, ctx, OpFlags::READ, total_len(segs));
        Ok(())
    }

    fn write(
        &self,
        seg: IoSeg,
        _desc: LocalDesc,
        dest: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()> {
        self.writev(&[seg], &[], dest, remote_addr, remote_key, ctx)
    }

    fn writev(
        &self,
        segs: &[IoSeg],
        _descs: &[LocalDesc],
        _dest: FabricAddr,
        remote_addr: u64,
        remote_key: u64,
        ctx: u64,
    ) -> FabricResult<()> {
        self.admit()?;
        self.ops.lock().unwrap().push(Op::Write {
            ctx,
            segs: segs.len(),
            remote_addr,
            remote_key,
        });
        self.complete(&self.send_cq, ctx, OpFlags::WRITE, total_len(segs));
        Ok(())
    }
}

/// Fully wired translation stack over the fakes.
pub struct Harness {
    pub domain: Arc<FakeDomain>,
    pub ep: Arc<FakeEndpoint>,
    pub send_fake: Arc<FakeCq>,
    pub recv_fake: Arc<FakeCq>,
    pub send_cq: Arc<VerbsCq>,
    pub recv_cq: Arc<VerbsCq>,
    pub keys: Arc<KeyTable>,
    pub cache: Arc<MrCache>,
    pub qp: QueuePair,
}

pub fn harness(config: TransportConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let domain = Arc::new(FakeDomain::new());
    let send_fake = Arc::new(FakeCq::new());
    let recv_fake = Arc::new(FakeCq::new());
    let ep = Arc::new(FakeEndpoint::new(
        Arc::clone(&send_fake),
        Arc::clone(&recv_fake),
    ));
    let send_cq = Arc::new(VerbsCq::new(
        Arc::clone(&send_fake) as Arc<dyn CompletionQueue>
    ));
    let recv_cq = Arc::new(VerbsCq::new(
        Arc::clone(&recv_fake) as Arc<dyn CompletionQueue>
    ));
    let keys = Arc::new(KeyTable::new());
    let cache = Arc::new(MrCache::new(
        Arc::clone(&domain) as Arc<dyn MemoryDomain>,
        Arc::clone(&keys),
        config.mr_cache_entries,
    ));
    let qp = QueuePair::new(
        Arc::clone(&ep) as Arc<dyn FabricEndpoint>,
        Arc::clone(&send_cq),
        Arc::clone(&recv_cq),
        Arc::clone(&cache),
        Arc::clone(&keys),
        &config,
    );

    Harness {
        domain,
        ep,
        send_fake,
        recv_fake,
        send_cq,
        recv_cq,
        keys,
        cache,
        qp,
    }
}

/// Harness with the queue pair already walked to `ReadyToSend`.
pub fn ready_harness(config: TransportConfig) -> Harness {
    let h = harness(config);
    h.qp.init(AuthKey::default()).unwrap();
    h.qp.ready_to_receive(b"peer-0").unwrap();
    h.qp.ready_to_send().unwrap();
    h
}

/// Register a buffer through the cache, return it to the cache, and hand
/// back the external key for use in scatter/gather entries.
pub fn registered_lkey(h: &Harness, addr: u64, len: u64) -> u32 {
    let region = h.cache.get(addr, len, Access::LOCAL_WRITE).unwrap();
    let key = region.key;
    h.cache.put(&region);
    key
}
