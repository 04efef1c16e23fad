//! Manual progress engine.
//!
//! The fabric makes no progress on its own: completions appear only when
//! someone polls. One worker thread per device drives its completion
//! queue, delivering batches to a caller-supplied sink. Workers back off
//! when idle and back off longer after a device fault so a broken queue
//! cannot spin a core.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::completion::VerbsCq;
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::wr::WorkCompletion;

/// Stable identity of a device, independent of handle address. Two opens
/// of the same device share one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Registry of per-device progress workers.
pub struct ProgressEngine {
    workers: Mutex<HashMap<DeviceId, Worker>>,
    batch: usize,
    idle_backoff: Duration,
    error_backoff: Duration,
}

impl ProgressEngine {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            batch: config.cq_batch,
            idle_backoff: config.idle_backoff,
            error_backoff: config.error_backoff,
        }
    }

    /// Start a worker for `device`, delivering completion batches to
    /// `sink`. A second start for the same device fails; the first worker
    /// keeps running.
    pub fn start<F>(&self, device: DeviceId, cq: Arc<VerbsCq>, mut sink: F) -> Result<()>
    where
        F: FnMut(Vec<WorkCompletion>) + Send + 'static,
    {
        let mut workers = self.workers.lock().unwrap();
        if workers.contains_key(&device) {
            return Err(Error::AlreadyExists);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let batch = self.batch;
        let idle_backoff = self.idle_backoff;
        let error_backoff = self.error_backoff;
        let name = format!("fabverbs-progress-{}", device);

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                while !worker_stop.load(Ordering::Acquire) {
                    match cq.poll(batch) {
                        Ok(wcs) if !wcs.is_empty() => {
                            // A burst is likely followed by more; poll
                            // again without sleeping.
                            sink(wcs);
                        }
                        Ok(_) => thread::sleep(idle_backoff),
                        Err(e) => {
                            warn!("progress poll failed: {}", e);
                            thread::sleep(error_backoff);
                        }
                    }
                }
            })
            .map_err(|_| Error::ResourceExhausted)?;

        info!("progress worker started for {}", device);
        workers.insert(device, Worker { stop, thread });
        Ok(())
    }

    /// Stop the worker for `device` and wait for it to exit. Returns
    /// whether a worker was running.
    pub fn stop(&self, device: &DeviceId) -> bool {
        let worker = self.workers.lock().unwrap().remove(device);
        match worker {
            Some(w) => {
                w.stop.store(true, Ordering::Release);
                if w.thread.join().is_err() {
                    warn!("progress worker for {} panicked", device);
                }
                info!("progress worker stopped for {}", device);
                true
            }
            None => false,
        }
    }

    /// Stop every worker and wait for each.
    pub fn stop_all(&self) {
        let drained: Vec<(DeviceId, Worker)> =
            self.workers.lock().unwrap().drain().collect();
        for (device, w) in drained {
            w.stop.store(true, Ordering::Release);
            if w.thread.join().is_err() {
                warn!("progress worker for {} panicked", device);
            }
        }
    }

    pub fn is_running(&self, device: &DeviceId) -> bool {
        self.workers.lock().unwrap().contains_key(device)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}

impl Drop for ProgressEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}
