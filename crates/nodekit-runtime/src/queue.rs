//! Single-threaded executor owning an engine context
//!
//! Every engine operation for a context runs on one dedicated thread. `sync`
//! blocks the caller until the operation is done and runs it inline when the
//! caller already is the queue thread; `post` enqueues and returns. The
//! queue thread cannot wait for room on its own queue, so a `post` it makes
//! while the queue is full fails with [`RuntimeError::QueueFull`].
//!
//! A maintenance hook runs after each queued operation. Panics inside an
//! operation are caught and the queue keeps serving.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error, info_span, trace};

use crate::error::{RuntimeError, RuntimeResult};

type Operation = Box<dyn FnOnce() + Send + 'static>;

/// Hook run on the queue thread after every queued operation
pub type MaintenanceHook = Arc<dyn Fn() + Send + Sync>;

enum Job {
    Run(Operation),
    Shutdown,
}

/// Statistics about queue operation
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Operations handed to the queue thread
    pub submitted: AtomicU64,
    /// Operations that ran to completion or panicked
    pub completed: AtomicU64,
    /// Operations that panicked
    pub panicked: AtomicU64,
}

impl QueueStats {
    /// Get snapshot of current stats
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
}

impl QueueStatsSnapshot {
    /// Operations submitted but not yet finished
    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

pub struct EngineQueue {
    job_tx: Sender<Job>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    stats: Arc<QueueStats>,
}

impl EngineQueue {
    /// Start the queue thread
    pub fn new(
        name: &str,
        capacity: usize,
        maintenance: Option<MaintenanceHook>,
    ) -> RuntimeResult<Self> {
        let (job_tx, job_rx) = bounded::<Job>(capacity.max(1));
        let stats = Arc::new(QueueStats::default());
        let worker_stats = stats.clone();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_queue(job_rx, maintenance, worker_stats))
            .map_err(|e| RuntimeError::internal(format!("Failed to spawn engine queue: {}", e)))?;

        Ok(Self {
            job_tx,
            thread_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            stats,
        })
    }

    /// Whether the calling thread is the queue thread
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `op` on the queue thread and wait for its result
    pub fn sync<T, F>(&self, op: F) -> RuntimeResult<T>
    where
        F: FnOnce() -> RuntimeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return op();
        }

        let (tx, rx) = bounded::<RuntimeResult<T>>(1);
        let stats = self.stats.clone();
        self.submit(Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(op)) {
                Ok(result) => result,
                Err(panic) => {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    Err(RuntimeError::Panicked(panic_message(panic.as_ref())))
                }
            };
            let _ = tx.send(result);
        }))?;

        rx.recv()
            .map_err(|_| RuntimeError::internal("Engine queue dropped response"))?
    }

    /// Enqueue `op` and return without waiting
    pub fn post<F>(&self, op: F) -> RuntimeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(op))
    }

    fn submit(&self, op: Operation) -> RuntimeResult<()> {
        if self.is_closed() {
            return Err(RuntimeError::ContextClosed);
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let sent = if self.is_current() {
            self.job_tx.try_send(Job::Run(op)).map_err(|e| match e {
                TrySendError::Full(_) => RuntimeError::QueueFull(self.job_tx.len()),
                TrySendError::Disconnected(_) => RuntimeError::ContextClosed,
            })
        } else {
            self.job_tx
                .send(Job::Run(op))
                .map_err(|_| RuntimeError::ContextClosed)
        };
        if sent.is_err() {
            self.stats.submitted.fetch_sub(1, Ordering::Relaxed);
        }
        sent
    }

    /// Stop accepting work, let already-queued operations finish and join the
    /// queue thread. Called from the queue thread itself it does not wait.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.is_current() {
            // With no room for the signal the loop ends once the sender drops
            if self.job_tx.try_send(Job::Shutdown).is_err() {
                debug!("Engine queue full at shutdown");
            }
            return;
        }
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for EngineQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_queue(job_rx: Receiver<Job>, maintenance: Option<MaintenanceHook>, stats: Arc<QueueStats>) {
    let thread_name = std::thread::current()
        .name()
        .unwrap_or("nodekit-engine")
        .to_string();

    let _span = info_span!("engine_queue", name = %thread_name).entered();
    debug!("Engine queue starting");

    while let Ok(job) = job_rx.recv() {
        match job {
            Job::Shutdown => {
                debug!("Received shutdown signal");
                break;
            }
            Job::Run(op) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(op)) {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(panic = %panic_message(panic.as_ref()), "Engine queue operation panicked");
                }
                stats.completed.fetch_add(1, Ordering::Relaxed);

                if let Some(hook) = &maintenance
                    && let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook()))
                {
                    error!(panic = %panic_message(panic.as_ref()), "Maintenance hook panicked");
                }
            }
        }
    }

    // Drain remaining jobs so blocked `sync` callers are released
    let mut dropped = 0usize;
    while let Ok(job) = job_rx.try_recv() {
        if let Job::Run(op) = job {
            drop(op);
            dropped += 1;
        }
    }
    trace!(dropped, "Engine queue drained");
    debug!("Engine queue stopped");
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
