//! Delivery of asynchronous results back to script callbacks.
//!
//! Completions may finish on any thread. Each finished completion queues a
//! delivery script; the queue is drained under a lock, so deliveries reach
//! the script context in the order the completions finished.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

use crate::context::ScriptContext;
use crate::error::BridgeResult;
use crate::script_value::ScriptValue;

pub struct CompletionQueue {
    context: Arc<dyn ScriptContext>,
    pending_tx: Sender<String>,
    pending_rx: Receiver<String>,
    drain_lock: Mutex<()>,
    inflight: AtomicU64,
    delivered: AtomicU64,
}

impl CompletionQueue {
    pub fn new(context: Arc<dyn ScriptContext>) -> Self {
        let (pending_tx, pending_rx) = unbounded();
        Self {
            context,
            pending_tx,
            pending_rx,
            drain_lock: Mutex::new(()),
            inflight: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// A completion delivering to `target`
    pub fn completion(self: &Arc<Self>, method: impl Into<String>, target: ScriptValue) -> Completion {
        self.inflight.fetch_add(1, Ordering::Relaxed);
        Completion {
            queue: self.clone(),
            method: method.into(),
            target,
            finished: false,
        }
    }

    /// Completions handed out and not yet finished
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn queue_delivery(&self, script: String) {
        // The receiver lives in self, so the send cannot fail
        let _ = self.pending_tx.send(script);
        self.drain();
    }

    /// Schedule every queued delivery. A delivery the context refuses is
    /// logged and skipped; the rest of the batch still goes out.
    fn drain(&self) {
        let _guard = self.drain_lock.lock();
        for script in self.pending_rx.try_iter() {
            if let Err(e) = self.context.evaluate_async(&script) {
                warn!(error = %e, script = %script, "Completion not delivered");
                continue;
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
            trace!(script = %script, "Completion delivered");
        }
    }
}

impl fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("inflight", &self.inflight())
            .field("delivered", &self.delivered())
            .finish()
    }
}

/// Handle finishing one asynchronous call. Finishing consumes it; dropping
/// it unfinished delivers nothing.
pub struct Completion {
    queue: Arc<CompletionQueue>,
    method: String,
    target: ScriptValue,
    finished: bool,
}

impl Completion {
    /// The script object results are delivered to
    pub fn target(&self) -> &ScriptValue {
        &self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call the target with `result`
    pub fn complete(self, result: impl Serialize) -> BridgeResult<()> {
        let result = serde_json::to_value(result)?;
        let script = self.target.call_expression(None, &[result]);
        self.finish(script)
    }

    /// Call `method` on the target with `args`
    pub fn complete_with(self, method: &str, args: &[Value]) -> BridgeResult<()> {
        let script = self.target.call_expression(Some(method), args);
        self.finish(script)
    }

    fn finish(mut self, script: String) -> BridgeResult<()> {
        self.finished = true;
        self.queue.inflight.fetch_sub(1, Ordering::Relaxed);
        self.queue.queue_delivery(script);
        Ok(())
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished {
            self.queue.inflight.fetch_sub(1, Ordering::Relaxed);
            warn!(method = %self.method, "Completion dropped without a result");
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("method", &self.method)
            .field("target", &self.target.namespace())
            .finish()
    }
}
