//! Deferred release of protected values.
//!
//! Every wrapper pins its handle once. When the wrapper dies, possibly on an
//! arbitrary thread, the handle goes onto the dead list; the list is drained
//! on the queue thread, either when it passes the threshold or at an explicit
//! flush point. Protect counts are per pin, so releasing a dead wrapper's pin
//! never unpins a handle some newer wrapper still holds.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

use nodekit_engine::{ContextId, EngineError, ScriptEngine, ValueRef};

use crate::error::RuntimeResult;

/// A point-in-time view of pin bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefcountStats {
    /// Pins taken since the context was created
    pub pinned: u64,
    /// Pins released by flushes
    pub unpinned: u64,
    /// Dead handles waiting for the next flush
    pub pending: usize,
}

pub struct RefcountGuard {
    engine: Arc<dyn ScriptEngine>,
    context: ContextId,
    threshold: usize,
    dead: Mutex<Vec<ValueRef>>,
    pinned: AtomicU64,
    unpinned: AtomicU64,
}

impl RefcountGuard {
    pub fn new(engine: Arc<dyn ScriptEngine>, context: ContextId, threshold: usize) -> Self {
        Self {
            engine,
            context,
            threshold: threshold.max(1),
            dead: Mutex::new(Vec::new()),
            pinned: AtomicU64::new(0),
            unpinned: AtomicU64::new(0),
        }
    }

    /// Protect `handle` on behalf of a new wrapper. Queue thread only.
    pub fn pin(&self, handle: ValueRef) -> RuntimeResult<()> {
        self.engine.protect(self.context, handle)?;
        self.pinned.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record that a wrapper for `handle` died. Any thread.
    pub fn mark_dead(&self, handle: ValueRef) {
        self.dead.lock().push(handle);
    }

    pub fn pending(&self) -> usize {
        self.dead.lock().len()
    }

    /// Flush when the dead list has grown past the threshold
    pub fn maintain(&self) {
        if self.pending() > self.threshold
            && let Err(e) = self.flush()
        {
            warn!(error = %e, "Dead reference flush failed");
        }
    }

    /// Unprotect every dead handle. Queue thread only.
    pub fn flush(&self) -> RuntimeResult<usize> {
        let dead = std::mem::take(&mut *self.dead.lock());
        if dead.is_empty() {
            return Ok(0);
        }

        let mut released = 0;
        for handle in &dead {
            match self.engine.unprotect(self.context, *handle) {
                Ok(()) => released += 1,
                // Already gone with its context
                Err(EngineError::InvalidHandle(_)) | Err(EngineError::ContextReleased(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.unpinned.fetch_add(released as u64, Ordering::Relaxed);
        trace!(context = %self.context, released, "Dead references flushed");
        Ok(released)
    }

    pub fn stats(&self) -> RefcountStats {
        RefcountStats {
            pinned: self.pinned.load(Ordering::Relaxed),
            unpinned: self.unpinned.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}
