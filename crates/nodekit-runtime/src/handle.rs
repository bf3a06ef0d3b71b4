//! Async front end for an [`EngineContext`].
//!
//! Jobs are posted to the context's queue thread and their results come back
//! through a oneshot channel, so callers on a tokio runtime never block.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> nodekit_runtime::RuntimeResult<()> {
//! let ctx = nodekit_runtime::EngineContext::new()?;
//! let handle = ctx.handle();
//! let value = handle.eval("[1, 2, 3]").await?;
//! assert_eq!(value, serde_json::json!([1, 2, 3]));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::context::EngineContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::marshal::NativeValue;

/// Requests a handle has sent, next to the state of its context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleStats {
    /// Scripts evaluated and functions called through this handle
    pub requests: u64,
    /// Requests that ended in a script exception
    pub script_exceptions: u64,
    /// Operations queued or running on the context's queue thread
    pub queue_depth: u64,
    /// Wrappers currently pinned in the context
    pub live_wrappers: usize,
    /// Dead wrappers whose pins wait for the next flush
    pub pending_unpins: usize,
}

#[derive(Default)]
struct Requests {
    sent: AtomicU64,
    script_exceptions: AtomicU64,
}

/// Thread-safe handle for submitting jobs to one context
#[derive(Clone)]
pub struct ContextHandle {
    ctx: EngineContext,
    requests: Arc<Requests>,
}

impl ContextHandle {
    pub(crate) fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            requests: Arc::new(Requests::default()),
        }
    }

    /// Evaluate a script and return its result as JSON
    pub async fn eval(&self, script: impl Into<String>) -> RuntimeResult<serde_json::Value> {
        let script = script.into();
        self.submit(move |ctx| ctx.evaluate(&script)?.to_json_value())
            .await
    }

    /// Evaluate a script with a source URL for error messages
    pub async fn eval_with_source(
        &self,
        script: impl Into<String>,
        source_url: impl Into<String>,
    ) -> RuntimeResult<serde_json::Value> {
        let script = script.into();
        let source_url = source_url.into();
        self.submit(move |ctx| {
            ctx.evaluate_with_source(&script, Some(&source_url))?
                .to_json_value()
        })
        .await
    }

    /// Call a global function with JSON arguments
    pub async fn call(
        &self,
        function: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> RuntimeResult<serde_json::Value> {
        let function = function.into();
        self.submit(move |ctx| {
            let target = ctx.global_object()?.get(&function)?;
            let Some(target) = target.as_function() else {
                return Err(RuntimeError::type_error("function", target.kind().name()));
            };
            let args = args.into_iter().map(NativeValue::from).collect();
            target.call(None, args)?.to_json_value()
        })
        .await
    }

    async fn submit<F>(&self, job: F) -> RuntimeResult<serde_json::Value>
    where
        F: FnOnce(&EngineContext) -> RuntimeResult<serde_json::Value> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let requests = self.requests.clone();
        self.ctx.post(move |ctx| {
            let result = job(ctx);
            if let Err(e) = &result
                && e.as_script_exception().is_some()
            {
                requests.script_exceptions.fetch_add(1, Ordering::Relaxed);
            }
            let _ = tx.send(result);
        })?;
        self.requests.sent.fetch_add(1, Ordering::Relaxed);

        rx.await
            .map_err(|_| RuntimeError::internal("Engine queue dropped response"))?
    }

    pub fn stats(&self) -> HandleStats {
        HandleStats {
            requests: self.requests.sent.load(Ordering::Relaxed),
            script_exceptions: self.requests.script_exceptions.load(Ordering::Relaxed),
            queue_depth: self.ctx.queue_stats().in_flight(),
            live_wrappers: self.ctx.live_wrappers(),
            pending_unpins: self.ctx.refcount_stats().pending,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }
}
