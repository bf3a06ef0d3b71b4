//! Configuration for engine contexts.

use serde::{Deserialize, Serialize};

/// Settings applied when an [`EngineContext`](crate::EngineContext) is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Name of the queue thread.
    /// Default: "nodekit-engine"
    pub queue_name: String,

    /// Capacity of the job channel (backpressure threshold).
    /// Default: 1024
    pub queue_capacity: usize,

    /// Number of dead handles buffered before they are unprotected in bulk.
    /// Default: 100
    pub dead_ref_threshold: usize,

    /// Run a collection before the engine context is released on close.
    /// Default: true
    pub collect_on_close: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_name: "nodekit-engine".to_string(),
            queue_capacity: 1024,
            dead_ref_threshold: 100,
            collect_on_close: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue thread name.
    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Set the job queue capacity; zero is raised to one.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the dead handle flush threshold; zero is raised to one.
    pub fn dead_ref_threshold(mut self, threshold: usize) -> Self {
        self.dead_ref_threshold = threshold.max(1);
        self
    }

    /// Enable or disable the collection run on close.
    pub fn collect_on_close(mut self, enabled: bool) -> Self {
        self.collect_on_close = enabled;
        self
    }
}
