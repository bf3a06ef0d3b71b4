//! Engine groups.
//!
//! Contexts created in one group share an engine and may exchange values.
//! Handing a value to a context of another group is a hard error.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nodekit_engine::{QuickJsEngine, ScriptEngine};

use crate::error::RuntimeResult;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// A shared engine instance
#[derive(Clone)]
pub struct EngineGroup {
    id: u64,
    engine: Arc<dyn ScriptEngine>,
}

impl EngineGroup {
    /// Create a group backed by a fresh [`QuickJsEngine`]
    pub fn new() -> RuntimeResult<Self> {
        let engine: Arc<dyn ScriptEngine> = QuickJsEngine::new()?;
        Ok(Self::with_engine(engine))
    }

    /// Create a group around an existing engine
    pub fn with_engine(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            engine,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &Arc<dyn ScriptEngine> {
        &self.engine
    }
}

impl PartialEq for EngineGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EngineGroup {}

impl fmt::Debug for EngineGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineGroup").field("id", &self.id).finish()
    }
}
