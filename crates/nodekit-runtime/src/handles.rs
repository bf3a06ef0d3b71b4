//! Identity map from engine handles to live wrappers.
//!
//! Each registration carries a generation. A wrapper only unregisters the
//! entry it created, so the finalizer of a dead wrapper cannot remove a newer
//! wrapper registered for the same handle in the meantime.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use nodekit_engine::ValueRef;

use crate::error::RuntimeResult;
use crate::value::WrapperCore;

struct Registration {
    generation: u64,
    wrapper: Weak<WrapperCore>,
}

#[derive(Default)]
pub struct HandleTable {
    entries: Mutex<HashMap<ValueRef, Registration>>,
    next_generation: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live wrapper for `handle`, if any
    pub(crate) fn lookup(&self, handle: ValueRef) -> Option<Arc<WrapperCore>> {
        self.entries
            .lock()
            .get(&handle)
            .and_then(|registration| registration.wrapper.upgrade())
    }

    /// Return the live wrapper for `handle` or register the one built by
    /// `create`, which receives the registration generation.
    pub(crate) fn resolve(
        &self,
        handle: ValueRef,
        create: impl FnOnce(u64) -> RuntimeResult<Arc<WrapperCore>>,
    ) -> RuntimeResult<Arc<WrapperCore>> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&handle).and_then(|r| r.wrapper.upgrade()) {
            return Ok(existing);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let wrapper = create(generation)?;
        entries.insert(
            handle,
            Registration {
                generation,
                wrapper: Arc::downgrade(&wrapper),
            },
        );
        Ok(wrapper)
    }

    /// Remove the registration for `handle` if it is still `generation`
    pub fn unregister(&self, handle: ValueRef, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&handle) {
            Some(registration) if registration.generation == generation => {
                entries.remove(&handle);
                true
            }
            _ => false,
        }
    }

    /// Number of registrations, live or awaiting their finalizer
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
