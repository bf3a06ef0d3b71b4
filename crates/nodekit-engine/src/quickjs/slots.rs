//! Generational slot arena mapping handles to engine values.

use rustc_hash::FxHashMap;

use crate::engine::CallFrame;
use crate::types::{ContextId, ValueRef};

pub(crate) struct Entry<V> {
    pub context: ContextId,
    pub value: V,
    pub protect_count: u32,
    /// Held for the lifetime of the context (the global object)
    pub pinned: bool,
}

impl<V> Entry<V> {
    fn is_held(&self) -> bool {
        self.pinned || self.protect_count > 0
    }
}

struct Slot<V> {
    generation: u32,
    entry: Option<Entry<V>>,
}

pub(crate) struct SlotArena<V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    live: usize,
    call_roots: FxHashMap<ValueRef, u32>,
}

impl<V> Default for SlotArena<V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            call_roots: FxHashMap::default(),
        }
    }
}

impl<V> SlotArena<V> {
    pub fn insert(&mut self, context: ContextId, value: V) -> ValueRef {
        let entry = Entry {
            context,
            value,
            protect_count: 0,
            pinned: false,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return ValueRef::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        ValueRef::new(index, 0)
    }

    pub fn get(&self, value: ValueRef) -> Option<&Entry<V>> {
        let slot = self.slots.get(value.index() as usize)?;
        if slot.generation != value.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, value: ValueRef) -> Option<&mut Entry<V>> {
        let slot = self.slots.get_mut(value.index() as usize)?;
        if slot.generation != value.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Free a slot; its generation moves on so outstanding handles go stale
    pub fn remove(&mut self, value: ValueRef) -> Option<Entry<V>> {
        let slot = self.slots.get_mut(value.index() as usize)?;
        if slot.generation != value.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(value.index());
        self.live -= 1;
        Some(entry)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn protected(&self) -> usize {
        self.iter().filter(|(_, entry)| entry.protect_count > 0).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueRef, &Entry<V>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|entry| (ValueRef::new(index as u32, slot.generation), entry))
        })
    }

    pub fn root(&mut self, frame: &CallFrame) {
        for handle in frame_handles(frame) {
            *self.call_roots.entry(handle).or_insert(0) += 1;
        }
    }

    pub fn unroot(&mut self, frame: &CallFrame) {
        for handle in frame_handles(frame) {
            if let Some(count) = self.call_roots.get_mut(&handle) {
                *count -= 1;
                if *count == 0 {
                    self.call_roots.remove(&handle);
                }
            }
        }
    }

    /// Take out every entry of `ctx` that is neither held nor part of a
    /// native call in progress
    pub fn sweep(&mut self, ctx: ContextId) -> Vec<Entry<V>> {
        let doomed: Vec<ValueRef> = self
            .iter()
            .filter(|(handle, entry)| {
                entry.context == ctx && !entry.is_held() && !self.call_roots.contains_key(handle)
            })
            .map(|(handle, _)| handle)
            .collect();
        doomed
            .into_iter()
            .filter_map(|handle| self.remove(handle))
            .collect()
    }

    /// Take out every entry of `ctx`, held or not
    pub fn drain_context(&mut self, ctx: ContextId) -> Vec<Entry<V>> {
        let owned: Vec<ValueRef> = self
            .iter()
            .filter(|(_, entry)| entry.context == ctx)
            .map(|(handle, _)| handle)
            .collect();
        owned
            .into_iter()
            .filter_map(|handle| self.remove(handle))
            .collect()
    }
}

fn frame_handles(frame: &CallFrame) -> impl Iterator<Item = ValueRef> + '_ {
    [frame.function, frame.this]
        .into_iter()
        .chain(frame.arguments.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: ContextId = ContextId::new(1);
    const OTHER: ContextId = ContextId::new(2);

    #[test]
    fn test_insert_and_get() {
        let mut arena = SlotArena::default();
        let a = arena.insert(CTX, "one");
        let b = arena.insert(CTX, "two");
        assert_ne!(a, b);
        assert_eq!(arena.live(), 2);
        assert_eq!(arena.get(a).map(|e| e.value), Some("one"));
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut arena = SlotArena::default();
        let old = arena.insert(CTX, 1);
        assert!(arena.remove(old).is_some());
        let new = arena.insert(CTX, 2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(arena.get(old).is_none());
        assert!(arena.get(new).is_some());
        assert!(arena.remove(old).is_none());
    }

    #[test]
    fn test_sweep_keeps_held_and_rooted_entries() {
        let mut arena = SlotArena::default();
        let loose = arena.insert(CTX, 0);
        let protected = arena.insert(CTX, 1);
        let pinned = arena.insert(CTX, 2);
        let rooted = arena.insert(CTX, 3);
        let foreign = arena.insert(OTHER, 4);
        arena.get_mut(protected).unwrap().protect_count = 1;
        arena.get_mut(pinned).unwrap().pinned = true;

        let frame = CallFrame {
            context: CTX,
            function: rooted,
            this: rooted,
            arguments: vec![],
            is_construct: false,
        };
        arena.root(&frame);
        let swept: Vec<i32> = arena.sweep(CTX).into_iter().map(|e| e.value).collect();
        assert_eq!(swept, vec![0]);
        assert!(arena.get(loose).is_none());
        assert!(arena.get(foreign).is_some());
        assert_eq!(arena.protected(), 1);

        arena.unroot(&frame);
        assert_eq!(arena.sweep(CTX).len(), 1);
        assert_eq!(arena.drain_context(CTX).len(), 2);
        assert_eq!(arena.live(), 1);
    }
}
