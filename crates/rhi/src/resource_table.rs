//! Generational handle table for GPU resources.

use slotmap::{Key, SlotMap};

use crate::error::{RhiError, RhiResult};

/// Owns resources of one kind and hands out generational handles.
///
/// Removing a resource bumps its slot's generation, so any copy of the old
/// handle fails with [`RhiError::StaleHandle`] instead of reaching whatever
/// reuses the slot.
pub struct ResourceTable<K: Key, V> {
    slots: SlotMap<K, V>,
    kind: &'static str,
}

impl<K: Key, V> ResourceTable<K, V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            slots: SlotMap::with_key(),
            kind,
        }
    }

    pub fn insert(&mut self, value: V) -> K {
        self.slots.insert(value)
    }

    pub fn get(&self, key: K) -> RhiResult<&V> {
        self.slots.get(key).ok_or(RhiError::StaleHandle { kind: self.kind })
    }

    /// Take the resource out; the handle is dead afterwards.
    pub fn remove(&mut self, key: K) -> RhiResult<V> {
        self.slots.remove(key).ok_or(RhiError::StaleHandle { kind: self.kind })
    }

    pub fn contains(&self, key: K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.slots.drain()
    }
}
