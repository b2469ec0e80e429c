//! Observable dictionary container.
//!
//! Entries keep insertion order; a hash index maps keys to their slot so
//! lookups and replaces stay O(1). Every mutating call emits exactly one
//! `MapChange`.

use crate::change::MapChange;
use crate::list::{next_source_id, SourceId};
use crate::subscription::{SubscriptionId, SubscriptionManager};
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivus_core::{Error, Result, Value};

/// A change-notifying dictionary with insertion-ordered iteration.
pub struct ObservableMap {
    id: SourceId,
    entries: Vec<(Value, Value)>,
    index: HashMap<Value, usize>,
    subscriptions: SubscriptionManager<MapChange>,
}

impl Default for ObservableMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            id: next_source_id(),
            entries: Vec::new(),
            index: HashMap::new(),
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// Creates a map with initial entries. No notification is emitted for
    /// the initial entries. Fails on a null or duplicate key.
    pub fn from_entries(entries: Vec<(Value, Value)>) -> Result<Self> {
        let mut map = Self::new();
        for (key, value) in &entries {
            if key.is_null() {
                return Err(Error::NullKey);
            }
            if map.index.insert(key.clone(), map.entries.len()).is_some() {
                return Err(Error::duplicate_key(key.clone()));
            }
            map.entries.push((key.clone(), value.clone()));
        }
        Ok(map)
    }

    /// Returns this map's source identity.
    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &Value) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the entries in insertion order.
    #[inline]
    pub fn as_slice(&self) -> &[(Value, Value)] {
        &self.entries
    }

    /// Returns a copy of the entries in insertion order.
    pub fn to_vec(&self) -> Vec<(Value, Value)> {
        self.entries.clone()
    }

    /// Subscribes to change notifications.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&MapChange) + 'static,
    {
        self.subscriptions.subscribe(callback)
    }

    /// Unsubscribes by id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Inserts or updates an entry. Returns the previous value if the key
    /// was already present. Null keys are rejected.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<Option<Value>> {
        if key.is_null() {
            return Err(Error::NullKey);
        }
        match self.index.get(&key) {
            Some(&slot) => {
                let old = core::mem::replace(&mut self.entries[slot].1, value.clone());
                if old == value {
                    return Ok(Some(old));
                }
                self.subscriptions.notify_all(&MapChange::Replace {
                    key,
                    old: old.clone(),
                    new: value,
                });
                Ok(Some(old))
            }
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key.clone(), value.clone()));
                self.subscriptions
                    .notify_all(&MapChange::insert_one(key, value));
                Ok(None)
            }
        }
    }

    /// Removes an entry. Returns the removed value, or None if the key was
    /// absent.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let slot = self.index.remove(key)?;
        let (key, value) = self.entries.remove(slot);
        for idx in self.index.values_mut() {
            if *idx > slot {
                *idx -= 1;
            }
        }
        self.subscriptions
            .notify_all(&MapChange::remove_one(key, value.clone()));
        Some(value)
    }

    /// Replaces the entire contents, emitting a single Reset. Fails on a
    /// null or duplicate key, leaving the map untouched.
    pub fn reset(&mut self, entries: Vec<(Value, Value)>) -> Result<()> {
        let mut index = HashMap::with_capacity(entries.len());
        for (slot, (key, _)) in entries.iter().enumerate() {
            if key.is_null() {
                return Err(Error::NullKey);
            }
            if index.insert(key.clone(), slot).is_some() {
                return Err(Error::duplicate_key(key.clone()));
            }
        }
        self.entries = entries;
        self.index = index;
        self.subscriptions.notify_all(&MapChange::Reset);
        Ok(())
    }
}
