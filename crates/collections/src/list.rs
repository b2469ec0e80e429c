//! Observable list container.
//!
//! A Vec-backed list with bulk operations; every mutating call emits
//! exactly one `ListChange`. Each list carries a process-unique `SourceId`
//! so the registry can deduplicate roots by source identity rather than by
//! contents.

use crate::change::ListChange;
use crate::subscription::{SubscriptionId, SubscriptionManager};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use rivus_core::{Error, Result, Value};

/// Identity of an observed source container.
pub type SourceId = u64;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique source id.
pub(crate) fn next_source_id() -> SourceId {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::SeqCst)
}

/// A change-notifying list of values.
pub struct ObservableList {
    id: SourceId,
    items: Vec<Value>,
    subscriptions: SubscriptionManager<ListChange>,
}

impl Default for ObservableList {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            id: next_source_id(),
            items: Vec::new(),
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// Creates a list with initial contents. No notification is emitted
    /// for the initial items.
    pub fn from_values(items: Vec<Value>) -> Self {
        Self {
            id: next_source_id(),
            items,
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// Returns this list's source identity.
    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Returns the number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`, if any.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Returns the current contents as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Returns a copy of the current contents.
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.clone()
    }

    /// Subscribes to change notifications.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&ListChange) + 'static,
    {
        self.subscriptions.subscribe(callback)
    }

    /// Unsubscribes by id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Appends one item.
    pub fn push(&mut self, item: Value) {
        let index = self.items.len();
        self.items.push(item.clone());
        self.subscriptions
            .notify_all(&ListChange::insert_one(index, item));
    }

    /// Inserts one item at `index`.
    pub fn insert(&mut self, index: usize, item: Value) -> Result<()> {
        self.insert_range(index, alloc::vec![item])
    }

    /// Inserts a run of items starting at `index`.
    pub fn insert_range(&mut self, index: usize, items: Vec<Value>) -> Result<()> {
        if index > self.items.len() {
            return Err(Error::index_out_of_range(index, self.items.len()));
        }
        if items.is_empty() {
            return Ok(());
        }
        self.items.splice(index..index, items.iter().cloned());
        self.subscriptions
            .notify_all(&ListChange::Insert { index, items });
        Ok(())
    }

    /// Removes one item at `index` and returns it.
    pub fn remove(&mut self, index: usize) -> Result<Value> {
        let mut removed = self.remove_range(index, 1)?;
        Ok(removed.pop().expect("removed exactly one item"))
    }

    /// Removes `len` items starting at `index` and returns them.
    pub fn remove_range(&mut self, index: usize, len: usize) -> Result<Vec<Value>> {
        if index + len > self.items.len() {
            return Err(Error::index_out_of_range(index + len, self.items.len()));
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        let items: Vec<Value> = self.items.drain(index..index + len).collect();
        self.subscriptions.notify_all(&ListChange::Remove {
            index,
            items: items.clone(),
        });
        Ok(items)
    }

    /// Replaces the item at `index` and returns the old value.
    pub fn replace(&mut self, index: usize, item: Value) -> Result<Value> {
        let mut old = self.replace_range(index, alloc::vec![item])?;
        Ok(old.pop().expect("replaced exactly one item"))
    }

    /// Replaces a run of items in place starting at `index`; returns the
    /// old values.
    pub fn replace_range(&mut self, index: usize, items: Vec<Value>) -> Result<Vec<Value>> {
        if index + items.len() > self.items.len() {
            return Err(Error::index_out_of_range(
                index + items.len(),
                self.items.len(),
            ));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let old: Vec<Value> = self.items[index..index + items.len()].to_vec();
        self.items[index..index + items.len()].clone_from_slice(&items);
        self.subscriptions.notify_all(&ListChange::Replace {
            index,
            old: old.clone(),
            new: items,
        });
        Ok(old)
    }

    /// Moves `len` items from `from` to `to` (destination measured after
    /// removal).
    pub fn move_range(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        if from + len > self.items.len() {
            return Err(Error::index_out_of_range(from + len, self.items.len()));
        }
        if to > self.items.len() - len {
            return Err(Error::index_out_of_range(to, self.items.len() - len));
        }
        if len == 0 || from == to {
            return Ok(());
        }
        let items: Vec<Value> = self.items.drain(from..from + len).collect();
        self.items.splice(to..to, items);
        self.subscriptions
            .notify_all(&ListChange::Move { from, to, len });
        Ok(())
    }

    /// Replaces the entire contents, emitting a single Reset.
    pub fn reset(&mut self, items: Vec<Value>) {
        self.items = items;
        self.subscriptions.notify_all(&ListChange::Reset);
    }
}
