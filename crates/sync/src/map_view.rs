//! Shared mirror of a map-shaped view.

use std::sync::Arc;

use parking_lot::RwLock;
use rivus_collections::{apply_map_change, MapChange};
use rivus_core::Value;

use crate::queue::EventualQueue;

enum MapOp {
    Change(MapChange),
    Rebuild(Vec<(Value, Value)>),
}

fn apply_op(entries: &RwLock<Vec<(Value, Value)>>, op: MapOp) {
    match op {
        MapOp::Change(change) => apply_map_change(&mut entries.write(), &change, &[]),
        MapOp::Rebuild(contents) => *entries.write() = contents,
    }
}

fn op_for(change: &MapChange, current: &[(Value, Value)]) -> MapOp {
    match change {
        MapChange::Reset => MapOp::Rebuild(current.to_vec()),
        other => MapOp::Change(other.clone()),
    }
}

/// Entry-ordered mirror of a dictionary view behind a reader-writer lock,
/// for multi-thread reads. Eager by default; `eventual` moves application
/// onto a worker thread.
pub struct ConcurrentMap {
    entries: Arc<RwLock<Vec<(Value, Value)>>>,
    queue: Option<EventualQueue<MapOp>>,
}

impl ConcurrentMap {
    pub fn new(initial: &[(Value, Value)]) -> Self {
        Self {
            entries: Arc::new(RwLock::new(initial.to_vec())),
            queue: None,
        }
    }

    pub fn eventual(initial: &[(Value, Value)]) -> Self {
        let entries = Arc::new(RwLock::new(initial.to_vec()));
        let target = entries.clone();
        let queue = EventualQueue::start(move |op| apply_op(&target, op));
        Self {
            entries,
            queue: Some(queue),
        }
    }

    pub fn apply(&self, change: &MapChange, current: &[(Value, Value)]) {
        let op = op_for(change, current);
        match (&self.queue, op) {
            (Some(queue), op @ MapOp::Rebuild(_)) => queue.push_superseding(op),
            (Some(queue), op) => queue.push(op),
            (None, op) => apply_op(&self.entries, op),
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.read().iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.entries.read().clone()
    }

    /// The shared backing store, for readers that outlive the wrapper.
    pub fn shared(&self) -> Arc<RwLock<Vec<(Value, Value)>>> {
        self.entries.clone()
    }
}
