//! Synchronization wrappers over list-shaped views.
//!
//! The engine itself is single-threaded; these wrappers let other threads
//! read a view. Each wrapper maintains its own snapshot by replaying the
//! change stream the caller forwards to `apply`, the same bridge
//! discipline the registry uses for sources. `current` is the view's
//! output after the change and is only consulted on Reset.
//!
//! The eager wrappers have applied the change by the time `apply` returns.
//! The `Eventual*` wrappers hand the change to a worker thread and return
//! immediately; readers see the most recently drained state.

use std::sync::Arc;

use parking_lot::RwLock;
use rivus_collections::{apply_list_change, ListChange};
use rivus_core::Value;

use crate::queue::EventualQueue;

/// An operation queued toward a snapshot.
pub(crate) enum ListOp {
    Change(ListChange),
    Rebuild(Vec<Value>),
}

pub(crate) fn apply_op(items: &RwLock<Vec<Value>>, op: ListOp) {
    match op {
        ListOp::Change(change) => apply_list_change(&mut items.write(), &change, &[]),
        ListOp::Rebuild(contents) => *items.write() = contents,
    }
}

fn op_for(change: &ListChange, current: &[Value]) -> ListOp {
    match change {
        ListChange::Reset => ListOp::Rebuild(current.to_vec()),
        other => ListOp::Change(other.clone()),
    }
}

/// Snapshot under a reader-writer lock; applications take the write lock
/// before returning. Deadlocks if the applying thread already holds a
/// conflicting lock.
pub struct LockedView {
    items: Arc<RwLock<Vec<Value>>>,
}

impl LockedView {
    pub fn new(initial: &[Value]) -> Self {
        Self {
            items: Arc::new(RwLock::new(initial.to_vec())),
        }
    }

    pub fn apply(&self, change: &ListChange, current: &[Value]) {
        apply_op(&self.items, op_for(change, current));
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.items.read())
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// The shared backing store, for readers that outlive the wrapper.
    pub fn shared(&self) -> Arc<RwLock<Vec<Value>>> {
        self.items.clone()
    }
}

/// User-supplied execution context: runs every snapshot application, so
/// the caller can wrap it in whatever synchronization its readers use.
pub type ApplyFn = Arc<dyn Fn(&mut dyn FnMut()) + Send + Sync>;

/// Snapshot whose every application runs inside a caller-supplied
/// callback.
pub struct CallbackView {
    items: Arc<RwLock<Vec<Value>>>,
    run: ApplyFn,
}

impl CallbackView {
    pub fn new(initial: &[Value], run: ApplyFn) -> Self {
        Self {
            items: Arc::new(RwLock::new(initial.to_vec())),
            run,
        }
    }

    pub fn apply(&self, change: &ListChange, current: &[Value]) {
        let items = self.items.clone();
        let mut op = Some(op_for(change, current));
        (self.run)(&mut move || {
            if let Some(op) = op.take() {
                apply_op(&items, op);
            }
        });
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

/// A thread-affine executor the caller owns (UI loop, actor mailbox).
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, op: Box<dyn FnOnce() + Send>);
}

/// Snapshot applied on a dispatcher's thread. `apply` blocks until the
/// dispatcher has run the application.
pub struct DispatcherView {
    items: Arc<RwLock<Vec<Value>>>,
    dispatcher: Arc<dyn Dispatch>,
}

impl DispatcherView {
    pub fn new(initial: &[Value], dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            items: Arc::new(RwLock::new(initial.to_vec())),
            dispatcher,
        }
    }

    pub fn apply(&self, change: &ListChange, current: &[Value]) {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let items = self.items.clone();
        let op = op_for(change, current);
        self.dispatcher.dispatch(Box::new(move || {
            apply_op(&items, op);
            let _ = done_tx.send(());
        }));
        done_rx.recv().expect("dispatcher dropped the operation");
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

/// `LockedView` with a worker thread between the engine and the lock.
/// `apply` never blocks on readers; a Reset supersedes queued work.
pub struct EventualLockedView {
    items: Arc<RwLock<Vec<Value>>>,
    queue: EventualQueue<ListOp>,
}

impl EventualLockedView {
    pub fn new(initial: &[Value]) -> Self {
        let items = Arc::new(RwLock::new(initial.to_vec()));
        let target = items.clone();
        let queue = EventualQueue::start(move |op| apply_op(&target, op));
        Self { items, queue }
    }

    pub fn apply(&self, change: &ListChange, current: &[Value]) {
        match op_for(change, current) {
            op @ ListOp::Rebuild(_) => self.queue.push_superseding(op),
            op => self.queue.push(op),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

/// `CallbackView` drained by a worker thread.
pub struct EventualCallbackView {
    items: Arc<RwLock<Vec<Value>>>,
    queue: EventualQueue<ListOp>,
}

impl EventualCallbackView {
    pub fn new(initial: &[Value], run: ApplyFn) -> Self {
        let items = Arc::new(RwLock::new(initial.to_vec()));
        let target = items.clone();
        let queue = EventualQueue::start(move |op| {
            let mut op = Some(op);
            run(&mut || {
                if let Some(op) = op.take() {
                    apply_op(&target, op);
                }
            });
        });
        Self { items, queue }
    }

    pub fn apply(&self, change: &ListChange, current: &[Value]) {
        match op_for(change, current) {
            op @ ListOp::Rebuild(_) => self.queue.push_superseding(op),
            op => self.queue.push(op),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

/// `DispatcherView` drained by a worker thread. The worker waits for the
/// dispatcher per operation, so applications stay ordered without
/// blocking the engine.
pub struct EventualDispatcherView {
    items: Arc<RwLock<Vec<Value>>>,
    queue: EventualQueue<ListOp>,
}

impl EventualDispatcherView {
    pub fn new(initial: &[Value], dispatcher: Arc<dyn Dispatch>) -> Self {
        let items = Arc::new(RwLock::new(initial.to_vec()));
        let target = items.clone();
        let queue = EventualQueue::start(move |op| {
            let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
            let items = target.clone();
            dispatcher.dispatch(Box::new(move || {
                apply_op(&items, op);
                let _ = done_tx.send(());
            }));
            let _ = done_rx.recv();
        });
        Self { items, queue }
    }

    pub fn apply(&self, change: &ListChange, current: &[Value]) {
        match op_for(change, current) {
            op @ ListOp::Rebuild(_) => self.queue.push_superseding(op),
            op => self.queue.push(op),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}
