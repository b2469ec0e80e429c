//! Rivus Sync - reading views from other threads.
//!
//! The engine and its registry are single-threaded. These wrappers
//! maintain thread-safe snapshots of a view by replaying its change
//! stream: the caller subscribes to the view, forwards each list or map
//! change to the wrapper's `apply`, and readers on other threads see a
//! consistent copy.
//!
//! Eager wrappers (`LockedView`, `CallbackView`, `DispatcherView`,
//! `ConcurrentMap::new`) have applied the change when `apply` returns.
//! Eventually-consistent wrappers (`EventualLockedView`,
//! `EventualCallbackView`, `EventualDispatcherView`,
//! `ConcurrentMap::eventual`) queue it to a worker thread; a Reset
//! supersedes queued work via a generation counter, so a burst of stale
//! changes is dropped rather than replayed.

mod map_view;
mod queue;
mod view;

pub use map_view::ConcurrentMap;
pub use view::{
    ApplyFn, CallbackView, Dispatch, DispatcherView, EventualCallbackView,
    EventualDispatcherView, EventualLockedView, LockedView,
};
