//! Rivus Collections - change-notifying containers.
//!
//! This crate provides the mutable containers the engine observes and the
//! change-notification vocabulary the whole pipeline speaks:
//!
//! - `ListChange` / `MapChange`: one value per atomic mutation
//! - `ObservableList` / `ObservableMap`: bulk-mutation containers that emit
//!   exactly one change per mutating call
//! - `SubscriptionManager`: id-keyed callbacks, shared by containers and
//!   query nodes
//!
//! The replay helpers (`apply_list_change`, `apply_map_change`) exist so
//! both the engine's tests and the synchronization wrappers can maintain a
//! snapshot purely from the notification stream.
//!
//! # Example
//!
//! ```rust
//! use rivus_collections::{ListChange, ObservableList};
//! use rivus_core::Value;
//!
//! let mut list = ObservableList::from_values(vec![Value::Int64(1)]);
//! list.subscribe(|change| {
//!     assert!(matches!(change, ListChange::Insert { index: 1, .. }));
//! });
//! list.push(Value::Int64(2));
//! ```

#![no_std]

extern crate alloc;

mod change;
mod list;
mod map;
mod subscription;

pub use change::{apply_list_change, apply_map_change, ListChange, MapChange};
pub use list::{ObservableList, SourceId};
pub use map::ObservableMap;
pub use subscription::{SubscriptionId, SubscriptionManager};
