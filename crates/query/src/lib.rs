//! Rivus Query - incremental view maintenance.
//!
//! A `ViewRegistry` keeps derived views (filters, projections, sorts,
//! groupings, aggregates, dictionary reshapes) continuously correct over
//! mutable sources, recomputing only what each source change touches.
//! Views are nodes in a shared graph: asking for the same operator with
//! structurally equal parameters returns the same node, and a node lives
//! exactly as long as something observes it.
//!
//! Elements an operator cannot evaluate fault individually. Faults never
//! poison a view; they are tracked per element, surface through
//! [`ViewRegistry::operation_fault`], and clear when the offending element
//! changes or leaves.
//!
//! # Example
//!
//! ```rust
//! use rivus_collections::ObservableList;
//! use rivus_core::Value;
//! use rivus_expr::Expr;
//! use rivus_query::ViewRegistry;
//!
//! let mut list = ObservableList::from_values(vec![
//!     Value::Int64(3),
//!     Value::Int64(1),
//!     Value::Int64(2),
//! ]);
//! let mut registry = ViewRegistry::new();
//! let source = registry.observe_list(&list);
//! let big = registry.filter(&source, Expr::gt(Expr::item(), Expr::literal(1i64)));
//! assert_eq!(
//!     registry.list_output(&big),
//!     &[Value::Int64(3), Value::Int64(2)]
//! );
//!
//! list.push(Value::Int64(5));
//! registry.list_changed(&list, &rivus_collections::ListChange::insert_one(3, Value::Int64(5)));
//! assert_eq!(registry.list_output(&big).len(), 3);
//! ```

#![no_std]

extern crate alloc;

mod fault;
mod node;
mod ops;
mod registry;

pub use fault::{FaultKey, FaultList};
pub use node::{Handle, ListHandle, MapHandle, NodeId, ScalarHandle, ViewEvent};
pub use registry::{RegistryConfig, ViewRegistry};
