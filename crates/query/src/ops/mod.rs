//! Per-operator incremental update algorithms.
//!
//! Each module owns one operator's state and the logic that turns an
//! upstream change into this operator's own minimal emissions. The state
//! types are plain data; the registry drives them and routes what they
//! emit.

pub(crate) mod compose;
pub(crate) mod dict;
pub(crate) mod filter;
pub(crate) mod group;
pub(crate) mod project;
pub(crate) mod scalar;
pub(crate) mod sort;
