//! Query node arena types.
//!
//! Nodes live in an arena owned by the `ViewRegistry` and address each
//! other by `NodeId`. A node is exclusively owned by the cache entry in its
//! immediate upstream (or by the registry's root table); it references its
//! upstreams by id and holds one observation on each of them, so teardown
//! runs children before parents and the graph has no ownership cycles.

use crate::fault::FaultList;
use crate::ops::dict::{MapFilterState, MapSelectState};
use crate::ops::filter::FilterState;
use crate::ops::group::GroupByState;
use crate::ops::project::{FlatMapState, ProjectState};
use crate::ops::scalar::ScalarState;
use crate::ops::sort::SortState;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivus_collections::{ListChange, MapChange, SourceId, SubscriptionManager};
use rivus_core::{Result, Value};

/// Stable arena index of a query node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Operator discriminant, half of a child-cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum OpKind {
    Filter,
    Project,
    FlatMap,
    Sort,
    GroupBy,
    Concat,
    Distinct,
    Individual,
    Scalar,
    MapFilter,
    MapSelect,
}

/// Child-cache key: operator kind plus a structural fingerprint of the
/// operator's parameters.
pub(crate) type CacheKey = (OpKind, u64);

/// A node's materialized output.
pub(crate) enum Output {
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Scalar(Result<Value>),
}

impl Output {
    pub fn as_list(&self) -> &[Value] {
        match self {
            Output::List(items) => items,
            _ => panic!("node output is not list-shaped"),
        }
    }

    pub fn as_list_mut(&mut self) -> &mut Vec<Value> {
        match self {
            Output::List(items) => items,
            _ => panic!("node output is not list-shaped"),
        }
    }

    pub fn as_map(&self) -> &[(Value, Value)] {
        match self {
            Output::Map(entries) => entries,
            _ => panic!("node output is not map-shaped"),
        }
    }

    pub fn as_map_mut(&mut self) -> &mut Vec<(Value, Value)> {
        match self {
            Output::Map(entries) => entries,
            _ => panic!("node output is not map-shaped"),
        }
    }

    pub fn as_scalar(&self) -> &Result<Value> {
        match self {
            Output::Scalar(value) => value,
            _ => panic!("node output is not scalar-shaped"),
        }
    }
}

/// Operator-specific state of a node.
pub(crate) enum OpState {
    /// Root over a change-notifying list source.
    ListRoot { source: SourceId },
    /// Root over a plain slice; only changes via `refresh_snapshot`.
    SnapshotRoot,
    /// Root over a change-notifying map source.
    MapRoot { source: SourceId },
    Filter(FilterState),
    Project(ProjectState),
    FlatMap(FlatMapState),
    Sort(SortState),
    GroupBy(GroupByState),
    /// Two list upstreams; `left_len` tracks where the second begins.
    Concat { left: NodeId, right: NodeId, left_len: usize },
    /// Upstream is an internally-created group node; output is its keys.
    Distinct,
    /// Mirrors upstream, re-emitting batched changes one element at a time.
    Individual,
    Scalar(ScalarState),
    MapFilter(MapFilterState),
    MapSelect(MapSelectState),
}

/// A change or state transition observed on one node.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    /// The node's list-shaped output changed.
    List(ListChange),
    /// The node's map-shaped output changed.
    Map(MapChange),
    /// The node's scalar value changed.
    Scalar {
        old: Result<Value>,
        new: Result<Value>,
    },
    /// The node's operation fault transitioned between None and Some.
    FaultChanged,
}

/// One live query node.
pub(crate) struct Node {
    pub op: OpState,
    pub output: Output,
    pub faults: FaultList,
    /// Outstanding handles (consumer handles plus one per downstream node
    /// and per internal-child parent).
    pub observers: usize,
    pub upstream: Vec<NodeId>,
    pub downstream: Vec<NodeId>,
    /// Cached children keyed by operator parameters.
    pub cache: HashMap<CacheKey, NodeId>,
    pub subscribers: SubscriptionManager<ViewEvent>,
}

impl Node {
    pub fn new(op: OpState, output: Output, faults: FaultList, upstream: Vec<NodeId>) -> Self {
        Self {
            op,
            output,
            faults,
            observers: 1,
            upstream,
            downstream: Vec::new(),
            cache: HashMap::new(),
            subscribers: SubscriptionManager::new(),
        }
    }
}

/// Access to the arena id behind a typed handle.
pub trait Handle {
    fn node_id(&self) -> NodeId;
}

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// Handles are not `Clone`: sharing a node is expressed by calling
        /// the factory again (which hits the node cache), and releasing is
        /// expressed by consuming the handle, so a double release cannot be
        /// written.
        #[derive(Debug)]
        pub struct $name {
            pub(crate) id: NodeId,
        }

        impl Handle for $name {
            fn node_id(&self) -> NodeId {
                self.id
            }
        }
    };
}

handle_type!(
    /// Handle to a list-shaped query node.
    ListHandle
);
handle_type!(
    /// Handle to a map-shaped query node.
    MapHandle
);
handle_type!(
    /// Handle to a scalar query node.
    ScalarHandle
);
