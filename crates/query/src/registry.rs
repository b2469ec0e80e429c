//! The view registry: node arena, operator factories, change propagation
//! and lifecycle.
//!
//! Every derived view is a node in an arena owned by the registry. Factory
//! methods first consult the upstream node's child cache, so asking for the
//! same operator with structurally equal parameters returns the same node.
//! Handles are observation counts made visible: a node stays alive while
//! any handle or downstream node observes it, and releasing the last
//! observation tears the node down before its upstreams.
//!
//! Source mutations enter through `list_changed` / `map_changed` and flow
//! breadth-first through the graph. Each node translates the incoming
//! change into changes over its own output, applies them, notifies its
//! subscribers and forwards them downstream. Scalar transitions and fault
//! transitions notify subscribers but do not propagate further.

use crate::fault::FaultList;
use crate::node::{
    CacheKey, Handle, ListHandle, MapHandle, Node, NodeId, OpKind, OpState, Output, ScalarHandle,
    ViewEvent,
};
use crate::ops::compose;
use crate::ops::dict::{MapFilterState, MapSelectState};
use crate::ops::filter::FilterState;
use crate::ops::group::GroupByState;
use crate::ops::project::{FlatMapState, ProjectState};
use crate::ops::scalar::{ExtremeState, PositionalKind, ScalarState, SumState};
use crate::ops::sort::SortState;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivus_collections::{
    apply_list_change, apply_map_change, ListChange, MapChange, ObservableList, ObservableMap,
    SourceId, SubscriptionId,
};
use rivus_core::{DataType, Error, Result, Value};
use rivus_expr::{fingerprint, fingerprint_value, normalize, Expr, SortOrder};

/// Registry tuning knobs.
pub struct RegistryConfig {
    /// Normalize expressions before fingerprinting them, so equivalent
    /// spellings of a predicate share one node.
    pub normalize_exprs: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            normalize_exprs: true,
        }
    }
}

/// A change flowing between nodes during propagation.
#[derive(Clone)]
enum Propagated {
    List(ListChange),
    Map(MapChange),
}

// Scalar cache-key tags, combined with parameter fingerprints.
const TAG_COUNT: u64 = 1;
const TAG_SUM: u64 = 2;
const TAG_AVERAGE: u64 = 3;
const TAG_MIN: u64 = 4;
const TAG_MAX: u64 = 5;
const TAG_ANY: u64 = 6;
const TAG_ALL: u64 = 7;
const TAG_AGGREGATE: u64 = 8;
const TAG_TRANSFORM: u64 = 9;
const TAG_ELEMENT_AT: u64 = 10;
const TAG_FIRST: u64 = 11;
const TAG_LAST: u64 = 12;
const TAG_SINGLE: u64 = 13;
const TAG_MAP_COUNT: u64 = 14;
const TAG_VALUE_FOR: u64 = 15;

fn combine(a: u64, b: u64) -> u64 {
    (a ^ b.rotate_left(32)).wrapping_mul(0x100000001b3)
}

fn order_bit(order: SortOrder) -> u64 {
    match order {
        SortOrder::Asc => 0,
        SortOrder::Desc => 1,
    }
}

/// Owner of the query graph.
pub struct ViewRegistry {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    roots: HashMap<SourceId, NodeId>,
    config: RegistryConfig,
    /// Running count of expression evaluations, for incrementality checks.
    eval_count: u64,
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            roots: HashMap::new(),
            config,
            eval_count: 0,
        }
    }

    /// Total expression evaluations performed since creation.
    pub fn eval_count(&self) -> u64 {
        self.eval_count
    }

    /// Number of live nodes, internal children included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    // ---- arena ----

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn node_ref(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("node was released")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("node was released")
    }

    fn take(&mut self, id: NodeId) -> Node {
        self.nodes[id.0].take().expect("node was released")
    }

    fn put(&mut self, id: NodeId, node: Node) {
        debug_assert!(self.nodes[id.0].is_none());
        self.nodes[id.0] = Some(node);
    }

    fn list_out(&self, id: NodeId) -> &[Value] {
        self.node_ref(id).output.as_list()
    }

    fn map_out(&self, id: NodeId) -> &[(Value, Value)] {
        self.node_ref(id).output.as_map()
    }

    fn acquire(&mut self, id: NodeId) {
        self.node_mut(id).observers += 1;
    }

    /// Cache lookup that takes an observation on a hit.
    fn cached(&mut self, owner: NodeId, key: CacheKey) -> Option<NodeId> {
        let id = *self.node_ref(owner).cache.get(&key)?;
        self.acquire(id);
        Some(id)
    }

    /// Allocates a node, wires downstream edges and registers it in the
    /// owner's child cache. The caller has already taken an observation on
    /// each upstream.
    fn install(&mut self, node: Node, owner: NodeId, key: CacheKey) -> NodeId {
        let upstreams = node.upstream.clone();
        let id = self.alloc(node);
        for up in upstreams {
            let upstream = self.node_mut(up);
            if !upstream.downstream.contains(&id) {
                upstream.downstream.push(id);
            }
        }
        self.node_mut(owner).cache.insert(key, id);
        id
    }

    fn normalized(&self, expr: Expr) -> Expr {
        if self.config.normalize_exprs {
            normalize(expr)
        } else {
            expr
        }
    }

    // ---- roots ----

    /// Observes a change-notifying list. Observing the same source again
    /// returns a handle to the same root node.
    pub fn observe_list(&mut self, source: &ObservableList) -> ListHandle {
        if let Some(&id) = self.roots.get(&source.id()) {
            self.acquire(id);
            return ListHandle { id };
        }
        let node = Node::new(
            OpState::ListRoot {
                source: source.id(),
            },
            Output::List(source.to_vec()),
            FaultList::new(),
            Vec::new(),
        );
        let id = self.alloc(node);
        self.roots.insert(source.id(), id);
        ListHandle { id }
    }

    /// Observes a plain snapshot. The root only changes through
    /// `refresh_snapshot`, which resets the whole subgraph.
    pub fn observe_list_snapshot(&mut self, items: &[Value]) -> ListHandle {
        let node = Node::new(
            OpState::SnapshotRoot,
            Output::List(items.to_vec()),
            FaultList::new(),
            Vec::new(),
        );
        ListHandle {
            id: self.alloc(node),
        }
    }

    /// Observes a change-notifying map.
    pub fn observe_map(&mut self, source: &ObservableMap) -> MapHandle {
        if let Some(&id) = self.roots.get(&source.id()) {
            self.acquire(id);
            return MapHandle { id };
        }
        let node = Node::new(
            OpState::MapRoot {
                source: source.id(),
            },
            Output::Map(source.to_vec()),
            FaultList::new(),
            Vec::new(),
        );
        let id = self.alloc(node);
        self.roots.insert(source.id(), id);
        MapHandle { id }
    }

    /// Replaces a snapshot root's contents, resetting everything derived
    /// from it.
    pub fn refresh_snapshot(&mut self, handle: &ListHandle, items: &[Value]) -> Result<()> {
        {
            let node = self.node_mut(handle.id);
            if !matches!(node.op, OpState::SnapshotRoot) {
                return Err(Error::invalid_argument("handle is not a snapshot root"));
            }
            *node.output.as_list_mut() = items.to_vec();
            node.subscribers.notify_all(&ViewEvent::List(ListChange::Reset));
        }
        self.propagate(handle.id, Propagated::List(ListChange::Reset));
        Ok(())
    }

    /// Bridges one source mutation into the graph. Called with the change
    /// the source emitted, after the source has applied it. Unobserved
    /// sources are ignored.
    pub fn list_changed(&mut self, source: &ObservableList, change: &ListChange) {
        let Some(&root) = self.roots.get(&source.id()) else {
            return;
        };
        {
            let node = self.node_mut(root);
            apply_list_change(node.output.as_list_mut(), change, source.as_slice());
            node.subscribers.notify_all(&ViewEvent::List(change.clone()));
        }
        self.propagate(root, Propagated::List(change.clone()));
    }

    /// Map counterpart of `list_changed`.
    pub fn map_changed(&mut self, source: &ObservableMap, change: &MapChange) {
        let Some(&root) = self.roots.get(&source.id()) else {
            return;
        };
        {
            let node = self.node_mut(root);
            apply_map_change(node.output.as_map_mut(), change, source.as_slice());
            node.subscribers.notify_all(&ViewEvent::Map(change.clone()));
        }
        self.propagate(root, Propagated::Map(change.clone()));
    }

    // ---- propagation ----

    fn propagate(&mut self, origin: NodeId, change: Propagated) {
        let mut queue: VecDeque<(NodeId, NodeId, Propagated)> = VecDeque::new();
        for target in self.node_ref(origin).downstream.clone() {
            queue.push_back((target, origin, change.clone()));
        }
        while let Some((target, from, change)) = queue.pop_front() {
            let emitted = self.step(target, from, &change);
            if emitted.is_empty() {
                continue;
            }
            let downstream = self.node_ref(target).downstream.clone();
            for change in emitted {
                for next in &downstream {
                    queue.push_back((*next, target, change.clone()));
                }
            }
        }
    }

    /// Runs one node against one upstream change. The node is taken out of
    /// the arena while it runs so upstream outputs stay readable.
    fn step(&mut self, target: NodeId, from: NodeId, change: &Propagated) -> Vec<Propagated> {
        let mut node = self.take(target);
        let was_clean = node.faults.is_empty();
        let mut evals = 0u64;
        let mut events: Vec<ViewEvent> = Vec::new();

        match (&mut node.op, change) {
            (OpState::Filter(state), Propagated::List(c)) => {
                let emitted = state.apply(
                    node.output.as_list_mut(),
                    &mut node.faults,
                    c,
                    self.list_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::Project(state), Propagated::List(c)) => {
                let emitted = state.apply(
                    node.output.as_list_mut(),
                    &mut node.faults,
                    c,
                    self.list_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::FlatMap(state), Propagated::List(c)) => {
                let emitted = state.apply(
                    node.output.as_list_mut(),
                    &mut node.faults,
                    c,
                    self.list_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::Sort(state), Propagated::List(c)) => {
                let emitted = state.apply(
                    node.output.as_list_mut(),
                    &mut node.faults,
                    c,
                    self.list_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::GroupBy(state), Propagated::List(c)) => {
                let emitted = state.apply(
                    node.output.as_map_mut(),
                    &mut node.faults,
                    c,
                    self.list_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::Map));
            }
            (
                OpState::Concat {
                    left,
                    right,
                    left_len,
                },
                Propagated::List(c),
            ) => {
                let (left, right) = (*left, *right);
                let emitted = compose::concat_apply(
                    c,
                    from == left,
                    from == right,
                    left_len,
                    self.list_out(left),
                    self.list_out(right),
                    node.output.as_list_mut(),
                );
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::Distinct, Propagated::Map(c)) => {
                let emitted =
                    compose::distinct_apply(c, node.output.as_list_mut(), self.map_out(from));
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::Individual, Propagated::List(c)) => {
                let emitted =
                    compose::individual_apply(c, node.output.as_list_mut(), self.list_out(from));
                events.extend(emitted.into_iter().map(ViewEvent::List));
            }
            (OpState::MapFilter(state), Propagated::Map(c)) => {
                let emitted = state.apply(
                    node.output.as_map_mut(),
                    &mut node.faults,
                    c,
                    self.map_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::Map));
            }
            (OpState::MapSelect(state), Propagated::Map(c)) => {
                let emitted = state.apply(
                    node.output.as_map_mut(),
                    &mut node.faults,
                    c,
                    self.map_out(from),
                    &mut evals,
                );
                events.extend(emitted.into_iter().map(ViewEvent::Map));
            }
            (OpState::Scalar(state), change) => {
                let old = node.output.as_scalar().clone();
                let new = match state {
                    // Length comparison over outputs the registry owns.
                    ScalarState::AnyAll {
                        source,
                        filtered,
                        all,
                    } => {
                        let passing = self.list_out(*filtered).len();
                        let total = self.list_out(*source).len();
                        Ok(Value::Boolean(if *all {
                            passing == total
                        } else {
                            passing > 0
                        }))
                    }
                    state => match change {
                        Propagated::List(c) => {
                            state.apply_list(&mut node.faults, c, self.list_out(from), &mut evals)
                        }
                        Propagated::Map(c) => state.apply_map(c, self.map_out(from), &old),
                    },
                };
                if new != old {
                    node.output = Output::Scalar(new.clone());
                    events.push(ViewEvent::Scalar { old, new });
                }
            }
            (OpState::ListRoot { .. } | OpState::MapRoot { .. } | OpState::SnapshotRoot, _) => {
                unreachable!("roots have no upstream nodes")
            }
            _ => panic!("change shape does not match the operator"),
        }

        self.eval_count += evals;
        if node.faults.is_empty() != was_clean {
            events.push(ViewEvent::FaultChanged);
        }
        for event in &events {
            node.subscribers.notify_all(event);
        }
        self.put(target, node);

        events
            .into_iter()
            .filter_map(|event| match event {
                ViewEvent::List(c) => Some(Propagated::List(c)),
                ViewEvent::Map(c) => Some(Propagated::Map(c)),
                _ => None,
            })
            .collect()
    }

    // ---- collection operators ----

    fn filter_inner(&mut self, up: NodeId, predicate: Expr) -> NodeId {
        let predicate = self.normalized(predicate);
        let key = (OpKind::Filter, fingerprint(&predicate));
        if let Some(id) = self.cached(up, key) {
            return id;
        }
        self.acquire(up);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) = FilterState::init(predicate, self.list_out(up), &mut faults, &mut evals);
        self.eval_count += evals;
        self.install(
            Node::new(
                OpState::Filter(state),
                Output::List(output),
                faults,
                alloc::vec![up],
            ),
            up,
            key,
        )
    }

    /// Elements satisfying `predicate`, in upstream order. Elements whose
    /// predicate faults are excluded and recorded on the node.
    pub fn filter(&mut self, handle: &ListHandle, predicate: Expr) -> ListHandle {
        ListHandle {
            id: self.filter_inner(handle.id, predicate),
        }
    }

    /// `selector` applied to each element. A faulting element surfaces as
    /// Null and is recorded on the node.
    pub fn map(&mut self, handle: &ListHandle, selector: Expr) -> ListHandle {
        let selector = self.normalized(selector);
        let key = (OpKind::Project, fingerprint(&selector));
        if let Some(id) = self.cached(handle.id, key) {
            return ListHandle { id };
        }
        self.acquire(handle.id);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) =
            ProjectState::init(selector, self.list_out(handle.id), &mut faults, &mut evals);
        self.eval_count += evals;
        ListHandle {
            id: self.install(
                Node::new(
                    OpState::Project(state),
                    Output::List(output),
                    faults,
                    alloc::vec![handle.id],
                ),
                handle.id,
                key,
            ),
        }
    }

    /// Concatenation of the Array `selector` produces per element.
    pub fn flat_map(&mut self, handle: &ListHandle, selector: Expr) -> ListHandle {
        let selector = self.normalized(selector);
        let key = (OpKind::FlatMap, fingerprint(&selector));
        if let Some(id) = self.cached(handle.id, key) {
            return ListHandle { id };
        }
        self.acquire(handle.id);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) =
            FlatMapState::init(selector, self.list_out(handle.id), &mut faults, &mut evals);
        self.eval_count += evals;
        ListHandle {
            id: self.install(
                Node::new(
                    OpState::FlatMap(state),
                    Output::List(output),
                    faults,
                    alloc::vec![handle.id],
                ),
                handle.id,
                key,
            ),
        }
    }

    /// Stable multi-key sort. Elements whose keys fault sort last.
    pub fn sort(&mut self, handle: &ListHandle, keys: Vec<(Expr, SortOrder)>) -> ListHandle {
        let keys: Vec<(Expr, SortOrder)> = keys
            .into_iter()
            .map(|(expr, order)| (self.normalized(expr), order))
            .collect();
        let mut fp = 0xcbf29ce484222325u64;
        for (expr, order) in &keys {
            fp = combine(fp, fingerprint(expr));
            fp = combine(fp, order_bit(*order));
        }
        let key = (OpKind::Sort, fp);
        if let Some(id) = self.cached(handle.id, key) {
            return ListHandle { id };
        }
        self.acquire(handle.id);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) =
            SortState::init(keys, self.list_out(handle.id), &mut faults, &mut evals);
        self.eval_count += evals;
        ListHandle {
            id: self.install(
                Node::new(
                    OpState::Sort(state),
                    Output::List(output),
                    faults,
                    alloc::vec![handle.id],
                ),
                handle.id,
                key,
            ),
        }
    }

    fn group_by_inner(&mut self, up: NodeId, key_selector: Expr) -> NodeId {
        let key_selector = self.normalized(key_selector);
        let key = (OpKind::GroupBy, fingerprint(&key_selector));
        if let Some(id) = self.cached(up, key) {
            return id;
        }
        self.acquire(up);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) =
            GroupByState::init(key_selector, self.list_out(up), &mut faults, &mut evals);
        self.eval_count += evals;
        self.install(
            Node::new(
                OpState::GroupBy(state),
                Output::Map(output),
                faults,
                alloc::vec![up],
            ),
            up,
            key,
        )
    }

    /// Map from group key to Array of members, entries ordered by first
    /// occurrence of each key.
    pub fn group_by(&mut self, handle: &ListHandle, key_selector: Expr) -> MapHandle {
        MapHandle {
            id: self.group_by_inner(handle.id, key_selector),
        }
    }

    /// Left followed by right. The two handles may point at the same node.
    pub fn concat(&mut self, left: &ListHandle, right: &ListHandle) -> ListHandle {
        let key = (OpKind::Concat, right.id.0 as u64);
        if let Some(id) = self.cached(left.id, key) {
            return ListHandle { id };
        }
        self.acquire(left.id);
        self.acquire(right.id);
        let mut output = self.list_out(left.id).to_vec();
        let left_len = output.len();
        output.extend_from_slice(self.list_out(right.id));
        ListHandle {
            id: self.install(
                Node::new(
                    OpState::Concat {
                        left: left.id,
                        right: right.id,
                        left_len,
                    },
                    Output::List(output),
                    FaultList::new(),
                    alloc::vec![left.id, right.id],
                ),
                left.id,
                key,
            ),
        }
    }

    /// Unique elements in first-occurrence order, built over an internal
    /// identity grouping.
    pub fn distinct(&mut self, handle: &ListHandle) -> ListHandle {
        let group = self.group_by_inner(handle.id, Expr::item());
        let key = (OpKind::Distinct, 0);
        if let Some(id) = self.cached(group, key) {
            // The existing node already observes the group node; undo the
            // acquisition group_by_inner just made.
            self.release_node(group);
            return ListHandle { id };
        }
        // The group observation transfers to the new node.
        let output: Vec<Value> = self.map_out(group).iter().map(|(k, _)| k.clone()).collect();
        ListHandle {
            id: self.install(
                Node::new(
                    OpState::Distinct,
                    Output::List(output),
                    FaultList::new(),
                    alloc::vec![group],
                ),
                group,
                key,
            ),
        }
    }

    /// Elements whose dynamic type is `data_type`.
    pub fn of_type(&mut self, handle: &ListHandle, data_type: DataType) -> ListHandle {
        self.filter(handle, Expr::type_is(Expr::item(), data_type))
    }

    /// Each element cast to `data_type`; failed casts fault.
    pub fn cast(&mut self, handle: &ListHandle, data_type: DataType) -> ListHandle {
        self.map(handle, Expr::cast_to(Expr::item(), data_type))
    }

    /// Mirror of the upstream that re-emits batched changes one element at
    /// a time.
    pub fn individual_changes(&mut self, handle: &ListHandle) -> ListHandle {
        let key = (OpKind::Individual, 0);
        if let Some(id) = self.cached(handle.id, key) {
            return ListHandle { id };
        }
        self.acquire(handle.id);
        let output = self.list_out(handle.id).to_vec();
        ListHandle {
            id: self.install(
                Node::new(
                    OpState::Individual,
                    Output::List(output),
                    FaultList::new(),
                    alloc::vec![handle.id],
                ),
                handle.id,
                key,
            ),
        }
    }

    // ---- dictionary operators ----

    /// Entries satisfying `predicate`, which sees Key and Val.
    pub fn map_filter(&mut self, handle: &MapHandle, predicate: Expr) -> MapHandle {
        let predicate = self.normalized(predicate);
        let key = (OpKind::MapFilter, fingerprint(&predicate));
        if let Some(id) = self.cached(handle.id, key) {
            return MapHandle { id };
        }
        self.acquire(handle.id);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) =
            MapFilterState::init(predicate, self.map_out(handle.id), &mut faults, &mut evals);
        self.eval_count += evals;
        MapHandle {
            id: self.install(
                Node::new(
                    OpState::MapFilter(state),
                    Output::Map(output),
                    faults,
                    alloc::vec![handle.id],
                ),
                handle.id,
                key,
            ),
        }
    }

    /// Re-keyed and re-valued dictionary. Entries projecting to the same
    /// key collide; the earliest contributor wins and the collision is
    /// recorded as a fault until it clears.
    pub fn map_select(
        &mut self,
        handle: &MapHandle,
        key_selector: Expr,
        value_selector: Expr,
    ) -> MapHandle {
        let key_selector = self.normalized(key_selector);
        let value_selector = self.normalized(value_selector);
        let key = (
            OpKind::MapSelect,
            combine(fingerprint(&key_selector), fingerprint(&value_selector)),
        );
        if let Some(id) = self.cached(handle.id, key) {
            return MapHandle { id };
        }
        self.acquire(handle.id);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (state, output) = MapSelectState::init(
            key_selector,
            value_selector,
            self.map_out(handle.id),
            &mut faults,
            &mut evals,
        );
        self.eval_count += evals;
        MapHandle {
            id: self.install(
                Node::new(
                    OpState::MapSelect(state),
                    Output::Map(output),
                    faults,
                    alloc::vec![handle.id],
                ),
                handle.id,
                key,
            ),
        }
    }

    // ---- scalar operators ----

    fn scalar_on_list(&mut self, up: NodeId, fp: u64, mut state: ScalarState) -> ScalarHandle {
        let key = (OpKind::Scalar, fp);
        if let Some(id) = self.cached(up, key) {
            return ScalarHandle { id };
        }
        self.acquire(up);
        let mut faults = FaultList::new();
        let mut evals = 0;
        let value = state.rebuild_list(&mut faults, self.list_out(up), &mut evals);
        self.eval_count += evals;
        ScalarHandle {
            id: self.install(
                Node::new(
                    OpState::Scalar(state),
                    Output::Scalar(value),
                    faults,
                    alloc::vec![up],
                ),
                up,
                key,
            ),
        }
    }

    fn scalar_on_map(&mut self, up: NodeId, fp: u64, mut state: ScalarState) -> ScalarHandle {
        let key = (OpKind::Scalar, fp);
        if let Some(id) = self.cached(up, key) {
            return ScalarHandle { id };
        }
        self.acquire(up);
        let value = state.rebuild_map(self.map_out(up));
        ScalarHandle {
            id: self.install(
                Node::new(
                    OpState::Scalar(state),
                    Output::Scalar(value),
                    FaultList::new(),
                    alloc::vec![up],
                ),
                up,
                key,
            ),
        }
    }

    /// Element count, maintained in O(1) per change.
    pub fn count(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.scalar_on_list(handle.id, TAG_COUNT, ScalarState::Count)
    }

    /// Sum of `selector` over all elements. Int64 until any term is
    /// Float64, then Float64.
    pub fn sum(&mut self, handle: &ListHandle, selector: Expr) -> ScalarHandle {
        let selector = self.normalized(selector);
        let fp = combine(TAG_SUM, fingerprint(&selector));
        self.scalar_on_list(handle.id, fp, ScalarState::Sum(SumState::new(selector)))
    }

    /// Arithmetic mean of `selector`; NoElements over an empty view.
    pub fn average(&mut self, handle: &ListHandle, selector: Expr) -> ScalarHandle {
        let selector = self.normalized(selector);
        let fp = combine(TAG_AVERAGE, fingerprint(&selector));
        self.scalar_on_list(handle.id, fp, ScalarState::Average(SumState::new(selector)))
    }

    /// Least projection of `selector`; NoElements over an empty view.
    pub fn min(&mut self, handle: &ListHandle, selector: Expr) -> ScalarHandle {
        let selector = self.normalized(selector);
        let fp = combine(TAG_MIN, fingerprint(&selector));
        self.scalar_on_list(
            handle.id,
            fp,
            ScalarState::Extreme(ExtremeState::new(selector, false)),
        )
    }

    /// Greatest projection of `selector`; NoElements over an empty view.
    pub fn max(&mut self, handle: &ListHandle, selector: Expr) -> ScalarHandle {
        let selector = self.normalized(selector);
        let fp = combine(TAG_MAX, fingerprint(&selector));
        self.scalar_on_list(
            handle.id,
            fp,
            ScalarState::Extreme(ExtremeState::new(selector, true)),
        )
    }

    fn any_all(&mut self, up: NodeId, predicate: Expr, all: bool) -> ScalarHandle {
        let predicate = self.normalized(predicate);
        let tag = if all { TAG_ALL } else { TAG_ANY };
        let key = (OpKind::Scalar, combine(tag, fingerprint(&predicate)));
        if let Some(id) = self.cached(up, key) {
            return ScalarHandle { id };
        }
        // The filter observation transfers to the new node; the source
        // needs its own.
        let filtered = self.filter_inner(up, predicate);
        self.acquire(up);
        let passing = self.list_out(filtered).len();
        let total = self.list_out(up).len();
        let value = Ok(Value::Boolean(if all {
            passing == total
        } else {
            passing > 0
        }));
        ScalarHandle {
            id: self.install(
                Node::new(
                    OpState::Scalar(ScalarState::AnyAll {
                        source: up,
                        filtered,
                        all,
                    }),
                    Output::Scalar(value),
                    FaultList::new(),
                    alloc::vec![up, filtered],
                ),
                up,
                key,
            ),
        }
    }

    /// True while at least one element satisfies `predicate`.
    pub fn any(&mut self, handle: &ListHandle, predicate: Expr) -> ScalarHandle {
        self.any_all(handle.id, predicate, false)
    }

    /// True while every element satisfies `predicate`. Vacuously true over
    /// an empty view.
    pub fn all(&mut self, handle: &ListHandle, predicate: Expr) -> ScalarHandle {
        self.any_all(handle.id, predicate, true)
    }

    /// General fold from `seed`. The fold expression sees the accumulator
    /// as Key and the element as Val. Recomputed in full per change.
    pub fn aggregate(&mut self, handle: &ListHandle, seed: Value, fold: Expr) -> ScalarHandle {
        let fold = self.normalized(fold);
        let fp = combine(
            TAG_AGGREGATE,
            combine(fingerprint_value(&seed), fingerprint(&fold)),
        );
        self.scalar_on_list(handle.id, fp, ScalarState::Aggregate { seed, fold })
    }

    /// Evaluates `expr` with Item bound to the whole output as an Array.
    /// Recomputed in full per change.
    pub fn transform(&mut self, handle: &ListHandle, expr: Expr) -> ScalarHandle {
        let expr = self.normalized(expr);
        let fp = combine(TAG_TRANSFORM, fingerprint(&expr));
        self.scalar_on_list(handle.id, fp, ScalarState::Transform { expr })
    }

    fn positional(
        &mut self,
        up: NodeId,
        tag: u64,
        extra: u64,
        kind: PositionalKind,
        or_default: bool,
    ) -> ScalarHandle {
        let fp = combine(tag, combine(extra, or_default as u64));
        self.scalar_on_list(up, fp, ScalarState::Positional { kind, or_default })
    }

    /// The element at `index`; IndexOutOfRange when absent.
    pub fn element_at(&mut self, handle: &ListHandle, index: usize) -> ScalarHandle {
        self.positional(
            handle.id,
            TAG_ELEMENT_AT,
            index as u64,
            PositionalKind::ElementAt(index),
            false,
        )
    }

    /// The element at `index`, or Null when absent.
    pub fn element_at_or_default(&mut self, handle: &ListHandle, index: usize) -> ScalarHandle {
        self.positional(
            handle.id,
            TAG_ELEMENT_AT,
            index as u64,
            PositionalKind::ElementAt(index),
            true,
        )
    }

    /// The first element; NoElements when empty.
    pub fn first(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.positional(handle.id, TAG_FIRST, 0, PositionalKind::First, false)
    }

    /// The first element, or Null when empty.
    pub fn first_or_default(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.positional(handle.id, TAG_FIRST, 0, PositionalKind::First, true)
    }

    /// The last element; NoElements when empty.
    pub fn last(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.positional(handle.id, TAG_LAST, 0, PositionalKind::Last, false)
    }

    /// The last element, or Null when empty.
    pub fn last_or_default(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.positional(handle.id, TAG_LAST, 0, PositionalKind::Last, true)
    }

    /// The only element; NoElements when empty, MoreThanOneElement past one.
    pub fn single(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.positional(handle.id, TAG_SINGLE, 0, PositionalKind::Single, false)
    }

    /// The only element, Null when empty, still MoreThanOneElement past one.
    pub fn single_or_default(&mut self, handle: &ListHandle) -> ScalarHandle {
        self.positional(handle.id, TAG_SINGLE, 0, PositionalKind::Single, true)
    }

    /// Entry count of a dictionary view.
    pub fn map_count(&mut self, handle: &MapHandle) -> ScalarHandle {
        self.scalar_on_map(handle.id, TAG_MAP_COUNT, ScalarState::MapCount)
    }

    /// The value under `key`; KeyNotFound when absent.
    pub fn value_for(&mut self, handle: &MapHandle, key: Value) -> ScalarHandle {
        let fp = combine(TAG_VALUE_FOR, combine(fingerprint_value(&key), 0));
        self.scalar_on_map(
            handle.id,
            fp,
            ScalarState::ValueFor {
                key,
                or_default: false,
            },
        )
    }

    /// The value under `key`, or Null when absent.
    pub fn value_for_or_default(&mut self, handle: &MapHandle, key: Value) -> ScalarHandle {
        let fp = combine(TAG_VALUE_FOR, combine(fingerprint_value(&key), 1));
        self.scalar_on_map(
            handle.id,
            fp,
            ScalarState::ValueFor {
                key,
                or_default: true,
            },
        )
    }

    // ---- outputs and subscriptions ----

    /// Current output of a list-shaped view.
    pub fn list_output(&self, handle: &ListHandle) -> &[Value] {
        self.list_out(handle.id)
    }

    /// Current entries of a map-shaped view, in entry order.
    pub fn map_output(&self, handle: &MapHandle) -> &[(Value, Value)] {
        self.map_out(handle.id)
    }

    /// Current value of a scalar view.
    pub fn scalar_value(&self, handle: &ScalarHandle) -> Result<Value> {
        self.node_ref(handle.id).output.as_scalar().clone()
    }

    /// The node's merged operation fault, None while every element
    /// evaluates.
    pub fn operation_fault<H: Handle>(&self, handle: &H) -> Option<Error> {
        self.node_ref(handle.node_id()).faults.merged()
    }

    pub fn subscribe<H, F>(&mut self, handle: &H, callback: F) -> SubscriptionId
    where
        H: Handle,
        F: Fn(&ViewEvent) + 'static,
    {
        self.node_mut(handle.node_id()).subscribers.subscribe(callback)
    }

    pub fn unsubscribe<H: Handle>(&mut self, handle: &H, id: SubscriptionId) -> bool {
        self.node_mut(handle.node_id()).subscribers.unsubscribe(id)
    }

    // ---- lifecycle ----

    /// Releases the observation a handle represents. The node is torn down
    /// when its last observation goes, children strictly before parents.
    pub fn release<H: Handle>(&mut self, handle: H) {
        self.release_node(handle.node_id());
    }

    fn release_node(&mut self, id: NodeId) {
        {
            let node = self.node_mut(id);
            assert!(node.observers > 0, "released a node nobody observes");
            node.observers -= 1;
            if node.observers > 0 {
                return;
            }
        }
        let node = self.take(id);
        self.free.push(id.0);
        match &node.op {
            OpState::ListRoot { source } | OpState::MapRoot { source } => {
                self.roots
                    .remove(source)
                    .expect("root missing from the source table");
            }
            OpState::SnapshotRoot => {}
            _ => {
                // The owning cache entry lives on one of the upstreams.
                let mut owned = false;
                for &up in &node.upstream {
                    let upstream = self.node_mut(up);
                    let key = upstream
                        .cache
                        .iter()
                        .find_map(|(key, child)| (*child == id).then_some(*key));
                    if let Some(key) = key {
                        upstream.cache.remove(&key);
                        owned = true;
                    }
                }
                assert!(owned, "cache entry missing during node teardown");
            }
        }
        for &up in &node.upstream {
            self.node_mut(up).downstream.retain(|d| *d != id);
        }
        for up in node.upstream {
            self.release_node(up);
        }
    }
}
