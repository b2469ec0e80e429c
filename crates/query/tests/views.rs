//! End-to-end behavior of the view graph: operator pipelines, node
//! sharing, subscriptions, faults and teardown.

use std::cell::RefCell;
use std::rc::Rc;

use rivus_collections::{ListChange, MapChange, ObservableList, ObservableMap};
use rivus_core::{DataType, Error, Value};
use rivus_expr::Expr;
use rivus_query::{ViewEvent, ViewRegistry};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int64(v)).collect()
}

/// Wires a list to a registry: every mutation the list emits is bridged
/// into `list_changed` by draining the captured changes.
fn capture_list(list: &mut ObservableList) -> Rc<RefCell<Vec<ListChange>>> {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = changes.clone();
    list.subscribe(move |change| sink.borrow_mut().push(change.clone()));
    changes
}

fn drain_list(
    registry: &mut ViewRegistry,
    list: &ObservableList,
    changes: &Rc<RefCell<Vec<ListChange>>>,
) {
    for change in changes.borrow_mut().drain(..) {
        registry.list_changed(list, &change);
    }
}

fn capture_map(map: &mut ObservableMap) -> Rc<RefCell<Vec<MapChange>>> {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = changes.clone();
    map.subscribe(move |change| sink.borrow_mut().push(change.clone()));
    changes
}

fn drain_map(
    registry: &mut ViewRegistry,
    map: &ObservableMap,
    changes: &Rc<RefCell<Vec<MapChange>>>,
) {
    for change in changes.borrow_mut().drain(..) {
        registry.map_changed(map, &change);
    }
}

fn record_events(
    registry: &mut ViewRegistry,
    handle: &impl rivus_query::Handle,
) -> Rc<RefCell<Vec<ViewEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    registry.subscribe(handle, move |event| sink.borrow_mut().push(event.clone()));
    events
}

#[test]
fn test_filter_then_sort_pipeline() {
    let mut list = ObservableList::from_values(ints(&[3, 1, 2]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let big = registry.filter(&source, Expr::gt(Expr::item(), Expr::literal(1i64)));
    let sorted = registry.sort(&big, Expr::item().asc());
    assert_eq!(registry.list_output(&sorted), ints(&[2, 3]).as_slice());

    let events = record_events(&mut registry, &sorted);

    // A non-passing element never reaches the sorted view.
    list.push(Value::Int64(0));
    drain_list(&mut registry, &list, &changes);
    assert!(events.borrow().is_empty());
    assert_eq!(registry.list_output(&sorted), ints(&[2, 3]).as_slice());

    // A passing element lands at its sorted position.
    list.push(Value::Int64(5));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(
        events.borrow().as_slice(),
        &[ViewEvent::List(ListChange::insert_one(2, Value::Int64(5)))]
    );
    assert_eq!(registry.list_output(&sorted), ints(&[2, 3, 5]).as_slice());
}

#[test]
fn test_filter_replace_flips_membership() {
    let mut list = ObservableList::from_values(ints(&[3, 1, 2]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let big = registry.filter(&source, Expr::gt(Expr::item(), Expr::literal(1i64)));
    let events = record_events(&mut registry, &big);

    // 1 -> 4 enters between 3 and 2.
    list.replace(1, Value::Int64(4)).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&big), ints(&[3, 4, 2]).as_slice());
    assert_eq!(
        events.borrow().as_slice(),
        &[ViewEvent::List(ListChange::insert_one(1, Value::Int64(4)))]
    );
}

#[test]
fn test_map_projects_and_tracks_replacements() {
    let mut list = ObservableList::from_values(ints(&[1, 2]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let doubled = registry.map(&source, Expr::mul(Expr::item(), Expr::literal(2i64)));
    assert_eq!(registry.list_output(&doubled), ints(&[2, 4]).as_slice());

    let events = record_events(&mut registry, &doubled);

    // Same projection, no notification.
    list.replace(0, Value::Int64(1)).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert!(events.borrow().is_empty());

    list.replace(0, Value::Int64(5)).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&doubled), ints(&[10, 4]).as_slice());
}

#[test]
fn test_flat_map_expands_runs() {
    let mut list = ObservableList::from_values(vec![
        Value::Array(ints(&[1, 2])),
        Value::Array(ints(&[3])),
    ]);
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let flat = registry.flat_map(&source, Expr::item());
    assert_eq!(registry.list_output(&flat), ints(&[1, 2, 3]).as_slice());

    list.insert(1, Value::Array(ints(&[9, 9]))).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&flat), ints(&[1, 2, 9, 9, 3]).as_slice());

    list.remove(0).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&flat), ints(&[9, 9, 3]).as_slice());
}

#[test]
fn test_group_by_parity() {
    let mut list = ObservableList::from_values(ints(&[3, 4, 5]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let groups = registry.group_by(&source, Expr::rem(Expr::item(), Expr::literal(2i64)));
    assert_eq!(
        registry.map_output(&groups),
        &[
            (Value::Int64(1), Value::Array(ints(&[3, 5]))),
            (Value::Int64(0), Value::Array(ints(&[4]))),
        ]
    );

    // Removing the only even element drops its group.
    list.remove(1).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(
        registry.map_output(&groups),
        &[(Value::Int64(1), Value::Array(ints(&[3, 5])))]
    );
}

#[test]
fn test_distinct_keeps_first_occurrence_order() {
    let mut list = ObservableList::from_values(ints(&[1, 2, 1, 3]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let unique = registry.distinct(&source);
    assert_eq!(registry.list_output(&unique), ints(&[1, 2, 3]).as_slice());

    // One duplicate gone, the key survives.
    list.remove(0).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&unique), ints(&[1, 2, 3]).as_slice());

    // The last 1 gone, the key goes with it.
    list.remove(1).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&unique), ints(&[2, 3]).as_slice());
}

#[test]
fn test_concat_with_itself() {
    let mut list = ObservableList::from_values(ints(&[1, 2]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let doubled_view = {
        let other = registry.observe_list(&list);
        let joined = registry.concat(&source, &other);
        registry.release(other);
        joined
    };
    assert_eq!(
        registry.list_output(&doubled_view),
        ints(&[1, 2, 1, 2]).as_slice()
    );

    list.push(Value::Int64(3));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(
        registry.list_output(&doubled_view),
        ints(&[1, 2, 3, 1, 2, 3]).as_slice()
    );
}

#[test]
fn test_of_type_and_cast() {
    let mut list = ObservableList::from_values(vec![
        Value::Int64(1),
        Value::from("two"),
        Value::Int64(3),
    ]);
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let numbers = registry.of_type(&source, DataType::Int64);
    assert_eq!(registry.list_output(&numbers), ints(&[1, 3]).as_slice());

    let floats = registry.cast(&numbers, DataType::Float64);
    assert_eq!(
        registry.list_output(&floats),
        &[Value::Float64(1.0), Value::Float64(3.0)]
    );

    list.push(Value::Int64(7));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.list_output(&floats).len(), 3);
}

#[test]
fn test_individual_changes_splits_batches() {
    let mut list = ObservableList::from_values(ints(&[1]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let single = registry.individual_changes(&source);
    let events = record_events(&mut registry, &single);

    list.insert_range(1, ints(&[2, 3])).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(
        events.borrow().as_slice(),
        &[
            ViewEvent::List(ListChange::insert_one(1, Value::Int64(2))),
            ViewEvent::List(ListChange::insert_one(2, Value::Int64(3))),
        ]
    );
    assert_eq!(registry.list_output(&single), ints(&[1, 2, 3]).as_slice());
}

#[test]
fn test_scalar_reductions_follow_changes() {
    let mut list = ObservableList::from_values(ints(&[1, 2, 3]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let count = registry.count(&source);
    let total = registry.sum(&source, Expr::item());
    let mean = registry.average(&source, Expr::item());
    let least = registry.min(&source, Expr::item());
    let greatest = registry.max(&source, Expr::item());

    assert_eq!(registry.scalar_value(&count), Ok(Value::Int64(3)));
    assert_eq!(registry.scalar_value(&total), Ok(Value::Int64(6)));
    assert_eq!(registry.scalar_value(&mean), Ok(Value::Float64(2.0)));
    assert_eq!(registry.scalar_value(&least), Ok(Value::Int64(1)));
    assert_eq!(registry.scalar_value(&greatest), Ok(Value::Int64(3)));

    list.remove(2).unwrap();
    list.push(Value::Int64(10));
    drain_list(&mut registry, &list, &changes);

    assert_eq!(registry.scalar_value(&count), Ok(Value::Int64(3)));
    assert_eq!(registry.scalar_value(&total), Ok(Value::Int64(13)));
    assert_eq!(registry.scalar_value(&greatest), Ok(Value::Int64(10)));
}

#[test]
fn test_any_all_track_membership() {
    let mut list = ObservableList::from_values(ints(&[1, 2, 3]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let any_big = registry.any(&source, Expr::gt(Expr::item(), Expr::literal(5i64)));
    let all_positive = registry.all(&source, Expr::gt(Expr::item(), Expr::literal(0i64)));

    assert_eq!(registry.scalar_value(&any_big), Ok(Value::Boolean(false)));
    assert_eq!(
        registry.scalar_value(&all_positive),
        Ok(Value::Boolean(true))
    );

    let events = record_events(&mut registry, &any_big);
    list.push(Value::Int64(6));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.scalar_value(&any_big), Ok(Value::Boolean(true)));
    assert_eq!(
        events.borrow().as_slice(),
        &[ViewEvent::Scalar {
            old: Ok(Value::Boolean(false)),
            new: Ok(Value::Boolean(true)),
        }]
    );

    list.replace(0, Value::Int64(-1)).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(
        registry.scalar_value(&all_positive),
        Ok(Value::Boolean(false))
    );
}

#[test]
fn test_aggregate_and_transform() {
    let mut list = ObservableList::from_values(ints(&[1, 2, 3]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    // acc * 10 + item.
    let folded = registry.aggregate(
        &source,
        Value::Int64(0),
        Expr::add(Expr::mul(Expr::key(), Expr::literal(10i64)), Expr::val()),
    );
    let length = registry.transform(&source, Expr::len(Expr::item()));

    assert_eq!(registry.scalar_value(&folded), Ok(Value::Int64(123)));
    assert_eq!(registry.scalar_value(&length), Ok(Value::Int64(3)));

    list.push(Value::Int64(4));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.scalar_value(&folded), Ok(Value::Int64(1234)));
    assert_eq!(registry.scalar_value(&length), Ok(Value::Int64(4)));
}

#[test]
fn test_positional_scalars() {
    let mut list = ObservableList::from_values(ints(&[7]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let only = registry.single(&source);
    let head = registry.first(&source);
    let tenth = registry.element_at_or_default(&source, 9);

    assert_eq!(registry.scalar_value(&only), Ok(Value::Int64(7)));
    assert_eq!(registry.scalar_value(&head), Ok(Value::Int64(7)));
    assert_eq!(registry.scalar_value(&tenth), Ok(Value::Null));

    list.push(Value::Int64(8));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(
        registry.scalar_value(&only),
        Err(Error::MoreThanOneElement)
    );

    list.reset(Vec::new());
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.scalar_value(&head), Err(Error::NoElements));
}

#[test]
fn test_map_select_rewrites_entries() {
    let mut map = ObservableMap::from_entries(vec![
        (Value::from("a"), Value::Int64(1)),
        (Value::from("b"), Value::Int64(2)),
    ])
    .unwrap();
    let changes = capture_map(&mut map);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_map(&map);
    let scaled = registry.map_select(
        &source,
        Expr::key(),
        Expr::mul(Expr::val(), Expr::literal(10i64)),
    );
    assert_eq!(
        registry.map_output(&scaled),
        &[
            (Value::from("a"), Value::Int64(10)),
            (Value::from("b"), Value::Int64(20)),
        ]
    );

    let events = record_events(&mut registry, &scaled);
    map.insert(Value::from("a"), Value::Int64(5)).unwrap();
    drain_map(&mut registry, &map, &changes);
    assert_eq!(
        events.borrow().as_slice(),
        &[ViewEvent::Map(MapChange::Replace {
            key: Value::from("a"),
            old: Value::Int64(10),
            new: Value::Int64(50),
        })]
    );
}

#[test]
fn test_map_select_duplicate_key_readmission() {
    // Both entries project to key 1; the earliest contributor wins and the
    // collision is a fault until it clears.
    let mut map = ObservableMap::from_entries(vec![
        (Value::from("a"), Value::Int64(1)),
        (Value::from("b"), Value::Int64(1)),
    ])
    .unwrap();
    let changes = capture_map(&mut map);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_map(&map);
    let by_value = registry.map_select(&source, Expr::val(), Expr::key());
    assert_eq!(
        registry.map_output(&by_value),
        &[(Value::Int64(1), Value::from("a"))]
    );
    assert!(matches!(
        registry.operation_fault(&by_value),
        Some(Error::DuplicateKey { .. })
    ));

    // Removing the winner re-admits the shadowed contributor.
    map.remove(&Value::from("a"));
    drain_map(&mut registry, &map, &changes);
    assert_eq!(
        registry.map_output(&by_value),
        &[(Value::Int64(1), Value::from("b"))]
    );
    assert_eq!(registry.operation_fault(&by_value), None);
}

#[test]
fn test_map_filter_and_lookups() {
    let mut map = ObservableMap::from_entries(vec![
        (Value::from("a"), Value::Int64(1)),
        (Value::from("b"), Value::Int64(2)),
    ])
    .unwrap();
    let changes = capture_map(&mut map);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_map(&map);
    let big = registry.map_filter(&source, Expr::gt(Expr::val(), Expr::literal(1i64)));
    let entries = registry.map_count(&source);
    let a_value = registry.value_for(&source, Value::from("a"));
    let missing = registry.value_for_or_default(&source, Value::from("z"));

    assert_eq!(
        registry.map_output(&big),
        &[(Value::from("b"), Value::Int64(2))]
    );
    assert_eq!(registry.scalar_value(&entries), Ok(Value::Int64(2)));
    assert_eq!(registry.scalar_value(&a_value), Ok(Value::Int64(1)));
    assert_eq!(registry.scalar_value(&missing), Ok(Value::Null));

    map.insert(Value::from("a"), Value::Int64(9)).unwrap();
    drain_map(&mut registry, &map, &changes);
    assert_eq!(registry.map_output(&big).len(), 2);
    assert_eq!(registry.scalar_value(&a_value), Ok(Value::Int64(9)));
}

#[test]
fn test_structurally_equal_queries_share_nodes() {
    let list = ObservableList::from_values(ints(&[1, 2, 3]));
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let predicate = || Expr::gt(Expr::item(), Expr::literal(1i64));
    let first = registry.filter(&source, predicate());
    let nodes_after_first = registry.node_count();
    let second = registry.filter(&source, predicate());
    assert_eq!(registry.node_count(), nodes_after_first);

    // A normalized spelling of the same predicate also shares.
    let third = registry.filter(
        &source,
        Expr::not(Expr::le(Expr::item(), Expr::literal(1i64))),
    );
    assert_eq!(registry.node_count(), nodes_after_first);

    // The node survives until the last observation goes.
    registry.release(first);
    registry.release(second);
    assert_eq!(registry.node_count(), nodes_after_first);
    assert_eq!(registry.list_output(&third), ints(&[2, 3]).as_slice());

    registry.release(third);
    registry.release(source);
    assert_eq!(registry.node_count(), 0);
}

#[test]
fn test_release_tears_down_internal_children() {
    let list = ObservableList::from_values(ints(&[1, 2]));
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let unique = registry.distinct(&source);
    let has_big = registry.any(&source, Expr::gt(Expr::item(), Expr::literal(1i64)));
    assert!(registry.node_count() > 3);

    registry.release(unique);
    registry.release(has_big);
    registry.release(source);
    assert_eq!(registry.node_count(), 0);
}

#[test]
fn test_fault_is_local_to_the_element() {
    let mut list = ObservableList::from_values(ints(&[1, 5, 0]));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    // 10 / item faults on the zero element only.
    let view = registry.filter(
        &source,
        Expr::gt(
            Expr::div(Expr::literal(10i64), Expr::item()),
            Expr::literal(1i64),
        ),
    );
    assert_eq!(registry.list_output(&view), ints(&[1, 5]).as_slice());
    assert_eq!(
        registry.operation_fault(&view),
        Some(Error::DivideByZero)
    );

    let events = record_events(&mut registry, &view);
    let evals_before = registry.eval_count();

    // Fixing the faulted element re-evaluates that element alone.
    list.replace(2, Value::Int64(2)).unwrap();
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.eval_count() - evals_before, 1);
    assert_eq!(registry.operation_fault(&view), None);
    assert!(events
        .borrow()
        .iter()
        .any(|event| matches!(event, ViewEvent::FaultChanged)));
    assert_eq!(registry.list_output(&view), ints(&[1, 5, 2]).as_slice());
}

#[test]
fn test_snapshot_refresh_resets_downstream() {
    let mut registry = ViewRegistry::new();
    let snapshot = registry.observe_list_snapshot(&ints(&[1, 2, 3]));
    let big = registry.filter(&snapshot, Expr::gt(Expr::item(), Expr::literal(1i64)));
    assert_eq!(registry.list_output(&big), ints(&[2, 3]).as_slice());

    let events = record_events(&mut registry, &big);
    registry.refresh_snapshot(&snapshot, &ints(&[5, 0])).unwrap();
    assert_eq!(registry.list_output(&big), ints(&[5]).as_slice());
    assert_eq!(
        events.borrow().as_slice(),
        &[ViewEvent::List(ListChange::Reset)]
    );

    // Only snapshot roots refresh.
    let list = ObservableList::from_values(ints(&[1]));
    let live = registry.observe_list(&list);
    assert!(registry.refresh_snapshot(&live, &[]).is_err());
}

#[test]
fn test_unobserved_source_changes_are_ignored() {
    let list = ObservableList::from_values(ints(&[1]));
    let mut registry = ViewRegistry::new();
    // No observe_list call; the bridge is a no-op.
    registry.list_changed(&list, &ListChange::insert_one(0, Value::Int64(9)));
    assert_eq!(registry.node_count(), 0);
}

#[test]
fn test_incremental_cost_is_per_element() {
    let mut list = ObservableList::from_values(ints(&(0..100).collect::<Vec<_>>()));
    let changes = capture_list(&mut list);
    let mut registry = ViewRegistry::new();

    let source = registry.observe_list(&list);
    let even = registry.filter(
        &source,
        Expr::eq(
            Expr::rem(Expr::item(), Expr::literal(2i64)),
            Expr::literal(0i64),
        ),
    );
    let sorted = registry.sort(&even, Expr::item().asc());
    let evals_before = registry.eval_count();

    // Odd: one predicate evaluation, nothing reaches the sort.
    list.push(Value::Int64(101));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.eval_count() - evals_before, 1);
    assert_eq!(registry.list_output(&even).len(), 50);

    // Even: one predicate evaluation plus one sort key evaluation. The
    // sorted store places it by binary search on cached keys, so the
    // other 50 elements are never revisited.
    let evals_before = registry.eval_count();
    list.push(Value::Int64(102));
    drain_list(&mut registry, &list, &changes);
    assert_eq!(registry.eval_count() - evals_before, 2);
    assert_eq!(
        registry.list_output(&sorted).last(),
        Some(&Value::Int64(102))
    );
}
