//! Notification completeness: replaying the change stream a view emits
//! must reconstruct exactly the view's materialized output, and that
//! output must equal a from-scratch recompute, under arbitrary mutation
//! scripts.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use rivus_collections::{apply_list_change, ListChange, ObservableList};
use rivus_core::Value;
use rivus_expr::Expr;
use rivus_query::{Handle, ViewEvent, ViewRegistry};

#[derive(Clone, Debug)]
enum Script {
    Push(i64),
    Insert(usize, i64),
    Remove(usize),
    Replace(usize, i64),
    Move(usize, usize),
    Reset(Vec<i64>),
}

fn script_step() -> impl Strategy<Value = Script> {
    prop_oneof![
        (-20i64..20).prop_map(Script::Push),
        (any::<usize>(), -20i64..20).prop_map(|(i, v)| Script::Insert(i, v)),
        any::<usize>().prop_map(Script::Remove),
        (any::<usize>(), -20i64..20).prop_map(|(i, v)| Script::Replace(i, v)),
        (any::<usize>(), any::<usize>()).prop_map(|(f, t)| Script::Move(f, t)),
        proptest::collection::vec(-20i64..20, 0..6).prop_map(Script::Reset),
    ]
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int64(v)).collect()
}

fn as_i64(value: &Value) -> i64 {
    match value {
        Value::Int64(v) => *v,
        other => panic!("expected an Int64, got {:?}", other),
    }
}

/// Maintains a shadow copy of a view purely from its notifications.
fn shadow(
    registry: &mut ViewRegistry,
    handle: &impl Handle,
    initial: &[Value],
) -> Rc<RefCell<Vec<Value>>> {
    let copy = Rc::new(RefCell::new(initial.to_vec()));
    let sink = copy.clone();
    registry.subscribe(handle, move |event| {
        if let ViewEvent::List(change) = event {
            apply_list_change(&mut sink.borrow_mut(), change, &[]);
        }
    });
    copy
}

fn naive_filter(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .filter(|v| as_i64(v) % 2 == 0)
        .cloned()
        .collect()
}

fn naive_sorted(items: &[Value]) -> Vec<Value> {
    let mut out = naive_filter(items);
    out.sort_by_key(as_i64);
    out
}

fn naive_doubled(items: &[Value]) -> Vec<Value> {
    items.iter().map(|v| Value::Int64(as_i64(v) * 2)).collect()
}

proptest! {
    #[test]
    fn prop_replayed_notifications_match_outputs(
        initial in proptest::collection::vec(-20i64..20, 0..8),
        script in proptest::collection::vec(script_step(), 1..40),
    ) {
        let mut list = ObservableList::from_values(ints(&initial));
        let pending = Rc::new(RefCell::new(Vec::new()));
        let sink = pending.clone();
        list.subscribe(move |change: &ListChange| sink.borrow_mut().push(change.clone()));

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
        let doubled = registry.map(&source, Expr::mul(Expr::item(), Expr::literal(2i64)));

        let even_init = registry.list_output(&even).to_vec();
        let sorted_init = registry.list_output(&sorted).to_vec();
        let doubled_init = registry.list_output(&doubled).to_vec();
        let even_shadow = shadow(&mut registry, &even, &even_init);
        let sorted_shadow = shadow(&mut registry, &sorted, &sorted_init);
        let doubled_shadow = shadow(&mut registry, &doubled, &doubled_init);

        for step in script {
            let len = list.len();
            match step {
                Script::Push(v) => list.push(Value::Int64(v)),
                Script::Insert(i, v) => {
                    list.insert(i % (len + 1), Value::Int64(v)).unwrap();
                }
                Script::Remove(i) if len > 0 => {
                    list.remove(i % len).unwrap();
                }
                Script::Replace(i, v) if len > 0 => {
                    list.replace(i % len, Value::Int64(v)).unwrap();
                }
                Script::Move(f, t) if len > 1 => {
                    list.move_range(f % len, t % len, 1).unwrap();
                }
                Script::Reset(values) => list.reset(ints(&values)),
                _ => continue,
            }
            for change in pending.borrow_mut().drain(..) {
                registry.list_changed(&list, &change);
            }

            // Incremental output equals a from-scratch recompute.
            let expected_even = naive_filter(list.as_slice());
            let expected_sorted = naive_sorted(list.as_slice());
            let expected_doubled = naive_doubled(list.as_slice());
            prop_assert_eq!(registry.list_output(&even), expected_even.as_slice());
            prop_assert_eq!(registry.list_output(&sorted), expected_sorted.as_slice());
            prop_assert_eq!(registry.list_output(&doubled), expected_doubled.as_slice());

            // The notification stream reconstructs the same output.
            let even_copy = even_shadow.borrow();
            let sorted_copy = sorted_shadow.borrow();
            let doubled_copy = doubled_shadow.borrow();
            prop_assert_eq!(even_copy.as_slice(), registry.list_output(&even));
            prop_assert_eq!(sorted_copy.as_slice(), registry.list_output(&sorted));
            prop_assert_eq!(doubled_copy.as_slice(), registry.list_output(&doubled));
        }
    }
}
