//! Incremental ordering.
//!
//! Keeps the output fully sorted next to two side tables: the evaluated key
//! vector per sorted position, and a slot table mapping upstream positions
//! to sorted positions. Inserts binary-search their position; a key change
//! walks left or right from the element's current position while it
//! compares out of order and performs one Move. The whole result is never
//! re-sorted outside of Reset.
//!
//! Faulted keys compare greater than every successful key, so a fault
//! lands the element at the end without aborting any comparison; the fault
//! itself is recorded keyed by upstream position.

use crate::fault::FaultList;
use alloc::vec::Vec;
use core::cmp::Ordering;
use rivus_collections::ListChange;
use rivus_core::{Error, Result, Value};
use rivus_expr::{eval, EvalContext, Expr, SortOrder};

pub(crate) struct SortState {
    keys: Vec<(Expr, SortOrder)>,
    /// Evaluated key vector per sorted position, parallel to the output.
    entries: Vec<Vec<Result<Value>>>,
    /// Upstream position -> sorted position.
    slots: Vec<usize>,
}

fn compare(a: &[Result<Value>], b: &[Result<Value>], keys: &[(Expr, SortOrder)]) -> Ordering {
    for (i, (_, order)) in keys.iter().enumerate() {
        let ord = match (&a[i], &b[i]) {
            (Ok(x), Ok(y)) => {
                let c = x.cmp(y);
                if *order == SortOrder::Desc {
                    c.reverse()
                } else {
                    c
                }
            }
            (Err(_), Ok(_)) => Ordering::Greater,
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Err(_)) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn first_fault(keys: &[Result<Value>]) -> Option<Error> {
    keys.iter().find_map(|k| k.as_ref().err().cloned())
}

impl SortState {
    pub fn init(
        keys: Vec<(Expr, SortOrder)>,
        upstream: &[Value],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<Value>) {
        let mut state = Self {
            keys,
            entries: Vec::new(),
            slots: Vec::new(),
        };
        let output = state.rebuild(upstream, faults, evals);
        (state, output)
    }

    fn eval_keys(&self, item: &Value, evals: &mut u64) -> Vec<Result<Value>> {
        let ctx = EvalContext::item(item);
        *evals += self.keys.len() as u64;
        self.keys.iter().map(|(expr, _)| eval(expr, &ctx)).collect()
    }

    fn rebuild(&mut self, upstream: &[Value], faults: &mut FaultList, evals: &mut u64) -> Vec<Value> {
        faults.clear();
        let mut keyed: Vec<(Vec<Result<Value>>, Value, usize)> = upstream
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let ks = self.eval_keys(item, evals);
                faults.set_position(pos, first_fault(&ks));
                (ks, item.clone(), pos)
            })
            .collect();
        keyed.sort_by(|a, b| compare(&a.0, &b.0, &self.keys));

        self.entries = Vec::with_capacity(keyed.len());
        self.slots = alloc::vec![0; keyed.len()];
        let mut output = Vec::with_capacity(keyed.len());
        for (sorted_pos, (ks, item, up)) in keyed.into_iter().enumerate() {
            self.slots[up] = sorted_pos;
            self.entries.push(ks);
            output.push(item);
        }
        output
    }

    /// Insertion point after any run of equal keys.
    fn insertion_point(&self, ks: &[Result<Value>]) -> usize {
        self.entries
            .partition_point(|e| compare(e, ks, &self.keys) != Ordering::Greater)
    }

    pub fn apply(
        &mut self,
        output: &mut Vec<Value>,
        faults: &mut FaultList,
        change: &ListChange,
        upstream_after: &[Value],
        evals: &mut u64,
    ) -> Vec<ListChange> {
        match change {
            ListChange::Insert { index, items } => {
                faults.shift_inserted(*index, items.len());
                let mut emitted = Vec::with_capacity(items.len());
                for (j, item) in items.iter().enumerate() {
                    let up = index + j;
                    let ks = self.eval_keys(item, evals);
                    faults.set_position(up, first_fault(&ks));
                    let ins = self.insertion_point(&ks);
                    for s in self.slots.iter_mut() {
                        if *s >= ins {
                            *s += 1;
                        }
                    }
                    self.slots.insert(up, ins);
                    self.entries.insert(ins, ks);
                    output.insert(ins, item.clone());
                    emitted.push(ListChange::insert_one(ins, item.clone()));
                }
                emitted
            }
            ListChange::Remove { index, items } => {
                faults.shift_removed(*index, items.len());
                let mut emitted = Vec::with_capacity(items.len());
                for _ in 0..items.len() {
                    let sp = self.slots.remove(*index);
                    self.entries.remove(sp);
                    let item = output.remove(sp);
                    for s in self.slots.iter_mut() {
                        if *s > sp {
                            *s -= 1;
                        }
                    }
                    emitted.push(ListChange::remove_one(sp, item));
                }
                emitted
            }
            ListChange::Replace { index, new, .. } => {
                let mut emitted = Vec::new();
                for (j, item) in new.iter().enumerate() {
                    let up = index + j;
                    let p = self.slots[up];
                    let ks = self.eval_keys(item, evals);
                    faults.set_position(up, first_fault(&ks));
                    let value_changed = output[p] != *item;

                    if compare(&self.entries[p], &ks, &self.keys) == Ordering::Equal {
                        self.entries[p] = ks;
                        if value_changed {
                            let old = core::mem::replace(&mut output[p], item.clone());
                            emitted.push(ListChange::replace_one(p, old, item.clone()));
                        }
                        continue;
                    }

                    // Walk from the current position while the new key is
                    // out of order with a neighbor.
                    let mut q = p;
                    while q > 0 && compare(&ks, &self.entries[q - 1], &self.keys) == Ordering::Less
                    {
                        q -= 1;
                    }
                    if q == p {
                        while q + 1 < self.entries.len()
                            && compare(&ks, &self.entries[q + 1], &self.keys) == Ordering::Greater
                        {
                            q += 1;
                        }
                    }

                    if value_changed {
                        let old = core::mem::replace(&mut output[p], item.clone());
                        emitted.push(ListChange::replace_one(p, old, item.clone()));
                    }
                    self.entries.remove(p);
                    self.entries.insert(q, ks);
                    let moved = output.remove(p);
                    output.insert(q, moved);
                    if q > p {
                        for s in self.slots.iter_mut() {
                            if *s > p && *s <= q {
                                *s -= 1;
                            }
                        }
                    } else {
                        for s in self.slots.iter_mut() {
                            if *s >= q && *s < p {
                                *s += 1;
                            }
                        }
                    }
                    self.slots[up] = q;
                    if q != p {
                        emitted.push(ListChange::Move {
                            from: p,
                            to: q,
                            len: 1,
                        });
                    }
                }
                emitted
            }
            ListChange::Move { from, to, len } => {
                // Sorted order is independent of upstream order; only the
                // slot table is remapped.
                let moved: Vec<usize> = self.slots.drain(*from..from + len).collect();
                self.slots.splice(*to..*to, moved);
                faults.apply_move(*from, *to, *len);
                Vec::new()
            }
            ListChange::Reset => {
                *output = self.rebuild(upstream_after, faults, evals);
                alloc::vec![ListChange::Reset]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Int64(v)).collect()
    }

    fn asc() -> Vec<(Expr, SortOrder)> {
        Expr::item().asc()
    }

    fn make(values: &[i64], keys: Vec<(Expr, SortOrder)>) -> (SortState, Vec<Value>, FaultList) {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (st, out) = SortState::init(keys, &ints(values), &mut faults, &mut evals);
        (st, out, faults)
    }

    #[test]
    fn test_init_sorts() {
        let (_, out, faults) = make(&[3, 1, 2], asc());
        assert_eq!(out, ints(&[1, 2, 3]));
        assert!(faults.is_empty());
    }

    #[test]
    fn test_descending() {
        let (_, out, _) = make(&[3, 1, 2], Expr::item().desc());
        assert_eq!(out, ints(&[3, 2, 1]));
    }

    #[test]
    fn test_insert_binary_searches() {
        let (mut st, mut out, mut faults) = make(&[3, 1, 2], asc());
        let mut evals = 0;
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::insert_one(3, Value::Int64(5)),
            &[],
            &mut evals,
        );
        assert_eq!(emitted, vec![ListChange::insert_one(3, Value::Int64(5))]);
        assert_eq!(out, ints(&[1, 2, 3, 5]));

        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::insert_one(0, Value::Int64(0)),
            &[],
            &mut evals,
        );
        assert_eq!(emitted, vec![ListChange::insert_one(0, Value::Int64(0))]);
        assert_eq!(out, ints(&[0, 1, 2, 3, 5]));
    }

    #[test]
    fn test_remove_uses_slot_table() {
        let (mut st, mut out, mut faults) = make(&[3, 1, 2], asc());
        let mut evals = 0;
        // Remove upstream position 0 (the value 3, sorted position 2).
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::remove_one(0, Value::Int64(3)),
            &[],
            &mut evals,
        );
        assert_eq!(emitted, vec![ListChange::remove_one(2, Value::Int64(3))]);
        assert_eq!(out, ints(&[1, 2]));
    }

    #[test]
    fn test_key_change_walks_and_moves() {
        let (mut st, mut out, mut faults) = make(&[3, 1, 2], asc());
        let mut evals = 0;
        // Upstream position 1 (value 1, sorted position 0) becomes 9.
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::replace_one(1, Value::Int64(1), Value::Int64(9)),
            &[],
            &mut evals,
        );
        assert_eq!(
            emitted,
            vec![
                ListChange::replace_one(0, Value::Int64(1), Value::Int64(9)),
                ListChange::Move {
                    from: 0,
                    to: 2,
                    len: 1,
                },
            ]
        );
        assert_eq!(out, ints(&[2, 3, 9]));
    }

    #[test]
    fn test_upstream_move_emits_nothing() {
        let (mut st, mut out, mut faults) = make(&[3, 1, 2], asc());
        let mut evals = 0;
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::Move {
                from: 0,
                to: 2,
                len: 1,
            },
            &[],
            &mut evals,
        );
        assert!(emitted.is_empty());
        assert_eq!(out, ints(&[1, 2, 3]));

        // The slot table must still route removals correctly: upstream is
        // now [1, 2, 3], so removing position 2 removes the value 3.
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::remove_one(2, Value::Int64(3)),
            &[],
            &mut evals,
        );
        assert_eq!(emitted, vec![ListChange::remove_one(2, Value::Int64(3))]);
        assert_eq!(out, ints(&[1, 2]));
    }

    #[test]
    fn test_faulted_key_sorts_last() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let items = vec![Value::Int64(2), Value::from("x"), Value::Int64(1)];
        // item * 1 faults on the string.
        let key = Expr::mul(Expr::item(), Expr::literal(1i64)).asc();
        let (_, out) = SortState::init(key, &items, &mut faults, &mut evals);
        assert_eq!(out, vec![Value::Int64(1), Value::Int64(2), Value::from("x")]);
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn test_multi_key_lexicographic() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let items = vec![
            Value::Array(ints(&[1, 9])),
            Value::Array(ints(&[0, 5])),
            Value::Array(ints(&[1, 2])),
        ];
        let keys = vec![
            (Expr::index(Expr::item(), 0), SortOrder::Asc),
            (Expr::index(Expr::item(), 1), SortOrder::Desc),
        ];
        let (_, out) = SortState::init(keys, &items, &mut faults, &mut evals);
        assert_eq!(
            out,
            vec![
                Value::Array(ints(&[0, 5])),
                Value::Array(ints(&[1, 9])),
                Value::Array(ints(&[1, 2])),
            ]
        );
    }
}
