//! Incremental grouping.
//!
//! Output is dictionary-shaped: group key -> Array of members, entries
//! ordered by first occurrence of each key. The side table is the evaluated
//! group key per upstream position; a member's index within its group is
//! the number of earlier same-key positions. The first member of a new key
//! emits one Insert carrying the whole group; removing the last member
//! emits the group's Remove; anything else is a Replace of the member
//! array. Elements whose key selector faults belong to no group.

use crate::fault::FaultList;
use alloc::vec::Vec;
use rivus_collections::{ListChange, MapChange};
use rivus_core::{Result, Value};
use rivus_expr::{eval, EvalContext, Expr};

pub(crate) struct GroupByState {
    key_selector: Expr,
    /// Evaluated group key per upstream position.
    keys: Vec<Result<Value>>,
}

fn find_entry(output: &[(Value, Value)], key: &Value) -> Option<usize> {
    output.iter().position(|(k, _)| k == key)
}

impl GroupByState {
    pub fn init(
        key_selector: Expr,
        upstream: &[Value],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<(Value, Value)>) {
        let mut state = Self {
            key_selector,
            keys: Vec::new(),
        };
        let output = state.rebuild(upstream, faults, evals);
        (state, output)
    }

    fn eval_key(&self, item: &Value, evals: &mut u64) -> Result<Value> {
        *evals += 1;
        eval(&self.key_selector, &EvalContext::item(item))
    }

    fn rebuild(
        &mut self,
        upstream: &[Value],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> Vec<(Value, Value)> {
        faults.clear();
        self.keys = upstream
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let key = self.eval_key(item, evals);
                faults.set_position(pos, key.as_ref().err().cloned());
                key
            })
            .collect();
        Self::bucketize(&self.keys, upstream)
    }

    fn bucketize(keys: &[Result<Value>], upstream: &[Value]) -> Vec<(Value, Value)> {
        let mut output: Vec<(Value, Value)> = Vec::new();
        for (pos, key) in keys.iter().enumerate() {
            if let Ok(k) = key {
                match find_entry(&output, k) {
                    Some(ei) => match &mut output[ei].1 {
                        Value::Array(members) => members.push(upstream[pos].clone()),
                        _ => unreachable!("group members are arrays"),
                    },
                    None => output.push((
                        k.clone(),
                        Value::Array(alloc::vec![upstream[pos].clone()]),
                    )),
                }
            }
        }
        output
    }

    /// Index of upstream position `pos` within its group's member array.
    fn member_index(&self, pos: usize, key: &Value) -> usize {
        self.keys[..pos]
            .iter()
            .filter(|r| matches!(r, Ok(v) if v == key))
            .count()
    }

    fn add_member(
        output: &mut Vec<(Value, Value)>,
        key: &Value,
        item: &Value,
        member_idx: usize,
    ) -> MapChange {
        match find_entry(output, key) {
            Some(ei) => {
                let old = output[ei].1.clone();
                match &mut output[ei].1 {
                    Value::Array(members) => members.insert(member_idx, item.clone()),
                    _ => unreachable!("group members are arrays"),
                }
                MapChange::Replace {
                    key: key.clone(),
                    old,
                    new: output[ei].1.clone(),
                }
            }
            None => {
                let group = Value::Array(alloc::vec![item.clone()]);
                output.push((key.clone(), group.clone()));
                MapChange::insert_one(key.clone(), group)
            }
        }
    }

    fn remove_member(
        output: &mut Vec<(Value, Value)>,
        key: &Value,
        member_idx: usize,
    ) -> MapChange {
        let ei = find_entry(output, key).expect("group entry missing for tracked key");
        let old = output[ei].1.clone();
        let emptied = match &mut output[ei].1 {
            Value::Array(members) => {
                members.remove(member_idx);
                members.is_empty()
            }
            _ => unreachable!("group members are arrays"),
        };
        if emptied {
            output.remove(ei);
            MapChange::remove_one(key.clone(), old)
        } else {
            MapChange::Replace {
                key: key.clone(),
                old,
                new: output[ei].1.clone(),
            }
        }
    }

    pub fn apply(
        &mut self,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
        change: &ListChange,
        upstream_after: &[Value],
        evals: &mut u64,
    ) -> Vec<MapChange> {
        match change {
            ListChange::Insert { index, items } => {
                faults.shift_inserted(*index, items.len());
                let mut emitted = Vec::new();
                for (j, item) in items.iter().enumerate() {
                    let pos = index + j;
                    let key = self.eval_key(item, evals);
                    faults.set_position(pos, key.as_ref().err().cloned());
                    self.keys.insert(pos, key.clone());
                    if let Ok(k) = &key {
                        let mi = self.member_index(pos, k);
                        emitted.push(Self::add_member(output, k, item, mi));
                    }
                }
                emitted
            }
            ListChange::Remove { index, items } => {
                faults.shift_removed(*index, items.len());
                let mut emitted = Vec::new();
                for _ in 0..items.len() {
                    let key = self.keys.remove(*index);
                    if let Ok(k) = key {
                        let mi = self.member_index(*index, &k);
                        emitted.push(Self::remove_member(output, &k, mi));
                    }
                }
                emitted
            }
            ListChange::Replace { index, old, new } => {
                let mut emitted = Vec::new();
                for (j, item) in new.iter().enumerate() {
                    let pos = index + j;
                    let new_key = self.eval_key(item, evals);
                    faults.set_position(pos, new_key.as_ref().err().cloned());
                    let old_key = self.keys[pos].clone();

                    match (&old_key, &new_key) {
                        (Ok(ok), Ok(nk)) if ok == nk => {
                            if old[j] != new[j] {
                                let ei = find_entry(output, ok)
                                    .expect("group entry missing for tracked key");
                                let mi = self.member_index(pos, ok);
                                let prev = output[ei].1.clone();
                                match &mut output[ei].1 {
                                    Value::Array(members) => members[mi] = item.clone(),
                                    _ => unreachable!("group members are arrays"),
                                }
                                emitted.push(MapChange::Replace {
                                    key: ok.clone(),
                                    old: prev,
                                    new: output[ei].1.clone(),
                                });
                            }
                        }
                        _ => {
                            if let Ok(ok) = &old_key {
                                let mi = self.member_index(pos, ok);
                                emitted.push(Self::remove_member(output, ok, mi));
                            }
                            self.keys[pos] = new_key.clone();
                            if let Ok(nk) = &new_key {
                                let mi = self.member_index(pos, nk);
                                emitted.push(Self::add_member(output, nk, item, mi));
                            }
                        }
                    }
                    self.keys[pos] = new_key;
                }
                emitted
            }
            ListChange::Move { from, to, len } => {
                let moved: Vec<Result<Value>> = self.keys.drain(*from..from + len).collect();
                self.keys.splice(*to..*to, moved);
                faults.apply_move(*from, *to, *len);

                let rebuilt = Self::bucketize(&self.keys, upstream_after);
                let same_key_order = rebuilt.len() == output.len()
                    && rebuilt.iter().zip(output.iter()).all(|(a, b)| a.0 == b.0);
                if !same_key_order {
                    *output = rebuilt;
                    return alloc::vec![MapChange::Reset];
                }
                let mut emitted = Vec::new();
                for (ei, (key, new_members)) in rebuilt.into_iter().enumerate() {
                    if output[ei].1 != new_members {
                        let old = core::mem::replace(&mut output[ei].1, new_members.clone());
                        emitted.push(MapChange::Replace {
                            key,
                            old,
                            new: new_members,
                        });
                    }
                }
                emitted
            }
            ListChange::Reset => {
                *output = self.rebuild(upstream_after, faults, evals);
                alloc::vec![MapChange::Reset]
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

    fn parity() -> Expr {
        Expr::rem(Expr::item(), Expr::literal(2i64))
    }

    #[test]
    fn test_init_groups_by_first_occurrence() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (_, out) = GroupByState::init(parity(), &ints(&[3, 4, 5, 6]), &mut faults, &mut evals);
        assert_eq!(
            out,
            vec![
                (Value::Int64(1), Value::Array(ints(&[3, 5]))),
                (Value::Int64(0), Value::Array(ints(&[4, 6]))),
            ]
        );
    }

    #[test]
    fn test_first_member_inserts_group() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (mut st, mut out) = GroupByState::init(parity(), &ints(&[3]), &mut faults, &mut evals);

        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::insert_one(1, Value::Int64(4)),
            &[],
            &mut evals,
        );
        assert_eq!(
            emitted,
            vec![MapChange::insert_one(
                Value::Int64(0),
                Value::Array(ints(&[4]))
            )]
        );
    }

    #[test]
    fn test_last_member_removes_group() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (mut st, mut out) =
            GroupByState::init(parity(), &ints(&[3, 4, 5]), &mut faults, &mut evals);

        // Remove the only even element.
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::remove_one(1, Value::Int64(4)),
            &[],
            &mut evals,
        );
        assert_eq!(
            emitted,
            vec![MapChange::remove_one(
                Value::Int64(0),
                Value::Array(ints(&[4]))
            )]
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_membership_change_replaces_both_groups() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let (mut st, mut out) =
            GroupByState::init(parity(), &ints(&[3, 4, 5]), &mut faults, &mut evals);

        // 5 -> 6 moves from the odd group to the even group.
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::replace_one(2, Value::Int64(5), Value::Int64(6)),
            &[],
            &mut evals,
        );
        assert_eq!(
            emitted,
            vec![
                MapChange::Replace {
                    key: Value::Int64(1),
                    old: Value::Array(ints(&[3, 5])),
                    new: Value::Array(ints(&[3])),
                },
                MapChange::Replace {
                    key: Value::Int64(0),
                    old: Value::Array(ints(&[4])),
                    new: Value::Array(ints(&[4, 6])),
                },
            ]
        );
    }

    #[test]
    fn test_move_reorders_members() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let upstream = ints(&[3, 5, 4]);
        let (mut st, mut out) = GroupByState::init(parity(), &upstream, &mut faults, &mut evals);
        assert_eq!(out[0].1, Value::Array(ints(&[3, 5])));

        // [3,5,4] -> [5,3,4]: member order within the odd group flips.
        let after = ints(&[5, 3, 4]);
        let emitted = st.apply(
            &mut out,
            &mut faults,
            &ListChange::Move {
                from: 0,
                to: 1,
                len: 1,
            },
            &after,
            &mut evals,
        );
        assert_eq!(
            emitted,
            vec![MapChange::Replace {
                key: Value::Int64(1),
                old: Value::Array(ints(&[3, 5])),
                new: Value::Array(ints(&[5, 3])),
            }]
        );
    }

    #[test]
    fn test_faulting_key_joins_no_group() {
        let mut faults = FaultList::new();
        let mut evals = 0;
        let items = vec![Value::Int64(3), Value::from("x")];
        let (_, out) = GroupByState::init(parity(), &items, &mut faults, &mut evals);
        assert_eq!(out.len(), 1);
        assert_eq!(faults.len(), 1);
    }
}
