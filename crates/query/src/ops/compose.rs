//! Operators composed from change translation alone.
//!
//! Concat, Distinct and IndividualChanges carry no evaluators; they only
//! reshape upstream notifications. Their emissions are applied to the
//! node's own output through the replay helpers, so the completeness
//! contract holds by construction.

use alloc::vec::Vec;
use rivus_collections::{apply_list_change, ListChange, MapChange};
use rivus_core::Value;

fn offset_by(change: &ListChange, offset: usize) -> ListChange {
    match change {
        ListChange::Insert { index, items } => ListChange::Insert {
            index: index + offset,
            items: items.clone(),
        },
        ListChange::Remove { index, items } => ListChange::Remove {
            index: index + offset,
            items: items.clone(),
        },
        ListChange::Replace { index, old, new } => ListChange::Replace {
            index: index + offset,
            old: old.clone(),
            new: new.clone(),
        },
        ListChange::Move { from, to, len } => ListChange::Move {
            from: from + offset,
            to: to + offset,
            len: *len,
        },
        ListChange::Reset => ListChange::Reset,
    }
}

/// Translates an upstream change for a two-input concatenation. The same
/// node may feed both halves, in which case the change applies to each in
/// turn.
pub(crate) fn concat_apply(
    change: &ListChange,
    is_left: bool,
    is_right: bool,
    left_len: &mut usize,
    left_out: &[Value],
    right_out: &[Value],
    output: &mut Vec<Value>,
) -> Vec<ListChange> {
    if matches!(change, ListChange::Reset) {
        let mut rebuilt = left_out.to_vec();
        rebuilt.extend_from_slice(right_out);
        *left_len = left_out.len();
        *output = rebuilt;
        return alloc::vec![ListChange::Reset];
    }

    let mut emitted = Vec::new();
    if is_left {
        apply_list_change(output, change, &[]);
        match change {
            ListChange::Insert { items, .. } => *left_len += items.len(),
            ListChange::Remove { items, .. } => *left_len -= items.len(),
            _ => {}
        }
        emitted.push(change.clone());
    }
    if is_right {
        let translated = offset_by(change, *left_len);
        apply_list_change(output, &translated, &[]);
        emitted.push(translated);
    }
    emitted
}

/// Re-emits a batched change as single-element changes, in order. A Reset
/// becomes single-element Removes back to front followed by Inserts.
pub(crate) fn individual_apply(
    change: &ListChange,
    output: &mut Vec<Value>,
    upstream_after: &[Value],
) -> Vec<ListChange> {
    let emitted = match change {
        ListChange::Insert { index, items } => items
            .iter()
            .enumerate()
            .map(|(j, item)| ListChange::insert_one(index + j, item.clone()))
            .collect(),
        ListChange::Remove { index, items } => items
            .iter()
            .map(|item| ListChange::remove_one(*index, item.clone()))
            .collect(),
        ListChange::Replace { index, old, new } => old
            .iter()
            .zip(new.iter())
            .enumerate()
            .map(|(j, (o, n))| ListChange::replace_one(index + j, o.clone(), n.clone()))
            .collect(),
        ListChange::Move { from, to, len } => {
            let mut singles = Vec::with_capacity(*len);
            if from < to {
                for _ in 0..*len {
                    singles.push(ListChange::Move {
                        from: *from,
                        to: to + len - 1,
                        len: 1,
                    });
                }
            } else {
                for i in 0..*len {
                    singles.push(ListChange::Move {
                        from: from + i,
                        to: to + i,
                        len: 1,
                    });
                }
            }
            singles
        }
        ListChange::Reset => {
            let mut singles = Vec::with_capacity(output.len() + upstream_after.len());
            for i in (0..output.len()).rev() {
                singles.push(ListChange::remove_one(i, output[i].clone()));
            }
            for (i, item) in upstream_after.iter().enumerate() {
                singles.push(ListChange::insert_one(i, item.clone()));
            }
            *output = upstream_after.to_vec();
            return singles;
        }
    };
    for single in &emitted {
        apply_list_change(output, single, &[]);
    }
    emitted
}

/// Translates group-node changes into the distinct projection of group
/// keys, preserving first-occurrence order.
pub(crate) fn distinct_apply(
    change: &MapChange,
    output: &mut Vec<Value>,
    group_after: &[(Value, Value)],
) -> Vec<ListChange> {
    match change {
        MapChange::Insert { entries } => {
            // The group node appends new keys at first occurrence.
            let mut emitted = Vec::with_capacity(entries.len());
            for (key, _) in entries {
                emitted.push(ListChange::insert_one(output.len(), key.clone()));
                output.push(key.clone());
            }
            emitted
        }
        MapChange::Remove { entries } => {
            let mut emitted = Vec::with_capacity(entries.len());
            for (key, _) in entries {
                let pos = output
                    .iter()
                    .position(|k| k == key)
                    .expect("distinct output missing a removed group key");
                output.remove(pos);
                emitted.push(ListChange::remove_one(pos, key.clone()));
            }
            emitted
        }
        // Membership churn within a surviving group leaves the key set
        // untouched.
        MapChange::Replace { .. } => Vec::new(),
        MapChange::Reset => {
            *output = group_after.iter().map(|(k, _)| k.clone()).collect();
            alloc::vec![ListChange::Reset]
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

    #[test]
    fn test_concat_right_offsets() {
        let mut output = ints(&[1, 2, 10]);
        let mut left_len = 2;
        let emitted = concat_apply(
            &ListChange::insert_one(1, Value::Int64(11)),
            false,
            true,
            &mut left_len,
            &[],
            &[],
            &mut output,
        );
        assert_eq!(emitted, vec![ListChange::insert_one(3, Value::Int64(11))]);
        assert_eq!(output, ints(&[1, 2, 10, 11]));
    }

    #[test]
    fn test_concat_left_adjusts_boundary() {
        let mut output = ints(&[1, 2, 10]);
        let mut left_len = 2;
        concat_apply(
            &ListChange::remove_one(0, Value::Int64(1)),
            true,
            false,
            &mut left_len,
            &[],
            &[],
            &mut output,
        );
        assert_eq!(left_len, 1);
        assert_eq!(output, ints(&[2, 10]));
    }

    #[test]
    fn test_individual_splits_batches() {
        let mut output = ints(&[1, 4]);
        let emitted = individual_apply(
            &ListChange::Insert {
                index: 1,
                items: ints(&[2, 3]),
            },
            &mut output,
            &[],
        );
        assert_eq!(
            emitted,
            vec![
                ListChange::insert_one(1, Value::Int64(2)),
                ListChange::insert_one(2, Value::Int64(3)),
            ]
        );
        assert_eq!(output, ints(&[1, 2, 3, 4]));

        let emitted = individual_apply(
            &ListChange::Remove {
                index: 1,
                items: ints(&[2, 3]),
            },
            &mut output,
            &[],
        );
        assert_eq!(
            emitted,
            vec![
                ListChange::remove_one(1, Value::Int64(2)),
                ListChange::remove_one(1, Value::Int64(3)),
            ]
        );
        assert_eq!(output, ints(&[1, 4]));
    }

    #[test]
    fn test_individual_move_decomposition() {
        // Forward and backward batch moves decompose into single moves
        // that replay to the same result.
        for (from, to, len, start) in [(0usize, 2usize, 2usize, [1i64, 2, 3, 4])] {
            let mut batched = ints(&start);
            apply_list_change(&mut batched, &ListChange::Move { from, to, len }, &[]);

            let mut singles = ints(&start);
            individual_apply(&ListChange::Move { from, to, len }, &mut singles, &[]);
            assert_eq!(batched, singles);
        }

        let mut batched = ints(&[1, 2, 3, 4]);
        apply_list_change(
            &mut batched,
            &ListChange::Move {
                from: 2,
                to: 0,
                len: 2,
            },
            &[],
        );
        let mut singles = ints(&[1, 2, 3, 4]);
        individual_apply(
            &ListChange::Move {
                from: 2,
                to: 0,
                len: 2,
            },
            &mut singles,
            &[],
        );
        assert_eq!(batched, singles);
    }

    #[test]
    fn test_individual_reset_decomposition() {
        let mut output = ints(&[1, 2]);
        let emitted = individual_apply(&ListChange::Reset, &mut output, &ints(&[7, 8, 9]));
        assert_eq!(emitted.len(), 5);
        assert_eq!(output, ints(&[7, 8, 9]));
        assert_eq!(emitted[0], ListChange::remove_one(1, Value::Int64(2)));
        assert_eq!(emitted[2], ListChange::insert_one(0, Value::Int64(7)));
    }

    #[test]
    fn test_distinct_translation() {
        let mut output = vec![Value::Int64(1), Value::Int64(0)];
        let emitted = distinct_apply(
            &MapChange::remove_one(Value::Int64(1), Value::Array(vec![])),
            &mut output,
            &[],
        );
        assert_eq!(emitted, vec![ListChange::remove_one(0, Value::Int64(1))]);
        assert_eq!(output, vec![Value::Int64(0)]);
    }
}
