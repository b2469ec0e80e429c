//! Change notifications.
//!
//! One value describes one atomic mutation. The engine's contract is that
//! replaying a node's emitted changes onto a copy of its previous output
//! reproduces its current output exactly; the `apply_*` helpers here are
//! that replay.

use alloc::vec::Vec;
use rivus_core::Value;

/// An atomic mutation of a list-shaped collection.
#[derive(Clone, Debug, PartialEq)]
pub enum ListChange {
    /// Items inserted starting at `index`.
    Insert { index: usize, items: Vec<Value> },
    /// Items removed starting at `index`.
    Remove { index: usize, items: Vec<Value> },
    /// Items starting at `index` replaced in place; `old` and `new` have
    /// equal length.
    Replace {
        index: usize,
        old: Vec<Value>,
        new: Vec<Value>,
    },
    /// `len` items moved from `from` to `to` (destination index measured
    /// after removal).
    Move { from: usize, to: usize, len: usize },
    /// Discard everything; the result must be rebuilt from current source
    /// state.
    Reset,
}

impl ListChange {
    /// Single-item insert.
    pub fn insert_one(index: usize, item: Value) -> Self {
        ListChange::Insert {
            index,
            items: alloc::vec![item],
        }
    }

    /// Single-item remove.
    pub fn remove_one(index: usize, item: Value) -> Self {
        ListChange::Remove {
            index,
            items: alloc::vec![item],
        }
    }

    /// Single-item replace.
    pub fn replace_one(index: usize, old: Value, new: Value) -> Self {
        ListChange::Replace {
            index,
            old: alloc::vec![old],
            new: alloc::vec![new],
        }
    }

    /// Returns true if this change carries no items (and is not a Reset or
    /// Move).
    pub fn is_empty(&self) -> bool {
        match self {
            ListChange::Insert { items, .. } | ListChange::Remove { items, .. } => items.is_empty(),
            ListChange::Replace { new, .. } => new.is_empty(),
            ListChange::Move { len, .. } => *len == 0,
            ListChange::Reset => false,
        }
    }
}

/// An atomic mutation of a dictionary-shaped collection.
#[derive(Clone, Debug, PartialEq)]
pub enum MapChange {
    /// New entries added.
    Insert { entries: Vec<(Value, Value)> },
    /// Entries removed.
    Remove { entries: Vec<(Value, Value)> },
    /// The value for `key` changed.
    Replace { key: Value, old: Value, new: Value },
    /// Discard everything; the result must be rebuilt from current source
    /// state.
    Reset,
}

impl MapChange {
    /// Single-entry insert.
    pub fn insert_one(key: Value, value: Value) -> Self {
        MapChange::Insert {
            entries: alloc::vec![(key, value)],
        }
    }

    /// Single-entry remove.
    pub fn remove_one(key: Value, value: Value) -> Self {
        MapChange::Remove {
            entries: alloc::vec![(key, value)],
        }
    }
}

/// Applies a list change to a snapshot. `current` supplies the rebuilt
/// contents for a Reset.
///
/// Panics on indices outside the snapshot: an out-of-range replayed change
/// means the emitting node broke the notification-completeness contract.
pub fn apply_list_change(target: &mut Vec<Value>, change: &ListChange, current: &[Value]) {
    match change {
        ListChange::Insert { index, items } => {
            assert!(*index <= target.len(), "insert index out of range in replay");
            target.splice(*index..*index, items.iter().cloned());
        }
        ListChange::Remove { index, items } => {
            assert!(
                index + items.len() <= target.len(),
                "remove range out of range in replay"
            );
            target.drain(*index..index + items.len());
        }
        ListChange::Replace { index, new, .. } => {
            assert!(
                index + new.len() <= target.len(),
                "replace range out of range in replay"
            );
            target[*index..index + new.len()].clone_from_slice(new);
        }
        ListChange::Move { from, to, len } => {
            assert!(from + len <= target.len(), "move source out of range in replay");
            let items: Vec<Value> = target.drain(*from..from + len).collect();
            assert!(*to <= target.len(), "move destination out of range in replay");
            target.splice(*to..*to, items);
        }
        ListChange::Reset => {
            target.clear();
            target.extend_from_slice(current);
        }
    }
}

/// Applies a map change to an insertion-ordered snapshot of pairs.
pub fn apply_map_change(
    target: &mut Vec<(Value, Value)>,
    change: &MapChange,
    current: &[(Value, Value)],
) {
    match change {
        MapChange::Insert { entries } => {
            target.extend_from_slice(entries);
        }
        MapChange::Remove { entries } => {
            for (key, _) in entries {
                let pos = target
                    .iter()
                    .position(|(k, _)| k == key)
                    .expect("removed key missing in replay");
                target.remove(pos);
            }
        }
        MapChange::Replace { key, new, .. } => {
            let entry = target
                .iter_mut()
                .find(|(k, _)| k == key)
                .expect("replaced key missing in replay");
            entry.1 = new.clone();
        }
        MapChange::Reset => {
            target.clear();
            target.extend_from_slice(current);
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
    fn test_apply_insert() {
        let mut snap = ints(&[1, 3]);
        apply_list_change(
            &mut snap,
            &ListChange::insert_one(1, Value::Int64(2)),
            &[],
        );
        assert_eq!(snap, ints(&[1, 2, 3]));
    }

    #[test]
    fn test_apply_remove_range() {
        let mut snap = ints(&[1, 2, 3, 4]);
        apply_list_change(
            &mut snap,
            &ListChange::Remove {
                index: 1,
                items: ints(&[2, 3]),
            },
            &[],
        );
        assert_eq!(snap, ints(&[1, 4]));
    }

    #[test]
    fn test_apply_replace() {
        let mut snap = ints(&[1, 2, 3]);
        apply_list_change(
            &mut snap,
            &ListChange::replace_one(1, Value::Int64(2), Value::Int64(9)),
            &[],
        );
        assert_eq!(snap, ints(&[1, 9, 3]));
    }

    #[test]
    fn test_apply_move() {
        let mut snap = ints(&[1, 2, 3, 4]);
        apply_list_change(
            &mut snap,
            &ListChange::Move {
                from: 0,
                to: 2,
                len: 2,
            },
            &[],
        );
        assert_eq!(snap, ints(&[3, 4, 1, 2]));
    }

    #[test]
    fn test_apply_reset() {
        let mut snap = ints(&[1, 2]);
        let current = ints(&[7, 8, 9]);
        apply_list_change(&mut snap, &ListChange::Reset, &current);
        assert_eq!(snap, current);
    }

    #[test]
    fn test_apply_map_changes() {
        let mut snap = vec![(Value::Int64(1), Value::Int64(10))];
        apply_map_change(
            &mut snap,
            &MapChange::insert_one(Value::Int64(2), Value::Int64(20)),
            &[],
        );
        apply_map_change(
            &mut snap,
            &MapChange::Replace {
                key: Value::Int64(1),
                old: Value::Int64(10),
                new: Value::Int64(11),
            },
            &[],
        );
        assert_eq!(
            snap,
            vec![
                (Value::Int64(1), Value::Int64(11)),
                (Value::Int64(2), Value::Int64(20)),
            ]
        );

        apply_map_change(
            &mut snap,
            &MapChange::remove_one(Value::Int64(1), Value::Int64(11)),
            &[],
        );
        assert_eq!(snap, vec![(Value::Int64(2), Value::Int64(20))]);
    }
}
