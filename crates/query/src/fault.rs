//! Per-node fault aggregation.
//!
//! Every node keeps one `FaultList` recording which of its elements
//! currently cannot be evaluated. Merging and unmerging happen per affected
//! element as changes arrive; only a Reset discards the whole list. A node's
//! operation fault is the merged view of its entries.

use alloc::format;
use alloc::vec::Vec;
use rivus_core::{Error, Value};

/// Identifies the element a fault is attributed to.
#[derive(Clone, Debug, PartialEq)]
pub enum FaultKey {
    /// Source position, for list-shaped upstreams. Shifted as elements are
    /// inserted and removed around it.
    Position(usize),
    /// Source key, for dictionary-shaped upstreams.
    Key(Value),
}

/// Ordered per-element fault entries for one node.
#[derive(Default)]
pub struct FaultList {
    entries: Vec<(FaultKey, Error)>,
}

impl FaultList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(FaultKey, Error)] {
        &self.entries
    }

    /// The merged operation fault: None when every element evaluates, the
    /// single fault when one element is bad, a summary otherwise.
    pub fn merged(&self) -> Option<Error> {
        match self.entries.len() {
            0 => None,
            1 => Some(self.entries[0].1.clone()),
            n => Some(Error::evaluation(format!(
                "{} elements faulted; first: {}",
                n, self.entries[0].1
            ))),
        }
    }

    /// Records or clears the fault for a source position.
    pub fn set_position(&mut self, pos: usize, fault: Option<Error>) {
        let existing = self
            .entries
            .iter()
            .position(|(k, _)| matches!(k, FaultKey::Position(p) if *p == pos));
        match (existing, fault) {
            (Some(i), Some(err)) => self.entries[i].1 = err,
            (Some(i), None) => {
                self.entries.remove(i);
            }
            (None, Some(err)) => self.entries.push((FaultKey::Position(pos), err)),
            (None, None) => {}
        }
    }

    /// Records or clears the fault for a source key.
    pub fn set_key(&mut self, key: &Value, fault: Option<Error>) {
        let existing = self
            .entries
            .iter()
            .position(|(k, _)| matches!(k, FaultKey::Key(v) if v == key));
        match (existing, fault) {
            (Some(i), Some(err)) => self.entries[i].1 = err,
            (Some(i), None) => {
                self.entries.remove(i);
            }
            (None, Some(err)) => self.entries.push((FaultKey::Key(key.clone()), err)),
            (None, None) => {}
        }
    }

    /// Shifts position keys at or after `pos` up by `count` (elements were
    /// inserted before them).
    pub fn shift_inserted(&mut self, pos: usize, count: usize) {
        for (key, _) in &mut self.entries {
            if let FaultKey::Position(p) = key {
                if *p >= pos {
                    *p += count;
                }
            }
        }
    }

    /// Drops entries for positions in `pos..pos + count` and shifts later
    /// position keys down.
    pub fn shift_removed(&mut self, pos: usize, count: usize) {
        self.entries.retain(|(key, _)| match key {
            FaultKey::Position(p) => !(*p >= pos && *p < pos + count),
            FaultKey::Key(_) => true,
        });
        for (key, _) in &mut self.entries {
            if let FaultKey::Position(p) = key {
                if *p >= pos + count {
                    *p -= count;
                }
            }
        }
    }

    /// Remaps position keys across a move of `len` elements from `from` to
    /// `to` (destination measured after removal).
    pub fn apply_move(&mut self, from: usize, to: usize, len: usize) {
        for (key, _) in &mut self.entries {
            if let FaultKey::Position(p) = key {
                if *p >= from && *p < from + len {
                    *p = to + (*p - from);
                } else if *p > from {
                    // Position after the removed run shifts down, then the
                    // reinsertion at `to` may shift it back up.
                    let mut q = *p - len;
                    if q >= to {
                        q += len;
                    }
                    *p = q;
                } else if *p >= to {
                    *p += len;
                }
            }
        }
    }

    /// Discards everything. Used on Reset before a rebuild.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
