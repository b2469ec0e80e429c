//! Incremental dictionary operators.
//!
//! `MapFilterState` filters key/value pairs with the same minimality
//! contract as the list filter. `MapSelectState` projects each source entry
//! to a new (key, value) pair and owns the structural-fault bookkeeping:
//! null projected keys fault the source entry, duplicate projected keys
//! keep a contributor list in source arrival order so that removing the
//! winning contributor re-admits the first remaining duplicate, and the
//! duplicate fault clears only once a single contributor remains.

use crate::fault::FaultList;
use alloc::vec::Vec;
use hashbrown::HashMap;
use rivus_collections::MapChange;
use rivus_core::{Error, Result, Value};
use rivus_expr::{eval, eval_predicate, EvalContext, Expr};

#[derive(Clone, Copy, PartialEq)]
enum PairSlot {
    Pass,
    Fail,
    Fault,
}

pub(crate) struct MapFilterState {
    predicate: Expr,
    slots: HashMap<Value, PairSlot>,
}

impl MapFilterState {
    pub fn init(
        predicate: Expr,
        upstream: &[(Value, Value)],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<(Value, Value)>) {
        let mut state = Self {
            predicate,
            slots: HashMap::new(),
        };
        let output = state.rebuild(upstream, faults, evals);
        (state, output)
    }

    fn rebuild(
        &mut self,
        upstream: &[(Value, Value)],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> Vec<(Value, Value)> {
        self.slots.clear();
        faults.clear();
        let mut output = Vec::new();
        for (key, value) in upstream {
            let (slot, fault) = self.evaluate(key, value, evals);
            if slot == PairSlot::Pass {
                output.push((key.clone(), value.clone()));
            }
            faults.set_key(key, fault);
            self.slots.insert(key.clone(), slot);
        }
        output
    }

    fn evaluate(&self, key: &Value, value: &Value, evals: &mut u64) -> (PairSlot, Option<Error>) {
        *evals += 1;
        match eval_predicate(&self.predicate, &EvalContext::pair(key, value)) {
            Ok(true) => (PairSlot::Pass, None),
            Ok(false) => (PairSlot::Fail, None),
            Err(err) => (PairSlot::Fault, Some(err)),
        }
    }

    pub fn apply(
        &mut self,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
        change: &MapChange,
        upstream_after: &[(Value, Value)],
        evals: &mut u64,
    ) -> Vec<MapChange> {
        match change {
            MapChange::Insert { entries } => {
                let mut passing = Vec::new();
                for (key, value) in entries {
                    let (slot, fault) = self.evaluate(key, value, evals);
                    if slot == PairSlot::Pass {
                        passing.push((key.clone(), value.clone()));
                    }
                    faults.set_key(key, fault);
                    self.slots.insert(key.clone(), slot);
                }
                if passing.is_empty() {
                    return Vec::new();
                }
                output.extend_from_slice(&passing);
                alloc::vec![MapChange::Insert { entries: passing }]
            }
            MapChange::Remove { entries } => {
                let mut removed = Vec::new();
                for (key, _) in entries {
                    let slot = self.slots.remove(key);
                    faults.set_key(key, None);
                    if slot == Some(PairSlot::Pass) {
                        let pos = output
                            .iter()
                            .position(|(k, _)| k == key)
                            .expect("passing entry missing from filtered output");
                        removed.push(output.remove(pos));
                    }
                }
                if removed.is_empty() {
                    return Vec::new();
                }
                alloc::vec![MapChange::Remove { entries: removed }]
            }
            MapChange::Replace { key, new, .. } => {
                let (slot, fault) = self.evaluate(key, new, evals);
                let old_slot = self.slots.insert(key.clone(), slot);
                faults.set_key(key, fault);
                match (old_slot, slot) {
                    (Some(PairSlot::Pass), PairSlot::Pass) => {
                        let pos = output
                            .iter()
                            .position(|(k, _)| k == key)
                            .expect("passing entry missing from filtered output");
                        let old_value = core::mem::replace(&mut output[pos].1, new.clone());
                        if old_value == *new {
                            return Vec::new();
                        }
                        alloc::vec![MapChange::Replace {
                            key: key.clone(),
                            old: old_value,
                            new: new.clone(),
                        }]
                    }
                    (Some(PairSlot::Pass), _) => {
                        let pos = output
                            .iter()
                            .position(|(k, _)| k == key)
                            .expect("passing entry missing from filtered output");
                        let removed = output.remove(pos);
                        alloc::vec![MapChange::Remove {
                            entries: alloc::vec![removed],
                        }]
                    }
                    (_, PairSlot::Pass) => {
                        output.push((key.clone(), new.clone()));
                        alloc::vec![MapChange::insert_one(key.clone(), new.clone())]
                    }
                    _ => Vec::new(),
                }
            }
            MapChange::Reset => {
                *output = self.rebuild(upstream_after, faults, evals);
                alloc::vec![MapChange::Reset]
            }
        }
    }
}

/// Projection of one source entry.
struct Projection {
    /// Projected key; Err covers both an evaluation fault and a null key.
    key: Result<Value>,
    /// Projected value; Err surfaces as Null plus a fault.
    value: Result<Value>,
}

impl Projection {
    fn visible(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }
}

pub(crate) struct MapSelectState {
    key_selector: Expr,
    value_selector: Expr,
    projections: HashMap<Value, Projection>,
    /// Projected key -> contributing source keys, in arrival order. The
    /// first contributor's value is the visible one.
    contributors: HashMap<Value, Vec<Value>>,
}

impl MapSelectState {
    pub fn init(
        key_selector: Expr,
        value_selector: Expr,
        upstream: &[(Value, Value)],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<(Value, Value)>) {
        let mut state = Self {
            key_selector,
            value_selector,
            projections: HashMap::new(),
            contributors: HashMap::new(),
        };
        let mut output = Vec::new();
        for (sk, sv) in upstream {
            state.admit(sk, sv, &mut output, faults, evals);
        }
        (state, output)
    }

    fn project(&self, source_key: &Value, source_value: &Value, evals: &mut u64) -> Projection {
        let ctx = EvalContext::pair(source_key, source_value);
        *evals += 2;
        let key = match eval(&self.key_selector, &ctx) {
            Ok(Value::Null) => Err(Error::NullKey),
            other => other,
        };
        let value = eval(&self.value_selector, &ctx);
        Projection { key, value }
    }

    /// Records per-source-entry faults: projection failures keyed by the
    /// source key, duplicates keyed by the projected key.
    fn record_entry_faults(&self, source_key: &Value, faults: &mut FaultList) {
        let proj = &self.projections[source_key];
        let fault = proj
            .key
            .as_ref()
            .err()
            .or(proj.value.as_ref().err())
            .cloned();
        faults.set_key(source_key, fault);
    }

    fn sync_duplicate_fault(&self, projected: &Value, faults: &mut FaultList) {
        let count = self.contributors.get(projected).map_or(0, Vec::len);
        let fault = if count > 1 {
            Some(Error::duplicate_key(projected.clone()))
        } else {
            None
        };
        faults.set_key(projected, fault);
    }

    /// Adds a contribution for `source_key`; the projection must already be
    /// stored. Appending keeps arrival order, so a duplicate is shadowed by
    /// the earlier winner.
    fn contribute(
        &mut self,
        source_key: &Value,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
        emitted: &mut Vec<MapChange>,
    ) {
        let proj = &self.projections[source_key];
        let pk = match &proj.key {
            Ok(pk) => pk.clone(),
            Err(_) => return,
        };
        let visible = proj.visible();
        let list = self.contributors.entry(pk.clone()).or_default();
        list.push(source_key.clone());
        if list.len() == 1 {
            output.push((pk.clone(), visible.clone()));
            emitted.push(MapChange::insert_one(pk.clone(), visible));
        }
        self.sync_duplicate_fault(&pk, faults);
    }

    /// Removes the contribution for `source_key`, re-admitting the first
    /// remaining duplicate if the winner left.
    fn withdraw(
        &mut self,
        source_key: &Value,
        projected: &Value,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
        emitted: &mut Vec<MapChange>,
    ) {
        let list = self
            .contributors
            .get_mut(projected)
            .expect("contributor list missing for projected key");
        let idx = list
            .iter()
            .position(|sk| sk == source_key)
            .expect("source entry missing from contributor list");
        list.remove(idx);
        let survivor = list.first().cloned();
        if list.is_empty() {
            self.contributors.remove(projected);
        }

        let pos = output
            .iter()
            .position(|(k, _)| k == projected)
            .expect("projected entry missing from output");
        if idx == 0 {
            match survivor {
                Some(winner) => {
                    let visible = self.projections[&winner].visible();
                    let old = core::mem::replace(&mut output[pos].1, visible.clone());
                    if old != visible {
                        emitted.push(MapChange::Replace {
                            key: projected.clone(),
                            old,
                            new: visible,
                        });
                    }
                }
                None => {
                    let removed = output.remove(pos);
                    emitted.push(MapChange::Remove {
                        entries: alloc::vec![removed],
                    });
                }
            }
        }
        self.sync_duplicate_fault(projected, faults);
    }

    fn admit(
        &mut self,
        source_key: &Value,
        source_value: &Value,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> Vec<MapChange> {
        let mut emitted = Vec::new();
        let proj = self.project(source_key, source_value, evals);
        self.projections.insert(source_key.clone(), proj);
        self.record_entry_faults(source_key, faults);
        self.contribute(source_key, output, faults, &mut emitted);
        emitted
    }

    fn evict(
        &mut self,
        source_key: &Value,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
    ) -> Vec<MapChange> {
        let mut emitted = Vec::new();
        let proj = self
            .projections
            .remove(source_key)
            .expect("projection missing for removed source entry");
        if let Ok(pk) = &proj.key {
            self.withdraw(source_key, &pk.clone(), output, faults, &mut emitted);
        }
        faults.set_key(source_key, None);
        emitted
    }

    pub fn apply(
        &mut self,
        output: &mut Vec<(Value, Value)>,
        faults: &mut FaultList,
        change: &MapChange,
        upstream_after: &[(Value, Value)],
        evals: &mut u64,
    ) -> Vec<MapChange> {
        match change {
            MapChange::Insert { entries } => {
                let mut emitted = Vec::new();
                for (sk, sv) in entries {
                    emitted.extend(self.admit(sk, sv, output, faults, evals));
                }
                emitted
            }
            MapChange::Remove { entries } => {
                let mut emitted = Vec::new();
                for (sk, _) in entries {
                    emitted.extend(self.evict(sk, output, faults));
                }
                emitted
            }
            MapChange::Replace { key: sk, new, .. } => {
                let new_proj = self.project(sk, new, evals);
                let old_proj = self
                    .projections
                    .get(sk)
                    .expect("projection missing for replaced source entry");

                // Same projected key: update the stored value in place and
                // emit only if this entry is the visible winner.
                if let (Ok(old_pk), Ok(new_pk)) = (&old_proj.key, &new_proj.key) {
                    if old_pk == new_pk {
                        let pk = new_pk.clone();
                        let new_visible = new_proj.visible();
                        self.projections.insert(sk.clone(), new_proj);
                        self.record_entry_faults(sk, faults);
                        let is_winner = self.contributors[&pk].first() == Some(sk);
                        if !is_winner {
                            return Vec::new();
                        }
                        let pos = output
                            .iter()
                            .position(|(k, _)| k == &pk)
                            .expect("projected entry missing from output");
                        let old_visible =
                            core::mem::replace(&mut output[pos].1, new_visible.clone());
                        if old_visible == new_visible {
                            return Vec::new();
                        }
                        return alloc::vec![MapChange::Replace {
                            key: pk,
                            old: old_visible,
                            new: new_visible,
                        }];
                    }
                }

                let mut emitted = self.evict(sk, output, faults);
                self.projections.insert(sk.clone(), new_proj);
                self.record_entry_faults(sk, faults);
                self.contribute(sk, output, faults, &mut emitted);
                emitted
            }
            MapChange::Reset => {
                self.projections.clear();
                self.contributors.clear();
                faults.clear();
                output.clear();
                for (sk, sv) in upstream_after {
                    self.admit(sk, sv, output, faults, evals);
                }
                alloc::vec![MapChange::Reset]
            }
        }
    }
}
