//! Incremental filtering.
//!
//! Keeps one evaluation state per upstream position (Pass, Fail, or Fault)
//! and an output holding exactly the passing elements in upstream order.
//! Position translation counts how many preceding upstream elements are
//! currently excluded; faulting elements are excluded and recorded in the
//! node's fault list, keyed by upstream position.

use crate::fault::FaultList;
use alloc::vec::Vec;
use rivus_collections::ListChange;
use rivus_core::{Error, Value};
use rivus_expr::{eval_predicate, EvalContext, Expr};

#[derive(Clone, Copy, PartialEq)]
pub(crate) enum Slot {
    Pass,
    Fail,
    Fault,
}

pub(crate) struct FilterState {
    predicate: Expr,
    slots: Vec<Slot>,
}

impl FilterState {
    pub fn init(
        predicate: Expr,
        upstream: &[Value],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<Value>) {
        let mut state = Self {
            predicate,
            slots: Vec::new(),
        };
        let output = state.rebuild(upstream, faults, evals);
        (state, output)
    }

    fn rebuild(&mut self, upstream: &[Value], faults: &mut FaultList, evals: &mut u64) -> Vec<Value> {
        self.slots.clear();
        faults.clear();
        let mut output = Vec::new();
        for (pos, item) in upstream.iter().enumerate() {
            let (slot, fault) = self.evaluate(item, evals);
            if slot == Slot::Pass {
                output.push(item.clone());
            }
            faults.set_position(pos, fault);
            self.slots.push(slot);
        }
        output
    }

    fn evaluate(&self, item: &Value, evals: &mut u64) -> (Slot, Option<Error>) {
        *evals += 1;
        match eval_predicate(&self.predicate, &EvalContext::item(item)) {
            Ok(true) => (Slot::Pass, None),
            Ok(false) => (Slot::Fail, None),
            Err(err) => (Slot::Fault, Some(err)),
        }
    }

    /// Passing elements before upstream position `pos`.
    fn passing_before(&self, pos: usize) -> usize {
        self.slots[..pos].iter().filter(|s| **s == Slot::Pass).count()
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
                let mut new_slots = Vec::with_capacity(items.len());
                let mut passing = Vec::new();
                for (j, item) in items.iter().enumerate() {
                    let (slot, fault) = self.evaluate(item, evals);
                    if slot == Slot::Pass {
                        passing.push(item.clone());
                    }
                    faults.set_position(index + j, fault);
                    new_slots.push(slot);
                }
                let fpos = self.passing_before(*index);
                self.slots.splice(index..index, new_slots);
                if passing.is_empty() {
                    return Vec::new();
                }
                output.splice(fpos..fpos, passing.iter().cloned());
                alloc::vec![ListChange::Insert {
                    index: fpos,
                    items: passing,
                }]
            }
            ListChange::Remove { index, items } => {
                let fpos = self.passing_before(*index);
                let mut removed = Vec::new();
                for (j, item) in items.iter().enumerate() {
                    if self.slots[index + j] == Slot::Pass {
                        removed.push(item.clone());
                    }
                }
                self.slots.drain(*index..index + items.len());
                faults.shift_removed(*index, items.len());
                if removed.is_empty() {
                    return Vec::new();
                }
                output.drain(fpos..fpos + removed.len());
                alloc::vec![ListChange::Remove {
                    index: fpos,
                    items: removed,
                }]
            }
            ListChange::Replace { index, old, new } => {
                let mut emitted = Vec::new();
                for j in 0..new.len() {
                    let pos = index + j;
                    let (slot, fault) = self.evaluate(&new[j], evals);
                    let fpos = self.passing_before(pos);
                    match (self.slots[pos], slot) {
                        (Slot::Pass, Slot::Pass) => {
                            if old[j] != new[j] {
                                output[fpos] = new[j].clone();
                                emitted.push(ListChange::replace_one(
                                    fpos,
                                    old[j].clone(),
                                    new[j].clone(),
                                ));
                            }
                        }
                        (Slot::Pass, _) => {
                            output.remove(fpos);
                            emitted.push(ListChange::remove_one(fpos, old[j].clone()));
                        }
                        (_, Slot::Pass) => {
                            output.insert(fpos, new[j].clone());
                            emitted.push(ListChange::insert_one(fpos, new[j].clone()));
                        }
                        _ => {}
                    }
                    self.slots[pos] = slot;
                    faults.set_position(pos, fault);
                }
                emitted
            }
            ListChange::Move { from, to, len } => {
                let f_from = self.passing_before(*from);
                let moved: Vec<Slot> = self.slots.drain(*from..from + len).collect();
                let moved_pass = moved.iter().filter(|s| **s == Slot::Pass).count();
                let f_to = self.passing_before(*to);
                self.slots.splice(*to..*to, moved);
                faults.apply_move(*from, *to, *len);
                if moved_pass == 0 || f_from == f_to {
                    return Vec::new();
                }
                let items: Vec<Value> = output.drain(f_from..f_from + moved_pass).collect();
                output.splice(f_to..f_to, items);
                alloc::vec![ListChange::Move {
                    from: f_from,
                    to: f_to,
                    len: moved_pass,
                }]
            }
            ListChange::Reset => {
                *output = self.rebuild(upstream_after, faults, evals);
                alloc::vec![ListChange::Reset]
            }
        }
    }
}
