//! Incremental projection, flat and nested.
//!
//! `ProjectState` keeps one cached projection result per upstream position
//! and emits a Replace only when the projected value actually changes.
//! `FlatMapState` keeps the nested run produced per upstream position and
//! translates outer changes into correctly-offset flat notifications.
//!
//! A faulted projection surfaces as `Value::Null` in the output plus a
//! fault entry; a faulted or non-Array flat-map result contributes an empty
//! run.

use crate::fault::FaultList;
use alloc::vec::Vec;
use rivus_collections::ListChange;
use rivus_core::{DataType, Error, Result, Value};
use rivus_expr::{eval, EvalContext, Expr};

pub(crate) struct ProjectState {
    selector: Expr,
    results: Vec<Result<Value>>,
}

fn surface(result: &Result<Value>) -> Value {
    result.clone().unwrap_or(Value::Null)
}

impl ProjectState {
    pub fn init(
        selector: Expr,
        upstream: &[Value],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<Value>) {
        let mut state = Self {
            selector,
            results: Vec::new(),
        };
        let output = state.rebuild(upstream, faults, evals);
        (state, output)
    }

    fn rebuild(&mut self, upstream: &[Value], faults: &mut FaultList, evals: &mut u64) -> Vec<Value> {
        self.results.clear();
        faults.clear();
        let mut output = Vec::with_capacity(upstream.len());
        for (pos, item) in upstream.iter().enumerate() {
            let result = self.project(item, evals);
            faults.set_position(pos, result.as_ref().err().cloned());
            output.push(surface(&result));
            self.results.push(result);
        }
        output
    }

    fn project(&self, item: &Value, evals: &mut u64) -> Result<Value> {
        *evals += 1;
        eval(&self.selector, &EvalContext::item(item))
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
                let mut projected = Vec::with_capacity(items.len());
                let mut new_results = Vec::with_capacity(items.len());
                for (j, item) in items.iter().enumerate() {
                    let result = self.project(item, evals);
                    faults.set_position(index + j, result.as_ref().err().cloned());
                    projected.push(surface(&result));
                    new_results.push(result);
                }
                self.results.splice(index..index, new_results);
                output.splice(*index..*index, projected.iter().cloned());
                alloc::vec![ListChange::Insert {
                    index: *index,
                    items: projected,
                }]
            }
            ListChange::Remove { index, items } => {
                let removed: Vec<Value> = output.drain(*index..index + items.len()).collect();
                self.results.drain(*index..index + items.len());
                faults.shift_removed(*index, items.len());
                alloc::vec![ListChange::Remove {
                    index: *index,
                    items: removed,
                }]
            }
            ListChange::Replace { index, new, .. } => {
                let mut emitted = Vec::new();
                for (j, item) in new.iter().enumerate() {
                    let pos = index + j;
                    let result = self.project(item, evals);
                    faults.set_position(pos, result.as_ref().err().cloned());
                    let new_value = surface(&result);
                    let old_value = output[pos].clone();
                    self.results[pos] = result;
                    if old_value != new_value {
                        output[pos] = new_value.clone();
                        emitted.push(ListChange::replace_one(pos, old_value, new_value));
                    }
                }
                emitted
            }
            ListChange::Move { from, to, len } => {
                let moved: Vec<Result<Value>> = self.results.drain(*from..from + len).collect();
                self.results.splice(*to..*to, moved);
                let moved_out: Vec<Value> = output.drain(*from..from + len).collect();
                output.splice(*to..*to, moved_out);
                faults.apply_move(*from, *to, *len);
                alloc::vec![ListChange::Move {
                    from: *from,
                    to: *to,
                    len: *len,
                }]
            }
            ListChange::Reset => {
                *output = self.rebuild(upstream_after, faults, evals);
                alloc::vec![ListChange::Reset]
            }
        }
    }
}

pub(crate) struct FlatMapState {
    selector: Expr,
    runs: Vec<Vec<Value>>,
}

impl FlatMapState {
    pub fn init(
        selector: Expr,
        upstream: &[Value],
        faults: &mut FaultList,
        evals: &mut u64,
    ) -> (Self, Vec<Value>) {
        let mut state = Self {
            selector,
            runs: Vec::new(),
        };
        let output = state.rebuild(upstream, faults, evals);
        (state, output)
    }

    fn rebuild(&mut self, upstream: &[Value], faults: &mut FaultList, evals: &mut u64) -> Vec<Value> {
        self.runs.clear();
        faults.clear();
        let mut output = Vec::new();
        for (pos, item) in upstream.iter().enumerate() {
            let (run, fault) = self.expand(item, evals);
            faults.set_position(pos, fault);
            output.extend_from_slice(&run);
            self.runs.push(run);
        }
        output
    }

    /// Evaluates the selector; anything but an Array is an empty run plus a
    /// fault.
    fn expand(&self, item: &Value, evals: &mut u64) -> (Vec<Value>, Option<Error>) {
        *evals += 1;
        match eval(&self.selector, &EvalContext::item(item)) {
            Ok(Value::Array(items)) => (items, None),
            Ok(other) => (
                Vec::new(),
                Some(Error::type_mismatch(DataType::Array, other.data_type())),
            ),
            Err(err) => (Vec::new(), Some(err)),
        }
    }

    /// Flat offset of upstream position `pos`.
    fn offset(&self, pos: usize) -> usize {
        self.runs[..pos].iter().map(Vec::len).sum()
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
                let mut new_runs = Vec::with_capacity(items.len());
                let mut flat = Vec::new();
                for (j, item) in items.iter().enumerate() {
                    let (run, fault) = self.expand(item, evals);
                    faults.set_position(index + j, fault);
                    flat.extend_from_slice(&run);
                    new_runs.push(run);
                }
                let flat_index = self.offset(*index);
                self.runs.splice(index..index, new_runs);
                if flat.is_empty() {
                    return Vec::new();
                }
                output.splice(flat_index..flat_index, flat.iter().cloned());
                alloc::vec![ListChange::Insert {
                    index: flat_index,
                    items: flat,
                }]
            }
            ListChange::Remove { index, items } => {
                let flat_index = self.offset(*index);
                let mut flat = Vec::new();
                for run in self.runs.drain(*index..index + items.len()) {
                    flat.extend_from_slice(&run);
                }
                faults.shift_removed(*index, items.len());
                if flat.is_empty() {
                    return Vec::new();
                }
                output.drain(flat_index..flat_index + flat.len());
                alloc::vec![ListChange::Remove {
                    index: flat_index,
                    items: flat,
                }]
            }
            ListChange::Replace { index, new, .. } => {
                let mut emitted = Vec::new();
                for (j, item) in new.iter().enumerate() {
                    let pos = index + j;
                    let (run, fault) = self.expand(item, evals);
                    faults.set_position(pos, fault);
                    let flat_pos = self.offset(pos);
                    let old_run = core::mem::replace(&mut self.runs[pos], run.clone());
                    if old_run == run {
                        continue;
                    }
                    if !old_run.is_empty() {
                        output.drain(flat_pos..flat_pos + old_run.len());
                        emitted.push(ListChange::Remove {
                            index: flat_pos,
                            items: old_run,
                        });
                    }
                    if !run.is_empty() {
                        output.splice(flat_pos..flat_pos, run.iter().cloned());
                        emitted.push(ListChange::Insert {
                            index: flat_pos,
                            items: run,
                        });
                    }
                }
                emitted
            }
            ListChange::Move { from, to, len } => {
                let flat_from = self.offset(*from);
                let moved: Vec<Vec<Value>> = self.runs.drain(*from..from + len).collect();
                let moved_len: usize = moved.iter().map(Vec::len).sum();
                let flat_to = self.offset(*to);
                self.runs.splice(*to..*to, moved);
                faults.apply_move(*from, *to, *len);
                if moved_len == 0 || flat_from == flat_to {
                    return Vec::new();
                }
                let flat: Vec<Value> = output.drain(flat_from..flat_from + moved_len).collect();
                output.splice(flat_to..flat_to, flat);
                alloc::vec![ListChange::Move {
                    from: flat_from,
                    to: flat_to,
                    len: moved_len,
                }]
            }
            ListChange::Reset => {
                *output = self.rebuild(upstream_after, faults, evals);
                alloc::vec![ListChange::Reset]
            }
        }
    }
}
