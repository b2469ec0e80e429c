//! Scalar and aggregate reduction.
//!
//! Each scalar node exposes one (fault, result) pair as `Result<Value>`.
//! Decomposable reductions update incrementally: Count from change deltas,
//! Sum and Average from running totals, Min and Max from an ordered
//! multiset so losing the current extreme costs O(log n). Aggregate and
//! Transform recompute in full per change by contract. Positional queries
//! read the upstream's materialized output directly.

use crate::fault::FaultList;
use crate::node::NodeId;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use rivus_collections::{ListChange, MapChange};
use rivus_core::{DataType, Error, Result, Value};
use rivus_expr::{eval, EvalContext, Expr};

pub(crate) struct SumState {
    selector: Expr,
    terms: Vec<Result<Value>>,
    int_sum: i64,
    float_sum: f64,
    float_terms: usize,
    ok_terms: usize,
}

impl SumState {
    pub fn new(selector: Expr) -> Self {
        Self {
            selector,
            terms: Vec::new(),
            int_sum: 0,
            float_sum: 0.0,
            float_terms: 0,
            ok_terms: 0,
        }
    }

    /// Projects one element to a numeric term; a non-numeric projection is
    /// a fault.
    fn term(&self, item: &Value, evals: &mut u64) -> Result<Value> {
        *evals += 1;
        match eval(&self.selector, &EvalContext::item(item))? {
            v @ (Value::Int64(_) | Value::Float64(_)) => Ok(v),
            other => Err(Error::type_mismatch(DataType::Float64, other.data_type())),
        }
    }

    fn add(&mut self, term: &Result<Value>) {
        match term {
            Ok(Value::Int64(v)) => {
                self.int_sum = self.int_sum.wrapping_add(*v);
                self.ok_terms += 1;
            }
            Ok(Value::Float64(v)) => {
                self.float_sum += v;
                self.float_terms += 1;
                self.ok_terms += 1;
            }
            _ => {}
        }
    }

    fn subtract(&mut self, term: &Result<Value>) {
        match term {
            Ok(Value::Int64(v)) => {
                self.int_sum = self.int_sum.wrapping_sub(*v);
                self.ok_terms -= 1;
            }
            Ok(Value::Float64(v)) => {
                self.float_sum -= v;
                self.float_terms -= 1;
                self.ok_terms -= 1;
            }
            _ => {}
        }
    }

    fn total(&self) -> Value {
        if self.float_terms > 0 {
            Value::Float64(self.int_sum as f64 + self.float_sum)
        } else {
            Value::Int64(self.int_sum)
        }
    }

    fn average(&self) -> Result<Value> {
        if self.ok_terms == 0 {
            return Err(Error::NoElements);
        }
        let total = match self.total() {
            Value::Int64(v) => v as f64,
            Value::Float64(v) => v,
            _ => unreachable!("sum total is numeric"),
        };
        Ok(Value::Float64(total / self.ok_terms as f64))
    }
}

pub(crate) struct ExtremeState {
    selector: Expr,
    max: bool,
    keys: Vec<Result<Value>>,
    /// Ordered multiset of successful projections.
    multiset: BTreeMap<Value, usize>,
}

impl ExtremeState {
    pub fn new(selector: Expr, max: bool) -> Self {
        Self {
            selector,
            max,
            keys: Vec::new(),
            multiset: BTreeMap::new(),
        }
    }

    fn project(&self, item: &Value, evals: &mut u64) -> Result<Value> {
        *evals += 1;
        eval(&self.selector, &EvalContext::item(item))
    }

    fn add(&mut self, key: &Result<Value>) {
        if let Ok(k) = key {
            *self.multiset.entry(k.clone()).or_insert(0) += 1;
        }
    }

    fn subtract(&mut self, key: &Result<Value>) {
        if let Ok(k) = key {
            let count = self
                .multiset
                .get_mut(k)
                .expect("extreme multiset missing tracked key");
            *count -= 1;
            if *count == 0 {
                self.multiset.remove(k);
            }
        }
    }

    fn value(&self) -> Result<Value> {
        let entry = if self.max {
            self.multiset.last_key_value()
        } else {
            self.multiset.first_key_value()
        };
        entry.map(|(k, _)| k.clone()).ok_or(Error::NoElements)
    }
}

#[derive(Clone, Copy)]
pub(crate) enum PositionalKind {
    ElementAt(usize),
    First,
    Last,
    Single,
}

pub(crate) enum ScalarState {
    Count,
    Sum(SumState),
    Average(SumState),
    Extreme(ExtremeState),
    /// Compares the internally-created filter child's length against the
    /// source's; resolved by the registry, which owns both outputs.
    AnyAll {
        source: NodeId,
        filtered: NodeId,
        all: bool,
    },
    /// General fold, re-aggregated in full on every change. The fold
    /// expression sees the accumulator as `Key` and the element as
    /// `Val`/`Item`.
    Aggregate { seed: Value, fold: Expr },
    /// Evaluates with `Item` bound to the whole output as an Array.
    Transform { expr: Expr },
    Positional {
        kind: PositionalKind,
        or_default: bool,
    },
    MapCount,
    ValueFor { key: Value, or_default: bool },
}

fn positional(kind: PositionalKind, or_default: bool, upstream: &[Value]) -> Result<Value> {
    let miss = |err: Error| if or_default { Ok(Value::Null) } else { Err(err) };
    match kind {
        PositionalKind::ElementAt(index) => match upstream.get(index) {
            Some(v) => Ok(v.clone()),
            None => miss(Error::index_out_of_range(index, upstream.len())),
        },
        PositionalKind::First => match upstream.first() {
            Some(v) => Ok(v.clone()),
            None => miss(Error::NoElements),
        },
        PositionalKind::Last => match upstream.last() {
            Some(v) => Ok(v.clone()),
            None => miss(Error::NoElements),
        },
        PositionalKind::Single => match upstream.len() {
            1 => Ok(upstream[0].clone()),
            0 => miss(Error::NoElements),
            _ => Err(Error::MoreThanOneElement),
        },
    }
}

fn lookup(key: &Value, or_default: bool, upstream: &[(Value, Value)]) -> Result<Value> {
    match upstream.iter().find(|(k, _)| k == key) {
        Some((_, v)) => Ok(v.clone()),
        None if or_default => Ok(Value::Null),
        None => Err(Error::key_not_found(key.clone())),
    }
}

impl ScalarState {
    /// Full recomputation over a list-shaped upstream; used at node
    /// creation and on Reset.
    pub fn rebuild_list(
        &mut self,
        faults: &mut FaultList,
        upstream: &[Value],
        evals: &mut u64,
    ) -> Result<Value> {
        faults.clear();
        match self {
            ScalarState::Count => Ok(Value::Int64(upstream.len() as i64)),
            ScalarState::Sum(state) | ScalarState::Average(state) => {
                state.terms.clear();
                state.int_sum = 0;
                state.float_sum = 0.0;
                state.float_terms = 0;
                state.ok_terms = 0;
                for (pos, item) in upstream.iter().enumerate() {
                    let term = state.term(item, evals);
                    faults.set_position(pos, term.as_ref().err().cloned());
                    state.add(&term);
                    state.terms.push(term);
                }
                match self {
                    ScalarState::Sum(state) => Ok(state.total()),
                    ScalarState::Average(state) => state.average(),
                    _ => unreachable!(),
                }
            }
            ScalarState::Extreme(state) => {
                state.terms_rebuild(upstream, faults, evals);
                state.value()
            }
            ScalarState::Aggregate { seed, fold } => {
                let mut acc = seed.clone();
                for item in upstream {
                    *evals += 1;
                    acc = eval(fold, &EvalContext::pair(&acc, item))?;
                }
                Ok(acc)
            }
            ScalarState::Transform { expr } => {
                *evals += 1;
                eval(
                    expr,
                    &EvalContext::item(&Value::Array(upstream.to_vec())),
                )
            }
            ScalarState::Positional { kind, or_default } => {
                positional(*kind, *or_default, upstream)
            }
            ScalarState::AnyAll { .. } | ScalarState::MapCount | ScalarState::ValueFor { .. } => {
                panic!("scalar state cannot rebuild from a list-shaped upstream")
            }
        }
    }

    /// Full recomputation over a map-shaped upstream.
    pub fn rebuild_map(&mut self, upstream: &[(Value, Value)]) -> Result<Value> {
        match self {
            ScalarState::MapCount => Ok(Value::Int64(upstream.len() as i64)),
            ScalarState::ValueFor { key, or_default } => lookup(key, *or_default, upstream),
            _ => panic!("scalar state cannot rebuild from a map-shaped upstream"),
        }
    }

    pub fn apply_list(
        &mut self,
        faults: &mut FaultList,
        change: &ListChange,
        upstream_after: &[Value],
        evals: &mut u64,
    ) -> Result<Value> {
        match self {
            ScalarState::Count => Ok(Value::Int64(upstream_after.len() as i64)),
            ScalarState::Sum(_) | ScalarState::Average(_) => {
                let state = match self {
                    ScalarState::Sum(state) | ScalarState::Average(state) => state,
                    _ => unreachable!(),
                };
                match change {
                    ListChange::Insert { index, items } => {
                        faults.shift_inserted(*index, items.len());
                        for (j, item) in items.iter().enumerate() {
                            let term = state.term(item, evals);
                            faults.set_position(index + j, term.as_ref().err().cloned());
                            state.add(&term);
                            state.terms.insert(index + j, term);
                        }
                    }
                    ListChange::Remove { index, items } => {
                        for term in state.terms.drain(*index..index + items.len()) {
                            // Subtract needs the term by value; drain yields it.
                            match term {
                                Ok(Value::Int64(v)) => {
                                    state.int_sum = state.int_sum.wrapping_sub(v);
                                    state.ok_terms -= 1;
                                }
                                Ok(Value::Float64(v)) => {
                                    state.float_sum -= v;
                                    state.float_terms -= 1;
                                    state.ok_terms -= 1;
                                }
                                _ => {}
                            }
                        }
                        faults.shift_removed(*index, items.len());
                    }
                    ListChange::Replace { index, new, .. } => {
                        for (j, item) in new.iter().enumerate() {
                            let pos = index + j;
                            let term = state.term(item, evals);
                            faults.set_position(pos, term.as_ref().err().cloned());
                            let old = core::mem::replace(&mut state.terms[pos], term);
                            state.subtract(&old);
                            let added = state.terms[pos].clone();
                            state.add(&added);
                        }
                    }
                    ListChange::Move { from, to, len } => {
                        let moved: Vec<Result<Value>> =
                            state.terms.drain(*from..from + len).collect();
                        state.terms.splice(*to..*to, moved);
                        faults.apply_move(*from, *to, *len);
                    }
                    ListChange::Reset => return self.rebuild_list(faults, upstream_after, evals),
                }
                match self {
                    ScalarState::Sum(state) => Ok(state.total()),
                    ScalarState::Average(state) => state.average(),
                    _ => unreachable!(),
                }
            }
            ScalarState::Extreme(state) => {
                match change {
                    ListChange::Insert { index, items } => {
                        faults.shift_inserted(*index, items.len());
                        for (j, item) in items.iter().enumerate() {
                            let key = state.project(item, evals);
                            faults.set_position(index + j, key.as_ref().err().cloned());
                            state.add(&key);
                            state.keys.insert(index + j, key);
                        }
                    }
                    ListChange::Remove { index, items } => {
                        let removed: Vec<Result<Value>> =
                            state.keys.drain(*index..index + items.len()).collect();
                        for key in &removed {
                            state.subtract(key);
                        }
                        faults.shift_removed(*index, items.len());
                    }
                    ListChange::Replace { index, new, .. } => {
                        for (j, item) in new.iter().enumerate() {
                            let pos = index + j;
                            let key = state.project(item, evals);
                            faults.set_position(pos, key.as_ref().err().cloned());
                            let old = core::mem::replace(&mut state.keys[pos], key);
                            state.subtract(&old);
                            let added = state.keys[pos].clone();
                            state.add(&added);
                        }
                    }
                    ListChange::Move { from, to, len } => {
                        let moved: Vec<Result<Value>> =
                            state.keys.drain(*from..from + len).collect();
                        state.keys.splice(*to..*to, moved);
                        faults.apply_move(*from, *to, *len);
                    }
                    ListChange::Reset => return self.rebuild_list(faults, upstream_after, evals),
                }
                state.value()
            }
            ScalarState::Aggregate { .. }
            | ScalarState::Transform { .. }
            | ScalarState::Positional { .. } => self.rebuild_list(faults, upstream_after, evals),
            ScalarState::AnyAll { .. } | ScalarState::MapCount | ScalarState::ValueFor { .. } => {
                panic!("scalar state cannot consume a list change")
            }
        }
    }

    /// Applies a map change; `old` is returned untouched when the change
    /// cannot affect this scalar.
    pub fn apply_map(
        &mut self,
        change: &MapChange,
        upstream_after: &[(Value, Value)],
        old: &Result<Value>,
    ) -> Result<Value> {
        match self {
            ScalarState::MapCount => Ok(Value::Int64(upstream_after.len() as i64)),
            ScalarState::ValueFor { key, or_default } => {
                let relevant = match change {
                    MapChange::Insert { entries } | MapChange::Remove { entries } => {
                        entries.iter().any(|(k, _)| k == key)
                    }
                    MapChange::Replace { key: k, .. } => k == key,
                    MapChange::Reset => true,
                };
                if !relevant {
                    return old.clone();
                }
                lookup(key, *or_default, upstream_after)
            }
            _ => panic!("scalar state cannot consume a map change"),
        }
    }
}

impl ExtremeState {
    fn terms_rebuild(&mut self, upstream: &[Value], faults: &mut FaultList, evals: &mut u64) {
        self.keys.clear();
        self.multiset.clear();
        for (pos, item) in upstream.iter().enumerate() {
            let key = self.project(item, evals);
            faults.set_position(pos, key.as_ref().err().cloned());
            self.add(&key);
            self.keys.push(key);
        }
    }
}
