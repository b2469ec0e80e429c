//! Rivus Expr - declarative predicates and selectors.
//!
//! Query operators take their predicates and selectors as `Expr` values
//! rather than opaque closures. That buys two things:
//!
//! - structural equality: two requests for `filter(x > 1)` built
//!   independently produce the same cache fingerprint, so the engine can
//!   hand both callers the same live node;
//! - fault capture: evaluation returns `Result<Value, Error>` per element,
//!   so one bad element poisons its own slot instead of the pipeline.
//!
//! # Example
//!
//! ```rust
//! use rivus_core::Value;
//! use rivus_expr::{eval_predicate, fingerprint, EvalContext, Expr};
//!
//! let pred = Expr::gt(Expr::item(), Expr::literal(1i64));
//! assert!(eval_predicate(&pred, &EvalContext::item(&Value::Int64(2))).unwrap());
//!
//! // Structurally equal expressions share a fingerprint.
//! let again = Expr::gt(Expr::item(), Expr::literal(1i64));
//! assert_eq!(fingerprint(&pred), fingerprint(&again));
//! ```

#![no_std]

extern crate alloc;

mod eval;
mod expr;
mod fingerprint;
mod normalize;

pub use eval::{eval, eval_keys, eval_predicate, EvalContext};
pub use expr::{BinaryOp, Expr, SortOrder, UnaryOp};
pub use fingerprint::{fingerprint, fingerprint_value};
pub use normalize::normalize;
