//! Rivus Core - foundation types for the Rivus live-view engine.
//!
//! This crate provides the types shared by every other Rivus crate:
//!
//! - `Value`: a dynamically typed element stored in observed collections
//! - `DataType`: the type tags values carry
//! - `Error`: every way an evaluation or engine call can fail
//!
//! # Example
//!
//! ```rust
//! use rivus_core::{DataType, Value};
//!
//! let v = Value::Int64(42);
//! assert_eq!(v.data_type(), Some(DataType::Int64));
//! assert_eq!(v.as_i64(), Some(42));
//!
//! // Values have a total order, so any two can be compared.
//! assert!(Value::Null < Value::Boolean(false));
//! assert!(Value::Int64(1) < Value::Float64(1.5));
//! ```

#![no_std]

extern crate alloc;

mod error;
mod types;
mod value;

pub use error::{Error, Result};
pub use types::DataType;
pub use value::Value;
