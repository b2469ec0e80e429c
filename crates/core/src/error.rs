//! Error types for Rivus.
//!
//! Three families matter to callers: argument errors (returned synchronously
//! by the violating call), evaluation faults (captured per element and merged
//! into a node's operation fault, never propagated), and structural faults
//! (dictionary-shaped results with null or duplicate projected keys).

use crate::types::DataType;
use crate::value::Value;
use alloc::string::String;
use core::fmt;

/// Result type alias for Rivus operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for Rivus operations.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Type mismatch while evaluating an expression.
    TypeMismatch {
        expected: DataType,
        got: Option<DataType>,
    },
    /// Division or modulo by zero.
    DivideByZero,
    /// A selector or predicate could not be evaluated for an element.
    Evaluation {
        message: String,
    },
    /// Index outside the current bounds of a collection.
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    /// Invalid argument to an engine call.
    InvalidArgument {
        message: String,
    },
    /// A reduction that requires at least one element saw none.
    NoElements,
    /// A single-element query matched more than one element.
    MoreThanOneElement,
    /// Two source entries projected to the same dictionary key.
    DuplicateKey {
        key: Value,
    },
    /// A source entry projected to a null dictionary key.
    NullKey,
    /// A dictionary lookup found no entry for the key.
    KeyNotFound {
        key: Value,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch { expected, got } => match got {
                Some(got) => write!(f, "Type mismatch: expected {}, got {}", expected, got),
                None => write!(f, "Type mismatch: expected {}, got null", expected),
            },
            Error::DivideByZero => write!(f, "Division by zero"),
            Error::Evaluation { message } => write!(f, "Evaluation fault: {}", message),
            Error::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range for length {}", index, len)
            }
            Error::InvalidArgument { message } => write!(f, "Invalid argument: {}", message),
            Error::NoElements => write!(f, "Sequence contains no elements"),
            Error::MoreThanOneElement => write!(f, "Sequence contains more than one element"),
            Error::DuplicateKey { key } => write!(f, "Duplicate key: {:?}", key),
            Error::NullKey => write!(f, "Null key"),
            Error::KeyNotFound { key } => write!(f, "Key not found: {:?}", key),
        }
    }
}

impl Error {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: DataType, got: Option<DataType>) -> Self {
        Error::TypeMismatch { expected, got }
    }

    /// Creates an evaluation fault.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::Evaluation {
            message: message.into(),
        }
    }

    /// Creates an index-out-of-range error.
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Error::IndexOutOfRange { index, len }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a duplicate key fault.
    pub fn duplicate_key(key: Value) -> Self {
        Error::DuplicateKey { key }
    }

    /// Creates a key-not-found fault.
    pub fn key_not_found(key: Value) -> Self {
        Error::KeyNotFound { key }
    }

    /// Returns true if this error is a structural fault of a
    /// dictionary-shaped result.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::DuplicateKey { .. } | Error::NullKey)
    }
}
