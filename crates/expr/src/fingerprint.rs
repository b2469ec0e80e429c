//! Structural fingerprints for expressions.
//!
//! The engine caches query nodes by (operator, fingerprint); structurally
//! equal expressions must hash equal so independent callers land on the
//! same node.

use crate::expr::Expr;
use core::hash::Hasher;
use rivus_core::Value;

/// A simple hasher for computing expression fingerprints.
/// Uses FNV-1a algorithm which is fast and has good distribution.
#[derive(Default)]
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self {
            state: Self::FNV_OFFSET,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}

/// Computes a structural fingerprint for an expression.
/// Expressions with the same structure have the same fingerprint.
pub fn fingerprint(expr: &Expr) -> u64 {
    let mut hasher = FnvHasher::new();
    hash_expr(expr, &mut hasher);
    hasher.finish()
}

/// Computes a structural fingerprint for a bare value, for cache keys that
/// carry value parameters (aggregate seeds, lookup keys) next to
/// expressions.
pub fn fingerprint_value(value: &Value) -> u64 {
    let mut hasher = FnvHasher::new();
    hash_value(value, &mut hasher);
    hasher.finish()
}

fn hash_expr<H: Hasher>(expr: &Expr, hasher: &mut H) {
    match expr {
        Expr::Item => hasher.write(b"item"),
        Expr::Key => hasher.write(b"key"),
        Expr::Val => hasher.write(b"val"),
        Expr::Literal(v) => {
            hasher.write(b"lit");
            hash_value(v, hasher);
        }
        Expr::BinaryOp { left, op, right } => {
            hasher.write(b"binop");
            hasher.write(&[*op as u8]);
            hash_expr(left, hasher);
            hash_expr(right, hasher);
        }
        Expr::UnaryOp { op, expr } => {
            hasher.write(b"unop");
            hasher.write(&[*op as u8]);
            hash_expr(expr, hasher);
        }
        Expr::Index { expr, index } => {
            hasher.write(b"index");
            hasher.write(&index.to_le_bytes());
            hash_expr(expr, hasher);
        }
        Expr::Len(expr) => {
            hasher.write(b"len");
            hash_expr(expr, hasher);
        }
        Expr::TypeIs { expr, ty } => {
            hasher.write(b"type_is");
            hasher.write(&[*ty as u8]);
            hash_expr(expr, hasher);
        }
        Expr::CastTo { expr, ty } => {
            hasher.write(b"cast_to");
            hasher.write(&[*ty as u8]);
            hash_expr(expr, hasher);
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    match value {
        Value::Null => hasher.write(b"null"),
        Value::Boolean(b) => {
            hasher.write(b"bool");
            hasher.write(&[*b as u8]);
        }
        Value::Int64(i) => {
            hasher.write(b"i64");
            hasher.write(&i.to_le_bytes());
        }
        Value::Float64(f) => {
            hasher.write(b"f64");
            hasher.write(&f.to_le_bytes());
        }
        Value::String(s) => {
            hasher.write(b"str");
            hasher.write(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.write(b"arr");
            for item in items {
                hash_value(item, hasher);
            }
        }
    }
}
