//! Expression canonicalization.
//!
//! Applied (when the registry is configured to) before fingerprinting, so
//! differently spelled but equivalent expressions land on the same cached
//! node. Pure rewriting only; evaluation semantics are unchanged:
//!
//! - double negation elimination: NOT(NOT(x)) → x
//! - De Morgan: NOT(a AND b) → NOT(a) OR NOT(b), and dually
//! - NOT over a comparison folds into the flipped comparison
//! - NOT(IS NULL) ↔ IS NOT NULL

use crate::expr::{BinaryOp, Expr, UnaryOp};
use alloc::boxed::Box;

/// Canonicalizes an expression for cache-key purposes.
pub fn normalize(expr: Expr) -> Expr {
    match expr {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            expr: inner,
        } => normalize_not(normalize(*inner)),

        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(normalize(*left)),
            op,
            right: Box::new(normalize(*right)),
        },

        Expr::UnaryOp { op, expr } => Expr::UnaryOp {
            op,
            expr: Box::new(normalize(*expr)),
        },

        Expr::Index { expr, index } => Expr::Index {
            expr: Box::new(normalize(*expr)),
            index,
        },

        Expr::Len(expr) => Expr::Len(Box::new(normalize(*expr))),

        Expr::TypeIs { expr, ty } => Expr::TypeIs {
            expr: Box::new(normalize(*expr)),
            ty,
        },

        Expr::CastTo { expr, ty } => Expr::CastTo {
            expr: Box::new(normalize(*expr)),
            ty,
        },

        // Leaf nodes remain unchanged
        other => other,
    }
}

fn normalize_not(inner: Expr) -> Expr {
    match inner {
        // Double negation: NOT(NOT(x)) → x
        Expr::UnaryOp {
            op: UnaryOp::Not,
            expr,
        } => *expr,

        // NOT(a AND b) → NOT(a) OR NOT(b), NOT(a OR b) → NOT(a) AND NOT(b)
        Expr::BinaryOp {
            left,
            op: op @ (BinaryOp::And | BinaryOp::Or),
            right,
        } => Expr::BinaryOp {
            left: Box::new(normalize_not(*left)),
            op: if op == BinaryOp::And {
                BinaryOp::Or
            } else {
                BinaryOp::And
            },
            right: Box::new(normalize_not(*right)),
        },

        // NOT over a comparison folds into the flipped comparison
        Expr::BinaryOp { left, op, right } => match op.negated_comparison() {
            Some(flipped) => Expr::BinaryOp {
                left,
                op: flipped,
                right,
            },
            None => Expr::not(Expr::BinaryOp { left, op, right }),
        },

        // NOT(IS NULL) → IS NOT NULL
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            expr,
        } => Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            expr,
        },

        // NOT(IS NOT NULL) → IS NULL
        Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            expr,
        } => Expr::UnaryOp {
            op: UnaryOp::IsNull,
            expr,
        },

        other => Expr::not(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    #[test]
    fn test_double_negation() {
        let expr = Expr::not(Expr::not(Expr::item()));
        assert_eq!(normalize(expr), Expr::Item);
    }

    #[test]
    fn test_not_comparison_folds() {
        // NOT(item < 1) → item >= 1
        let expr = Expr::not(Expr::lt(Expr::item(), Expr::literal(1i64)));
        let expected = Expr::ge(Expr::item(), Expr::literal(1i64));
        assert_eq!(normalize(expr), expected);
    }

    #[test]
    fn test_de_morgan() {
        // NOT(a AND b) → NOT(a) OR NOT(b), with the inner NOTs folded
        let a = Expr::eq(Expr::item(), Expr::literal(1i64));
        let b = Expr::eq(Expr::item(), Expr::literal(2i64));
        let expr = Expr::not(Expr::and(a, b));

        let expected = Expr::or(
            Expr::ne(Expr::item(), Expr::literal(1i64)),
            Expr::ne(Expr::item(), Expr::literal(2i64)),
        );
        assert_eq!(normalize(expr), expected);
    }

    #[test]
    fn test_equivalent_spellings_share_fingerprint() {
        // "not (x <= 1)" and "x > 1" normalize to the same key.
        let a = normalize(Expr::not(Expr::le(Expr::item(), Expr::literal(1i64))));
        let b = normalize(Expr::gt(Expr::item(), Expr::literal(1i64)));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_not_is_null() {
        let expr = Expr::not(Expr::is_null(Expr::item()));
        assert_eq!(normalize(expr), Expr::is_not_null(Expr::item()));
    }
}
