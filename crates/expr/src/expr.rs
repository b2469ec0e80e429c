//! Expression AST definitions.

use alloc::boxed::Box;
use alloc::vec::Vec;
use rivus_core::{DataType, Value};

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// The comparison with operands flipped-negated, if this is one.
    /// `Not(a < b)` is `a >= b`, and so on.
    pub fn negated_comparison(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Ne),
            BinaryOp::Ne => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::Ge),
            BinaryOp::Le => Some(BinaryOp::Gt),
            BinaryOp::Gt => Some(BinaryOp::Le),
            BinaryOp::Ge => Some(BinaryOp::Lt),
            _ => None,
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// Sort order for ordering keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Expression AST node.
///
/// Expressions evaluate against a single element (`Item`) or a single
/// key/value pair (`Key`/`Val`), depending on which kind of node consumes
/// them.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// The element under evaluation.
    Item,
    /// The key half of the pair under evaluation.
    Key,
    /// The value half of the pair under evaluation.
    Val,
    /// Literal value.
    Literal(Value),
    /// Binary operation.
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Unary operation.
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    /// Element of an Array value.
    Index { expr: Box<Expr>, index: usize },
    /// Length of an Array or String value.
    Len(Box<Expr>),
    /// Type test; Null never matches any type.
    TypeIs { expr: Box<Expr>, ty: DataType },
    /// Type conversion; failure is an evaluation fault.
    CastTo { expr: Box<Expr>, ty: DataType },
}

impl Expr {
    /// The element under evaluation.
    pub fn item() -> Self {
        Expr::Item
    }

    /// The key half of the pair under evaluation.
    pub fn key() -> Self {
        Expr::Key
    }

    /// The value half of the pair under evaluation.
    pub fn val() -> Self {
        Expr::Val
    }

    /// Creates a literal expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Creates an equality expression.
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Eq, right)
    }

    /// Creates a not-equal expression.
    pub fn ne(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Ne, right)
    }

    /// Creates a less-than expression.
    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Lt, right)
    }

    /// Creates a less-than-or-equal expression.
    pub fn le(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Le, right)
    }

    /// Creates a greater-than expression.
    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Gt, right)
    }

    /// Creates a greater-than-or-equal expression.
    pub fn ge(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Ge, right)
    }

    /// Creates an AND expression.
    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::And, right)
    }

    /// Creates an OR expression.
    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Or, right)
    }

    /// Creates an addition expression.
    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Add, right)
    }

    /// Creates a subtraction expression.
    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Sub, right)
    }

    /// Creates a multiplication expression.
    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Mul, right)
    }

    /// Creates a division expression.
    pub fn div(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Div, right)
    }

    /// Creates a modulo expression.
    pub fn rem(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Mod, right)
    }

    /// Creates a NOT expression.
    pub fn not(expr: Expr) -> Self {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }

    /// Creates a negation expression.
    pub fn neg(expr: Expr) -> Self {
        Expr::UnaryOp {
            op: UnaryOp::Neg,
            expr: Box::new(expr),
        }
    }

    /// Creates an IS NULL expression.
    pub fn is_null(expr: Expr) -> Self {
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            expr: Box::new(expr),
        }
    }

    /// Creates an IS NOT NULL expression.
    pub fn is_not_null(expr: Expr) -> Self {
        Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            expr: Box::new(expr),
        }
    }

    /// Creates an array-index expression.
    pub fn index(expr: Expr, index: usize) -> Self {
        Expr::Index {
            expr: Box::new(expr),
            index,
        }
    }

    /// Creates a length expression.
    pub fn len(expr: Expr) -> Self {
        Expr::Len(Box::new(expr))
    }

    /// Creates a type-test expression.
    pub fn type_is(expr: Expr, ty: DataType) -> Self {
        Expr::TypeIs {
            expr: Box::new(expr),
            ty,
        }
    }

    /// Creates a cast expression.
    pub fn cast_to(expr: Expr, ty: DataType) -> Self {
        Expr::CastTo {
            expr: Box::new(expr),
            ty,
        }
    }

    /// Returns true if this expression references the pair halves
    /// (`Key`/`Val`) rather than a plain `Item`.
    pub fn references_pair(&self) -> bool {
        match self {
            Expr::Key | Expr::Val => true,
            Expr::Item | Expr::Literal(_) => false,
            Expr::BinaryOp { left, right, .. } => {
                left.references_pair() || right.references_pair()
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Index { expr, .. }
            | Expr::Len(expr)
            | Expr::TypeIs { expr, .. }
            | Expr::CastTo { expr, .. } => expr.references_pair(),
        }
    }

    /// Returns a vector with sort-key entries, convenience for single-key
    /// ordering.
    pub fn asc(self) -> Vec<(Expr, SortOrder)> {
        alloc::vec![(self, SortOrder::Asc)]
    }

    /// Single descending sort key.
    pub fn desc(self) -> Vec<(Expr, SortOrder)> {
        alloc::vec![(self, SortOrder::Desc)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_builders() {
        let lit = Expr::literal(42i64);
        assert!(matches!(lit, Expr::Literal(Value::Int64(42))));

        let eq = Expr::eq(Expr::item(), Expr::literal(1i64));
        assert!(matches!(eq, Expr::BinaryOp { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn test_structural_equality() {
        let a = Expr::gt(Expr::item(), Expr::literal(1i64));
        let b = Expr::gt(Expr::item(), Expr::literal(1i64));
        let c = Expr::gt(Expr::item(), Expr::literal(2i64));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_references_pair() {
        assert!(!Expr::gt(Expr::item(), Expr::literal(0i64)).references_pair());
        assert!(Expr::eq(Expr::key(), Expr::literal("a")).references_pair());
        assert!(Expr::mul(Expr::val(), Expr::literal(10i64)).references_pair());
    }

    #[test]
    fn test_negated_comparison() {
        assert_eq!(BinaryOp::Lt.negated_comparison(), Some(BinaryOp::Ge));
        assert_eq!(BinaryOp::And.negated_comparison(), None);
    }
}
