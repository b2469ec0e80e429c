//! Expression evaluation.
//!
//! Evaluation never panics on bad data: every failure mode (type mismatch,
//! division by zero, out-of-range index, failed cast) comes back as an
//! `Err`, which the consuming node attributes to the element it was
//! evaluating.

use crate::expr::{BinaryOp, Expr, UnaryOp};
use alloc::string::ToString;
use alloc::vec::Vec;
use rivus_core::{DataType, Error, Result, Value};

/// What an expression evaluates against: a single element, or one
/// key/value pair.
#[derive(Clone, Copy, Debug)]
pub struct EvalContext<'a> {
    item: &'a Value,
    pair: Option<(&'a Value, &'a Value)>,
}

impl<'a> EvalContext<'a> {
    /// Context for evaluating against a single element.
    pub fn item(item: &'a Value) -> Self {
        Self { item, pair: None }
    }

    /// Context for evaluating against a key/value pair. `Item` resolves to
    /// the value half.
    pub fn pair(key: &'a Value, value: &'a Value) -> Self {
        Self {
            item: value,
            pair: Some((key, value)),
        }
    }
}

/// Evaluates an expression, returning the result or the evaluation fault.
pub fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    match expr {
        Expr::Item => Ok(ctx.item.clone()),
        Expr::Key => match ctx.pair {
            Some((key, _)) => Ok(key.clone()),
            None => Err(Error::evaluation("Key referenced outside a pair context")),
        },
        Expr::Val => match ctx.pair {
            Some((_, value)) => Ok(value.clone()),
            None => Err(Error::evaluation("Val referenced outside a pair context")),
        },
        Expr::Literal(value) => Ok(value.clone()),
        Expr::BinaryOp { left, op, right } => eval_binary(left, *op, right, ctx),
        Expr::UnaryOp { op, expr } => eval_unary(*op, expr, ctx),
        Expr::Index { expr, index } => {
            let value = eval(expr, ctx)?;
            match value {
                Value::Array(items) => items
                    .get(*index)
                    .cloned()
                    .ok_or(Error::index_out_of_range(*index, items.len())),
                other => Err(Error::type_mismatch(DataType::Array, other.data_type())),
            }
        }
        Expr::Len(expr) => {
            let value = eval(expr, ctx)?;
            match value {
                Value::Array(items) => Ok(Value::Int64(items.len() as i64)),
                Value::String(s) => Ok(Value::Int64(s.chars().count() as i64)),
                other => Err(Error::type_mismatch(DataType::Array, other.data_type())),
            }
        }
        Expr::TypeIs { expr, ty } => {
            let value = eval(expr, ctx)?;
            Ok(Value::Boolean(value.data_type() == Some(*ty)))
        }
        Expr::CastTo { expr, ty } => cast(eval(expr, ctx)?, *ty),
    }
}

/// Evaluates an expression as a predicate. A non-Boolean result is a
/// type-mismatch fault, not `false`.
pub fn eval_predicate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<bool> {
    match eval(expr, ctx)? {
        Value::Boolean(b) => Ok(b),
        other => Err(Error::type_mismatch(DataType::Boolean, other.data_type())),
    }
}

fn eval_binary(left: &Expr, op: BinaryOp, right: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    // Short-circuit logical operators before evaluating the right side.
    if op == BinaryOp::And || op == BinaryOp::Or {
        let l = as_bool(eval(left, ctx)?)?;
        return match (op, l) {
            (BinaryOp::And, false) => Ok(Value::Boolean(false)),
            (BinaryOp::Or, true) => Ok(Value::Boolean(true)),
            _ => Ok(Value::Boolean(as_bool(eval(right, ctx)?)?)),
        };
    }

    let l = eval(left, ctx)?;
    let r = eval(right, ctx)?;

    match op {
        BinaryOp::Eq => Ok(Value::Boolean(l == r)),
        BinaryOp::Ne => Ok(Value::Boolean(l != r)),
        BinaryOp::Lt => Ok(Value::Boolean(l < r)),
        BinaryOp::Le => Ok(Value::Boolean(l <= r)),
        BinaryOp::Gt => Ok(Value::Boolean(l > r)),
        BinaryOp::Ge => Ok(Value::Boolean(l >= r)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(l, op, r)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_unary(op: UnaryOp, expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    let value = eval(expr, ctx)?;
    match op {
        UnaryOp::Not => Ok(Value::Boolean(!as_bool(value)?)),
        UnaryOp::Neg => match value {
            Value::Int64(v) => Ok(Value::Int64(v.wrapping_neg())),
            Value::Float64(v) => Ok(Value::Float64(-v)),
            other => Err(Error::type_mismatch(DataType::Int64, other.data_type())),
        },
        UnaryOp::IsNull => Ok(Value::Boolean(value.is_null())),
        UnaryOp::IsNotNull => Ok(Value::Boolean(!value.is_null())),
    }
}

fn as_bool(value: Value) -> Result<bool> {
    match value {
        Value::Boolean(b) => Ok(b),
        other => Err(Error::type_mismatch(DataType::Boolean, other.data_type())),
    }
}

fn arithmetic(l: Value, op: BinaryOp, r: Value) -> Result<Value> {
    // Int64 op Int64 stays integral; anything else numeric widens to f64.
    match (&l, &r) {
        (Value::Int64(a), Value::Int64(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => Ok(Value::Int64(a.wrapping_add(b))),
                BinaryOp::Sub => Ok(Value::Int64(a.wrapping_sub(b))),
                BinaryOp::Mul => Ok(Value::Int64(a.wrapping_mul(b))),
                BinaryOp::Div => {
                    if b == 0 {
                        Err(Error::DivideByZero)
                    } else {
                        Ok(Value::Int64(a.wrapping_div(b)))
                    }
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        Err(Error::DivideByZero)
                    } else {
                        Ok(Value::Int64(a.wrapping_rem(b)))
                    }
                }
                _ => unreachable!("non-arithmetic op"),
            }
        }
        _ => {
            let a = l
                .as_numeric()
                .ok_or(Error::type_mismatch(DataType::Float64, l.data_type()))?;
            let b = r
                .as_numeric()
                .ok_or(Error::type_mismatch(DataType::Float64, r.data_type()))?;
            match op {
                BinaryOp::Add => Ok(Value::Float64(a + b)),
                BinaryOp::Sub => Ok(Value::Float64(a - b)),
                BinaryOp::Mul => Ok(Value::Float64(a * b)),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Err(Error::DivideByZero)
                    } else {
                        Ok(Value::Float64(a / b))
                    }
                }
                BinaryOp::Mod => {
                    if b == 0.0 {
                        Err(Error::DivideByZero)
                    } else {
                        Ok(Value::Float64(a % b))
                    }
                }
                _ => unreachable!("non-arithmetic op"),
            }
        }
    }
}

fn cast(value: Value, ty: DataType) -> Result<Value> {
    if value.data_type() == Some(ty) {
        return Ok(value);
    }
    match (value, ty) {
        (Value::Int64(v), DataType::Float64) => Ok(Value::Float64(v as f64)),
        (Value::Float64(v), DataType::Int64) => {
            if v % 1.0 == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                Ok(Value::Int64(v as i64))
            } else {
                Err(Error::evaluation("float cannot be cast to int64 exactly"))
            }
        }
        (Value::Int64(v), DataType::String) => Ok(Value::String(v.to_string())),
        (Value::Float64(v), DataType::String) => Ok(Value::String(v.to_string())),
        (Value::Boolean(v), DataType::String) => Ok(Value::String(v.to_string())),
        (Value::String(s), DataType::Int64) => s
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|_| Error::evaluation("string does not parse as int64")),
        (Value::String(s), DataType::Float64) => s
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| Error::evaluation("string does not parse as float64")),
        (other, ty) => Err(Error::type_mismatch(ty, other.data_type())),
    }
}

/// Evaluates a list of sort-key expressions against one element, capturing
/// per-key faults.
pub fn eval_keys(keys: &[Expr], item: &Value) -> Vec<Result<Value>> {
    let ctx = EvalContext::item(item);
    keys.iter().map(|k| eval(k, &ctx)).collect()
}
