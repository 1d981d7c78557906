//! Evaluation of compiled expressions against a value binding.

use indexmap::IndexMap;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, UnaryOp};

/// Variable values for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Declared variable names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    /// The referenced data is not (yet) present in the bound value.
    #[error("path {path:?} is not present")]
    MissingPath { path: String },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("function {0:?} is not supported by the built-in evaluator")]
    UnsupportedFunction(String),

    #[error("division by zero in {0:?}")]
    DivisionByZero(String),
}

impl EvalError {
    /// Missing-data errors are resolvable by waiting for upstream state;
    /// everything else is a terminal rendering failure.
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            EvalError::MissingPath { .. } | EvalError::UnknownVariable(_)
        )
    }
}

pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<Value, EvalError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(Value::Number((*n).into())),
        Expr::Float(n) => Number::from_f64(*n)
            .map(Value::Number)
            .ok_or_else(|| EvalError::TypeMismatch(format!("non-finite literal {n}"))),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::Member(base, field) => {
            let value = evaluate(base, bindings)?;
            value
                .get(field)
                .cloned()
                .ok_or_else(|| EvalError::MissingPath {
                    path: expr.to_string(),
                })
        }
        Expr::Index(base, index) => {
            let value = evaluate(base, bindings)?;
            let key = evaluate(index, bindings)?;
            let item = match (&value, &key) {
                (Value::Array(items), Value::Number(n)) => {
                    n.as_u64().and_then(|i| items.get(i as usize))
                }
                (Value::Object(map), Value::String(s)) => map.get(s.as_str()),
                _ => {
                    return Err(EvalError::TypeMismatch(format!(
                        "cannot index {} with {}",
                        type_name(&value),
                        type_name(&key)
                    )));
                }
            };
            item.cloned().ok_or_else(|| EvalError::MissingPath {
                path: expr.to_string(),
            })
        }
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, bindings)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Unary(op, inner) => {
            let value = evaluate(inner, bindings)?;
            match (op, value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Number(n)) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Value::Number((-i).into()))
                    } else {
                        Number::from_f64(-n.as_f64().unwrap_or(f64::NAN))
                            .map(Value::Number)
                            .ok_or_else(|| EvalError::TypeMismatch("negation overflow".into()))
                    }
                }
                (op, value) => Err(EvalError::TypeMismatch(format!(
                    "unary {op:?} on {}",
                    type_name(&value)
                ))),
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(expr, *op, lhs, rhs, bindings),
        Expr::Ternary(cond, then, otherwise) => match evaluate(cond, bindings)? {
            Value::Bool(true) => evaluate(then, bindings),
            Value::Bool(false) => evaluate(otherwise, bindings),
            other => Err(EvalError::TypeMismatch(format!(
                "ternary condition is {}, expected boolean",
                type_name(&other)
            ))),
        },
        Expr::Call { name, .. } => Err(EvalError::UnsupportedFunction(name.clone())),
    }
}

fn binary(
    whole: &Expr,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    bindings: &Bindings,
) -> Result<Value, EvalError> {
    // Short-circuit boolean operators before evaluating the right side.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let left = as_bool(evaluate(lhs, bindings)?)?;
        return match (op, left) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(as_bool(evaluate(rhs, bindings)?)?)),
        };
    }

    let left = evaluate(lhs, bindings)?;
    let right = evaluate(rhs, bindings)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &left, &right),
        BinaryOp::Add => add(&left, &right),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(whole, op, &left, &right)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&b.as_f64().unwrap_or(f64::NAN))
            .ok_or_else(|| EvalError::TypeMismatch("incomparable numbers".into()))?,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (a, b) => {
            return Err(EvalError::TypeMismatch(format!(
                "cannot compare {} with {}",
                type_name(a),
                type_name(b)
            )));
        }
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Ok(Value::Number((x + y).into())),
            _ => float(a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN)),
        },
        (a, b) => Err(EvalError::TypeMismatch(format!(
            "cannot add {} and {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

fn arithmetic(whole: &Expr, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let (a, b) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        (a, b) => {
            return Err(EvalError::TypeMismatch(format!(
                "arithmetic on {} and {}",
                type_name(a),
                type_name(b)
            )));
        }
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return match op {
            BinaryOp::Sub => Ok(Value::Number((x - y).into())),
            BinaryOp::Mul => Ok(Value::Number((x * y).into())),
            BinaryOp::Div if y == 0 => Err(EvalError::DivisionByZero(whole.to_string())),
            BinaryOp::Div => Ok(Value::Number((x / y).into())),
            BinaryOp::Mod if y == 0 => Err(EvalError::DivisionByZero(whole.to_string())),
            BinaryOp::Mod => Ok(Value::Number((x % y).into())),
            _ => unreachable!(),
        };
    }
    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
    match op {
        BinaryOp::Sub => float(x - y),
        BinaryOp::Mul => float(x * y),
        BinaryOp::Div if y == 0.0 => Err(EvalError::DivisionByZero(whole.to_string())),
        BinaryOp::Div => float(x / y),
        BinaryOp::Mod => float(x % y),
        _ => unreachable!(),
    }
}

fn float(value: f64) -> Result<Value, EvalError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| EvalError::TypeMismatch("non-finite arithmetic result".into()))
}

fn as_bool(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeMismatch(format!(
            "expected boolean, found {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
