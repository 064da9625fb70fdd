// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Row-at-a-time expression evaluation for the federation operators.
//! Three-valued logic for AND/OR; null propagates through everything
//! else.

use std::cmp::Ordering;

use common_rows::Row;
use datatypes::prelude::Value;

use crate::error::{self, Result};
use crate::expr::{BinaryOp, Expr};

pub fn evaluate(expr: &Expr, row: &Row) -> Result<Value> {
    let value = match expr {
        Expr::Column(c) => row
            .values()
            .get(c.index)
            .cloned()
            .ok_or_else(|| {
                error::ExecutionSnafu {
                    detail: format!(
                        "column index {} out of bounds for row of {} values",
                        c.index,
                        row.len()
                    ),
                }
                .build()
            })?,
        Expr::Literal(value) => value.clone(),
        Expr::BinaryOp { left, op, right } => {
            binary(op, evaluate(left, row)?, evaluate(right, row)?)?
        }
        Expr::Not(inner) => match evaluate(inner, row)?.as_bool() {
            Some(b) => Value::Boolean(!b),
            None => Value::Null,
        },
        Expr::Negative(inner) => match evaluate(inner, row)? {
            Value::Integer(v) => Value::Integer(-v),
            Value::Long(v) => Value::Long(-v),
            Value::Double(v) => Value::Double(-v),
            _ => Value::Null,
        },
        Expr::IsNull(inner) => Value::Boolean(evaluate(inner, row)?.is_null()),
        Expr::IsNotNull(inner) => Value::Boolean(!evaluate(inner, row)?.is_null()),
        Expr::Like {
            negated,
            expr,
            pattern,
        } => {
            let target = evaluate(expr, row)?;
            let pattern = evaluate(pattern, row)?;
            match (target.as_str(), pattern.as_str()) {
                (Some(t), Some(p)) => Value::Boolean(like_match(t, p) != *negated),
                _ => Value::Null,
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let target = evaluate(expr, row)?;
            if target.is_null() {
                Value::Null
            } else {
                let mut found = false;
                for item in list {
                    let candidate = evaluate(item, row)?;
                    if !candidate.is_null()
                        && target.compare(&candidate) == Ordering::Equal
                    {
                        found = true;
                        break;
                    }
                }
                Value::Boolean(found != *negated)
            }
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let target = evaluate(expr, row)?;
            let low = evaluate(low, row)?;
            let high = evaluate(high, row)?;
            if target.is_null() || low.is_null() || high.is_null() {
                Value::Null
            } else {
                let inside = target.compare(&low) != Ordering::Less
                    && target.compare(&high) != Ordering::Greater;
                Value::Boolean(inside != *negated)
            }
        }
        Expr::Function { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, row)?);
            }
            scalar_function(name, values)?
        }
        Expr::Cast { expr, to } => cast(evaluate(expr, row)?, *to),
        Expr::InSubquery { .. } | Expr::Exists { .. } => {
            return error::UnsupportedFeatureSnafu {
                feature: "subquery expression at execution time".to_string(),
                suggestion: Some(
                    "the subquery rewrite could not flatten this predicate".into(),
                ),
            }
            .fail();
        }
    };
    Ok(value)
}

/// `predicate` evaluated as a filter: null counts as false.
pub fn evaluate_predicate(expr: &Expr, row: &Row) -> Result<bool> {
    Ok(evaluate(expr, row)?.as_bool().unwrap_or(false))
}

fn binary(op: &BinaryOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinaryOp::And => {
            return Ok(match (left.as_bool(), right.as_bool()) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            });
        }
        BinaryOp::Or => {
            return Ok(match (left.as_bool(), right.as_bool()) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            });
        }
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let value = match op {
        BinaryOp::Eq => Value::Boolean(left.compare(&right) == Ordering::Equal),
        BinaryOp::NotEq => Value::Boolean(left.compare(&right) != Ordering::Equal),
        BinaryOp::Lt => Value::Boolean(left.compare(&right) == Ordering::Less),
        BinaryOp::LtEq => Value::Boolean(left.compare(&right) != Ordering::Greater),
        BinaryOp::Gt => Value::Boolean(left.compare(&right) == Ordering::Greater),
        BinaryOp::GtEq => Value::Boolean(left.compare(&right) != Ordering::Less),
        BinaryOp::Concat => Value::String(format!("{left}{right}")),
        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide
        | BinaryOp::Modulo => arithmetic(op, &left, &right),
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    };
    Ok(value)
}

fn arithmetic(op: &BinaryOp, left: &Value, right: &Value) -> Value {
    // Integer arithmetic stays integral except for division.
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        if !matches!(op, BinaryOp::Divide) {
            return match op {
                BinaryOp::Plus => Value::Long(l.wrapping_add(r)),
                BinaryOp::Minus => Value::Long(l.wrapping_sub(r)),
                BinaryOp::Multiply => Value::Long(l.wrapping_mul(r)),
                BinaryOp::Modulo if r != 0 => Value::Long(l % r),
                _ => Value::Null,
            };
        }
    }
    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Value::Null;
    };
    match op {
        BinaryOp::Plus => Value::Double(l + r),
        BinaryOp::Minus => Value::Double(l - r),
        BinaryOp::Multiply => Value::Double(l * r),
        BinaryOp::Divide if r != 0.0 => Value::Double(l / r),
        BinaryOp::Modulo if r != 0.0 => Value::Double(l % r),
        _ => Value::Null,
    }
}

fn scalar_function(name: &str, args: Vec<Value>) -> Result<Value> {
    let value = match name {
        "UPPER" => match args.first().and_then(|v| v.as_str()) {
            Some(s) => Value::String(s.to_uppercase()),
            None => Value::Null,
        },
        "LOWER" => match args.first().and_then(|v| v.as_str()) {
            Some(s) => Value::String(s.to_lowercase()),
            None => Value::Null,
        },
        "ABS" => match args.first() {
            Some(Value::Integer(v)) => Value::Integer(v.abs()),
            Some(Value::Long(v)) => Value::Long(v.abs()),
            Some(Value::Double(v)) => Value::Double(v.abs()),
            _ => Value::Null,
        },
        "LENGTH" | "CHAR_LENGTH" => match args.first().and_then(|v| v.as_str()) {
            Some(s) => Value::Long(s.chars().count() as i64),
            None => Value::Null,
        },
        "COALESCE" => args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        "CONCAT" => {
            let mut out = String::new();
            for arg in &args {
                if arg.is_null() {
                    return Ok(Value::Null);
                }
                out.push_str(&arg.to_string());
            }
            Value::String(out)
        }
        "TRIM" => match args.first().and_then(|v| v.as_str()) {
            Some(s) => Value::String(s.trim().to_string()),
            None => Value::Null,
        },
        other => {
            return error::UnsupportedFeatureSnafu {
                feature: format!("scalar function {other} at the federation layer"),
                suggestion: None,
            }
            .fail();
        }
    };
    Ok(value)
}

fn cast(value: Value, to: datatypes::prelude::ConcreteDataType) -> Value {
    use datatypes::prelude::ConcreteDataType as T;
    if value.is_null() {
        return Value::Null;
    }
    match to {
        T::String => Value::String(value.to_string()),
        T::Integer => match value.as_i64() {
            Some(v) => Value::Integer(v as i32),
            None => value
                .as_str()
                .and_then(|s| s.trim().parse::<i32>().ok())
                .map(Value::Integer)
                .unwrap_or(Value::Null),
        },
        T::Long => match value.as_i64() {
            Some(v) => Value::Long(v),
            None => match value.as_f64() {
                Some(v) => Value::Long(v as i64),
                None => value
                    .as_str()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .map(Value::Long)
                    .unwrap_or(Value::Null),
            },
        },
        T::Double => match value.as_f64() {
            Some(v) => Value::Double(v),
            None => value
                .as_str()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .map(Value::Double)
                .unwrap_or(Value::Null),
        },
        T::Boolean => match value {
            Value::Boolean(b) => Value::Boolean(b),
            other => match other.as_i64() {
                Some(v) => Value::Boolean(v != 0),
                None => Value::Null,
            },
        },
        _ => value,
    }
}

/// SQL LIKE with `%` and `_`, case-sensitive. Also serves the catalog's
/// LIKE-style metadata patterns.
pub(crate) fn like_match(target: &str, pattern: &str) -> bool {
    fn inner(t: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((pc, p_rest)) if *pc == '%' => {
                (0..=t.len()).any(|skip| inner(&t[skip..], p_rest))
            }
            Some((pc, p_rest)) => match t.split_first() {
                Some((tc, t_rest)) => (*pc == '_' || pc == tc) && inner(t_rest, p_rest),
                None => false,
            },
        }
    }
    let t: Vec<char> = target.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    inner(&t, &p)
}

#[cfg(test)]
mod tests {
    use datatypes::prelude::ConcreteDataType;

    use super::*;

    #[test]
    fn test_three_valued_logic() {
        let null = Value::Null;
        let t = Value::Boolean(true);
        let f = Value::Boolean(false);
        assert_eq!(
            Value::Boolean(false),
            binary(&BinaryOp::And, null.clone(), f.clone()).unwrap()
        );
        assert_eq!(Value::Null, binary(&BinaryOp::And, null.clone(), t.clone()).unwrap());
        assert_eq!(Value::Boolean(true), binary(&BinaryOp::Or, null, t).unwrap());
    }

    #[test]
    fn test_predicate_null_is_false() {
        let expr = Expr::column(0, "x", ConcreteDataType::Integer, true)
            .eq(Expr::literal(1));
        let row = Row::new(vec![Value::Null]);
        assert!(!evaluate_predicate(&expr, &row).unwrap());
    }

    #[test]
    fn test_like() {
        assert!(like_match("federated", "fed%"));
        assert!(like_match("abc", "a_c"));
        assert!(!like_match("abc", "a_b"));
    }
}
