//! Tree-walking evaluation and built-in functions.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::{BinaryOp, Expression, UnaryOp};
use crate::error::{ExpressionError, ExpressionResult};
use crate::memory::MemoryRead;
use crate::value::ValueExt;

pub(super) fn evaluate(expr: &Expression, memory: &dyn MemoryRead) -> ExpressionResult<Value> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Path(path) => Ok(memory.get_value(path).unwrap_or(Value::Null)),
        Expression::Unary(UnaryOp::Not, inner) => {
            Ok(Value::Bool(!evaluate(inner, memory)?.is_truthy()))
        }
        Expression::Unary(UnaryOp::Negate, inner) => {
            arithmetic(BinaryOp::Sub, &Value::from(0), &evaluate(inner, memory)?)
        }
        Expression::Binary(BinaryOp::And, left, right) => Ok(Value::Bool(
            evaluate(left, memory)?.is_truthy() && evaluate(right, memory)?.is_truthy(),
        )),
        Expression::Binary(BinaryOp::Or, left, right) => Ok(Value::Bool(
            evaluate(left, memory)?.is_truthy() || evaluate(right, memory)?.is_truthy(),
        )),
        Expression::Binary(op, left, right) => {
            let left = evaluate(left, memory)?;
            let right = evaluate(right, memory)?;
            binary(*op, &left, &right)
        }
        Expression::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, memory))
                .collect::<ExpressionResult<Vec<_>>>()?;
            call(name, &args)
        }
    }
}

/// Equality with numeric normalization: `1 == 1.0`.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> ExpressionResult<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| ExpressionError::type_mismatch("numbers are not comparable")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExpressionError::type_mismatch(format!(
            "cannot compare {left} with {right}"
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> ExpressionResult<Value> {
    let ordering = |accept: fn(Ordering) -> bool| compare(left, right).map(|o| Value::Bool(accept(o)));
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => ordering(Ordering::is_lt),
        BinaryOp::Le => ordering(Ordering::is_le),
        BinaryOp::Gt => ordering(Ordering::is_gt),
        BinaryOp::Ge => ordering(Ordering::is_ge),
        BinaryOp::Add if left.is_string() || right.is_string() => Ok(Value::String(format!(
            "{}{}",
            left.to_display_string(),
            right.to_display_string()
        ))),
        _ => arithmetic(op, left, right),
    }
}

fn float(value: f64) -> ExpressionResult<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::type_mismatch("arithmetic produced a non-finite number"))
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> ExpressionResult<Value> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Mod if b == 0 => return Err(ExpressionError::DivisionByZero),
            BinaryOp::Div => (a % b == 0).then(|| a / b),
            BinaryOp::Mod => a.checked_rem(b),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ExpressionError::type_mismatch(format!(
            "'{}' needs numbers, got {left} and {right}",
            op.symbol()
        )));
    };
    match op {
        BinaryOp::Add => float(a + b),
        BinaryOp::Sub => float(a - b),
        BinaryOp::Mul => float(a * b),
        BinaryOp::Div if b == 0.0 => Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => float(a / b),
        BinaryOp::Mod if b == 0.0 => Err(ExpressionError::DivisionByZero),
        BinaryOp::Mod => float(a % b),
        other => Err(ExpressionError::type_mismatch(format!(
            "'{}' is not arithmetic",
            other.symbol()
        ))),
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> ExpressionResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExpressionError::Arity {
            name: name.to_owned(),
            expected: expected.to_string(),
            got: args.len(),
        })
    }
}

fn length(value: &Value) -> ExpressionResult<usize> {
    match value {
        Value::Null => Ok(0),
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        other => Err(ExpressionError::type_mismatch(format!("{other} has no length"))),
    }
}

fn string_arg<'v>(name: &str, value: &'v Value) -> ExpressionResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| ExpressionError::type_mismatch(format!("{name} expects a string, got {value}")))
}

fn call(name: &str, args: &[Value]) -> ExpressionResult<Value> {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "exists" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(!args[0].is_null()))
        }
        "empty" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(length(&args[0])? == 0))
        }
        "count" | "length" => {
            arity(name, args, 1)?;
            Ok(Value::from(length(&args[0])?))
        }
        "not" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }
        "contains" => {
            arity(name, args, 2)?;
            let found = match (&args[0], &args[1]) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                (Value::Object(_), Value::String(key)) => args[0].get_ci(key).is_some(),
                (Value::Null, _) => false,
                (haystack, _) => {
                    return Err(ExpressionError::type_mismatch(format!(
                        "contains cannot search {haystack}"
                    )));
                }
            };
            Ok(Value::Bool(found))
        }
        "concat" => Ok(Value::String(
            args.iter().map(ValueExt::to_display_string).collect(),
        )),
        "join" => {
            arity(name, args, 2)?;
            let separator = string_arg(name, &args[1])?;
            let items = match &args[0] {
                Value::Array(items) => items,
                Value::Null => return Ok(Value::String(String::new())),
                other => {
                    return Err(ExpressionError::type_mismatch(format!("join expects an array, got {other}")));
                }
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(ValueExt::to_display_string)
                    .collect::<Vec<_>>()
                    .join(separator),
            ))
        }
        "tolower" => {
            arity(name, args, 1)?;
            Ok(Value::String(args[0].to_display_string().to_lowercase()))
        }
        "toupper" => {
            arity(name, args, 1)?;
            Ok(Value::String(args[0].to_display_string().to_uppercase()))
        }
        "trim" => {
            arity(name, args, 1)?;
            Ok(Value::String(args[0].to_display_string().trim().to_owned()))
        }
        "string" => {
            arity(name, args, 1)?;
            Ok(Value::String(args[0].to_display_string()))
        }
        "int" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Ok(Value::from(i)),
                    None => Ok(Value::from(n.as_f64().unwrap_or_default().trunc() as i64)),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| ExpressionError::type_mismatch(format!("'{s}' is not an integer"))),
                other => Err(ExpressionError::type_mismatch(format!("int cannot convert {other}"))),
            }
        }
        "float" => {
            arity(name, args, 1)?;
            let parsed = match &args[0] {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .ok_or_else(|| ExpressionError::type_mismatch(format!("float cannot convert {}", args[0])))
                .and_then(float)
        }
        "if" => {
            arity(name, args, 3)?;
            Ok(if args[0].is_truthy() { args[1].clone() } else { args[2].clone() })
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(text: &str) -> ExpressionResult<Value> {
        let memory = json!({
            "user": { "name": "Ada", "age": 36, "todos": ["milk", "eggs"] },
            "turn": { "dialogEvent": { "name": "recognizedIntent", "value": { "intent": "Add" } } },
            "dialog": { "count": 2 }
        });
        Expression::parse(text)?.evaluate(&memory)
    }

    #[test]
    fn test_paths_and_missing_values() {
        assert_eq!(eval("user.name").unwrap(), json!("Ada"));
        assert_eq!(eval("USER.TODOS[1]").unwrap(), json!("eggs"));
        assert_eq!(eval("user.missing").unwrap(), Value::Null);
        assert_eq!(eval("$count + 1").unwrap(), json!(3));
    }

    #[test]
    fn test_logic_and_equality() {
        assert_eq!(
            eval("turn.dialogEvent.name == 'recognizedIntent' && turn.dialogEvent.value.intent == 'Add'")
                .unwrap(),
            json!(true)
        );
        assert_eq!(eval("user.missing || 'fallback'").unwrap(), json!(true));
        assert_eq!(eval("!exists(user.missing)").unwrap(), json!(true));
        assert_eq!(eval("1 == 1.0").unwrap(), json!(true));
        assert_eq!(eval("'a' != 'A'").unwrap(), json!(true));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        assert_eq!(eval("false && (1 / 0)").unwrap(), json!(false));
        assert_eq!(eval("true || (1 / 0)").unwrap(), json!(true));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("7 / 2").unwrap(), json!(3.5));
        assert_eq!(eval("8 / 2").unwrap(), json!(4));
        assert_eq!(eval("7 % 3").unwrap(), json!(1));
        assert_eq!(eval("-user.age").unwrap(), json!(-36));
        assert_eq!(eval("'n=' + 3").unwrap(), json!("n=3"));
        assert_eq!(eval("1 / 0"), Err(ExpressionError::DivisionByZero));
        assert!(matches!(eval("null + 1"), Err(ExpressionError::TypeMismatch(_))));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("user.age >= 18").unwrap(), json!(true));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), json!(true));
        assert!(eval("user.missing > 0").is_err());
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("count(user.todos)").unwrap(), json!(2));
        assert_eq!(eval("count(user.nothing)").unwrap(), json!(0));
        assert_eq!(eval("contains(user.todos, 'milk')").unwrap(), json!(true));
        assert_eq!(eval("contains(user.name, 'd')").unwrap(), json!(true));
        assert_eq!(eval("join(user.todos, ', ')").unwrap(), json!("milk, eggs"));
        assert_eq!(eval("concat(user.name, '-', 1)").unwrap(), json!("Ada-1"));
        assert_eq!(eval("toUpper(user.name)").unwrap(), json!("ADA"));
        assert_eq!(eval("int('42')").unwrap(), json!(42));
        assert_eq!(eval("float('1.5')").unwrap(), json!(1.5));
        assert_eq!(eval("if(empty(user.todos), 'none', 'some')").unwrap(), json!("some"));
        assert!(matches!(eval("nope(1)"), Err(ExpressionError::UnknownFunction(_))));
        assert!(matches!(eval("exists()"), Err(ExpressionError::Arity { .. })));
    }
}
