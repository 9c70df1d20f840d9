//! Comparison operations with Lua 5.4 semantics.

use lunet_compiler::ast::BinOp;
use lunet_core::string::StringInterner;
use lunet_core::value::Value;
use std::cmp::Ordering;

/// Evaluate a comparison operator.
pub fn compare(op: BinOp, a: &Value, b: &Value, strings: &StringInterner) -> Result<bool, String> {
    match op {
        BinOp::Eq => Ok(a == b),
        BinOp::Ne => Ok(a != b),
        BinOp::Lt => lua_lt(a, b, strings),
        BinOp::Le => lua_le(a, b, strings),
        BinOp::Gt => lua_lt(b, a, strings),
        BinOp::Ge => lua_le(b, a, strings),
        _ => unreachable!("{op:?} is not a comparison"),
    }
}

/// Lua less-than comparison.
pub fn lua_lt(a: &Value, b: &Value, strings: &StringInterner) -> Result<bool, String> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x < y),
        (Value::Float(x), Value::Float(y)) => Ok(x < y),
        (Value::Integer(i), Value::Float(f)) => Ok(int_lt_float(*i, *f)),
        (Value::Float(f), Value::Integer(i)) => Ok(float_lt_int(*f, *i)),
        (Value::String(x), Value::String(y)) => {
            Ok(strings.get_bytes(*x).cmp(strings.get_bytes(*y)) == Ordering::Less)
        }
        _ => Err(compare_error(a, b)),
    }
}

/// Lua less-than-or-equal comparison.
pub fn lua_le(a: &Value, b: &Value, strings: &StringInterner) -> Result<bool, String> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x <= y),
        (Value::Float(x), Value::Float(y)) => Ok(x <= y),
        (Value::Integer(i), Value::Float(f)) => Ok(int_le_float(*i, *f)),
        (Value::Float(f), Value::Integer(i)) => Ok(float_le_int(*f, *i)),
        (Value::String(x), Value::String(y)) => {
            Ok(strings.get_bytes(*x).cmp(strings.get_bytes(*y)) != Ordering::Greater)
        }
        _ => Err(compare_error(a, b)),
    }
}

fn compare_error(a: &Value, b: &Value) -> String {
    let (ta, tb) = (a.type_name(), b.type_name());
    if ta == tb {
        format!("attempt to compare two {ta} values")
    } else {
        format!("attempt to compare {ta} with {tb}")
    }
}

// Mixed comparisons are exact: the float is rounded toward the integer
// side instead of converting the integer, which may lose precision.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

fn int_lt_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        true
    } else if f > -TWO_POW_63 {
        i < f.ceil() as i64
    } else {
        false
    }
}

fn int_le_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        true
    } else if f >= -TWO_POW_63 {
        i <= f.floor() as i64
    } else {
        false
    }
}

fn float_lt_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        false
    } else if f >= -TWO_POW_63 {
        (f.floor() as i64) < i
    } else {
        true
    }
}

fn float_le_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        false
    } else if f > -TWO_POW_63 {
        f.ceil() as i64 <= i
    } else {
        true
    }
}
