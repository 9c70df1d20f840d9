//! Arithmetic, bitwise, length and concatenation with Lua 5.4 semantics.
//!
//! Errors come back as plain messages; the executor attaches the span of
//! the unit that raised them.

use crate::coerce;
use lunet_compiler::ast::{BinOp, UnOp};
use lunet_compiler::literal::Number;
use lunet_core::string::StringInterner;
use lunet_core::value::{float_to_integer, Value};

/// Perform a binary arithmetic or bitwise operation.
pub fn arith(op: BinOp, a: &Value, b: &Value, strings: &StringInterner) -> Result<Value, String> {
    if is_bitwise(op) {
        let ia = bitwise_operand(a, b, strings)?;
        let ib = bitwise_operand(b, a, strings)?;
        return Ok(Value::Integer(int_bitwise(op, ia, ib)));
    }

    // Fast path: both integers.
    if let (Value::Integer(ia), Value::Integer(ib)) = (a, b) {
        return int_arith(op, *ia, *ib);
    }

    let (na, nb) = match (
        coerce::to_numeric(a, strings),
        coerce::to_numeric(b, strings),
    ) {
        (Some(na), Some(nb)) => (na, nb),
        (_, None) => return Err(type_error(b, "perform arithmetic on")),
        (None, _) => return Err(type_error(a, "perform arithmetic on")),
    };
    match (na, nb) {
        (Number::Integer(ia), Number::Integer(ib)) => int_arith(op, ia, ib),
        _ => Ok(Value::Float(float_arith(op, as_f64(na), as_f64(nb)))),
    }
}

fn is_bitwise(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shl | BinOp::Shr
    )
}

fn as_f64(n: Number) -> f64 {
    match n {
        Number::Integer(i) => i as f64,
        Number::Float(f) => f,
    }
}

fn type_error(v: &Value, what: &str) -> String {
    format!("attempt to {what} a {} value", v.type_name())
}

/// Integer view of a bitwise operand. `other` is blamed when it is the
/// non-number, matching which operand Lua reports.
fn bitwise_operand(v: &Value, other: &Value, strings: &StringInterner) -> Result<i64, String> {
    match coerce::to_numeric(v, strings) {
        Some(Number::Integer(i)) => Ok(i),
        Some(Number::Float(f)) => float_to_integer(f)
            .ok_or_else(|| "number has no integer representation".to_string()),
        None => {
            let blamed = if coerce::to_numeric(other, strings).is_none() {
                other
            } else {
                v
            };
            Err(type_error(blamed, "perform bitwise operation on"))
        }
    }
}

/// Integer arithmetic. Division and exponentiation always produce floats.
fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value, String> {
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::IDiv => {
            if b == 0 {
                return Err("attempt to perform 'n//0'".to_string());
            }
            lua_idiv(a, b)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err("attempt to perform 'n%0'".to_string());
            }
            lua_imod(a, b)
        }
        BinOp::Div | BinOp::Pow => return Ok(Value::Float(float_arith(op, a as f64, b as f64))),
        _ => unreachable!("{op:?} is not an arithmetic operator"),
    };
    Ok(Value::Integer(result))
}

fn int_bitwise(op: BinOp, a: i64, b: i64) -> i64 {
    match op {
        BinOp::BAnd => a & b,
        BinOp::BOr => a | b,
        BinOp::BXor => a ^ b,
        BinOp::Shl => lua_shl(a, b),
        BinOp::Shr => lua_shr(a, b),
        _ => unreachable!("{op:?} is not a bitwise operator"),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => a.powf(b),
        // Float floor division and modulo by zero follow IEEE 754.
        BinOp::IDiv => (a / b).floor(),
        BinOp::Mod => lua_fmod(a, b),
        _ => unreachable!("{op:?} is not an arithmetic operator"),
    }
}

/// Lua integer division (floor division).
fn lua_idiv(a: i64, b: i64) -> i64 {
    // i64::MIN // -1 wraps to i64::MIN
    let d = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        d - 1
    } else {
        d
    }
}

/// Lua integer modulo; the result takes the divisor's sign.
fn lua_imod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        r.wrapping_add(b)
    } else {
        r
    }
}

/// Lua float modulo: a - floor(a/b)*b.
fn lua_fmod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r > 0.0) != (b > 0.0)) {
        r + b
    } else {
        r
    }
}

fn lua_shl(a: i64, b: i64) -> i64 {
    if b <= -64 || b >= 64 {
        0
    } else if b < 0 {
        lua_shr(a, -b)
    } else {
        (a as u64).wrapping_shl(b as u32) as i64
    }
}

/// Logical (unsigned) right shift.
fn lua_shr(a: i64, b: i64) -> i64 {
    if b <= -64 || b >= 64 {
        0
    } else if b < 0 {
        lua_shl(a, -b)
    } else {
        (a as u64).wrapping_shr(b as u32) as i64
    }
}

/// Perform a unary operation.
pub fn unary(op: UnOp, v: &Value, strings: &StringInterner) -> Result<Value, String> {
    match op {
        UnOp::Not => Ok(Value::Boolean(v.is_falsy())),
        UnOp::Neg => match coerce::to_numeric(v, strings) {
            Some(Number::Integer(i)) => Ok(Value::Integer(i.wrapping_neg())),
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            None => Err(type_error(v, "perform arithmetic on")),
        },
        UnOp::BNot => Ok(Value::Integer(!bitwise_operand(v, v, strings)?)),
        UnOp::Len => match v {
            Value::String(id) => Ok(Value::Integer(strings.get_bytes(*id).len() as i64)),
            Value::Table(t) => Ok(Value::Integer(t.borrow().len())),
            _ => Err(type_error(v, "get length of")),
        },
    }
}

/// String concatenation. Numbers convert to their string form.
pub fn concat(a: &Value, b: &Value, strings: &mut StringInterner) -> Result<Value, String> {
    let sa = coerce::to_string_for_concat(a, strings);
    let sb = coerce::to_string_for_concat(b, strings);
    match (sa, sb) {
        (Some(sa), Some(sb)) => {
            let mut bytes = strings.get_bytes(sa).to_vec();
            bytes.extend_from_slice(strings.get_bytes(sb));
            Ok(Value::String(strings.intern(&bytes)))
        }
        (None, _) => Err(type_error(a, "concatenate")),
        (_, None) => Err(type_error(b, "concatenate")),
    }
}
