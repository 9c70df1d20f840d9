//! Type coercion helpers for Lua 5.4 semantics.

use lunet_compiler::literal::{str_to_number, Number};
use lunet_core::string::{StringId, StringInterner};
use lunet_core::value::{float_to_integer, Function, Value};
use std::rc::Rc;

/// Numeric view of a value; strings convert when they spell a number.
pub fn to_numeric(v: &Value, strings: &StringInterner) -> Option<Number> {
    match v {
        Value::Integer(i) => Some(Number::Integer(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        Value::String(id) => {
            let s = std::str::from_utf8(strings.get_bytes(*id)).ok()?;
            str_to_number(s)
        }
        _ => None,
    }
}

/// Try to convert a value to f64. Integers convert to float.
pub fn to_number(v: &Value, strings: &StringInterner) -> Option<f64> {
    match to_numeric(v, strings)? {
        Number::Integer(i) => Some(i as f64),
        Number::Float(f) => Some(f),
    }
}

/// Try to convert a value to i64. Floats must have an exact integer value.
pub fn to_integer(v: &Value, strings: &StringInterner) -> Option<i64> {
    match to_numeric(v, strings)? {
        Number::Integer(i) => Some(i),
        Number::Float(f) => float_to_integer(f),
    }
}

/// Convert a value to a string for concatenation. Only strings and numbers qualify.
pub fn to_string_for_concat(v: &Value, strings: &mut StringInterner) -> Option<StringId> {
    match v {
        Value::String(id) => Some(*id),
        Value::Integer(i) => Some(strings.intern(i.to_string().as_bytes())),
        Value::Float(f) => Some(strings.intern(format_float(*f).as_bytes())),
        _ => None,
    }
}

/// Format a float the way Lua's `%.14g` does, keeping a `.0` on integral values.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format_g14(f);
    if s.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        s + ".0"
    } else {
        s
    }
}

fn format_g14(f: f64) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    // Exponent after rounding to 14 significant digits decides the style.
    let sci = format!("{f:.13e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..14).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", strip_fraction_zeros(mantissa), exp.abs())
    } else {
        let fixed = format!("{:.*}", (13 - exp) as usize, f);
        strip_fraction_zeros(&fixed).to_string()
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// `tostring` rendering of any value.
pub fn display_value(v: &Value, strings: &StringInterner) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::String(id) => strings.display(*id),
        Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
        Value::Function(Function::Lua(c)) => format!("function: {:p}", Rc::as_ptr(c)),
        Value::Function(Function::Native(n)) => format!("function: builtin: {}", n.name),
    }
}
