/// Literal materialization: raw number and string tokens to constants.
///
/// The parser hands over tokens exactly as written. Decoding happens here so
/// malformed escapes and numbers are reported as compile errors with the
/// literal's span.
use crate::ast::Literal;
use crate::proto::Constant;
use lunet_core::string::{StringId, StringInterner};
use std::fmt;

/// Why a literal token could not be materialized.
#[derive(Clone, Debug, PartialEq)]
pub struct LiteralError {
    pub message: String,
}

impl LiteralError {
    fn new(message: impl Into<String>) -> Self {
        LiteralError {
            message: message.into(),
        }
    }
}

impl fmt::Display for LiteralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LiteralError {}

/// Collaborator used by lowering to turn tokens into constants and names
/// into string ids.
pub trait Literals {
    fn materialize(&mut self, literal: &Literal) -> Result<Constant, LiteralError>;
    fn intern(&mut self, bytes: &[u8]) -> StringId;
}

/// Default materializer backed by a string interner.
pub struct Materializer<'a> {
    pub strings: &'a mut StringInterner,
}

impl<'a> Materializer<'a> {
    pub fn new(strings: &'a mut StringInterner) -> Self {
        Materializer { strings }
    }
}

impl Literals for Materializer<'_> {
    fn materialize(&mut self, literal: &Literal) -> Result<Constant, LiteralError> {
        Ok(match literal {
            Literal::Nil => Constant::Nil,
            Literal::True => Constant::Boolean(true),
            Literal::False => Constant::Boolean(false),
            Literal::Number(text) => match parse_number(text) {
                Some(Number::Integer(i)) => Constant::Integer(i),
                Some(Number::Float(f)) => Constant::Float(f),
                None => return Err(LiteralError::new(format!("malformed number near '{text}'"))),
            },
            Literal::String(raw) => {
                let bytes = decode_string(raw)?;
                Constant::String(self.strings.intern(&bytes))
            }
            Literal::LongString(raw) => {
                // A newline right after the opening bracket is skipped.
                let body = raw
                    .strip_prefix("\r\n")
                    .or_else(|| raw.strip_prefix('\n'))
                    .unwrap_or(raw);
                Constant::String(self.strings.intern(body.as_bytes()))
            }
        })
    }

    fn intern(&mut self, bytes: &[u8]) -> StringId {
        self.strings.intern(bytes)
    }
}

/// A numeric value as read from source text.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

/// Parse a number token (no sign, no surrounding whitespace).
pub fn parse_number(text: &str) -> Option<Number> {
    let bytes = text.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        parse_hex(&text[2..])
    } else {
        parse_decimal(text)
    }
}

/// String to number coercion: optional whitespace and sign around a number token.
pub fn str_to_number(text: &str) -> Option<Number> {
    let t = text.trim_matches(|c: char| c.is_ascii_whitespace());
    let (neg, body) = match t.as_bytes().first()? {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    Some(match parse_number(body)? {
        Number::Integer(i) if neg => Number::Integer(i.wrapping_neg()),
        Number::Float(f) if neg => Number::Float(-f),
        n => n,
    })
}

fn parse_decimal(text: &str) -> Option<Number> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut digits = 0;
    let mut is_float = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        is_float = true;
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != bytes.len() {
        return None;
    }
    if !is_float {
        // Decimal integers that overflow become floats.
        if let Ok(v) = text.parse::<i64>() {
            return Some(Number::Integer(v));
        }
    }
    text.parse::<f64>().ok().map(Number::Float)
}

fn parse_hex(digits: &str) -> Option<Number> {
    let bytes = digits.as_bytes();
    let mut i = 0;
    let mut mantissa: f64 = 0.0;
    // Hex integers wrap around on overflow.
    let mut int_val: u64 = 0;
    let mut any_digit = false;
    let mut is_float = false;
    let mut exponent: i32 = 0;
    while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
        let d = hex_value(bytes[i]);
        int_val = int_val.wrapping_mul(16).wrapping_add(d as u64);
        mantissa = mantissa * 16.0 + d as f64;
        any_digit = true;
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            mantissa = mantissa * 16.0 + hex_value(bytes[i]) as f64;
            exponent -= 4;
            any_digit = true;
            i += 1;
        }
    }
    if !any_digit {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'p' || bytes[i] == b'P') {
        is_float = true;
        i += 1;
        let exp_text_start = i;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let digit_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == digit_start {
            return None;
        }
        let e: i32 = digits[exp_text_start..i].parse().unwrap_or(if bytes[exp_text_start] == b'-' {
            i32::MIN / 2
        } else {
            i32::MAX / 2
        });
        exponent = exponent.saturating_add(e);
    }
    if i != bytes.len() {
        return None;
    }
    if is_float {
        Some(Number::Float(mantissa * 2f64.powi(exponent)))
    } else {
        Some(Number::Integer(int_val as i64))
    }
}

/// Decode the escapes of a quoted string body.
pub fn decode_string(raw: &str) -> Result<Vec<u8>, LiteralError> {
    let src = raw.as_bytes();
    let mut buf = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let ch = src[i];
        if ch != b'\\' {
            buf.push(ch);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&esc) = src.get(i) else {
            return Err(LiteralError::new("unfinished string"));
        };
        i += 1;
        match esc {
            b'a' => buf.push(0x07),
            b'b' => buf.push(0x08),
            b'f' => buf.push(0x0C),
            b'n' | b'\n' => buf.push(b'\n'),
            b'r' => buf.push(b'\r'),
            b't' => buf.push(b'\t'),
            b'v' => buf.push(0x0B),
            b'\\' => buf.push(b'\\'),
            b'\'' => buf.push(b'\''),
            b'"' => buf.push(b'"'),
            b'\r' => {
                if src.get(i) == Some(&b'\n') {
                    i += 1;
                }
                buf.push(b'\n');
            }
            b'x' => {
                let hi = src.get(i).filter(|c| c.is_ascii_hexdigit());
                let lo = src.get(i + 1).filter(|c| c.is_ascii_hexdigit());
                match (hi, lo) {
                    (Some(&h), Some(&l)) => {
                        buf.push((hex_value(h) << 4) | hex_value(l));
                        i += 2;
                    }
                    _ => return Err(LiteralError::new("invalid escape sequence '\\x'")),
                }
            }
            b'u' => {
                if src.get(i) != Some(&b'{') {
                    return Err(LiteralError::new("missing '{' in \\u{xxxx}"));
                }
                i += 1;
                let mut code: u64 = 0;
                let mut count = 0;
                loop {
                    match src.get(i) {
                        Some(b'}') => {
                            i += 1;
                            break;
                        }
                        Some(&c) if c.is_ascii_hexdigit() => {
                            code = code * 16 + hex_value(c) as u64;
                            count += 1;
                            i += 1;
                            if code > 0x7FFF_FFFF {
                                return Err(LiteralError::new("UTF-8 value too large"));
                            }
                        }
                        _ if count == 0 => {
                            return Err(LiteralError::new("missing unicode value"));
                        }
                        _ => return Err(LiteralError::new("missing '}' in \\u{xxxx}")),
                    }
                }
                if count == 0 {
                    return Err(LiteralError::new("missing unicode value"));
                }
                encode_utf8(code as u32, &mut buf);
            }
            b'z' => {
                while i < src.len() && matches!(src[i], b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C) {
                    i += 1;
                }
            }
            b'0'..=b'9' => {
                let mut val = (esc - b'0') as u16;
                for _ in 0..2 {
                    match src.get(i) {
                        Some(&d) if d.is_ascii_digit() => {
                            val = val * 10 + (d - b'0') as u16;
                            i += 1;
                        }
                        _ => break,
                    }
                }
                if val > 255 {
                    return Err(LiteralError::new("decimal escape too large"));
                }
                buf.push(val as u8);
            }
            other => {
                return Err(LiteralError::new(format!(
                    "invalid escape sequence '\\{}'",
                    other as char
                )))
            }
        }
    }
    Ok(buf)
}

/// UTF-8 encoding extended to 6 bytes for values up to 0x7FFFFFFF.
fn encode_utf8(code: u32, buf: &mut Vec<u8>) {
    if code <= 0x7F {
        buf.push(code as u8);
        return;
    }
    // Number of continuation bytes, and the lead-byte prefix.
    let (extra, lead) = match code {
        0..=0x7FF => (1, 0xC0),
        0x800..=0xFFFF => (2, 0xE0),
        0x1_0000..=0x1F_FFFF => (3, 0xF0),
        0x20_0000..=0x3FF_FFFF => (4, 0xF8),
        _ => (5, 0xFC),
    };
    buf.push(lead | (code >> (6 * extra)) as u8);
    for k in (0..extra).rev() {
        buf.push(0x80 | ((code >> (6 * k)) & 0x3F) as u8);
    }
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => unreachable!("caller checked is_ascii_hexdigit"),
    }
}
