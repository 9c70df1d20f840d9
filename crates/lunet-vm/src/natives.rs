//! Host functions installed in every VM's globals.
//!
//! Only the basics a program needs to inspect values, raise errors and
//! iterate tables. Anything that must call back into Lua code is left out.

use crate::coerce;
use crate::vm::Vm;
use lunet_compiler::literal::Number;
use lunet_core::table::Table;
use lunet_core::value::{Function, NativeContext, NativeError, Value};
use std::cell::RefCell;
use std::rc::Rc;

pub fn register_base(vm: &mut Vm) {
    vm.register_native("print", native_print);
    vm.register_native("type", native_type);
    vm.register_native("tostring", native_tostring);
    vm.register_native("tonumber", native_tonumber);
    vm.register_native("error", native_error);
    vm.register_native("assert", native_assert);
    vm.register_native("select", native_select);
    vm.register_native("next", native_next);
    vm.register_native("pairs", native_pairs);
    vm.register_native("ipairs", native_ipairs);
    vm.register_native("rawequal", native_rawequal);
    vm.register_native("rawlen", native_rawlen);
    vm.register_native("rawget", native_rawget);
    vm.register_native("rawset", native_rawset);
}

type NativeResult = Result<Vec<Value>, NativeError>;

fn arg(args: &[Value], n: usize) -> Value {
    args.get(n).cloned().unwrap_or_default()
}

fn check_any(args: &[Value], n: usize, fname: &str) -> Result<Value, NativeError> {
    args.get(n).cloned().ok_or_else(|| {
        NativeError::Message(format!("bad argument #{} to '{fname}' (value expected)", n + 1))
    })
}

fn check_table<'a>(
    args: &'a [Value],
    n: usize,
    fname: &str,
) -> Result<&'a Rc<RefCell<Table>>, NativeError> {
    match args.get(n) {
        Some(Value::Table(t)) => Ok(t),
        other => {
            let got = other.map_or("no value", Value::type_name);
            Err(NativeError::Message(format!(
                "bad argument #{} to '{fname}' (table expected, got {got})",
                n + 1
            )))
        }
    }
}

fn native_print(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let parts: Vec<String> = args
        .iter()
        .map(|v| coerce::display_value(v, ctx.strings))
        .collect();
    println!("{}", parts.join("\t"));
    Ok(vec![])
}

fn native_type(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let v = check_any(args, 0, "type")?;
    let id = ctx.strings.intern(v.type_name().as_bytes());
    Ok(vec![Value::String(id)])
}

fn native_tostring(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let v = check_any(args, 0, "tostring")?;
    let text = coerce::display_value(&v, ctx.strings);
    Ok(vec![Value::String(ctx.strings.intern(text.as_bytes()))])
}

fn native_tonumber(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let v = check_any(args, 0, "tonumber")?;
    let base = arg(args, 1);
    if base.is_nil() {
        let n = match coerce::to_numeric(&v, ctx.strings) {
            Some(Number::Integer(i)) => Value::Integer(i),
            Some(Number::Float(f)) => Value::Float(f),
            None => Value::Nil,
        };
        return Ok(vec![n]);
    }
    let base = coerce::to_integer(&base, ctx.strings)
        .filter(|b| (2..=36).contains(b))
        .ok_or("bad argument #2 to 'tonumber' (base out of range)")?;
    let Value::String(id) = v else {
        return Err(format!(
            "bad argument #1 to 'tonumber' (string expected, got {})",
            v.type_name()
        )
        .into());
    };
    let text = String::from_utf8_lossy(ctx.strings.get_bytes(id));
    let text = text.trim();
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let n = match i64::from_str_radix(digits, base as u32) {
        Ok(i) if neg => Value::Integer(i.wrapping_neg()),
        Ok(i) => Value::Integer(i),
        Err(_) => Value::Nil,
    };
    Ok(vec![n])
}

fn native_error(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    Err(NativeError::Value(arg(args, 0)))
}

fn native_assert(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let v = check_any(args, 0, "assert")?;
    if v.is_truthy() {
        return Ok(args.to_vec());
    }
    match args.get(1) {
        Some(msg) => Err(NativeError::Value(msg.clone())),
        None => Err("assertion failed!".into()),
    }
}

fn native_select(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let index = arg(args, 0);
    if let Value::String(id) = index {
        if ctx.strings.get_bytes(id) == b"#" {
            return Ok(vec![Value::Integer(args.len().saturating_sub(1) as i64)]);
        }
    }
    let n = coerce::to_integer(&index, ctx.strings)
        .ok_or("bad argument #1 to 'select' (number expected)")?;
    let available = args.len() as i64 - 1;
    let start = if n < 0 { available + 1 + n } else { n };
    if n == 0 || start < 1 {
        return Err("bad argument #1 to 'select' (index out of range)".into());
    }
    if start > available {
        return Ok(vec![]);
    }
    Ok(args[start as usize..].to_vec())
}

fn native_next(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let t = check_table(args, 0, "next")?;
    let entry = t
        .borrow()
        .next(&arg(args, 1))
        .map_err(|e| NativeError::Message(e.to_string()))?;
    Ok(match entry {
        Some((k, v)) => vec![k, v],
        None => vec![Value::Nil],
    })
}

fn native_pairs(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let t = check_table(args, 0, "pairs")?;
    Ok(vec![
        Value::Function(Function::native("next", native_next)),
        Value::Table(Rc::clone(t)),
        Value::Nil,
    ])
}

fn ipairs_step(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let t = check_table(args, 0, "ipairs")?;
    let i = arg(args, 1).as_integer().unwrap_or(0).wrapping_add(1);
    let v = t.borrow().get_int(i);
    Ok(if v.is_nil() {
        vec![Value::Nil]
    } else {
        vec![Value::Integer(i), v]
    })
}

fn native_ipairs(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let t = check_table(args, 0, "ipairs")?;
    Ok(vec![
        Value::Function(Function::native("ipairs_step", ipairs_step)),
        Value::Table(Rc::clone(t)),
        Value::Integer(0),
    ])
}

fn native_rawequal(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let a = check_any(args, 0, "rawequal")?;
    let b = check_any(args, 1, "rawequal")?;
    Ok(vec![Value::Boolean(a == b)])
}

fn native_rawlen(ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Table(t) => Ok(vec![Value::Integer(t.borrow().len())]),
        Value::String(id) => Ok(vec![Value::Integer(ctx.strings.get_bytes(id).len() as i64)]),
        _ => Err("table or string expected".into()),
    }
}

fn native_rawget(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let t = check_table(args, 0, "rawget")?;
    Ok(vec![t.borrow().get(&arg(args, 1))])
}

fn native_rawset(_ctx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let t = check_table(args, 0, "rawset")?;
    t.borrow_mut()
        .set(arg(args, 1), arg(args, 2))
        .map_err(|e| NativeError::Message(e.to_string()))?;
    Ok(vec![Value::Table(Rc::clone(t))])
}
