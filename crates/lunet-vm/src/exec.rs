//! Unit executor: the work behind each `EXEC` instruction.

use crate::arith;
use crate::coerce;
use crate::compare;
use crate::error::RuntimeError;
use crate::frame::Frame;
use crate::vm::Vm;
use lunet_compiler::ast::BinOp;
use lunet_compiler::literal::Number;
use lunet_compiler::unit::{Arg, CaptureSource, ResultCount, Unit, UnitDescriptor};
use lunet_core::string::StringInterner;
use lunet_core::table::Table;
use lunet_core::value::{float_to_integer, new_cell, Function, LuaClosure, Value};
use std::rc::Rc;

/// What the dispatch loop does after a unit.
#[derive(Debug)]
pub enum Flow {
    Next,
    Return(Vec<Value>),
    TailCall(Function, Vec<Value>),
}

#[inline]
fn operand(frame: &Frame, arg: &Arg) -> Value {
    match arg {
        Arg::Slot(s) => frame.get(*s).clone(),
        Arg::Const(c) => c.to_value(),
    }
}

fn collect(frame: &mut Frame, args: &[Arg], spread: bool) -> Vec<Value> {
    let mut values: Vec<Value> = args.iter().map(|a| operand(frame, a)).collect();
    if spread {
        values.extend(frame.take_spread());
    }
    values
}

/// Deliver a multi-value result to its destination.
fn produce(frame: &mut Frame, results: ResultCount, dst: u16, values: Vec<Value>) {
    match results {
        ResultCount::Fixed(n) => frame.write_fixed(dst, n, values),
        ResultCount::Spread => frame.spread = values,
    }
}

fn callable(v: Value) -> Result<Function, String> {
    match v {
        Value::Function(f) => Ok(f),
        other => Err(format!("attempt to call a {} value", other.type_name())),
    }
}

/// Execute one unit against `frame`. Faults raised here carry the unit's
/// span; faults from callees keep their own.
pub fn execute(vm: &mut Vm, frame: &mut Frame, desc: &UnitDescriptor) -> Result<Flow, RuntimeError> {
    let span = desc.span;
    let fault = |msg: String| RuntimeError::runtime(msg, span);

    match &desc.unit {
        Unit::LoadConst { value, dst } => frame.set(*dst, value.to_value()),
        Unit::Argument { index, dst } => {
            let v = frame.argument(*index);
            frame.set(*dst, v);
        }
        Unit::VarArgs { results, dst } => {
            let values = frame.varargs().to_vec();
            produce(frame, *results, *dst, values);
        }
        Unit::LoadCell { cell, dst } => {
            let v = frame.cells[*cell as usize].borrow().clone();
            frame.set(*dst, v);
        }
        Unit::StoreCell { cell, value } => {
            let v = operand(frame, value);
            *frame.cells[*cell as usize].borrow_mut() = v;
        }
        Unit::NewCell { cell, value } => {
            let v = operand(frame, value);
            frame.cells[*cell as usize] = new_cell(v);
        }
        Unit::LoadUpvalue { upvalue, dst } => {
            let v = frame.closure.upvalues[*upvalue as usize].borrow().clone();
            frame.set(*dst, v);
        }
        Unit::StoreUpvalue { upvalue, value } => {
            let v = operand(frame, value);
            *frame.closure.upvalues[*upvalue as usize].borrow_mut() = v;
        }
        Unit::LoadGlobal { name, dst } => {
            let v = vm.globals.get_str(*name);
            frame.set(*dst, v);
        }
        Unit::StoreGlobal { name, value } => {
            let v = operand(frame, value);
            vm.globals.set_str(*name, v);
        }
        Unit::Index { object, key, dst } => {
            let v = index(&operand(frame, object), &operand(frame, key)).map_err(fault)?;
            frame.set(*dst, v);
        }
        Unit::IndexStore { object, key, value } => {
            let (o, k, v) = (operand(frame, object), operand(frame, key), operand(frame, value));
            index_store(&o, k, v).map_err(fault)?;
        }
        Unit::Call {
            callee,
            args,
            spread,
            results,
            dst,
        } => {
            let f = callable(operand(frame, callee)).map_err(fault)?;
            let args = collect(frame, args, *spread);
            let values = vm.call(f, args).map_err(|e| e.or_span(span))?;
            produce(frame, *results, *dst, values);
        }
        Unit::TailCall {
            callee,
            args,
            spread,
        } => {
            let f = callable(operand(frame, callee)).map_err(fault)?;
            let args = collect(frame, args, *spread);
            return Ok(Flow::TailCall(f, args));
        }
        Unit::Return { values, spread } => {
            return Ok(Flow::Return(collect(frame, values, *spread)));
        }
        Unit::Unary { op, operand: a, dst } => {
            let v = arith::unary(*op, &operand(frame, a), &vm.strings).map_err(fault)?;
            frame.set(*dst, v);
        }
        Unit::Binary { op, lhs, rhs, dst } => {
            let (a, b) = (operand(frame, lhs), operand(frame, rhs));
            let v = binary(&mut vm.strings, *op, &a, &b).map_err(fault)?;
            frame.set(*dst, v);
        }
        Unit::NewTable {
            array_hint,
            hash_hint,
            dst,
        } => {
            let t = Table::with_capacity(*array_hint as usize, *hash_hint as usize);
            frame.set(*dst, Value::from_table(t));
        }
        Unit::SetList {
            table,
            values,
            spread,
        } => {
            let t = match operand(frame, table) {
                Value::Table(t) => t,
                other => unreachable!("table constructor target is a {}", other.type_name()),
            };
            let values = collect(frame, values, *spread);
            let mut t = t.borrow_mut();
            for (i, v) in values.into_iter().enumerate() {
                t.set_int(i as i64 + 1, v);
            }
        }
        Unit::Closure {
            proto,
            captures,
            dst,
        } => {
            let id = vm.child_proto(frame.id, *proto);
            let upvalues = captures
                .iter()
                .map(|c| match c {
                    CaptureSource::Cell(i) => Rc::clone(&frame.cells[*i as usize]),
                    CaptureSource::Upvalue(i) => Rc::clone(&frame.closure.upvalues[*i as usize]),
                })
                .collect();
            let closure = LuaClosure { proto: id, upvalues };
            frame.set(*dst, Value::Function(Function::Lua(Rc::new(closure))));
        }
        Unit::ForPrep {
            start,
            stop,
            step,
            index,
            limit,
            step_slot,
            dst,
        } => {
            let (init, lim, st) = (
                operand(frame, start),
                operand(frame, stop),
                operand(frame, step),
            );
            let state = for_prep(&init, &lim, &st, &vm.strings).map_err(fault)?;
            let runs = match state {
                Some((i, l, s)) => {
                    frame.set(*index, i);
                    frame.set(*limit, l);
                    frame.set(*step_slot, s);
                    true
                }
                None => false,
            };
            frame.set(*dst, Value::Boolean(runs));
        }
        Unit::ForStep {
            index,
            limit,
            step,
            dst,
        } => {
            let done = for_step(frame, *index, *limit, *step);
            frame.set(*dst, Value::Boolean(done));
        }
    }
    Ok(Flow::Next)
}

fn index(object: &Value, key: &Value) -> Result<Value, String> {
    match object {
        Value::Table(t) => Ok(t.borrow().get(key)),
        other => Err(format!("attempt to index a {} value", other.type_name())),
    }
}

fn index_store(object: &Value, key: Value, value: Value) -> Result<(), String> {
    match object {
        Value::Table(t) => t.borrow_mut().set(key, value).map_err(|e| e.to_string()),
        other => Err(format!("attempt to index a {} value", other.type_name())),
    }
}

fn binary(strings: &mut StringInterner, op: BinOp, a: &Value, b: &Value) -> Result<Value, String> {
    match op {
        BinOp::Concat => arith::concat(a, b, strings),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            compare::compare(op, a, b, strings).map(Value::Boolean)
        }
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators are lowered to branches"),
        _ => arith::arith(op, a, b, strings),
    }
}

/// Numeric `for` setup. Returns the (index, limit, step) state, or `None`
/// when the body never runs. An integer loop stores its remaining
/// iteration count in the limit slot so the step cannot overflow.
fn for_prep(
    init: &Value,
    limit: &Value,
    step: &Value,
    strings: &StringInterner,
) -> Result<Option<(Value, Value, Value)>, String> {
    if let (Value::Integer(i0), Value::Integer(s)) = (init, step) {
        let (i0, s) = (*i0, *s);
        if s == 0 {
            return Err("'for' step is zero".to_string());
        }
        let Some(l) = for_limit(limit, s, strings)? else {
            return Ok(None);
        };
        if (s > 0 && i0 > l) || (s < 0 && i0 < l) {
            return Ok(None);
        }
        let count = if s > 0 {
            (l as u64).wrapping_sub(i0 as u64) / s as u64
        } else {
            // -(s + 1) + 1 avoids negating i64::MIN
            (i0 as u64).wrapping_sub(l as u64) / ((-(s + 1)) as u64 + 1)
        };
        return Ok(Some((
            Value::Integer(i0),
            Value::Integer(count as i64),
            Value::Integer(s),
        )));
    }

    let fl = coerce::to_number(limit, strings).ok_or("'for' limit must be a number")?;
    let fs = coerce::to_number(step, strings).ok_or("'for' step must be a number")?;
    let f0 = coerce::to_number(init, strings).ok_or("'for' initial value must be a number")?;
    if fs == 0.0 {
        return Err("'for' step is zero".to_string());
    }
    let skip = if fs > 0.0 { fl < f0 } else { f0 < fl };
    if skip {
        return Ok(None);
    }
    Ok(Some((Value::Float(f0), Value::Float(fl), Value::Float(fs))))
}

/// Integer loop limit. Float limits are floored (ceiled for negative steps)
/// and clipped; `None` means the loop cannot run. A NaN limit clips like a
/// negative one.
fn for_limit(limit: &Value, step: i64, strings: &StringInterner) -> Result<Option<i64>, String> {
    let f = match coerce::to_numeric(limit, strings) {
        Some(Number::Integer(l)) => return Ok(Some(l)),
        Some(Number::Float(f)) => f,
        None => return Err("'for' limit must be a number".to_string()),
    };
    let rounded = if step < 0 { f.ceil() } else { f.floor() };
    if let Some(l) = float_to_integer(rounded) {
        return Ok(Some(l));
    }
    Ok(if f > 0.0 {
        (step > 0).then_some(i64::MAX)
    } else {
        (step < 0).then_some(i64::MIN)
    })
}

/// Numeric `for` advance. Returns true once the loop is finished.
fn for_step(frame: &mut Frame, index: u16, limit: u16, step: u16) -> bool {
    let state = (
        frame.get(index).clone(),
        frame.get(limit).clone(),
        frame.get(step).clone(),
    );
    match state {
        (Value::Integer(i), Value::Integer(count), Value::Integer(s)) => {
            let count = count as u64;
            if count == 0 {
                return true;
            }
            frame.set(limit, Value::Integer((count - 1) as i64));
            frame.set(index, Value::Integer(i.wrapping_add(s)));
            false
        }
        (Value::Float(i), Value::Float(l), Value::Float(s)) => {
            let next = i + s;
            let more = if s > 0.0 { next <= l } else { l <= next };
            if more {
                frame.set(index, Value::Float(next));
            }
            !more
        }
        _ => unreachable!("numeric for state is not numeric"),
    }
}
