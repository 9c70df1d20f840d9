//! Per-invocation state for a Lua function.

use lunet_compiler::proto::FunctionProto;
use lunet_core::value::{new_cell, Cell, LuaClosure, ProtoId, Value};
use std::rc::Rc;
use std::sync::Arc;

/// A call frame. The proto is shared; everything else belongs to this call.
#[derive(Debug)]
pub struct Frame {
    pub id: ProtoId,
    pub proto: Arc<FunctionProto>,
    pub closure: Rc<LuaClosure>,
    /// Value slots, `proto.frame_size` of them.
    pub slots: Vec<Value>,
    /// Heap cells for captured locals.
    pub cells: Vec<Cell>,
    /// Every argument passed, fixed parameters first.
    pub args: Vec<Value>,
    /// Values produced by the last spread producer, waiting for their consumer.
    pub spread: Vec<Value>,
}

impl Frame {
    pub fn new(id: ProtoId, proto: Arc<FunctionProto>, closure: Rc<LuaClosure>, args: Vec<Value>) -> Self {
        let slots = vec![Value::Nil; proto.frame_size as usize];
        let cells = (0..proto.num_cells).map(|_| new_cell(Value::Nil)).collect();
        Frame {
            id,
            proto,
            closure,
            slots,
            cells,
            args,
            spread: Vec::new(),
        }
    }

    #[inline]
    pub fn get(&self, slot: u16) -> &Value {
        &self.slots[slot as usize]
    }

    #[inline]
    pub fn set(&mut self, slot: u16, value: Value) {
        self.slots[slot as usize] = value;
    }

    /// Fixed parameter `index`, nil when the caller passed fewer.
    pub fn argument(&self, index: u16) -> Value {
        self.args.get(index as usize).cloned().unwrap_or_default()
    }

    /// Arguments beyond the fixed parameters.
    pub fn varargs(&self) -> &[Value] {
        let fixed = self.proto.num_params as usize;
        self.args.get(fixed..).unwrap_or(&[])
    }

    /// Write `values` to consecutive slots from `dst`, nil-padded or truncated to `count`.
    pub fn write_fixed(&mut self, dst: u16, count: u16, values: Vec<Value>) {
        let mut values = values.into_iter();
        for i in 0..count {
            let v = values.next().unwrap_or_default();
            self.set(dst + i, v);
        }
    }

    pub fn take_spread(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.spread)
    }
}
