//! Bytecode dispatch loop.
//!
//! The loop holds the current byte offset, executes the instruction there
//! and receives the next offset. Backward transfers poll the replacement
//! trigger; returns and tail calls leave the loop for the call driver.

use crate::error::RuntimeError;
use crate::exec::{self, Flow};
use crate::frame::Frame;
use crate::replace::LoopSite;
use crate::vm::Vm;
use lunet_compiler::opcode::{decode, Instr};
use lunet_compiler::proto::FunctionProto;
use lunet_core::value::{Function, Value};
use std::sync::Arc;
use tracing::debug;

/// Outcome of one instruction.
#[derive(Debug)]
pub enum Step {
    Continue(usize),
    Return(Vec<Value>),
    TailCall(Function, Vec<Value>),
}

/// How an invocation left the dispatch loop.
#[derive(Debug)]
pub enum Exit {
    Return(Vec<Value>),
    TailCall(Function, Vec<Value>),
}

/// Execute `instr`, which starts at byte offset `at` of `proto`.
#[inline]
pub fn step(
    vm: &mut Vm,
    frame: &mut Frame,
    proto: &FunctionProto,
    at: usize,
    instr: &Instr,
) -> Result<Step, RuntimeError> {
    let next = at + instr.size();
    let step = match instr {
        Instr::Exec { unit } => match exec::execute(vm, frame, &proto.units[*unit as usize])? {
            Flow::Next => Step::Continue(next),
            Flow::Return(values) => Step::Return(values),
            Flow::TailCall(f, args) => Step::TailCall(f, args),
        },
        Instr::Br { target } => Step::Continue(*target as usize),
        Instr::BrIf { cond, target, .. } | Instr::BrLoop { cond, target, .. } => {
            if frame.get(*cond).is_falsy() {
                Step::Continue(*target as usize)
            } else {
                Step::Continue(next)
            }
        }
        Instr::Clear { slot } => {
            frame.set(*slot, Value::Nil);
            Step::Continue(next)
        }
        Instr::Copy { src, dst } => {
            let v = frame.get(*src).clone();
            frame.set(*dst, v);
            Step::Continue(next)
        }
        Instr::Swap { a, b } => {
            frame.slots.swap(*a as usize, *b as usize);
            Step::Continue(next)
        }
        Instr::ReturnNil => Step::Return(Vec::new()),
        Instr::ReturnSingle { slot } => Step::Return(vec![frame.get(*slot).clone()]),
        Instr::ReturnMultiple { slots } => {
            Step::Return(slots.iter().map(|s| frame.get(*s).clone()).collect())
        }
    };
    Ok(step)
}

/// Run `frame` from byte offset `start` until it returns or tail-calls.
pub fn run(vm: &mut Vm, frame: &mut Frame, start: usize) -> Result<Exit, RuntimeError> {
    let proto = Arc::clone(&frame.proto);
    let mut pc = start;
    loop {
        let instr = decode(&proto.code, pc);
        match step(vm, frame, &proto, pc, &instr)? {
            Step::Continue(next) => {
                if next <= pc {
                    let site = LoopSite {
                        proto: frame.id,
                        offset: pc,
                    };
                    if let Some(replacement) = vm.trigger.poll(site, &proto) {
                        debug!(function = %proto.name, offset = next, "transferring to replacement");
                        vm.transfers += 1;
                        return replacement.resume(vm, frame, next);
                    }
                }
                pc = next;
            }
            Step::Return(values) => return Ok(Exit::Return(values)),
            Step::TailCall(f, args) => return Ok(Exit::TailCall(f, args)),
        }
    }
}
