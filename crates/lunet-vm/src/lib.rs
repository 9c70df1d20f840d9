//! lunet virtual machine: bytecode dispatch with a tail-call trampoline and
//! a mid-loop replacement hook.

pub mod arith;
pub mod coerce;
pub mod compare;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod frame;
pub mod natives;
pub mod replace;
pub mod vm;

use error::RuntimeError;
use lunet_compiler::ast::Chunk;
use lunet_core::value::Value;
use std::sync::Arc;
use vm::Vm;

/// Compile and execute a chunk on `vm`, returning the result values.
pub fn execute_chunk(vm: &mut Vm, chunk: &Chunk, name: &str) -> Result<Vec<Value>, RuntimeError> {
    let proto = lunet_compiler::compile(chunk, name, &mut vm.strings)
        .map_err(|e| RuntimeError::runtime(format!("compile error: {}", e.kind), e.span))?;
    vm.execute(Arc::new(proto))
}
