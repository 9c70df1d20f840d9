//! VM state, configuration and the call driver.

use crate::dispatch::{self, Exit};
use crate::error::RuntimeError;
use crate::frame::Frame;
use crate::natives;
use crate::replace::{HotLoopTrigger, NeverReplace, ReplacementTrigger};
use lunet_compiler::proto::FunctionProto;
use lunet_core::string::StringInterner;
use lunet_core::table::Table;
use lunet_core::value::{Function, LuaClosure, NativeContext, NativeFn, NativeFunction, ProtoId, Value};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Runtime limits and tiering knobs.
#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Deepest nesting of non-tail calls before "stack overflow".
    pub max_call_depth: usize,
    /// Back edges a loop site takes before transferring to a replacement.
    /// `None` disables replacement.
    pub osr_threshold: Option<u32>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 200,
            osr_threshold: None,
        }
    }
}

/// A loaded prototype and the registry ids of its nested functions.
struct LoadedProto {
    proto: Arc<FunctionProto>,
    children: Vec<ProtoId>,
}

/// The virtual machine.
pub struct Vm {
    pub strings: StringInterner,
    pub globals: Table,
    protos: Vec<LoadedProto>,
    config: VmConfig,
    depth: usize,
    pub(crate) trigger: Box<dyn ReplacementTrigger>,
    pub(crate) transfers: u64,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let trigger: Box<dyn ReplacementTrigger> = match config.osr_threshold {
            Some(threshold) => Box::new(HotLoopTrigger::new(threshold)),
            None => Box::new(NeverReplace),
        };
        let mut vm = Vm {
            strings: StringInterner::new(),
            globals: Table::new(),
            protos: Vec::new(),
            config,
            depth: 0,
            trigger,
            transfers: 0,
        };
        natives::register_base(&mut vm);
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Replace the replacement trigger.
    pub fn set_trigger(&mut self, trigger: Box<dyn ReplacementTrigger>) {
        self.trigger = trigger;
    }

    /// Number of replacement transfers taken so far.
    pub fn replacement_transfers(&self) -> u64 {
        self.transfers
    }

    /// Register a prototype tree and return a closure for its main function.
    pub fn load(&mut self, proto: Arc<FunctionProto>) -> Function {
        let id = self.register(proto);
        Function::Lua(Rc::new(LuaClosure {
            proto: id,
            upvalues: Vec::new(),
        }))
    }

    fn register(&mut self, proto: Arc<FunctionProto>) -> ProtoId {
        let id = ProtoId(self.protos.len() as u32);
        self.protos.push(LoadedProto {
            proto: Arc::clone(&proto),
            children: Vec::new(),
        });
        let children = proto.protos.iter().map(|p| self.register(Arc::clone(p))).collect();
        self.protos[id.0 as usize].children = children;
        id
    }

    pub fn proto(&self, id: ProtoId) -> &Arc<FunctionProto> {
        &self.protos[id.0 as usize].proto
    }

    /// Registry id of nested function `index` of `parent`.
    pub(crate) fn child_proto(&self, parent: ProtoId, index: u16) -> ProtoId {
        self.protos[parent.0 as usize].children[index as usize]
    }

    /// Load and run a main function with no arguments.
    pub fn execute(&mut self, proto: Arc<FunctionProto>) -> Result<Vec<Value>, RuntimeError> {
        let main = self.load(proto);
        self.call(main, Vec::new())
    }

    pub fn register_native(&mut self, name: &'static str, func: NativeFn) {
        self.set_global(name, Value::Function(Function::native(name, func)));
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.strings.intern(name.as_bytes());
        self.globals.set_str(key, value);
    }

    pub fn get_global(&self, name: &str) -> Value {
        match self.strings.find(name.as_bytes()) {
            Some(key) => self.globals.get_str(key),
            None => Value::Nil,
        }
    }

    /// Intern `s` as a string value.
    pub fn string(&mut self, s: &str) -> Value {
        Value::String(self.strings.intern(s.as_bytes()))
    }

    /// Call a function. Non-tail calls nest here; tail calls are handled by
    /// the trampoline without growing the native stack.
    pub fn call(&mut self, callee: Function, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::stack_overflow());
        }
        self.depth += 1;
        let result = self.trampoline(callee, args);
        self.depth -= 1;
        result
    }

    fn trampoline(&mut self, mut callee: Function, mut args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let mut chain = 0usize;
        loop {
            let closure = match callee {
                Function::Native(native) => {
                    if chain > 0 {
                        debug!(tail_calls = chain, "tail call chain ended in native");
                    }
                    return self.call_native(&native, &args);
                }
                Function::Lua(closure) => closure,
            };
            let proto = Arc::clone(self.proto(closure.proto));
            let mut frame = Frame::new(closure.proto, proto, closure, args);
            match dispatch::run(self, &mut frame, 0)? {
                Exit::Return(values) => {
                    if chain > 0 {
                        debug!(tail_calls = chain, "tail call chain returned");
                    }
                    return Ok(values);
                }
                Exit::TailCall(next, next_args) => {
                    chain += 1;
                    callee = next;
                    args = next_args;
                }
            }
        }
    }

    fn call_native(&mut self, native: &NativeFunction, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let mut ctx = NativeContext {
            strings: &mut self.strings,
        };
        (native.func)(&mut ctx, args).map_err(RuntimeError::from)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
