//! Mid-loop replacement: the hook where a hot loop hands its frame to a
//! faster version of the same function.
//!
//! The dispatch loop polls a [`ReplacementTrigger`] on every backward
//! transfer. A returned [`Replacement`] resumes at the same offset with the
//! same frame and runs until the invocation exits, so a transfer never
//! changes what the program computes.

use crate::dispatch::{self, Exit, Step};
use crate::error::RuntimeError;
use crate::frame::Frame;
use crate::vm::Vm;
use lunet_compiler::opcode::{instructions, Instr};
use lunet_compiler::proto::FunctionProto;
use lunet_core::value::ProtoId;
use std::collections::HashMap;
use std::sync::Arc;

/// A backward branch, identified by function and the branch's own offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopSite {
    pub proto: ProtoId,
    pub offset: usize,
}

/// An alternative executor for one function.
pub trait Replacement: Send + Sync {
    /// Continue `frame` from byte offset `at` until the invocation returns or tail-calls.
    fn resume(&self, vm: &mut Vm, frame: &mut Frame, at: usize) -> Result<Exit, RuntimeError>;
}

/// Decides, per back edge, whether to transfer.
pub trait ReplacementTrigger {
    fn poll(&mut self, site: LoopSite, proto: &Arc<FunctionProto>) -> Option<Arc<dyn Replacement>>;
}

/// Never transfers.
#[derive(Debug, Default)]
pub struct NeverReplace;

impl ReplacementTrigger for NeverReplace {
    fn poll(&mut self, _site: LoopSite, _proto: &Arc<FunctionProto>) -> Option<Arc<dyn Replacement>> {
        None
    }
}

/// Transfers once a loop site has taken `threshold` back edges. Later
/// invocations reuse the replacement built for the function.
pub struct HotLoopTrigger {
    threshold: u32,
    counts: HashMap<LoopSite, u32>,
    compiled: HashMap<ProtoId, Arc<Predecoded>>,
}

impl HotLoopTrigger {
    pub fn new(threshold: u32) -> Self {
        HotLoopTrigger {
            threshold: threshold.max(1),
            counts: HashMap::new(),
            compiled: HashMap::new(),
        }
    }

    /// Back edges seen at `site` so far.
    pub fn count(&self, site: LoopSite) -> u32 {
        self.counts.get(&site).copied().unwrap_or(0)
    }
}

impl ReplacementTrigger for HotLoopTrigger {
    fn poll(&mut self, site: LoopSite, proto: &Arc<FunctionProto>) -> Option<Arc<dyn Replacement>> {
        let count = self.counts.entry(site).or_insert(0);
        *count = count.saturating_add(1);
        if *count < self.threshold {
            return None;
        }
        let replacement = self
            .compiled
            .entry(site.proto)
            .or_insert_with(|| Arc::new(Predecoded::new(Arc::clone(proto))));
        Some(Arc::clone(replacement) as Arc<dyn Replacement>)
    }
}

const NO_INSTR: u32 = u32::MAX;

/// Runs a function from a pre-decoded instruction array instead of
/// decoding bytes on every step.
#[derive(Debug)]
pub struct Predecoded {
    proto: Arc<FunctionProto>,
    instrs: Vec<Instr>,
    offsets: Vec<usize>,
    /// Byte offset to instruction index; `NO_INSTR` inside an instruction.
    index_of: Vec<u32>,
}

impl Predecoded {
    pub fn new(proto: Arc<FunctionProto>) -> Self {
        let mut instrs = Vec::new();
        let mut offsets = Vec::new();
        let mut index_of = vec![NO_INSTR; proto.code_len()];
        for (at, instr) in instructions(&proto.code) {
            index_of[at] = instrs.len() as u32;
            offsets.push(at);
            instrs.push(instr);
        }
        Predecoded {
            proto,
            instrs,
            offsets,
            index_of,
        }
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    fn index(&self, offset: usize) -> usize {
        match self.index_of.get(offset) {
            Some(&i) if i != NO_INSTR => i as usize,
            _ => unreachable!("offset {offset} is not an instruction boundary"),
        }
    }
}

impl Replacement for Predecoded {
    fn resume(&self, vm: &mut Vm, frame: &mut Frame, at: usize) -> Result<Exit, RuntimeError> {
        debug_assert!(Arc::ptr_eq(&frame.proto, &self.proto));
        let mut i = self.index(at);
        loop {
            match dispatch::step(vm, frame, &self.proto, self.offsets[i], &self.instrs[i])? {
                Step::Continue(next) => i = self.index(next),
                Step::Return(values) => return Ok(Exit::Return(values)),
                Step::TailCall(f, args) => return Ok(Exit::TailCall(f, args)),
            }
        }
    }
}
