use lunet_compiler::ast::{Block, Chunk};
use lunet_compiler::compiler::{compile, lower, CompileError};
use lunet_compiler::ir::{FunctionIr, Instruction};
use lunet_compiler::opcode::{instructions, Instr, OpCode};
use lunet_compiler::proto::FunctionProto;
use lunet_core::string::StringInterner;

/// Compile a chunk body and return the prototype with its interner.
pub fn compile_body(body: Block) -> (FunctionProto, StringInterner) {
    let mut strings = StringInterner::new();
    let chunk = Chunk { body };
    let proto = compile(&chunk, "test", &mut strings)
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    (proto, strings)
}

/// Compile a chunk body and expect an error.
pub fn compile_body_err(body: Block) -> CompileError {
    let mut strings = StringInterner::new();
    match compile(&Chunk { body }, "test", &mut strings) {
        Err(e) => e,
        Ok(_) => panic!("expected compile error, got success"),
    }
}

/// Lower a chunk body to the main function's CFG.
pub fn lower_body(body: Block) -> FunctionIr {
    let mut strings = StringInterner::new();
    lower(&Chunk { body }, &mut strings).unwrap_or_else(|e| panic!("lowering failed: {e}"))
}

pub fn decoded(proto: &FunctionProto) -> Vec<Instr> {
    instructions(&proto.code).map(|(_, i)| i).collect()
}

pub fn has_opcode(proto: &FunctionProto, op: OpCode) -> bool {
    decoded(proto).iter().any(|i| i.opcode() == op)
}

pub fn count_opcode(proto: &FunctionProto, op: OpCode) -> usize {
    decoded(proto).iter().filter(|i| i.opcode() == op).count()
}

pub fn count_instrs(ir: &FunctionIr, pred: impl Fn(&Instruction) -> bool) -> usize {
    ir.ordered_instrs().filter(|i| pred(&ir.instr(*i).kind)).count()
}

/// Every branch in `proto` lands on an instruction boundary.
pub fn assert_targets_valid(proto: &FunctionProto) {
    let starts: Vec<usize> = instructions(&proto.code).map(|(at, _)| at).collect();
    for (at, instr) in instructions(&proto.code) {
        if let Some(t) = instr.target() {
            assert!(
                starts.contains(&(t as usize)),
                "branch at {at} targets {t}, not an instruction start"
            );
        }
    }
    for child in &proto.protos {
        assert_targets_valid(child);
    }
}
