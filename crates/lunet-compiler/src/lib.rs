//! lunet compiler: AST lowering to a control-flow graph, goto/label
//! resolution, and assembly into compact bytecode.

pub mod assembler;
pub mod ast;
pub mod compiler;
pub mod disasm;
pub mod ir;
pub mod literal;
pub mod opcode;
pub mod proto;
pub mod unit;

pub use compiler::{compile, compile_with, lower, CompileError, CompileErrorKind};
pub use proto::FunctionProto;
