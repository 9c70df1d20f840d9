//! Control-flow-graph IR for one function.
//!
//! Blocks, instructions and variables live in arenas addressed by integer
//! ids. Use-def edges are kept in a side table keyed by the producing
//! instruction and recorded as instructions are built.

use crate::ast::{BinOp, SourceSpan, UnOp};
use crate::proto::Constant;
use crate::unit::ResultCount;
use lunet_core::string::StringId;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An instruction input.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Constant(Constant),
    Instr(InstrId),
}

impl Operand {
    pub fn as_instr(&self) -> Option<InstrId> {
        match self {
            Operand::Instr(id) => Some(*id),
            Operand::Constant(_) => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Operand::Constant(c) => Some(c),
            Operand::Instr(_) => None,
        }
    }
}

impl From<InstrId> for Operand {
    fn from(id: InstrId) -> Self {
        Operand::Instr(id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Argument {
        index: u16,
    },
    VarArgs {
        results: ResultCount,
    },
    /// Result `index` of a fixed-count call or varargs.
    Select {
        source: InstrId,
        index: u16,
    },
    ReturnNil,
    ReturnSingle(Operand),
    ReturnMulti {
        values: Vec<Operand>,
        spread: Option<InstrId>,
    },
    Load(VarId),
    /// `declare` marks the store that starts a new binding of the variable.
    Store {
        var: VarId,
        value: Operand,
        declare: bool,
    },
    LoadGlobal(StringId),
    StoreGlobal {
        name: StringId,
        value: Operand,
    },
    /// Join point of a short-circuit: `second` overwrites `first`'s value on
    /// the edge that evaluated it.
    Merge {
        first: InstrId,
        second: Operand,
    },
    Jump(BlockId),
    BranchIf {
        cond: Operand,
        else_block: BlockId,
    },
    BranchWhile {
        cond: Operand,
        exit: BlockId,
    },
    BranchRepeat {
        cond: Operand,
        loop_head: BlockId,
    },
    /// Unresolved goto; rewritten to `Jump` once its label is known.
    Goto {
        label: StringId,
    },
    Index {
        object: Operand,
        key: Operand,
    },
    IndexStore {
        object: Operand,
        key: Operand,
        value: Operand,
    },
    Call {
        callee: Operand,
        args: Vec<Operand>,
        spread: Option<InstrId>,
        results: ResultCount,
    },
    TailCall {
        callee: Operand,
        args: Vec<Operand>,
        spread: Option<InstrId>,
    },
    Unary {
        op: UnOp,
        operand: Operand,
    },
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    NewTable {
        array_hint: u16,
        hash_hint: u16,
    },
    SetList {
        table: Operand,
        values: Vec<Operand>,
        spread: Option<InstrId>,
    },
    /// Instantiate nested function `child`, capturing `captures` in upvalue order.
    Closure {
        child: u16,
        captures: Vec<VarId>,
    },
    ForPrep {
        start: Operand,
        stop: Operand,
        step: Operand,
        index: VarId,
        limit: VarId,
        step_var: VarId,
    },
    ForStep {
        index: VarId,
        limit: VarId,
        step: VarId,
    },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::ReturnNil
                | Instruction::ReturnSingle(_)
                | Instruction::ReturnMulti { .. }
                | Instruction::Jump(_)
                | Instruction::TailCall { .. }
                | Instruction::Goto { .. }
        )
    }

    /// Instructions whose value(s) occupy frame slots.
    pub fn produces_value(&self) -> bool {
        use Instruction::*;
        match self {
            Argument { .. }
            | Select { .. }
            | Load(_)
            | LoadGlobal(_)
            | Merge { .. }
            | Index { .. }
            | Unary { .. }
            | Binary { .. }
            | NewTable { .. }
            | Closure { .. }
            | ForPrep { .. }
            | ForStep { .. } => true,
            VarArgs { results } | Call { results, .. } => {
                matches!(results, ResultCount::Fixed(n) if *n > 0)
            }
            _ => false,
        }
    }

    /// Every instruction this one reads, in operand order.
    pub fn operands(&self) -> Vec<InstrId> {
        use Instruction::*;
        let mut out = Vec::new();
        let mut push = |op: &Operand| {
            if let Operand::Instr(id) = op {
                out.push(*id);
            }
        };
        match self {
            ReturnSingle(v) => push(v),
            ReturnMulti { values, .. } => values.iter().for_each(&mut push),
            Store { value, .. } | StoreGlobal { value, .. } => push(value),
            Merge { second, .. } => push(second),
            BranchIf { cond, .. } | BranchWhile { cond, .. } | BranchRepeat { cond, .. } => {
                push(cond)
            }
            Index { object, key } => {
                push(object);
                push(key);
            }
            IndexStore { object, key, value } => {
                push(object);
                push(key);
                push(value);
            }
            Call { callee, args, .. } | TailCall { callee, args, .. } => {
                push(callee);
                args.iter().for_each(&mut push);
            }
            Unary { operand, .. } => push(operand),
            Binary { lhs, rhs, .. } => {
                push(lhs);
                push(rhs);
            }
            SetList { table, values, .. } => {
                push(table);
                values.iter().for_each(&mut push);
            }
            ForPrep {
                start, stop, step, ..
            } => {
                push(start);
                push(stop);
                push(step);
            }
            _ => {}
        }
        // Producers referenced outside an Operand.
        match self {
            Select { source, .. } => out.push(*source),
            Merge { first, .. } => out.push(*first),
            ReturnMulti {
                spread: Some(s), ..
            }
            | Call {
                spread: Some(s), ..
            }
            | TailCall {
                spread: Some(s), ..
            }
            | SetList {
                spread: Some(s), ..
            } => out.push(*s),
            _ => {}
        }
        out
    }

    /// Block targets of this instruction.
    pub fn targets(&self) -> Option<BlockId> {
        match self {
            Instruction::Jump(b)
            | Instruction::BranchIf { else_block: b, .. }
            | Instruction::BranchWhile { exit: b, .. }
            | Instruction::BranchRepeat { loop_head: b, .. } => Some(*b),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstrData {
    pub kind: Instruction,
    pub span: SourceSpan,
    pub block: BlockId,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub instrs: Vec<InstrId>,
    pub preds: BTreeSet<BlockId>,
    pub succs: BTreeSet<BlockId>,
    pub terminated: bool,
    /// Position in the final layout, once appended.
    pub placed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Local,
    /// An enclosing function's variable, reached through upvalue `upvalue`.
    Captured { upvalue: u16, source: VarId },
}

#[derive(Clone, Debug)]
pub struct Var {
    pub name: StringId,
    pub kind: VarKind,
    pub loads: Vec<InstrId>,
    pub stores: Vec<InstrId>,
    /// Closure instructions capturing this variable.
    pub captures: Vec<InstrId>,
    /// Compiler-introduced (loop control state).
    pub hidden: bool,
}

impl Var {
    /// Captured locals live in heap cells.
    pub fn is_boxed(&self) -> bool {
        self.kind == VarKind::Local && !self.captures.is_empty()
    }
}

/// The CFG of a single function under construction.
#[derive(Clone, Debug)]
pub struct FunctionIr {
    pub blocks: Vec<BasicBlock>,
    pub instrs: Vec<InstrData>,
    pub vars: Vec<Var>,
    /// producer -> consumers
    pub uses: Vec<Vec<InstrId>>,
    /// Blocks in emission order.
    pub layout: Vec<BlockId>,
    pub current: BlockId,
}

impl Default for FunctionIr {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionIr {
    /// A function with its entry block placed and current.
    pub fn new() -> Self {
        let mut ir = FunctionIr {
            blocks: Vec::new(),
            instrs: Vec::new(),
            vars: Vec::new(),
            uses: Vec::new(),
            layout: Vec::new(),
            current: BlockId(0),
        };
        let entry = ir.new_block();
        ir.blocks[entry.0 as usize].placed = true;
        ir.layout.push(entry);
        ir
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn instr(&self, id: InstrId) -> &InstrData {
        &self.instrs[id.0 as usize]
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.0 as usize]
    }

    pub fn uses_of(&self, id: InstrId) -> &[InstrId] {
        &self.uses[id.0 as usize]
    }

    /// Allocate a block without placing it.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::default());
        id
    }

    /// Place `block` next in layout and make it current. An unterminated
    /// current block falls through into it.
    pub fn append_block(&mut self, block: BlockId) {
        debug_assert!(!self.block(block).placed, "block {block} appended twice");
        let prev = self.current;
        if !self.block(prev).terminated {
            self.add_edge(prev, block);
        }
        self.blocks[block.0 as usize].placed = true;
        self.layout.push(block);
        self.current = block;
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0 as usize].succs.insert(to);
        self.blocks[to.0 as usize].preds.insert(from);
    }

    pub fn is_terminated(&self) -> bool {
        self.block(self.current).terminated
    }

    pub fn new_var(&mut self, name: StringId, kind: VarKind, hidden: bool) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Var {
            name,
            kind,
            loads: Vec::new(),
            stores: Vec::new(),
            captures: Vec::new(),
            hidden,
        });
        id
    }

    /// Append `kind` to the current block. A terminated block cannot grow, so
    /// code after a terminator lands in a fresh unreachable block.
    pub fn emit(&mut self, kind: Instruction, span: SourceSpan) -> InstrId {
        if self.is_terminated() {
            let dead = self.new_block();
            self.append_block(dead);
        }
        let id = InstrId(self.instrs.len() as u32);
        for producer in kind.operands() {
            self.uses[producer.0 as usize].push(id);
        }
        match &kind {
            Instruction::Load(v) => self.vars[v.0 as usize].loads.push(id),
            Instruction::Store { var, .. } => self.vars[var.0 as usize].stores.push(id),
            Instruction::ForPrep {
                index,
                limit,
                step_var,
                ..
            } => {
                for v in [index, limit, step_var] {
                    self.vars[v.0 as usize].stores.push(id);
                }
            }
            Instruction::ForStep { index, limit, step } => {
                for v in [index, limit, step] {
                    self.vars[v.0 as usize].loads.push(id);
                }
                self.vars[index.0 as usize].stores.push(id);
            }
            Instruction::Closure { captures, .. } => {
                for v in captures {
                    self.vars[v.0 as usize].captures.push(id);
                }
            }
            _ => {}
        }
        let block = self.current;
        if let Some(target) = kind.targets() {
            self.add_edge(block, target);
        }
        let terminator = kind.is_terminator();
        self.instrs.push(InstrData { kind, span, block });
        self.uses.push(Vec::new());
        let b = &mut self.blocks[block.0 as usize];
        b.instrs.push(id);
        b.terminated = terminator;
        id
    }

    /// Rewrite a pending goto into a jump to `target`.
    pub fn link_goto(&mut self, goto: InstrId, target: BlockId) {
        let data = &mut self.instrs[goto.0 as usize];
        debug_assert!(matches!(data.kind, Instruction::Goto { .. }));
        data.kind = Instruction::Jump(target);
        let from = data.block;
        self.add_edge(from, target);
    }

    /// Number of placed blocks.
    pub fn num_blocks(&self) -> usize {
        self.layout.len()
    }

    /// Instructions in layout order.
    pub fn ordered_instrs(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.layout
            .iter()
            .flat_map(move |b| self.block(*b).instrs.iter().copied())
    }
}
