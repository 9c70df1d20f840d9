//! CFG → bytecode.
//!
//! Slots are assigned per value-producing instruction without reuse.
//! Blocks are emitted in layout order, and forward branch targets are
//! backpatched once the target offset is known.

use crate::ast::SourceSpan;
use crate::compiler::{CompileError, CompileErrorKind};
use crate::ir::{BlockId, FunctionIr, InstrId, Instruction, Operand, VarId, VarKind};
use crate::opcode::{encode, write_u16, Instr, OpCode, MAX_CODE_SIZE, MAX_FIELD};
use crate::proto::{Constant, FunctionProto, UpvalueDesc};
use crate::unit::{Arg, CaptureSource, ResultCount, Unit, UnitDescriptor};
use std::sync::Arc;
use tracing::debug;

/// Everything about a prototype that does not come from its CFG.
pub struct ProtoHeader {
    pub name: String,
    pub num_params: u16,
    pub is_vararg: bool,
    pub upvalues: Vec<UpvalueDesc>,
    pub protos: Vec<Arc<FunctionProto>>,
    pub span: SourceSpan,
}

/// Where a variable lives at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Home {
    Slot(u16),
    Cell(u16),
    Upvalue(u16),
}

/// One instruction awaiting encoding; branches carry their target block.
struct Op {
    instr: Instr,
    target: Option<BlockId>,
    span: SourceSpan,
}

struct Assembler<'a> {
    ir: &'a FunctionIr,
    slots: Vec<Option<u16>>,
    homes: Vec<Home>,
    frame_size: usize,
    num_cells: usize,
    scratch: Option<u16>,
    ops: Vec<Op>,
    /// Index of the first op of each placed block.
    block_start: Vec<Option<usize>>,
    units: Vec<UnitDescriptor>,
    branch_profiles: usize,
    loop_profiles: usize,
}

fn overflow(what: &'static str, n: usize, span: SourceSpan) -> CompileError {
    CompileError::new(CompileErrorKind::FieldOverflow(what, n), span)
}

impl<'a> Assembler<'a> {
    fn new(ir: &'a FunctionIr) -> Self {
        Assembler {
            ir,
            slots: vec![None; ir.instrs.len()],
            homes: Vec::with_capacity(ir.vars.len()),
            frame_size: 0,
            num_cells: 0,
            scratch: None,
            ops: Vec::new(),
            block_start: vec![None; ir.blocks.len()],
            units: Vec::new(),
            branch_profiles: 0,
            loop_profiles: 0,
        }
    }

    fn alloc_slots(&mut self, n: usize, span: SourceSpan) -> Result<u16, CompileError> {
        let base = self.frame_size;
        self.frame_size += n;
        if self.frame_size > MAX_FIELD {
            return Err(overflow("slots", self.frame_size, span));
        }
        Ok(base as u16)
    }

    /// Assign variable homes and value slots.
    fn allocate(&mut self) -> Result<(), CompileError> {
        let ir = self.ir;
        for var in &ir.vars {
            let home = match var.kind {
                VarKind::Captured { upvalue, .. } => Home::Upvalue(upvalue),
                VarKind::Local if var.is_boxed() => {
                    let cell = self.num_cells;
                    self.num_cells += 1;
                    if self.num_cells > MAX_FIELD {
                        return Err(overflow("captured locals", self.num_cells, SourceSpan::UNAVAILABLE));
                    }
                    Home::Cell(cell as u16)
                }
                VarKind::Local => Home::Slot(self.alloc_slots(1, SourceSpan::UNAVAILABLE)?),
            };
            self.homes.push(home);
        }
        // Arena order: sources precede their aliases.
        for (i, data) in ir.instrs.iter().enumerate() {
            let slot = match &data.kind {
                Instruction::Select { source, index } => {
                    Some(self.slot(*source) + *index)
                }
                Instruction::Merge { first, .. } => Some(self.slot(*first)),
                Instruction::VarArgs {
                    results: ResultCount::Fixed(n),
                }
                | Instruction::Call {
                    results: ResultCount::Fixed(n),
                    ..
                } if *n > 0 => Some(self.alloc_slots(*n as usize, data.span)?),
                kind if kind.produces_value() => Some(self.alloc_slots(1, data.span)?),
                _ => None,
            };
            self.slots[i] = slot;
        }
        Ok(())
    }

    fn slot(&self, id: InstrId) -> u16 {
        self.slots[id.0 as usize].expect("operand without a slot")
    }

    fn home(&self, var: VarId) -> Home {
        self.homes[var.0 as usize]
    }

    fn var_slot(&self, var: VarId) -> u16 {
        match self.home(var) {
            Home::Slot(s) => s,
            home => unreachable!("loop control variable homed in {home:?}"),
        }
    }

    fn arg(&self, op: &Operand) -> Arg {
        match op {
            Operand::Constant(c) => Arg::Const(c.clone()),
            Operand::Instr(id) => Arg::Slot(self.slot(*id)),
        }
    }

    fn args(&self, ops: &[Operand]) -> Vec<Arg> {
        ops.iter().map(|o| self.arg(o)).collect()
    }

    fn push(&mut self, instr: Instr, span: SourceSpan) {
        self.ops.push(Op {
            instr,
            target: None,
            span,
        });
    }

    fn branch(&mut self, instr: Instr, target: BlockId, span: SourceSpan) {
        self.ops.push(Op {
            instr,
            target: Some(target),
            span,
        });
    }

    fn exec(&mut self, unit: Unit, span: SourceSpan) -> Result<(), CompileError> {
        let index = self.units.len();
        if index > MAX_FIELD {
            return Err(overflow("units", index + 1, span));
        }
        self.units.push(UnitDescriptor { unit, span });
        self.push(Instr::Exec { unit: index as u16 }, span);
        Ok(())
    }

    /// Write `value` into `dst`.
    fn move_into(&mut self, dst: u16, value: &Operand, span: SourceSpan) -> Result<(), CompileError> {
        match value {
            Operand::Constant(Constant::Nil) => self.push(Instr::Clear { slot: dst }, span),
            Operand::Constant(c) => {
                self.exec(
                    Unit::LoadConst {
                        value: c.clone(),
                        dst,
                    },
                    span,
                )?;
            }
            Operand::Instr(id) => {
                let src = self.slot(*id);
                if src != dst {
                    self.push(Instr::Copy { src, dst }, span);
                }
            }
        }
        Ok(())
    }

    /// Slot holding a branch condition.
    fn cond_slot(&mut self, cond: &Operand, span: SourceSpan) -> Result<u16, CompileError> {
        match cond {
            Operand::Instr(id) => Ok(self.slot(*id)),
            Operand::Constant(_) => {
                let scratch = match self.scratch {
                    Some(s) => s,
                    None => {
                        let s = self.alloc_slots(1, span)?;
                        self.scratch = Some(s);
                        s
                    }
                };
                self.move_into(scratch, cond, span)?;
                Ok(scratch)
            }
        }
    }

    /// `a, b = b, a` between two plain locals, as four instructions whose
    /// temporaries are used once.
    fn swap_at(&self, instrs: &[InstrId]) -> Option<(u16, u16)> {
        let [t1, t2, s1, s2] = instrs.get(..4)? else {
            return None;
        };
        let kind = |id: &InstrId| &self.ir.instr(*id).kind;
        let (Instruction::Load(b), Instruction::Load(a)) = (kind(t1), kind(t2)) else {
            return None;
        };
        let (
            Instruction::Store {
                var: sa,
                value: Operand::Instr(v1),
                declare: false,
            },
            Instruction::Store {
                var: sb,
                value: Operand::Instr(v2),
                declare: false,
            },
        ) = (kind(s1), kind(s2))
        else {
            return None;
        };
        if sa != a || sb != b || a == b || v1 != t1 || v2 != t2 {
            return None;
        }
        if self.ir.uses_of(*t1) != [*s1] || self.ir.uses_of(*t2) != [*s2] {
            return None;
        }
        match (self.home(*a), self.home(*b)) {
            (Home::Slot(x), Home::Slot(y)) => Some((x, y)),
            _ => None,
        }
    }

    fn lower_blocks(&mut self) -> Result<(), CompileError> {
        let ir = self.ir;
        for &block in &ir.layout {
            self.block_start[block.0 as usize] = Some(self.ops.len());
            let instrs = &ir.block(block).instrs;
            let mut i = 0;
            while i < instrs.len() {
                if let Some((a, b)) = self.swap_at(&instrs[i..]) {
                    let span = ir.instr(instrs[i + 2]).span;
                    self.push(Instr::Swap { a, b }, span);
                    i += 4;
                    continue;
                }
                self.lower(instrs[i])?;
                i += 1;
            }
        }
        Ok(())
    }

    fn lower(&mut self, id: InstrId) -> Result<(), CompileError> {
        let ir = self.ir;
        let data = ir.instr(id);
        let span = data.span;
        let dst = self.slots[id.0 as usize].unwrap_or(0);
        match &data.kind {
            Instruction::Argument { index } => {
                self.exec(Unit::Argument { index: *index, dst }, span)?;
            }
            Instruction::VarArgs { results } => {
                self.exec(
                    Unit::VarArgs {
                        results: *results,
                        dst,
                    },
                    span,
                )?;
            }
            Instruction::Select { .. } => {}
            Instruction::ReturnNil => self.push(Instr::ReturnNil, span),
            Instruction::ReturnSingle(Operand::Instr(v)) => {
                let slot = self.slot(*v);
                self.push(Instr::ReturnSingle { slot }, span);
            }
            Instruction::ReturnSingle(value) => {
                let values = vec![self.arg(value)];
                self.exec(
                    Unit::Return {
                        values,
                        spread: false,
                    },
                    span,
                )?;
            }
            Instruction::ReturnMulti { values, spread } => {
                let slots: Option<Vec<u16>> = values.iter().map(|v| v.as_instr().map(|i| self.slot(i))).collect();
                match slots {
                    Some(slots) if spread.is_none() => self.push(Instr::ReturnMultiple { slots }, span),
                    _ => {
                        let values = self.args(values);
                        self.exec(
                            Unit::Return {
                                values,
                                spread: spread.is_some(),
                            },
                            span,
                        )?;
                    }
                }
            }
            Instruction::Load(var) => match self.home(*var) {
                Home::Slot(src) => self.push(Instr::Copy { src, dst }, span),
                Home::Cell(cell) => self.exec(Unit::LoadCell { cell, dst }, span)?,
                Home::Upvalue(upvalue) => self.exec(Unit::LoadUpvalue { upvalue, dst }, span)?,
            },
            Instruction::Store {
                var,
                value,
                declare,
            } => match self.home(*var) {
                Home::Slot(slot) => self.move_into(slot, value, span)?,
                Home::Cell(cell) => {
                    let value = self.arg(value);
                    let unit = if *declare {
                        Unit::NewCell { cell, value }
                    } else {
                        Unit::StoreCell { cell, value }
                    };
                    self.exec(unit, span)?;
                }
                Home::Upvalue(upvalue) => {
                    let value = self.arg(value);
                    self.exec(Unit::StoreUpvalue { upvalue, value }, span)?;
                }
            },
            Instruction::LoadGlobal(name) => {
                self.exec(Unit::LoadGlobal { name: *name, dst }, span)?;
            }
            Instruction::StoreGlobal { name, value } => {
                let value = self.arg(value);
                self.exec(Unit::StoreGlobal { name: *name, value }, span)?;
            }
            Instruction::Merge { second, .. } => self.move_into(dst, second, span)?,
            Instruction::Jump(target) => self.branch(Instr::Br { target: 0 }, *target, span),
            Instruction::BranchIf { cond, else_block } => {
                let cond = self.cond_slot(cond, span)?;
                let profile = self.branch_profiles;
                self.branch_profiles += 1;
                self.branch(
                    Instr::BrIf {
                        profile: profile as u16,
                        cond,
                        target: 0,
                    },
                    *else_block,
                    span,
                );
            }
            Instruction::BranchWhile { cond, exit: target }
            | Instruction::BranchRepeat {
                cond,
                loop_head: target,
            } => {
                let cond = self.cond_slot(cond, span)?;
                let profile = self.loop_profiles;
                self.loop_profiles += 1;
                self.branch(
                    Instr::BrLoop {
                        profile: profile as u16,
                        cond,
                        target: 0,
                    },
                    *target,
                    span,
                );
            }
            Instruction::Goto { .. } => unreachable!("goto left unresolved"),
            Instruction::Index { object, key } => {
                let (object, key) = (self.arg(object), self.arg(key));
                self.exec(Unit::Index { object, key, dst }, span)?;
            }
            Instruction::IndexStore { object, key, value } => {
                let (object, key, value) = (self.arg(object), self.arg(key), self.arg(value));
                self.exec(Unit::IndexStore { object, key, value }, span)?;
            }
            Instruction::Call {
                callee,
                args,
                spread,
                results,
            } => {
                let unit = Unit::Call {
                    callee: self.arg(callee),
                    args: self.args(args),
                    spread: spread.is_some(),
                    results: *results,
                    dst,
                };
                self.exec(unit, span)?;
            }
            Instruction::TailCall {
                callee,
                args,
                spread,
            } => {
                let unit = Unit::TailCall {
                    callee: self.arg(callee),
                    args: self.args(args),
                    spread: spread.is_some(),
                };
                self.exec(unit, span)?;
            }
            Instruction::Unary { op, operand } => {
                let operand = self.arg(operand);
                self.exec(Unit::Unary { op: *op, operand, dst }, span)?;
            }
            Instruction::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (self.arg(lhs), self.arg(rhs));
                self.exec(Unit::Binary { op: *op, lhs, rhs, dst }, span)?;
            }
            Instruction::NewTable {
                array_hint,
                hash_hint,
            } => {
                self.exec(
                    Unit::NewTable {
                        array_hint: *array_hint,
                        hash_hint: *hash_hint,
                        dst,
                    },
                    span,
                )?;
            }
            Instruction::SetList {
                table,
                values,
                spread,
            } => {
                let unit = Unit::SetList {
                    table: self.arg(table),
                    values: self.args(values),
                    spread: spread.is_some(),
                };
                self.exec(unit, span)?;
            }
            Instruction::Closure { child, captures } => {
                let captures = captures
                    .iter()
                    .map(|v| match self.home(*v) {
                        Home::Cell(c) => CaptureSource::Cell(c),
                        Home::Upvalue(u) => CaptureSource::Upvalue(u),
                        Home::Slot(_) => unreachable!("captured variable without a cell"),
                    })
                    .collect();
                self.exec(
                    Unit::Closure {
                        proto: *child,
                        captures,
                        dst,
                    },
                    span,
                )?;
            }
            Instruction::ForPrep {
                start,
                stop,
                step,
                index,
                limit,
                step_var,
            } => {
                let unit = Unit::ForPrep {
                    start: self.arg(start),
                    stop: self.arg(stop),
                    step: self.arg(step),
                    index: self.var_slot(*index),
                    limit: self.var_slot(*limit),
                    step_slot: self.var_slot(*step_var),
                    dst,
                };
                self.exec(unit, span)?;
            }
            Instruction::ForStep { index, limit, step } => {
                let unit = Unit::ForStep {
                    index: self.var_slot(*index),
                    limit: self.var_slot(*limit),
                    step: self.var_slot(*step),
                    dst,
                };
                self.exec(unit, span)?;
            }
        }
        Ok(())
    }

    /// Op index each branch lands on: the first op at or after its block.
    fn resolve_targets(&mut self) -> Vec<Option<usize>> {
        let targets: Vec<Option<usize>> = self
            .ops
            .iter()
            .map(|op| {
                op.target.map(|b| {
                    self.block_start[b.0 as usize].expect("branch to a block that was never placed")
                })
            })
            .collect();
        // A branch past the last op needs something to land on.
        if targets.iter().any(|t| *t == Some(self.ops.len())) {
            self.push(Instr::ReturnNil, SourceSpan::UNAVAILABLE);
        }
        targets
    }

    fn encode(
        mut self,
        header: ProtoHeader,
    ) -> Result<(FunctionProto, Layout), CompileError> {
        let targets = self.resolve_targets();
        let total: usize = self.ops.iter().map(|op| op.instr.size()).sum();
        if total > MAX_CODE_SIZE {
            return Err(CompileError::new(CompileErrorKind::CodeTooLarge(total), header.span));
        }

        let mut code = Vec::with_capacity(total);
        let mut offsets = vec![0usize; self.ops.len()];
        // op index -> field positions waiting for its offset
        let mut pending: Vec<Vec<usize>> = vec![Vec::new(); self.ops.len()];
        let mut spans: Vec<(u16, SourceSpan)> = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            let here = code.len();
            offsets[i] = here;
            for field in std::mem::take(&mut pending[i]) {
                write_u16(&mut code, field, here as u16);
            }
            if spans.last().map(|(_, s)| *s) != Some(op.span) {
                spans.push((here as u16, op.span));
            }
            encode(&op.instr, &mut code);
            if let Some(t) = targets.get(i).copied().flatten() {
                let field = here + op.instr.opcode().target_field().expect("branch without a target field");
                if t <= i {
                    write_u16(&mut code, field, offsets[t] as u16);
                } else {
                    pending[t].push(field);
                }
            }
        }
        debug_assert!(pending.iter().all(|p| p.is_empty()), "unpatched branch");
        let layout = Layout {
            block_offsets: self
                .block_start
                .iter()
                .map(|start| start.map(|i| offsets.get(i).copied().unwrap_or(code.len())))
                .collect(),
            branches: self
                .ops
                .iter()
                .zip(&offsets)
                .filter_map(|(op, &at)| op.target.map(|b| (at, b)))
                .collect(),
        };

        debug!(
            function = %header.name,
            code = code.len(),
            units = self.units.len(),
            slots = self.frame_size,
            cells = self.num_cells,
            "assembled function"
        );
        let proto = FunctionProto {
            name: header.name,
            code,
            units: self.units,
            branch_profiles: self.branch_profiles as u16,
            loop_profiles: self.loop_profiles as u16,
            num_params: header.num_params,
            is_vararg: header.is_vararg,
            frame_size: self.frame_size as u16,
            num_cells: self.num_cells as u16,
            upvalues: header.upvalues,
            protos: header.protos,
            spans,
            span: header.span,
        };
        Ok((proto, layout))
    }
}

/// Where the encoder placed blocks and branches.
#[derive(Debug, Default)]
pub struct Layout {
    /// Start offset of each placed block, indexed by block id.
    pub block_offsets: Vec<Option<usize>>,
    /// Offset of every branch and the block it was built to reach.
    pub branches: Vec<(usize, BlockId)>,
}

/// Assemble one function's CFG into a prototype.
pub fn assemble(ir: &FunctionIr, header: ProtoHeader) -> Result<FunctionProto, CompileError> {
    assemble_with_layout(ir, header).map(|(proto, _)| proto)
}

/// [`assemble`], also reporting block and branch offsets.
pub fn assemble_with_layout(
    ir: &FunctionIr,
    header: ProtoHeader,
) -> Result<(FunctionProto, Layout), CompileError> {
    let mut asm = Assembler::new(ir);
    asm.allocate()?;
    asm.lower_blocks()?;
    if asm.branch_profiles > MAX_FIELD || asm.loop_profiles > MAX_FIELD {
        let n = asm.branch_profiles.max(asm.loop_profiles);
        return Err(overflow("branch sites", n, header.span));
    }
    asm.encode(header)
}

/// Convenience for tests and tools: the opcodes of `proto` in order.
pub fn opcodes(proto: &FunctionProto) -> Vec<OpCode> {
    crate::opcode::instructions(&proto.code)
        .map(|(_, i)| i.opcode())
        .collect()
}
