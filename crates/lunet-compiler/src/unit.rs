//! Executable units: the work behind each `EXEC` instruction.
//!
//! Everything that is not a plain slot move or a branch becomes a unit. The
//! unit table is indexed by the `EXEC` operand and each descriptor carries
//! the source span used for runtime error reporting.

use crate::ast::{BinOp, SourceSpan, UnOp};
use crate::proto::Constant;
use lunet_core::string::StringId;
use std::fmt;

/// How many values a multi-result producer delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCount {
    /// Exactly this many values, nil-padded or truncated, in consecutive slots.
    Fixed(u16),
    /// All values, handed to the next spread consumer.
    Spread,
}

/// A unit operand: a frame slot or an inline constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Slot(u16),
    Const(Constant),
}

/// Where a closure finds each captured cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureSource {
    /// A cell owned by the creating frame.
    Cell(u16),
    /// One of the creating closure's own upvalues.
    Upvalue(u16),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Unit {
    LoadConst {
        value: Constant,
        dst: u16,
    },
    /// Fixed parameter `index`, nil when not passed.
    Argument {
        index: u16,
        dst: u16,
    },
    VarArgs {
        results: ResultCount,
        dst: u16,
    },
    LoadCell {
        cell: u16,
        dst: u16,
    },
    StoreCell {
        cell: u16,
        value: Arg,
    },
    /// Fresh cell for a captured local's declaration.
    NewCell {
        cell: u16,
        value: Arg,
    },
    LoadUpvalue {
        upvalue: u16,
        dst: u16,
    },
    StoreUpvalue {
        upvalue: u16,
        value: Arg,
    },
    LoadGlobal {
        name: StringId,
        dst: u16,
    },
    StoreGlobal {
        name: StringId,
        value: Arg,
    },
    Index {
        object: Arg,
        key: Arg,
        dst: u16,
    },
    IndexStore {
        object: Arg,
        key: Arg,
        value: Arg,
    },
    Call {
        callee: Arg,
        args: Vec<Arg>,
        /// Append the pending spread values after `args`.
        spread: bool,
        results: ResultCount,
        dst: u16,
    },
    TailCall {
        callee: Arg,
        args: Vec<Arg>,
        spread: bool,
    },
    /// General return, for constants or spread values.
    Return {
        values: Vec<Arg>,
        spread: bool,
    },
    Unary {
        op: UnOp,
        operand: Arg,
        dst: u16,
    },
    Binary {
        op: BinOp,
        lhs: Arg,
        rhs: Arg,
        dst: u16,
    },
    NewTable {
        array_hint: u16,
        hash_hint: u16,
        dst: u16,
    },
    /// Store positional constructor values at keys 1, 2, ...
    SetList {
        table: Arg,
        values: Vec<Arg>,
        spread: bool,
    },
    Closure {
        proto: u16,
        captures: Vec<CaptureSource>,
        dst: u16,
    },
    /// Numeric `for` setup. Writes `true` to `dst` when the body runs at least once.
    ForPrep {
        start: Arg,
        stop: Arg,
        step: Arg,
        index: u16,
        limit: u16,
        step_slot: u16,
        dst: u16,
    },
    /// Numeric `for` advance. Writes `true` to `dst` once the loop is finished.
    ForStep {
        index: u16,
        limit: u16,
        step: u16,
        dst: u16,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnitDescriptor {
    pub unit: Unit,
    pub span: SourceSpan,
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Slot(s) => write!(f, "r{s}"),
            Arg::Const(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for ResultCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCount::Fixed(n) => write!(f, "{n}"),
            ResultCount::Spread => write!(f, "*"),
        }
    }
}

fn list(args: &[Arg], spread: bool) -> String {
    let mut parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    if spread {
        parts.push("...".to_string());
    }
    parts.join(", ")
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Unit::*;
        match self {
            LoadConst { value, dst } => write!(f, "r{dst} = {value}"),
            Argument { index, dst } => write!(f, "r{dst} = arg[{index}]"),
            VarArgs { results, dst } => write!(f, "r{dst} = ...({results})"),
            LoadCell { cell, dst } => write!(f, "r{dst} = cell[{cell}]"),
            StoreCell { cell, value } => write!(f, "cell[{cell}] = {value}"),
            NewCell { cell, value } => write!(f, "cell[{cell}] = new {value}"),
            LoadUpvalue { upvalue, dst } => write!(f, "r{dst} = up[{upvalue}]"),
            StoreUpvalue { upvalue, value } => write!(f, "up[{upvalue}] = {value}"),
            LoadGlobal { name, dst } => write!(f, "r{dst} = _ENV[{name}]"),
            StoreGlobal { name, value } => write!(f, "_ENV[{name}] = {value}"),
            Index { object, key, dst } => write!(f, "r{dst} = {object}[{key}]"),
            IndexStore { object, key, value } => write!(f, "{object}[{key}] = {value}"),
            Call {
                callee,
                args,
                spread,
                results,
                dst,
            } => write!(f, "r{dst}..({results}) = {callee}({})", list(args, *spread)),
            TailCall {
                callee,
                args,
                spread,
            } => write!(f, "tailcall {callee}({})", list(args, *spread)),
            Return { values, spread } => write!(f, "return {}", list(values, *spread)),
            Unary { op, operand, dst } => write!(f, "r{dst} = {op:?} {operand}"),
            Binary { op, lhs, rhs, dst } => write!(f, "r{dst} = {lhs} {} {rhs}", op.symbol()),
            NewTable {
                array_hint,
                hash_hint,
                dst,
            } => write!(f, "r{dst} = {{}} ({array_hint}, {hash_hint})"),
            SetList {
                table,
                values,
                spread,
            } => write!(f, "setlist {table} [{}]", list(values, *spread)),
            Closure {
                proto,
                captures,
                dst,
            } => write!(f, "r{dst} = closure #{proto} {captures:?}"),
            ForPrep {
                start,
                stop,
                step,
                index,
                dst,
                ..
            } => write!(f, "r{dst} = forprep r{index} = {start}, {stop}, {step}"),
            ForStep { index, dst, .. } => write!(f, "r{dst} = forstep r{index}"),
        }
    }
}
