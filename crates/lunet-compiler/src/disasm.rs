/// Bytecode disassembler: one line per instruction, units expanded inline.
use crate::opcode::{instructions, Instr};
use crate::proto::{Constant, FunctionProto};
use crate::unit::{Arg, Unit};
use lunet_core::string::{StringId, StringInterner};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Disassemble a prototype and its nested functions.
pub fn disassemble(proto: &FunctionProto, strings: &StringInterner) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, strings, 0);
    out
}

fn disassemble_proto(out: &mut String, proto: &FunctionProto, strings: &StringInterner, level: usize) {
    let indent = "  ".repeat(level);

    let vararg = if proto.is_vararg { "+" } else { "" };
    writeln!(
        out,
        "{indent}function {} ({}{vararg} params, {} slots, {} cells, {} upvalues, {} functions)",
        proto.name,
        proto.num_params,
        proto.frame_size,
        proto.num_cells,
        proto.upvalues.len(),
        proto.protos.len(),
    )
    .unwrap();

    for (at, instr) in instructions(&proto.code) {
        let span = proto.span_at(at);
        let line = if span.is_available() {
            format!("[{}]", span.line)
        } else {
            "[-]".to_string()
        };
        write!(out, "{indent}\t{at}\t{line:>5}\t").unwrap();
        disasm_instruction(out, &instr, proto);
        writeln!(out).unwrap();
    }

    let mut referenced = BTreeSet::new();
    for desc in &proto.units {
        unit_strings(&desc.unit, &mut referenced);
    }
    if !referenced.is_empty() {
        writeln!(out, "{indent}strings ({}):", referenced.len()).unwrap();
        for id in referenced {
            writeln!(out, "{indent}\t{id}\t{:?}", strings.display(id)).unwrap();
        }
    }

    if !proto.upvalues.is_empty() {
        writeln!(out, "{indent}upvalues ({}):", proto.upvalues.len()).unwrap();
        for (i, up) in proto.upvalues.iter().enumerate() {
            writeln!(out, "{indent}\t{i}\t{}", strings.display(up.name)).unwrap();
        }
    }

    for (i, p) in proto.protos.iter().enumerate() {
        writeln!(out, "{indent}function [{i}]:").unwrap();
        disassemble_proto(out, p, strings, level + 1);
    }
}

/// Disassemble a single instruction into the output string.
pub fn disasm_instruction(out: &mut String, instr: &Instr, proto: &FunctionProto) {
    write!(out, "{:<16}", instr.opcode().name()).unwrap();
    match instr {
        Instr::Exec { unit } => {
            write!(out, "#{unit}").unwrap();
            if let Some(desc) = proto.units.get(*unit as usize) {
                write!(out, "\t; {}", desc.unit).unwrap();
            }
        }
        Instr::Br { target } => write!(out, "-> {target}").unwrap(),
        Instr::BrIf {
            profile,
            cond,
            target,
        }
        | Instr::BrLoop {
            profile,
            cond,
            target,
        } => write!(out, "p{profile} r{cond} -> {target}").unwrap(),
        Instr::Clear { slot } | Instr::ReturnSingle { slot } => write!(out, "r{slot}").unwrap(),
        Instr::Copy { src, dst } => write!(out, "r{src} -> r{dst}").unwrap(),
        Instr::Swap { a, b } => write!(out, "r{a} <-> r{b}").unwrap(),
        Instr::ReturnNil => {}
        Instr::ReturnMultiple { slots } => {
            let regs: Vec<String> = slots.iter().map(|s| format!("r{s}")).collect();
            write!(out, "{}", regs.join(" ")).unwrap();
        }
    }
}

fn unit_strings(unit: &Unit, out: &mut BTreeSet<StringId>) {
    let arg = |a: &Arg, out: &mut BTreeSet<StringId>| {
        if let Arg::Const(Constant::String(id)) = a {
            out.insert(*id);
        }
    };
    match unit {
        Unit::LoadConst {
            value: Constant::String(id),
            ..
        } => {
            out.insert(*id);
        }
        Unit::LoadGlobal { name, .. } => {
            out.insert(*name);
        }
        Unit::StoreGlobal { name, value } => {
            out.insert(*name);
            arg(value, out);
        }
        Unit::StoreCell { value, .. }
        | Unit::NewCell { value, .. }
        | Unit::StoreUpvalue { value, .. } => arg(value, out),
        Unit::Index { object, key, .. } => {
            arg(object, out);
            arg(key, out);
        }
        Unit::IndexStore { object, key, value } => {
            arg(object, out);
            arg(key, out);
            arg(value, out);
        }
        Unit::Call { callee, args, .. } | Unit::TailCall { callee, args, .. } => {
            arg(callee, out);
            args.iter().for_each(|a| arg(a, out));
        }
        Unit::Return { values, .. } | Unit::SetList { values, .. } => {
            values.iter().for_each(|a| arg(a, out));
        }
        Unit::Unary { operand, .. } => arg(operand, out),
        Unit::Binary { lhs, rhs, .. } => {
            arg(lhs, out);
            arg(rhs, out);
        }
        _ => {}
    }
}
