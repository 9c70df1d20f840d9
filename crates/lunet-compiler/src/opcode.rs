/// Bytecode opcodes and their byte encoding.
///
/// Every instruction is a one-byte opcode followed by little-endian u16
/// fields. Branch targets are absolute byte offsets into the function's
/// code buffer, so a function is limited to 65535 bytes.
///
/// | op             | layout                                      | size   |
/// |----------------|---------------------------------------------|--------|
/// | EXEC           | op, unit                                    | 3      |
/// | BR             | op, target                                  | 3      |
/// | BR_IF          | op, branch profile, cond slot, target       | 7      |
/// | BR_LOOP        | op, loop profile, cond slot, target         | 7      |
/// | CLEAR          | op, slot                                    | 3      |
/// | COPY           | op, src slot, dst slot                      | 5      |
/// | SWAP           | op, slot a, slot b                          | 5      |
/// | RETURN_NIL     | op                                          | 1      |
/// | RETURN_SINGLE  | op, slot                                    | 3      |
/// | RETURN_MULTIPLE| op, count, slot x count                     | 3 + 2n |
///
/// BR_IF and BR_LOOP jump when the condition slot is falsy and fall through
/// otherwise.
use std::fmt;

/// Largest code buffer a single function may assemble to.
pub const MAX_CODE_SIZE: usize = u16::MAX as usize;

/// Largest value of any u16 operand field.
pub const MAX_FIELD: usize = u16::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Exec = 0,
    Br,
    BrIf,
    BrLoop,
    Clear,
    Copy,
    Swap,
    ReturnNil,
    ReturnSingle,
    ReturnMultiple,
}

impl OpCode {
    pub const COUNT: usize = 10;

    pub fn from_u8(val: u8) -> Option<OpCode> {
        use OpCode::*;
        Some(match val {
            0 => Exec,
            1 => Br,
            2 => BrIf,
            3 => BrLoop,
            4 => Clear,
            5 => Copy,
            6 => Swap,
            7 => ReturnNil,
            8 => ReturnSingle,
            9 => ReturnMultiple,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Exec => "EXEC",
            Br => "BR",
            BrIf => "BR_IF",
            BrLoop => "BR_LOOP",
            Clear => "CLEAR",
            Copy => "COPY",
            Swap => "SWAP",
            ReturnNil => "RETURN_NIL",
            ReturnSingle => "RETURN_SINGLE",
            ReturnMultiple => "RETURN_MULTIPLE",
        }
    }

    /// Encoded size in bytes. `RETURN_MULTIPLE` adds two bytes per value.
    pub fn size(&self, count: usize) -> usize {
        use OpCode::*;
        match self {
            ReturnNil => 1,
            Exec | Br | Clear | ReturnSingle => 3,
            Copy | Swap => 5,
            BrIf | BrLoop => 7,
            ReturnMultiple => 3 + 2 * count,
        }
    }

    /// Byte offset of the target field within a branch instruction.
    pub fn target_field(&self) -> Option<usize> {
        match self {
            OpCode::Br => Some(1),
            OpCode::BrIf | OpCode::BrLoop => Some(5),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
pub fn read_u16(code: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([code[at], code[at + 1]])
}

#[inline]
pub fn write_u16(code: &mut [u8], at: usize, value: u16) {
    code[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

/// A decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Exec { unit: u16 },
    Br { target: u16 },
    BrIf { profile: u16, cond: u16, target: u16 },
    BrLoop { profile: u16, cond: u16, target: u16 },
    Clear { slot: u16 },
    Copy { src: u16, dst: u16 },
    Swap { a: u16, b: u16 },
    ReturnNil,
    ReturnSingle { slot: u16 },
    ReturnMultiple { slots: Vec<u16> },
}

impl Instr {
    pub fn opcode(&self) -> OpCode {
        match self {
            Instr::Exec { .. } => OpCode::Exec,
            Instr::Br { .. } => OpCode::Br,
            Instr::BrIf { .. } => OpCode::BrIf,
            Instr::BrLoop { .. } => OpCode::BrLoop,
            Instr::Clear { .. } => OpCode::Clear,
            Instr::Copy { .. } => OpCode::Copy,
            Instr::Swap { .. } => OpCode::Swap,
            Instr::ReturnNil => OpCode::ReturnNil,
            Instr::ReturnSingle { .. } => OpCode::ReturnSingle,
            Instr::ReturnMultiple { .. } => OpCode::ReturnMultiple,
        }
    }

    pub fn size(&self) -> usize {
        let count = match self {
            Instr::ReturnMultiple { slots } => slots.len(),
            _ => 0,
        };
        self.opcode().size(count)
    }

    /// Branch target, if this is a branch.
    pub fn target(&self) -> Option<u16> {
        match self {
            Instr::Br { target }
            | Instr::BrIf { target, .. }
            | Instr::BrLoop { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Decode the instruction at `at`. Bytecode comes from the assembler, so an
/// unknown opcode is a compiler defect.
pub fn decode(code: &[u8], at: usize) -> Instr {
    let op = match OpCode::from_u8(code[at]) {
        Some(op) => op,
        None => unreachable!("invalid opcode {} at offset {at}", code[at]),
    };
    let f = |n: usize| read_u16(code, at + 1 + 2 * n);
    match op {
        OpCode::Exec => Instr::Exec { unit: f(0) },
        OpCode::Br => Instr::Br { target: f(0) },
        OpCode::BrIf => Instr::BrIf {
            profile: f(0),
            cond: f(1),
            target: f(2),
        },
        OpCode::BrLoop => Instr::BrLoop {
            profile: f(0),
            cond: f(1),
            target: f(2),
        },
        OpCode::Clear => Instr::Clear { slot: f(0) },
        OpCode::Copy => Instr::Copy { src: f(0), dst: f(1) },
        OpCode::Swap => Instr::Swap { a: f(0), b: f(1) },
        OpCode::ReturnNil => Instr::ReturnNil,
        OpCode::ReturnSingle => Instr::ReturnSingle { slot: f(0) },
        OpCode::ReturnMultiple => {
            let count = f(0) as usize;
            Instr::ReturnMultiple {
                slots: (0..count).map(|i| f(1 + i)).collect(),
            }
        }
    }
}

/// Encode `instr` onto the end of `code`.
pub fn encode(instr: &Instr, code: &mut Vec<u8>) {
    code.push(instr.opcode() as u8);
    let mut put = |v: u16| code.extend_from_slice(&v.to_le_bytes());
    match instr {
        Instr::Exec { unit } => put(*unit),
        Instr::Br { target } => put(*target),
        Instr::BrIf {
            profile,
            cond,
            target,
        }
        | Instr::BrLoop {
            profile,
            cond,
            target,
        } => {
            put(*profile);
            put(*cond);
            put(*target);
        }
        Instr::Clear { slot } | Instr::ReturnSingle { slot } => put(*slot),
        Instr::Copy { src, dst } => {
            put(*src);
            put(*dst);
        }
        Instr::Swap { a, b } => {
            put(*a);
            put(*b);
        }
        Instr::ReturnNil => {}
        Instr::ReturnMultiple { slots } => {
            put(slots.len() as u16);
            for s in slots {
                put(*s);
            }
        }
    }
}

/// Iterate `(offset, instr)` over a whole code buffer.
pub fn instructions(code: &[u8]) -> impl Iterator<Item = (usize, Instr)> + '_ {
    let mut at = 0;
    std::iter::from_fn(move || {
        if at >= code.len() {
            return None;
        }
        let instr = decode(code, at);
        let here = at;
        at += instr.size();
        Some((here, instr))
    })
}
