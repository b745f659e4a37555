use std::fmt;

use crate::runtime::sign_extend;
use crate::symbol::{Flag, Register, TrapVect};

/// The 16 values of the top 4 bits of an instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Br = 0x0,
    Add = 0x1,
    Ld = 0x2,
    St = 0x3,
    Jsr = 0x4,
    And = 0x5,
    Ldr = 0x6,
    Str = 0x7,
    Rti = 0x8,
    Not = 0x9,
    Ldi = 0xA,
    Sti = 0xB,
    Jmp = 0xC,
    Res = 0xD,
    Lea = 0xE,
    Trap = 0xF,
}

impl Opcode {
    const TABLE: [Opcode; 16] = [
        Opcode::Br,
        Opcode::Add,
        Opcode::Ld,
        Opcode::St,
        Opcode::Jsr,
        Opcode::And,
        Opcode::Ldr,
        Opcode::Str,
        Opcode::Rti,
        Opcode::Not,
        Opcode::Ldi,
        Opcode::Sti,
        Opcode::Jmp,
        Opcode::Res,
        Opcode::Lea,
        Opcode::Trap,
    ];

    /// Opcode of an instruction word. Every word has one.
    pub fn of(instr: u16) -> Self {
        Self::TABLE[(instr >> 12) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Br => "BR",
            Opcode::Add => "ADD",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Jsr => "JSR",
            Opcode::And => "AND",
            Opcode::Ldr => "LDR",
            Opcode::Str => "STR",
            Opcode::Rti => "RTI",
            Opcode::Not => "NOT",
            Opcode::Ldi => "LDI",
            Opcode::Sti => "STI",
            Opcode::Jmp => "JMP",
            Opcode::Res => "RES",
            Opcode::Lea => "LEA",
            Opcode::Trap => "TRAP",
        }
    }
}

/// Second operand of `ADD` and `AND`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Choice {
    Reg(Register),
    /// Already sign-extended from 5 bits
    Imm5(i16),
}

/// Where `JSR`/`JSRR` transfers control.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JsrTarget {
    /// `JSR`: PC-relative, already sign-extended from 11 bits
    Offset(i16),
    /// `JSRR`: address held in a base register
    Reg(Register),
}

/// A fully decoded instruction.
///
/// Offsets are stored sign-extended, so `offset9` of `-1` refers to the fetched instruction itself.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Br { cc: Flag, offset9: i16 },
    Add { dest: Register, src: Register, rhs: Choice },
    Ld { dest: Register, offset9: i16 },
    St { src: Register, offset9: i16 },
    Jsr(JsrTarget),
    And { dest: Register, src: Register, rhs: Choice },
    Ldr { dest: Register, base: Register, offset6: i16 },
    Str { src: Register, base: Register, offset6: i16 },
    /// Unimplemented
    Rti,
    Not { dest: Register, src: Register },
    Ldi { dest: Register, offset9: i16 },
    Sti { src: Register, offset9: i16 },
    /// `RET` when `base` is `R7`
    Jmp { base: Register },
    /// Reserved, unimplemented
    Res,
    Lea { dest: Register, offset9: i16 },
    Trap { vect: u8 },
}

// Field extraction
fn dr(instr: u16) -> Register {
    Register::from_bits(instr >> 9)
}

fn sr1(instr: u16) -> Register {
    Register::from_bits(instr >> 6)
}

fn offs(instr: u16, bits: u32) -> i16 {
    sign_extend(instr, bits) as i16
}

fn choice(instr: u16) -> Choice {
    if instr & 0b10_0000 == 0 {
        Choice::Reg(Register::from_bits(instr))
    } else {
        Choice::Imm5(offs(instr, 5))
    }
}

fn field(val: i16, bits: u32) -> u16 {
    (val as u16) & ((1 << bits) - 1)
}

impl Op {
    /// Decode an instruction word. Total: any word decodes to some operation.
    pub fn decode(instr: u16) -> Self {
        match Opcode::of(instr) {
            Opcode::Br => Op::Br {
                cc: Flag::from_bits(instr >> 9),
                offset9: offs(instr, 9),
            },
            Opcode::Add => Op::Add {
                dest: dr(instr),
                src: sr1(instr),
                rhs: choice(instr),
            },
            Opcode::Ld => Op::Ld {
                dest: dr(instr),
                offset9: offs(instr, 9),
            },
            Opcode::St => Op::St {
                src: dr(instr),
                offset9: offs(instr, 9),
            },
            Opcode::Jsr => Op::Jsr(if instr & 0x0800 == 0 {
                JsrTarget::Reg(sr1(instr))
            } else {
                JsrTarget::Offset(offs(instr, 11))
            }),
            Opcode::And => Op::And {
                dest: dr(instr),
                src: sr1(instr),
                rhs: choice(instr),
            },
            Opcode::Ldr => Op::Ldr {
                dest: dr(instr),
                base: sr1(instr),
                offset6: offs(instr, 6),
            },
            Opcode::Str => Op::Str {
                src: dr(instr),
                base: sr1(instr),
                offset6: offs(instr, 6),
            },
            Opcode::Rti => Op::Rti,
            Opcode::Not => Op::Not {
                dest: dr(instr),
                src: sr1(instr),
            },
            Opcode::Ldi => Op::Ldi {
                dest: dr(instr),
                offset9: offs(instr, 9),
            },
            Opcode::Sti => Op::Sti {
                src: dr(instr),
                offset9: offs(instr, 9),
            },
            Opcode::Jmp => Op::Jmp { base: sr1(instr) },
            Opcode::Res => Op::Res,
            Opcode::Lea => Op::Lea {
                dest: dr(instr),
                offset9: offs(instr, 9),
            },
            Opcode::Trap => Op::Trap {
                vect: (instr & 0xFF) as u8,
            },
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Op::Br { .. } => Opcode::Br,
            Op::Add { .. } => Opcode::Add,
            Op::Ld { .. } => Opcode::Ld,
            Op::St { .. } => Opcode::St,
            Op::Jsr(_) => Opcode::Jsr,
            Op::And { .. } => Opcode::And,
            Op::Ldr { .. } => Opcode::Ldr,
            Op::Str { .. } => Opcode::Str,
            Op::Rti => Opcode::Rti,
            Op::Not { .. } => Opcode::Not,
            Op::Ldi { .. } => Opcode::Ldi,
            Op::Sti { .. } => Opcode::Sti,
            Op::Jmp { .. } => Opcode::Jmp,
            Op::Res => Opcode::Res,
            Op::Lea { .. } => Opcode::Lea,
            Op::Trap { .. } => Opcode::Trap,
        }
    }

    /// Encode into an instruction word. Offsets are truncated to their field width.
    pub fn encode(&self) -> u16 {
        let opcode = (self.opcode() as u16) << 12;
        let reg = |reg: Register, shift: u32| (reg as u16) << shift;
        let choice = |rhs: Choice| match rhs {
            Choice::Reg(sr2) => sr2 as u16,
            Choice::Imm5(imm) => 0b10_0000 | field(imm, 5),
        };
        let operands = match *self {
            Op::Br { cc, offset9 } => cc.bits() << 9 | field(offset9, 9),
            Op::Add { dest, src, rhs } | Op::And { dest, src, rhs } => {
                reg(dest, 9) | reg(src, 6) | choice(rhs)
            }
            Op::Ld { dest, offset9 } | Op::Ldi { dest, offset9 } | Op::Lea { dest, offset9 } => {
                reg(dest, 9) | field(offset9, 9)
            }
            Op::St { src, offset9 } | Op::Sti { src, offset9 } => reg(src, 9) | field(offset9, 9),
            Op::Jsr(JsrTarget::Offset(offset11)) => 0x0800 | field(offset11, 11),
            Op::Jsr(JsrTarget::Reg(base)) => reg(base, 6),
            Op::Ldr {
                dest: reg1,
                base,
                offset6,
            }
            | Op::Str {
                src: reg1,
                base,
                offset6,
            } => reg(reg1, 9) | reg(base, 6) | field(offset6, 6),
            Op::Not { dest, src } => reg(dest, 9) | reg(src, 6) | 0b11_1111,
            Op::Jmp { base } => reg(base, 6),
            Op::Rti | Op::Res => 0,
            Op::Trap { vect } => vect as u16,
        };
        opcode | operands
    }

    /// Replace the PC-relative offset of a label-addressed instruction.
    ///
    /// Returns `None` for instructions without a PC-relative operand.
    pub fn with_pc_offset(self, offset: i16) -> Option<Self> {
        let op = match self {
            Op::Br { cc, .. } => Op::Br { cc, offset9: offset },
            Op::Ld { dest, .. } => Op::Ld { dest, offset9: offset },
            Op::Ldi { dest, .. } => Op::Ldi { dest, offset9: offset },
            Op::Lea { dest, .. } => Op::Lea { dest, offset9: offset },
            Op::St { src, .. } => Op::St { src, offset9: offset },
            Op::Sti { src, .. } => Op::Sti { src, offset9: offset },
            Op::Jsr(JsrTarget::Offset(_)) => Op::Jsr(JsrTarget::Offset(offset)),
            _ => return None,
        };
        Some(op)
    }

    /// Width of the PC-relative operand, if there is one.
    pub fn pc_offset_bits(&self) -> Option<u32> {
        match self {
            Op::Br { .. }
            | Op::Ld { .. }
            | Op::Ldi { .. }
            | Op::Lea { .. }
            | Op::St { .. }
            | Op::Sti { .. } => Some(9),
            Op::Jsr(JsrTarget::Offset(_)) => Some(11),
            _ => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::Reg(reg) => write!(f, "{reg}"),
            Choice::Imm5(imm) => write!(f, "#{imm}"),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match self {
            Op::Br {
                cc: Flag::Never, ..
            } => write!(f, "NOP"),
            Op::Br { cc, offset9 } => write!(f, "{name}{cc} #{offset9}"),
            Op::Add { dest, src, rhs } | Op::And { dest, src, rhs } => {
                write!(f, "{name} {dest}, {src}, {rhs}")
            }
            Op::Ld { dest, offset9 } | Op::Ldi { dest, offset9 } | Op::Lea { dest, offset9 } => {
                write!(f, "{name} {dest}, #{offset9}")
            }
            Op::St { src, offset9 } | Op::Sti { src, offset9 } => {
                write!(f, "{name} {src}, #{offset9}")
            }
            Op::Jsr(JsrTarget::Offset(offset11)) => write!(f, "JSR #{offset11}"),
            Op::Jsr(JsrTarget::Reg(base)) => write!(f, "JSRR {base}"),
            Op::Ldr {
                dest: reg,
                base,
                offset6,
            }
            | Op::Str {
                src: reg,
                base,
                offset6,
            } => write!(f, "{name} {reg}, {base}, #{offset6}"),
            Op::Not { dest, src } => write!(f, "{name} {dest}, {src}"),
            Op::Jmp {
                base: Register::R7,
            } => write!(f, "RET"),
            Op::Jmp { base } => write!(f, "{name} {base}"),
            Op::Rti | Op::Res => write!(f, "{name}"),
            Op::Trap { vect } => match TrapVect::try_from(*vect) {
                Ok(trap) => write!(f, "{}", trap.name()),
                Err(()) => write!(f, "{name} x{vect:02X}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_matches_discriminants() {
        for (i, opcode) in Opcode::TABLE.iter().enumerate() {
            assert_eq!(*opcode as usize, i);
            assert_eq!(Opcode::of((i as u16) << 12), *opcode);
        }
    }

    #[test]
    fn decode_add_register_form() {
        assert_eq!(
            Op::decode(0b0001_010_000_0_00_001),
            Op::Add {
                dest: Register::R2,
                src: Register::R0,
                rhs: Choice::Reg(Register::R1),
            }
        );
    }

    #[test]
    fn decode_sign_extends_offsets() {
        assert_eq!(
            Op::decode(0b0001_001_001_1_11111),
            Op::Add {
                dest: Register::R1,
                src: Register::R1,
                rhs: Choice::Imm5(-1),
            }
        );
        assert_eq!(
            Op::decode(0b0000_111_111111101),
            Op::Br {
                cc: Flag::Nzp,
                offset9: -3,
            }
        );
        assert_eq!(
            Op::decode(0b0100_1_10000000000),
            Op::Jsr(JsrTarget::Offset(-1024))
        );
        assert_eq!(
            Op::decode(0b0110_011_010_100000),
            Op::Ldr {
                dest: Register::R3,
                base: Register::R2,
                offset6: -32,
            }
        );
    }

    #[test]
    fn decode_then_encode_is_identity_for_canonical_words() {
        let words = [
            0x0000, // NOP
            0x0E05, // BRnzp #5
            0x1220, 0x1240, 0x1060, 0x5020, 0x927F, 0x2005, 0x3FFF, 0x4802, 0x41C0, 0x6283,
            0x7E3F, 0xA1FF, 0xB001, 0xC1C0, 0xE0FE, 0xF025, 0xF0FF,
        ];
        for word in words {
            assert_eq!(Op::decode(word).encode(), word, "word 0x{word:04x}");
        }
    }

    #[test]
    fn reserved_opcodes_decode() {
        assert_eq!(Op::decode(0x8000), Op::Rti);
        assert_eq!(Op::decode(0xDFFF), Op::Res);
    }

    #[test]
    fn display() {
        assert_eq!(Op::decode(0x1220).to_string(), "ADD R1, R0, #0");
        assert_eq!(Op::decode(0b0001_010_000_0_00_001).to_string(), "ADD R2, R0, R1");
        assert_eq!(Op::decode(0x0BFD).to_string(), "BRnp #-3");
        assert_eq!(Op::decode(0x0000).to_string(), "NOP");
        assert_eq!(Op::decode(0xC1C0).to_string(), "RET");
        assert_eq!(Op::decode(0x4080).to_string(), "JSRR R2");
        assert_eq!(Op::decode(0xF025).to_string(), "HALT");
        assert_eq!(Op::decode(0xF0FF).to_string(), "TRAP xFF");
    }

    #[test]
    fn pc_offset_rewrite() {
        let op = Op::Ld {
            dest: Register::R0,
            offset9: 0,
        };
        assert_eq!(op.pc_offset_bits(), Some(9));
        assert_eq!(
            op.with_pc_offset(-4),
            Some(Op::Ld {
                dest: Register::R0,
                offset9: -4,
            })
        );
        assert_eq!(Op::Rti.with_pc_offset(1), None);
    }
}
