use std::{fmt, ops::Range, str::FromStr};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

/// Symbol table of label -> statement index, in definition order.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: SrcOffset,
    len: usize,
}

impl Span {
    pub fn new(offs: SrcOffset, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn dummy() -> Self {
        Span {
            offs: SrcOffset(0),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offs(&self) -> usize {
        self.offs.0
    }

    pub fn end(&self) -> usize {
        self.offs.0 + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.offs()..value.end()
    }
}

/// Used to refer to offsets from the start of a source file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SrcOffset(pub usize);

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    /// Implicit operand of the console traps.
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    /// Holds the return address after `JSR`/`JSRR`.
    R7,
}

impl Register {
    const ALL: [Register; 8] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
    ];

    /// Register named by the 3-bit field at the bottom of `bits`.
    pub fn from_bits(bits: u16) -> Self {
        Self::ALL[(bits & 0b111) as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn all() -> impl Iterator<Item = Register> {
        Self::ALL.into_iter()
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "r0" => Ok(Register::R0),
            "r1" => Ok(Register::R1),
            "r2" => Ok(Register::R2),
            "r3" => Ok(Register::R3),
            "r4" => Ok(Register::R4),
            "r5" => Ok(Register::R5),
            "r6" => Ok(Register::R6),
            "r7" => Ok(Register::R7),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.index())
    }
}

/// Condition mask of a branch, tested against the condition code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    /// No bits set, never taken
    Never,
    /// -
    N,
    /// 0
    Z,
    /// +
    P,
    /// <= 0
    Nz,
    /// >= 0
    Zp,
    /// != 0
    Np,
    /// Unconditional
    Nzp,
}

impl Flag {
    /// Mask from the 3-bit `nzp` field at the bottom of `bits`.
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0b111 {
            0b000 => Flag::Never,
            0b100 => Flag::N,
            0b010 => Flag::Z,
            0b001 => Flag::P,
            0b110 => Flag::Nz,
            0b011 => Flag::Zp,
            0b101 => Flag::Np,
            _ => Flag::Nzp,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Flag::Never => 0b000,
            Flag::N => 0b100,
            Flag::Z => 0b010,
            Flag::P => 0b001,
            Flag::Nz => 0b110,
            Flag::Zp => 0b011,
            Flag::Np => 0b101,
            Flag::Nzp => 0b111,
        }
    }

    /// Parse the suffix of a `BR` mnemonic. Empty means unconditional.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let mut bits = 0;
        let mut last = 0;
        for ch in suffix.chars() {
            let bit = match ch.to_ascii_lowercase() {
                'n' => 0b100,
                'z' => 0b010,
                'p' => 0b001,
                _ => return None,
            };
            // Must be in `nzp` order, each at most once
            if bit >= last && last != 0 {
                return None;
            }
            bits |= bit;
            last = bit;
        }
        if bits == 0 {
            return Some(Flag::Nzp);
        }
        Some(Flag::from_bits(bits))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self {
            Flag::Never => "",
            Flag::N => "n",
            Flag::Z => "z",
            Flag::P => "p",
            Flag::Nz => "nz",
            Flag::Zp => "zp",
            Flag::Np => "np",
            Flag::Nzp => "nzp",
        };
        f.write_str(suffix)
    }
}

/// Console routines reachable through `TRAP`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrapVect {
    Getc = 0x20,
    Out = 0x21,
    Puts = 0x22,
    In = 0x23,
    Putsp = 0x24,
    Halt = 0x25,
    InU16 = 0x26,
    OutU16 = 0x27,
}

impl TrapVect {
    pub fn name(self) -> &'static str {
        match self {
            TrapVect::Getc => "GETC",
            TrapVect::Out => "OUT",
            TrapVect::Puts => "PUTS",
            TrapVect::In => "IN",
            TrapVect::Putsp => "PUTSP",
            TrapVect::Halt => "HALT",
            TrapVect::InU16 => "INU16",
            TrapVect::OutU16 => "OUTU16",
        }
    }
}

impl TryFrom<u8> for TrapVect {
    type Error = ();

    fn try_from(vect: u8) -> Result<Self, Self::Error> {
        let trap = match vect {
            0x20 => TrapVect::Getc,
            0x21 => TrapVect::Out,
            0x22 => TrapVect::Puts,
            0x23 => TrapVect::In,
            0x24 => TrapVect::Putsp,
            0x25 => TrapVect::Halt,
            0x26 => TrapVect::InU16,
            0x27 => TrapVect::OutU16,
            _ => return Err(()),
        };
        Ok(trap)
    }
}

impl FromStr for TrapVect {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "getc" => Ok(TrapVect::Getc),
            "out" => Ok(TrapVect::Out),
            "puts" => Ok(TrapVect::Puts),
            "in" => Ok(TrapVect::In),
            "putsp" => Ok(TrapVect::Putsp),
            "halt" => Ok(TrapVect::Halt),
            "inu16" | "in_u16" => Ok(TrapVect::InU16),
            "outu16" | "out_u16" => Ok(TrapVect::OutU16),
            _ => Err(()),
        }
    }
}

/// Instruction mnemonics understood by the assembler.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstrKind {
    Add,
    And,
    Br(Flag),
    Jmp,
    Jsr,
    Jsrr,
    Ld,
    Ldi,
    Ldr,
    Lea,
    Not,
    Ret,
    Rti,
    St,
    Sti,
    Str,
    Trap,
}

impl FromStr for InstrKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let kind = match lower.as_str() {
            "add" => InstrKind::Add,
            "and" => InstrKind::And,
            "jmp" => InstrKind::Jmp,
            "jsr" => InstrKind::Jsr,
            "jsrr" => InstrKind::Jsrr,
            "ld" => InstrKind::Ld,
            "ldi" => InstrKind::Ldi,
            "ldr" => InstrKind::Ldr,
            "lea" => InstrKind::Lea,
            "not" => InstrKind::Not,
            "ret" => InstrKind::Ret,
            "rti" => InstrKind::Rti,
            "st" => InstrKind::St,
            "sti" => InstrKind::Sti,
            "str" => InstrKind::Str,
            "trap" => InstrKind::Trap,
            _ => match lower.strip_prefix("br") {
                Some(suffix) => InstrKind::Br(Flag::from_suffix(suffix).ok_or(())?),
                None => return Err(()),
            },
        };
        Ok(kind)
    }
}

/// Assembler directives, written with a leading `.`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirKind {
    Orig,
    End,
    Stringz,
    Blkw,
    Fill,
}

impl FromStr for DirKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orig" => Ok(DirKind::Orig),
            "end" => Ok(DirKind::End),
            "stringz" => Ok(DirKind::Stringz),
            "blkw" => Ok(DirKind::Blkw),
            "fill" => Ok(DirKind::Fill),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_from_bits() {
        for reg in Register::all() {
            assert_eq!(Register::from_bits(reg as u16), reg);
            // Upper bits are ignored
            assert_eq!(Register::from_bits(0xFFF8 | reg as u16), reg);
        }
        assert_eq!("R5".parse::<Register>(), Ok(Register::R5));
        assert!("r8".parse::<Register>().is_err());
    }

    #[test]
    fn flag_bits() {
        for bits in 0..8 {
            assert_eq!(Flag::from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn flag_suffix() {
        assert_eq!(Flag::from_suffix(""), Some(Flag::Nzp));
        assert_eq!(Flag::from_suffix("nzp"), Some(Flag::Nzp));
        assert_eq!(Flag::from_suffix("NZ"), Some(Flag::Nz));
        assert_eq!(Flag::from_suffix("np"), Some(Flag::Np));
        assert_eq!(Flag::from_suffix("p"), Some(Flag::P));
        assert_eq!(Flag::from_suffix("pn"), None);
        assert_eq!(Flag::from_suffix("nn"), None);
        assert_eq!(Flag::from_suffix("x"), None);
    }

    #[test]
    fn mnemonics() {
        assert_eq!("ADD".parse::<InstrKind>(), Ok(InstrKind::Add));
        assert_eq!("brnz".parse::<InstrKind>(), Ok(InstrKind::Br(Flag::Nz)));
        assert_eq!("BR".parse::<InstrKind>(), Ok(InstrKind::Br(Flag::Nzp)));
        assert!("break".parse::<InstrKind>().is_err());
        assert_eq!("STRINGZ".parse::<DirKind>(), Ok(DirKind::Stringz));
        assert!("include".parse::<DirKind>().is_err());
    }

    #[test]
    fn trap_names_round_trip() {
        for vect in 0x20..=0x27u8 {
            let trap = TrapVect::try_from(vect).unwrap();
            assert_eq!(trap as u8, vect);
            assert_eq!(trap.name().parse::<TrapVect>(), Ok(trap));
        }
        assert!(TrapVect::try_from(0x28).is_err());
    }
}
