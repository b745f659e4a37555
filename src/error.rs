use std::{error::Error, fmt, io, path::PathBuf};

use miette::{miette, LabeledSpan, Report, Severity};

use crate::ops::Opcode;
use crate::symbol::Span;

/// Fatal condition which stops the machine.
#[derive(Debug)]
pub enum RunError {
    /// `RTI` or the reserved opcode was executed.
    Unimplemented { opcode: Opcode, addr: u16, instr: u16 },
    /// The program image could not be loaded.
    Load(LoadError),
    /// `TRAP` with a vector that has no routine.
    Dispatch { vect: u8, addr: u16, instr: u16 },
}

/// Failure to produce a program image.
#[derive(Debug)]
pub enum LoadError {
    Open { path: PathBuf, error: io::Error },
    /// Byte count is not a whole number of words.
    Misaligned { len: usize },
    /// Image does not fit between its origin and the end of memory.
    TooLarge { origin: u16, words: usize },
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Load(error) => Some(error),
            _ => None,
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<LoadError> for RunError {
    fn from(error: LoadError) -> Self {
        Self::Load(error)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unimplemented {
                opcode,
                addr,
                instr,
            } => write!(
                f,
                "Unimplemented opcode {} (0x{:04x}) at address 0x{:04x}",
                opcode.name(),
                instr,
                addr
            ),
            Self::Load(error) => write!(f, "Failed to load program: {}", error),
            Self::Dispatch { vect, addr, instr } => write!(
                f,
                "No trap routine for vector x{:02X} (0x{:04x}) at address 0x{:04x}",
                vect, instr, addr
            ),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, error } => {
                write!(f, "cannot read file `{}`: {}", path.display(), error)
            }
            Self::Misaligned { len } => {
                write!(f, "file is not aligned to 16 bits ({} bytes)", len)
            }
            Self::TooLarge { origin, words } => write!(
                f,
                "{} words starting at 0x{:04x} do not fit in memory",
                words, origin
            ),
        }
    }
}

// Assembler diagnostics

pub fn lex_unclosed_str(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::str_lit",
        help = "make sure to close string literals with a \" character.",
        labels = vec![LabeledSpan::at(span, "incorrect literal")],
        "Encountered an unterminated string literal.",
    )
    .with_source_code(src.to_string())
}

pub fn lex_invalid_lit(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::bad_lit",
        help = "ranges from -32,768 to 32,767 or 0 to 65,535 are allowed",
        labels = vec![LabeledSpan::at(span, "incorrect literal")],
        "Encountered an invalid literal.",
    )
    .with_source_code(src.to_string())
}

pub fn lex_invalid_dir(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::dir",
        help = "available directives are .orig, .fill, .blkw, .stringz and .end",
        labels = vec![LabeledSpan::at(span, "incorrect directive")],
        "Encountered an invalid directive.",
    )
    .with_source_code(src.to_string())
}

pub fn lex_unknown(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::unknown",
        help = "make sure that your decimal literals start with #",
        labels = vec![LabeledSpan::at(span, "unknown token")],
        "Encountered an unknown token.",
    )
    .with_source_code(src.to_string())
}
