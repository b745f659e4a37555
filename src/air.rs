use miette::{bail, LabeledSpan, Result, Severity};

use crate::ops::Op;
use crate::state::PC_START;
use crate::symbol::{FxMap, Span};

/// Assembly intermediate representation, contains starting address and list of statements
#[derive(Debug, Default)]
pub struct Air {
    /// Memory address to start program at
    orig: Option<u16>,
    /// One statement per memory word
    ast: Vec<AirStmt>,
    /// Label name -> index of the statement it precedes
    labels: FxMap<String, usize>,
}

/// Reference to a label, resolved once every label is known.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Target {
    pub name: String,
    pub span: Span,
}

/// Single memory word of the assembled program.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AirStmt {
    /// Instruction whose PC-relative offset is filled from `target`, if given
    Instr { op: Op, target: Option<Target> },
    /// Raw value from `.fill`, `.blkw` or `.stringz`
    Word(u16),
    /// Address of a label, from `.fill LABEL`
    WordOf(Target),
}

impl Air {
    pub fn new() -> Self {
        Air::default()
    }

    /// Set the .orig offset for the program. Error if set twice.
    pub fn set_orig(&mut self, val: u16, span: Span) -> Result<()> {
        if self.orig.is_some() {
            bail!(
                severity = Severity::Error,
                code = "parse::orig",
                help = "a program has exactly one origin, given before any statement",
                labels = vec![LabeledSpan::at(span, "second origin")],
                "Origin set twice."
            )
        }
        self.orig = Some(val);
        Ok(())
    }

    /// Load address of the program, `x3000` unless `.orig` said otherwise.
    pub fn orig(&self) -> u16 {
        self.orig.unwrap_or(PC_START)
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.ast.push(stmt)
    }

    /// Define a label pointing at the next statement to be added.
    pub fn add_label(&mut self, name: &str, span: Span) -> Result<()> {
        if self.labels.contains_key(name) {
            bail!(
                severity = Severity::Error,
                code = "parse::label",
                help = "labels must be unique within a program",
                labels = vec![LabeledSpan::at(span, "duplicate label")],
                "Label '{}' was already defined.",
                name
            )
        }
        self.labels.insert(name.to_string(), self.ast.len());
        Ok(())
    }

    /// Address a label refers to, if defined.
    pub fn label_addr(&self, name: &str) -> Option<u16> {
        let idx = self.labels.get(name)?;
        Some(self.orig().wrapping_add(*idx as u16))
    }

    pub fn get(&self, idx: usize) -> &AirStmt {
        &self.ast[idx]
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    /// Resolve label references and encode every statement to a memory word.
    pub fn emit(&self) -> Result<Vec<u16>> {
        let orig = self.orig();
        let mut words = Vec::with_capacity(self.ast.len());
        for (idx, stmt) in self.ast.iter().enumerate() {
            let addr = orig.wrapping_add(idx as u16);
            let word = match stmt {
                AirStmt::Instr { op, target: None } => op.encode(),
                AirStmt::Instr {
                    op,
                    target: Some(target),
                } => self.backpatch(*op, addr, target)?.encode(),
                AirStmt::Word(word) => *word,
                AirStmt::WordOf(target) => self.resolve(target)?,
            };
            words.push(word);
        }
        Ok(words)
    }

    fn resolve(&self, target: &Target) -> Result<u16> {
        match self.label_addr(&target.name) {
            Some(addr) => Ok(addr),
            None => bail!(
                severity = Severity::Error,
                code = "parse::undefined_label",
                help = "labels are defined by writing them at the start of a line",
                labels = vec![LabeledSpan::at(target.span, "undefined label")],
                "Label '{}' was never defined.",
                target.name
            ),
        }
    }

    /// Fill in the offset from the word after `addr` to the label's address.
    fn backpatch(&self, op: Op, addr: u16, target: &Target) -> Result<Op> {
        let label_addr = self.resolve(target)?;
        let offset = label_addr as i32 - (addr as i32 + 1);
        let bits = op.pc_offset_bits().unwrap_or(0);
        let limit = 1i32 << bits.saturating_sub(1);
        if bits == 0 || !(-limit..limit).contains(&offset) {
            bail!(
                severity = Severity::Error,
                code = "parse::offset",
                help = format!(
                    "this instruction can reach {} words behind to {} words ahead",
                    limit,
                    limit - 1
                ),
                labels = vec![LabeledSpan::at(target.span, "label too far away")],
                "Label '{}' is out of range for a {}-bit offset.",
                target.name,
                bits
            )
        }
        // Checked above
        Ok(op.with_pc_offset(offset as i16).unwrap_or(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::JsrTarget;
    use crate::symbol::{Flag, Register, SrcOffset};

    fn target(name: &str) -> Option<Target> {
        Some(Target {
            name: name.to_string(),
            span: Span::new(SrcOffset(0), name.len()),
        })
    }

    #[test]
    fn backpatch_forwards_and_backwards() {
        let mut air = Air::new();
        air.add_label("top", Span::dummy()).unwrap();
        air.add_stmt(AirStmt::Instr {
            op: Op::Ld {
                dest: Register::R0,
                offset9: 0,
            },
            target: target("data"),
        });
        air.add_stmt(AirStmt::Instr {
            op: Op::Br {
                cc: Flag::Nzp,
                offset9: 0,
            },
            target: target("top"),
        });
        air.add_label("data", Span::dummy()).unwrap();
        air.add_stmt(AirStmt::Word(7));
        air.add_stmt(AirStmt::WordOf(Target {
            name: "data".to_string(),
            span: Span::dummy(),
        }));

        // LD R0, #1 / BRnzp #-2 / 7 / x3002
        assert_eq!(air.emit().unwrap(), vec![0x2001, 0x0FFE, 0x0007, 0x3002]);
        assert_eq!(air.label_addr("data"), Some(0x3002));
    }

    #[test]
    fn respects_origin() {
        let mut air = Air::new();
        air.set_orig(0x4000, Span::dummy()).unwrap();
        assert!(air.set_orig(0x5000, Span::dummy()).is_err());
        air.add_label("here", Span::dummy()).unwrap();
        air.add_stmt(AirStmt::Instr {
            op: Op::Jsr(JsrTarget::Offset(0)),
            target: target("here"),
        });
        assert_eq!(air.orig(), 0x4000);
        // JSR #-1
        assert_eq!(air.emit().unwrap(), vec![0x4FFF]);
    }

    #[test]
    fn label_errors() {
        let mut air = Air::new();
        air.add_label("x", Span::dummy()).unwrap();
        assert!(air.add_label("x", Span::dummy()).is_err());

        air.add_stmt(AirStmt::WordOf(Target {
            name: "missing".to_string(),
            span: Span::dummy(),
        }));
        assert!(air.emit().is_err());
    }

    #[test]
    fn offset_out_of_range() {
        let mut air = Air::new();
        air.add_stmt(AirStmt::Instr {
            op: Op::Lea {
                dest: Register::R1,
                offset9: 0,
            },
            target: target("far"),
        });
        for _ in 0..256 {
            air.add_stmt(AirStmt::Word(0));
        }
        air.add_label("far", Span::dummy()).unwrap();
        air.add_stmt(AirStmt::Word(0));
        // Offset 256 does not fit in 9 signed bits
        assert!(air.emit().is_err());
    }
}
