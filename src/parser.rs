use std::fmt;
use std::iter::Peekable;
use std::vec::IntoIter;

use miette::{bail, IntoDiagnostic, LabeledSpan, Result, Severity};

use crate::air::{Air, AirStmt, Target};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::loader::Image;
use crate::ops::{Choice, JsrTarget, Op};
use crate::runtime::sign_extend;
use crate::state::MEMORY_MAX;
use crate::symbol::{DirKind, InstrKind, Register, Span};

/// Assemble source text into a loadable image.
pub fn assemble(src: &str) -> Result<Image> {
    let air = AsmParser::new(src)?.parse()?;
    let words = air
        .emit()
        .map_err(|report| report.with_source_code(src.to_string()))?;
    Image::new(air.orig(), words).into_diagnostic()
}

/// Width of an instruction field, and how literals are allowed to fill it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Bits {
    /// Two's complement field. Hex literals spell the raw bit pattern instead.
    Signed(u32),
    Unsigned(u32),
    /// Whole memory word, either signed or unsigned
    Word,
}

impl Bits {
    /// Range of literal values accepted for the field.
    fn range(self, hex: bool) -> (i32, i32) {
        match self {
            Bits::Signed(n) if !hex => (-(1 << (n - 1)), (1 << (n - 1)) - 1),
            Bits::Signed(n) | Bits::Unsigned(n) => (0, (1 << n) - 1),
            Bits::Word => (i16::MIN as i32, u16::MAX as i32),
        }
    }

    fn width(self) -> u32 {
        match self {
            Bits::Signed(n) | Bits::Unsigned(n) => n,
            Bits::Word => 16,
        }
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bits::Signed(n) => write!(f, "{} bit signed", n),
            Bits::Unsigned(n) => write!(f, "{} bit unsigned", n),
            Bits::Word => write!(f, "16 bit"),
        }
    }
}

/// Builds an [`Air`] from a token stream, one statement per line.
pub struct AsmParser<'a> {
    src: &'a str,
    toks: Peekable<IntoIter<Token>>,
    air: Air,
    /// Span of the last token taken, for errors at the end of input
    last_span: Span,
}

impl<'a> AsmParser<'a> {
    /// Lex the source. Lexing errors are reported here.
    pub fn new(src: &'a str) -> Result<Self> {
        let toks = tokenize(src)?;
        Ok(AsmParser {
            src,
            toks: toks.into_iter().peekable(),
            air: Air::new(),
            last_span: Span::dummy(),
        })
    }

    pub fn parse(mut self) -> Result<Air> {
        let src = self.src;
        self.parse_stmts()
            .map_err(|report| report.with_source_code(src.to_string()))?;
        Ok(self.air)
    }

    fn parse_stmts(&mut self) -> Result<()> {
        while let Some(tok) = self.next() {
            match tok.kind {
                TokenKind::Label => {
                    let name = self.text(tok.span);
                    self.air.add_label(name, tok.span)?;
                }
                TokenKind::Instr(kind) => {
                    let stmt = self.parse_instr(kind)?;
                    self.air.add_stmt(stmt);
                }
                TokenKind::Trap(vect) => self.air.add_stmt(AirStmt::Instr {
                    op: Op::Trap { vect: vect as u8 },
                    target: None,
                }),
                TokenKind::Dir(DirKind::End) => break,
                TokenKind::Dir(kind) => self.parse_dir(kind, tok.span)?,
                _ => bail!(
                    severity = Severity::Error,
                    code = "parse::unexpected_token",
                    help = "lines start with a label, instruction, trap routine or directive",
                    labels = vec![LabeledSpan::at(tok.span, "unexpected token")],
                    "Found {} where a statement was expected.",
                    tok.kind
                ),
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.toks.next()?;
        self.last_span = tok.span;
        Some(tok)
    }

    fn parse_instr(&mut self, kind: InstrKind) -> Result<AirStmt> {
        let mut target = None;
        let op = match kind {
            InstrKind::Add | InstrKind::And => {
                let dest = self.expect_reg()?;
                let src = self.expect_reg()?;
                let rhs = if self.peek_is(|kind| matches!(kind, TokenKind::Reg(_))) {
                    Choice::Reg(self.expect_reg()?)
                } else {
                    Choice::Imm5(self.expect_signed(5)?)
                };
                if kind == InstrKind::Add {
                    Op::Add { dest, src, rhs }
                } else {
                    Op::And { dest, src, rhs }
                }
            }
            InstrKind::Not => Op::Not {
                dest: self.expect_reg()?,
                src: self.expect_reg()?,
            },
            InstrKind::Br(cc) => {
                let offset9 = self.pc_operand(9, &mut target)?;
                Op::Br { cc, offset9 }
            }
            InstrKind::Jmp => Op::Jmp {
                base: self.expect_reg()?,
            },
            InstrKind::Ret => Op::Jmp { base: Register::R7 },
            InstrKind::Jsr => Op::Jsr(JsrTarget::Offset(self.pc_operand(11, &mut target)?)),
            InstrKind::Jsrr => Op::Jsr(JsrTarget::Reg(self.expect_reg()?)),
            InstrKind::Ld | InstrKind::Ldi | InstrKind::Lea => {
                let dest = self.expect_reg()?;
                let offset9 = self.pc_operand(9, &mut target)?;
                match kind {
                    InstrKind::Ld => Op::Ld { dest, offset9 },
                    InstrKind::Ldi => Op::Ldi { dest, offset9 },
                    _ => Op::Lea { dest, offset9 },
                }
            }
            InstrKind::St | InstrKind::Sti => {
                let src = self.expect_reg()?;
                let offset9 = self.pc_operand(9, &mut target)?;
                if kind == InstrKind::St {
                    Op::St { src, offset9 }
                } else {
                    Op::Sti { src, offset9 }
                }
            }
            InstrKind::Ldr => Op::Ldr {
                dest: self.expect_reg()?,
                base: self.expect_reg()?,
                offset6: self.expect_signed(6)?,
            },
            InstrKind::Str => Op::Str {
                src: self.expect_reg()?,
                base: self.expect_reg()?,
                offset6: self.expect_signed(6)?,
            },
            InstrKind::Rti => Op::Rti,
            InstrKind::Trap => Op::Trap {
                vect: self.expect_lit(Bits::Unsigned(8))? as u8,
            },
        };
        Ok(AirStmt::Instr { op, target })
    }

    fn parse_dir(&mut self, kind: DirKind, span: Span) -> Result<()> {
        match kind {
            DirKind::Orig => {
                if !self.air.is_empty() {
                    bail!(
                        severity = Severity::Error,
                        code = "parse::orig",
                        help = "move .orig to the top of the file",
                        labels = vec![LabeledSpan::at(span, "late origin")],
                        "Origin must be set before any statement."
                    )
                }
                let orig = self.expect_lit(Bits::Unsigned(16))?;
                self.air.set_orig(orig, span)?;
            }
            DirKind::Fill => {
                let stmt = if self.peek_is(|kind| *kind == TokenKind::Label) {
                    AirStmt::WordOf(self.expect_label()?)
                } else {
                    AirStmt::Word(self.expect_lit(Bits::Word)?)
                };
                self.air.add_stmt(stmt);
            }
            DirKind::Blkw => {
                let count = self.expect_lit(Bits::Unsigned(16))?;
                self.check_room(count as usize, span)?;
                for _ in 0..count {
                    self.air.add_stmt(AirStmt::Word(0));
                }
            }
            DirKind::Stringz => {
                let (value, str_span) = self.expect("string literal", |kind| match kind {
                    TokenKind::Str(value) => Some(value.clone()),
                    _ => None,
                })?;
                self.check_room(value.chars().count() + 1, str_span)?;
                for ch in value.chars() {
                    let Ok(word) = u16::try_from(ch as u32) else {
                        bail!(
                            severity = Severity::Error,
                            code = "parse::stringz",
                            help = "each character is stored in one word, up to U+FFFF",
                            labels = vec![LabeledSpan::at(str_span, "unencodable character")],
                            "Character {:?} does not fit in a 16-bit word.",
                            ch
                        )
                    };
                    self.air.add_stmt(AirStmt::Word(word));
                }
                self.air.add_stmt(AirStmt::Word(0));
            }
            DirKind::End => {}
        }
        Ok(())
    }

    /// Fail if `words` more statements would run past the end of memory.
    fn check_room(&self, words: usize, span: Span) -> Result<()> {
        let end = self.air.orig() as usize + self.air.len() + words;
        if end > MEMORY_MAX {
            bail!(
                severity = Severity::Error,
                code = "parse::too_large",
                help = format!(
                    "a program starting at x{:04X} holds at most {} words",
                    self.air.orig(),
                    MEMORY_MAX - self.air.orig() as usize
                ),
                labels = vec![LabeledSpan::at(span, "block runs past xFFFF")],
                "Program does not fit in memory."
            )
        }
        Ok(())
    }

    /// Either a label, filled in later, or a literal offset.
    fn pc_operand(&mut self, bits: u32, target: &mut Option<Target>) -> Result<i16> {
        if self.peek_is(|kind| *kind == TokenKind::Label) {
            *target = Some(self.expect_label()?);
            return Ok(0);
        }
        self.expect_signed(bits)
    }

    fn peek_is(&mut self, accept: impl Fn(&TokenKind) -> bool) -> bool {
        self.toks.peek().is_some_and(|tok| accept(&tok.kind))
    }

    /// Take the next token, extracting `T` from it if it is the kind wanted.
    fn expect<T>(&mut self, what: &str, accept: impl Fn(&TokenKind) -> Option<T>) -> Result<(T, Span)> {
        let Some(tok) = self.next() else {
            bail!(
                severity = Severity::Error,
                code = "parse::eof",
                help = "the last statement is missing an operand",
                labels = vec![LabeledSpan::at(self.last_span, "incomplete statement")],
                "Expected {}, found end of file.",
                what
            )
        };
        match accept(&tok.kind) {
            Some(value) => Ok((value, tok.span)),
            None => bail!(
                severity = Severity::Error,
                code = "parse::expected",
                help = format!("this operand must be a {}", what),
                labels = vec![LabeledSpan::at(tok.span, format!("expected {}", what))],
                "Expected {}, found {}.",
                what,
                tok.kind
            ),
        }
    }

    fn expect_reg(&mut self) -> Result<Register> {
        let (reg, _) = self.expect("register", |kind| match kind {
            TokenKind::Reg(reg) => Some(*reg),
            _ => None,
        })?;
        Ok(reg)
    }

    fn expect_label(&mut self) -> Result<Target> {
        let ((), span) = self.expect("label", |kind| (*kind == TokenKind::Label).then_some(()))?;
        Ok(Target {
            name: self.text(span).to_string(),
            span,
        })
    }

    /// Literal which fits in `bits`, returned as the raw field bits.
    fn expect_lit(&mut self, bits: Bits) -> Result<u16> {
        let (val, span) = self.expect("literal", |kind| match kind {
            TokenKind::Lit(val) => Some(*val),
            _ => None,
        })?;
        let text = self.text(span);
        let hex = text.starts_with(['x', 'X']) || text.starts_with("0x") || text.starts_with("0X");
        let (min, max) = bits.range(hex);
        if val < min || val > max {
            bail!(
                severity = Severity::Error,
                code = "parse::lit_range",
                help = format!("accepted values range from {} to {}", min, max),
                labels = vec![LabeledSpan::at(span, format!("not {}", bits))],
                "Literal {} does not fit in a {} field.",
                val,
                bits
            )
        }
        let mask = ((1u32 << bits.width()) - 1) as u16;
        Ok(val as u16 & mask)
    }

    fn text(&self, span: Span) -> &'a str {
        &self.src[span.offs()..span.end()]
    }

    /// Signed field value, sign extended back from its raw bits.
    fn expect_signed(&mut self, bits: u32) -> Result<i16> {
        let raw = self.expect_lit(Bits::Signed(bits))?;
        Ok(sign_extend(raw, bits) as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Flag;

    fn parse(src: &str) -> Air {
        AsmParser::new(src).unwrap().parse().unwrap()
    }

    fn op(air: &Air, idx: usize) -> Op {
        match air.get(idx) {
            AirStmt::Instr { op, .. } => *op,
            stmt => panic!("expected instruction, found {:?}", stmt),
        }
    }

    #[test]
    fn parse_add_reg() {
        let air = parse("ADD R0, R1, R0");
        assert_eq!(
            op(&air, 0),
            Op::Add {
                dest: Register::R0,
                src: Register::R1,
                rhs: Choice::Reg(Register::R0),
            }
        );
    }

    #[test]
    fn parse_and_imm() {
        let air = parse("and r2 r2 #-16\nAND R1, R1, x1F");
        assert_eq!(
            op(&air, 0),
            Op::And {
                dest: Register::R2,
                src: Register::R2,
                rhs: Choice::Imm5(-16),
            }
        );
        // Hex spells the raw bits
        assert_eq!(
            op(&air, 1),
            Op::And {
                dest: Register::R1,
                src: Register::R1,
                rhs: Choice::Imm5(-1),
            }
        );
    }

    #[test]
    fn parse_memory_ops() {
        let air = parse("LDR R4, R6, #-32\nSTR R4, R6, #31\nLEA R0, #-256\nJSRR R3\nRET\nNOT R1 R2");
        assert_eq!(
            op(&air, 0),
            Op::Ldr {
                dest: Register::R4,
                base: Register::R6,
                offset6: -32,
            }
        );
        assert_eq!(
            op(&air, 1),
            Op::Str {
                src: Register::R4,
                base: Register::R6,
                offset6: 31,
            }
        );
        assert_eq!(
            op(&air, 2),
            Op::Lea {
                dest: Register::R0,
                offset9: -256,
            }
        );
        assert_eq!(op(&air, 3), Op::Jsr(JsrTarget::Reg(Register::R3)));
        assert_eq!(op(&air, 4), Op::Jmp { base: Register::R7 });
        assert_eq!(
            op(&air, 5),
            Op::Not {
                dest: Register::R1,
                src: Register::R2,
            }
        );
    }

    #[test]
    fn parse_traps() {
        let air = parse("TRAP x25\nGETC\nOUT_U16\ninu16");
        assert_eq!(op(&air, 0), Op::Trap { vect: 0x25 });
        assert_eq!(op(&air, 1), Op::Trap { vect: 0x20 });
        assert_eq!(op(&air, 2), Op::Trap { vect: 0x27 });
        assert_eq!(op(&air, 3), Op::Trap { vect: 0x26 });
    }

    #[test]
    fn parse_branch_label() {
        let air = parse("loop BRnp loop");
        assert_eq!(
            air.get(0),
            &AirStmt::Instr {
                op: Op::Br {
                    cc: Flag::Np,
                    offset9: 0,
                },
                target: Some(Target {
                    name: "loop".to_string(),
                    span: Span::new(crate::symbol::SrcOffset(10), 4),
                }),
            }
        );
        assert_eq!(air.emit().unwrap(), vec![0x0BFF]);
    }

    #[test]
    fn parse_directives() {
        let air = parse(
            ".ORIG x4000\nmsg .STRINGZ \"Hi\"\nbuf .BLKW 2\nptr .FILL msg\nval .FILL #-1\n.END\nADD R0 R0 R0",
        );
        assert_eq!(air.orig(), 0x4000);
        assert_eq!(
            air.emit().unwrap(),
            vec![0x48, 0x69, 0x00, 0x00, 0x00, 0x4000, 0xFFFF]
        );
        assert_eq!(air.label_addr("ptr"), Some(0x4005));
    }

    #[test]
    fn assemble_image() {
        let image = assemble(".orig x3000\nLEA R0, msg\nPUTS\nHALT\nmsg .stringz \"ok\"").unwrap();
        assert_eq!(image.origin(), 0x3000);
        assert_eq!(image.words(), &[0xE002, 0xF022, 0xF025, 0x6F, 0x6B, 0x00]);
    }

    #[test]
    fn reject_out_of_range() {
        assert!(assemble("ADD R0, R0, #16").is_err());
        assert!(assemble("ADD R0, R0, #-17").is_err());
        assert!(assemble("LDR R0, R0, #32").is_err());
        assert!(assemble("TRAP x100").is_err());
        assert!(assemble(".BLKW #-1").is_err());
    }

    #[test]
    fn blkw_stops_at_end_of_memory() {
        let air = parse(".ORIG xF000\n.BLKW x1000");
        assert_eq!(air.len(), 0x1000);

        let err = AsmParser::new(".ORIG xF000\n.BLKW x1000\n.BLKW #1")
            .unwrap()
            .parse()
            .unwrap_err();
        assert!(err.to_string().contains("does not fit in memory"));
        // Rejected on the first block, before the rest are read
        let src = ".BLKW xFFFF\n".repeat(64);
        assert!(AsmParser::new(&src).unwrap().parse().is_err());
    }

    #[test]
    fn stringz_encodes_one_word_per_char() {
        let air = parse(".STRINGZ \"\u{e9}\"");
        assert_eq!(air.emit().unwrap(), vec![0xE9, 0x00]);
        let err = assemble(".STRINGZ \"\u{1F600}\"").unwrap_err();
        assert!(err.to_string().contains("does not fit in a 16-bit word"));
    }

    #[test]
    fn reject_malformed() {
        assert!(assemble("ADD R0, R0").is_err());
        assert!(assemble("R1 ADD").is_err());
        assert!(assemble("LD R0, missing").is_err());
        assert!(assemble("HALT\n.ORIG x3000").is_err());
        assert!(assemble(".ORIG x3000\n.ORIG x4000").is_err());
        assert!(assemble(".STRINGZ #5").is_err());
        assert!(assemble("dup HALT\ndup HALT").is_err());
    }
}
