use std::fmt;

use miette::Result;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::symbol::{DirKind, InstrKind, Register, Span, SrcOffset, TrapVect};

pub mod cursor;

/// Smallest value a literal may spell, as a negative decimal.
const LIT_MIN: i32 = i16::MIN as i32;
/// Largest value a literal may spell, as an unsigned bit pattern.
const LIT_MAX: i32 = u16::MAX as i32;

/// Lexed token along with its location in the source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Instr(InstrKind),
    /// Named trap routine, eg. `HALT` for `TRAP x25`
    Trap(TrapVect),
    Dir(DirKind),
    Reg(Register),
    Lit(i32),
    /// String literal with escapes already processed
    Str(String),
    Label,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Instr(_) => "instruction",
            TokenKind::Trap(_) => "trap routine",
            TokenKind::Dir(_) => "directive",
            TokenKind::Reg(_) => "register",
            TokenKind::Lit(_) => "literal",
            TokenKind::Str(_) => "string literal",
            TokenKind::Label => "label",
        };
        f.write_str(name)
    }
}

/// Lex a whole source file, skipping whitespace and comments.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut cursor = Cursor::new(src);
    let mut toks = Vec::new();
    while let Some(tok) = cursor.advance_token()? {
        toks.push(tok);
    }
    Ok(toks)
}

/// Test if a character is considered to be whitespace.
pub(crate) fn is_whitespace(c: char) -> bool {
    // Commas are essentially whitespace in LC3
    matches!(c, ' ' | '\n' | '\t' | '\r' | ',')
}

/// Test if a character is considered an LC3 identifier character.
pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

impl Cursor<'_> {
    /// Next meaningful token, or `None` at the end of input.
    pub fn advance_token(&mut self) -> Result<Option<Token>> {
        loop {
            self.reset_pos();
            let first_char = match self.bump() {
                Some(c) => c,
                None => return Ok(None),
            };
            let kind = match first_char {
                ';' => {
                    self.take_while(|c| c != '\n');
                    continue;
                }
                c if is_whitespace(c) => {
                    self.take_while(is_whitespace);
                    continue;
                }
                // Decimal literal
                '#' => {
                    if self.first() == '-' {
                        self.bump();
                    }
                    self.take_while(is_id);
                    let lit = self.parse_lit(&self.token_str()[1..], 10)?;
                    TokenKind::Lit(lit)
                }
                // Negative decimal without `#`
                '-' => {
                    self.take_while(is_id);
                    let lit = self.parse_lit(self.token_str(), 10)?;
                    TokenKind::Lit(lit)
                }
                // Directive
                '.' => {
                    self.take_while(is_id);
                    match self.token_str()[1..].parse() {
                        Ok(dir) => TokenKind::Dir(dir),
                        Err(()) => return Err(error::lex_invalid_dir(self.span(), self.src())),
                    }
                }
                '"' => TokenKind::Str(self.string_lit()?),
                // Identifiers should be checked after everything else that overlaps.
                c if is_id(c) => {
                    self.take_while(is_id);
                    self.classify_word()?
                }
                _ => return Err(error::lex_unknown(self.span(), self.src())),
            };
            return Ok(Some(Token {
                kind,
                span: self.span(),
            }));
        }
    }

    fn span(&self) -> Span {
        Span::new(SrcOffset(self.token_start()), self.pos_in_token())
    }

    /// Identifier-like words: registers, mnemonics, undecorated literals, then labels.
    fn classify_word(&self) -> Result<TokenKind> {
        let word = self.token_str();
        if let Ok(reg) = word.parse() {
            return Ok(TokenKind::Reg(reg));
        }
        if let Ok(instr) = word.parse() {
            return Ok(TokenKind::Instr(instr));
        }
        if let Ok(trap) = word.parse() {
            return Ok(TokenKind::Trap(trap));
        }
        let hex = word
            .strip_prefix("0x")
            .or_else(|| word.strip_prefix("0X"))
            .or_else(|| word.strip_prefix(['x', 'X']));
        match hex {
            Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(TokenKind::Lit(self.parse_lit(digits, 16)?))
            }
            // Hex-looking words with other characters in them are labels
            _ if word.starts_with(|c: char| c.is_ascii_digit()) => {
                Ok(TokenKind::Lit(self.parse_lit(word, 10)?))
            }
            _ => Ok(TokenKind::Label),
        }
    }

    fn parse_lit(&self, digits: &str, radix: u32) -> Result<i32> {
        match i32::from_str_radix(digits, radix) {
            Ok(val) if (LIT_MIN..=LIT_MAX).contains(&val) => Ok(val),
            _ => Err(error::lex_invalid_lit(self.span(), self.src())),
        }
    }

    /// Consume the rest of a string literal after its opening quote.
    fn string_lit(&mut self) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('e') => '\x1b',
                        Some(c @ ('\\' | '"')) => c,
                        Some(_) => return Err(error::lex_invalid_lit(self.span(), self.src())),
                        None => return Err(error::lex_unclosed_str(self.span(), self.src())),
                    };
                    value.push(escaped);
                }
                Some('\n') | None => return Err(error::lex_unclosed_str(self.span(), self.src())),
                Some(c) => value.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Flag;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|tok| tok.kind)
            .collect()
    }

    #[test]
    fn lex_instruction_line() {
        assert_eq!(
            kinds("loop ADD R2, R0, #-1 ; decrement"),
            vec![
                TokenKind::Label,
                TokenKind::Instr(InstrKind::Add),
                TokenKind::Reg(Register::R2),
                TokenKind::Reg(Register::R0),
                TokenKind::Lit(-1),
            ]
        );
    }

    #[test]
    fn lex_literals() {
        assert_eq!(
            kinds("x3000 0xFFFF #15 -3 42 X1f"),
            vec![
                TokenKind::Lit(0x3000),
                TokenKind::Lit(0xFFFF),
                TokenKind::Lit(15),
                TokenKind::Lit(-3),
                TokenKind::Lit(42),
                TokenKind::Lit(0x1F),
            ]
        );
    }

    #[test]
    fn lex_words() {
        assert_eq!(
            kinds(".ORIG BRz HALT in_u16 xyz r7"),
            vec![
                TokenKind::Dir(DirKind::Orig),
                TokenKind::Instr(InstrKind::Br(Flag::Z)),
                TokenKind::Trap(TrapVect::Halt),
                TokenKind::Trap(TrapVect::InU16),
                TokenKind::Label,
                TokenKind::Reg(Register::R7),
            ]
        );
    }

    #[test]
    fn lex_string_escapes() {
        assert_eq!(
            kinds(r#".STRINGZ "a\"b\n""#),
            vec![
                TokenKind::Dir(DirKind::Stringz),
                TokenKind::Str("a\"b\n".to_string()),
            ]
        );
    }

    #[test]
    fn spans_cover_tokens() {
        let toks = tokenize("  ADD  R1").unwrap();
        assert_eq!(toks[0].span, Span::new(SrcOffset(2), 3));
        assert_eq!(toks[1].span, Span::new(SrcOffset(7), 2));
    }

    #[test]
    fn lex_errors() {
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("\"line\nbreak\"").is_err());
        assert!(tokenize("#70000").is_err());
        assert!(tokenize("#12ab").is_err());
        assert!(tokenize(".include").is_err());
        assert!(tokenize("ADD @").is_err());
    }
}
