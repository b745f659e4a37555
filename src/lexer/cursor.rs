// Modelled on `rustc_lexer`'s cursor.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

/// Returned by `first` once the input is exhausted.
pub const EOF_CHAR: char = '\0';

/// Peekable iterator over a char sequence.
pub struct Cursor<'a> {
    src: &'a str,
    /// Iterator over the chars which have not been consumed yet
    chars: Chars<'a>,
    /// Byte offset where the current token started
    token_start: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Cursor<'a> {
        Cursor {
            src,
            chars: src.chars(),
            token_start: 0,
        }
    }

    /// Whole input being lexed.
    pub fn src(&self) -> &'a str {
        self.src
    }

    /// Peek the next char without consuming it.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    /// File is finished parsing
    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Move to the next char.
    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Consume chars while `predicate` holds, stopping before the first that fails.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }

    /// Byte offset of the cursor in the source.
    pub fn pos(&self) -> usize {
        self.src.len() - self.chars.as_str().len()
    }

    /// Byte offset where the current token started.
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    /// Length in bytes of the token consumed since the last `reset_pos`.
    pub fn pos_in_token(&self) -> usize {
        self.pos() - self.token_start
    }

    /// Text of the current token.
    pub fn token_str(&self) -> &'a str {
        &self.src[self.token_start..self.pos()]
    }

    /// Start a new token at the current position.
    pub fn reset_pos(&mut self) {
        self.token_start = self.pos();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_while_stops_before_failure() {
        let mut cursor = Cursor::new("abc123 rest");
        cursor.take_while(|c| c.is_ascii_alphabetic());
        assert_eq!(cursor.token_str(), "abc");
        assert_eq!(cursor.first(), '1');
        cursor.take_while(|c| c != ' ');
        assert_eq!(cursor.pos_in_token(), 6);
        cursor.reset_pos();
        assert_eq!(cursor.bump(), Some(' '));
        assert_eq!(cursor.token_start(), 6);
    }

    #[test]
    fn eof() {
        let mut cursor = Cursor::new("é");
        assert!(!cursor.is_eof());
        assert_eq!(cursor.bump(), Some('é'));
        assert_eq!(cursor.pos(), 2);
        assert!(cursor.is_eof());
        assert_eq!(cursor.first(), EOF_CHAR);
        assert_eq!(cursor.bump(), None);
    }
}
