//! Console IO used by the trap routines.
//!
//! The interface is defined with the [`Console`] trait, with two implementations:
//! - [`StdConsole`]: standard streams, reading single keys unbuffered from an interactive terminal.
//! - [`BufferedConsole`]: in-memory input and output, for embedding and tests.

use std::collections::VecDeque;
use std::io::{self, IsTerminal, Read, Write};

use console::Term;

use crate::dprintln;
use crate::output::Output;

/// Blocking byte-oriented console.
pub trait Console {
    /// Read one byte, blocking until one is available.
    ///
    /// Returns `None` once input is exhausted.
    fn read_byte(&mut self) -> Option<u8>;

    /// Write one byte.
    fn write_byte(&mut self, byte: u8);

    /// Make all written bytes visible.
    fn flush(&mut self) {}

    /// Read one line of text, without the line terminator.
    ///
    /// Returns `None` if input is exhausted before any byte is read.
    fn read_line(&mut self) -> Option<String> {
        collect_line(self)
    }

    fn write_str(&mut self, string: &str) {
        for byte in string.bytes() {
            self.write_byte(byte);
        }
    }
}

/// Gather bytes up to a newline, dropping `\n` or `\r\n`.
fn collect_line<C: Console + ?Sized>(console: &mut C) -> Option<String> {
    let mut line = Vec::new();
    loop {
        match console.read_byte() {
            Some(b'\n') => break,
            Some(byte) => line.push(byte),
            None if line.is_empty() => return None,
            None => break,
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Stream that unbuffered key presses are read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeySource {
    /// Raw keys through the terminal attached to stdout
    Stdout,
    /// Raw keys through the terminal attached to stderr, when stdout is redirected
    Stderr,
    /// Plain bytes from stdin
    Stdin,
}

impl KeySource {
    /// Raw key reads need stdin on a terminal and a terminal handle to read through.
    fn select(stdin_is_term: bool, stdout_is_term: bool, stderr_is_term: bool) -> Self {
        match (stdin_is_term, stdout_is_term, stderr_is_term) {
            (true, true, _) => KeySource::Stdout,
            (true, false, true) => KeySource::Stderr,
            _ => KeySource::Stdin,
        }
    }

    fn detect() -> Self {
        Self::select(
            io::stdin().is_terminal(),
            io::stdout().is_terminal(),
            io::stderr().is_terminal(),
        )
    }

    fn term(self) -> Option<Term> {
        match self {
            KeySource::Stdout => Some(Term::stdout()),
            KeySource::Stderr => Some(Term::stderr()),
            KeySource::Stdin => None,
        }
    }
}

/// Standard input and output of the process.
#[derive(Debug, Default)]
pub struct StdConsole {
    /// Bytes of a multi-byte key press not yet handed out
    pending: VecDeque<u8>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One byte of stdin. `None` only at end of input.
fn read_stdin_byte() -> Option<u8> {
    let mut buf = [0; 1];
    match io::stdin().read_exact(&mut buf) {
        Ok(()) => Some(buf[0]),
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => None,
        Err(error) => {
            dprintln!(Always, "Failed to read input: {}", error);
            None
        }
    }
}

impl Console for StdConsole {
    fn read_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Some(byte);
        }
        let Some(term) = KeySource::detect().term() else {
            return read_stdin_byte();
        };
        let ch = match term.read_char() {
            Ok('\r') => '\n',
            Ok(ch) => ch,
            Err(error) => {
                dprintln!(Sometimes, "Cannot read keys from terminal ({}), reading stdin", error);
                return read_stdin_byte();
            }
        };
        // Multi-byte characters are handed out one byte per call
        let mut bytes = [0u8; 4];
        self.pending.extend(ch.encode_utf8(&mut bytes).bytes());
        self.pending.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        Output::Normal.print_byte(byte);
    }

    fn flush(&mut self) {
        // Best-effort
        let _ = io::stdout().flush();
    }

    fn read_line(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            if let Some(term) = KeySource::detect().term() {
                // Echoes while typing, unlike single key reads
                match term.read_line() {
                    Ok(line) => {
                        Output::set_line_start(true);
                        return Some(line);
                    }
                    Err(error) => {
                        dprintln!(Sometimes, "Cannot read lines from terminal ({}), reading stdin", error);
                    }
                }
            }
        }
        collect_line(self)
    }
}

/// Console reading from a fixed input buffer and collecting output.
#[derive(Debug, Default, Clone)]
pub struct BufferedConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferedConsole {
    pub fn new(input: impl AsRef<[u8]>) -> Self {
        BufferedConsole {
            input: input.as_ref().iter().copied().collect(),
            output: Vec::new(),
        }
    }

    /// Queue more input after whatever is still unread.
    pub fn push_input(&mut self, input: impl AsRef<[u8]>) {
        self.input.extend(input.as_ref());
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Output decoded as text, replacing invalid UTF-8.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for BufferedConsole {
    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_reads_in_order() {
        let mut console = BufferedConsole::new("ab");
        console.push_input("c");
        assert_eq!(console.read_byte(), Some(b'a'));
        assert_eq!(console.read_byte(), Some(b'b'));
        assert_eq!(console.read_byte(), Some(b'c'));
        assert_eq!(console.read_byte(), None);
    }

    #[test]
    fn read_line_strips_terminators() {
        let mut console = BufferedConsole::new("12\r\n34\n56");
        assert_eq!(console.read_line().as_deref(), Some("12"));
        assert_eq!(console.read_line().as_deref(), Some("34"));
        assert_eq!(console.read_line().as_deref(), Some("56"));
        assert_eq!(console.read_line(), None);
    }

    #[test]
    fn key_source_follows_terminals() {
        // Piped stdin is read byte by byte, whatever the outputs are
        assert_eq!(KeySource::select(false, true, true), KeySource::Stdin);
        assert_eq!(KeySource::select(false, false, false), KeySource::Stdin);
        assert_eq!(KeySource::select(true, true, true), KeySource::Stdout);
        // Redirected stdout must not stop keys being read from the terminal
        assert_eq!(KeySource::select(true, false, true), KeySource::Stderr);
        assert_eq!(KeySource::select(true, false, false), KeySource::Stdin);
        assert!(KeySource::Stdin.term().is_none());
    }

    #[test]
    fn write_str_collects_bytes() {
        let mut console = BufferedConsole::default();
        console.write_str("Hi");
        console.write_byte(b'!');
        assert_eq!(console.output(), b"Hi!");
        assert_eq!(console.output_string(), "Hi!");
    }
}
