// Parsing
mod lexer;
mod parser;
pub use parser::{assemble, AsmParser};
mod air;
pub use air::{Air, AirStmt};

// Running
mod runtime;
pub use runtime::{sign_extend, RunEnvironment, RunState, Status};
mod state;
pub use state::{DevicePoll, Memory, Registers, RunFlag, KBSR, MEMORY_MAX, PC_START};
mod ops;
pub use ops::{Op, Opcode};
mod io;
pub use io::{BufferedConsole, Console, StdConsole};
mod loader;
pub use loader::{Endian, Image};
#[macro_use]
pub mod output;

mod symbol;
pub use symbol::{Flag, Register, TrapVect};

mod error;
pub use error::{LoadError, RunError};

mod features;
pub use features::Features;

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
