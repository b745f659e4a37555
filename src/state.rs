use std::cmp::Ordering;

use crate::dprintln;
use crate::symbol::Register;

/// LC3 can address 128KB of memory.
pub const MEMORY_MAX: usize = 0x10000;

/// Default address where programs are loaded and execution starts.
pub const PC_START: u16 = 0x3000;

/// Keyboard status register.
pub const KBSR: u16 = 0xFE00;

/// Value read from [`KBSR`] while no key is available.
pub const KEY_NOT_READY: u16 = 0x0000;

/// How a read of [`KBSR`] is answered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DevicePoll {
    /// Always report that no key is pressed.
    #[default]
    NoKey,
    /// Return whatever word is stored at the address.
    Raw,
}

/// System memory, one word per address.
pub struct Memory {
    /// 128KB in size, indexed by any `u16`.
    cells: Box<[u16]>,
    poll: DevicePoll,
}

impl Memory {
    pub fn new(poll: DevicePoll) -> Self {
        Memory {
            cells: vec![0; MEMORY_MAX].into_boxed_slice(),
            poll,
        }
    }

    /// Read a word as the running program sees it.
    pub fn read(&self, addr: u16) -> u16 {
        if addr == KBSR {
            dprintln!(Sometimes, "Keyboard status polled at 0x{:04x}", KBSR);
            return match self.poll {
                DevicePoll::NoKey => KEY_NOT_READY,
                DevicePoll::Raw => self.peek(addr),
            };
        }
        self.peek(addr)
    }

    /// Read the stored word, bypassing memory-mapped devices.
    pub fn peek(&self, addr: u16) -> u16 {
        self.cells[addr as usize]
    }

    pub fn write(&mut self, addr: u16, val: u16) {
        self.cells[addr as usize] = val;
    }

    /// Copy `words` into memory starting at `base`. Addresses wrap past the end.
    pub fn load(&mut self, base: u16, words: &[u16]) {
        let mut addr = base;
        for word in words {
            self.write(addr, *word);
            addr = addr.wrapping_add(1);
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(DevicePoll::default())
    }
}

/// Condition code, set using result from previous register-defining instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunFlag {
    N = 0b100,
    Z = 0b010,
    P = 0b001,
}

impl RunFlag {
    /// Flag describing the sign of `val` read as two's complement.
    pub fn of(val: u16) -> Self {
        match (val as i16).cmp(&0) {
            Ordering::Less => RunFlag::N,
            Ordering::Equal => RunFlag::Z,
            Ordering::Greater => RunFlag::P,
        }
    }
}

/// General purpose registers, program counter and condition code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registers {
    /// 8x 16-bit registers
    reg: [u16; 8],
    /// Program counter
    pc: u16,
    /// Always holds exactly one flag
    cond: RunFlag,
}

impl Registers {
    pub fn new(pc: u16) -> Self {
        Registers {
            reg: [0; 8],
            pc,
            cond: RunFlag::Z,
        }
    }

    pub fn get(&self, reg: Register) -> u16 {
        self.reg[reg.index()]
    }

    pub fn set(&mut self, reg: Register, val: u16) {
        self.reg[reg.index()] = val;
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn cond(&self) -> RunFlag {
        self.cond
    }

    /// Recompute the condition code from the value held in `dest`.
    pub fn update_flags(&mut self, dest: Register) {
        self.cond = RunFlag::of(self.get(dest));
    }
}
