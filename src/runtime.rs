use crate::dprintln;
use crate::error::RunError;
use crate::features::Features;
use crate::io::Console;
use crate::loader::Image;
use crate::ops::{Choice, JsrTarget, Op};
use crate::state::{DevicePoll, Memory, Registers, MEMORY_MAX, PC_START};
use crate::symbol::{Flag, Register, TrapVect};

/// Widen the low `bits` bits of `val` as a two's complement number.
#[inline]
pub fn sign_extend(val: u16, bits: u32) -> u16 {
    debug_assert!(bits > 0 && bits < 16);
    // Sign bit
    let sign = val & (1u16 << (bits - 1));
    // Bits lower than sign bit
    let magnitude = val & ((1u16 << bits) - 1);
    // Positive input: all bits unset; 0x0000
    // Negative input: sign bit and above will be set, lower bits will be reset
    //      Eg. bits=14 -> 0xE000
    let sign_extension = (!sign).wrapping_add(1); // sign * -1
    magnitude | sign_extension
}

/// Whether the machine is still fetching instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    /// Only reached through the `HALT` trap.
    Halted,
}

/// Memory and registers of the machine, with one handler per instruction.
pub struct RunState {
    mem: Memory,
    reg: Registers,
}

impl RunState {
    pub fn new(pc: u16, poll: DevicePoll) -> Self {
        RunState {
            mem: Memory::new(poll),
            reg: Registers::new(pc),
        }
    }

    pub fn mem(&self) -> &Memory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn reg(&self) -> &Registers {
        &self.reg
    }

    pub fn reg_mut(&mut self) -> &mut Registers {
        &mut self.reg
    }

    /// PC plus a sign-extended offset. PC already points past the current instruction.
    fn pc_rel(&self, offset: i16) -> u16 {
        self.reg.pc().wrapping_add(offset as u16)
    }

    fn operand(&self, rhs: Choice) -> u16 {
        match rhs {
            Choice::Reg(reg) => self.reg.get(reg),
            Choice::Imm5(imm) => imm as u16,
        }
    }

    fn set_result(&mut self, dest: Register, val: u16) {
        self.reg.set(dest, val);
        self.reg.update_flags(dest);
    }

    fn add(&mut self, dest: Register, src: Register, rhs: Choice) {
        let res = self.reg.get(src).wrapping_add(self.operand(rhs));
        self.set_result(dest, res);
    }

    fn and(&mut self, dest: Register, src: Register, rhs: Choice) {
        let res = self.reg.get(src) & self.operand(rhs);
        self.set_result(dest, res);
    }

    fn not(&mut self, dest: Register, src: Register) {
        let res = !self.reg.get(src);
        self.set_result(dest, res);
    }

    fn br(&mut self, cc: Flag, offset9: i16) {
        if cc.bits() & self.reg.cond() as u16 != 0 {
            self.reg.set_pc(self.pc_rel(offset9));
        }
    }

    fn jmp(&mut self, base: Register) {
        self.reg.set_pc(self.reg.get(base));
    }

    fn jsr(&mut self, target: JsrTarget, jsrr_index: bool) {
        let ret = self.reg.pc();
        // Target is read before R7 is overwritten, so `JSRR R7` jumps to the old R7
        let dest = match target {
            JsrTarget::Offset(offset11) => self.pc_rel(offset11),
            JsrTarget::Reg(base) if jsrr_index => ret.wrapping_add(base.index() as u16),
            JsrTarget::Reg(base) => self.reg.get(base),
        };
        self.reg.set(Register::R7, ret);
        self.reg.set_pc(dest);
    }

    fn ld(&mut self, dest: Register, offset9: i16) {
        let val = self.mem.read(self.pc_rel(offset9));
        self.set_result(dest, val);
    }

    fn ldi(&mut self, dest: Register, offset9: i16) {
        let ptr = self.mem.read(self.pc_rel(offset9));
        let val = self.mem.read(ptr);
        self.set_result(dest, val);
    }

    fn ldr(&mut self, dest: Register, base: Register, offset6: i16) {
        let ptr = self.reg.get(base).wrapping_add(offset6 as u16);
        let val = self.mem.read(ptr);
        self.set_result(dest, val);
    }

    fn lea(&mut self, dest: Register, offset9: i16) {
        let val = self.pc_rel(offset9);
        self.set_result(dest, val);
    }

    fn st(&mut self, src: Register, offset9: i16) {
        self.mem.write(self.pc_rel(offset9), self.reg.get(src));
    }

    fn sti(&mut self, src: Register, offset9: i16) {
        let ptr = self.mem.read(self.pc_rel(offset9));
        self.mem.write(ptr, self.reg.get(src));
    }

    fn str(&mut self, src: Register, base: Register, offset6: i16) {
        let ptr = self.reg.get(base).wrapping_add(offset6 as u16);
        self.mem.write(ptr, self.reg.get(src));
    }
}

/// A machine wired to a console, which runs a loaded program until `HALT`.
pub struct RunEnvironment<C: Console> {
    state: RunState,
    console: C,
    features: Features,
    status: Status,
    /// Instructions executed so far
    steps: u64,
    /// Print each instruction before it is executed
    trace: bool,
}

impl<C: Console> RunEnvironment<C> {
    /// Empty machine with PC at [`PC_START`].
    pub fn new(console: C, features: Features) -> Self {
        let poll = if features.kbsr_raw() {
            DevicePoll::Raw
        } else {
            DevicePoll::NoKey
        };
        RunEnvironment {
            state: RunState::new(PC_START, poll),
            console,
            features,
            status: Status::Running,
            steps: 0,
            trace: false,
        }
    }

    /// Machine with `image` loaded and PC at its origin.
    pub fn from_image(image: &Image, console: C, features: Features) -> Self {
        let mut env = Self::new(console, features);
        env.load(image.origin(), image.words());
        env.state.reg.set_pc(image.origin());
        env
    }

    /// Write `words` into memory starting at `base`, without validating them.
    pub fn load(&mut self, base: u16, words: &[u16]) {
        self.state.mem.load(base, words);
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run until `HALT`.
    pub fn run(&mut self) -> Result<(), RunError> {
        while self.step()? == Status::Running {}
        Ok(())
    }

    /// Run at most `max_steps` instructions, stopping early at `HALT`.
    pub fn run_for(&mut self, max_steps: u64) -> Result<Status, RunError> {
        for _ in 0..max_steps {
            if self.step()? == Status::Halted {
                break;
            }
        }
        Ok(self.status)
    }

    /// Fetch, decode and execute one instruction.
    ///
    /// Does nothing once halted.
    pub fn step(&mut self) -> Result<Status, RunError> {
        if self.status == Status::Halted {
            return Ok(Status::Halted);
        }
        let addr = self.state.reg.pc();
        let instr = self.state.mem.read(addr);
        // PC incremented before instruction is performed
        self.state.reg.set_pc(addr.wrapping_add(1));
        let op = Op::decode(instr);
        if self.trace {
            dprintln!(Sometimes, "0x{:04x}  {:04x}  {}", addr, instr, op);
        }
        self.steps += 1;

        let state = &mut self.state;
        match op {
            Op::Br { cc, offset9 } => state.br(cc, offset9),
            Op::Add { dest, src, rhs } => state.add(dest, src, rhs),
            Op::Ld { dest, offset9 } => state.ld(dest, offset9),
            Op::St { src, offset9 } => state.st(src, offset9),
            Op::Jsr(target) => state.jsr(target, self.features.jsrr_index()),
            Op::And { dest, src, rhs } => state.and(dest, src, rhs),
            Op::Ldr {
                dest,
                base,
                offset6,
            } => state.ldr(dest, base, offset6),
            Op::Str { src, base, offset6 } => state.str(src, base, offset6),
            Op::Not { dest, src } => state.not(dest, src),
            Op::Ldi { dest, offset9 } => state.ldi(dest, offset9),
            Op::Sti { src, offset9 } => state.sti(src, offset9),
            Op::Jmp { base } => state.jmp(base),
            Op::Lea { dest, offset9 } => state.lea(dest, offset9),
            Op::Trap { vect } => self.trap(vect, addr, instr)?,
            Op::Rti | Op::Res => {
                return Err(RunError::Unimplemented {
                    opcode: op.opcode(),
                    addr,
                    instr,
                })
            }
        }
        Ok(self.status)
    }

    fn trap(&mut self, vect: u8, addr: u16, instr: u16) -> Result<(), RunError> {
        let Ok(trap) = TrapVect::try_from(vect) else {
            return Err(RunError::Dispatch { vect, addr, instr });
        };
        let r0 = self.state.reg.get(Register::R0);
        match trap {
            TrapVect::Getc => {
                let ch = self.console.read_byte().unwrap_or(0);
                self.state.reg.set(Register::R0, ch as u16);
            }
            TrapVect::Out => {
                self.console.write_byte((r0 & 0xFF) as u8);
            }
            TrapVect::Puts => {
                let mut addr = r0;
                // Bounded, in case memory holds no terminator at all
                for _ in 0..MEMORY_MAX {
                    let word = self.state.mem.read(addr);
                    if word == 0 {
                        break;
                    }
                    self.console.write_byte((word & 0xFF) as u8);
                    addr = addr.wrapping_add(1);
                }
            }
            TrapVect::In => {
                let ch = self.console.read_byte();
                self.state.set_result(Register::R0, ch.unwrap_or(0) as u16);
                if let Some(ch) = ch {
                    self.console.write_byte(ch);
                }
            }
            TrapVect::Putsp => {
                let mut addr = r0;
                for _ in 0..MEMORY_MAX {
                    let word = self.state.mem.read(addr);
                    if word == 0 {
                        break;
                    }
                    self.console.write_byte((word & 0xFF) as u8);
                    let high = (word >> 8) as u8;
                    if high != 0 {
                        self.console.write_byte(high);
                    }
                    addr = addr.wrapping_add(1);
                }
            }
            TrapVect::Halt => {
                self.status = Status::Halted;
            }
            TrapVect::InU16 => {
                let line = self.console.read_line().unwrap_or_default();
                let val = match line.trim().parse::<u16>() {
                    Ok(val) => val,
                    Err(_) => {
                        dprintln!(
                            Always,
                            "Expected an unsigned 16-bit integer, found {:?}. Using 0.",
                            line.trim()
                        );
                        0
                    }
                };
                self.state.reg.set(Register::R0, val);
            }
            TrapVect::OutU16 => {
                self.console.write_str(&r0.to_string());
            }
        }
        self.console.flush();
        Ok(())
    }
}
