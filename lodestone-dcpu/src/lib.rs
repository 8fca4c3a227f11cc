//! Cycle-accurate interpreter for the DCPU-16, a 16-bit virtual CPU with
//! eight general-purpose registers, a flat 65536-word memory, and a
//! word-granular instruction stream.
//!
//! Instruction words pack a 4-bit primary opcode and two 6-bit operand
//! fields, with operand B in the most significant bits:
//!
//! ```text
//! | BBBBBB | AAAAAA | OOOO |
//! 15       10       4      0
//! ```
//!
//! A primary opcode of zero reinterprets operand A's field as an extended
//! opcode and operand B's field as its sole operand. Operand codes select
//! one of 14 addressing forms; resolving an operand may consume a trailing
//! program word, move the stack pointer, and charge cycles, so each
//! operand is resolved exactly once per instruction and the resolved
//! target is kept for the result store.
//!
//! Conditional instructions skip by *decoding* the following instruction
//! without letting it commit: operands resolve (advancing PC past trailing
//! words, charging their costs) while register, memory, and control-flow
//! writes are suppressed. The suppression chains through consecutive
//! false conditionals and through skipped subroutine calls.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

extern crate alloc;

mod memory;
mod register;
mod state;

pub use memory::{LoadError, Memory};
pub use register::Register;
pub use state::RunState;

use core::fmt;
use log::warn;

/// Extracts the 4-bit primary opcode field
const fn op_code(word: u16) -> u16 {
    word & 0xF
}

/// Extracts operand A's 6-bit field
const fn operand_a(word: u16) -> u8 {
    ((word >> 4) & 0x3F) as u8
}

/// Extracts operand B's 6-bit field
const fn operand_b(word: u16) -> u8 {
    ((word >> 10) & 0x3F) as u8
}

/// The only recognized extended opcode: jump to subroutine
const JSR: u8 = 0x01;

/// Names of the eight general-purpose registers
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reg {
    A,
    B,
    C,
    X,
    Y,
    Z,
    I,
    J,
}

/// Storage slot selected by operand resolution
///
/// Resolution is the single point where addressing side effects happen;
/// the tag is retained by the instruction body so the result store never
/// resolves a second time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Target {
    /// General-purpose register slot
    Reg(u8),
    /// Program counter
    Pc,
    /// Stack pointer
    Sp,
    /// Overflow register
    O,
    /// Memory word
    Mem(u16),
    /// Read-only operand; stores are dropped
    None,
}

/// A fully-resolved operand: the value read plus where a result may land
#[derive(Copy, Clone, Debug)]
struct Operand {
    value: u16,
    target: Target,
}

/// The CPU itself
///
/// Owns its registers, memory, lifecycle state, and cycle counter
/// exclusively; cloning deep-copies everything and equality compares the
/// whole structure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dcpu {
    reg: [Register; 8],
    pc: Register,
    sp: Register,
    o: Register,
    mem: Memory,
    state: RunState,
    cycle: u64,
}

impl Default for Dcpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Dcpu {
    /// Builds a CPU in the `Init` state with zeroed registers and memory
    pub fn new() -> Self {
        Self::with_memory(Memory::new())
    }

    /// Builds a CPU around an existing memory image
    pub fn with_memory(mem: Memory) -> Self {
        Self {
            reg: [Register::default(); 8],
            pc: Register::default(),
            sp: Register::default(),
            o: Register::default(),
            mem,
            state: RunState::Init,
            cycle: 0,
        }
    }

    /// Attempts the `Init` → `Running` transition
    ///
    /// Returns `false` from any other state; `Halted` machines must be
    /// `reset()` before they can start again.
    pub fn start(&mut self) -> bool {
        if self.state != RunState::Init {
            return false;
        }
        self.state = RunState::Running;
        true
    }

    /// Attempts the `Running` → `Halted` transition
    pub fn halt(&mut self) -> bool {
        if self.state != RunState::Running {
            return false;
        }
        self.state = RunState::Halted;
        true
    }

    /// Clears registers, memory, and cycles, forcing `Init`
    ///
    /// Clearing happens unconditionally; the return value reports whether
    /// the state actually changed (`false` when already in `Init`).
    pub fn reset(&mut self) -> bool {
        for r in &mut self.reg {
            r.clear();
        }
        self.pc.clear();
        self.sp.clear();
        self.o.clear();
        self.mem.clear();
        self.cycle = 0;
        let changed = self.state != RunState::Init;
        self.state = RunState::Init;
        changed
    }

    /// Decodes and executes a single instruction word in commit mode
    ///
    /// PC advances by one before dispatch, as if `word` had just been
    /// fetched. Returns `false` without side effects when the engine is
    /// not running, and `false` after the PC advance when the opcode is
    /// not recognized — the defined end-of-program signal, not an error.
    pub fn exec(&mut self, word: u16) -> bool {
        if self.state != RunState::Running {
            return false;
        }
        self.dispatch(word, true)
    }

    /// Feeds a slice of instruction words through [`Dcpu::exec`]
    ///
    /// Stops at the first failure. Trailing operand words are still
    /// fetched from memory at PC, not from the slice.
    pub fn exec_all(&mut self, words: &[u16]) -> bool {
        words.iter().all(|&word| self.exec(word))
    }

    /// Fetches the word at PC and executes it
    pub fn step(&mut self) -> bool {
        let word = self.mem.read(self.pc.get());
        self.exec(word)
    }

    /// Runs from the current PC until an unrecognized opcode halts the
    /// machine
    ///
    /// Returns `false` if the `Init` → `Running` transition is refused
    /// (already ran without an intervening [`Dcpu::reset`]).
    pub fn run(&mut self) -> bool {
        if !self.start() {
            return false;
        }
        while self.step() {}
        self.halt();
        true
    }

    /// Current value of a general-purpose register
    #[inline]
    pub fn reg(&self, r: Reg) -> u16 {
        self.reg[r as usize].get()
    }

    /// Writes a general-purpose register
    #[inline]
    pub fn set_reg(&mut self, r: Reg, value: u16) {
        self.reg[r as usize].set(value);
    }

    /// Program counter
    #[inline]
    pub fn pc(&self) -> u16 {
        self.pc.get()
    }

    /// Moves the program counter (host/loader control)
    #[inline]
    pub fn set_pc(&mut self, value: u16) {
        self.pc.set(value);
    }

    /// Stack pointer
    #[inline]
    pub fn sp(&self) -> u16 {
        self.sp.get()
    }

    /// Moves the stack pointer (host/loader control)
    #[inline]
    pub fn set_sp(&mut self, value: u16) {
        self.sp.set(value);
    }

    /// Overflow register
    #[inline]
    pub fn o(&self) -> u16 {
        self.o.get()
    }

    /// Simulated cycles elapsed since construction or reset
    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Shared borrow of memory
    #[inline]
    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// Mutable borrow of memory, used by loaders
    #[inline]
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Reads the word at PC and advances PC
    #[inline]
    fn next_word(&mut self) -> u16 {
        let out = self.mem.read(self.pc.get());
        self.pc.increment();
        out
    }

    /// Advances PC past `word`, decodes it, and runs the instruction body
    ///
    /// With `commit` false the instruction is decoded for layout only:
    /// operands resolve (consuming trailing words and charging cycles)
    /// but no register, memory, or control-flow write takes effect.
    fn dispatch(&mut self, word: u16, commit: bool) -> bool {
        self.pc.increment();
        let a = operand_a(word);
        let b = operand_b(word);
        match op_code(word) {
            0x0 => match a {
                JSR => op::jsr(self, b, commit),
                ext => {
                    if commit {
                        warn!("unrecognized extended opcode {ext:#04x}");
                    }
                    return false;
                }
            },
            0x1 => op::set(self, a, b, commit),
            0x2 => op::add(self, a, b, commit),
            0x3 => op::sub(self, a, b, commit),
            0x4 => op::mul(self, a, b, commit),
            0x5 => op::div(self, a, b, commit),
            0x6 => op::modulo(self, a, b, commit),
            0x7 => op::shl(self, a, b, commit),
            0x8 => op::shr(self, a, b, commit),
            0x9 => op::and(self, a, b, commit),
            0xA => op::bor(self, a, b, commit),
            0xB => op::xor(self, a, b, commit),
            0xC => op::ife(self, a, b, commit),
            0xD => op::ifn(self, a, b, commit),
            0xE => op::ifg(self, a, b, commit),
            0xF => op::ifb(self, a, b, commit),
            _ => return false,
        }
        true
    }

    /// Resolves a 6-bit operand code into a value and a store target
    ///
    /// This is the single point where addressing side effects occur:
    /// trailing program words are consumed (PC advances, in commit and
    /// non-commit mode alike, so instruction layout stays exact), the
    /// stack pointer moves for pop/push (commit mode only), and the
    /// mode's cycle cost is charged. Callers must resolve each operand
    /// exactly once and reuse the returned target for the result store.
    fn resolve(&mut self, code: u8, commit: bool) -> Operand {
        match code {
            // register
            0x00..=0x07 => {
                self.cycle += 1;
                let i = code & 0x7;
                Operand {
                    value: self.reg[usize::from(i)].get(),
                    target: Target::Reg(i),
                }
            }
            // [register]
            0x08..=0x0F => {
                self.cycle += 1;
                let addr = self.reg[usize::from(code & 0x7)].get();
                Operand {
                    value: self.mem.read(addr),
                    target: Target::Mem(addr),
                }
            }
            // [next word + register]
            0x10..=0x17 => {
                self.cycle += 2;
                let offset = self.next_word();
                let addr =
                    offset.wrapping_add(self.reg[usize::from(code & 0x7)].get());
                Operand {
                    value: self.mem.read(addr),
                    target: Target::Mem(addr),
                }
            }
            // pop: [SP], then SP += 1
            0x18 => {
                self.cycle += 1;
                let addr = self.sp.get();
                if commit {
                    self.sp.increment();
                }
                Operand {
                    value: self.mem.read(addr),
                    target: Target::Mem(addr),
                }
            }
            // peek: [SP]
            0x19 => {
                self.cycle += 1;
                let addr = self.sp.get();
                Operand {
                    value: self.mem.read(addr),
                    target: Target::Mem(addr),
                }
            }
            // push: SP -= 1, then [SP]
            0x1A => {
                self.cycle += 1;
                let addr = if commit {
                    self.sp.decrement()
                } else {
                    self.sp.get().wrapping_sub(1)
                };
                Operand {
                    value: self.mem.read(addr),
                    target: Target::Mem(addr),
                }
            }
            0x1B => Operand {
                value: self.sp.get(),
                target: Target::Sp,
            },
            0x1C => Operand {
                value: self.pc.get(),
                target: Target::Pc,
            },
            0x1D => Operand {
                value: self.o.get(),
                target: Target::O,
            },
            // [next word]
            0x1E => {
                self.cycle += 2;
                let addr = self.next_word();
                Operand {
                    value: self.mem.read(addr),
                    target: Target::Mem(addr),
                }
            }
            // next word as literal
            0x1F => {
                self.cycle += 1;
                Operand {
                    value: self.next_word(),
                    target: Target::None,
                }
            }
            // embedded literal 0..=31
            _ => Operand {
                value: u16::from(code & 0x1F),
                target: Target::None,
            },
        }
    }

    /// Writes `value` through a resolved target
    ///
    /// Nothing is stored in non-commit mode, and writes to read-only
    /// targets are silently discarded.
    fn store(&mut self, target: Target, value: u16, commit: bool) {
        if !commit {
            return;
        }
        match target {
            Target::Reg(i) => self.reg[usize::from(i)].set(value),
            Target::Pc => self.pc.set(value),
            Target::Sp => self.sp.set(value),
            Target::O => self.o.set(value),
            Target::Mem(addr) => self.mem.write(addr, value),
            Target::None => (),
        }
    }

    /// Consumes and suppresses the next instruction in the stream
    ///
    /// A malformed word still advances PC; only words the engine actually
    /// executes can end the run.
    fn skip_next(&mut self) {
        let word = self.mem.read(self.pc.get());
        let _ = self.dispatch(word, false);
    }
}

impl fmt::Display for Dcpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "STATE: {}, CYCLE: {}", self.state, self.cycle)?;
        writeln!(f, "PC: {}  SP: {}  O: {}", self.pc, self.sp, self.o)?;
        writeln!(
            f,
            "A: {}  B: {}  C: {}  X: {}",
            self.reg[0], self.reg[1], self.reg[2], self.reg[3]
        )?;
        write!(
            f,
            "Y: {}  Z: {}  I: {}  J: {}",
            self.reg[4], self.reg[5], self.reg[6], self.reg[7]
        )
    }
}

mod op {
    use super::*;

    /// Set
    ///
    /// ```text
    /// SET a, b
    /// ```
    ///
    /// Stores `b` in `a`. 1 cycle plus operand costs; overflow untouched.
    pub fn set(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 1;
        vm.store(dst.target, src.value, commit);
    }

    /// Add
    ///
    /// ```text
    /// ADD a, b
    /// ```
    ///
    /// `a = a + b`, wrapping. O becomes 1 when the 17-bit sum overflows
    /// 16 bits, else 0. 2 cycles plus operand costs.
    pub fn add(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        let sum = u32::from(dst.value) + u32::from(src.value);
        vm.cycle += 2;
        if commit {
            vm.o.set(u16::from(sum > 0xFFFF));
        }
        vm.store(dst.target, sum as u16, commit);
    }

    /// Subtract
    ///
    /// ```text
    /// SUB a, b
    /// ```
    ///
    /// `a = a - b`, wrapping. O becomes 0xFFFF on borrow (`b > a`), else
    /// 0. 2 cycles plus operand costs.
    pub fn sub(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 2;
        if commit {
            vm.o.set(if src.value > dst.value { 0xFFFF } else { 0 });
        }
        vm.store(dst.target, dst.value.wrapping_sub(src.value), commit);
    }

    /// Multiply
    ///
    /// ```text
    /// MUL a, b
    /// ```
    ///
    /// `a = a * b`, keeping the low 16 bits; O captures the high 16 bits
    /// of the 32-bit product. 2 cycles plus operand costs.
    pub fn mul(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        let product = u32::from(dst.value) * u32::from(src.value);
        vm.cycle += 2;
        if commit {
            vm.o.set((product >> 16) as u16);
        }
        vm.store(dst.target, product as u16, commit);
    }

    /// Divide
    ///
    /// ```text
    /// DIV a, b
    /// ```
    ///
    /// `a = a / b`; O captures `((a << 16) / b) & 0xFFFF`, the fractional
    /// bits of the quotient. Division by zero forces result and O to zero
    /// without faulting. 3 cycles plus operand costs.
    pub fn div(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 3;
        let (quotient, overflow) = if src.value == 0 {
            (0, 0)
        } else {
            (
                dst.value / src.value,
                ((u32::from(dst.value) << 16) / u32::from(src.value)) as u16,
            )
        };
        if commit {
            vm.o.set(overflow);
        }
        vm.store(dst.target, quotient, commit);
    }

    /// Modulo
    ///
    /// ```text
    /// MOD a, b
    /// ```
    ///
    /// `a = a % b`; a zero divisor forces a zero result. Overflow is left
    /// as previously set. 3 cycles plus operand costs.
    pub fn modulo(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 3;
        let rem = if src.value == 0 {
            0
        } else {
            dst.value % src.value
        };
        vm.store(dst.target, rem, commit);
    }

    /// Shift left
    ///
    /// ```text
    /// SHL a, b
    /// ```
    ///
    /// `a = a << b` through a 32-bit intermediate; O captures the high 16
    /// bits of the widened result. Shift amounts of 32 or more produce
    /// zero. 2 cycles plus operand costs.
    pub fn shl(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 2;
        let wide = u32::from(dst.value)
            .checked_shl(u32::from(src.value))
            .unwrap_or(0);
        if commit {
            vm.o.set((wide >> 16) as u16);
        }
        vm.store(dst.target, wide as u16, commit);
    }

    /// Shift right
    ///
    /// ```text
    /// SHR a, b
    /// ```
    ///
    /// `a = a >> b`; O captures the bits shifted out, taken from
    /// `((a << 16) >> b) & 0xFFFF` the way hardware latches shift-out.
    /// 2 cycles plus operand costs.
    pub fn shr(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 2;
        let wide = (u32::from(dst.value) << 16)
            .checked_shr(u32::from(src.value))
            .unwrap_or(0);
        if commit {
            vm.o.set(wide as u16);
        }
        vm.store(dst.target, (wide >> 16) as u16, commit);
    }

    /// Bitwise and
    ///
    /// ```text
    /// AND a, b
    /// ```
    pub fn and(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 1;
        vm.store(dst.target, dst.value & src.value, commit);
    }

    /// Bitwise or
    ///
    /// ```text
    /// BOR a, b
    /// ```
    pub fn bor(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 1;
        vm.store(dst.target, dst.value | src.value, commit);
    }

    /// Bitwise exclusive or
    ///
    /// ```text
    /// XOR a, b
    /// ```
    pub fn xor(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let dst = vm.resolve(a, commit);
        let src = vm.resolve(b, commit);
        vm.cycle += 1;
        vm.store(dst.target, dst.value ^ src.value, commit);
    }

    /// If equal
    ///
    /// ```text
    /// IFE a, b
    /// ```
    ///
    /// Performs the next instruction only when `a == b`; otherwise the
    /// next instruction is consumed without committing. 2 cycles plus
    /// operand costs, 1 more when the test fails. The skip decision is
    /// evaluated in non-commit mode too, so suppression chains through
    /// consecutive failing conditionals.
    pub fn ife(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let a = vm.resolve(a, commit);
        let b = vm.resolve(b, commit);
        vm.cycle += 2;
        if a.value != b.value {
            vm.cycle += 1;
            vm.skip_next();
        }
    }

    /// If not equal
    ///
    /// ```text
    /// IFN a, b
    /// ```
    ///
    /// Performs the next instruction only when `a != b`.
    pub fn ifn(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let a = vm.resolve(a, commit);
        let b = vm.resolve(b, commit);
        vm.cycle += 2;
        if a.value == b.value {
            vm.cycle += 1;
            vm.skip_next();
        }
    }

    /// If greater than
    ///
    /// ```text
    /// IFG a, b
    /// ```
    ///
    /// Performs the next instruction only when `a > b` (unsigned).
    pub fn ifg(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let a = vm.resolve(a, commit);
        let b = vm.resolve(b, commit);
        vm.cycle += 2;
        if a.value <= b.value {
            vm.cycle += 1;
            vm.skip_next();
        }
    }

    /// If bits set
    ///
    /// ```text
    /// IFB a, b
    /// ```
    ///
    /// Performs the next instruction only when `(a & b) != 0`.
    pub fn ifb(vm: &mut Dcpu, a: u8, b: u8, commit: bool) {
        let a = vm.resolve(a, commit);
        let b = vm.resolve(b, commit);
        vm.cycle += 2;
        if a.value & b.value == 0 {
            vm.cycle += 1;
            vm.skip_next();
        }
    }

    /// Jump to subroutine (extended opcode)
    ///
    /// ```text
    /// JSR a
    /// ```
    ///
    /// Resolves the operand, then decrements SP, stores PC at the new SP,
    /// and jumps to the resolved value. PC is pushed after resolution, so
    /// returning lands past any trailing operand word. 2 cycles plus the
    /// operand cost; in non-commit mode the operand still resolves but
    /// nothing moves.
    pub fn jsr(vm: &mut Dcpu, a: u8, commit: bool) {
        let target = vm.resolve(a, commit);
        vm.cycle += 2;
        if commit {
            let sp = vm.sp.decrement();
            vm.mem.write(sp, vm.pc.get());
            vm.pc.set(target.value);
        }
    }
}
