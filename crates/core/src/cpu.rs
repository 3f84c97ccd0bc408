//! HD6301 CPU core.
//!
//! Holds the programmer-visible register file and implements every
//! documented HD6301 instruction: the full 6801 set plus the HD6301
//! additions (AIM, OIM, EIM, TIM, XGDX, SLP). The execute routine runs on
//! [`Ikbd`] so that loads and stores reach the on-chip register window
//! through [`read8`](Ikbd::read8) and [`write8`](Ikbd::write8).
//!
//! Flag computation follows the HD6301 programming manual. 16-bit values
//! are big-endian in memory, and the stack grows downward with a
//! post-decrement push: the byte is stored at SP, then SP moves down.

use crate::config::EngineMode;
use crate::opcodes::{Acc, Alu, Cond, Mode, Op, Opcode, Target, Unary};
use crate::peripherals::VEC_SWI;
use crate::Ikbd;
use crate::{CC_C, CC_FIXED, CC_H, CC_I, CC_N, CC_V, CC_Z};

/// What the CPU does on the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Fetching and executing instructions
    Running,
    /// After WAI: registers already stacked, waiting for an unmasked interrupt
    Waiting,
    /// After SLP: waiting for any interrupt source, masked or not
    Sleeping,
    /// Strict mode found an invalid PC or opcode; steps consume nothing
    Crashed { pc: u16 },
}

/// HD6301 register file.
pub struct Cpu {
    /// Accumulator A (high half of D)
    pub a: u8,
    /// Accumulator B (low half of D)
    pub b: u8,
    /// Index register
    pub x: u16,
    /// Stack pointer (points at the next free byte)
    pub sp: u16,
    /// Program counter
    pub pc: u16,
    /// Condition codes: 1 1 H I N Z V C (bits 7..0)
    pub cc: u8,
    /// Monotonic cycle counter (incremented by each step's cycle cost)
    pub tick: u64,
    pub state: RunState,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            a: 0,
            b: 0,
            x: 0,
            sp: 0,
            pc: 0,
            cc: CC_FIXED | (1 << CC_I),
            tick: 0,
            state: RunState::Running,
        }
    }

    #[inline(always)]
    pub fn d(&self) -> u16 {
        ((self.a as u16) << 8) | self.b as u16
    }

    #[inline(always)]
    pub fn set_d(&mut self, v: u16) {
        self.a = (v >> 8) as u8;
        self.b = v as u8;
    }

    #[inline(always)]
    pub fn flag(&self, bit: u8) -> bool {
        self.cc & (1 << bit) != 0
    }

    #[inline(always)]
    pub fn set_flag(&mut self, bit: u8, v: bool) {
        if v { self.cc |= 1 << bit; } else { self.cc &= !(1 << bit); }
    }

    /// Load CC from a byte; bits 7 and 6 always read as 1.
    #[inline(always)]
    pub fn set_cc(&mut self, v: u8) {
        self.cc = v | CC_FIXED;
    }

    #[inline(always)]
    fn acc(&self, acc: Acc) -> u8 {
        match acc {
            Acc::A => self.a,
            Acc::B => self.b,
        }
    }

    #[inline(always)]
    fn set_acc(&mut self, acc: Acc, v: u8) {
        match acc {
            Acc::A => self.a = v,
            Acc::B => self.b = v,
        }
    }

    /// Evaluate a branch condition against the current flags.
    pub fn condition(&self, cond: Cond) -> bool {
        let c = self.flag(CC_C);
        let z = self.flag(CC_Z);
        let n = self.flag(CC_N);
        let v = self.flag(CC_V);
        match cond {
            Cond::Always => true,
            Cond::Never => false,
            Cond::Hi => !(c || z),
            Cond::Ls => c || z,
            Cond::Cc => !c,
            Cond::Cs => c,
            Cond::Ne => !z,
            Cond::Eq => z,
            Cond::Vc => !v,
            Cond::Vs => v,
            Cond::Pl => !n,
            Cond::Mi => n,
            Cond::Ge => n == v,
            Cond::Lt => n != v,
            Cond::Gt => !z && n == v,
            Cond::Le => z || n != v,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// --- Flag helpers ---

/// Set N and Z from an 8-bit result and clear V.
#[inline(always)]
pub fn flags_nz(cpu: &mut Cpu, r: u8) {
    cpu.set_flag(CC_N, r & 0x80 != 0);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_V, false);
}

/// Set N and Z from a 16-bit result and clear V.
#[inline(always)]
pub fn flags_nz16(cpu: &mut Cpu, r: u16) {
    cpu.set_flag(CC_N, r & 0x8000 != 0);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_V, false);
}

/// 8-bit add with carry-in. Sets H N Z V C and returns the sum.
pub fn flags_add(cpu: &mut Cpu, a: u8, m: u8, carry: u8) -> u8 {
    let sum = a as u16 + m as u16 + carry as u16;
    let r = sum as u8;
    cpu.set_flag(CC_H, (a & 0x0F) + (m & 0x0F) + carry > 0x0F);
    cpu.set_flag(CC_N, r & 0x80 != 0);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_V, !(a ^ m) & (a ^ r) & 0x80 != 0);
    cpu.set_flag(CC_C, sum > 0xFF);
    r
}

/// 8-bit subtract with borrow-in. Sets N Z V C (H is unaffected) and returns the difference.
pub fn flags_sub(cpu: &mut Cpu, a: u8, m: u8, borrow: u8) -> u8 {
    let r = a.wrapping_sub(m).wrapping_sub(borrow);
    cpu.set_flag(CC_N, r & 0x80 != 0);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_V, (a ^ m) & (a ^ r) & 0x80 != 0);
    cpu.set_flag(CC_C, (m as u16 + borrow as u16) > a as u16);
    r
}

pub fn flags_add16(cpu: &mut Cpu, a: u16, m: u16) -> u16 {
    let sum = a as u32 + m as u32;
    let r = sum as u16;
    cpu.set_flag(CC_N, r & 0x8000 != 0);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_V, !(a ^ m) & (a ^ r) & 0x8000 != 0);
    cpu.set_flag(CC_C, sum > 0xFFFF);
    r
}

pub fn flags_sub16(cpu: &mut Cpu, a: u16, m: u16) -> u16 {
    let r = a.wrapping_sub(m);
    cpu.set_flag(CC_N, r & 0x8000 != 0);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_V, (a ^ m) & (a ^ r) & 0x8000 != 0);
    cpu.set_flag(CC_C, m > a);
    r
}

/// Shift/rotate flags: N Z from the result, C from the bit shifted out, V = N xor C.
#[inline(always)]
fn flags_shift(cpu: &mut Cpu, r: u8, carry: bool) {
    let n = r & 0x80 != 0;
    cpu.set_flag(CC_N, n);
    cpu.set_flag(CC_Z, r == 0);
    cpu.set_flag(CC_C, carry);
    cpu.set_flag(CC_V, n ^ carry);
}

/// Apply a single-operand operation. Returns None when the operand is
/// only tested (TST), so memory operands are not written back.
pub fn unary(cpu: &mut Cpu, kind: Unary, m: u8) -> Option<u8> {
    let c = cpu.flag(CC_C);
    let r = match kind {
        Unary::Neg => {
            let r = 0u8.wrapping_sub(m);
            cpu.set_flag(CC_N, r & 0x80 != 0);
            cpu.set_flag(CC_Z, r == 0);
            cpu.set_flag(CC_V, r == 0x80);
            cpu.set_flag(CC_C, r != 0);
            r
        }
        Unary::Com => {
            let r = !m;
            flags_nz(cpu, r);
            cpu.set_flag(CC_C, true);
            r
        }
        Unary::Lsr => {
            let r = m >> 1;
            flags_shift(cpu, r, m & 0x01 != 0);
            r
        }
        Unary::Ror => {
            let r = (m >> 1) | if c { 0x80 } else { 0 };
            flags_shift(cpu, r, m & 0x01 != 0);
            r
        }
        Unary::Asr => {
            let r = (m >> 1) | (m & 0x80);
            flags_shift(cpu, r, m & 0x01 != 0);
            r
        }
        Unary::Asl => {
            let r = m << 1;
            flags_shift(cpu, r, m & 0x80 != 0);
            r
        }
        Unary::Rol => {
            let r = (m << 1) | c as u8;
            flags_shift(cpu, r, m & 0x80 != 0);
            r
        }
        Unary::Dec => {
            let r = m.wrapping_sub(1);
            cpu.set_flag(CC_N, r & 0x80 != 0);
            cpu.set_flag(CC_Z, r == 0);
            cpu.set_flag(CC_V, m == 0x80);
            r
        }
        Unary::Inc => {
            let r = m.wrapping_add(1);
            cpu.set_flag(CC_N, r & 0x80 != 0);
            cpu.set_flag(CC_Z, r == 0);
            cpu.set_flag(CC_V, m == 0x7F);
            r
        }
        Unary::Tst => {
            flags_nz(cpu, m);
            cpu.set_flag(CC_C, false);
            return None;
        }
        Unary::Clr => {
            flags_nz(cpu, 0);
            cpu.set_flag(CC_C, false);
            0
        }
    };
    Some(r)
}

/// Decimal-adjust A after a BCD addition.
pub fn daa(cpu: &mut Cpu) {
    let a = cpu.a;
    let lsn = a & 0x0F;
    let msn = a >> 4;
    let mut correction = 0u8;
    let mut carry = cpu.flag(CC_C);
    if cpu.flag(CC_H) || lsn > 9 {
        correction |= 0x06;
    }
    if carry || msn > 9 || (msn > 8 && lsn > 9) {
        correction |= 0x60;
        carry = true;
    }
    let r = a.wrapping_add(correction);
    cpu.a = r;
    flags_nz(cpu, r);
    cpu.set_flag(CC_C, carry);
}

// ---- Instruction execution on Ikbd ----

impl Ikbd {
    #[inline(always)]
    pub(crate) fn fetch8(&mut self) -> u8 {
        let pc = self.cpu.pc;
        self.cpu.pc = pc.wrapping_add(1);
        self.read8(pc)
    }

    #[inline(always)]
    pub(crate) fn fetch16(&mut self) -> u16 {
        let hi = self.fetch8() as u16;
        let lo = self.fetch8() as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    pub(crate) fn push8(&mut self, v: u8) {
        let sp = self.cpu.sp;
        self.write8(sp, v);
        self.cpu.sp = sp.wrapping_sub(1);
    }

    #[inline(always)]
    pub(crate) fn pull8(&mut self) -> u8 {
        self.cpu.sp = self.cpu.sp.wrapping_add(1);
        self.read8(self.cpu.sp)
    }

    /// Push low byte first so the value sits big-endian in memory.
    pub(crate) fn push16(&mut self, v: u16) {
        self.push8(v as u8);
        self.push8((v >> 8) as u8);
    }

    pub(crate) fn pull16(&mut self) -> u16 {
        let hi = self.pull8() as u16;
        let lo = self.pull8() as u16;
        (hi << 8) | lo
    }

    /// Stack the full register file: PCL, PCH, XL, XH, A, B, CC.
    pub(crate) fn push_registers(&mut self) {
        self.push16(self.cpu.pc);
        self.push16(self.cpu.x);
        self.push8(self.cpu.a);
        self.push8(self.cpu.b);
        self.push8(self.cpu.cc);
    }

    fn pull_registers(&mut self) {
        let cc = self.pull8();
        self.cpu.set_cc(cc);
        self.cpu.b = self.pull8();
        self.cpu.a = self.pull8();
        self.cpu.x = self.pull16();
        self.cpu.pc = self.pull16();
    }

    /// Consume the operand bytes of `mode` and return the address the
    /// instruction operates on. Immediate operands resolve to their own
    /// location in the instruction stream.
    fn operand_address(&mut self, mode: Mode) -> u16 {
        match mode {
            Mode::Direct | Mode::BitDirect => self.fetch8() as u16,
            Mode::Indexed | Mode::BitIndexed => {
                let offset = self.fetch8() as u16;
                self.cpu.x.wrapping_add(offset)
            }
            Mode::Extended => self.fetch16(),
            Mode::Imm8 | Mode::Relative => {
                let addr = self.cpu.pc;
                self.cpu.pc = addr.wrapping_add(1);
                addr
            }
            Mode::Imm16 => {
                let addr = self.cpu.pc;
                self.cpu.pc = addr.wrapping_add(2);
                addr
            }
            Mode::Inherent => self.cpu.pc,
        }
    }

    fn relative_target(&mut self) -> u16 {
        let offset = self.fetch8() as i8;
        self.cpu.pc.wrapping_add(offset as i16 as u16)
    }

    /// Execute one decoded instruction and return its cycle cost.
    ///
    /// `pc` is the address of the opcode byte; the program counter has
    /// already moved past it. All documented instructions cost exactly the
    /// table's base cycles on the HD6301.
    pub fn execute_op(&mut self, pc: u16, entry: &Opcode) -> u32 {
        let mode = entry.mode;
        match entry.op {
            Op::Illegal => {
                if self.mode == EngineMode::Strict {
                    self.crash(pc, "undefined opcode");
                    return 0;
                }
                tracing::trace!(pc = format_args!("{:04X}", pc), "undefined opcode executed as NOP");
            }
            Op::Nop => {}

            // --- Inherent register operations ---
            Op::Lsrd => {
                let d = self.cpu.d();
                let r = d >> 1;
                self.cpu.set_d(r);
                let c = d & 1 != 0;
                self.cpu.set_flag(CC_N, false);
                self.cpu.set_flag(CC_Z, r == 0);
                self.cpu.set_flag(CC_C, c);
                self.cpu.set_flag(CC_V, c);
            }
            Op::Asld => {
                let d = self.cpu.d();
                let r = d << 1;
                self.cpu.set_d(r);
                let c = d & 0x8000 != 0;
                let n = r & 0x8000 != 0;
                self.cpu.set_flag(CC_N, n);
                self.cpu.set_flag(CC_Z, r == 0);
                self.cpu.set_flag(CC_C, c);
                self.cpu.set_flag(CC_V, n ^ c);
            }
            Op::Tap => self.cpu.set_cc(self.cpu.a),
            Op::Tpa => self.cpu.a = self.cpu.cc,
            Op::Inx => {
                self.cpu.x = self.cpu.x.wrapping_add(1);
                self.cpu.set_flag(CC_Z, self.cpu.x == 0);
            }
            Op::Dex => {
                self.cpu.x = self.cpu.x.wrapping_sub(1);
                self.cpu.set_flag(CC_Z, self.cpu.x == 0);
            }
            Op::Clv => self.cpu.set_flag(CC_V, false),
            Op::Sev => self.cpu.set_flag(CC_V, true),
            Op::Clc => self.cpu.set_flag(CC_C, false),
            Op::Sec => self.cpu.set_flag(CC_C, true),
            Op::Cli => self.cpu.set_flag(CC_I, false),
            Op::Sei => self.cpu.set_flag(CC_I, true),
            Op::Sba => {
                let (a, b) = (self.cpu.a, self.cpu.b);
                self.cpu.a = flags_sub(&mut self.cpu, a, b, 0);
            }
            Op::Cba => {
                let (a, b) = (self.cpu.a, self.cpu.b);
                flags_sub(&mut self.cpu, a, b, 0);
            }
            Op::Aba => {
                let (a, b) = (self.cpu.a, self.cpu.b);
                self.cpu.a = flags_add(&mut self.cpu, a, b, 0);
            }
            Op::Tab => {
                let a = self.cpu.a;
                self.cpu.b = a;
                flags_nz(&mut self.cpu, a);
            }
            Op::Tba => {
                let b = self.cpu.b;
                self.cpu.a = b;
                flags_nz(&mut self.cpu, b);
            }
            Op::Xgdx => {
                let d = self.cpu.d();
                self.cpu.set_d(self.cpu.x);
                self.cpu.x = d;
            }
            Op::Daa => daa(&mut self.cpu),
            Op::Mul => {
                let r = self.cpu.a as u16 * self.cpu.b as u16;
                self.cpu.set_d(r);
                self.cpu.set_flag(CC_C, r & 0x80 != 0);
            }
            Op::Abx => self.cpu.x = self.cpu.x.wrapping_add(self.cpu.b as u16),

            // --- Stack ---
            Op::Tsx => self.cpu.x = self.cpu.sp.wrapping_add(1),
            Op::Txs => self.cpu.sp = self.cpu.x.wrapping_sub(1),
            Op::Ins => self.cpu.sp = self.cpu.sp.wrapping_add(1),
            Op::Des => self.cpu.sp = self.cpu.sp.wrapping_sub(1),
            Op::Psha => self.push8(self.cpu.a),
            Op::Pshb => self.push8(self.cpu.b),
            Op::Pshx => self.push16(self.cpu.x),
            Op::Pula => self.cpu.a = self.pull8(),
            Op::Pulb => self.cpu.b = self.pull8(),
            Op::Pulx => self.cpu.x = self.pull16(),
            Op::Rts => self.cpu.pc = self.pull16(),
            Op::Rti => self.pull_registers(),
            Op::Swi => {
                self.push_registers();
                self.cpu.set_flag(CC_I, true);
                self.cpu.pc = self.mem.read_word_raw(VEC_SWI);
            }
            Op::Wai => {
                self.push_registers();
                self.cpu.state = RunState::Waiting;
            }
            Op::Slp => self.cpu.state = RunState::Sleeping,

            // --- Control flow ---
            Op::Branch(cond) => {
                let target = self.relative_target();
                if self.cpu.condition(cond) {
                    self.cpu.pc = target;
                }
            }
            Op::Bsr => {
                let target = self.relative_target();
                self.push16(self.cpu.pc);
                self.cpu.pc = target;
            }
            Op::Jsr => {
                let target = self.operand_address(mode);
                self.push16(self.cpu.pc);
                self.cpu.pc = target;
            }
            Op::Jmp => self.cpu.pc = self.operand_address(mode),

            // --- Single operand ---
            Op::Unary(kind, target) => match target {
                Target::A => {
                    let a = self.cpu.a;
                    if let Some(r) = unary(&mut self.cpu, kind, a) {
                        self.cpu.a = r;
                    }
                }
                Target::B => {
                    let b = self.cpu.b;
                    if let Some(r) = unary(&mut self.cpu, kind, b) {
                        self.cpu.b = r;
                    }
                }
                Target::Mem => {
                    let addr = self.operand_address(mode);
                    let m = self.read8(addr);
                    if let Some(r) = unary(&mut self.cpu, kind, m) {
                        self.write8(addr, r);
                    }
                }
            },

            // --- Immediate-to-memory bit operations: mask byte, then address ---
            Op::Aim | Op::Oim | Op::Eim | Op::Tim => {
                let mask = self.fetch8();
                let addr = self.operand_address(mode);
                let m = self.read8(addr);
                let r = match entry.op {
                    Op::Aim | Op::Tim => m & mask,
                    Op::Oim => m | mask,
                    _ => m ^ mask,
                };
                flags_nz(&mut self.cpu, r);
                if entry.op != Op::Tim {
                    self.write8(addr, r);
                }
            }

            // --- Accumulator ---
            Op::Alu(kind, acc) => {
                let addr = self.operand_address(mode);
                let m = self.read8(addr);
                let a = self.cpu.acc(acc);
                let c = self.cpu.flag(CC_C) as u8;
                let cpu = &mut self.cpu;
                let result = match kind {
                    Alu::Sub => Some(flags_sub(cpu, a, m, 0)),
                    Alu::Sbc => Some(flags_sub(cpu, a, m, c)),
                    Alu::Cmp => {
                        flags_sub(cpu, a, m, 0);
                        None
                    }
                    Alu::Add => Some(flags_add(cpu, a, m, 0)),
                    Alu::Adc => Some(flags_add(cpu, a, m, c)),
                    Alu::And => {
                        flags_nz(cpu, a & m);
                        Some(a & m)
                    }
                    Alu::Bit => {
                        flags_nz(cpu, a & m);
                        None
                    }
                    Alu::Ora => {
                        flags_nz(cpu, a | m);
                        Some(a | m)
                    }
                    Alu::Eor => {
                        flags_nz(cpu, a ^ m);
                        Some(a ^ m)
                    }
                    Alu::Lda => {
                        flags_nz(cpu, m);
                        Some(m)
                    }
                };
                if let Some(r) = result {
                    self.cpu.set_acc(acc, r);
                }
            }
            Op::Sta(acc) => {
                let addr = self.operand_address(mode);
                let v = self.cpu.acc(acc);
                flags_nz(&mut self.cpu, v);
                self.write8(addr, v);
            }

            // --- 16-bit ---
            Op::Addd | Op::Subd | Op::Cpx | Op::Ldd | Op::Ldx | Op::Lds => {
                let addr = self.operand_address(mode);
                let m = self.read16(addr);
                let (d, x) = (self.cpu.d(), self.cpu.x);
                let cpu = &mut self.cpu;
                match entry.op {
                    Op::Addd => {
                        let r = flags_add16(cpu, d, m);
                        cpu.set_d(r);
                    }
                    Op::Subd => {
                        let r = flags_sub16(cpu, d, m);
                        cpu.set_d(r);
                    }
                    Op::Cpx => {
                        flags_sub16(cpu, x, m);
                    }
                    Op::Ldd => {
                        cpu.set_d(m);
                        flags_nz16(cpu, m);
                    }
                    Op::Ldx => {
                        cpu.x = m;
                        flags_nz16(cpu, m);
                    }
                    _ => {
                        cpu.sp = m;
                        flags_nz16(cpu, m);
                    }
                }
            }
            Op::Std | Op::Stx | Op::Sts => {
                let addr = self.operand_address(mode);
                let v = match entry.op {
                    Op::Std => self.cpu.d(),
                    Op::Stx => self.cpu.x,
                    _ => self.cpu.sp,
                };
                flags_nz16(&mut self.cpu, v);
                self.write16(addr, v);
            }
        }
        entry.cycles as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ROM_START;

    /// Build an engine with `code` at 0xF000 and the reset vector pointing there.
    fn run(code: &[u8], steps: usize) -> Ikbd {
        let mut ikbd = Ikbd::new(EngineMode::Strict);
        let mut rom = vec![0x01u8; 0x1000];
        rom[..code.len()].copy_from_slice(code);
        rom[0xFFE] = 0xF0;
        rom[0xFFF] = 0x00;
        ikbd.load_rom(&rom).unwrap();
        ikbd.cpu.sp = 0x00FF;
        for _ in 0..steps {
            ikbd.step();
        }
        ikbd
    }

    #[test]
    fn test_cpu_reset_state() {
        let cpu = Cpu::new();
        assert!(cpu.flag(CC_I));
        assert_eq!(cpu.cc & CC_FIXED, CC_FIXED);
        assert_eq!(cpu.state, RunState::Running);
    }

    #[test]
    fn test_add_flags() {
        let mut cpu = Cpu::new();
        let r = flags_add(&mut cpu, 0x7F, 0x01, 0);
        assert_eq!(r, 0x80);
        assert!(cpu.flag(CC_V));
        assert!(cpu.flag(CC_N));
        assert!(cpu.flag(CC_H));
        assert!(!cpu.flag(CC_C));

        let r = flags_add(&mut cpu, 0xFF, 0x01, 0);
        assert_eq!(r, 0);
        assert!(cpu.flag(CC_Z));
        assert!(cpu.flag(CC_C));
        assert!(!cpu.flag(CC_V));
    }

    #[test]
    fn test_sub_flags() {
        let mut cpu = Cpu::new();
        let r = flags_sub(&mut cpu, 0x10, 0x20, 0);
        assert_eq!(r, 0xF0);
        assert!(cpu.flag(CC_C));
        assert!(cpu.flag(CC_N));
        assert!(!cpu.flag(CC_V));

        let r = flags_sub(&mut cpu, 0x80, 0x01, 0);
        assert_eq!(r, 0x7F);
        assert!(cpu.flag(CC_V));
        assert!(!cpu.flag(CC_C));

        // Borrow-in counts toward carry
        flags_sub(&mut cpu, 0x00, 0xFF, 1);
        assert!(cpu.flag(CC_C));
    }

    #[test]
    fn test_unary_ops() {
        let mut cpu = Cpu::new();
        assert_eq!(unary(&mut cpu, Unary::Neg, 0x80), Some(0x80));
        assert!(cpu.flag(CC_V));
        assert!(cpu.flag(CC_C));

        assert_eq!(unary(&mut cpu, Unary::Asr, 0x81), Some(0xC0));
        assert!(cpu.flag(CC_C));
        assert!(cpu.flag(CC_N));
        assert!(!cpu.flag(CC_V));

        cpu.set_flag(CC_C, true);
        assert_eq!(unary(&mut cpu, Unary::Rol, 0x40), Some(0x81));
        assert!(!cpu.flag(CC_C));
        assert!(cpu.flag(CC_V));

        assert_eq!(unary(&mut cpu, Unary::Tst, 0x00), None);
        assert!(cpu.flag(CC_Z));
        assert!(!cpu.flag(CC_C));

        assert_eq!(unary(&mut cpu, Unary::Inc, 0x7F), Some(0x80));
        assert!(cpu.flag(CC_V));
    }

    #[test]
    fn test_daa() {
        let mut cpu = Cpu::new();
        // 0x19 + 0x28 = 0x41, BCD result 47
        cpu.a = flags_add(&mut cpu, 0x19, 0x28, 0);
        daa(&mut cpu);
        assert_eq!(cpu.a, 0x47);
        assert!(!cpu.flag(CC_C));

        // 0x99 + 0x01 = 0x9A -> 00 with carry
        cpu.a = flags_add(&mut cpu, 0x99, 0x01, 0);
        daa(&mut cpu);
        assert_eq!(cpu.a, 0x00);
        assert!(cpu.flag(CC_C));
    }

    #[test]
    fn test_load_store_d() {
        // LDD #$1234; STD $80; LDX $80
        let ikbd = run(&[0xCC, 0x12, 0x34, 0xDD, 0x80, 0xDE, 0x80], 3);
        assert_eq!(ikbd.cpu.d(), 0x1234);
        assert_eq!(ikbd.mem.read_raw(0x80), 0x12);
        assert_eq!(ikbd.mem.read_raw(0x81), 0x34);
        assert_eq!(ikbd.cpu.x, 0x1234);
    }

    #[test]
    fn test_mul_and_addd() {
        // LDAA #$10; LDAB #$10; MUL; ADDD #$FF00
        let ikbd = run(&[0x86, 0x10, 0xC6, 0x10, 0x3D, 0xC3, 0xFF, 0x00], 4);
        assert_eq!(ikbd.cpu.d(), 0x0000);
        assert!(ikbd.cpu.flag(CC_C));
        assert!(ikbd.cpu.flag(CC_Z));
    }

    #[test]
    fn test_jsr_rts() {
        // F000: JSR $F010 ; F003: NOP ... F010: LDAA #$55 ; RTS
        let mut code = vec![0x01u8; 0x20];
        code[0..3].copy_from_slice(&[0xBD, 0xF0, 0x10]);
        code[0x10..0x13].copy_from_slice(&[0x86, 0x55, 0x39]);
        let ikbd = run(&code, 3);
        assert_eq!(ikbd.cpu.a, 0x55);
        assert_eq!(ikbd.cpu.pc, 0xF003);
        assert_eq!(ikbd.cpu.sp, 0x00FF);
        // Return address stored big-endian just above the stack pointer
        assert_eq!(ikbd.mem.read_raw(0xFE), 0xF0);
        assert_eq!(ikbd.mem.read_raw(0xFF), 0x03);
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        // CLC; BCS +2; LDAA #$01; BCC -2 (to itself)
        let ikbd = run(&[0x0C, 0x25, 0x02, 0x86, 0x01, 0x24, 0xFE], 4);
        assert_eq!(ikbd.cpu.a, 0x01);
        assert_eq!(ikbd.cpu.pc, ROM_START + 5);
    }

    #[test]
    fn test_pshx_pulx_xgdx() {
        // LDX #$ABCD; PSHX; LDD #$1234; XGDX; PULX
        let ikbd = run(&[0xCE, 0xAB, 0xCD, 0x3C, 0xCC, 0x12, 0x34, 0x18, 0x38], 5);
        assert_eq!(ikbd.cpu.d(), 0xABCD);
        assert_eq!(ikbd.cpu.x, 0xABCD);
        assert_eq!(ikbd.cpu.sp, 0x00FF);
    }

    #[test]
    fn test_tsx_txs_offsets() {
        // TSX; TXS
        let ikbd = run(&[0x30, 0x35], 2);
        assert_eq!(ikbd.cpu.x, 0x0100);
        assert_eq!(ikbd.cpu.sp, 0x00FF);
    }

    #[test]
    fn test_aim_oim_tim_on_ram() {
        // LDAA #$F0; STAA $90; AIM #$3C,$90; OIM #$01,$90; TIM #$01,$90
        let ikbd = run(&[0x86, 0xF0, 0x97, 0x90, 0x71, 0x3C, 0x90, 0x72, 0x01, 0x90, 0x7B, 0x01, 0x90], 5);
        assert_eq!(ikbd.mem.read_raw(0x90), 0x31);
        assert!(!ikbd.cpu.flag(CC_Z));
        assert!(!ikbd.cpu.flag(CC_V));
    }

    #[test]
    fn test_indexed_unary_memory() {
        // LDX #$0080; CLR 5,X; DEC 5,X
        let ikbd = run(&[0xCE, 0x00, 0x80, 0x6F, 0x05, 0x6A, 0x05], 3);
        assert_eq!(ikbd.mem.read_raw(0x85), 0xFF);
        assert!(ikbd.cpu.flag(CC_N));
    }

    #[test]
    fn test_swi_stacks_and_vectors() {
        let mut code = vec![0x01u8; 0x1000];
        code[0] = 0x3F; // SWI
        code[0xFFA] = 0xF1;
        code[0xFFB] = 0x00;
        let ikbd = run(&code, 1);
        assert_eq!(ikbd.cpu.pc, 0xF100);
        assert_eq!(ikbd.cpu.sp, 0x00FF - 7);
        assert!(ikbd.cpu.flag(CC_I));
        // PCL pushed first, at the original SP
        assert_eq!(ikbd.mem.read_raw(0xFF), 0x01);
        assert_eq!(ikbd.mem.read_raw(0xFE), 0xF0);
    }

    #[test]
    fn test_lsrd_asld() {
        // LDD #$8001; LSRD; ASLD
        let ikbd = run(&[0xCC, 0x80, 0x01, 0x04], 2);
        assert_eq!(ikbd.cpu.d(), 0x4000);
        assert!(ikbd.cpu.flag(CC_C));
        let ikbd = run(&[0xCC, 0x80, 0x01, 0x05], 2);
        assert_eq!(ikbd.cpu.d(), 0x0002);
        assert!(ikbd.cpu.flag(CC_C));
        assert!(ikbd.cpu.flag(CC_V));
    }
}
