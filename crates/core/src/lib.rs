//! # ikbd-core
//!
//! Cycle-stepped emulation core for the HD6301 keyboard controller (IKBD)
//! found in a classic 16-bit home computer, plus the host-side plumbing that
//! lets it run on a dual-core microcontroller or a desktop host.
//!
//! The controller is a 1 MHz HD6301 in single-chip mode: 128 bytes of
//! internal RAM, 4 KiB of mask ROM, a 16-bit timer, a serial interface (SCI)
//! wired to the host computer at 7812.5 baud, and four I/O ports that scan
//! the key matrix, joysticks and mouse.
//!
//! ## Architecture
//!
//! - [`Ikbd`]: Top-level engine that wires together CPU, memory, and peripherals
//! - [`Cpu`]: HD6301 register file (A, B, X, SP, PC, CC, cycle counter, run state)
//! - [`Memory`]: 64 KiB address space with ROM write protection
//! - [`opcodes`]: Static 256-entry dispatch table (operation, mode, cycles, mnemonic)
//! - [`peripherals`]: Timer, SCI, I/O ports and the host input latch
//! - [`bridge`]: Interrupt-safe receive ring, overflow queue, and SCI servicing
//! - [`driver`]: Emulation core / I/O core loop with pause protocol and watchdog
//! - [`diagnostics`]: Advisory counters shared between the cores
//! - [`settings`]: Persistent settings record written under the pause protocol
//! - [`disasm`]: Disassembler for crash reports and tracing
//! - [`hex`]: Intel HEX firmware loader
//!
//! ## Interrupts
//!
//! Sources are checked once per [`Ikbd::step`] in fixed priority order:
//! output compare, timer overflow, then SCI. At most one is serviced per
//! step, and entry sets the I mask so the handler runs undisturbed until
//! RTI restores the stacked CC.

pub mod cpu;
pub mod memory;
pub mod opcodes;
pub mod hex;
pub mod peripherals;
pub mod disasm;
pub mod bridge;
pub mod driver;
pub mod diagnostics;
pub mod config;
pub mod error;
pub mod settings;

use std::sync::Arc;

pub use config::{Config, EngineMode};
pub use cpu::{Cpu, RunState};
pub use error::{CoreError, Result};
pub use memory::Memory;
use peripherals::{InputLatch, Ports, Sci, Timer};

/// E-clock frequency: 1 MHz
pub const CLOCK_HZ: u32 = 1_000_000;

// CC bit positions
pub const CC_C: u8 = 0;
pub const CC_V: u8 = 1;
pub const CC_Z: u8 = 2;
pub const CC_N: u8 = 3;
pub const CC_I: u8 = 4;
pub const CC_H: u8 = 5;
/// CC bits 7 and 6 always read as 1
pub const CC_FIXED: u8 = 0xC0;

/// Cycles charged for a step in which the CPU waits (WAI/SLP)
pub const IDLE_CYCLES: u32 = 1;

/// Maskable interrupt sources, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    OutputCompare,
    TimerOverflow,
    Serial,
}

impl Interrupt {
    pub fn vector(self) -> u16 {
        match self {
            Interrupt::OutputCompare => peripherals::VEC_OCF,
            Interrupt::TimerOverflow => peripherals::VEC_TOF,
            Interrupt::Serial => peripherals::VEC_SCI,
        }
    }
}

/// The emulated keyboard controller.
pub struct Ikbd {
    pub cpu: Cpu,
    pub mem: Memory,
    pub timer: Timer,
    pub sci: Sci,
    pub ports: Ports,
    mode: EngineMode,
    /// Log every instruction at TRACE level
    pub trace: bool,
    /// Interrupts entered since power-on
    pub interrupts_serviced: u64,
}

impl Ikbd {
    pub fn new(mode: EngineMode) -> Self {
        Ikbd {
            cpu: Cpu::new(),
            mem: Memory::new(),
            timer: Timer::new(),
            sci: Sci::new(),
            ports: Ports::new(Arc::new(InputLatch::new())),
            mode,
            trace: false,
            interrupts_serviced: 0,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Shared handle to the input latch sampled by the ports.
    pub fn input(&self) -> Arc<InputLatch> {
        Arc::clone(self.ports.input())
    }

    /// Total cycles executed since power-on.
    pub fn cycles(&self) -> u64 {
        self.cpu.tick
    }

    /// Load a raw ROM image (right-aligned to 0xFFFF) and reset.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<usize> {
        let n = self.mem.load_rom(image)?;
        tracing::info!(bytes = n, "ROM image loaded");
        self.reset();
        Ok(n)
    }

    /// Load an Intel HEX firmware image and reset.
    pub fn load_hex(&mut self, hex_str: &str) -> Result<usize> {
        let n = hex::parse_hex(hex_str, &mut self.mem.data)?;
        tracing::info!(bytes = n, "HEX firmware loaded");
        self.reset();
        Ok(n)
    }

    /// Hardware reset.
    ///
    /// PC comes from the reset vector and interrupts are masked. A, B, X and
    /// SP keep their values; peripherals return to their reset state.
    pub fn reset(&mut self) {
        self.timer.reset();
        self.sci.reset();
        self.ports.reset();
        self.cpu.pc = self.mem.read_word_raw(peripherals::VEC_RESET);
        self.cpu.set_flag(CC_I, true);
        self.cpu.state = RunState::Running;
        tracing::debug!(pc = format_args!("{:04X}", self.cpu.pc), "reset");
    }

    /// PC at which strict mode halted the engine, if it has.
    pub fn crashed(&self) -> Option<u16> {
        match self.cpu.state {
            RunState::Crashed { pc } => Some(pc),
            _ => None,
        }
    }

    /// Highest-priority interrupt source currently requesting, ignoring the I mask.
    pub fn pending_interrupt(&self) -> Option<Interrupt> {
        if self.timer.compare_irq() {
            Some(Interrupt::OutputCompare)
        } else if self.timer.overflow_irq() {
            Some(Interrupt::TimerOverflow)
        } else if self.sci.irq_pending() {
            Some(Interrupt::Serial)
        } else {
            None
        }
    }

    /// Run one step and return the cycles it consumed.
    ///
    /// A step either services one interrupt, executes one instruction, or
    /// idles one cycle while waiting. The same cycle count is added to the
    /// CPU tick counter and forwarded to the timer. A crashed engine
    /// returns 0 and changes nothing.
    pub fn step(&mut self) -> u32 {
        if let RunState::Crashed { .. } = self.cpu.state {
            return 0;
        }
        let pending = self.pending_interrupt();
        let cycles = match pending {
            Some(irq) if !self.cpu.flag(CC_I) => self.service_interrupt(irq),
            _ => match self.cpu.state {
                RunState::Running => self.execute_next(),
                RunState::Sleeping => {
                    // SLP ends on any request, even a masked one
                    if pending.is_some() {
                        self.cpu.state = RunState::Running;
                    }
                    IDLE_CYCLES
                }
                RunState::Waiting | RunState::Crashed { .. } => IDLE_CYCLES,
            },
        };
        self.cpu.tick += cycles as u64;
        self.timer.advance(cycles);
        cycles
    }

    /// Step until at least `budget` cycles have run or the engine crashes.
    /// Returns the cycles actually consumed.
    pub fn run_cycles(&mut self, budget: u32) -> u64 {
        let start = self.cpu.tick;
        let end = start + budget as u64;
        while self.cpu.tick < end {
            if self.step() == 0 {
                break;
            }
        }
        self.cpu.tick - start
    }

    fn execute_next(&mut self) -> u32 {
        let pc = self.cpu.pc;
        if self.mode == EngineMode::Strict && !memory::is_executable(pc) {
            self.crash(pc, "program counter outside internal RAM and ROM");
            return 0;
        }
        if self.trace {
            let (asm, _) = disasm::disassemble(&self.mem, pc);
            tracing::trace!("{:04X}: {:<18} {}", pc, asm, self.dump_regs_line());
        }
        let opcode = self.fetch8();
        self.execute_op(pc, opcodes::lookup(opcode))
    }

    /// Enter an interrupt handler. Costs the same as SWI.
    fn service_interrupt(&mut self, irq: Interrupt) -> u32 {
        // WAI already stacked the registers
        if self.cpu.state != RunState::Waiting {
            self.push_registers();
        }
        self.cpu.state = RunState::Running;
        self.cpu.set_flag(CC_I, true);
        self.cpu.pc = self.mem.read_word_raw(irq.vector());
        self.interrupts_serviced += 1;
        opcodes::lookup(opcodes::SWI_OPCODE).cycles as u32
    }

    pub(crate) fn crash(&mut self, pc: u16, reason: &str) {
        self.cpu.state = RunState::Crashed { pc };
        let (asm, _) = disasm::disassemble(&self.mem, pc);
        tracing::error!(
            pc = format_args!("{:04X}", pc),
            instruction = %asm,
            registers = %self.dump_regs_line(),
            "engine halted: {}", reason
        );
    }

    // --- Bus ---

    /// Read a byte as the CPU sees it, with register side effects.
    pub fn read8(&mut self, addr: u16) -> u8 {
        if addr <= memory::REG_END {
            if let Some(v) = self.ports.read(addr) { return v; }
            if let Some(v) = self.timer.read(addr) { return v; }
            if let Some(v) = self.sci.read(addr) { return v; }
        }
        self.mem.read_raw(addr)
    }

    /// Write a byte as the CPU does: registers first, ROM writes dropped.
    pub fn write8(&mut self, addr: u16, value: u8) {
        if addr <= memory::REG_END
            && (self.ports.write(addr, value)
                || self.timer.write(addr, value)
                || self.sci.write(addr, value))
        {
            return;
        }
        if !self.mem.write(addr, value) {
            tracing::trace!(addr = format_args!("{:04X}", addr), value, "write to ROM ignored");
        }
    }

    pub fn read16(&mut self, addr: u16) -> u16 {
        let hi = self.read8(addr) as u16;
        let lo = self.read8(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    pub fn write16(&mut self, addr: u16, value: u16) {
        self.write8(addr, (value >> 8) as u8);
        self.write8(addr.wrapping_add(1), value as u8);
    }

    /// Read a byte without triggering register side effects.
    pub fn peek8(&self, addr: u16) -> u8 {
        if addr <= memory::REG_END {
            if let Some(v) = self.ports.read(addr) { return v; }
            if let Some(v) = self.timer.peek(addr) { return v; }
            if let Some(v) = self.sci.peek(addr) { return v; }
        }
        self.mem.read_raw(addr)
    }

    // --- Debug views ---

    fn dump_regs_line(&self) -> String {
        format!(
            "A={:02X} B={:02X} X={:04X} SP={:04X} CC={}",
            self.cpu.a, self.cpu.b, self.cpu.x, self.cpu.sp,
            disasm::format_cc(self.cpu.cc)
        )
    }

    /// Format a register and peripheral dump.
    pub fn dump_regs(&self) -> String {
        format!(
            "PC={:04X} {}\n{}\nTRCSR={:02X} state={:?} cycles={}",
            self.cpu.pc,
            self.dump_regs_line(),
            self.timer.dbg_info(),
            self.sci.trcsr(),
            self.cpu.state,
            self.cpu.tick
        )
    }
}

impl Default for Ikbd {
    fn default() -> Self {
        Self::new(EngineMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::{sci, timer};

    /// ROM with `code` at 0xF000, reset vector at 0xF000, and handlers for
    /// OCF at 0xF100, TOF at 0xF200, SCI at 0xF300 (each a lone RTI).
    fn ikbd_with(code: &[u8], mode: EngineMode) -> Ikbd {
        let mut rom = vec![0x01u8; 0x1000];
        rom[..code.len()].copy_from_slice(code);
        rom[0x100] = 0x3B;
        rom[0x200] = 0x3B;
        rom[0x300] = 0x3B;
        rom[0xFF0..0xFF2].copy_from_slice(&[0xF3, 0x00]);
        rom[0xFF2..0xFF4].copy_from_slice(&[0xF2, 0x00]);
        rom[0xFF4..0xFF6].copy_from_slice(&[0xF1, 0x00]);
        rom[0xFFE..0x1000].copy_from_slice(&[0xF0, 0x00]);
        let mut ikbd = Ikbd::new(mode);
        ikbd.load_rom(&rom).unwrap();
        ikbd.cpu.sp = 0x00FF;
        ikbd
    }

    /// Arm OCF with its interrupt enabled.
    fn raise_compare(ikbd: &mut Ikbd) {
        ikbd.write8(timer::OCR_H, 0x00);
        ikbd.write8(timer::OCR_L, 0x02);
        ikbd.write8(timer::TCSR, timer::TCSR_EOCI);
        ikbd.timer.advance(0x10);
        assert!(ikbd.timer.compare_irq());
    }

    #[test]
    fn test_reset_loads_vector_and_masks() {
        let mut ikbd = ikbd_with(&[0x0E], EngineMode::Fast);
        assert_eq!(ikbd.cpu.pc, 0xF000);
        assert!(ikbd.cpu.flag(CC_I));
        ikbd.cpu.a = 0x42;
        ikbd.step(); // CLI
        assert!(!ikbd.cpu.flag(CC_I));
        ikbd.reset();
        assert_eq!(ikbd.cpu.pc, 0xF000);
        assert!(ikbd.cpu.flag(CC_I));
        assert_eq!(ikbd.cpu.a, 0x42, "general registers survive reset");
    }

    #[test]
    fn test_cycle_sum_matches_timer() {
        // LDAA #1; LDX #$0080; STAA 0,X; MUL; PSHA; PULA; NOP
        let code = [0x86, 0x01, 0xCE, 0x00, 0x80, 0xA7, 0x00, 0x3D, 0x36, 0x32, 0x01];
        let mut ikbd = ikbd_with(&code, EngineMode::Fast);
        let expected: u32 = [0x86u8, 0xCE, 0xA7, 0x3D, 0x36, 0x32, 0x01]
            .iter()
            .map(|&op| opcodes::lookup(op).cycles as u32)
            .sum();
        let mut total = 0;
        for _ in 0..7 {
            total += ikbd.step();
        }
        assert_eq!(total, expected);
        assert_eq!(ikbd.cycles(), expected as u64);
        assert_eq!(ikbd.timer.elapsed, expected as u64);
        assert_eq!(ikbd.timer.counter(), expected as u16);
    }

    #[test]
    fn test_masked_interrupt_not_serviced() {
        let mut ikbd = ikbd_with(&[0x01, 0x01], EngineMode::Fast);
        raise_compare(&mut ikbd);
        ikbd.step();
        assert_eq!(ikbd.cpu.pc, 0xF001);
        assert_eq!(ikbd.interrupts_serviced, 0);
    }

    #[test]
    fn test_priority_compare_before_serial() {
        let mut ikbd = ikbd_with(&[0x0E, 0x01], EngineMode::Fast);
        ikbd.write8(sci::TRCSR, sci::TRCSR_RIE | sci::TRCSR_RE);
        ikbd.sci.host_push(0x55).unwrap();
        raise_compare(&mut ikbd);
        ikbd.step(); // CLI
        let cycles = ikbd.step();
        assert_eq!(cycles, opcodes::lookup(opcodes::SWI_OPCODE).cycles as u32);
        assert_eq!(ikbd.cpu.pc, 0xF100);
        assert_eq!(ikbd.interrupts_serviced, 1);
        // Masked inside the handler: the SCI request waits
        assert!(ikbd.cpu.flag(CC_I));
        ikbd.step();
        assert_eq!(ikbd.interrupts_serviced, 1);
    }

    #[test]
    fn test_lower_priority_request_taken_after_rti() {
        let mut ikbd = ikbd_with(&[0x0E, 0x01], EngineMode::Fast);
        // OCF handler: LDAA TCSR; LDD OCR; STD OCR; RTI
        ikbd.mem.data[0xF100..0xF107].copy_from_slice(&[0x96, 0x08, 0xDC, 0x0B, 0xDD, 0x0B, 0x3B]);
        ikbd.write8(sci::TRCSR, sci::TRCSR_RIE | sci::TRCSR_RE);
        ikbd.sci.host_push(0x55).unwrap();
        raise_compare(&mut ikbd);
        ikbd.step(); // CLI
        ikbd.step();
        assert_eq!(ikbd.cpu.pc, 0xF100);
        for _ in 0..4 {
            ikbd.step();
        }
        assert!(!ikbd.timer.compare_irq());
        assert_eq!(ikbd.cpu.pc, 0xF001);
        assert!(!ikbd.cpu.flag(CC_I));
        ikbd.step();
        assert_eq!(ikbd.cpu.pc, 0xF300);
        assert_eq!(ikbd.interrupts_serviced, 2);
    }

    #[test]
    fn test_rti_restores_register_file() {
        let mut ikbd = ikbd_with(&[0x0E, 0x01, 0x01], EngineMode::Fast);
        ikbd.step(); // CLI
        ikbd.cpu.a = 0x12;
        ikbd.cpu.b = 0x34;
        ikbd.cpu.x = 0x5678;
        ikbd.cpu.set_flag(CC_C, true);
        let cc = ikbd.cpu.cc;
        // Disable OCF as a source once taken so only TOF fires
        ikbd.write8(timer::TCSR, timer::TCSR_ETOI);
        ikbd.timer.advance(0x1_0000);
        ikbd.step();
        assert_eq!(ikbd.cpu.pc, 0xF200);
        assert_eq!(ikbd.cpu.sp, 0x00FF - 7);
        ikbd.cpu.a = 0;
        ikbd.cpu.x = 0;
        // Clear TOF the hardware way before returning
        ikbd.read8(timer::TCSR);
        ikbd.read8(timer::FRC_H);
        ikbd.step(); // RTI
        assert_eq!(ikbd.cpu.pc, 0xF001);
        assert_eq!(ikbd.cpu.a, 0x12);
        assert_eq!(ikbd.cpu.b, 0x34);
        assert_eq!(ikbd.cpu.x, 0x5678);
        assert_eq!(ikbd.cpu.cc, cc);
        assert_eq!(ikbd.cpu.sp, 0x00FF);
    }

    #[test]
    fn test_wai_wakes_on_interrupt_without_restacking() {
        // CLI; WAI
        let mut ikbd = ikbd_with(&[0x0E, 0x3E], EngineMode::Fast);
        ikbd.step();
        ikbd.step();
        assert_eq!(ikbd.cpu.state, RunState::Waiting);
        let sp = ikbd.cpu.sp;
        assert_eq!(ikbd.step(), IDLE_CYCLES);
        ikbd.write8(sci::TRCSR, sci::TRCSR_RIE);
        ikbd.sci.host_push(0x01).unwrap();
        ikbd.step();
        assert_eq!(ikbd.cpu.pc, 0xF300);
        assert_eq!(ikbd.cpu.sp, sp);
        assert_eq!(ikbd.cpu.state, RunState::Running);
    }

    #[test]
    fn test_slp_wakes_on_masked_request() {
        // SLP; LDAA #$77
        let mut ikbd = ikbd_with(&[0x1A, 0x86, 0x77], EngineMode::Fast);
        ikbd.step();
        assert_eq!(ikbd.cpu.state, RunState::Sleeping);
        ikbd.step();
        assert_eq!(ikbd.cpu.state, RunState::Sleeping);
        ikbd.write8(sci::TRCSR, sci::TRCSR_RIE);
        ikbd.sci.host_push(0x01).unwrap();
        ikbd.step();
        assert_eq!(ikbd.cpu.state, RunState::Running);
        ikbd.step();
        assert_eq!(ikbd.cpu.a, 0x77);
    }

    #[test]
    fn test_strict_mode_crashes_on_bad_pc() {
        // JMP $2000
        let mut ikbd = ikbd_with(&[0x7E, 0x20, 0x00], EngineMode::Strict);
        ikbd.step();
        assert_eq!(ikbd.crashed(), None);
        assert_eq!(ikbd.step(), 0);
        assert_eq!(ikbd.crashed(), Some(0x2000));
        let tick = ikbd.cycles();
        assert_eq!(ikbd.step(), 0);
        assert_eq!(ikbd.cycles(), tick);
        assert_eq!(ikbd.run_cycles(100), 0);
    }

    #[test]
    fn test_fast_mode_runs_anywhere() {
        // JMP $2000, external RAM holds zeros (undefined opcode 0x00)
        let mut ikbd = ikbd_with(&[0x7E, 0x20, 0x00], EngineMode::Fast);
        ikbd.step();
        assert_eq!(ikbd.step(), opcodes::UNDEFINED_CYCLES as u32);
        assert_eq!(ikbd.cpu.pc, 0x2001);
        assert_eq!(ikbd.crashed(), None);
    }

    #[test]
    fn test_strict_mode_crashes_on_undefined_opcode() {
        let mut ikbd = ikbd_with(&[0x00], EngineMode::Strict);
        assert_eq!(ikbd.step(), 0);
        assert_eq!(ikbd.crashed(), Some(0xF000));
    }

    #[test]
    fn test_rom_write_ignored_and_registers_routed() {
        let mut ikbd = ikbd_with(&[], EngineMode::Fast);
        ikbd.write8(0xF000, 0x99);
        assert_eq!(ikbd.read8(0xF000), 0x01);
        ikbd.write8(sci::TDR, 0x5A);
        assert_eq!(ikbd.sci.host_pull(), Some(0x5A));
        // RAM control register is plain storage
        ikbd.write8(0x14, 0x40);
        assert_eq!(ikbd.read8(0x14), 0x40);
    }

    #[test]
    fn test_load_hex_without_data_rejected() {
        let mut ikbd = ikbd_with(&[0x01], EngineMode::Strict);
        assert!(matches!(ikbd.load_hex(":00000001FF\n"), Err(CoreError::EmptyImage)));
        // The running image is left alone
        assert_eq!(ikbd.cpu.pc, 0xF000);
        assert_eq!(ikbd.mem.read_word_raw(peripherals::VEC_RESET), 0xF000);
    }

    #[test]
    fn test_run_cycles_meets_budget() {
        // BRA * (3 cycles each)
        let mut ikbd = ikbd_with(&[0x20, 0xFE], EngineMode::Fast);
        let ran = ikbd.run_cycles(1000);
        assert!(ran >= 1000 && ran < 1003);
        assert_eq!(ikbd.timer.elapsed, ran);
    }

    #[test]
    fn test_program_reads_keyboard_matrix() {
        // LDAA #$FE; STAA DDR3; LDAA #$FD; STAA P3; LDAA P1
        let code = [0x86, 0xFE, 0x97, 0x04, 0x86, 0xFD, 0x97, 0x06, 0x96, 0x02];
        let mut ikbd = ikbd_with(&code, EngineMode::Strict);
        ikbd.input().set_key(0, 3, true);
        for _ in 0..5 {
            ikbd.step();
        }
        assert_eq!(ikbd.cpu.a, !(1 << 3));
    }
}
