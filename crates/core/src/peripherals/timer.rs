//! 16-bit free-running timer.
//!
//! The HD6301 timer is a free-running counter (FRC) clocked by the E-clock,
//! an output compare register (OCR), an input capture register (ICR), and
//! the timer control/status register (TCSR). The engine advances it by
//! each step's cycle cost, so a large advance behaves exactly like the same
//! number of single-cycle increments. Nothing drives the capture input on
//! the keyboard board, so ICR keeps its reset value.
//!
//! Status flags are sticky. They clear only through the hardware sequence:
//! read TCSR with the flag set, then access the flag's data register
//! (OCR write for OCF, FRC high-byte read for TOF, ICR low-byte read for
//! ICF).

pub const TCSR: u16 = 0x08;
pub const FRC_H: u16 = 0x09;
pub const FRC_L: u16 = 0x0A;
pub const OCR_H: u16 = 0x0B;
pub const OCR_L: u16 = 0x0C;
pub const ICR_H: u16 = 0x0D;
pub const ICR_L: u16 = 0x0E;

/// Input capture flag
pub const TCSR_ICF: u8 = 0x80;
/// Output compare flag
pub const TCSR_OCF: u8 = 0x40;
/// Timer overflow flag
pub const TCSR_TOF: u8 = 0x20;
/// Enable input capture interrupt
pub const TCSR_EICI: u8 = 0x10;
/// Enable output compare interrupt
pub const TCSR_EOCI: u8 = 0x08;
/// Enable timer overflow interrupt
pub const TCSR_ETOI: u8 = 0x04;
/// Input edge select
pub const TCSR_IEDG: u8 = 0x02;
/// Output level
pub const TCSR_OLVL: u8 = 0x01;

const FLAG_MASK: u8 = TCSR_ICF | TCSR_OCF | TCSR_TOF;

/// Value loaded into the counter by a write to its high byte
pub const FRC_PRESET: u16 = 0xFFF8;

pub struct Timer {
    counter: u16,
    compare: u16,
    capture: u16,
    tcsr: u8,
    /// Flags observed by the last TCSR read, eligible for clearing
    armed: u8,
    /// High byte of a pending double-byte counter write
    frc_write_latch: Option<u8>,
    /// Total cycles advanced since power-on (survives reset)
    pub elapsed: u64,
    // Debug counters
    pub dbg_compare_matches: u64,
    pub dbg_overflows: u64,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            counter: 0,
            compare: 0xFFFF,
            capture: 0,
            tcsr: 0,
            armed: 0,
            frc_write_latch: None,
            elapsed: 0,
            dbg_compare_matches: 0,
            dbg_overflows: 0,
        }
    }

    pub fn reset(&mut self) {
        let elapsed = self.elapsed;
        *self = Timer::new();
        self.elapsed = elapsed;
    }

    /// Advance the counter by `cycles`, latching OCF when the counter
    /// passes through the compare value and TOF when it wraps.
    pub fn advance(&mut self, cycles: u32) {
        if cycles == 0 {
            return;
        }
        let old = self.counter as u32;
        // Increments needed to land on the compare value (a full period when equal now)
        let to_compare = match (self.compare as u32).wrapping_sub(old) & 0xFFFF {
            0 => 0x1_0000,
            d => d,
        };
        if to_compare <= cycles {
            self.tcsr |= TCSR_OCF;
            self.dbg_compare_matches += 1;
        }
        let to_wrap = 0x1_0000 - old;
        if to_wrap <= cycles {
            self.tcsr |= TCSR_TOF;
            self.dbg_overflows += 1;
        }
        self.counter = old.wrapping_add(cycles) as u16;
        self.elapsed += cycles as u64;
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn tcsr(&self) -> u8 {
        self.tcsr
    }

    /// Output compare interrupt request
    pub fn compare_irq(&self) -> bool {
        self.tcsr & TCSR_OCF != 0 && self.tcsr & TCSR_EOCI != 0
    }

    /// Overflow interrupt request
    pub fn overflow_irq(&self) -> bool {
        self.tcsr & TCSR_TOF != 0 && self.tcsr & TCSR_ETOI != 0
    }

    fn clear_armed(&mut self, flag: u8) {
        if self.armed & flag != 0 {
            self.tcsr &= !flag;
            self.armed &= !flag;
        }
    }

    /// Handle a register read. Returns None for addresses the timer does not own.
    pub fn read(&mut self, addr: u16) -> Option<u8> {
        if (TCSR..=ICR_L).contains(&addr) {
            self.frc_write_latch = None;
        }
        match addr {
            TCSR => {
                self.armed = self.tcsr & FLAG_MASK;
                Some(self.tcsr)
            }
            FRC_H => {
                self.clear_armed(TCSR_TOF);
                Some((self.counter >> 8) as u8)
            }
            FRC_L => Some(self.counter as u8),
            OCR_H => Some((self.compare >> 8) as u8),
            OCR_L => Some(self.compare as u8),
            ICR_H => Some((self.capture >> 8) as u8),
            ICR_L => {
                self.clear_armed(TCSR_ICF);
                Some(self.capture as u8)
            }
            _ => None,
        }
    }

    /// Read without side effects (diagnostics and disassembly).
    pub fn peek(&self, addr: u16) -> Option<u8> {
        match addr {
            TCSR => Some(self.tcsr),
            FRC_H => Some((self.counter >> 8) as u8),
            FRC_L => Some(self.counter as u8),
            OCR_H => Some((self.compare >> 8) as u8),
            OCR_L => Some(self.compare as u8),
            ICR_H => Some((self.capture >> 8) as u8),
            ICR_L => Some(self.capture as u8),
            _ => None,
        }
    }

    /// Handle a register write. Returns false for addresses the timer does not own.
    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        // Only an immediately following low-byte store completes a counter write
        if addr != FRC_L && (TCSR..=ICR_L).contains(&addr) {
            self.frc_write_latch = None;
        }
        match addr {
            TCSR => {
                // Flag bits are read-only
                self.tcsr = (self.tcsr & FLAG_MASK) | (value & !FLAG_MASK);
            }
            FRC_H => {
                self.counter = FRC_PRESET;
                self.frc_write_latch = Some(value);
            }
            FRC_L => {
                // Completes a double-byte store; a lone low-byte write is ignored
                if let Some(high) = self.frc_write_latch.take() {
                    self.counter = ((high as u16) << 8) | value as u16;
                }
            }
            OCR_H => {
                self.compare = (self.compare & 0x00FF) | ((value as u16) << 8);
                self.clear_armed(TCSR_OCF);
            }
            OCR_L => {
                self.compare = (self.compare & 0xFF00) | value as u16;
                self.clear_armed(TCSR_OCF);
            }
            ICR_H | ICR_L => {}
            _ => return false,
        }
        true
    }

    pub fn dbg_info(&self) -> String {
        format!(
            "FRC={:04X} OCR={:04X} ICR={:04X} TCSR={:02X} matches={} overflows={}",
            self.counter, self.compare, self.capture, self.tcsr,
            self.dbg_compare_matches, self.dbg_overflows
        )
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_with_compare(compare: u16) -> Timer {
        let mut t = Timer::new();
        t.write(OCR_H, (compare >> 8) as u8);
        t.write(OCR_L, compare as u8);
        t
    }

    #[test]
    fn test_compare_flag_latches_at_crossing() {
        let mut t = timer_with_compare(0x0100);
        let mut set_at = None;
        for step in 0..100u32 {
            let was_set = t.tcsr() & TCSR_OCF != 0;
            t.advance(7);
            let now_set = t.tcsr() & TCSR_OCF != 0;
            if now_set && !was_set {
                assert!(set_at.is_none(), "flag set twice");
                set_at = Some(step);
                assert!(t.counter() >= 0x0100);
                assert!(t.counter() - 7 < 0x0100);
            }
        }
        // 0x100 / 7 = 36.57 -> the 37th advance (index 36) crosses
        assert_eq!(set_at, Some(36));
        assert_ne!(t.tcsr() & TCSR_OCF, 0, "flag must stay set until cleared");
        assert_eq!(t.dbg_compare_matches, 1);
    }

    #[test]
    fn test_large_advance_equals_single_steps() {
        let mut bulk = timer_with_compare(0x1234);
        let mut single = timer_with_compare(0x1234);
        bulk.advance(0x2000);
        for _ in 0..0x2000 {
            single.advance(1);
        }
        assert_eq!(bulk.counter(), single.counter());
        assert_eq!(bulk.tcsr(), single.tcsr());
        assert_eq!(bulk.elapsed, single.elapsed);
    }

    #[test]
    fn test_compare_equal_to_counter_needs_full_period() {
        let mut t = timer_with_compare(0x0000);
        t.advance(0xFFFF);
        assert_eq!(t.tcsr() & TCSR_OCF, 0);
        t.advance(1);
        assert_ne!(t.tcsr() & TCSR_OCF, 0);
        assert_ne!(t.tcsr() & TCSR_TOF, 0);
    }

    #[test]
    fn test_overflow_flag() {
        let mut t = Timer::new();
        t.advance(0xFFFF);
        assert_eq!(t.tcsr() & TCSR_TOF, 0);
        t.advance(2);
        assert_ne!(t.tcsr() & TCSR_TOF, 0);
        assert_eq!(t.counter(), 1);
    }

    #[test]
    fn test_clear_sequence_requires_tcsr_read() {
        let mut t = timer_with_compare(0x0010);
        t.advance(0x20);
        assert_ne!(t.tcsr() & TCSR_OCF, 0);

        // OCR write without a prior TCSR read leaves the flag alone
        t.write(OCR_L, 0x40);
        assert_ne!(t.tcsr() & TCSR_OCF, 0);

        assert_eq!(t.read(TCSR).map(|v| v & TCSR_OCF), Some(TCSR_OCF));
        t.write(OCR_L, 0x50);
        assert_eq!(t.tcsr() & TCSR_OCF, 0);
    }

    #[test]
    fn test_overflow_cleared_by_counter_read() {
        let mut t = Timer::new();
        t.advance(0x1_0000);
        assert_ne!(t.tcsr() & TCSR_TOF, 0);
        t.read(TCSR);
        t.read(FRC_H);
        assert_eq!(t.tcsr() & TCSR_TOF, 0);
    }

    #[test]
    fn test_tcsr_write_keeps_flags() {
        let mut t = Timer::new();
        t.write(TCSR, 0xFF);
        assert_eq!(t.tcsr(), 0x1F);
        // Reset compare value is 0xFFFF, so a full period hits both
        t.advance(0x1_0000);
        t.write(TCSR, TCSR_ETOI);
        assert_eq!(t.tcsr(), TCSR_OCF | TCSR_TOF | TCSR_ETOI);
        assert!(t.overflow_irq());
        assert!(!t.compare_irq());
    }

    #[test]
    fn test_counter_write_presets() {
        let mut t = Timer::new();
        t.advance(0x100);
        t.write(FRC_H, 0x12);
        assert_eq!(t.counter(), FRC_PRESET);
        t.write(FRC_L, 0x34);
        assert_eq!(t.counter(), 0x1234);
        // Lone low-byte write does nothing
        t.write(FRC_L, 0x00);
        assert_eq!(t.counter(), 0x1234);
    }

    #[test]
    fn test_counter_write_broken_by_other_access() {
        let mut t = Timer::new();
        t.write(FRC_H, 0x12);
        t.read(TCSR);
        t.write(FRC_L, 0x34);
        assert_eq!(t.counter(), FRC_PRESET);

        t.write(FRC_H, 0x56);
        t.write(OCR_L, 0x00);
        t.write(FRC_L, 0x78);
        assert_eq!(t.counter(), FRC_PRESET);

        // A back-to-back pair still completes
        t.write(FRC_H, 0x9A);
        t.write(FRC_L, 0xBC);
        assert_eq!(t.counter(), 0x9ABC);
    }

    #[test]
    fn test_capture_register_is_read_only() {
        let mut t = Timer::new();
        t.write(ICR_H, 0x12);
        t.write(ICR_L, 0x34);
        assert_eq!(t.read(ICR_H), Some(0x00));
        assert_eq!(t.read(ICR_L), Some(0x00));
    }

    #[test]
    fn test_foreign_address() {
        let mut t = Timer::new();
        assert_eq!(t.read(0x11), None);
        assert!(!t.write(0x02, 0));
    }
}
