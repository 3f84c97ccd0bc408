//! I/O ports 1–4 and the input latch behind them.
//!
//! The keyboard firmware scans the key matrix by driving one column low
//! through ports 3 and 4 and reading the rows on port 1. Joysticks and the
//! mouse share port 4 inputs; the fire buttons sit on port 2. Every input
//! line is active low and reads high when nothing is connected.
//!
//! Host code never touches the ports directly. It writes to an
//! [`InputLatch`] shared through an `Arc`, and the emulated program sees the
//! new levels the next time it reads the port. Each latch field has a single
//! writer (the I/O core), so relaxed atomics are enough.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

pub const DDR1: u16 = 0x00;
pub const DDR2: u16 = 0x01;
pub const P1: u16 = 0x02;
pub const P2: u16 = 0x03;
pub const DDR3: u16 = 0x04;
pub const DDR4: u16 = 0x05;
pub const P3: u16 = 0x06;
pub const P4: u16 = 0x07;
pub const P3CSR: u16 = 0x0F;

/// Key matrix columns (0–6 on port 3 bits 1–7, 7–14 on port 4 bits 0–7)
pub const KEY_COLUMNS: usize = 15;
/// Key matrix rows, one per port 1 bit
pub const KEY_ROWS: usize = 8;

// Joystick direction bits as passed to InputLatch::set_joystick
pub const JOY_UP: u8 = 0x01;
pub const JOY_DOWN: u8 = 0x02;
pub const JOY_LEFT: u8 = 0x04;
pub const JOY_RIGHT: u8 = 0x08;

// Mouse quadrature lines in the port 4 low nibble
pub const MOUSE_XB: u8 = 0x01;
pub const MOUSE_XA: u8 = 0x02;
pub const MOUSE_YA: u8 = 0x04;
pub const MOUSE_YB: u8 = 0x08;

/// Host-side input state sampled by port reads.
pub struct InputLatch {
    /// Pressed rows per column (bit r set = key at row r held)
    columns: [AtomicU8; KEY_COLUMNS],
    joystick: [AtomicU8; 2],
    /// Bit 0 = fire 0 / left button, bit 1 = fire 1 / right button
    fire: AtomicU8,
    mouse_lines: AtomicU8,
    mouse_mode: AtomicBool,
}

impl InputLatch {
    pub fn new() -> Self {
        InputLatch {
            columns: std::array::from_fn(|_| AtomicU8::new(0)),
            joystick: [AtomicU8::new(0), AtomicU8::new(0)],
            fire: AtomicU8::new(0),
            mouse_lines: AtomicU8::new(0),
            mouse_mode: AtomicBool::new(false),
        }
    }

    pub fn set_key(&self, column: usize, row: usize, pressed: bool) {
        if column >= KEY_COLUMNS || row >= KEY_ROWS {
            tracing::debug!(column, row, "key outside the matrix ignored");
            return;
        }
        let bit = 1u8 << row;
        if pressed {
            self.columns[column].fetch_or(bit, Ordering::Relaxed);
        } else {
            self.columns[column].fetch_and(!bit, Ordering::Relaxed);
        }
    }

    /// Set the held directions (`JOY_*` bits) of joystick 0 or 1.
    pub fn set_joystick(&self, port: usize, directions: u8) {
        if let Some(joy) = self.joystick.get(port) {
            joy.store(directions & 0x0F, Ordering::Relaxed);
        }
    }

    pub fn set_fire(&self, port: usize, pressed: bool) {
        if port > 1 {
            return;
        }
        let bit = 1u8 << port;
        if pressed {
            self.fire.fetch_or(bit, Ordering::Relaxed);
        } else {
            self.fire.fetch_and(!bit, Ordering::Relaxed);
        }
    }

    /// Route the port 4 low nibble to the mouse instead of joystick 0.
    pub fn set_mouse_mode(&self, enabled: bool) {
        self.mouse_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn mouse_mode(&self) -> bool {
        self.mouse_mode.load(Ordering::Relaxed)
    }

    pub fn set_mouse_lines(&self, lines: u8) {
        self.mouse_lines.store(lines & 0x0F, Ordering::Relaxed);
    }

    /// Rows pulled low by any pressed key in the selected columns (active high).
    pub fn rows_for(&self, selected_columns: u16) -> u8 {
        self.columns
            .iter()
            .enumerate()
            .filter(|(c, _)| selected_columns & (1u16 << *c) != 0)
            .fold(0, |rows, (_, col)| rows | col.load(Ordering::Relaxed))
    }

    /// External levels on port 4.
    pub fn port4_levels(&self) -> u8 {
        let low = if self.mouse_mode() {
            self.mouse_lines.load(Ordering::Relaxed)
        } else {
            !self.joystick[0].load(Ordering::Relaxed) & 0x0F
        };
        let high = !self.joystick[1].load(Ordering::Relaxed) & 0x0F;
        (high << 4) | low
    }

    /// External levels on port 2 (fire buttons on bits 1 and 2).
    pub fn port2_levels(&self) -> u8 {
        !(self.fire.load(Ordering::Relaxed) << 1)
    }
}

impl Default for InputLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Port data-direction and output latches.
pub struct Ports {
    ddr: [u8; 4],
    latch: [u8; 4],
    p3csr: u8,
    input: Arc<InputLatch>,
}

impl Ports {
    pub fn new(input: Arc<InputLatch>) -> Self {
        Ports { ddr: [0; 4], latch: [0; 4], p3csr: 0, input }
    }

    /// All pins back to inputs. The input latch is left alone.
    pub fn reset(&mut self) {
        self.ddr = [0; 4];
        self.latch = [0; 4];
        self.p3csr = 0;
    }

    pub fn input(&self) -> &Arc<InputLatch> {
        &self.input
    }

    /// Columns currently driven low by output pins.
    pub fn selected_columns(&self) -> u16 {
        let p3_low = self.ddr[2] & !self.latch[2];
        let p4_low = self.ddr[3] & !self.latch[3];
        ((p3_low >> 1) as u16) | ((p4_low as u16) << 7)
    }

    fn pins(&self, port: usize, external: u8) -> u8 {
        (self.latch[port] & self.ddr[port]) | (external & !self.ddr[port])
    }

    pub fn read(&self, addr: u16) -> Option<u8> {
        let value = match addr {
            DDR1 => self.ddr[0],
            DDR2 => self.ddr[1],
            DDR3 => self.ddr[2],
            DDR4 => self.ddr[3],
            P1 => self.pins(0, !self.input.rows_for(self.selected_columns())),
            // Port 2 has five pins; the rest read high
            P2 => self.pins(1, self.input.port2_levels()) | 0xE0,
            P3 => self.pins(2, 0xFF),
            P4 => self.pins(3, self.input.port4_levels()),
            P3CSR => self.p3csr,
            _ => return None,
        };
        Some(value)
    }

    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        match addr {
            DDR1 => self.ddr[0] = value,
            DDR2 => self.ddr[1] = value & 0x1F,
            DDR3 => self.ddr[2] = value,
            DDR4 => self.ddr[3] = value,
            P1 => self.latch[0] = value,
            P2 => self.latch[1] = value,
            P3 => self.latch[2] = value,
            P4 => self.latch[3] = value,
            P3CSR => self.p3csr = value,
            _ => return false,
        }
        true
    }
}

/// Gray-code sequence of the two quadrature lines (A in bit 1, B in bit 0)
const GRAY: [u8; 4] = [0b00, 0b01, 0b11, 0b10];

/// Converts accumulated mouse motion into quadrature line levels.
///
/// Each [`step`](Self::step) moves each axis at most one phase toward the
/// pending delta, matching how fast the firmware can sample the lines.
#[derive(Debug, Default, Clone)]
pub struct MouseQuadrature {
    pending_x: i32,
    pending_y: i32,
    phase_x: usize,
    phase_y: usize,
}

impl MouseQuadrature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, dx: i32, dy: i32) {
        self.pending_x = self.pending_x.saturating_add(dx);
        self.pending_y = self.pending_y.saturating_add(dy);
    }

    pub fn pending(&self) -> (i32, i32) {
        (self.pending_x, self.pending_y)
    }

    /// Advance one phase per axis and return the new line levels.
    pub fn step(&mut self) -> u8 {
        let (x, dx) = Self::advance(self.phase_x, self.pending_x);
        self.phase_x = x;
        self.pending_x -= dx;
        let (y, dy) = Self::advance(self.phase_y, self.pending_y);
        self.phase_y = y;
        self.pending_y -= dy;
        self.lines()
    }

    fn advance(phase: usize, pending: i32) -> (usize, i32) {
        match pending.signum() {
            1 => ((phase + 1) & 3, 1),
            -1 => ((phase + 3) & 3, -1),
            _ => (phase, 0),
        }
    }

    pub fn lines(&self) -> u8 {
        let gx = GRAY[self.phase_x];
        let gy = GRAY[self.phase_y];
        let mut lines = 0;
        if gx & 0b10 != 0 { lines |= MOUSE_XA; }
        if gx & 0b01 != 0 { lines |= MOUSE_XB; }
        if gy & 0b10 != 0 { lines |= MOUSE_YA; }
        if gy & 0b01 != 0 { lines |= MOUSE_YB; }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> Ports {
        Ports::new(Arc::new(InputLatch::new()))
    }

    #[test]
    fn test_unconnected_inputs_read_high() {
        let p = ports();
        assert_eq!(p.read(P1), Some(0xFF));
        assert_eq!(p.read(P2), Some(0xFF));
        assert_eq!(p.read(P3), Some(0xFF));
        assert_eq!(p.read(P4), Some(0xFF));
    }

    #[test]
    fn test_output_pins_read_latch() {
        let mut p = ports();
        p.write(DDR1, 0x0F);
        p.write(P1, 0x05);
        assert_eq!(p.read(P1), Some(0xF5));
    }

    #[test]
    fn test_matrix_scan_port3_column() {
        let mut p = ports();
        p.input().set_key(2, 5, true);
        // Column 2 = port 3 bit 3
        p.write(DDR3, 0xFE);
        p.write(P3, !0x08);
        assert_eq!(p.selected_columns(), 1 << 2);
        assert_eq!(p.read(P1), Some(!(1 << 5)));
        // Different column selected: row released
        p.write(P3, !0x10);
        assert_eq!(p.read(P1), Some(0xFF));
    }

    #[test]
    fn test_matrix_scan_port4_column() {
        let mut p = ports();
        p.input().set_key(9, 0, true);
        p.write(DDR4, 0xFF);
        p.write(P4, !0x04);
        assert_eq!(p.selected_columns(), 1 << 9);
        assert_eq!(p.read(P1), Some(0xFE));
        p.input().set_key(9, 0, false);
        assert_eq!(p.read(P1), Some(0xFF));
    }

    #[test]
    fn test_joysticks_active_low() {
        let p = ports();
        p.input().set_joystick(0, JOY_UP | JOY_RIGHT);
        p.input().set_joystick(1, JOY_DOWN);
        assert_eq!(p.read(P4), Some(0xD6));
        p.input().set_fire(1, true);
        assert_eq!(p.read(P2), Some(0xFB));
    }

    #[test]
    fn test_mouse_mode_uses_quadrature_lines() {
        let p = ports();
        p.input().set_mouse_mode(true);
        p.input().set_mouse_lines(MOUSE_XA | MOUSE_YB);
        assert_eq!(p.read(P4), Some(0xF0 | MOUSE_XA | MOUSE_YB));
    }

    #[test]
    fn test_quadrature_steps_one_phase_per_tick() {
        let mut q = MouseQuadrature::new();
        q.accumulate(2, -1);
        let first = q.step();
        assert_eq!(first & (MOUSE_XA | MOUSE_XB), MOUSE_XB);
        assert_eq!(first & (MOUSE_YA | MOUSE_YB), MOUSE_YA);
        let second = q.step();
        assert_eq!(second & (MOUSE_XA | MOUSE_XB), MOUSE_XA | MOUSE_XB);
        assert_eq!(second & (MOUSE_YA | MOUSE_YB), MOUSE_YA);
        assert_eq!(q.pending(), (0, 0));
        assert_eq!(q.step(), second);
    }

    #[test]
    fn test_out_of_range_key_ignored() {
        let latch = InputLatch::new();
        latch.set_key(KEY_COLUMNS, 0, true);
        latch.set_key(0, KEY_ROWS, true);
        assert_eq!(latch.rows_for(0x7FFF), 0);
    }
}
