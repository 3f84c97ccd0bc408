//! HD6301 on-chip peripherals.
//!
//! Register blocks reachable through the 0x00–0x1F window:
//!
//! - [`Timer`]: free-running counter, output compare, input capture (0x08–0x0E)
//! - [`Sci`]: serial communications interface (0x10–0x13)
//! - [`Ports`]: ports 1–4 and their data-direction registers (0x00–0x07, 0x0F)
//!
//! [`InputLatch`] and [`MouseQuadrature`] sit on the host side of the
//! ports and are written by the I/O core.

pub mod timer;
pub mod sci;
pub mod ports;

pub use timer::Timer;
pub use sci::Sci;
pub use ports::{InputLatch, MouseQuadrature, Ports};

/// Interrupt vector addresses (big-endian handler address stored there)
pub const VEC_SCI: u16 = 0xFFF0;
pub const VEC_TOF: u16 = 0xFFF2;
pub const VEC_OCF: u16 = 0xFFF4;
pub const VEC_ICF: u16 = 0xFFF6;
pub const VEC_IRQ1: u16 = 0xFFF8;
pub const VEC_SWI: u16 = 0xFFFA;
pub const VEC_NMI: u16 = 0xFFFC;
pub const VEC_RESET: u16 = 0xFFFE;
