//! Board configuration.
//!
//! Everything the driver loop and serial bridge need to size themselves
//! lives here. Values are plain data so a frontend can build a `Config`
//! from command-line flags, and [`Config::validate`] runs once before any
//! buffer is allocated.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// How the execution engine treats a program counter outside the
/// executable regions and undefined opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineMode {
    /// Validate the PC before each fetch and halt with a crash report on
    /// an illegal opcode or a PC outside internal RAM / ROM.
    Strict,
    /// Skip validation. Undefined opcodes run as two-cycle no-ops.
    #[default]
    Fast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: EngineMode,
    /// Emulated cycles per driver iteration (1000 = 1 ms at 1 MHz)
    pub batch_cycles: u32,
    /// Period of the I/O core tick in milliseconds
    pub io_tick_ms: u64,
    /// Host receive ring size, including the one reserved slot
    pub ring_capacity: usize,
    /// Software overflow queue size, including the one reserved slot
    pub overflow_capacity: usize,
    /// Maximum wait for the emulation core to acknowledge a pause
    pub pause_timeout_ms: u64,
    /// Spin iterations the emulation core burns per paused iteration
    pub pause_spin: u32,
    /// I/O ticks without heartbeat progress before a stall is reported
    pub stall_ticks: u32,
    /// Log every executed instruction at TRACE level
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: EngineMode::Fast,
            batch_cycles: 1000,
            io_tick_ms: 10,
            ring_capacity: 256,
            overflow_capacity: 64,
            pause_timeout_ms: 50,
            pause_spin: 64,
            stall_ticks: 50,
            trace: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        check_capacity("ring", self.ring_capacity)?;
        check_capacity("overflow queue", self.overflow_capacity)?;
        if self.batch_cycles == 0 {
            return Err(CoreError::Config("batch_cycles must be non-zero".into()));
        }
        if self.io_tick_ms == 0 {
            return Err(CoreError::Config("io_tick_ms must be non-zero".into()));
        }
        if self.pause_timeout_ms == 0 {
            return Err(CoreError::Config("pause_timeout_ms must be non-zero".into()));
        }
        if self.stall_ticks == 0 {
            return Err(CoreError::Config("stall_ticks must be non-zero".into()));
        }
        Ok(())
    }
}

pub(crate) fn check_capacity(name: &'static str, value: usize) -> Result<()> {
    if value < 2 || !value.is_power_of_two() {
        return Err(CoreError::Capacity { name, value });
    }
    Ok(())
}
