//! HD6301 memory map.
//!
//! The keyboard controller runs in single-chip mode, but the full 64 KiB
//! address space is backed so stray accesses stay harmless:
//!
//! | Address Range | Content                                   |
//! |---------------|-------------------------------------------|
//! | 0x0000–0x001F | On-chip registers (ports, timer, SCI)     |
//! | 0x0020–0x007F | Unused, plain storage                     |
//! | 0x0080–0x00FF | Internal RAM (128 bytes)                  |
//! | 0x0100–0xEFFF | External space, plain RAM                 |
//! | 0xF000–0xFFFF | Mask ROM (4 KiB), vectors at 0xFFF0–0xFFFF |
//!
//! Register side effects are handled on [`Ikbd`](crate::Ikbd); this type
//! only stores bytes and enforces ROM write protection.

use crate::error::{CoreError, Result};

/// Full address space size
pub const MEM_SIZE: usize = 0x1_0000;
/// Last on-chip register address
pub const REG_END: u16 = 0x001F;
/// First internal RAM address
pub const RAM_START: u16 = 0x0080;
/// Last internal RAM address
pub const RAM_END: u16 = 0x00FF;
/// First ROM address
pub const ROM_START: u16 = 0xF000;
/// ROM size: 4 KiB
pub const ROM_SIZE: usize = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Registers,
    Unused,
    InternalRam,
    External,
    Rom,
}

/// Classify an address.
#[inline(always)]
pub fn region(addr: u16) -> Region {
    match addr {
        0x0000..=REG_END => Region::Registers,
        0x0020..=0x007F => Region::Unused,
        RAM_START..=RAM_END => Region::InternalRam,
        0x0100..=0xEFFF => Region::External,
        ROM_START..=0xFFFF => Region::Rom,
    }
}

/// True when the program counter may legally point at `addr`.
///
/// Only internal RAM and ROM hold code on the keyboard controller.
#[inline(always)]
pub fn is_executable(addr: u16) -> bool {
    matches!(region(addr), Region::InternalRam | Region::Rom)
}

pub struct Memory {
    /// Backing store for the whole address space
    pub data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Memory { data: vec![0u8; MEM_SIZE] }
    }

    #[inline(always)]
    pub fn read_raw(&self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    /// Store a byte, ignoring writes into ROM. Returns false when dropped.
    #[inline(always)]
    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        if addr >= ROM_START {
            return false;
        }
        self.data[addr as usize] = value;
        true
    }

    /// Store a byte without ROM protection (firmware loading).
    #[inline(always)]
    pub fn write_raw(&mut self, addr: u16, value: u8) {
        self.data[addr as usize] = value;
    }

    /// Big-endian 16-bit read without side effects (vectors, disassembly).
    #[inline(always)]
    pub fn read_word_raw(&self, addr: u16) -> u16 {
        ((self.read_raw(addr) as u16) << 8) | self.read_raw(addr.wrapping_add(1)) as u16
    }

    /// Place a ROM image so that it ends at 0xFFFF.
    ///
    /// Images shorter than 4 KiB are right-aligned, which keeps the vector
    /// table at the top of the address space. Unused ROM bytes read 0xFF.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<usize> {
        if image.is_empty() {
            return Err(CoreError::EmptyImage);
        }
        if image.len() > ROM_SIZE {
            return Err(CoreError::ImageTooLarge { size: image.len(), max: ROM_SIZE });
        }
        let rom = &mut self.data[ROM_START as usize..];
        rom.fill(0xFF);
        let offset = ROM_SIZE - image.len();
        rom[offset..].copy_from_slice(image);
        Ok(image.len())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
