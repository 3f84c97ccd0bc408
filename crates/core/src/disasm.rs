//! HD6301 disassembler.
//!
//! Formats the instruction at an address using the dispatch table's
//! mnemonic and addressing mode, in Motorola syntax (`LDAA #$12`,
//! `STD $80`, `JMP $10,X`, `AIM #$FE,$03`). Reads memory without side
//! effects, so it is safe to call on the register window. Used for crash
//! reports and per-instruction tracing.

use crate::memory::Memory;
use crate::opcodes::{self, Mode};

/// Disassemble the instruction at `pc`. Returns the text and its length in bytes.
pub fn disassemble(mem: &Memory, pc: u16) -> (String, u16) {
    let entry = opcodes::lookup(mem.read_raw(pc));
    let b1 = mem.read_raw(pc.wrapping_add(1));
    let b2 = mem.read_raw(pc.wrapping_add(2));
    let name = entry.mnemonic;
    let text = match entry.mode {
        Mode::Inherent => {
            if entry.op == opcodes::Op::Illegal {
                format!(".db ${:02X}", mem.read_raw(pc))
            } else {
                name.to_string()
            }
        }
        Mode::Imm8 => format!("{} #${:02X}", name, b1),
        Mode::Imm16 => format!("{} #${:02X}{:02X}", name, b1, b2),
        Mode::Direct => format!("{} ${:02X}", name, b1),
        Mode::Indexed => format!("{} ${:02X},X", name, b1),
        Mode::Extended => format!("{} ${:02X}{:02X}", name, b1, b2),
        Mode::Relative => {
            let target = pc.wrapping_add(2).wrapping_add(b1 as i8 as i16 as u16);
            format!("{} ${:04X}", name, target)
        }
        Mode::BitDirect => format!("{} #${:02X},${:02X}", name, b1, b2),
        Mode::BitIndexed => format!("{} #${:02X},${:02X},X", name, b1, b2),
    };
    (text, entry.mode.len())
}

/// Format the CC byte as "HINZVC" (lowercase = clear, UPPER = set).
pub fn format_cc(cc: u8) -> String {
    let flags = ['H', 'I', 'N', 'Z', 'V', 'C'];
    flags
        .iter()
        .enumerate()
        .map(|(i, &f)| if cc & (1 << (5 - i)) != 0 { f } else { f.to_ascii_lowercase() })
        .collect()
}

/// Disassemble `[start, end)`.
///
/// Returns lines of `"0xAAAA: BYTES     MNEMONIC"`.
pub fn disassemble_range(mem: &Memory, start: u16, end: u16) -> Vec<String> {
    let mut lines = Vec::new();
    let mut addr = start as u32;
    while addr < end as u32 {
        let pc = addr as u16;
        let (asm, len) = disassemble(mem, pc);
        let bytes: Vec<String> = (0..len)
            .map(|i| format!("{:02X}", mem.read_raw(pc.wrapping_add(i))))
            .collect();
        lines.push(format!("0x{:04X}: {:<9} {}", pc, bytes.join(" "), asm));
        addr += len as u32;
    }
    lines
}
