//! Intel HEX firmware loader.
//!
//! Parses Intel HEX text (`:LLAAAATT[DD...]CC`) into the 64 KiB address
//! space. Supports record types 00 (data) and 01 (EOF); extended address
//! records (02, 04) are accepted only when they select the first 64 KiB.
//! Start address records (03, 05) are ignored since the reset vector
//! decides where execution begins.

use crate::error::{CoreError, Result};
use crate::memory::{MEM_SIZE, REG_END};

/// Parse Intel HEX text and store its data bytes into `space`.
///
/// Returns the number of data bytes written. Data aimed at the on-chip
/// register window or beyond 0xFFFF is rejected, and so is a file with no
/// data records.
pub fn parse_hex(hex: &str, space: &mut [u8]) -> Result<usize> {
    let mut loaded = 0usize;
    let mut base_addr: u32 = 0;

    for (index, line) in hex.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() { continue; }
        let Some(body) = line.strip_prefix(':') else {
            continue; // skip non-hex lines
        };

        let bytes = hex_line_to_bytes(body).map_err(|e| CoreError::hex(line_no, e))?;
        if bytes.len() < 5 {
            return Err(CoreError::hex(line_no, "record too short"));
        }

        let byte_count = bytes[0] as usize;
        if bytes.len() != byte_count + 5 {
            return Err(CoreError::hex(line_no, format!(
                "length byte says {} data bytes, record has {}", byte_count, bytes.len() - 5
            )));
        }
        let addr = ((bytes[1] as u16) << 8) | bytes[2] as u16;
        let record_type = bytes[3];

        let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(CoreError::hex(line_no, format!("checksum error: sum={:02X}", sum)));
        }

        match record_type {
            0x00 => {
                let start = base_addr as usize + addr as usize;
                let end = start + byte_count;
                if end > MEM_SIZE.min(space.len()) {
                    return Err(CoreError::hex(line_no, format!("data at {:06X} beyond 64 KiB", start)));
                }
                if start <= REG_END as usize && byte_count > 0 {
                    return Err(CoreError::hex(line_no, format!("data at {:04X} overlaps on-chip registers", start)));
                }
                space[start..end].copy_from_slice(&bytes[4..4 + byte_count]);
                loaded += byte_count;
            }
            0x01 => break,
            0x02 | 0x04 => {
                if byte_count != 2 {
                    return Err(CoreError::hex(line_no, "extended address record needs 2 bytes"));
                }
                let value = ((bytes[4] as u32) << 8) | bytes[5] as u32;
                base_addr = if record_type == 0x02 { value << 4 } else { value << 16 };
                if base_addr as usize >= MEM_SIZE {
                    return Err(CoreError::hex(line_no, format!("base address {:X} beyond 64 KiB", base_addr)));
                }
            }
            0x03 | 0x05 => {}
            other => {
                return Err(CoreError::hex(line_no, format!("unknown record type {:02X}", other)));
            }
        }
    }

    if loaded == 0 {
        return Err(CoreError::EmptyImage);
    }
    Ok(loaded)
}

/// Convert hex character pairs to bytes
fn hex_line_to_bytes(hex_str: &str) -> std::result::Result<Vec<u8>, String> {
    if hex_str.len() % 2 != 0 {
        return Err("odd number of hex characters".into());
    }
    hex_str
        .as_bytes()
        .chunks(2)
        .map(|pair| -> std::result::Result<u8, String> {
            Ok((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?)
        })
        .collect()
}

fn hex_digit(c: u8) -> std::result::Result<u8, String> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(format!("invalid hex character: {}", c as char)),
    }
}
