//! ARM architecture backend.
//!
//! Implements the two supported relocation encodings. ARM instruction words
//! are stored big-endian in atom code blocks, so the patched field always
//! lives in a `u32` read and written with big-endian byte order.

use super::Architecture;
use anyhow::{bail, Result};

use crate::atom::AddressType;

/// Load/store "add offset to base" flag, bit 23 of the instruction word.
const UP_BIT: u32 = 1 << 23;

/// The ARM pipeline reads two instructions ahead; branch offsets are
/// encoded relative to PC + 8.
const PIPELINE_OFFSET: i64 = 8;

/// The ARM architecture backend.
pub struct Arm;

impl Architecture for Arm {
    fn apply_relocation(
        &self,
        address_type: AddressType,
        offset: u32,
        p: u32,
        s: u32,
        code: &mut [u8],
    ) -> Result<()> {
        let offset = offset as usize;
        if offset + 4 > code.len() {
            bail!("Relocation offset out of bounds at 0x{offset:X}.");
        }
        let word = u32::from_be_bytes(code[offset..offset + 4].try_into().unwrap());

        let patched = match address_type {
            AddressType::ArmOffset12 => {
                let delta = s as i64 - p as i64;
                let magnitude = delta.unsigned_abs();
                if magnitude > 0xFFF {
                    bail!(
                        "Relocation overflow at 0x{p:X}: displacement 0x{magnitude:X} exceeds the 12 bit offset field."
                    );
                }
                let mut word = (word & !0xFFF) | magnitude as u32;
                if delta >= 0 {
                    word |= UP_BIT;
                } else {
                    word &= !UP_BIT;
                }
                word
            }
            AddressType::ArmTargetAddress => {
                let words = (s as i64 - p as i64 - PIPELINE_OFFSET) / 4;
                if !(-(1 << 23)..(1 << 23)).contains(&words) {
                    bail!(
                        "Relocation overflow at 0x{p:X}: branch offset of 0x{:X} words exceeds the 24 bit field.",
                        words.unsigned_abs(),
                    );
                }
                // Low three bytes carry the word offset; the opcode byte
                // stays untouched.
                (word & 0xFF00_0000) | (words as u32 & 0x00FF_FFFF)
            }
        };

        code[offset..offset + 4].copy_from_slice(&patched.to_be_bytes());
        Ok(())
    }
}
