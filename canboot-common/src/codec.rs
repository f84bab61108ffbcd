// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bit-level signal codec for 8-byte bus frames.
//!
//! A frame is handled as a `u64`. Two byte orderings map it to the payload:
//! - `Direct`: payload byte `i` holds frame bits `8i..8i+7` (little-endian).
//! - `Reflected`: payload byte `i` holds frame bits `(7-i)*8..(7-i)*8+7`
//!   (big-endian).
//!
//! For `Direct` fields `bit_start` is the least-significant bit of the field.
//! For `Reflected` fields `bit_start` is the most-significant bit, numbered in
//! payload order (byte `b / 8`, bit `b % 8`), and the field extends towards
//! the end of the payload.

use crate::error::{Error, Result};

/// Payload length of every bus frame.
pub const FRAME_LEN: usize = 8;

/// Width of a frame in bits.
pub const FRAME_BITS: u32 = 64;

/// Byte ordering of a frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ByteOrder {
    Direct,
    Reflected,
}

/// Mask covering the low `bit_length` bits. A 64-bit length never shifts.
fn mask(bit_length: u32) -> u64 {
    if bit_length >= FRAME_BITS {
        u64::MAX
    } else {
        (1u64 << bit_length) - 1
    }
}

/// Map a payload-order bit number onto the frame's bit numbering (and back,
/// the mapping is an involution).
pub fn reflect(bit: u32) -> u32 {
    8 * (7 - bit / 8) + bit % 8
}

/// Resolve the least-significant frame bit of a field.
pub fn field_position(bit_start: u32, bit_length: u32, order: ByteOrder) -> Result<u32> {
    if bit_length == 0 || bit_length > FRAME_BITS || bit_start >= FRAME_BITS {
        return Err(Error::InvalidArgument);
    }

    let position = match order {
        ByteOrder::Direct => bit_start,
        ByteOrder::Reflected => reflect(bit_start)
            .checked_sub(bit_length - 1)
            .ok_or(Error::InvalidArgument)?,
    };

    if position + bit_length > FRAME_BITS {
        return Err(Error::InvalidArgument);
    }
    Ok(position)
}

/// Write `value` into the field and return the updated frame.
///
/// Bits of `frame` outside the field are preserved. A value wider than the
/// field is rejected.
pub fn pack_field(
    frame: u64,
    bit_start: u32,
    bit_length: u32,
    value: u64,
    order: ByteOrder,
) -> Result<u64> {
    let position = field_position(bit_start, bit_length, order)?;
    let field_mask = mask(bit_length);
    if value & !field_mask != 0 {
        return Err(Error::InvalidArgument);
    }

    let cleared = frame & !(field_mask << position);
    Ok(cleared | (value << position))
}

/// Read the field out of `frame`.
pub fn extract_field(frame: u64, bit_start: u32, bit_length: u32, order: ByteOrder) -> Result<u64> {
    let position = field_position(bit_start, bit_length, order)?;
    Ok((frame >> position) & mask(bit_length))
}

/// Serialize a frame into its 8-byte payload.
pub fn frame_to_bytes(frame: u64, order: ByteOrder) -> [u8; FRAME_LEN] {
    match order {
        ByteOrder::Direct => frame.to_le_bytes(),
        ByteOrder::Reflected => frame.to_be_bytes(),
    }
}

/// Parse an 8-byte payload into a frame.
pub fn bytes_to_frame(bytes: &[u8; FRAME_LEN], order: ByteOrder) -> u64 {
    match order {
        ByteOrder::Direct => u64::from_le_bytes(*bytes),
        ByteOrder::Reflected => u64::from_be_bytes(*bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_every_fitting_field() {
        for order in [ByteOrder::Direct, ByteOrder::Reflected] {
            for bit_length in 1..=FRAME_BITS {
                for bit_start in 0..FRAME_BITS {
                    if field_position(bit_start, bit_length, order).is_err() {
                        continue;
                    }
                    let value = 0xA5C3_9617_E24B_D80Fu64 & mask(bit_length);
                    let frame = pack_field(0, bit_start, bit_length, value, order).unwrap();
                    let back = extract_field(frame, bit_start, bit_length, order).unwrap();
                    assert_eq!(back, value, "{:?} start={} len={}", order, bit_start, bit_length);
                }
            }
        }
    }

    #[test]
    fn test_reflected_msb_52_len_13_converts_to_position_0() {
        // MSB at payload byte 6 bit 4, 13 bits wide: ends on bit 0 of the frame.
        assert_eq!(field_position(52, 13, ByteOrder::Reflected), Ok(0));
    }

    #[test]
    fn test_reflected_msb_53_len_13_converts_to_position_1() {
        // reflect(53) - (13 - 1) = 13 - 12.
        assert_eq!(reflect(53), 13);
        assert_eq!(field_position(53, 13, ByteOrder::Reflected), Ok(1));
    }

    #[test]
    fn test_full_width_reflected_field_is_whole_frame() {
        assert_eq!(field_position(7, 64, ByteOrder::Reflected), Ok(0));
        let frame = pack_field(0, 7, 64, u64::MAX, ByteOrder::Reflected).unwrap();
        assert_eq!(frame, u64::MAX);
    }

    #[test]
    fn test_full_width_direct_field() {
        let frame = pack_field(0, 0, 64, 0x0123_4567_89AB_CDEF, ByteOrder::Direct).unwrap();
        assert_eq!(extract_field(frame, 0, 64, ByteOrder::Direct), Ok(0x0123_4567_89AB_CDEF));
    }

    #[test]
    fn test_invalid_arguments() {
        assert_eq!(field_position(0, 0, ByteOrder::Direct), Err(Error::InvalidArgument));
        assert_eq!(field_position(0, 65, ByteOrder::Direct), Err(Error::InvalidArgument));
        assert_eq!(field_position(64, 1, ByteOrder::Direct), Err(Error::InvalidArgument));
        assert_eq!(field_position(60, 8, ByteOrder::Direct), Err(Error::InvalidArgument));
        // Byte 7 bit 0 is the last frame byte's lowest bit: nothing fits below it.
        assert_eq!(field_position(56, 2, ByteOrder::Reflected), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_pack_rejects_oversized_value() {
        assert_eq!(
            pack_field(0, 0, 4, 0x10, ByteOrder::Direct),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_pack_preserves_neighbouring_bits() {
        let frame = pack_field(u64::MAX, 8, 8, 0, ByteOrder::Direct).unwrap();
        assert_eq!(frame, 0xFFFF_FFFF_FFFF_00FF);
    }

    #[test]
    fn test_byte_orders() {
        let frame = 0x0102_0304_0506_0708;
        assert_eq!(frame_to_bytes(frame, ByteOrder::Direct), [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(frame_to_bytes(frame, ByteOrder::Reflected), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes_to_frame(&[1, 2, 3, 4, 5, 6, 7, 8], ByteOrder::Reflected), frame);
    }

    #[test]
    fn test_reflected_field_reads_payload_big_endian() {
        let payload = [0x00, 0x00, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF];
        let frame = bytes_to_frame(&payload, ByteOrder::Reflected);
        assert_eq!(extract_field(frame, 7, 32, ByteOrder::Reflected), Ok(0x1234));
        assert_eq!(extract_field(frame, 39, 32, ByteOrder::Reflected), Ok(0xDEAD_BEEF));
    }
}
