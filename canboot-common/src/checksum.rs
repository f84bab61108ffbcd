// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Chainable 64-bit integrity check.
//!
//! The function is CRC-64 with the ECMA-182 polynomial, zero initial value, no
//! reflection and no output XOR. With those parameters the output of one call
//! is the raw register, so feeding it back as the next call's `root` continues
//! the computation exactly where it stopped:
//!
//! `checksum64(a ++ b, r) == checksum64(b, checksum64(a, r))`

use crc::{Crc, CRC_64_ECMA_182};

use crate::error::{Error, Result};

/// Generator polynomial (normal form).
pub const CHECKSUM_POLY: u64 = 0x42F0_E1EB_A9EA_3693;

/// Root of a fresh chain.
pub const CHECKSUM_ROOT: u64 = 0;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Software reference implementation.
pub fn checksum64(data: &[u8], root: u64) -> u64 {
    let mut digest = CRC64.digest_with_initial(root);
    digest.update(data);
    digest.finalize()
}

/// Capability to compute [`checksum64`], possibly on dedicated hardware.
///
/// Every implementation must return exactly what [`checksum64`] returns.
pub trait ChecksumEngine {
    fn checksum64(&mut self, data: &[u8], root: u64) -> Result<u64>;
}

/// Engine backed by the table-driven software path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareChecksum;

impl ChecksumEngine for SoftwareChecksum {
    fn checksum64(&mut self, data: &[u8], root: u64) -> Result<u64> {
        Ok(checksum64(data, root))
    }
}

/// An external checksum unit that runs asynchronously to the caller.
pub trait ChecksumUnit {
    /// Seed the unit with `root` and start consuming `data`.
    fn start(&mut self, data: &[u8], root: u64);

    /// Return the result once the unit signals completion.
    fn poll(&mut self) -> Option<u64>;
}

/// Engine that offloads the computation to a [`ChecksumUnit`] and waits for
/// it for at most `poll_budget` polls.
pub struct AcceleratedChecksum<U> {
    unit: U,
    poll_budget: u32,
}

impl<U: ChecksumUnit> AcceleratedChecksum<U> {
    pub fn new(unit: U, poll_budget: u32) -> Self {
        Self { unit, poll_budget }
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn into_unit(self) -> U {
        self.unit
    }
}

impl<U: ChecksumUnit> ChecksumEngine for AcceleratedChecksum<U> {
    fn checksum64(&mut self, data: &[u8], root: u64) -> Result<u64> {
        self.unit.start(data, root);
        for _ in 0..self.poll_budget {
            if let Some(value) = self.unit.poll() {
                return Ok(value);
            }
        }
        warn!("checksum unit timed out after {} polls", self.poll_budget);
        Err(Error::ChecksumTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(checksum64(b"123456789", CHECKSUM_ROOT), 0x6C40_DF5F_0B49_7347);
    }

    #[test]
    fn test_empty_input_returns_root() {
        assert_eq!(checksum64(&[], 0xDEAD_BEEF_0000_0001), 0xDEAD_BEEF_0000_0001);
    }

    #[test]
    fn test_chain_of_two() {
        let whole = checksum64(b"123456789", 0);
        let head = checksum64(b"1234", 0);
        assert_eq!(checksum64(b"56789", head), whole);
    }

    #[test]
    fn test_software_engine_matches_function() {
        let mut engine = SoftwareChecksum;
        assert_eq!(engine.checksum64(b"abc", 7), Ok(checksum64(b"abc", 7)));
    }
}
