// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host fakes shared by the integration tests.

#![allow(dead_code)]

use canboot_common::checksum::{ChecksumUnit, CHECKSUM_POLY};
use canboot_common::codec::FRAME_LEN;
use canboot_common::protocol::{Acknowledge, MessageKind};
use canboot_common::storage::{PersistentStore, StoreError};
use canboot_common::transport::{BusTransport, SendError};

// --- Persistent store ---

/// RAM-backed flash with erase-to-0xFF semantics and fault injection.
pub struct RamFlash {
    pub base: u32,
    pub mem: Vec<u8>,
    pub erases: Vec<(u32, u32)>,
    pub programs: Vec<(u32, usize)>,
    /// Fail the next N erase calls.
    pub fail_erases: u32,
    /// Fail every erase of the sector starting at this address.
    pub fail_erase_at: Option<u32>,
    /// Fail the next N program calls.
    pub fail_programs: u32,
    /// Fail every program of the block starting at this address.
    pub fail_program_at: Option<u32>,
    /// Flip one bit of every programmed block.
    pub corrupt_writes: bool,
    /// Fail every read.
    pub fail_reads: bool,
}

impl RamFlash {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            mem: vec![0xFF; size],
            erases: Vec::new(),
            programs: Vec::new(),
            fail_erases: 0,
            fail_erase_at: None,
            fail_programs: 0,
            fail_program_at: None,
            corrupt_writes: false,
            fail_reads: false,
        }
    }

    fn range(&self, address: u32, len: usize) -> Result<core::ops::Range<usize>, StoreError> {
        let start = address
            .checked_sub(self.base)
            .ok_or(StoreError::OutOfRange)? as usize;
        let end = start + len;
        if end > self.mem.len() {
            return Err(StoreError::OutOfRange);
        }
        Ok(start..end)
    }

    /// Fresh fake holding the same content, with faults and logs cleared.
    pub fn clone_flash(&self) -> Self {
        let mut copy = Self::new(self.base, self.mem.len());
        copy.mem = self.mem.clone();
        copy
    }

    pub fn slice(&self, address: u32, len: usize) -> &[u8] {
        let start = (address - self.base) as usize;
        &self.mem[start..start + len]
    }
}

impl PersistentStore for RamFlash {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        if self.fail_reads {
            return Err(StoreError::Hardware);
        }
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn erase(&mut self, address: u32, len: u32) -> Result<(), StoreError> {
        if self.fail_erases > 0 {
            self.fail_erases -= 1;
            return Err(StoreError::Hardware);
        }
        if self.fail_erase_at == Some(address) {
            return Err(StoreError::Hardware);
        }
        let range = self.range(address, len as usize)?;
        self.mem[range].fill(0xFF);
        self.erases.push((address, len));
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_programs > 0 {
            self.fail_programs -= 1;
            return Err(StoreError::Timeout);
        }
        if self.fail_program_at == Some(address) {
            return Err(StoreError::Timeout);
        }
        let range = self.range(address, data.len())?;
        let start = range.start;
        self.mem[range].copy_from_slice(data);
        if self.corrupt_writes && !data.is_empty() {
            self.mem[start] ^= 0x01;
        }
        self.programs.push((address, data.len()));
        Ok(())
    }
}

// --- Bus transport ---

/// Transport that records every frame and reception toggle.
#[derive(Default)]
pub struct RecordingBus {
    pub sent: Vec<(u16, [u8; FRAME_LEN])>,
    pub reception: Vec<bool>,
    pub busy: bool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.reception.clear();
    }

    /// Frames sent with identifier `base_id + kind`.
    pub fn frames(&self, base_id: u16, kind: MessageKind) -> Vec<[u8; FRAME_LEN]> {
        let id = base_id + u16::from(kind.code());
        self.sent
            .iter()
            .filter(|(sent_id, _)| *sent_id == id)
            .map(|(_, payload)| *payload)
            .collect()
    }

    pub fn acks(&self, base_id: u16) -> Vec<Acknowledge> {
        self.frames(base_id, MessageKind::Acknowledge)
            .iter()
            .map(|p| Acknowledge::decode(p).unwrap())
            .collect()
    }

    pub fn last_ack(&self, base_id: u16) -> Option<Acknowledge> {
        self.acks(base_id).last().copied()
    }
}

impl BusTransport for RecordingBus {
    fn send(&mut self, id: u16, payload: &[u8; FRAME_LEN]) -> Result<(), SendError> {
        if self.busy {
            return Err(SendError::Busy);
        }
        self.sent.push((id, *payload));
        Ok(())
    }

    fn set_reception(&mut self, enabled: bool) {
        self.reception.push(enabled);
    }
}

// --- Checksum unit ---

/// Bit-serial CRC unit that consumes `bytes_per_poll` bytes on each poll,
/// standing in for a DMA-fed hardware block.
pub struct BitSerialUnit {
    data: Vec<u8>,
    pos: usize,
    crc: u64,
    pub bytes_per_poll: usize,
    pub starts: u32,
}

impl BitSerialUnit {
    pub fn new(bytes_per_poll: usize) -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
            crc: 0,
            bytes_per_poll,
            starts: 0,
        }
    }
}

impl ChecksumUnit for BitSerialUnit {
    fn start(&mut self, data: &[u8], root: u64) {
        self.data = data.to_vec();
        self.pos = 0;
        self.crc = root;
        self.starts += 1;
    }

    fn poll(&mut self) -> Option<u64> {
        let end = (self.pos + self.bytes_per_poll).min(self.data.len());
        for &byte in &self.data[self.pos..end] {
            self.crc ^= u64::from(byte) << 56;
            for _ in 0..8 {
                self.crc = if self.crc & (1 << 63) != 0 {
                    (self.crc << 1) ^ CHECKSUM_POLY
                } else {
                    self.crc << 1
                };
            }
        }
        self.pos = end;
        (self.pos == self.data.len()).then_some(self.crc)
    }
}

// --- Data ---

/// Deterministic pseudo-random bytes (xorshift32).
pub fn pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
