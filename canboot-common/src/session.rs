// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Transfer session value and protocol state enumerations.
//!
//! `TransferSession` is a plain `Copy` value: taking a snapshot is a copy and
//! rolling back is an assignment, so a failed sector commit can never leave a
//! half-updated session behind.

use crate::metadata::VECTOR_TABLE_WORDS;

/// Bytes carried by one loop (one data-chunk message).
pub const LOOP_BYTES: u32 = 8;

/// Mutable state of one firmware transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSession {
    pub total_loops: u32,
    pub current_loop: u32,
    pub program_length: u32,
    pub program_start_address: u32,
    pub program_current_address: u32,
    pub current_sector_address: u32,
    pub received_checksum: u64,
    /// Chain root over the sectors committed so far.
    pub accumulated_checksum: u64,
    /// End of the last chunk written into the active sector buffer.
    pub sector_buffer_cursor: u32,
    pub vector_table_words: [u64; VECTOR_TABLE_WORDS],
    pub vector_table_checksum: u64,
    pub received_vector_word_count: u8,
}

impl TransferSession {
    /// Start a transfer of `program_length` bytes at `start_address`.
    pub fn begin(start_address: u32, program_length: u32, total_loops: u32) -> Self {
        Self {
            total_loops,
            program_length,
            program_start_address: start_address,
            program_current_address: start_address,
            current_sector_address: start_address,
            ..Self::default()
        }
    }

    pub fn is_last_loop(&self) -> bool {
        self.total_loops != 0 && self.current_loop == self.total_loops
    }

    /// Absolute address of the first byte carried by the current loop.
    pub fn loop_address(&self) -> u32 {
        self.program_start_address + self.current_loop.saturating_sub(1) * LOOP_BYTES
    }

    /// True once at least one sector has been written for this transfer.
    pub fn has_committed_sector(&self) -> bool {
        self.current_sector_address != self.program_start_address
    }

    pub fn vector_words_complete(&self) -> bool {
        usize::from(self.received_vector_word_count) == VECTOR_TABLE_WORDS
    }

    pub fn clear_vector_words(&mut self) {
        self.vector_table_words = [0; VECTOR_TABLE_WORDS];
        self.vector_table_checksum = 0;
        self.received_vector_word_count = 0;
    }
}

/// Fine-grained protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolState {
    #[default]
    Idle,
    WaitForInfo,
    WaitForLoops,
    ReceivedLoopNumber,
    ReceivedData,
    ReceivedChecksum,
    FinishedValidation,
    FinishedVectorTransfer,
    ValidatedVectorTable,
    Error,
    ResetRequested,
    RunRequested,
}

/// Coarse phase derived from [`ProtocolState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootPhase {
    Wait,
    Load,
    Run,
    Reset,
    Error,
}

impl ProtocolState {
    /// Wire code used by the fsm-state broadcast.
    pub fn code(self) -> u8 {
        match self {
            ProtocolState::Idle => 0,
            ProtocolState::WaitForInfo => 1,
            ProtocolState::WaitForLoops => 2,
            ProtocolState::ReceivedLoopNumber => 3,
            ProtocolState::ReceivedData => 4,
            ProtocolState::ReceivedChecksum => 5,
            ProtocolState::FinishedValidation => 6,
            ProtocolState::FinishedVectorTransfer => 7,
            ProtocolState::ValidatedVectorTable => 8,
            ProtocolState::Error => 9,
            ProtocolState::ResetRequested => 10,
            ProtocolState::RunRequested => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let state = match code {
            0 => ProtocolState::Idle,
            1 => ProtocolState::WaitForInfo,
            2 => ProtocolState::WaitForLoops,
            3 => ProtocolState::ReceivedLoopNumber,
            4 => ProtocolState::ReceivedData,
            5 => ProtocolState::ReceivedChecksum,
            6 => ProtocolState::FinishedValidation,
            7 => ProtocolState::FinishedVectorTransfer,
            8 => ProtocolState::ValidatedVectorTable,
            9 => ProtocolState::Error,
            10 => ProtocolState::ResetRequested,
            11 => ProtocolState::RunRequested,
            _ => return None,
        };
        Some(state)
    }

    pub fn phase(self) -> BootPhase {
        match self {
            ProtocolState::Idle => BootPhase::Wait,
            ProtocolState::WaitForInfo
            | ProtocolState::WaitForLoops
            | ProtocolState::ReceivedLoopNumber
            | ProtocolState::ReceivedData
            | ProtocolState::ReceivedChecksum
            | ProtocolState::FinishedValidation
            | ProtocolState::FinishedVectorTransfer
            | ProtocolState::ValidatedVectorTable => BootPhase::Load,
            ProtocolState::RunRequested => BootPhase::Run,
            ProtocolState::ResetRequested => BootPhase::Reset,
            ProtocolState::Error => BootPhase::Error,
        }
    }
}

impl BootPhase {
    pub fn code(self) -> u8 {
        match self {
            BootPhase::Wait => 0,
            BootPhase::Load => 1,
            BootPhase::Run => 2,
            BootPhase::Reset => 3,
            BootPhase::Error => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BootPhase::Wait),
            1 => Some(BootPhase::Load),
            2 => Some(BootPhase::Run),
            3 => Some(BootPhase::Reset),
            4 => Some(BootPhase::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_roundtrip() {
        for code in 0..12 {
            let state = ProtocolState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert_eq!(ProtocolState::from_code(12), None);
    }

    #[test]
    fn test_loop_address() {
        let mut session = TransferSession::begin(0x1000, 64, 8);
        session.current_loop = 1;
        assert_eq!(session.loop_address(), 0x1000);
        session.current_loop = 3;
        assert_eq!(session.loop_address(), 0x1010);
    }

    #[test]
    fn test_snapshot_is_plain_copy() {
        let mut session = TransferSession::begin(0x1000, 64, 8);
        let snapshot = session;
        session.current_loop = 5;
        session.sector_buffer_cursor = 40;
        session = snapshot;
        assert_eq!(session, TransferSession::begin(0x1000, 64, 8));
    }
}
