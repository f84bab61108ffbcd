// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader configuration.

use crate::error::{Error, Result};
use crate::metadata::VectorTable;
use crate::protocol::{MessageMap, DEFAULT_BASE_ID};
use crate::storage::{StorageMap, APP_BASE, APP_REGION_SIZE, METADATA_ADDR};

/// Default time without protocol traffic before an installed image is started.
pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 5_000;

/// Static parameters of one bootloader instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Identifier of the action-request message; the other kinds follow.
    pub base_id: u16,
    /// Where the application image starts. Must be a sector boundary.
    pub program_start: u32,
    pub max_program_length: u32,
    pub metadata_address: u32,
    pub idle_timeout_ms: u32,
    /// Answer out-of-sequence messages with a negative acknowledge.
    pub nack_on_sequence_error: bool,
    /// Failed sector writes tolerated before the transfer is abandoned.
    pub write_retries: u8,
    /// The bootloader's own vector table, captured as backup on first install.
    pub bootloader_vectors: VectorTable,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            base_id: DEFAULT_BASE_ID,
            program_start: APP_BASE,
            max_program_length: APP_REGION_SIZE,
            metadata_address: METADATA_ADDR,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            nack_on_sequence_error: true,
            write_retries: 1,
            bootloader_vectors: VectorTable::EMPTY,
        }
    }
}

impl BootConfig {
    pub fn with_bootloader_vectors(mut self, table: VectorTable) -> Self {
        self.bootloader_vectors = table;
        self
    }

    /// Check the configuration against the storage map it will drive.
    pub fn validate<M: StorageMap>(&self, map: &M) -> Result<()> {
        MessageMap::new(self.base_id)?;

        if self.max_program_length == 0 || self.idle_timeout_ms == 0 {
            return Err(Error::InvalidArgument);
        }

        map.lookup(self.program_start)
            .filter(|sector| sector.start == self.program_start)
            .ok_or(Error::InvalidArgument)?;

        let program_end = self
            .program_start
            .checked_add(self.max_program_length)
            .ok_or(Error::InvalidArgument)?;
        if (self.program_start..program_end).contains(&self.metadata_address) {
            return Err(Error::InvalidArgument);
        }

        if !self.bootloader_vectors.is_valid() {
            return Err(Error::VectorTableIncomplete);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::APP_SECTORS;

    fn valid() -> BootConfig {
        BootConfig::default().with_bootloader_vectors(VectorTable([1, 2, 3, 4]))
    }

    #[test]
    fn test_default_layout_is_valid() {
        assert_eq!(valid().validate(&APP_SECTORS), Ok(()));
    }

    #[test]
    fn test_missing_bootloader_vectors() {
        assert_eq!(
            BootConfig::default().validate(&APP_SECTORS),
            Err(Error::VectorTableIncomplete)
        );
    }

    #[test]
    fn test_unaligned_program_start() {
        let config = BootConfig {
            program_start: APP_BASE + 8,
            ..valid()
        };
        assert_eq!(config.validate(&APP_SECTORS), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_metadata_inside_program_region() {
        let config = BootConfig {
            metadata_address: APP_BASE + 0x1000,
            ..valid()
        };
        assert_eq!(config.validate(&APP_SECTORS), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_zero_idle_timeout() {
        let config = BootConfig {
            idle_timeout_ms: 0,
            ..valid()
        };
        assert_eq!(config.validate(&APP_SECTORS), Err(Error::InvalidArgument));
    }
}
