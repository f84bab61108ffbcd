// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Persisted program metadata and the active/backup boot vector tables.
//!
//! On-storage layout (96 bytes, little-endian), written as one region:
//!
//! | offset | size | field                  |
//! |--------|------|------------------------|
//! | 0      | 4    | magic `0xC0DEB007`     |
//! | 4      | 4    | program length         |
//! | 8      | 4    | program start address  |
//! | 12     | 8    | program checksum       |
//! | 20     | 8    | vector table checksum  |
//! | 28     | 4    | availability flag      |
//! | 32     | 32   | backup vector table    |
//! | 64     | 32   | active vector table    |

use crate::checksum::{checksum64, ChecksumEngine, CHECKSUM_ROOT};
use crate::error::{Error, Result};
use crate::storage::{page_padded_len, PersistentStore, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE};

pub const METADATA_MAGIC: u32 = 0xC0DE_B007;

pub const VECTOR_TABLE_WORDS: usize = 4;
pub const VECTOR_TABLE_LEN: usize = VECTOR_TABLE_WORDS * 8;
pub const RECORD_LEN: usize = 28;
pub const METADATA_LEN: usize = 4 + RECORD_LEN + 2 * VECTOR_TABLE_LEN;

const RECORD_OFFSET: usize = 4;
const BACKUP_OFFSET: usize = RECORD_OFFSET + RECORD_LEN;
const ACTIVE_OFFSET: usize = BACKUP_OFFSET + VECTOR_TABLE_LEN;

const PROGRAM_READ_CHUNK: usize = 256;

// Metadata must fit one flash page so it is programmed in a single write.
const _: () = assert!(METADATA_LEN <= FLASH_PAGE_SIZE as usize);

/// Boot vector table: the addresses the processor reads at reset.
///
/// A zero word means "never captured"; such a table is invalid and is never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VectorTable(pub [u64; VECTOR_TABLE_WORDS]);

impl VectorTable {
    pub const EMPTY: Self = Self([0; VECTOR_TABLE_WORDS]);

    pub fn words(&self) -> &[u64; VECTOR_TABLE_WORDS] {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|word| *word != 0)
    }

    pub fn to_bytes(&self) -> [u8; VECTOR_TABLE_LEN] {
        let mut out = [0u8; VECTOR_TABLE_LEN];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; VECTOR_TABLE_LEN]) -> Self {
        let mut words = [0u64; VECTOR_TABLE_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw);
        }
        Self(words)
    }

    /// Checksum the peer sends after the four vector words.
    pub fn checksum(&self) -> u64 {
        checksum64(&self.to_bytes(), CHECKSUM_ROOT)
    }
}

/// Summary record of the installed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PersistedMetadata {
    pub program_length: u32,
    pub program_start_address: u32,
    pub program_checksum: u64,
    pub vector_table_checksum: u64,
    pub available: bool,
}

impl PersistedMetadata {
    fn encode_into(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.program_length.to_le_bytes());
        out[4..8].copy_from_slice(&self.program_start_address.to_le_bytes());
        out[8..16].copy_from_slice(&self.program_checksum.to_le_bytes());
        out[16..24].copy_from_slice(&self.vector_table_checksum.to_le_bytes());
        out[24..28].copy_from_slice(&u32::from(self.available).to_le_bytes());
    }

    fn decode_from(raw: &[u8]) -> Self {
        let u32_at = |at: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&raw[at..at + 4]);
            u32::from_le_bytes(b)
        };
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[at..at + 8]);
            u64::from_le_bytes(b)
        };
        Self {
            program_length: u32_at(0),
            program_start_address: u32_at(4),
            program_checksum: u64_at(8),
            vector_table_checksum: u64_at(16),
            available: u32_at(24) == 1,
        }
    }
}

/// Serialize the whole metadata region.
pub fn encode_region(
    metadata: &PersistedMetadata,
    active: &VectorTable,
    backup: &VectorTable,
) -> [u8; METADATA_LEN] {
    let mut out = [0u8; METADATA_LEN];
    out[..RECORD_OFFSET].copy_from_slice(&METADATA_MAGIC.to_le_bytes());
    metadata.encode_into(&mut out[RECORD_OFFSET..BACKUP_OFFSET]);
    out[BACKUP_OFFSET..ACTIVE_OFFSET].copy_from_slice(&backup.to_bytes());
    out[ACTIVE_OFFSET..].copy_from_slice(&active.to_bytes());
    out
}

/// Parse the metadata region. `None` when the magic sentinel is absent.
pub fn decode_region(
    raw: &[u8; METADATA_LEN],
) -> Option<(PersistedMetadata, VectorTable, VectorTable)> {
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&raw[..RECORD_OFFSET]);
    if u32::from_le_bytes(magic) != METADATA_MAGIC {
        return None;
    }

    let metadata = PersistedMetadata::decode_from(&raw[RECORD_OFFSET..BACKUP_OFFSET]);
    let mut table = [0u8; VECTOR_TABLE_LEN];
    table.copy_from_slice(&raw[BACKUP_OFFSET..ACTIVE_OFFSET]);
    let backup = VectorTable::from_bytes(&table);
    table.copy_from_slice(&raw[ACTIVE_OFFSET..]);
    let active = VectorTable::from_bytes(&table);
    Some((metadata, active, backup))
}

/// Owns the metadata region and caches its last known content.
pub struct MetadataManager<S> {
    store: S,
    address: u32,
    metadata: PersistedMetadata,
    active: VectorTable,
    backup: VectorTable,
}

impl<S: PersistentStore> MetadataManager<S> {
    /// Create a manager for the region at `address`. Call [`load`](Self::load)
    /// before relying on the cached values.
    pub fn new(store: S, address: u32) -> Self {
        Self {
            store,
            address,
            metadata: PersistedMetadata::default(),
            active: VectorTable::EMPTY,
            backup: VectorTable::EMPTY,
        }
    }

    /// Read the region. Blank or foreign data yields default metadata with
    /// no image available and no backup table.
    pub fn load(&mut self) -> PersistedMetadata {
        let mut raw = [0u8; METADATA_LEN];
        let decoded = match self.store.read(self.address, &mut raw) {
            Ok(()) => decode_region(&raw),
            Err(e) => {
                warn!("metadata read failed: {}", e);
                None
            }
        };

        match decoded {
            Some((metadata, active, backup)) => {
                info!(
                    "metadata: length={} start={:#x} available={}",
                    metadata.program_length,
                    metadata.program_start_address,
                    metadata.available
                );
                self.metadata = metadata;
                self.active = active;
                self.backup = backup;
            }
            None => {
                info!("metadata: no valid record");
                self.metadata = PersistedMetadata::default();
                self.active = VectorTable::EMPTY;
                self.backup = VectorTable::EMPTY;
            }
        }
        self.metadata
    }

    /// Write metadata and both tables as one region.
    ///
    /// Nothing is written when either table is invalid. The cache only
    /// changes once the write has been verified.
    pub fn persist(
        &mut self,
        metadata: PersistedMetadata,
        active: VectorTable,
        backup: VectorTable,
    ) -> Result<()> {
        if !active.is_valid() || !backup.is_valid() {
            warn!("refusing to persist incomplete vector table");
            return Err(Error::VectorTableIncomplete);
        }

        let image = encode_region(&metadata, &active, &backup);
        self.write_region(&image).map_err(|e| {
            error!("metadata persist failed: {}", e);
            Error::PersistFailure
        })?;

        self.metadata = metadata;
        self.active = active;
        self.backup = backup;
        Ok(())
    }

    fn write_region(&mut self, image: &[u8; METADATA_LEN]) -> Result<()> {
        let mut page = [0xFFu8; FLASH_PAGE_SIZE as usize];
        page[..METADATA_LEN].copy_from_slice(image);
        let len = page_padded_len(METADATA_LEN);

        self.store.erase(self.address, FLASH_SECTOR_SIZE)?;
        self.store.program(self.address, &page[..len])?;

        let mut readback = [0u8; METADATA_LEN];
        self.store.read(self.address, &mut readback)?;
        if &readback != image {
            return Err(Error::WriteFailure);
        }
        Ok(())
    }

    /// Fall back to the backup table and mark the image unavailable.
    ///
    /// Availability is cleared in the cache even if the write fails.
    pub fn reset_to_backup(&mut self) -> Result<()> {
        let active = if self.backup.is_valid() {
            self.backup
        } else {
            self.active
        };
        self.metadata.available = false;
        let metadata = self.metadata;
        self.persist(metadata, active, self.backup)
    }

    /// Persist the record with availability cleared, before the installed
    /// image gets overwritten. No-op when nothing runnable is installed.
    pub fn invalidate(&mut self) -> Result<()> {
        if !self.is_available() {
            return Ok(());
        }
        info!("invalidating installed image");
        let metadata = PersistedMetadata {
            available: false,
            ..self.metadata
        };
        self.persist(metadata, self.active, self.backup)
    }

    /// Recompute the checksums of the installed program and active table and
    /// compare them with the record.
    pub fn verify_program<C: ChecksumEngine>(&mut self, engine: &mut C) -> Result<()> {
        if self.active.checksum() != self.metadata.vector_table_checksum {
            warn!("active vector table does not match its checksum");
            return Err(Error::ChecksumMismatch);
        }

        let start = self.metadata.program_start_address;
        let len = self.metadata.program_length as usize;
        let mut chunk = [0u8; PROGRAM_READ_CHUNK];
        let mut root = CHECKSUM_ROOT;
        let mut offset = 0;
        while offset < len {
            let n = (len - offset).min(PROGRAM_READ_CHUNK);
            self.store.read(start + offset as u32, &mut chunk[..n])?;
            root = engine.checksum64(&chunk[..n], root)?;
            offset += n;
        }

        if root != self.metadata.program_checksum {
            warn!(
                "program checksum mismatch (expected {:#x}, computed {:#x})",
                self.metadata.program_checksum,
                root
            );
            return Err(Error::ChecksumMismatch);
        }
        Ok(())
    }

    /// Install a freshly validated application table.
    ///
    /// The first install captures `bootloader_table` as the backup; later
    /// installs keep the existing backup.
    pub fn install(
        &mut self,
        program: PersistedMetadata,
        table: VectorTable,
        bootloader_table: VectorTable,
    ) -> Result<()> {
        let backup = if self.backup.is_valid() {
            self.backup
        } else {
            info!("capturing bootloader vector table as backup");
            bootloader_table
        };
        let metadata = PersistedMetadata {
            vector_table_checksum: table.checksum(),
            available: true,
            ..program
        };
        self.persist(metadata, table, backup)
    }

    pub fn metadata(&self) -> &PersistedMetadata {
        &self.metadata
    }

    pub fn active(&self) -> &VectorTable {
        &self.active
    }

    pub fn backup(&self) -> &VectorTable {
        &self.backup
    }

    /// A validated image is installed and may be started.
    pub fn is_available(&self) -> bool {
        self.metadata.available && self.active.is_valid()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_size() {
        assert_eq!(METADATA_LEN, 96);
    }

    #[test]
    fn test_table_validity() {
        assert!(!VectorTable::EMPTY.is_valid());
        assert!(!VectorTable([1, 2, 0, 4]).is_valid());
        assert!(VectorTable([1, 2, 3, 4]).is_valid());
    }

    #[test]
    fn test_region_layout_offsets() {
        let metadata = PersistedMetadata {
            program_length: 0x11,
            program_start_address: 0x1001_0000,
            program_checksum: 0x22,
            vector_table_checksum: 0x33,
            available: true,
        };
        let raw = encode_region(&metadata, &VectorTable([5, 6, 7, 8]), &VectorTable([1, 2, 3, 4]));
        assert_eq!(&raw[0..4], &METADATA_MAGIC.to_le_bytes());
        assert_eq!(raw[4], 0x11);
        assert_eq!(&raw[8..12], &0x1001_0000u32.to_le_bytes());
        assert_eq!(raw[28], 1);
        assert_eq!(raw[32], 1); // backup word 0
        assert_eq!(raw[64], 5); // active word 0
    }

    #[test]
    fn test_decode_rejects_blank_flash() {
        assert_eq!(decode_region(&[0xFF; METADATA_LEN]), None);
    }
}
