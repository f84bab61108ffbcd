// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Persistent storage seams and the flash layout.
//!
//! The transfer engine never touches flash directly: it goes through a
//! [`PersistentStore`] for erase/program/read and a [`StorageMap`] to learn
//! which sector an address belongs to.

use crate::error::Error;

// --- Flash layout constants ---

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const APP_BASE: u32 = 0x1001_0000;
pub const APP_REGION_SIZE: u32 = 1536 * 1024; // 1.5MB application region
pub const METADATA_ADDR: u32 = 0x1019_0000;

pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: u32 = 256;

/// Largest sector the commit pipeline can buffer.
pub const MAX_SECTOR_SIZE: usize = FLASH_SECTOR_SIZE as usize;

/// Failure reported by a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    OutOfRange,
    Misaligned,
    Hardware,
    Timeout,
}

impl From<StoreError> for Error {
    fn from(_: StoreError) -> Self {
        Error::WriteFailure
    }
}

/// Raw persistent-storage primitives.
///
/// Implementations own the device timing; every call must return within a
/// bounded time.
pub trait PersistentStore {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StoreError>;
    fn erase(&mut self, address: u32, len: u32) -> Result<(), StoreError>;
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), StoreError>;
}

impl<T: PersistentStore + ?Sized> PersistentStore for &mut T {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        (**self).read(address, buf)
    }

    fn erase(&mut self, address: u32, len: u32) -> Result<(), StoreError> {
        (**self).erase(address, len)
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), StoreError> {
        (**self).program(address, data)
    }
}

/// Round a write length up to a whole number of flash pages.
pub fn page_padded_len(len: usize) -> usize {
    len.div_ceil(FLASH_PAGE_SIZE as usize) * FLASH_PAGE_SIZE as usize
}

/// One erasable unit of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sector {
    pub start: u32,
    pub len: u32,
    pub bank: u8,
}

impl Sector {
    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.start..self.end()).contains(&address)
    }
}

/// Resolves addresses to sectors. `None` means the address is not writable.
pub trait StorageMap {
    fn lookup(&self, address: u32) -> Option<Sector>;
}

impl<T: StorageMap + ?Sized> StorageMap for &T {
    fn lookup(&self, address: u32) -> Option<Sector> {
        (**self).lookup(address)
    }
}

/// A contiguous run of equally sized sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub len: u32,
    pub sector_size: u32,
    pub bank: u8,
}

impl Region {
    fn contains(&self, address: u32) -> bool {
        address >= self.start && address - self.start < self.len
    }
}

/// Static storage map built from a fixed list of regions.
#[derive(Debug, Clone, Copy)]
pub struct SectorTable<const N: usize> {
    regions: [Region; N],
}

impl<const N: usize> SectorTable<N> {
    pub const fn new(regions: [Region; N]) -> Self {
        Self { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

impl<const N: usize> StorageMap for SectorTable<N> {
    fn lookup(&self, address: u32) -> Option<Sector> {
        let region = self
            .regions
            .iter()
            .find(|r| r.sector_size != 0 && r.contains(address))?;
        let index = (address - region.start) / region.sector_size;
        let start = region.start + index * region.sector_size;
        let len = region.sector_size.min(region.start + region.len - start);
        Some(Sector {
            start,
            len,
            bank: region.bank,
        })
    }
}

/// Application region of the RP2040 board layout.
pub const APP_SECTORS: SectorTable<1> = SectorTable::new([Region {
    start: APP_BASE,
    len: APP_REGION_SIZE,
    sector_size: FLASH_SECTOR_SIZE,
    bank: 0,
}]);
