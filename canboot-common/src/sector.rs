// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Sector commit pipeline.
//!
//! Received chunks are staged in a RAM buffer covering exactly one storage
//! sector. When the peer sends the sector's checksum the buffer is hashed
//! on top of the chain root, compared, written, read back and only then
//! folded into the session. Any failure restores the session snapshot taken
//! when the sector started, so the peer can resend the sector from scratch.

use crate::checksum::ChecksumEngine;
use crate::error::{Error, Result};
use crate::session::TransferSession;
use crate::storage::{page_padded_len, PersistentStore, Sector, StorageMap, MAX_SECTOR_SIZE};

const VERIFY_CHUNK: usize = 64;

/// RAM image of the sector being received. Unwritten bytes read as erased
/// flash (0xFF).
pub struct SectorBuffer {
    data: [u8; MAX_SECTOR_SIZE],
}

impl SectorBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0xFF; MAX_SECTOR_SIZE],
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0xFF);
    }

    /// Copy `chunk` to `offset` and return the new cursor. The chunk must end
    /// inside a window of `window_len` bytes.
    pub fn write(&mut self, offset: u32, chunk: &[u8], window_len: u32) -> Result<u32> {
        let end = offset
            .checked_add(chunk.len() as u32)
            .ok_or(Error::BufferOverrun)?;
        if end > window_len || end as usize > MAX_SECTOR_SIZE {
            return Err(Error::BufferOverrun);
        }
        self.data[offset as usize..end as usize].copy_from_slice(chunk);
        Ok(end)
    }

    /// Bytes staged up to `cursor`.
    pub fn staged(&self, cursor: u32) -> &[u8] {
        &self.data[..(cursor as usize).min(MAX_SECTOR_SIZE)]
    }

    /// Staged bytes padded with erased bytes to a whole number of pages,
    /// never past `limit`.
    fn padded(&self, cursor: u32, limit: u32) -> &[u8] {
        let len = page_padded_len(cursor as usize)
            .min(limit as usize)
            .min(MAX_SECTOR_SIZE);
        &self.data[..len]
    }
}

impl Default for SectorBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sector staging, snapshot and one-shot commit guard.
pub struct SectorPipeline {
    buffer: SectorBuffer,
    snapshot: TransferSession,
    armed: bool,
}

impl SectorPipeline {
    pub fn new() -> Self {
        Self {
            buffer: SectorBuffer::new(),
            snapshot: TransferSession::default(),
            armed: false,
        }
    }

    /// Remember `session` as the point to roll back to.
    pub fn take_snapshot(&mut self, session: &TransferSession) {
        self.snapshot = *session;
    }

    pub fn snapshot(&self) -> &TransferSession {
        &self.snapshot
    }

    pub fn buffer(&self) -> &SectorBuffer {
        &self.buffer
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Drop any staged bytes and disarm the guard.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.armed = false;
    }

    /// Resolve the sector the session is currently filling.
    pub fn active_sector<M: StorageMap>(map: &M, session: &TransferSession) -> Result<Sector> {
        map.lookup(session.current_sector_address)
            .filter(|s| s.start == session.current_sector_address)
            .filter(|s| s.len as usize <= MAX_SECTOR_SIZE)
            .ok_or(Error::BufferOverrun)
    }

    /// Stage the chunk carried by the session's current loop.
    ///
    /// The destination offset follows from the loop number, so staging the
    /// same loop twice rewrites the same bytes.
    pub fn stage<M: StorageMap>(
        &mut self,
        session: &mut TransferSession,
        map: &M,
        chunk: &[u8],
    ) -> Result<()> {
        let sector = Self::active_sector(map, session)?;
        let address = session.loop_address();
        if !sector.contains(address) {
            return Err(Error::BufferOverrun);
        }

        let offset = address - sector.start;
        let cursor = self.buffer.write(offset, chunk, sector.len)?;
        session.sector_buffer_cursor = cursor;
        session.program_current_address = address + chunk.len() as u32;
        Ok(())
    }

    /// Arm the commit for the checksum message just received.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Commit the staged sector if the guard is armed.
    ///
    /// Returns `Ok(None)` when the commit already ran for this checksum
    /// message. On failure the session is restored from the snapshot and the
    /// staged bytes are dropped.
    pub fn commit<S, M, C>(
        &mut self,
        session: &mut TransferSession,
        store: &mut S,
        map: &M,
        engine: &mut C,
    ) -> Result<Option<Sector>>
    where
        S: PersistentStore,
        M: StorageMap,
        C: ChecksumEngine,
    {
        if !self.armed {
            return Ok(None);
        }
        self.armed = false;

        match self.try_commit(session, store, map, engine) {
            Ok(sector) => {
                session.accumulated_checksum = session.received_checksum;
                session.current_sector_address = sector.end();
                session.sector_buffer_cursor = 0;
                self.buffer.clear();
                self.snapshot = *session;
                Ok(Some(sector))
            }
            Err(e) => {
                *session = self.snapshot;
                self.buffer.clear();
                Err(e)
            }
        }
    }

    fn try_commit<S, M, C>(
        &self,
        session: &TransferSession,
        store: &mut S,
        map: &M,
        engine: &mut C,
    ) -> Result<Sector>
    where
        S: PersistentStore,
        M: StorageMap,
        C: ChecksumEngine,
    {
        let sector = Self::active_sector(map, session)?;
        let cursor = session.sector_buffer_cursor;
        if cursor > sector.len {
            return Err(Error::BufferOverrun);
        }

        let staged = self.buffer.staged(cursor);
        let computed = engine.checksum64(staged, session.accumulated_checksum)?;
        if computed != session.received_checksum {
            warn!(
                "sector {:#x}: checksum mismatch (expected {:#x}, computed {:#x})",
                sector.start,
                session.received_checksum,
                computed
            );
            return Err(Error::ChecksumMismatch);
        }

        store.erase(sector.start, sector.len)?;
        store.program(sector.start, self.buffer.padded(cursor, sector.len))?;
        verify(store, sector.start, staged)?;

        info!("sector {:#x}: committed {} bytes", sector.start, cursor);
        Ok(sector)
    }
}

impl Default for SectorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare storage content at `address` against `expected`.
fn verify<S: PersistentStore>(store: &mut S, address: u32, expected: &[u8]) -> Result<()> {
    let mut scratch = [0u8; VERIFY_CHUNK];
    for (i, chunk) in expected.chunks(VERIFY_CHUNK).enumerate() {
        let readback = &mut scratch[..chunk.len()];
        store.read(address + (i * VERIFY_CHUNK) as u32, readback)?;
        if readback != chunk {
            warn!("verify failed at {:#x}", address + (i * VERIFY_CHUNK) as u32);
            return Err(Error::WriteFailure);
        }
    }
    Ok(())
}
