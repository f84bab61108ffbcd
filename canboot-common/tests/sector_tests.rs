// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Sector staging, commit guard and rollback.

mod common;

use canboot_common::checksum::{checksum64, SoftwareChecksum};
use canboot_common::sector::SectorPipeline;
use canboot_common::session::TransferSession;
use canboot_common::storage::{Region, SectorTable, APP_BASE};
use canboot_common::Error;
use common::{pattern, RamFlash};

const SECTOR: u32 = 256;

const MAP: SectorTable<1> = SectorTable::new([Region {
    start: APP_BASE,
    len: 4 * SECTOR,
    sector_size: SECTOR,
    bank: 0,
}]);

fn flash() -> RamFlash {
    RamFlash::new(APP_BASE, 4 * SECTOR as usize)
}

fn session(image: &[u8]) -> TransferSession {
    TransferSession::begin(APP_BASE, image.len() as u32, (image.len() / 8) as u32)
}

/// Stage loops `first..=last` of `image`.
fn stage_loops(
    pipeline: &mut SectorPipeline,
    session: &mut TransferSession,
    image: &[u8],
    loops: core::ops::RangeInclusive<u32>,
) {
    for n in loops {
        session.current_loop = n;
        let at = (n as usize - 1) * 8;
        pipeline.stage(session, &MAP, &image[at..at + 8]).unwrap();
    }
}

#[test]
fn test_stage_tracks_cursor_and_address() {
    let image = pattern(512, 1);
    let mut pipeline = SectorPipeline::new();
    let mut session = session(&image);
    stage_loops(&mut pipeline, &mut session, &image, 1..=3);

    assert_eq!(session.sector_buffer_cursor, 24);
    assert_eq!(session.program_current_address, APP_BASE + 24);
    assert_eq!(pipeline.buffer().staged(24), &image[..24]);
}

#[test]
fn test_restaging_a_loop_is_idempotent() {
    let image = pattern(512, 2);
    let mut pipeline = SectorPipeline::new();
    let mut session = session(&image);
    stage_loops(&mut pipeline, &mut session, &image, 1..=2);
    stage_loops(&mut pipeline, &mut session, &image, 2..=2);

    assert_eq!(session.sector_buffer_cursor, 16);
    assert_eq!(pipeline.buffer().staged(16), &image[..16]);
}

#[test]
fn test_stage_outside_active_sector_overruns() {
    let image = pattern(512, 3);
    let mut pipeline = SectorPipeline::new();
    let mut session = session(&image);
    session.current_loop = 33;
    assert_eq!(
        pipeline.stage(&mut session, &MAP, &image[256..264]),
        Err(Error::BufferOverrun)
    );
}

#[test]
fn test_unaligned_sector_address_overruns() {
    let mut session = session(&[0; 64]);
    session.current_sector_address = APP_BASE + 8;
    assert_eq!(
        SectorPipeline::active_sector(&MAP, &session),
        Err(Error::BufferOverrun)
    );
}

#[test]
fn test_commit_requires_arming() {
    let image = pattern(256, 4);
    let mut pipeline = SectorPipeline::new();
    let mut flash = flash();
    let mut session = session(&image);
    stage_loops(&mut pipeline, &mut session, &image, 1..=32);
    session.received_checksum = checksum64(&image, 0);

    let result = pipeline.commit(&mut session, &mut flash, &MAP, &mut SoftwareChecksum);
    assert_eq!(result, Ok(None));
    assert!(flash.erases.is_empty());
}

#[test]
fn test_commit_writes_and_advances() {
    let image = pattern(512, 5);
    let mut pipeline = SectorPipeline::new();
    let mut flash = flash();
    let mut session = session(&image);
    pipeline.take_snapshot(&session);
    stage_loops(&mut pipeline, &mut session, &image, 1..=32);
    session.received_checksum = checksum64(&image[..256], 0);
    pipeline.arm();

    let sector = pipeline
        .commit(&mut session, &mut flash, &MAP, &mut SoftwareChecksum)
        .unwrap()
        .unwrap();
    assert_eq!(sector.start, APP_BASE);
    assert_eq!(sector.len, SECTOR);
    assert_eq!(flash.slice(APP_BASE, 256), &image[..256]);
    assert_eq!(flash.erases, vec![(APP_BASE, SECTOR)]);

    assert_eq!(session.current_sector_address, APP_BASE + SECTOR);
    assert_eq!(session.accumulated_checksum, session.received_checksum);
    assert_eq!(session.sector_buffer_cursor, 0);
    assert_eq!(*pipeline.snapshot(), session);
    assert!(!pipeline.is_armed());

    // One-shot: a repeated commit does nothing.
    let again = pipeline.commit(&mut session, &mut flash, &MAP, &mut SoftwareChecksum);
    assert_eq!(again, Ok(None));
    assert_eq!(flash.erases.len(), 1);
}

#[test]
fn test_partial_last_sector_is_padded_with_erased_bytes() {
    let image = pattern(40, 6);
    let mut pipeline = SectorPipeline::new();
    let mut flash = flash();
    flash.mem.fill(0x00);
    let mut session = session(&image);
    stage_loops(&mut pipeline, &mut session, &image, 1..=5);
    session.received_checksum = checksum64(&image, 0);
    pipeline.arm();

    pipeline
        .commit(&mut session, &mut flash, &MAP, &mut SoftwareChecksum)
        .unwrap();
    assert_eq!(flash.slice(APP_BASE, 40), &image[..]);
    assert!(flash.slice(APP_BASE + 40, 216).iter().all(|&b| b == 0xFF));
}

#[test]
fn test_mismatch_restores_snapshot() {
    let image = pattern(256, 7);
    let mut pipeline = SectorPipeline::new();
    let mut flash = flash();
    let mut session = session(&image);
    pipeline.take_snapshot(&session);
    let before = session;
    stage_loops(&mut pipeline, &mut session, &image, 1..=32);
    session.received_checksum = checksum64(&image, 0) ^ 0x8000;
    pipeline.arm();

    let result = pipeline.commit(&mut session, &mut flash, &MAP, &mut SoftwareChecksum);
    assert_eq!(result, Err(Error::ChecksumMismatch));
    assert_eq!(session, before);
    assert!(flash.erases.is_empty());
    assert!(pipeline.buffer().staged(256).iter().all(|&b| b == 0xFF));
}

#[test]
fn test_write_failures_restore_snapshot() {
    let image = pattern(256, 8);
    for inject in 0..3 {
        let mut pipeline = SectorPipeline::new();
        let mut flash = flash();
        match inject {
            0 => flash.fail_erases = 1,
            1 => flash.fail_programs = 1,
            _ => flash.corrupt_writes = true,
        }
        let mut session = session(&image);
        pipeline.take_snapshot(&session);
        let before = session;
        stage_loops(&mut pipeline, &mut session, &image, 1..=32);
        session.received_checksum = checksum64(&image, 0);
        pipeline.arm();

        let result = pipeline.commit(&mut session, &mut flash, &MAP, &mut SoftwareChecksum);
        assert_eq!(result, Err(Error::WriteFailure), "fault {inject}");
        assert_eq!(session, before);
    }
}
