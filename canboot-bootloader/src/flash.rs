// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash store backed by the RP2040 ROM routines.
//!
//! On RP2040, flash operations (erase/program) require disabling XIP first.
//! The full sequence is:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! All code executing during steps 1-5 must run from RAM, not flash.
//! We use `#[link_section = ".data"]` to place critical functions in RAM,
//! and pre-resolve all ROM function pointers at init time.

use canboot_common::storage::{
    PersistentStore, StoreError, APP_BASE, FLASH_BASE, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE,
};

/// Size of the external QSPI flash.
const FLASH_SIZE: u32 = 2 * 1024 * 1024;
const FLASH_END: u32 = FLASH_BASE + FLASH_SIZE;

/// Block erase command used by `flash_range_erase`.
const BLOCK_ERASE_CMD: u8 = 0x20;

// ROM function pointer types
type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// ROM function pointers, resolved once at init from the ROM table.
/// Stored in static RAM so RAM-resident functions can call them without
/// accessing flash-based code.
static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// Look up a ROM function by its two-character tag.
/// ROM table pointer at 0x14 and lookup function at 0x18 are 16-bit halfword pointers.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Initialize ROM flash function pointers. Must be called once before any flash operations.
/// This performs ROM table lookups which require XIP to be active.
pub fn init() {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
        ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
        ROM_FLASH_RANGE_ERASE = core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
        ROM_FLASH_RANGE_PROGRAM =
            core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
        ROM_FLASH_FLUSH_CACHE = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
        ROM_FLASH_ENTER_CMD_XIP =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
    }
}

/// Erase flash at the given flash-relative offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// The `init()` function must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_erase(offset: u32, size: u32) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, size as usize, FLASH_SECTOR_SIZE, BLOCK_ERASE_CMD);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Program flash at the given flash-relative offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// The `init()` function must have been called first and `data` must not
/// point into flash.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_program(offset: u32, data: *const u8, len: usize) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_PROGRAM(offset, data, len);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Writable part of the flash: everything above the bootloader image.
fn check_range(address: u32, len: u32) -> Result<(), StoreError> {
    let end = address.checked_add(len).ok_or(StoreError::OutOfRange)?;
    if address < APP_BASE || end > FLASH_END {
        return Err(StoreError::OutOfRange);
    }
    Ok(())
}

/// Handle to the on-board flash. Requires [`init`] to have run.
pub struct RomFlash;

impl PersistentStore for RomFlash {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        let end = address
            .checked_add(buf.len() as u32)
            .ok_or(StoreError::OutOfRange)?;
        if address < FLASH_BASE || end > FLASH_END {
            return Err(StoreError::OutOfRange);
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((address + i as u32) as *const u8).read_volatile() };
        }
        Ok(())
    }

    fn erase(&mut self, address: u32, len: u32) -> Result<(), StoreError> {
        check_range(address, len)?;
        if address % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err(StoreError::Misaligned);
        }
        unsafe { flash_erase(address - FLASH_BASE, len) };
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), StoreError> {
        let len = data.len() as u32;
        check_range(address, len)?;
        if address % FLASH_PAGE_SIZE != 0 || len % FLASH_PAGE_SIZE != 0 {
            return Err(StoreError::Misaligned);
        }
        // The source is read while XIP is down.
        let src = data.as_ptr() as u32;
        if (FLASH_BASE..FLASH_END).contains(&src) {
            return Err(StoreError::OutOfRange);
        }
        unsafe { flash_program(address - FLASH_BASE, data.as_ptr(), data.len()) };
        Ok(())
    }
}
