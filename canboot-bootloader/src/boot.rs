// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Vector tables and the hand-off to the application.
//!
//! A protocol vector table holds four 64-bit words. On this core they carry
//! the first four Cortex-M vectors (initial SP, Reset, NMI, HardFault), each
//! zero-extended. The application runs in place from flash at `APP_BASE`.

use canboot_common::metadata::{VectorTable, VECTOR_TABLE_WORDS};
use canboot_common::storage::{APP_BASE, APP_REGION_SIZE, FLASH_BASE};

/// The bootloader's own vectors follow the 256-byte boot2 stage.
const BOOTLOADER_VECTORS_ADDR: u32 = FLASH_BASE + 0x100;

const RAM_START: u32 = 0x2000_0000;
const RAM_END: u32 = 0x2004_2000;

/// Read the first vectors of the table at `addr`.
pub fn read_vector_table(addr: u32) -> VectorTable {
    let mut words = [0u64; VECTOR_TABLE_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = u64::from(unsafe { (addr as *const u32).add(i).read_volatile() });
    }
    VectorTable(words)
}

/// Vector table of the running bootloader, captured as backup on first
/// install.
pub fn bootloader_vectors() -> VectorTable {
    read_vector_table(BOOTLOADER_VECTORS_ADDR)
}

/// Where and how to enter the application.
struct EntryPoint {
    initial_sp: u32,
    reset_vector: u32,
}

fn is_in_ram(addr: u32) -> bool {
    (RAM_START..=RAM_END).contains(&addr)
}

fn is_in_app_region(addr: u32) -> bool {
    (APP_BASE..APP_BASE + APP_REGION_SIZE).contains(&(addr & !1))
}

/// Check an installed table against what is actually in flash.
fn entry_point(table: &VectorTable) -> Option<EntryPoint> {
    if read_vector_table(APP_BASE) != *table {
        defmt::println!("Vector table in flash differs from metadata");
        return None;
    }

    let initial_sp = u32::try_from(table.words()[0]).ok()?;
    let reset_vector = u32::try_from(table.words()[1]).ok()?;
    if !is_in_ram(initial_sp) || !is_in_app_region(reset_vector) {
        defmt::println!(
            "Invalid entry: sp=0x{:08x} reset=0x{:08x}",
            initial_sp,
            reset_vector
        );
        return None;
    }

    Some(EntryPoint {
        initial_sp,
        reset_vector,
    })
}

/// Start the application described by `table`. Restarts the device when the
/// table does not describe a runnable image.
pub fn start_application(p: &mut crate::peripherals::Peripherals, table: &VectorTable) -> ! {
    use embedded_hal::delay::DelayNs;

    let Some(entry) = entry_point(table) else {
        defmt::println!("Refusing to start application, restarting");
        p.timer.delay_ms(10u32);
        cortex_m::peripheral::SCB::sys_reset();
    };

    defmt::println!(
        "Jumping to application at 0x{:08x} (reset=0x{:08x})",
        APP_BASE,
        entry.reset_vector
    );
    p.timer.delay_ms(10u32);

    unsafe {
        prepare_for_application_handoff();
        relocate_vector_table(APP_BASE);
        jump_to_application(entry.initial_sp, entry.reset_vector)
    }
}

/// Quiesce the NVIC so the application starts without pending interrupts.
/// Clocks stay configured; the application runtime reconfigures them.
unsafe fn prepare_for_application_handoff() {
    cortex_m::interrupt::disable();

    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);

    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(base: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(base);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_application(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
