// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CAN field-device bootloader for RP2040, with the bus bridged over USB CDC.

#![no_std]
#![no_main]

mod boot;
mod bus_transport;
mod flash;
mod peripherals;

use canboot_common::checksum::SoftwareChecksum;
use canboot_common::config::BootConfig;
use canboot_common::fsm::{BootAction, Bootloader};
use canboot_common::storage::APP_SECTORS;
use defmt_rtt as _;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use panic_probe as _;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let mut p = peripherals::init();

    peripherals::blink(&mut p.led_pin, &mut p.timer, 3, 200);
    flash::init();

    let usb_bus = peripherals::init_usb(&mut p);
    let bridge = bus_transport::UsbCanBridge::new(usb_bus);

    let config = BootConfig::default().with_bootloader_vectors(boot::bootloader_vectors());
    let idle_timeout_us = u64::from(config.idle_timeout_ms) * 1_000;

    let mut bootloader = match Bootloader::new(
        config,
        flash::RomFlash,
        APP_SECTORS,
        SoftwareChecksum,
        bridge,
    ) {
        Ok(bootloader) => bootloader,
        Err(e) => defmt::panic!("bootloader configuration rejected: {}", e),
    };

    defmt::println!(
        "Application available: {}",
        bootloader.metadata().is_available()
    );
    p.led_pin.set_high().ok();
    bootloader.broadcast_status();

    let mut last_activity = p.timer.get_counter().ticks();
    loop {
        bootloader.transport_mut().poll();
        let now = p.timer.get_counter().ticks();

        let action = if let Some(frame) = bootloader.transport_mut().try_receive() {
            last_activity = now;
            bootloader.handle_frame(frame.id, &frame.data)
        } else if now.wrapping_sub(last_activity) >= idle_timeout_us {
            last_activity = now;
            bootloader.on_idle_timeout()
        } else {
            BootAction::Continue
        };

        match action {
            BootAction::Continue => {}
            BootAction::Restart => {
                defmt::println!("Restarting");
                // Let the last acknowledge leave the endpoint.
                for _ in 0..100 {
                    bootloader.transport_mut().poll();
                    p.timer.delay_ms(1u32);
                }
                cortex_m::peripheral::SCB::sys_reset();
            }
            BootAction::RunApplication(table) => {
                p.led_pin.set_low().ok();
                boot::start_application(&mut p, &table);
            }
        }
    }
}
