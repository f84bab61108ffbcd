// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CAN frames bridged over USB CDC with COBS-framed postcard serialization.

use canboot_common::bridge::{BridgeFrame, FrameAccumulator, MAX_ENCODED_LEN};
use canboot_common::codec::FRAME_LEN;
use canboot_common::transport::{BusTransport, SendError};
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

const RX_BUF_SIZE: usize = 64;

/// Polls spent waiting for the host to drain the IN endpoint.
const TX_POLL_BUDGET: u32 = 1_000;

pub struct UsbCanBridge {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    rx: FrameAccumulator<MAX_ENCODED_LEN>,
    rx_buf: [u8; RX_BUF_SIZE],
    rx_pos: usize,
    rx_len: usize,
    reception: bool,
}

impl UsbCanBridge {
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let serial = SerialPort::new(usb_bus);
        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2E8A, 0x000A))
            .strings(&[StringDescriptors::default()
                .manufacturer("ADNT")
                .product("CAN Bootloader")
                .serial_number("0001")])
            .unwrap_or_else(|_| defmt::panic!("invalid USB string descriptors"))
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        Self {
            serial,
            usb_dev,
            rx: FrameAccumulator::new(),
            rx_buf: [0u8; RX_BUF_SIZE],
            rx_pos: 0,
            rx_len: 0,
            reception: true,
        }
    }

    /// Poll USB device. Must be called frequently.
    pub fn poll(&mut self) -> bool {
        self.usb_dev.poll(&mut [&mut self.serial])
    }

    /// Try to receive one bus frame.
    ///
    /// While reception is suspended the bytes stay queued, either in the USB
    /// endpoint or in the unread tail of the last read.
    pub fn try_receive(&mut self) -> Option<BridgeFrame> {
        if !self.reception {
            return None;
        }

        if self.rx_pos == self.rx_len {
            self.rx_pos = 0;
            self.rx_len = self.serial.read(&mut self.rx_buf).unwrap_or(0);
        }

        while self.rx_pos < self.rx_len {
            let byte = self.rx_buf[self.rx_pos];
            self.rx_pos += 1;
            if let Some(frame) = self.rx.push(byte) {
                return Some(frame);
            }
        }
        None
    }
}

impl BusTransport for UsbCanBridge {
    fn send(&mut self, id: u16, payload: &[u8; FRAME_LEN]) -> Result<(), SendError> {
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let encoded = BridgeFrame::new(id, *payload)
            .encode(&mut buf)
            .map_err(|_| SendError::NoMailbox)?;

        let mut offset = 0;
        let mut polls = 0;
        while offset < encoded.len() {
            match self.serial.write(&encoded[offset..]) {
                Ok(n) => offset += n,
                Err(UsbError::WouldBlock) => {
                    polls += 1;
                    if polls > TX_POLL_BUDGET {
                        return Err(SendError::Busy);
                    }
                    self.poll();
                }
                Err(_) => return Err(SendError::NoMailbox),
            }
        }
        Ok(())
    }

    fn set_reception(&mut self, enabled: bool) {
        self.reception = enabled;
    }
}
