// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bus transport seam.

use crate::codec::FRAME_LEN;

/// Why a frame could not be queued for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    Busy,
    NoMailbox,
}

/// Fixed-payload message bus as seen by the protocol engine.
///
/// Transmission retries and mailbox allocation belong to the implementation.
pub trait BusTransport {
    fn send(&mut self, id: u16, payload: &[u8; FRAME_LEN]) -> Result<(), SendError>;

    /// Enable or suppress delivery of new inbound frames. While suppressed,
    /// frames stay queued in the transport.
    fn set_reception(&mut self, enabled: bool);
}

impl<T: BusTransport + ?Sized> BusTransport for &mut T {
    fn send(&mut self, id: u16, payload: &[u8; FRAME_LEN]) -> Result<(), SendError> {
        (**self).send(id, payload)
    }

    fn set_reception(&mut self, enabled: bool) {
        (**self).set_reception(enabled)
    }
}
