// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bus frames tunnelled over a byte stream.
//!
//! Boards without a CAN transceiver attached expose the bus through a USB
//! CDC bridge: each frame is serialized with postcard and delimited with
//! COBS, so a zero byte always marks a frame boundary.

use serde::{Deserialize, Serialize};

use crate::codec::FRAME_LEN;
use crate::error::{Error, Result};

/// Largest COBS-encoded `BridgeFrame` (varint id + 8 data bytes + overhead).
pub const MAX_ENCODED_LEN: usize = 16;

/// One bus frame: standard identifier plus the 8-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeFrame {
    pub id: u16,
    pub data: [u8; FRAME_LEN],
}

impl BridgeFrame {
    pub fn new(id: u16, data: [u8; FRAME_LEN]) -> Self {
        Self { id, data }
    }

    /// Encode into `buf`, delimiter included.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8]> {
        postcard::to_slice_cobs(self, buf).map_err(|_| Error::InvalidArgument)
    }

    /// Decode one COBS frame (with or without its trailing delimiter).
    /// The buffer is decoded in place.
    pub fn decode(buf: &mut [u8]) -> Result<Self> {
        postcard::from_bytes_cobs(buf).map_err(|_| Error::InvalidArgument)
    }
}

/// Reassembles delimited frames from an arbitrary byte stream.
pub struct FrameAccumulator<const N: usize> {
    buf: [u8; N],
    pos: usize,
}

impl<const N: usize> FrameAccumulator<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            pos: 0,
        }
    }

    /// Feed one byte. Returns a frame when `byte` closes a valid one.
    ///
    /// Undecodable or oversized frames are dropped silently.
    pub fn push(&mut self, byte: u8) -> Option<BridgeFrame> {
        if byte != 0x00 {
            if self.pos < N {
                self.buf[self.pos] = byte;
                self.pos += 1;
            } else {
                // Overflow: drop everything up to the next delimiter.
                self.pos = N + 1;
            }
            return None;
        }

        let len = core::mem::replace(&mut self.pos, 0);
        if len == 0 || len > N {
            return None;
        }
        match BridgeFrame::decode(&mut self.buf[..len]) {
            Ok(frame) => Some(frame),
            Err(_) => {
                trace!("dropping malformed bridge frame");
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.pos = 0;
    }
}

impl<const N: usize> Default for FrameAccumulator<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_frame_ends_with_delimiter() {
        let frame = BridgeFrame::new(0x603, [0, 1, 2, 3, 0, 0, 6, 7]);
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let encoded = frame.encode(&mut buf).unwrap();
        assert_eq!(encoded.last(), Some(&0));
        assert_eq!(encoded.iter().filter(|&&b| b == 0).count(), 1);
    }

    #[test]
    fn test_accumulator_splits_stream() {
        let frames = [
            BridgeFrame::new(0x600, [1; 8]),
            BridgeFrame::new(0x7FF, [0; 8]),
        ];
        let mut stream = [0u8; 2 * MAX_ENCODED_LEN];
        let mut len = 0;
        for frame in &frames {
            let n = frame.encode(&mut stream[len..]).unwrap().len();
            len += n;
        }

        let mut acc = FrameAccumulator::<32>::new();
        let decoded: Vec<_> = stream[..len].iter().filter_map(|&b| acc.push(b)).collect();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_accumulator_drops_oversized_frame() {
        let mut acc = FrameAccumulator::<4>::new();
        for b in 1..=10u8 {
            assert_eq!(acc.push(b), None);
        }
        assert_eq!(acc.push(0), None);

        let mut buf = [0u8; MAX_ENCODED_LEN];
        let mut acc = FrameAccumulator::<MAX_ENCODED_LEN>::new();
        let frame = BridgeFrame::new(0x605, [9; 8]);
        let encoded = frame.encode(&mut buf).unwrap();
        let got = encoded.iter().filter_map(|&b| acc.push(b)).last();
        assert_eq!(got, Some(frame));
    }
}
