// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error taxonomy shared by every layer of the transfer engine.

use core::fmt;

/// Failures reported by the codec, the checksum engine, the storage layers
/// and the protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Malformed bit offset or length, or an out-of-range parameter.
    InvalidArgument,
    /// A legal message kind arrived in a state that does not accept it.
    SequenceError,
    /// The sector cursor or a destination address left the sector window.
    BufferOverrun,
    /// The buffered sector does not hash to the checksum the peer sent.
    ChecksumMismatch,
    /// Erase, program or read-back verification of a sector failed.
    WriteFailure,
    /// Writing the metadata region failed.
    PersistFailure,
    /// A vector table still holds the zero sentinel in at least one word.
    VectorTableIncomplete,
    /// The accelerated checksum unit did not complete within its budget.
    ChecksumTimeout,
    /// No valid, untouched application image is installed.
    NoApplication,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidArgument => "invalid argument",
            Error::SequenceError => "message not legal in current state",
            Error::BufferOverrun => "sector buffer overrun",
            Error::ChecksumMismatch => "checksum mismatch",
            Error::WriteFailure => "storage write failed",
            Error::PersistFailure => "metadata persist failed",
            Error::VectorTableIncomplete => "vector table incomplete",
            Error::ChecksumTimeout => "checksum unit timed out",
            Error::NoApplication => "no runnable application",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
