// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware-transfer engine for a CAN field-device bootloader.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `defmt` feature: Routes the internal log macros to `defmt`
//!
//! Hardware is reached only through the traits in [`storage`],
//! [`transport`] and [`checksum`], so the whole protocol runs on the host
//! against fakes.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
mod fmt;

pub mod bridge;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod fsm;
pub mod metadata;
pub mod protocol;
pub mod sector;
pub mod session;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use checksum::{checksum64, AcceleratedChecksum, ChecksumEngine, ChecksumUnit, SoftwareChecksum};
pub use config::BootConfig;
pub use error::{Error, Result};
pub use fsm::{BootAction, Bootloader};
pub use metadata::{MetadataManager, PersistedMetadata, VectorTable};
pub use protocol::{Acknowledge, AckStatus, ActionCode, InboundMessage, MessageKind, MessageMap};
pub use session::{BootPhase, ProtocolState, TransferSession};
pub use storage::{PersistentStore, Sector, SectorTable, StorageMap, StoreError};
pub use storage::{APP_BASE, APP_REGION_SIZE, FLASH_BASE, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, METADATA_ADDR};
pub use transport::{BusTransport, SendError};
