// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bus message catalogue for bootloader <-> host communication.
//!
//! Every message is one 8-byte frame with its own identifier
//! (`base_id + kind`). Signal positions are part of the host-tool contract
//! and must not move.

use heapless::FnvIndexMap;

use crate::codec::{self, ByteOrder, FRAME_LEN};
use crate::error::{Error, Result};
use crate::session::{BootPhase, ProtocolState};

/// Default identifier of the first message kind.
pub const DEFAULT_BASE_ID: u16 = 0x600;

/// Highest 11-bit (standard) bus identifier.
pub const MAX_STANDARD_ID: u16 = 0x7FF;

// --- Message kinds ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    ActionRequest,
    TransferInfo,
    LoopInfo,
    DataChunk,
    ChecksumChunk,
    Acknowledge,
    FsmState,
    DataTransferInfo,
}

impl MessageKind {
    /// Kinds the bootloader consumes.
    pub const INBOUND: [MessageKind; 5] = [
        MessageKind::ActionRequest,
        MessageKind::TransferInfo,
        MessageKind::LoopInfo,
        MessageKind::DataChunk,
        MessageKind::ChecksumChunk,
    ];

    /// 4-bit code, also used as the identifier offset.
    pub fn code(self) -> u8 {
        match self {
            MessageKind::ActionRequest => 0,
            MessageKind::TransferInfo => 1,
            MessageKind::LoopInfo => 2,
            MessageKind::DataChunk => 3,
            MessageKind::ChecksumChunk => 4,
            MessageKind::Acknowledge => 5,
            MessageKind::FsmState => 6,
            MessageKind::DataTransferInfo => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let kind = match code {
            0 => MessageKind::ActionRequest,
            1 => MessageKind::TransferInfo,
            2 => MessageKind::LoopInfo,
            3 => MessageKind::DataChunk,
            4 => MessageKind::ChecksumChunk,
            5 => MessageKind::Acknowledge,
            6 => MessageKind::FsmState,
            7 => MessageKind::DataTransferInfo,
            _ => return None,
        };
        Some(kind)
    }

    /// Bus identifier of this kind for the given base.
    pub fn id(self, base_id: u16) -> Result<u16> {
        base_id
            .checked_add(u16::from(self.code()))
            .filter(|id| *id <= MAX_STANDARD_ID)
            .ok_or(Error::InvalidArgument)
    }
}

// --- Signal layouts ---

/// Position of one field inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub bit_start: u32,
    pub bit_length: u32,
    pub order: ByteOrder,
}

impl Signal {
    pub const fn new(bit_start: u32, bit_length: u32, order: ByteOrder) -> Self {
        Self {
            bit_start,
            bit_length,
            order,
        }
    }

    pub fn read(&self, payload: &[u8; FRAME_LEN]) -> Result<u64> {
        let frame = codec::bytes_to_frame(payload, self.order);
        codec::extract_field(frame, self.bit_start, self.bit_length, self.order)
    }

    pub fn write(&self, payload: &mut [u8; FRAME_LEN], value: u64) -> Result<()> {
        let frame = codec::bytes_to_frame(payload, self.order);
        let frame = codec::pack_field(frame, self.bit_start, self.bit_length, value, self.order)?;
        *payload = codec::frame_to_bytes(frame, self.order);
        Ok(())
    }
}

pub const ACTION_CODE: Signal = Signal::new(7, 8, ByteOrder::Reflected);
pub const PROGRAM_LENGTH: Signal = Signal::new(7, 32, ByteOrder::Reflected);
pub const LOOP_COUNT: Signal = Signal::new(39, 32, ByteOrder::Reflected);
pub const LOOP_NUMBER: Signal = Signal::new(7, 32, ByteOrder::Reflected);
pub const CHECKSUM: Signal = Signal::new(7, 64, ByteOrder::Reflected);
pub const VECTOR_WORD: Signal = Signal::new(0, 64, ByteOrder::Direct);

pub const ACK_FLAG: Signal = Signal::new(0, 1, ByteOrder::Direct);
pub const ACK_KIND: Signal = Signal::new(1, 4, ByteOrder::Direct);
pub const ACK_STATUS: Signal = Signal::new(5, 2, ByteOrder::Direct);
pub const ACK_POSITIVE: Signal = Signal::new(7, 1, ByteOrder::Direct);

pub const FSM_STATE: Signal = Signal::new(0, 8, ByteOrder::Direct);
pub const FSM_PHASE: Signal = Signal::new(8, 8, ByteOrder::Direct);

pub const CURRENT_LOOP: Signal = Signal::new(7, 32, ByteOrder::Reflected);

// --- Inbound messages ---

/// Operation requested by an action-request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionCode {
    BeginTransfer,
    Run,
    Reset,
}

impl ActionCode {
    pub fn code(self) -> u8 {
        match self {
            ActionCode::BeginTransfer => 1,
            ActionCode::Run => 2,
            ActionCode::Reset => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ActionCode::BeginTransfer),
            2 => Some(ActionCode::Run),
            3 => Some(ActionCode::Reset),
            _ => None,
        }
    }
}

/// A decoded inbound bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundMessage {
    ActionRequest(ActionCode),
    TransferInfo { program_length: u32, loop_count: u32 },
    LoopInfo { loop_number: u32 },
    DataChunk([u8; FRAME_LEN]),
    ChecksumChunk(u64),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::ActionRequest(_) => MessageKind::ActionRequest,
            InboundMessage::TransferInfo { .. } => MessageKind::TransferInfo,
            InboundMessage::LoopInfo { .. } => MessageKind::LoopInfo,
            InboundMessage::DataChunk(_) => MessageKind::DataChunk,
            InboundMessage::ChecksumChunk(_) => MessageKind::ChecksumChunk,
        }
    }

    /// Extract the signals of an inbound message.
    pub fn decode(kind: MessageKind, payload: &[u8; FRAME_LEN]) -> Result<Self> {
        let message = match kind {
            MessageKind::ActionRequest => {
                let code = ACTION_CODE.read(payload)? as u8;
                InboundMessage::ActionRequest(
                    ActionCode::from_code(code).ok_or(Error::InvalidArgument)?,
                )
            }
            MessageKind::TransferInfo => InboundMessage::TransferInfo {
                program_length: PROGRAM_LENGTH.read(payload)? as u32,
                loop_count: LOOP_COUNT.read(payload)? as u32,
            },
            MessageKind::LoopInfo => InboundMessage::LoopInfo {
                loop_number: LOOP_NUMBER.read(payload)? as u32,
            },
            MessageKind::DataChunk => InboundMessage::DataChunk(*payload),
            MessageKind::ChecksumChunk => InboundMessage::ChecksumChunk(CHECKSUM.read(payload)?),
            MessageKind::Acknowledge | MessageKind::FsmState | MessageKind::DataTransferInfo => {
                return Err(Error::InvalidArgument)
            }
        };
        Ok(message)
    }

    /// Build the payload a host sends for this message.
    pub fn encode(&self) -> Result<[u8; FRAME_LEN]> {
        let mut payload = [0u8; FRAME_LEN];
        match *self {
            InboundMessage::ActionRequest(code) => {
                ACTION_CODE.write(&mut payload, u64::from(code.code()))?
            }
            InboundMessage::TransferInfo {
                program_length,
                loop_count,
            } => {
                PROGRAM_LENGTH.write(&mut payload, u64::from(program_length))?;
                LOOP_COUNT.write(&mut payload, u64::from(loop_count))?;
            }
            InboundMessage::LoopInfo { loop_number } => {
                LOOP_NUMBER.write(&mut payload, u64::from(loop_number))?
            }
            InboundMessage::DataChunk(data) => payload = data,
            InboundMessage::ChecksumChunk(value) => CHECKSUM.write(&mut payload, value)?,
        }
        Ok(payload)
    }
}

// --- Acknowledge ---

/// 2-bit status carried by an acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckStatus {
    Accepted,
    SequenceError,
    ChecksumError,
    Failure,
}

impl AckStatus {
    pub fn code(self) -> u8 {
        match self {
            AckStatus::Accepted => 0,
            AckStatus::SequenceError => 1,
            AckStatus::ChecksumError => 2,
            AckStatus::Failure => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AckStatus::Accepted),
            1 => Some(AckStatus::SequenceError),
            2 => Some(AckStatus::ChecksumError),
            3 => Some(AckStatus::Failure),
            _ => None,
        }
    }
}

impl From<Error> for AckStatus {
    fn from(err: Error) -> Self {
        match err {
            Error::SequenceError => AckStatus::SequenceError,
            Error::ChecksumMismatch => AckStatus::ChecksumError,
            _ => AckStatus::Failure,
        }
    }
}

/// Protocol reply; its absence tells the peer to retransmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Acknowledge {
    pub kind: MessageKind,
    pub status: AckStatus,
    pub positive: bool,
}

impl Acknowledge {
    pub fn accepted(kind: MessageKind) -> Self {
        Self {
            kind,
            status: AckStatus::Accepted,
            positive: true,
        }
    }

    pub fn rejected(kind: MessageKind, err: Error) -> Self {
        Self {
            kind,
            status: AckStatus::from(err),
            positive: false,
        }
    }

    pub fn encode(&self) -> Result<[u8; FRAME_LEN]> {
        let mut payload = [0u8; FRAME_LEN];
        ACK_FLAG.write(&mut payload, 1)?;
        ACK_KIND.write(&mut payload, u64::from(self.kind.code()))?;
        ACK_STATUS.write(&mut payload, u64::from(self.status.code()))?;
        ACK_POSITIVE.write(&mut payload, u64::from(self.positive))?;
        Ok(payload)
    }

    pub fn decode(payload: &[u8; FRAME_LEN]) -> Result<Self> {
        if ACK_FLAG.read(payload)? != 1 {
            return Err(Error::InvalidArgument);
        }
        let kind = MessageKind::from_code(ACK_KIND.read(payload)? as u8)
            .ok_or(Error::InvalidArgument)?;
        let status = AckStatus::from_code(ACK_STATUS.read(payload)? as u8)
            .ok_or(Error::InvalidArgument)?;
        Ok(Self {
            kind,
            status,
            positive: ACK_POSITIVE.read(payload)? == 1,
        })
    }
}

// --- Broadcasts ---

/// Payload of the fsm-state broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsmStatus {
    pub state: ProtocolState,
    pub phase: BootPhase,
}

impl FsmStatus {
    pub fn of(state: ProtocolState) -> Self {
        Self {
            state,
            phase: state.phase(),
        }
    }

    pub fn encode(&self) -> Result<[u8; FRAME_LEN]> {
        let mut payload = [0u8; FRAME_LEN];
        FSM_STATE.write(&mut payload, u64::from(self.state.code()))?;
        FSM_PHASE.write(&mut payload, u64::from(self.phase.code()))?;
        Ok(payload)
    }

    pub fn decode(payload: &[u8; FRAME_LEN]) -> Result<Self> {
        let state = ProtocolState::from_code(FSM_STATE.read(payload)? as u8)
            .ok_or(Error::InvalidArgument)?;
        let phase =
            BootPhase::from_code(FSM_PHASE.read(payload)? as u8).ok_or(Error::InvalidArgument)?;
        Ok(Self { state, phase })
    }
}

/// Payload of the data-transfer-info broadcast.
pub fn encode_transfer_progress(current_loop: u32) -> Result<[u8; FRAME_LEN]> {
    let mut payload = [0u8; FRAME_LEN];
    CURRENT_LOOP.write(&mut payload, u64::from(current_loop))?;
    Ok(payload)
}

pub fn decode_transfer_progress(payload: &[u8; FRAME_LEN]) -> Result<u32> {
    Ok(CURRENT_LOOP.read(payload)? as u32)
}

// --- Dispatch ---

/// Identifier -> inbound kind routing, built once at start-up.
#[derive(Debug, Clone)]
pub struct MessageMap {
    base_id: u16,
    inbound: FnvIndexMap<u16, MessageKind, 8>,
}

impl MessageMap {
    pub fn new(base_id: u16) -> Result<Self> {
        let mut inbound = FnvIndexMap::new();
        for kind in MessageKind::INBOUND {
            inbound
                .insert(kind.id(base_id)?, kind)
                .map_err(|_| Error::InvalidArgument)?;
        }
        // Outbound identifiers must be representable as well.
        MessageKind::DataTransferInfo.id(base_id)?;
        Ok(Self { base_id, inbound })
    }

    /// Inbound kind routed to by `id`, if any.
    pub fn kind_of(&self, id: u16) -> Option<MessageKind> {
        self.inbound.get(&id).copied()
    }

    /// Identifier of `kind`. Always in range once the map is built.
    pub fn id_of(&self, kind: MessageKind) -> u16 {
        self.base_id + u16::from(kind.code())
    }

    pub fn base_id(&self) -> u16 {
        self.base_id
    }
}
