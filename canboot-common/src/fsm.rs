// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware-transfer protocol state machine.
//!
//! The [`Bootloader`] owns the transfer context (state, session, sector
//! pipeline) and borrows nothing global: the storage, checksum engine and bus
//! are handed in at construction. It is driven by two inputs, inbound bus
//! frames and the external idle timer, and answers with a [`BootAction`] the
//! caller must carry out (restart the device or start the application).
//!
//! Protocol outline:
//! - action-request `BeginTransfer` (Idle) -> transfer-info -> loop-info 1
//! - per loop: data-chunk (8 bytes); per sector: checksum-chunk -> commit
//! - after the last sector: four vector words + their checksum -> install
//!
//! Every processed message is acknowledged; a missing acknowledge makes the
//! peer retransmit, so duplicates are expected and handled idempotently.

use crate::checksum::{ChecksumEngine, CHECKSUM_ROOT};
use crate::codec::FRAME_LEN;
use crate::config::BootConfig;
use crate::error::{Error, Result};
use crate::metadata::{MetadataManager, PersistedMetadata, VectorTable};
use crate::protocol::{
    encode_transfer_progress, Acknowledge, ActionCode, FsmStatus, InboundMessage, MessageKind,
    MessageMap, VECTOR_WORD,
};
use crate::sector::SectorPipeline;
use crate::session::{BootPhase, ProtocolState, TransferSession, LOOP_BYTES};
use crate::storage::{PersistentStore, StorageMap};
use crate::transport::BusTransport;

/// What the caller must do after feeding an event to the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootAction {
    /// Keep running the bootloader loop.
    Continue,
    /// Restart the device (new image installed or reset requested).
    Restart,
    /// Hand control to the application described by this table.
    RunApplication(VectorTable),
}

/// Whether a message kind may be processed in a state.
///
/// Run and reset requests are checked separately: they pre-empt the table.
pub fn accepts(state: ProtocolState, kind: MessageKind) -> bool {
    use ProtocolState::*;

    match kind {
        MessageKind::ActionRequest => state == Idle,
        MessageKind::TransferInfo => state == WaitForInfo,
        MessageKind::LoopInfo => matches!(state, WaitForLoops | ReceivedLoopNumber | ReceivedData),
        MessageKind::DataChunk => {
            matches!(state, ReceivedLoopNumber | ReceivedData | FinishedValidation)
        }
        MessageKind::ChecksumChunk => matches!(
            state,
            ReceivedLoopNumber | ReceivedData | FinishedValidation | FinishedVectorTransfer
        ),
        MessageKind::Acknowledge | MessageKind::FsmState | MessageKind::DataTransferInfo => false,
    }
}

/// Bootloader controller: single owner of the transfer context.
pub struct Bootloader<S, M, C, T> {
    config: BootConfig,
    messages: MessageMap,
    storage_map: M,
    engine: C,
    transport: T,
    metadata: MetadataManager<S>,
    state: ProtocolState,
    session: TransferSession,
    pipeline: SectorPipeline,
    write_failures: u8,
}

impl<S, M, C, T> Bootloader<S, M, C, T>
where
    S: PersistentStore,
    M: StorageMap,
    C: ChecksumEngine,
    T: BusTransport,
{
    /// Validate the configuration, build the dispatch map and load the
    /// persisted metadata.
    pub fn new(
        config: BootConfig,
        store: S,
        storage_map: M,
        engine: C,
        transport: T,
    ) -> Result<Self> {
        config.validate(&storage_map)?;
        let messages = MessageMap::new(config.base_id)?;

        let mut metadata = MetadataManager::new(store, config.metadata_address);
        metadata.load();

        Ok(Self {
            config,
            messages,
            storage_map,
            engine,
            transport,
            metadata,
            state: ProtocolState::Idle,
            session: TransferSession::default(),
            pipeline: SectorPipeline::new(),
            write_failures: 0,
        })
    }

    // --- Accessors ---

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn phase(&self) -> BootPhase {
        self.state.phase()
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn snapshot(&self) -> &TransferSession {
        self.pipeline.snapshot()
    }

    pub fn metadata(&self) -> &MetadataManager<S> {
        &self.metadata
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // --- Inputs ---

    /// Process one raw bus frame.
    pub fn handle_frame(&mut self, id: u16, payload: &[u8; FRAME_LEN]) -> BootAction {
        let Some(kind) = self.messages.kind_of(id) else {
            trace!("ignoring frame {:#x}", id);
            return BootAction::Continue;
        };

        match InboundMessage::decode(kind, payload) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                warn!("malformed {}: {}", kind, e);
                self.acknowledge(Acknowledge::rejected(kind, e));
                BootAction::Continue
            }
        }
    }

    /// Process one decoded inbound message.
    pub fn handle_message(&mut self, message: InboundMessage) -> BootAction {
        let kind = message.kind();

        // Reset pre-empts everything, run everything but reset.
        match message {
            InboundMessage::ActionRequest(ActionCode::Reset) => return self.on_reset(),
            InboundMessage::ActionRequest(ActionCode::Run) => return self.on_run(),
            _ => {}
        }

        if !accepts(self.state, kind) {
            return self.fail(kind, Error::SequenceError);
        }

        let result = match message {
            InboundMessage::ActionRequest(_) => self.on_begin_transfer(),
            InboundMessage::TransferInfo {
                program_length,
                loop_count,
            } => self.on_transfer_info(program_length, loop_count),
            InboundMessage::LoopInfo { loop_number } => self.on_loop_info(loop_number),
            InboundMessage::DataChunk(data) => self.on_data_chunk(&data),
            InboundMessage::ChecksumChunk(value) => self.on_checksum_chunk(value),
        };

        match result {
            Ok(action) => {
                self.acknowledge(Acknowledge::accepted(kind));
                action
            }
            Err(e) => self.fail(kind, e),
        }
    }

    /// The external idle timer expired without protocol traffic.
    pub fn on_idle_timeout(&mut self) -> BootAction {
        if self.state != ProtocolState::Idle {
            return BootAction::Continue;
        }
        info!("idle timeout, trying to start application");
        self.set_state(ProtocolState::RunRequested);
        self.start_application().unwrap_or(BootAction::Continue)
    }

    /// Emit the fsm-state broadcast.
    pub fn broadcast_status(&mut self) {
        let payload = FsmStatus::of(self.state).encode();
        self.transmit(MessageKind::FsmState, payload);
    }

    // --- Action requests ---

    fn on_begin_transfer(&mut self) -> Result<BootAction> {
        self.session = TransferSession::default();
        self.pipeline.discard();
        self.set_state(ProtocolState::WaitForInfo);
        Ok(BootAction::Continue)
    }

    fn on_reset(&mut self) -> BootAction {
        info!("reset requested in {}", self.state);
        self.set_state(ProtocolState::ResetRequested);
        self.session = TransferSession::default();
        self.pipeline.discard();
        self.write_failures = 0;

        self.transport.set_reception(false);
        let restored = self.metadata.reset_to_backup();
        self.transport.set_reception(true);
        if let Err(e) = restored {
            warn!("reset: metadata not rewritten: {}", e);
        }

        self.acknowledge(Acknowledge::accepted(MessageKind::ActionRequest));
        BootAction::Restart
    }

    fn on_run(&mut self) -> BootAction {
        if matches!(
            self.state,
            ProtocolState::Error | ProtocolState::ResetRequested
        ) {
            return self.fail(MessageKind::ActionRequest, Error::SequenceError);
        }

        self.set_state(ProtocolState::RunRequested);
        match self.start_application() {
            Ok(action) => {
                self.acknowledge(Acknowledge::accepted(MessageKind::ActionRequest));
                action
            }
            Err(e) => {
                self.acknowledge(Acknowledge::rejected(MessageKind::ActionRequest, e));
                BootAction::Continue
            }
        }
    }

    /// Leave `RunRequested`: hand over to the application or fall back to
    /// `Idle` when there is nothing runnable.
    ///
    /// The program in storage is checksummed again, so an image torn by an
    /// interrupted transfer is never started.
    fn start_application(&mut self) -> Result<BootAction> {
        self.session = TransferSession::default();
        self.pipeline.discard();

        if self.metadata.is_available() {
            match self.metadata.verify_program(&mut self.engine) {
                Ok(()) => {
                    let table = *self.metadata.active();
                    info!(
                        "starting application at {:#x}",
                        self.metadata.metadata().program_start_address
                    );
                    return Ok(BootAction::RunApplication(table));
                }
                Err(e) => warn!("installed image rejected: {}", e),
            }
        }

        info!("no runnable application, staying in bootloader");
        self.set_state(ProtocolState::Idle);
        Err(Error::NoApplication)
    }

    // --- Transfer ---

    fn on_transfer_info(&mut self, program_length: u32, loop_count: u32) -> Result<BootAction> {
        if program_length == 0
            || program_length > self.config.max_program_length
            || program_length % LOOP_BYTES != 0
            || program_length / LOOP_BYTES != loop_count
        {
            warn!(
                "rejecting transfer: length={} loops={}",
                program_length,
                loop_count
            );
            return Err(Error::InvalidArgument);
        }

        let last_byte = self.config.program_start + (program_length - 1);
        if self.storage_map.lookup(last_byte).is_none() {
            warn!("rejecting transfer: image does not fit storage");
            return Err(Error::InvalidArgument);
        }

        self.session =
            TransferSession::begin(self.config.program_start, program_length, loop_count);
        self.pipeline.discard();
        self.pipeline.take_snapshot(&self.session);
        self.write_failures = 0;
        info!("transfer: {} bytes in {} loops", program_length, loop_count);
        self.set_state(ProtocolState::WaitForLoops);
        Ok(BootAction::Continue)
    }

    fn on_loop_info(&mut self, loop_number: u32) -> Result<BootAction> {
        let current = self.session.current_loop;
        let next = current + 1;

        let accepted = match self.state {
            ProtocolState::WaitForLoops => loop_number == 1,
            ProtocolState::ReceivedLoopNumber => {
                loop_number == current
                    || (loop_number == next && self.current_loop_committed())
            }
            ProtocolState::ReceivedData => {
                loop_number == current || (loop_number == next && self.sector_has_room())
            }
            _ => false,
        };
        if !accepted || loop_number > self.session.total_loops {
            return Err(Error::SequenceError);
        }

        if loop_number == current {
            trace!("duplicate loop {}", loop_number);
        }
        self.session.current_loop = loop_number;
        self.set_state(ProtocolState::ReceivedLoopNumber);

        let progress = encode_transfer_progress(loop_number);
        self.transmit(MessageKind::DataTransferInfo, progress);
        Ok(BootAction::Continue)
    }

    fn on_data_chunk(&mut self, data: &[u8; FRAME_LEN]) -> Result<BootAction> {
        if self.state == ProtocolState::FinishedValidation {
            return self.on_vector_word(data);
        }

        if self.current_loop_committed() {
            trace!("loop {} already committed", self.session.current_loop);
            return Ok(BootAction::Continue);
        }

        self.pipeline
            .stage(&mut self.session, &self.storage_map, data)?;
        self.set_state(ProtocolState::ReceivedData);
        Ok(BootAction::Continue)
    }

    fn on_vector_word(&mut self, data: &[u8; FRAME_LEN]) -> Result<BootAction> {
        let index = usize::from(self.session.received_vector_word_count);
        let word = VECTOR_WORD.read(data)?;
        let slot = self
            .session
            .vector_table_words
            .get_mut(index)
            .ok_or(Error::BufferOverrun)?;
        *slot = word;
        self.session.received_vector_word_count += 1;

        if self.session.vector_words_complete() {
            self.set_state(ProtocolState::FinishedVectorTransfer);
        }
        Ok(BootAction::Continue)
    }

    fn on_checksum_chunk(&mut self, value: u64) -> Result<BootAction> {
        if self.state != ProtocolState::FinishedVectorTransfer && self.is_committed_checksum(value)
        {
            debug!("checksum {:#x} already committed", value);
            return Ok(BootAction::Continue);
        }

        match self.state {
            ProtocolState::ReceivedData => self.on_sector_checksum(value),
            ProtocolState::FinishedVectorTransfer => self.on_vector_checksum(value),
            _ => Err(Error::SequenceError),
        }
    }

    fn on_sector_checksum(&mut self, value: u64) -> Result<BootAction> {
        let sector = SectorPipeline::active_sector(&self.storage_map, &self.session)?;
        let full = self.session.sector_buffer_cursor == sector.len;
        if !full && !self.session.is_last_loop() {
            return Err(Error::SequenceError);
        }

        self.session.received_checksum = value;
        self.set_state(ProtocolState::ReceivedChecksum);
        self.pipeline.arm();
        self.commit_sector()
    }

    /// Run the armed commit with reception suppressed.
    ///
    /// The installed image is marked unavailable in storage before its first
    /// sector can be erased.
    fn commit_sector(&mut self) -> Result<BootAction> {
        self.transport.set_reception(false);
        if let Err(e) = self.metadata.invalidate() {
            self.transport.set_reception(true);
            error!("cannot invalidate installed image: {}", e);
            return Err(Error::PersistFailure);
        }
        let result = self.pipeline.commit(
            &mut self.session,
            self.metadata.store_mut(),
            &self.storage_map,
            &mut self.engine,
        );
        self.transport.set_reception(true);

        match result {
            Ok(Some(_)) => {
                self.write_failures = 0;
                if self.session.is_last_loop() {
                    info!(
                        "program received, checksum {:#x}",
                        self.session.accumulated_checksum
                    );
                    self.set_state(ProtocolState::FinishedValidation);
                } else {
                    self.set_state(ProtocolState::ReceivedLoopNumber);
                }
                Ok(BootAction::Continue)
            }
            Ok(None) => Ok(BootAction::Continue),
            Err(e) => Err(self.recover_commit(e)),
        }
    }

    /// Pick the state after a failed commit. The session has already been
    /// rolled back to the start of the sector.
    fn recover_commit(&mut self, err: Error) -> Error {
        let retry_state = if self.session.current_loop == 0 {
            ProtocolState::WaitForLoops
        } else {
            ProtocolState::ReceivedData
        };

        match err {
            Error::ChecksumMismatch => self.set_state(retry_state),
            Error::WriteFailure | Error::ChecksumTimeout => {
                self.write_failures = self.write_failures.saturating_add(1);
                if self.write_failures > self.config.write_retries {
                    error!("sector write failed {} times", self.write_failures);
                    self.enter_error();
                } else {
                    warn!("sector write failed, waiting for resend");
                    self.set_state(retry_state);
                }
            }
            _ => self.enter_error(),
        }
        err
    }

    fn on_vector_checksum(&mut self, value: u64) -> Result<BootAction> {
        let table = VectorTable(self.session.vector_table_words);
        let computed = self.engine.checksum64(&table.to_bytes(), CHECKSUM_ROOT)?;
        self.session.vector_table_checksum = computed;

        if computed != value {
            warn!("vector table checksum mismatch");
            self.session.clear_vector_words();
            self.set_state(ProtocolState::FinishedValidation);
            return Err(Error::ChecksumMismatch);
        }

        self.set_state(ProtocolState::ValidatedVectorTable);
        self.install(table)
    }

    fn install(&mut self, table: VectorTable) -> Result<BootAction> {
        let program = PersistedMetadata {
            program_length: self.session.program_length,
            program_start_address: self.session.program_start_address,
            program_checksum: self.session.accumulated_checksum,
            vector_table_checksum: self.session.vector_table_checksum,
            available: true,
        };

        self.transport.set_reception(false);
        let result = self
            .metadata
            .install(program, table, self.config.bootloader_vectors);
        self.transport.set_reception(true);

        match result {
            Ok(()) => {
                info!("application installed, restarting");
                self.session = TransferSession::default();
                Ok(BootAction::Restart)
            }
            Err(Error::VectorTableIncomplete) => {
                self.session.clear_vector_words();
                self.set_state(ProtocolState::FinishedValidation);
                Err(Error::VectorTableIncomplete)
            }
            Err(e) => Err(e),
        }
    }

    // --- Helpers ---

    /// The current loop's bytes belong to an already committed sector.
    fn current_loop_committed(&self) -> bool {
        self.session.current_loop > 0
            && self.session.loop_address() < self.session.current_sector_address
    }

    /// The loop after the current one still lands in the active sector.
    fn sector_has_room(&self) -> bool {
        let next_address = self.session.loop_address() + LOOP_BYTES;
        SectorPipeline::active_sector(&self.storage_map, &self.session)
            .map(|sector| sector.contains(next_address))
            .unwrap_or(false)
    }

    /// `value` is the checksum of the sector committed last.
    fn is_committed_checksum(&self, value: u64) -> bool {
        self.session.sector_buffer_cursor == 0
            && self.session.has_committed_sector()
            && value == self.session.accumulated_checksum
    }

    fn fail(&mut self, kind: MessageKind, err: Error) -> BootAction {
        match err {
            Error::SequenceError => {
                debug!("{} not accepted in {}", kind, self.state);
                if !self.config.nack_on_sequence_error {
                    return BootAction::Continue;
                }
            }
            Error::BufferOverrun | Error::PersistFailure => {
                error!("{} failed: {}", kind, err);
                self.enter_error();
            }
            _ => {}
        }
        self.acknowledge(Acknowledge::rejected(kind, err));
        BootAction::Continue
    }

    fn enter_error(&mut self) {
        self.pipeline.discard();
        self.set_state(ProtocolState::Error);
    }

    fn set_state(&mut self, state: ProtocolState) {
        if self.state == state {
            return;
        }
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.broadcast_status();
    }

    fn acknowledge(&mut self, ack: Acknowledge) {
        let payload = ack.encode();
        self.transmit(MessageKind::Acknowledge, payload);
    }

    fn transmit(&mut self, kind: MessageKind, payload: Result<[u8; FRAME_LEN]>) {
        let id = self.messages.id_of(kind);
        match payload {
            Ok(payload) => {
                if let Err(e) = self.transport.send(id, &payload) {
                    warn!("{} not sent: {}", kind, e);
                }
            }
            Err(e) => error!("{} not encoded: {}", kind, e),
        }
    }
}
