//! Bulk Only Transport (BBB/BOT)

use crate::buffer::IoBuf;
use crate::fmt::{debug, info, trace, warning};
use crate::transport::{CommandBlock, CommandExecutor, CommandStatus, DataDirection};
use crate::usbd::{Completion, Slot, Ticket, Usbd};
use core::borrow::BorrowMut;
use core::cmp::{max, min};
use num_enum::TryFromPrimitive;
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::{UsbDirection, UsbError};

const CBW_SIGNATURE_LE: [u8; 4] = 0x43425355u32.to_le_bytes();
const CSW_SIGNATURE_LE: [u8; 4] = 0x53425355u32.to_le_bytes();

/// Size of a Command Block Wrapper on the wire
pub const CBW_LEN: usize = 31;
/// Size of a Command Status Wrapper on the wire
pub const CSW_LEN: usize = 13;

/// Highest LUN index addressable by a CBW
pub const MAX_LUN_LIMIT: u8 = 0x0F;

/// Bulk Only Transport class-specific requests
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClassRequest {
    /// BOT section 3.2
    GetMaxLun = 0xFE,
    /// BOT section 3.1
    BulkOnlyMassStorageReset = 0xFF,
}

/// Bulk Only Transport error
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BulkOnlyError {
    /// Invalid LUN count. Refer to the USB BBB doc
    InvalidMaxLun,
    /// The data buffer cannot hold a single byte
    BufferTooSmall,
}

/// Why a received CBW was rejected. BOT 6.2
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum InvalidCbw {
    /// Fewer than 31 bytes received
    Short,
    /// Not a `USBC` signature
    Signature,
    /// Valid, but the command length or the LUN is out of range
    NotMeaningful,
}

/// Bulk Only Transport state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// A CBW read is (or will be) pending on the OUT endpoint
    AwaitingCommand,
    /// Data phase, device to host
    TransferringIn,
    /// Data phase, host to device
    TransferringOut,
    /// CSW is being written to the IN endpoint
    SendingStatus,
}

/// Bulk Only Transport session of one configured interface
///
/// Driven entirely by transfer completions. At most one submission is
/// outstanding per endpoint direction; a buffer that is out with a submission is
/// absent from the session until its completion hands it back.
///
/// After a protocol error both endpoints are stalled and no further CBW is read
/// until the host performs a Bulk-Only Mass Storage Reset.
pub struct BulkOnly<B: BorrowMut<[u8]>> {
    iface: u8,
    ep_num: u8,
    packet_size: u16,
    max_lun: u8,
    generation: u16,
    epoch: u16, // advanced by a class reset issued mid-command
    control: Option<IoBuf<B>>,
    data: Option<IoBuf<B>>,
    in_pending: bool,
    out_pending: bool,
    halted: bool,
    state: State,
    cbw: CommandBlockWrapper,
    deferred: Option<Result<(), CommandStatus>>, // executed, waiting for a stale IN transfer
}

impl<B: BorrowMut<[u8]>> BulkOnly<B> {
    /// Allocates session buffers from `usbd`.
    ///
    /// The control buffer holds at least one packet and one CBW. The data buffer
    /// holds a whole number of packets, at least one.
    ///
    /// Returns `None` if the stack is out of buffers; whatever was allocated is
    /// released.
    pub(crate) fn new<U: Usbd<Buf = B>>(
        usbd: &mut U,
        iface: u8,
        ep_num: u8,
        packet_size: u16,
        max_lun: u8,
        io_size: usize,
        generation: u16,
    ) -> Option<BulkOnly<B>> {
        let packet = packet_size as usize;
        let control = usbd.io_create(max(packet, CBW_LEN))?;
        let data = usbd.io_create(max(packet, io_size - io_size % packet))?;

        Some(BulkOnly {
            iface,
            ep_num,
            packet_size,
            max_lun,
            generation,
            epoch: 0,
            control: Some(control),
            data: Some(data),
            in_pending: false,
            out_pending: false,
            halted: false,
            state: State::AwaitingCommand,
            cbw: Default::default(),
            deferred: None,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Tag of the command being serviced, if any
    pub fn active_tag(&self) -> Option<u32> {
        match self.state {
            State::AwaitingCommand => None,
            _ => Some(self.cbw.tag),
        }
    }

    /// Whether a protocol error stalled the endpoints and a class reset is awaited
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn interface_number(&self) -> u8 {
        self.iface
    }

    pub fn endpoint_number(&self) -> u8 {
        self.ep_num
    }

    pub fn packet_size(&self) -> u16 {
        self.packet_size
    }

    pub(crate) fn generation(&self) -> u16 {
        self.generation
    }

    /// Opens both directions of the bulk endpoint and primes reception of the first CBW
    pub(crate) fn open<U: Usbd<Buf = B>>(&mut self, usbd: &mut U) {
        usbd.ep_open(self.in_ep(), EndpointType::Bulk, self.packet_size);
        usbd.ep_open(self.out_ep(), EndpointType::Bulk, self.packet_size);
        self.arm_cbw_read(usbd);
    }

    /// Bulk-Only Mass Storage Reset, BOT section 3.1
    ///
    /// Any command in progress is abandoned; its outstanding submissions are
    /// reclaimed as they complete. A new CBW read is armed right away if the
    /// control buffer is idle and OUT is free, even with a stale IN write still
    /// out. The next command then waits for that write before its data phase.
    pub(crate) fn mass_storage_reset<U: Usbd<Buf = B>>(&mut self, usbd: &mut U) {
        info!("usb: bbb: Recv reset");
        if !matches!(self.state, State::AwaitingCommand) || self.deferred.is_some() {
            self.epoch = self.epoch.wrapping_add(1);
        }
        self.halted = false;
        self.enter_state(State::AwaitingCommand);
        self.arm_cbw_read(usbd);
    }

    /// Consumes a transfer completion of this session
    ///
    /// # Errors
    /// [UsbError::InvalidEndpoint] if the completion is for an endpoint this
    /// session doesn't own.
    pub(crate) fn complete<U, E>(
        &mut self,
        usbd: &mut U,
        executor: &mut E,
        completion: Completion<B>,
    ) -> Result<(), UsbError>
    where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        let Completion {
            ticket,
            ep,
            mut buf,
            result,
        } = completion;

        if ep.index() != self.ep_num as usize {
            warning!("usb: bbb: Completion on foreign EP{}", ep.index() as u8);
            return Err(UsbError::InvalidEndpoint);
        }

        let direction = ep.direction();
        match direction {
            UsbDirection::In => self.in_pending = false,
            UsbDirection::Out => {
                self.out_pending = false;
                if let Ok(count) = result {
                    buf.set_size(count);
                }
            }
        }
        self.reclaim(ticket.slot, buf);

        if ticket.epoch != self.epoch {
            trace!("usb: bbb: Reclaimed stale {} buffer", ticket.slot);
            match self.deferred.take() {
                Some(res) => self.resume_command(usbd, executor, res),
                None => self.arm_cbw_read(usbd),
            }
            return Ok(());
        }

        if self.halted {
            trace!("usb: bbb: Halted, {} completion ignored", ticket.slot);
            return Ok(());
        }

        let count = match result {
            Ok(count) => count,
            Err(err) => {
                warning!("usb: bbb: Transfer failed: {}", err);
                self.fatal(usbd);
                return Ok(());
            }
        };

        match (self.state, ticket.slot, direction) {
            (State::AwaitingCommand, Slot::Control, UsbDirection::Out) => {
                self.handle_read_cbw(usbd, executor, count)
            }
            (State::TransferringIn, Slot::Data, UsbDirection::In) => {
                self.handle_write_to_host(usbd, executor, count)
            }
            (State::TransferringOut, Slot::Data, UsbDirection::Out) => {
                self.handle_read_from_host(usbd, executor, count)
            }
            (State::SendingStatus, Slot::Control, UsbDirection::In) => self.handle_write_csw(usbd),
            (state, slot, _) => {
                warning!("usb: bbb: Unexpected {} completion in {}", slot, state);
                self.fatal(usbd);
            }
        }

        Ok(())
    }

    fn handle_read_cbw<U, E>(&mut self, usbd: &mut U, executor: &mut E, count: usize)
    where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        let parsed = match self.control.as_ref() {
            Some(buf) => CommandBlockWrapper::parse(buf.data(), self.max_lun),
            None => return self.fatal(usbd),
        };

        match parsed {
            Ok(cbw) => {
                info!("usb: bbb: Recv CBW: {}", cbw);
                self.cbw = cbw;
                self.start_command(usbd, executor);
            }
            Err(err) => {
                // BOT 6.6.1
                warning!("usb: bbb: Invalid CBW ({} bytes): {}", count, err);
                self.fatal(usbd);
            }
        }
    }

    fn start_command<U, E>(&mut self, usbd: &mut U, executor: &mut E)
    where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        let res = executor.execute(&CommandBlock {
            bytes: &self.cbw.block[..self.cbw.block_len],
            lun: self.cbw.lun,
            data_transfer_len: self.cbw.data_transfer_len,
            direction: self.cbw.direction,
        });

        match self.cbw.direction {
            DataDirection::In => self.enter_state(State::TransferringIn),
            DataDirection::Out => self.enter_state(State::TransferringOut),
            DataDirection::NotExpected => self.cbw.data_transfer_len = 0,
        }

        self.resume_command(usbd, executor, res);
    }

    /// Runs the data or status phase of an executed command, unless a write from
    /// before a class reset still holds the IN endpoint or the data buffer
    fn resume_command<U, E>(
        &mut self,
        usbd: &mut U,
        executor: &mut E,
        res: Result<(), CommandStatus>,
    ) where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        if self.in_pending || self.data.is_none() {
            trace!("usb: bbb: Command deferred until stale transfer returns");
            self.deferred = Some(res);
            return;
        }

        match (res, self.state) {
            (Err(status), _) => self.send_status(usbd, status),
            (Ok(()), State::TransferringIn) => self.write_to_host(usbd, executor),
            (Ok(()), State::TransferringOut) => self.read_from_host(usbd),
            (Ok(()), _) => self.send_status(usbd, CommandStatus::Passed),
        }
    }

    /// Asks the executor for the next chunk and queues it on IN
    fn write_to_host<U, E>(&mut self, usbd: &mut U, executor: &mut E)
    where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        let Some(mut buf) = self.data.take() else {
            return self.fatal(usbd);
        };
        buf.clean();

        let lun = self.cbw.lun;
        let chunk = min(buf.capacity(), self.cbw.data_transfer_len as usize);
        let res = buf.write_with(chunk, CommandStatus::PhaseError, |dst| {
            executor.read_data(lun, dst)
        });

        match res {
            Ok(count) if count > 0 => {
                trace!("usb: bbb: Write {} bytes to host", count);
                self.submit_write(usbd, Slot::Data, buf);
            }
            Ok(_) => {
                self.data = Some(buf);
                self.send_status(usbd, CommandStatus::Passed);
            }
            Err(status) => {
                self.data = Some(buf);
                self.send_status(usbd, status);
            }
        }
    }

    /// Queues the next host-to-device chunk read on OUT
    fn read_from_host<U: Usbd<Buf = B>>(&mut self, usbd: &mut U) {
        let Some(mut buf) = self.data.take() else {
            return self.fatal(usbd);
        };
        buf.clean();

        let max_len = min(buf.capacity(), self.cbw.data_transfer_len as usize);
        self.submit_read(usbd, Slot::Data, buf, max_len);
    }

    fn handle_write_to_host<U, E>(&mut self, usbd: &mut U, executor: &mut E, count: usize)
    where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        self.cbw.data_transfer_len = self.cbw.data_transfer_len.saturating_sub(count as u32);
        trace!("usb: bbb: Data residue: {}", self.cbw.data_transfer_len);

        // a short packet ends the transfer on the host side
        let short = count % self.packet_size as usize != 0;
        if self.cbw.data_transfer_len == 0 || short {
            self.send_status(usbd, CommandStatus::Passed);
        } else {
            self.write_to_host(usbd, executor);
        }
    }

    fn handle_read_from_host<U, E>(&mut self, usbd: &mut U, executor: &mut E, count: usize)
    where
        U: Usbd<Buf = B>,
        E: CommandExecutor,
    {
        let count = min(count, self.cbw.data_transfer_len as usize);
        let res = match self.data.as_ref() {
            Some(buf) => executor.write_data(self.cbw.lun, &buf.data()[..min(count, buf.size())]),
            None => return self.fatal(usbd),
        };

        self.cbw.data_transfer_len -= count as u32;
        trace!("usb: bbb: Data residue: {}", self.cbw.data_transfer_len);

        let short = count % self.packet_size as usize != 0;
        match res {
            Err(status) => self.send_status(usbd, status),
            Ok(()) if count == 0 || short || self.cbw.data_transfer_len == 0 => {
                self.send_status(usbd, CommandStatus::Passed)
            }
            Ok(()) => self.read_from_host(usbd),
        }
    }

    fn handle_write_csw<U: Usbd<Buf = B>>(&mut self, usbd: &mut U) {
        self.enter_state(State::AwaitingCommand); // done with status transfer
        self.arm_cbw_read(usbd);
    }

    /// Ends the data phase and queues the CSW
    fn send_status<U: Usbd<Buf = B>>(&mut self, usbd: &mut U, status: CommandStatus) {
        // BOT 6.7.2 and 6.7.3
        if self.cbw.data_transfer_len > 0 {
            match self.state {
                State::TransferringIn => self.stall_in_ep(usbd),
                State::TransferringOut => self.stall_out_ep(usbd),
                _ => {}
            }
        }

        let Some(mut buf) = self.control.take() else {
            return self.fatal(usbd);
        };

        let csw = CommandStatusWrapper {
            tag: self.cbw.tag,
            residue: self.cbw.data_transfer_len,
            status,
        };
        info!("usb: bbb: Send CSW: {}", csw);

        buf.clean();
        buf.write(&csw.to_le_bytes());

        self.enter_state(State::SendingStatus);
        self.submit_write(usbd, Slot::Control, buf);
    }

    /// Arms a CBW read if the session is idle, not halted and OUT is free
    fn arm_cbw_read<U: Usbd<Buf = B>>(&mut self, usbd: &mut U) {
        if self.halted
            || self.out_pending
            || self.deferred.is_some()
            || !matches!(self.state, State::AwaitingCommand)
        {
            return;
        }

        if let Some(mut buf) = self.control.take() {
            buf.clean();
            let max_len = buf.capacity();
            self.submit_read(usbd, Slot::Control, buf, max_len);
        }
    }

    /// Stalls both endpoints and abandons the current transaction. BOT 5.3.4 and 6.6.1
    fn fatal<U: Usbd<Buf = B>>(&mut self, usbd: &mut U) {
        warning!("usb: bbb: Fatal, waiting for reset");
        self.stall_eps(usbd);
        self.halted = true;
        self.enter_state(State::AwaitingCommand);
    }

    fn reclaim(&mut self, slot: Slot, buf: IoBuf<B>) {
        let place = match slot {
            Slot::Control => &mut self.control,
            Slot::Data => &mut self.data,
        };
        if place.is_some() {
            warning!("usb: bbb: Duplicate {} buffer dropped", slot);
        } else {
            *place = Some(buf);
        }
    }

    fn submit_read<U: Usbd<Buf = B>>(
        &mut self,
        usbd: &mut U,
        slot: Slot,
        buf: IoBuf<B>,
        max_len: usize,
    ) {
        debug_assert!(!self.out_pending);
        trace!("usb: bbb: Read up to {} bytes into {}", max_len, slot);
        self.out_pending = true;
        usbd.ep_read(self.out_ep(), buf, max_len, self.ticket(slot));
    }

    fn submit_write<U: Usbd<Buf = B>>(&mut self, usbd: &mut U, slot: Slot, buf: IoBuf<B>) {
        debug_assert!(!self.in_pending);
        trace!("usb: bbb: Write {} bytes from {}", buf.size(), slot);
        self.in_pending = true;
        usbd.ep_write(self.in_ep(), buf, self.ticket(slot));
    }

    #[inline]
    fn ticket(&self, slot: Slot) -> Ticket {
        Ticket {
            generation: self.generation,
            epoch: self.epoch,
            slot,
        }
    }

    #[inline]
    fn in_ep(&self) -> EndpointAddress {
        EndpointAddress::from_parts(self.ep_num as usize, UsbDirection::In)
    }

    #[inline]
    fn out_ep(&self) -> EndpointAddress {
        EndpointAddress::from_parts(self.ep_num as usize, UsbDirection::Out)
    }

    #[inline]
    fn stall_eps<U: Usbd<Buf = B>>(&self, usbd: &mut U) {
        self.stall_in_ep(usbd);
        self.stall_out_ep(usbd);
    }

    #[inline]
    fn stall_in_ep<U: Usbd<Buf = B>>(&self, usbd: &mut U) {
        info!("usb: bbb: Stall IN ep");
        usbd.ep_set_stall(self.in_ep());
    }

    #[inline]
    fn stall_out_ep<U: Usbd<Buf = B>>(&self, usbd: &mut U) {
        info!("usb: bbb: Stall OUT ep");
        usbd.ep_set_stall(self.out_ep());
    }

    #[inline]
    fn enter_state(&mut self, state: State) {
        debug!("usb: bbb: Enter state: {}", state);
        if matches!(state, State::AwaitingCommand) {
            self.cbw = Default::default();
            self.deferred = None;
        }
        self.state = state;
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct CommandBlockWrapper {
    tag: u32,
    data_transfer_len: u32, // decremented into the residue during the data phase
    direction: DataDirection,
    lun: u8,
    block_len: usize,
    block: [u8; 16],
}

impl CommandBlockWrapper {
    /// Validates and parses a raw CBW. BOT 6.2.1 and 6.2.2
    fn parse(raw: &[u8], max_lun: u8) -> Result<Self, InvalidCbw> {
        const MIN_CB_LEN: u8 = 1;
        const MAX_CB_LEN: u8 = 16;

        if raw.len() < CBW_LEN {
            return Err(InvalidCbw::Short);
        }
        if !raw.starts_with(&CBW_SIGNATURE_LE) {
            return Err(InvalidCbw::Signature);
        }

        let value = &raw[4..CBW_LEN]; // skipping signature
        let block_len = value[10];
        let lun = value[9] & 0b00001111;

        if !(MIN_CB_LEN..=MAX_CB_LEN).contains(&block_len) || lun > max_lun {
            return Err(InvalidCbw::NotMeaningful);
        }

        let data_transfer_len = le_u32(&value[4..8]);
        let mut block = [0u8; 16];
        block.copy_from_slice(&value[11..27]);

        Ok(CommandBlockWrapper {
            tag: le_u32(&value[..4]),
            data_transfer_len,
            direction: if data_transfer_len != 0 {
                if (value[8] & (1 << 7)) > 0 {
                    DataDirection::In
                } else {
                    DataDirection::Out
                }
            } else {
                DataDirection::NotExpected
            },
            lun,
            block_len: block_len as usize,
            block,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct CommandStatusWrapper {
    tag: u32,
    residue: u32,
    status: CommandStatus,
}

impl CommandStatusWrapper {
    fn to_le_bytes(self) -> [u8; CSW_LEN] {
        let mut csw = [0u8; CSW_LEN];
        csw[..4].copy_from_slice(CSW_SIGNATURE_LE.as_slice());
        csw[4..8].copy_from_slice(self.tag.to_le_bytes().as_slice());
        csw[8..12].copy_from_slice(self.residue.to_le_bytes().as_slice());
        csw[12] = self.status as u8;
        csw
    }
}

/// The caller must ensure `bytes` holds at least 4 bytes
#[inline]
fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
