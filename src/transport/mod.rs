//! USB Mass Storage transports

use num_enum::TryFromPrimitive;

pub mod bbb;

/// Interface protocol codes
///
/// Only [InterfaceProtocol::BulkOnly] is driven by this crate.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterfaceProtocol {
    CbiInterrupt = 0x00,
    CbiNoInterrupt = 0x01,
    BulkOnly = 0x50,
    VendorSpecific = 0xFF,
}

/// The status of a Mass Storage command.
///
/// Refer to the USB-MS doc.
#[repr(u8)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandStatus {
    #[default]
    Passed = 0x00,
    Failed = 0x01,
    PhaseError = 0x02,
}

/// Direction of the data phase requested by the host
#[repr(u8)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataDirection {
    /// Host to device
    Out,
    /// Device to host
    In,
    #[default]
    NotExpected,
}

/// A command as received from the host
///
/// The `bytes` field is truncated to the command length the host declared.
#[derive(Copy, Clone, Debug)]
pub struct CommandBlock<'a> {
    pub bytes: &'a [u8],
    pub lun: u8,
    /// Number of bytes the host expects to transfer in the data phase
    pub data_transfer_len: u32,
    pub direction: DataDirection,
}

/// The storage command layer behind a transport
///
/// A transport calls [execute] once per accepted command, then moves the data
/// phase through [read_data] or [write_data] in chunks no larger than the
/// transport's data buffer. Returning an error status ends the data phase; the
/// transport reports that status to the host.
///
/// [execute]: CommandExecutor::execute
/// [read_data]: CommandExecutor::read_data
/// [write_data]: CommandExecutor::write_data
pub trait CommandExecutor {
    /// Starts a new command.
    ///
    /// For commands without a data phase the return value is the final status.
    fn execute(&mut self, cmd: &CommandBlock<'_>) -> Result<(), CommandStatus>;

    /// Fills `dst` with the next bytes to send to the host, returning how many
    /// were written. `Ok(0)` means the command has no more data. A count that is
    /// not a whole number of packets ends the data phase.
    fn read_data(&mut self, lun: u8, dst: &mut [u8]) -> Result<usize, CommandStatus>;

    /// Consumes the next bytes received from the host
    fn write_data(&mut self, lun: u8, src: &[u8]) -> Result<(), CommandStatus>;
}
