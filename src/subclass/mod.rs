//! USB Mass Storage subclasses
//!
//! The transport hands every command block to a [CommandExecutor] untouched.
//! Executors for a particular command set may use the parsers found here.
//!
//! [CommandExecutor]: crate::transport::CommandExecutor

use num_enum::TryFromPrimitive;

#[cfg(feature = "scsi")]
pub mod scsi;

/// Interface subclass codes (command set the interface speaks)
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterfaceSubclass {
    Rbc = 0x01,
    Mmc5 = 0x02,
    Qic157 = 0x03,
    Ufi = 0x04,
    Sff8070i = 0x05,
    /// SCSI transparent command set
    Scsi = 0x06,
    VendorSpecific = 0xFF,
}
