//! USB Mass Storage Bulk-Only Transport class driver for message-driven USB device stacks
//!
//! The driver never polls and never blocks. The device stack calls into a
//! [MassStorage] function through the [ClassDriver] trait: lifecycle callbacks,
//! class requests on endpoint 0 and transfer completions. The function answers
//! with non-blocking submissions through the [Usbd] trait.
//!
//! # Transports:
//! * [Bulk Only]
//!
//! # Subclasses:
//! * [SCSI] - command block parsing for SCSI transparent executors
//! * [Vendor Specific subclass] - implement [CommandExecutor] trait
//!
//! # Features
//! | Feature | Description                           |
//! | ------- |---------------------------------------|
//! | `scsi` | Include SCSI command parsing |
//! | `defmt` | Enable logging via [defmt](https://crates.io/crates/defmt) crate |
//!
//! [usb-device]: https://crates.io/crates/usb-device
//! [SCSI]: crate::subclass::scsi
//! [Bulk Only]: crate::transport::bbb
//! [Vendor Specific subclass]: crate::subclass
//! [CommandExecutor]: crate::transport::CommandExecutor
//! [ClassDriver]: crate::usbd::ClassDriver
//! [Usbd]: crate::usbd::Usbd

#![no_std]

pub mod buffer;
pub mod class;
pub mod descriptor;
pub(crate) mod fmt;
pub mod subclass;
pub mod transport;
pub mod usbd;

pub use class::{Config, MassStorage};

/// USB Mass Storage Class code
pub const CLASS_MASS_STORAGE: u8 = 0x08;
