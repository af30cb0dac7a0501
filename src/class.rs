//! Mass Storage class driver

use crate::descriptor::find_bulk_interface;
use crate::fmt::{debug, info, trace, warning};
use crate::subclass::InterfaceSubclass;
use crate::transport::bbb::{BulkOnly, BulkOnlyError, ClassRequest, MAX_LUN_LIMIT};
use crate::transport::{CommandExecutor, InterfaceProtocol};
use crate::usbd::{ClassDriver, ClassEvent, Usbd};
use crate::CLASS_MASS_STORAGE;
use core::borrow::BorrowMut;
use num_enum::TryFromPrimitive;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::{UsbDirection, UsbError};

/// Run-time configuration of a [MassStorage] function
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Number of logical units behind the interface, 1 to 16
    pub lun_count: u8,
    /// Requested size of the data phase buffer. Rounded down to whole packets, at
    /// least one packet.
    pub io_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lun_count: 1,
            io_size: 512,
        }
    }
}

/// USB Mass Storage Bulk-Only function
///
/// Registered with the device stack once, at stack initialization. A
/// [BulkOnly] session exists only between a configuration that contains a mass
/// storage interface and the next reset.
///
/// Every session gets a new generation. Completions that were submitted by an
/// earlier session are dropped when they arrive.
pub struct MassStorage<B: BorrowMut<[u8]>, E: CommandExecutor> {
    executor: E,
    config: Config,
    generation: u16,
    session: Option<BulkOnly<B>>,
}

impl<B: BorrowMut<[u8]>, E: CommandExecutor> MassStorage<B, E> {
    /// Creates a Mass Storage function
    ///
    /// # Arguments
    /// * `executor` - the storage command layer
    /// * `config` - LUN count and data buffer size
    ///
    /// # Errors
    /// * [InvalidMaxLun] - `lun_count` is 0 or above 16
    /// * [BufferTooSmall] - `io_size` is 0
    ///
    /// [InvalidMaxLun]: crate::transport::bbb::BulkOnlyError::InvalidMaxLun
    /// [BufferTooSmall]: crate::transport::bbb::BulkOnlyError::BufferTooSmall
    pub fn new(executor: E, config: Config) -> Result<Self, BulkOnlyError> {
        if config.lun_count == 0 || config.lun_count - 1 > MAX_LUN_LIMIT {
            return Err(BulkOnlyError::InvalidMaxLun);
        }
        if config.io_size == 0 {
            return Err(BulkOnlyError::BufferTooSmall);
        }

        Ok(MassStorage {
            executor,
            config,
            generation: 0,
            session: None,
        })
    }

    /// The session of the configured interface, if any
    pub fn session(&self) -> Option<&BulkOnly<B>> {
        self.session.as_ref()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Highest LUN index, as reported by Get Max LUN
    pub fn max_lun(&self) -> u8 {
        self.config.lun_count - 1
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!(
                "usb: msc: Close session, iface: {}",
                session.interface_number()
            );
            self.generation = self.generation.wrapping_add(1);
        }
    }
}

impl<U, E> ClassDriver<U> for MassStorage<U::Buf, E>
where
    U: Usbd,
    E: CommandExecutor,
{
    fn configured(&mut self, usbd: &mut U, cfg: &[u8]) {
        let Some((iface, ep)) = find_bulk_interface(cfg, CLASS_MASS_STORAGE) else {
            debug!("usb: msc: No mass storage interface");
            return;
        };

        if ep.number() == 0 || ep.max_packet_size == 0 {
            warning!("usb: msc: Unusable bulk endpoint: {}", ep);
            return;
        }

        if !matches!(
            InterfaceProtocol::try_from_primitive(iface.protocol),
            Ok(InterfaceProtocol::BulkOnly)
        ) {
            warning!("usb: msc: Interface protocol {} is not Bulk Only", iface.protocol);
        }
        debug!(
            "usb: msc: Interface subclass: {}",
            InterfaceSubclass::try_from_primitive(iface.subclass).ok()
        );

        // a new configuration replaces whatever was there
        self.close_session();

        let Some(mut session) = BulkOnly::new(
            usbd,
            iface.number,
            ep.number(),
            ep.max_packet_size,
            self.max_lun(),
            self.config.io_size,
            self.generation,
        ) else {
            warning!("usb: msc: Out of IO buffers, function not installed");
            return;
        };

        info!(
            "usb: msc: Found MSC interface: {}, EP{}, size: {}",
            iface.number,
            ep.number(),
            ep.max_packet_size
        );

        usbd.register_interface(iface.number);
        usbd.register_endpoint(iface.number, ep.number());
        session.open(usbd);

        self.session = Some(session);
    }

    fn reset(&mut self, _usbd: &mut U) {
        info!("usb: msc: Reset");
        self.close_session();
    }

    fn suspend(&mut self, _usbd: &mut U) {
        debug!("usb: msc: Suspend");
    }

    fn resume(&mut self, _usbd: &mut U) {
        debug!("usb: msc: Resume");
    }

    fn control_setup(
        &mut self,
        usbd: &mut U,
        req: &Request,
        data: &mut [u8],
    ) -> Result<usize, UsbError> {
        // not interested in this request
        if !(req.request_type == RequestType::Class && req.recipient == Recipient::Interface) {
            return Err(UsbError::Unsupported);
        }
        if let Some(session) = self.session.as_ref() {
            if req.index != session.interface_number() as u16 {
                return Err(UsbError::Unsupported);
            }
        }

        info!("usb: msc: Recv class request: {}", req.request);

        let Ok(request) = ClassRequest::try_from_primitive(req.request) else {
            return Err(UsbError::Unsupported);
        };

        // BOT 3.1 and 3.2
        let well_formed = match request {
            ClassRequest::GetMaxLun => {
                req.direction == UsbDirection::In && req.value == 0 && req.length == 1
            }
            ClassRequest::BulkOnlyMassStorageReset => {
                req.direction == UsbDirection::Out && req.value == 0 && req.length == 0
            }
        };
        if !well_formed {
            warning!("usb: msc: Malformed class request: {}", request);
            return Err(UsbError::Unsupported);
        }

        match request {
            ClassRequest::GetMaxLun => {
                let max_lun = self.max_lun();
                let byte = data.first_mut().ok_or(UsbError::BufferOverflow)?;
                *byte = max_lun;
                debug!("usb: msc: Get Max LUN: {}", max_lun);
                Ok(1)
            }
            ClassRequest::BulkOnlyMassStorageReset => {
                match self.session.as_mut() {
                    Some(session) => session.mass_storage_reset(usbd),
                    None => debug!("usb: msc: Reset without a session"),
                }
                Ok(0)
            }
        }
    }

    fn event(&mut self, usbd: &mut U, event: ClassEvent<U::Buf>) -> Result<(), UsbError> {
        match event {
            ClassEvent::Transfer(completion) => match self.session.as_mut() {
                Some(session) if session.generation() == completion.ticket.generation => {
                    session.complete(usbd, &mut self.executor, completion)
                }
                _ => {
                    // the session that submitted it is gone; the buffer goes with it
                    trace!("usb: msc: Drop completion of a closed session");
                    Ok(())
                }
            },
            ClassEvent::Request { code } => {
                info!("usb: msc: Unsupported request: {}", code);
                Err(UsbError::Unsupported)
            }
        }
    }
}
