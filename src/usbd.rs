//! Device stack boundary
//!
//! The USB device stack is not part of this crate. It is described here by two
//! traits:
//! * [Usbd] - what a class driver may ask of the stack: buffers, interface and
//!   endpoint registration, non-blocking endpoint submissions and stalls.
//! * [ClassDriver] - the lifecycle and request callbacks the stack invokes on a
//!   registered class driver.
//!
//! Every submission is fire-and-forget. The stack reports its outcome later as a
//! [ClassEvent::Transfer] carrying the submitted buffer and the [Ticket] it was
//! submitted with.

use crate::buffer::IoBuf;
use core::borrow::BorrowMut;
use usb_device::control::Request;
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::UsbError;

/// Services a USB device stack offers to its class drivers
pub trait Usbd {
    /// Storage backing the transfer buffers handed out by [Usbd::io_create]
    type Buf: BorrowMut<[u8]>;

    /// Creates an empty transfer buffer able to hold `size` bytes.
    ///
    /// Returns `None` when the stack runs out of buffer memory.
    fn io_create(&mut self, size: usize) -> Option<IoBuf<Self::Buf>>;

    /// Routes class requests for interface `iface` to the calling driver
    fn register_interface(&mut self, iface: u8);

    /// Routes completions on endpoint number `ep` (both directions) to the driver of `iface`
    fn register_endpoint(&mut self, iface: u8, ep: u8);

    fn ep_open(&mut self, ep: EndpointAddress, ep_type: EndpointType, max_packet_size: u16);

    /// Queues a read of up to `max_len` bytes into `buf`.
    ///
    /// The stack never blocks; the result comes back as a [Completion] with the
    /// same `ticket`, even if the transfer fails.
    fn ep_read(
        &mut self,
        ep: EndpointAddress,
        buf: IoBuf<Self::Buf>,
        max_len: usize,
        ticket: Ticket,
    );

    /// Queues a write of the valid bytes of `buf`. See [Usbd::ep_read].
    fn ep_write(&mut self, ep: EndpointAddress, buf: IoBuf<Self::Buf>, ticket: Ticket);

    fn ep_set_stall(&mut self, ep: EndpointAddress);
}

/// A class driver as seen by the device stack
///
/// The stack guarantees that calls into one driver are serialized.
pub trait ClassDriver<U: Usbd> {
    /// The device has been configured. `cfg` is the raw configuration descriptor,
    /// including all interface and endpoint descriptors.
    fn configured(&mut self, usbd: &mut U, cfg: &[u8]);

    /// The interface is being reset or the device deconfigured
    fn reset(&mut self, usbd: &mut U);

    fn suspend(&mut self, usbd: &mut U);

    fn resume(&mut self, usbd: &mut U);

    /// Handles a setup packet addressed to this driver.
    ///
    /// Returns the number of bytes of `data` to send in the data stage.
    /// [UsbError::Unsupported] lets the stack decide how to reject the request.
    fn control_setup(
        &mut self,
        usbd: &mut U,
        req: &Request,
        data: &mut [u8],
    ) -> Result<usize, UsbError>;

    /// Handles an event posted to this driver
    fn event(&mut self, usbd: &mut U, event: ClassEvent<U::Buf>) -> Result<(), UsbError>;
}

/// An event delivered to a class driver
pub enum ClassEvent<B: BorrowMut<[u8]>> {
    /// A previously submitted endpoint read or write has finished
    Transfer(Completion<B>),
    /// A request that did not originate from the USB hardware driver
    Request { code: u32 },
}

/// Outcome of an endpoint submission
pub struct Completion<B: BorrowMut<[u8]>> {
    /// The ticket the transfer was submitted with
    pub ticket: Ticket,
    pub ep: EndpointAddress,
    /// The submitted buffer. After a successful read its size is the number of bytes received.
    pub buf: IoBuf<B>,
    /// Number of bytes transferred
    pub result: Result<usize, UsbError>,
}

/// Opaque submission identifier, echoed back by the stack in the [Completion]
///
/// It binds a completion to the session that submitted it, so that a transfer
/// outliving its session is recognised and dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket {
    pub(crate) generation: u16,
    pub(crate) epoch: u16,
    pub(crate) slot: Slot,
}

/// Which session buffer a submission was made with
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Slot {
    Control,
    Data,
}
