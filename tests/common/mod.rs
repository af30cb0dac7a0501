#![allow(dead_code)]

use crate::common::bbb::{Cbw, Csw};
use crate::common::scsi::RamDisk;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::{UsbDirection, UsbError};
use usbd_mscd::buffer::IoBuf;
use usbd_mscd::usbd::{ClassDriver, ClassEvent, Completion, Ticket, Usbd};
use usbd_mscd::{Config, MassStorage};

pub mod bbb;

pub const PACKET_SIZE: [u16; 4] = [8, 16, 32, 64];

pub const MSC_INTERFACE: u8 = 1;
pub const MSC_ENDPOINT: u8 = 2;

pub type Driver = MassStorage<Vec<u8>, RamDisk>;

/// A read or write handed to the stack and not completed yet
pub struct Submission {
    pub ep: EndpointAddress,
    pub buf: IoBuf<Vec<u8>>,
    pub max_len: usize,
    pub ticket: Ticket,
}

/// Device stack stand-in. Records everything a class driver asks of it and holds
/// submissions until the test completes them.
#[derive(Default)]
pub struct MockUsbd {
    /// Number of buffers `io_create` hands out before failing, unlimited if `None`
    pub alloc_budget: Option<usize>,
    pub interfaces: Vec<u8>,
    pub endpoints: Vec<(u8, u8)>,
    pub opened: Vec<(EndpointAddress, EndpointType, u16)>,
    pub stalls: Vec<EndpointAddress>,
    pub pending_in: Option<Submission>,
    pub pending_out: Option<Submission>,
}

impl MockUsbd {
    /// Host sends `data` for the pending OUT submission
    pub fn complete_read(&mut self, data: &[u8]) -> ClassEvent<Vec<u8>> {
        let Submission {
            ep,
            mut buf,
            max_len,
            ticket,
        } = self.pending_out.take().expect("no read pending");
        assert!(data.len() <= max_len, "host sent more than requested");

        buf.storage_mut()[..data.len()].copy_from_slice(data);
        ClassEvent::Transfer(Completion {
            ticket,
            ep,
            buf,
            result: Ok(data.len()),
        })
    }

    /// Host receives the pending IN submission
    pub fn complete_write(&mut self) -> (Vec<u8>, ClassEvent<Vec<u8>>) {
        let Submission { ep, buf, ticket, .. } = self.pending_in.take().expect("no write pending");
        let data = buf.data().to_vec();
        let event = ClassEvent::Transfer(Completion {
            ticket,
            ep,
            buf,
            result: Ok(data.len()),
        });
        (data, event)
    }

    pub fn fail_read(&mut self, err: UsbError) -> ClassEvent<Vec<u8>> {
        let Submission { ep, buf, ticket, .. } = self.pending_out.take().expect("no read pending");
        ClassEvent::Transfer(Completion {
            ticket,
            ep,
            buf,
            result: Err(err),
        })
    }

    pub fn is_stalled(&self, ep: EndpointAddress) -> bool {
        self.stalls.contains(&ep)
    }
}

impl Usbd for MockUsbd {
    type Buf = Vec<u8>;

    fn io_create(&mut self, size: usize) -> Option<IoBuf<Vec<u8>>> {
        match self.alloc_budget.as_mut() {
            Some(0) => return None,
            Some(budget) => *budget -= 1,
            None => {}
        }
        Some(IoBuf::new(vec![0u8; size]))
    }

    fn register_interface(&mut self, iface: u8) {
        self.interfaces.push(iface);
    }

    fn register_endpoint(&mut self, iface: u8, ep: u8) {
        self.endpoints.push((iface, ep));
    }

    fn ep_open(&mut self, ep: EndpointAddress, ep_type: EndpointType, max_packet_size: u16) {
        self.opened.push((ep, ep_type, max_packet_size));
    }

    fn ep_read(&mut self, ep: EndpointAddress, buf: IoBuf<Vec<u8>>, max_len: usize, ticket: Ticket) {
        assert_eq!(UsbDirection::Out, ep.direction());
        assert!(self.pending_out.is_none(), "second read submitted on {:?}", ep);
        self.pending_out = Some(Submission {
            ep,
            buf,
            max_len,
            ticket,
        });
    }

    fn ep_write(&mut self, ep: EndpointAddress, buf: IoBuf<Vec<u8>>, ticket: Ticket) {
        assert_eq!(UsbDirection::In, ep.direction());
        assert!(self.pending_in.is_none(), "second write submitted on {:?}", ep);
        let max_len = buf.size();
        self.pending_in = Some(Submission {
            ep,
            buf,
            max_len,
            ticket,
        });
    }

    fn ep_set_stall(&mut self, ep: EndpointAddress) {
        self.stalls.push(ep);
    }
}

pub fn in_ep() -> EndpointAddress {
    EndpointAddress::from_parts(MSC_ENDPOINT as usize, UsbDirection::In)
}

pub fn out_ep() -> EndpointAddress {
    EndpointAddress::from_parts(MSC_ENDPOINT as usize, UsbDirection::Out)
}

/// Configuration with a HID interface 0 and a mass storage interface 1 on bulk EP2
#[rustfmt::skip]
pub fn config_descriptor(packet_size: u16) -> Vec<u8> {
    let [lo, hi] = packet_size.to_le_bytes();
    vec![
        0x09, 0x02, 0x39, 0x00, 0x02, 0x01, 0x00, 0x80, 0x32,
        0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00,
        0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3F, 0x00,
        0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x0A,
        0x09, 0x04, MSC_INTERFACE, 0x00, 0x02, 0x08, 0x06, 0x50, 0x00,
        0x07, 0x05, 0x80 | MSC_ENDPOINT, 0x02, lo, hi, 0x00,
        0x07, 0x05, MSC_ENDPOINT, 0x02, lo, hi, 0x00,
    ]
}

/// Configuration without any mass storage interface
#[rustfmt::skip]
pub fn hid_only_descriptor() -> Vec<u8> {
    vec![
        0x09, 0x02, 0x22, 0x00, 0x01, 0x01, 0x00, 0x80, 0x32,
        0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00,
        0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3F, 0x00,
        0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x0A,
    ]
}

/// A mass storage function plugged into a mock stack, driven from the host side
pub struct Bench {
    pub driver: Driver,
    pub usbd: MockUsbd,
}

impl Bench {
    pub fn new(config: Config) -> Self {
        Bench {
            driver: MassStorage::new(RamDisk::new(16), config).unwrap(),
            usbd: MockUsbd::default(),
        }
    }

    /// A bench whose function is already configured on EP2 with `packet_size`
    pub fn configured(packet_size: u16) -> Self {
        let mut bench = Bench::new(Config::default());
        bench.configure(&config_descriptor(packet_size));
        bench
    }

    pub fn configure(&mut self, cfg: &[u8]) {
        self.driver.configured(&mut self.usbd, cfg);
    }

    pub fn reset(&mut self) {
        self.driver.reset(&mut self.usbd);
    }

    pub fn dispatch(&mut self, event: ClassEvent<Vec<u8>>) -> Result<(), UsbError> {
        self.driver.event(&mut self.usbd, event)
    }

    pub fn send_cbw(&mut self, cbw: Cbw) {
        let event = self.usbd.complete_read(&cbw.into_bytes());
        self.dispatch(event).unwrap();
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        let event = self.usbd.complete_read(bytes);
        self.dispatch(event).unwrap();
    }

    pub fn recv_bytes(&mut self) -> Vec<u8> {
        let (data, event) = self.usbd.complete_write();
        self.dispatch(event).unwrap();
        data
    }

    pub fn recv_csw(&mut self) -> Csw {
        Csw::from_bytes(&self.recv_bytes())
    }

    pub fn class_request(&mut self, request: u8, data: &mut [u8]) -> Result<usize, UsbError> {
        let req = class_request(request, MSC_INTERFACE as u16);
        self.driver.control_setup(&mut self.usbd, &req, data)
    }
}

pub fn class_request(request: u8, index: u16) -> Request {
    Request {
        direction: if request == 0xFE {
            UsbDirection::In
        } else {
            UsbDirection::Out
        },
        request_type: RequestType::Class,
        recipient: Recipient::Interface,
        request,
        value: 0,
        index,
        length: if request == 0xFE { 1 } else { 0 },
    }
}
