//! Configuration descriptor walking

use usb_device::descriptor::descriptor_type;

const INTERFACE_DESCRIPTOR_LEN: usize = 9;
const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

const EP_TRANSFER_TYPE_MASK: u8 = 0b11;
const EP_TRANSFER_TYPE_BULK: u8 = 0b10;
const EP_MAX_PACKET_SIZE_MASK: u16 = 0x07FF;

/// Standard interface descriptor fields
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alt_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Standard endpoint descriptor fields
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Endpoint number, without the direction bit
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    pub fn is_bulk(&self) -> bool {
        self.attributes & EP_TRANSFER_TYPE_MASK == EP_TRANSFER_TYPE_BULK
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Descriptor<'a> {
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
    /// Any other descriptor, raw bytes including the header
    Other(&'a [u8]),
}

/// Iterates over the descriptors of a configuration descriptor set.
///
/// Walking stops at `wTotalLength` or at the first malformed descriptor header.
pub struct Descriptors<'a> {
    bytes: &'a [u8],
}

impl<'a> Descriptors<'a> {
    pub fn new(cfg: &'a [u8]) -> Self {
        let bytes = match cfg {
            [_, ty, lo, hi, ..] if *ty == descriptor_type::CONFIGURATION => {
                let total = u16::from_le_bytes([*lo, *hi]) as usize;
                &cfg[..total.min(cfg.len())]
            }
            _ => cfg,
        };
        Descriptors { bytes }
    }
}

impl<'a> Iterator for Descriptors<'a> {
    type Item = Descriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.bytes.first()? as usize;
        if len < 2 || len > self.bytes.len() {
            self.bytes = &[];
            return None;
        }

        let (raw, rest) = self.bytes.split_at(len);
        self.bytes = rest;

        Some(match raw[1] {
            descriptor_type::INTERFACE if len >= INTERFACE_DESCRIPTOR_LEN => {
                Descriptor::Interface(InterfaceDescriptor {
                    number: raw[2],
                    alt_setting: raw[3],
                    class: raw[5],
                    subclass: raw[6],
                    protocol: raw[7],
                })
            }
            descriptor_type::ENDPOINT if len >= ENDPOINT_DESCRIPTOR_LEN => {
                Descriptor::Endpoint(EndpointDescriptor {
                    address: raw[2],
                    attributes: raw[3],
                    max_packet_size: u16::from_le_bytes([raw[4], raw[5]])
                        & EP_MAX_PACKET_SIZE_MASK,
                })
            }
            _ => Descriptor::Other(raw),
        })
    }
}

/// Finds the first interface of class `class` that owns a bulk endpoint,
/// returning it together with its first bulk endpoint.
pub fn find_bulk_interface(
    cfg: &[u8],
    class: u8,
) -> Option<(InterfaceDescriptor, EndpointDescriptor)> {
    let mut current: Option<InterfaceDescriptor> = None;

    for desc in Descriptors::new(cfg) {
        match desc {
            Descriptor::Interface(iface) => {
                current = Some(iface).filter(|iface| iface.class == class);
            }
            Descriptor::Endpoint(ep) if ep.is_bulk() => {
                if let Some(iface) = current {
                    return Some((iface, ep));
                }
            }
            _ => {}
        }
    }

    None
}
