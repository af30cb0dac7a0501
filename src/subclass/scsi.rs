//! USB SCSI

use num_enum::TryFromPrimitive;

/* SCSI codes */

/* SPC */
const TEST_UNIT_READY: u8 = 0x00;
const REQUEST_SENSE: u8 = 0x03;
const INQUIRY: u8 = 0x12;
const MODE_SENSE_6: u8 = 0x1A;
const START_STOP_UNIT: u8 = 0x1B;
const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
const MODE_SENSE_10: u8 = 0x5A;

/* SBC */
const READ_10: u8 = 0x28;
const READ_16: u8 = 0x88;
const READ_CAPACITY_10: u8 = 0x25;
const READ_CAPACITY_16: u8 = 0x9E;
const WRITE_10: u8 = 0x2A;
const WRITE_16: u8 = 0x8A;
const SYNCHRONIZE_CACHE_10: u8 = 0x35;

/* MMC */
const READ_FORMAT_CAPACITIES: u8 = 0x23;

/// SCSI command
///
/// Refer to specifications (SPC,SAM,SBC,MMC,etc.)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ScsiCommand {
    Unknown,

    /* SPC */
    Inquiry {
        evpd: bool,
        page_code: u8,
        alloc_len: u16,
    },
    TestUnitReady,
    RequestSense {
        desc: bool,
        alloc_len: u8,
    },
    ModeSense6 {
        dbd: bool,
        page_control: PageControl,
        page_code: u8,
        subpage_code: u8,
        alloc_len: u8,
    },
    ModeSense10 {
        dbd: bool,
        page_control: PageControl,
        page_code: u8,
        subpage_code: u8,
        alloc_len: u16,
    },
    StartStopUnit {
        start: bool,
        load_eject: bool,
    },
    PreventAllowMediumRemoval {
        prevent: bool,
    },

    /* SBC */
    ReadCapacity10,
    ReadCapacity16 {
        alloc_len: u32,
    },
    Read {
        lba: u64,
        len: u64,
    },
    Write {
        lba: u64,
        len: u64,
    },
    SynchronizeCache,

    /* MMC */
    ReadFormatCapacities {
        alloc_len: u16,
    },
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageControl {
    CurrentValues = 0b00,
    ChangeableValues = 0b01,
    DefaultValues = 0b10,
    SavedValues = 0b11,
}

impl PageControl {
    fn from_bits(byte: u8) -> Self {
        PageControl::try_from_primitive(byte >> 6).unwrap_or(PageControl::CurrentValues)
    }
}

impl ScsiCommand {
    /// Parses a command block as received in a CBW
    ///
    /// Fields beyond the end of `bytes` read as zero, so a truncated block never
    /// fails to parse; an unrecognised operation code gives [ScsiCommand::Unknown].
    pub fn parse(bytes: &[u8]) -> ScsiCommand {
        if bytes.is_empty() {
            return ScsiCommand::Unknown;
        }

        let mut cb = [0u8; 16];
        let len = bytes.len().min(cb.len());
        cb[..len].copy_from_slice(&bytes[..len]);

        match cb[0] {
            TEST_UNIT_READY => ScsiCommand::TestUnitReady,
            INQUIRY => ScsiCommand::Inquiry {
                evpd: (cb[1] & 0b00000001) != 0,
                page_code: cb[2],
                alloc_len: u16::from_be_bytes([cb[3], cb[4]]),
            },
            REQUEST_SENSE => ScsiCommand::RequestSense {
                desc: (cb[1] & 0b00000001) != 0,
                alloc_len: cb[4],
            },
            START_STOP_UNIT => ScsiCommand::StartStopUnit {
                start: (cb[4] & 0b00000001) != 0,
                load_eject: (cb[4] & 0b00000010) != 0,
            },
            PREVENT_ALLOW_MEDIUM_REMOVAL => ScsiCommand::PreventAllowMediumRemoval {
                prevent: (cb[4] & 0b00000011) != 0,
            },
            READ_CAPACITY_10 => ScsiCommand::ReadCapacity10,
            READ_CAPACITY_16 => ScsiCommand::ReadCapacity16 {
                alloc_len: u32::from_be_bytes([cb[10], cb[11], cb[12], cb[13]]),
            },
            READ_10 => ScsiCommand::Read {
                lba: u32::from_be_bytes([cb[2], cb[3], cb[4], cb[5]]) as u64,
                len: u16::from_be_bytes([cb[7], cb[8]]) as u64,
            },
            READ_16 => ScsiCommand::Read {
                lba: be_u64(&cb[2..10]),
                len: u32::from_be_bytes([cb[10], cb[11], cb[12], cb[13]]) as u64,
            },
            WRITE_10 => ScsiCommand::Write {
                lba: u32::from_be_bytes([cb[2], cb[3], cb[4], cb[5]]) as u64,
                len: u16::from_be_bytes([cb[7], cb[8]]) as u64,
            },
            WRITE_16 => ScsiCommand::Write {
                lba: be_u64(&cb[2..10]),
                len: u32::from_be_bytes([cb[10], cb[11], cb[12], cb[13]]) as u64,
            },
            SYNCHRONIZE_CACHE_10 => ScsiCommand::SynchronizeCache,
            MODE_SENSE_6 => ScsiCommand::ModeSense6 {
                dbd: (cb[1] & 0b00001000) != 0,
                page_control: PageControl::from_bits(cb[2]),
                page_code: cb[2] & 0b00111111,
                subpage_code: cb[3],
                alloc_len: cb[4],
            },
            MODE_SENSE_10 => ScsiCommand::ModeSense10 {
                dbd: (cb[1] & 0b00001000) != 0,
                page_control: PageControl::from_bits(cb[2]),
                page_code: cb[2] & 0b00111111,
                subpage_code: cb[3],
                alloc_len: u16::from_be_bytes([cb[7], cb[8]]),
            },
            READ_FORMAT_CAPACITIES => ScsiCommand::ReadFormatCapacities {
                alloc_len: u16::from_be_bytes([cb[7], cb[8]]),
            },
            _ => ScsiCommand::Unknown,
        }
    }
}

fn be_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .fold(0u64, |acc, &byte| (acc << 8) | byte as u64)
}
