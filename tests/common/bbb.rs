use num_enum::TryFromPrimitive;
use usbd_mscd::transport::bbb::{CBW_LEN, CSW_LEN};
use usbd_mscd::transport::{CommandStatus, DataDirection};

const MAX_CB_LEN: usize = 16;

/// Host side Command Block Wrapper
pub struct Cbw {
    pub tag: u32,
    pub data_transfer_len: u32,
    pub direction: DataDirection,
    pub lun: u8,
    pub block: Vec<u8>,
}

impl Cbw {
    pub fn new(tag: u32, data_transfer_len: u32, direction: DataDirection, block: Vec<u8>) -> Self {
        Cbw {
            tag,
            data_transfer_len,
            direction,
            lun: 0,
            block,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        const CBW_SIGNATURE_LE: [u8; 4] = 0x43425355u32.to_le_bytes();

        assert!(self.block.len() <= MAX_CB_LEN);

        let mut bytes = vec![];
        bytes.extend_from_slice(CBW_SIGNATURE_LE.as_slice()); // signature
        bytes.extend_from_slice(self.tag.to_le_bytes().as_slice()); // tag
        bytes.extend_from_slice(self.data_transfer_len.to_le_bytes().as_slice()); // data transfer len

        let direction = match self.direction {
            DataDirection::In => 1_u8 << 7,
            DataDirection::Out | DataDirection::NotExpected => 0u8,
        };
        bytes.push(direction); // direction
        bytes.push(self.lun); // lun
        bytes.push(self.block.len() as u8); // block size

        let mut block = [0u8; MAX_CB_LEN];
        block[..self.block.len()].copy_from_slice(self.block.as_slice());
        bytes.extend_from_slice(block.as_slice()); // block

        assert_eq!(CBW_LEN, bytes.len());
        bytes
    }
}

/// Host side Command Status Wrapper
#[derive(Debug, Eq, PartialEq)]
pub struct Csw {
    pub tag: u32,
    pub residue: u32,
    pub status: CommandStatus,
}

impl Csw {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        const CSW_SIGNATURE_LE: [u8; 4] = 0x53425355u32.to_le_bytes();

        assert_eq!(CSW_LEN, bytes.len());
        assert_eq!(CSW_SIGNATURE_LE.as_slice(), &bytes[..4]);

        Csw {
            tag: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            residue: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            status: CommandStatus::try_from_primitive(bytes[12]).unwrap(),
        }
    }
}
