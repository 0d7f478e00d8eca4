//! The 10-byte common header shared by every PDR, little-endian, as defined in
//! DSP0248. The core never looks past byte 10; record bodies are opaque.

use crate::config::COMMON_HEADER_LEN;
use crate::error::{PdrError, PdrResult};

/// Parsed view of a record's common header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CommonHeader {
    pub record_handle: u32,
    pub header_version: u8,
    pub pdr_type: u8,
    pub record_change_number: u16,
    pub data_length: u16,
}

impl CommonHeader {
    /// Constant header version every record must carry.
    pub const HEADER_VERSION: u8 = 0x01;

    /// Parse the header from the first `COMMON_HEADER_LEN` bytes of `bytes`.
    /// Fails `InvalidLength` if fewer than 10 bytes are available.
    pub fn parse(bytes: &[u8]) -> PdrResult<Self> {
        if bytes.len() < COMMON_HEADER_LEN {
            return Err(PdrError::InvalidLength);
        }
        Ok(CommonHeader {
            record_handle: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            header_version: bytes[4],
            pdr_type: bytes[5],
            record_change_number: u16::from_le_bytes([bytes[6], bytes[7]]),
            data_length: u16::from_le_bytes([bytes[8], bytes[9]]),
        })
    }

    /// Serialize the header into the first `COMMON_HEADER_LEN` bytes of `out`.
    /// Fails `InvalidLength` if `out` is too small.
    pub fn write_into(&self, out: &mut [u8]) -> PdrResult<()> {
        if out.len() < COMMON_HEADER_LEN {
            return Err(PdrError::InvalidLength);
        }
        out[0..4].copy_from_slice(&self.record_handle.to_le_bytes());
        out[4] = self.header_version;
        out[5] = self.pdr_type;
        out[6..8].copy_from_slice(&self.record_change_number.to_le_bytes());
        out[8..10].copy_from_slice(&self.data_length.to_le_bytes());
        Ok(())
    }

    /// Total on-the-wire size of the record this header describes (header + body).
    pub fn total_size(&self) -> usize {
        COMMON_HEADER_LEN + self.data_length as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let h = CommonHeader {
            record_handle: 1,
            header_version: CommonHeader::HEADER_VERSION,
            pdr_type: 1,
            record_change_number: 0,
            data_length: 2,
        };
        let mut buf = [0u8; 10];
        h.write_into(&mut buf).unwrap();
        assert_eq!(buf, [0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x00]);
        assert_eq!(CommonHeader::parse(&buf).unwrap(), h);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert_eq!(CommonHeader::parse(&[0u8; 9]), Err(PdrError::InvalidLength));
    }
}
