//! Reflected CRC-32 (polynomial 0xEDB88320), used as the repository's
//! non-cryptographic change-detection signature. This is exactly the IEEE 802.3
//! CRC-32 the `crc` crate already ships, so we reach for it rather than hand-roll
//! a table — the same dependency `loader/Cargo.toml` pulls in elsewhere in this
//! workspace.

use crc::crc32;

/// Compute the repository signature over `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32::checksum_ieee(bytes)
}
