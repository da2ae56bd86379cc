// Every region on the device starts with a small header: magic, version,
// payload size, and a checksum of the payload (spec.md §6 "On-disk
// format"). Used by both the config region and each save slot.

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

pub(crate) const MAGIC: u32 = 0x5544_5331; // "UDS1", little-endian u32

pub(crate) const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct RegionHeader {
    pub magic: u32,
    pub version_major: u32,
    pub version_minor: u32,
    pub size: u64,
    pub payload_checksum: u32,
}

fn checksum(payload: &[u8]) -> u32 {
    (xxh3_64(payload) & 0xFFFF_FFFF) as u32
}

impl RegionHeader {
    #[must_use]
    pub fn for_payload(version_major: u32, version_minor: u32, payload: &[u8]) -> Self {
        Self {
            magic: MAGIC,
            version_major,
            version_minor,
            size: payload.len() as u64,
            payload_checksum: checksum(payload),
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version_major.to_le_bytes());
        out[8..12].copy_from_slice(&self.version_minor.to_le_bytes());
        out[12..20].copy_from_slice(&self.size.to_le_bytes());
        out[20..24].copy_from_slice(&self.payload_checksum.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::ShortRead {
                expected: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(Error::CorruptComponent("region magic mismatch".into()));
        }
        Ok(Self {
            magic,
            version_major: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            version_minor: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            size: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
            payload_checksum: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        })
    }
}

/// Encodes `payload` behind a fresh header: `[header][payload]`.
#[must_use]
pub(crate) fn write_region(version_major: u32, version_minor: u32, payload: &[u8]) -> Vec<u8> {
    let header = RegionHeader::for_payload(version_major, version_minor, payload);
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Decodes a `[header][payload]` region, verifying the payload checksum.
pub(crate) fn read_region(bytes: &[u8]) -> Result<(RegionHeader, &[u8])> {
    let header = RegionHeader::decode(bytes)?;
    let payload = bytes
        .get(HEADER_SIZE..HEADER_SIZE + header.size as usize)
        .ok_or_else(|| Error::CorruptComponent("region payload truncated".into()))?;
    if checksum(payload) != header.payload_checksum {
        return Err(Error::CorruptData("region payload checksum mismatch".into()));
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn round_trip() {
        let encoded = write_region(1, 0, b"hello region");
        let (header, payload) = read_region(&encoded).unwrap();
        assert_eq!(header.version_major, 1);
        assert_eq!(payload, b"hello region");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = write_region(1, 0, b"hi");
        encoded[0] ^= 0xFF;
        assert!(RegionHeader::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut encoded = write_region(1, 0, b"hello region");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(read_region(&encoded).is_err());
    }
}
