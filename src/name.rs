// Chunk name handling: a 16-byte content hash treated as a random bit string.
//
// Bytes 0..=5 select the volume-index sample bit pattern, bytes 6..=9 select
// the owning zone, and the remaining bytes seed delta-index addressing and
// the open-chapter hash (spec.md §3).

use byteorder::{ByteOrder, LittleEndian};

pub const NAME_SIZE: usize = 16;

/// A 16-byte content-addressed chunk name.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct RecordName(pub [u8; NAME_SIZE]);

impl RecordName {
    #[must_use]
    pub fn new(bytes: [u8; NAME_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NAME_SIZE] {
        &self.0
    }

    /// A 64-bit sample of the first 8 bytes, used to address the dense delta
    /// index and (after reduction) the sparse sample test.
    #[must_use]
    pub fn dense_hash(&self) -> u64 {
        LittleEndian::read_u64(&self.0[0..8])
    }

    /// Bytes 6..=9, reduced to zone selection (spec.md §3).
    #[must_use]
    pub fn zone_hash(&self) -> u32 {
        u32::from_le_bytes([self.0[6], self.0[7], self.0[8], self.0[9]])
    }

    /// Selects the owning zone. A pure function of the name and zone count,
    /// stable across process restarts (spec.md invariant 2).
    #[must_use]
    pub fn zone(&self, zone_count: u32) -> u32 {
        if zone_count <= 1 {
            return 0;
        }
        self.zone_hash() % zone_count
    }

    /// Hash used for the sparse-sample test: is this name among the
    /// `1 / sample_rate` names tracked in the sparse portion of the volume
    /// index?
    #[must_use]
    pub fn is_sparse_sample(&self, sample_rate: u32) -> bool {
        if sample_rate <= 1 {
            return true;
        }
        (self.dense_hash() % u64::from(sample_rate)) == 0
    }

}

impl std::fmt::Debug for RecordName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Ord for RecordName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for RecordName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<[u8; NAME_SIZE]> for RecordName {
    fn from(value: [u8; NAME_SIZE]) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn zone_is_stable_function_of_name() {
        let name = RecordName::new([7; NAME_SIZE]);
        let z1 = name.zone(4);
        let z2 = name.zone(4);
        assert_eq!(z1, z2);
        assert!(z1 < 4);
    }

    #[test]
    fn single_zone_always_zone_zero() {
        let name = RecordName::new([9; NAME_SIZE]);
        assert_eq!(name.zone(1), 0);
    }

    #[test]
    fn sparse_sample_rate_one_always_sampled() {
        let name = RecordName::new([1; NAME_SIZE]);
        assert!(name.is_sparse_sample(1));
    }
}
