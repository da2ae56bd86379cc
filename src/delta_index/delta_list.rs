// A single delta list: an ordered sequence of entries addressed by a
// hashed prefix of the name (spec.md §4.1). Entries are kept sorted by
// address in memory; the packed bit-stream form (see `bit_stream.rs`) is
// only materialized when a list is serialized to a save-slot snapshot.
//
// Each entry carries the full 16-byte name rather than eliding it behind a
// truncated address + collision-suffix, trading the memory density of the
// original design for an implementation with no ambiguity: identity is
// always an exact name comparison, and "is this address shared by more
// than one name" (spec.md's collision case) falls out of that comparison
// for free instead of needing a side channel.

use super::bit_stream::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::name::{RecordName, NAME_SIZE};

/// Bits used to encode a VCN payload. 40 bits covers VCNs well past any
/// realistic volume lifetime while keeping entries compact.
const VCN_BITS: u8 = 40;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaEntry {
    /// Address within the list's address space (a reduced hash of the
    /// name), used only for sort order / gap encoding.
    pub address: u32,
    pub name: RecordName,
    pub vcn: u64,
    /// `true` once more than one distinct name has been observed at this
    /// address within this list — the *first* name to arrive at an
    /// address is never a collision; later arrivals are (spec.md §4.1).
    pub is_collision: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DeltaList {
    entries: Vec<DeltaEntry>,
}

impl DeltaList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn find(&self, name: &RecordName) -> Option<&DeltaEntry> {
        self.entries.iter().find(|e| &e.name == name)
    }

    fn position_for_insert(&self, address: u32) -> usize {
        self.entries.partition_point(|e| e.address < address)
    }

    /// Inserts a non-collision hint for `name`, or updates it in place if
    /// already present. If a *different* name already occupies the same
    /// address, the new entry is marked as a collision (spec.md §4.1).
    /// `max_entries` enforces the overflow limit (spec.md: overflow is
    /// reported, never fatal).
    pub fn put(&mut self, name: &RecordName, address: u32, vcn: u64, max_entries: usize) -> Result<()> {
        if let Some(existing) = self.entries.iter_mut().find(|e| &e.name == name) {
            existing.vcn = vcn;
            return Ok(());
        }
        if self.entries.len() >= max_entries {
            return Err(Error::Overflow { zone: 0, list: 0 });
        }
        let is_collision = self.entries.iter().any(|e| e.address == address);
        let pos = self.position_for_insert(address);
        self.entries.insert(
            pos,
            DeltaEntry {
                address,
                name: *name,
                vcn,
                is_collision,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn set_chapter(&mut self, name: &RecordName, vcn: u64) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.name == name) {
            entry.vcn = vcn;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn remove(&mut self, name: &RecordName) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.name != name);
        self.entries.len() != before
    }

    /// Drops every entry pointing at `vcn` — used when the physical chapter
    /// that `vcn` occupied is reused by a newer virtual chapter, or when a
    /// chapter finally ages out of the sparse band (spec.md §4.1/§4.4).
    pub fn purge_chapter(&mut self, vcn: u64) {
        self.entries.retain(|e| e.vcn != vcn);
    }

    /// Keeps only entries satisfying `keep` — used to demote a chapter's
    /// dense entries down to sampled-only as it crosses from the dense
    /// band into the sparse band of the rolling window.
    pub fn retain(&mut self, mut keep: impl FnMut(&DeltaEntry) -> bool) {
        self.entries.retain(|e| keep(e));
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &DeltaEntry> {
        self.entries.iter()
    }

    /// Serializes the list as packed (delta, flag, name, vcn) bit groups,
    /// honoring the "packed bit-stream" design note for the persisted
    /// form. Deltas are unary-coded (cheap when the list is sparse, which
    /// it is for any well-sized geometry).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BitWriter::new();
        writer.push_bits(self.entries.len() as u64, 32);
        let mut prev_address = 0u32;
        for entry in &self.entries {
            let delta = entry.address.saturating_sub(prev_address);
            prev_address = entry.address;
            writer.push_unary(delta);
            writer.push_bit(entry.is_collision);
            writer.push_bits(entry.vcn, VCN_BITS);
            for byte in entry.name.as_bytes() {
                writer.push_bits(u64::from(*byte), 8);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(bytes);
        let count = reader
            .read_bits(32)
            .ok_or_else(|| Error::CorruptData("truncated delta list header".into()))?;
        let mut entries = Vec::with_capacity(count as usize);
        let mut address = 0u32;
        for _ in 0..count {
            let delta = reader
                .read_unary()
                .ok_or_else(|| Error::CorruptData("truncated delta list entry".into()))?;
            address = address.saturating_add(delta);
            let is_collision = reader
                .read_bit()
                .ok_or_else(|| Error::CorruptData("truncated delta list flag".into()))?;
            let vcn = reader
                .read_bits(VCN_BITS)
                .ok_or_else(|| Error::CorruptData("truncated delta list vcn".into()))?;
            let mut name = [0u8; NAME_SIZE];
            for byte in &mut name {
                *byte = reader
                    .read_bits(8)
                    .ok_or_else(|| Error::CorruptData("truncated delta list name".into()))?
                    as u8;
            }
            entries.push(DeltaEntry {
                address,
                name: RecordName::new(name),
                vcn,
                is_collision,
            });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn name(byte: u8) -> RecordName {
        RecordName::new([byte; NAME_SIZE])
    }

    #[test]
    fn put_then_find() {
        let mut list = DeltaList::new();
        list.put(&name(1), 10, 3, 100).unwrap();
        let found = list.find(&name(1)).unwrap();
        assert_eq!(found.vcn, 3);
        assert!(!found.is_collision);
    }

    #[test]
    fn put_twice_updates_in_place() {
        let mut list = DeltaList::new();
        list.put(&name(1), 10, 3, 100).unwrap();
        list.put(&name(1), 10, 9, 100).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.find(&name(1)).unwrap().vcn, 9);
    }

    #[test]
    fn overflow_is_reported_not_fatal() {
        let mut list = DeltaList::new();
        list.put(&name(1), 1, 1, 1).unwrap();
        let err = list.put(&name(2), 2, 1, 1).unwrap_err();
        assert!(err.is_swallowed_during_write());
    }

    #[test]
    fn second_name_at_same_address_is_a_collision() {
        let mut list = DeltaList::new();
        list.put(&name(1), 10, 1, 100).unwrap();
        list.put(&name(2), 10, 2, 100).unwrap();

        let first = list.find(&name(1)).unwrap();
        assert!(!first.is_collision);
        let second = list.find(&name(2)).unwrap();
        assert!(second.is_collision);
    }

    #[test]
    fn remove_deletes_matching_entry() {
        let mut list = DeltaList::new();
        list.put(&name(5), 5, 1, 100).unwrap();
        assert!(list.remove(&name(5)));
        assert!(list.find(&name(5)).is_none());
    }

    #[test]
    fn purge_chapter_drops_stale_entries() {
        let mut list = DeltaList::new();
        list.put(&name(1), 1, 4, 100).unwrap();
        list.put(&name(2), 2, 7, 100).unwrap();
        list.purge_chapter(4);
        assert!(list.find(&name(1)).is_none());
        assert!(list.find(&name(2)).is_some());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut list = DeltaList::new();
        list.put(&name(3), 3, 11, 100).unwrap();
        list.put(&name(40), 40, 22, 100).unwrap();
        list.put(&name(41), 40, 33, 100).unwrap();

        let bytes = list.encode();
        let decoded = DeltaList::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), list.len());
        assert_eq!(decoded.find(&name(3)).unwrap().vcn, 11);
        assert_eq!(decoded.find(&name(41)).unwrap().vcn, 33);
        assert!(decoded.find(&name(41)).unwrap().is_collision);
    }
}
