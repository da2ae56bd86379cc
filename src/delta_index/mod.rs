// Delta index: a packed, prefix-addressed associative array keyed by chunk
// name (spec.md §4.1). Used both as the "dense" index (covers the dense
// band of the window) and, with a much smaller list count, the "sparse"
// per-chapter index decoded into the sparse cache (spec.md §4.3/§9).

mod bit_stream;
mod delta_list;

pub use delta_list::DeltaEntry;
use delta_list::DeltaList;

use crate::error::{Error, Result};
use crate::name::RecordName;

/// A name's resolved position: which list it addresses, and its address
/// within that list's address space.
fn list_and_address(name: &RecordName, num_lists: u32) -> (usize, u32) {
    let hash = name.dense_hash();
    let list = (hash >> 32) % u64::from(num_lists);
    let address = hash as u32;
    (list as usize, address)
}

#[derive(Clone, Debug)]
pub struct DeltaIndex {
    lists: Vec<DeltaList>,
    max_entries_per_list: usize,
}

impl DeltaIndex {
    #[must_use]
    pub fn new(num_lists: u32, max_entries_per_list: usize) -> Self {
        Self {
            lists: vec![DeltaList::new(); num_lists as usize],
            max_entries_per_list,
        }
    }

    #[must_use]
    pub fn num_lists(&self) -> u32 {
        self.lists.len() as u32
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lists.iter().map(DeltaList::len).sum()
    }

    /// Read-only lookup: returns the hint entry for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &RecordName) -> Option<&DeltaEntry> {
        let (list, _) = list_and_address(name, self.num_lists());
        self.lists.get(list)?.find(name)
    }

    pub fn put(&mut self, name: &RecordName, vcn: u64) -> Result<()> {
        let (list, address) = list_and_address(name, self.num_lists());
        let max = self.max_entries_per_list;
        self.lists
            .get_mut(list)
            .expect("list index is always in bounds")
            .put(name, address, vcn, max)
            .map_err(|_| Error::Overflow {
                zone: 0,
                list: list as u32,
            })
    }

    #[must_use]
    pub fn set_chapter(&mut self, name: &RecordName, vcn: u64) -> bool {
        let (list, _) = list_and_address(name, self.num_lists());
        self.lists
            .get_mut(list)
            .expect("list index is always in bounds")
            .set_chapter(name, vcn)
    }

    #[must_use]
    pub fn remove(&mut self, name: &RecordName) -> bool {
        let (list, _) = list_and_address(name, self.num_lists());
        self.lists
            .get_mut(list)
            .expect("list index is always in bounds")
            .remove(name)
    }

    /// Purges every entry pointing at `vcn`, across all lists — called when
    /// the physical chapter `vcn` occupied is about to be overwritten by a
    /// newer virtual chapter (`set_open_chapter`).
    pub fn purge_chapter(&mut self, vcn: u64) {
        for list in &mut self.lists {
            list.purge_chapter(vcn);
        }
    }

    /// Drops every entry pointing at `vcn` whose name is not a sparse
    /// sample — the demotion step a chapter goes through as it crosses from
    /// the dense band into the sparse band of the rolling window (spec.md
    /// §4.1). Sampled entries survive so the sparse band can still answer
    /// queries for them.
    pub fn demote_chapter_to_sparse(&mut self, vcn: u64, sample_rate: u32) {
        for list in &mut self.lists {
            list.retain(|entry| entry.vcn != vcn || entry.name.is_sparse_sample(sample_rate));
        }
    }

    /// Encodes every list, in order, as `(list_len, bytes)` pairs — the
    /// on-disk / save-slot form of the index.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.lists.len() as u32).to_le_bytes());
        for list in &self.lists {
            let bytes = list.encode();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    pub fn decode(bytes: &[u8], max_entries_per_list: usize) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::CorruptData("truncated delta index header".into()));
        }
        let num_lists = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let mut lists = Vec::with_capacity(num_lists as usize);
        let mut pos = 4usize;
        for _ in 0..num_lists {
            let len_bytes = bytes
                .get(pos..pos + 4)
                .ok_or_else(|| Error::CorruptData("truncated delta list length".into()))?;
            let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            pos += 4;
            let list_bytes = bytes
                .get(pos..pos + len)
                .ok_or_else(|| Error::CorruptData("truncated delta list body".into()))?;
            pos += len;
            lists.push(DeltaList::decode(list_bytes)?);
        }
        Ok(Self {
            lists,
            max_entries_per_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn name(byte: u8) -> RecordName {
        RecordName::new([byte; 16])
    }

    #[test]
    fn put_and_get_round_trip() {
        let mut idx = DeltaIndex::new(16, 1000);
        idx.put(&name(1), 42).unwrap();
        assert_eq!(idx.get(&name(1)).unwrap().vcn, 42);
    }

    #[test]
    fn remove_then_get_misses() {
        let mut idx = DeltaIndex::new(16, 1000);
        idx.put(&name(3), 1).unwrap();
        assert!(idx.remove(&name(3)));
        assert!(idx.get(&name(3)).is_none());
    }

    #[test]
    fn purge_chapter_invalidates_stale_hints() {
        let mut idx = DeltaIndex::new(16, 1000);
        idx.put(&name(5), 2).unwrap();
        idx.purge_chapter(2);
        assert!(idx.get(&name(5)).is_none());
    }

    #[test]
    fn demotion_keeps_only_sampled_names() {
        let mut idx = DeltaIndex::new(16, 1000);
        // sample_rate 1 means every name samples; pick distinct names and a
        // rate that actually excludes one of them.
        let sampled = name(0); // dense_hash() % 4 == 0 for an all-zero prefix
        let unsampled = name(1);
        idx.put(&sampled, 9).unwrap();
        idx.put(&unsampled, 9).unwrap();
        idx.demote_chapter_to_sparse(9, 4);
        assert!(idx.get(&sampled).is_some());
        assert!(idx.get(&unsampled).is_none());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut idx = DeltaIndex::new(4, 1000);
        for i in 0..20u8 {
            idx.put(&name(i), u64::from(i)).unwrap();
        }
        let bytes = idx.encode();
        let decoded = DeltaIndex::decode(&bytes, 1000).unwrap();
        for i in 0..20u8 {
            assert_eq!(decoded.get(&name(i)).unwrap().vcn, u64::from(i));
        }
    }
}
