// The open chapter: an in-memory hashed scatter table accumulating puts
// for the chapter currently being written. Once full, a zone closes it and
// hands it to the chapter writer to be packed onto disk (spec.md §4.2).

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::name::RecordName;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OpenChapterRecord {
    pub metadata: [u8; 16],
}

/// A single zone's share of the chapter currently being filled. Capacity is
/// `records_per_chapter` divided across the zone count, rounded up, so the
/// chapter as a whole never holds more than `records_per_chapter` records.
#[derive(Clone, Debug)]
pub struct OpenChapter {
    records: FxHashMap<RecordName, OpenChapterRecord>,
    capacity: usize,
}

impl OpenChapter {
    #[must_use]
    pub fn new(geometry: &Geometry, zone_count: u32) -> Self {
        let per_zone = (geometry.records_per_chapter() as usize).div_ceil(zone_count.max(1) as usize);
        Self {
            records: FxHashMap::default(),
            capacity: per_zone,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    #[must_use]
    pub fn remaining_slots(&self) -> usize {
        self.capacity.saturating_sub(self.records.len())
    }

    #[must_use]
    pub fn get(&self, name: &RecordName) -> Option<&OpenChapterRecord> {
        self.records.get(name)
    }

    /// Adds or overwrites a record. Fails with `Error::Overflow` if the
    /// chapter is already full and `name` is new — the caller (the zone)
    /// must close the chapter and start a new one, it is not a fatal error.
    pub fn put(&mut self, name: RecordName, record: OpenChapterRecord) -> Result<()> {
        if !self.records.contains_key(&name) && self.is_full() {
            return Err(Error::Overflow { zone: 0, list: 0 });
        }
        self.records.insert(name, record);
        Ok(())
    }

    pub fn remove(&mut self, name: &RecordName) -> bool {
        self.records.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Returns entries sorted by name, the order in which the chapter
    /// writer packs them into record pages.
    #[must_use]
    pub fn sorted_entries(&self) -> Vec<(RecordName, OpenChapterRecord)> {
        let mut entries: Vec<_> = self.records.iter().map(|(n, r)| (*n, *r)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Snapshot form used by the save-slot open-chapter region.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.capacity as u64).to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for (name, record) in &self.records {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&record.metadata);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let capacity = u64::from_le_bytes(
            bytes
                .get(0..8)
                .ok_or_else(|| Error::CorruptData("truncated open chapter snapshot".into()))?
                .try_into()
                .unwrap(),
        ) as usize;
        let count = u32::from_le_bytes(
            bytes
                .get(8..12)
                .ok_or_else(|| Error::CorruptData("truncated open chapter snapshot".into()))?
                .try_into()
                .unwrap(),
        );
        let mut records = FxHashMap::default();
        let mut pos = 12usize;
        for _ in 0..count {
            let chunk = bytes
                .get(pos..pos + OPEN_CHAPTER_ENTRY_SIZE)
                .ok_or_else(|| Error::CorruptData("truncated open chapter entry".into()))?;
            let mut name = [0u8; 16];
            name.copy_from_slice(&chunk[0..16]);
            let mut metadata = [0u8; 16];
            metadata.copy_from_slice(&chunk[16..32]);
            records.insert(RecordName::new(name), OpenChapterRecord { metadata });
            pos += OPEN_CHAPTER_ENTRY_SIZE;
        }
        Ok(Self { records, capacity })
    }
}

const OPEN_CHAPTER_ENTRY_SIZE: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn name(byte: u8) -> RecordName {
        RecordName::new([byte; 16])
    }

    fn record(byte: u8) -> OpenChapterRecord {
        OpenChapterRecord { metadata: [byte; 16] }
    }

    #[test]
    fn put_then_get() {
        let geometry = Geometry::default();
        let mut chapter = OpenChapter::new(&geometry, 1);
        chapter.put(name(1), record(9)).unwrap();
        assert_eq!(chapter.get(&name(1)).unwrap().metadata, [9; 16]);
    }

    #[test]
    fn full_chapter_rejects_new_names_but_allows_updates() {
        let geometry = Geometry::default();
        let mut chapter = OpenChapter::new(&geometry, 1);
        for i in 0..chapter.capacity as u8 {
            chapter.put(name(i), record(i)).unwrap();
        }
        assert!(chapter.is_full());
        assert!(chapter.put(name(0), record(99)).is_ok());
        assert!(chapter.put(name(200), record(1)).is_err());
    }

    #[test]
    fn sorted_entries_are_ordered_by_name() {
        let geometry = Geometry::default();
        let mut chapter = OpenChapter::new(&geometry, 1);
        chapter.put(name(5), record(1)).unwrap();
        chapter.put(name(1), record(2)).unwrap();
        let entries = chapter.sorted_entries();
        assert!(entries[0].0 < entries[1].0);
    }
}
