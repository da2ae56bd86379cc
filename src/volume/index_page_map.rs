// Maps each record page in a chapter to the largest name it holds, so a
// lookup can binary-search straight to the one record page that might
// contain a name instead of scanning the whole chapter (spec.md §4.3).

use crate::error::{Error, Result};
use crate::name::{RecordName, NAME_SIZE};

#[derive(Clone, Debug, Default)]
pub struct IndexPageMap {
    /// boundaries[i] is the largest name stored on record page i.
    boundaries: Vec<RecordName>,
}

impl IndexPageMap {
    #[must_use]
    pub fn build(sorted_entries: &[RecordName], records_per_page: usize) -> Self {
        let boundaries = sorted_entries
            .chunks(records_per_page.max(1))
            .map(|chunk| *chunk.last().expect("chunks are never empty"))
            .collect();
        Self { boundaries }
    }

    /// The record page index that would hold `name`, were it present.
    #[must_use]
    pub fn page_for(&self, name: &RecordName) -> usize {
        self.boundaries.partition_point(|boundary| boundary < name)
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.boundaries.len()
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.boundaries.len() * NAME_SIZE);
        out.extend_from_slice(&(self.boundaries.len() as u32).to_le_bytes());
        for name in &self.boundaries {
            out.extend_from_slice(name.as_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let count = u32::from_le_bytes(
            bytes
                .get(0..4)
                .ok_or_else(|| Error::CorruptComponent("index page map header".into()))?
                .try_into()
                .unwrap(),
        ) as usize;
        let mut boundaries = Vec::with_capacity(count);
        let mut pos = 4usize;
        for _ in 0..count {
            let chunk = bytes
                .get(pos..pos + NAME_SIZE)
                .ok_or_else(|| Error::CorruptComponent("index page map boundary".into()))?;
            let mut name = [0u8; NAME_SIZE];
            name.copy_from_slice(chunk);
            boundaries.push(RecordName::new(name));
            pos += NAME_SIZE;
        }
        Ok(Self { boundaries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn page_for_matches_build_chunking() {
        let names: Vec<_> = (0..10u8).map(|b| RecordName::new([b; 16])).collect();
        let map = IndexPageMap::build(&names, 4);
        assert_eq!(map.page_count(), 3);
        assert_eq!(map.page_for(&names[0]), 0);
        assert_eq!(map.page_for(&names[4]), 1);
        assert_eq!(map.page_for(&names[9]), 2);
    }

    #[test]
    fn encode_decode_round_trip() {
        let names: Vec<_> = (0..5u8).map(|b| RecordName::new([b; 16])).collect();
        let map = IndexPageMap::build(&names, 2);
        let decoded = IndexPageMap::decode(&map.encode()).unwrap();
        assert_eq!(decoded.page_count(), map.page_count());
        assert_eq!(decoded.page_for(&names[4]), map.page_for(&names[4]));
    }
}
