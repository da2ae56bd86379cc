// One zone's shard of the volume index: a dense delta index covering the
// dense band of the rolling window, plus this zone's share of the sparse
// delta index covering sampled names across the full window (spec.md
// §4.1). Every name routes to exactly one zone (spec.md invariant 2), so
// a `ZoneVolumeIndex` never needs to know about any other zone's entries.

use crate::delta_index::DeltaIndex;
use crate::error::Result;
use crate::geometry::Geometry;
use crate::name::RecordName;

/// Result of a cheap, read-only lookup — used by the triage stage to
/// decide whether a sparse-cache barrier must be broadcast before the
/// request reaches its owning zone (spec.md §4.5).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Triage {
    /// The name has a hint, and that hint currently lives in the sparse
    /// band of the window rather than the dense band.
    pub in_sampled_chapter: bool,
    /// The VCN of the most recent hint, if any.
    pub virtual_chapter: Option<u64>,
}

/// Result of resolving a name against this zone's shard, prior to any
/// record-page confirmation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub found: bool,
    pub is_collision: bool,
    pub vcn: Option<u64>,
    /// The hint was found in the sparse shard rather than the dense one.
    pub from_sparse: bool,
}

fn list_count(geometry: &Geometry) -> u32 {
    geometry.dense_chapters_per_volume().max(1) * 4
}

fn max_entries_per_list(geometry: &Geometry) -> usize {
    let total = u64::from(geometry.records_per_chapter()) * u64::from(geometry.dense_chapters_per_volume());
    ((total / u64::from(list_count(geometry)).max(1)) as usize).max(16)
}

fn sparse_list_count(geometry: &Geometry) -> u32 {
    list_count(geometry).max(1)
}

fn sparse_max_entries_per_list(geometry: &Geometry) -> usize {
    let total = u64::from(geometry.records_per_chapter())
        * u64::from(geometry.chapters_per_volume)
        / u64::from(geometry.sparse_sample_rate.max(1));
    ((total / u64::from(sparse_list_count(geometry)).max(1)) as usize).max(16)
}

#[derive(Clone, Debug)]
pub struct ZoneVolumeIndex {
    dense: DeltaIndex,
    sparse: DeltaIndex,
    oldest_vcn: u64,
    newest_vcn: u64,
}

impl ZoneVolumeIndex {
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            dense: DeltaIndex::new(list_count(&geometry), max_entries_per_list(&geometry)),
            sparse: DeltaIndex::new(sparse_list_count(&geometry), sparse_max_entries_per_list(&geometry)),
            oldest_vcn: 0,
            newest_vcn: 0,
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &RecordName, _geometry: &Geometry) -> Triage {
        if let Some(entry) = self.dense.get(name) {
            return Triage {
                in_sampled_chapter: false,
                virtual_chapter: Some(entry.vcn),
            };
        }
        if let Some(entry) = self.sparse.get(name) {
            return Triage {
                in_sampled_chapter: true,
                virtual_chapter: Some(entry.vcn),
            };
        }
        Triage {
            in_sampled_chapter: false,
            virtual_chapter: None,
        }
    }

    #[must_use]
    pub fn get_record(&self, name: &RecordName) -> Record {
        if let Some(entry) = self.dense.get(name) {
            return Record {
                found: true,
                is_collision: entry.is_collision,
                vcn: Some(entry.vcn),
                from_sparse: false,
            };
        }
        if let Some(entry) = self.sparse.get(name) {
            return Record {
                found: true,
                is_collision: entry.is_collision,
                vcn: Some(entry.vcn),
                from_sparse: true,
            };
        }
        Record {
            found: false,
            is_collision: false,
            vcn: None,
            from_sparse: false,
        }
    }

    /// Records a hint for `name` pointing at `vcn`. Always recorded in the
    /// dense index; additionally recorded in the sparse index when the name
    /// is a sparse sample, so it remains discoverable after the chapter
    /// ages into the sparse band.
    pub fn put(&mut self, name: &RecordName, vcn: u64, sample_rate: u32) -> Result<()> {
        self.dense.put(name, vcn)?;
        if name.is_sparse_sample(sample_rate) {
            self.sparse.put(name, vcn)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn set_chapter(&mut self, name: &RecordName, vcn: u64) -> bool {
        let dense = self.dense.set_chapter(name, vcn);
        let sparse = self.sparse.set_chapter(name, vcn);
        dense || sparse
    }

    #[must_use]
    pub fn remove(&mut self, name: &RecordName) -> bool {
        let dense = self.dense.remove(name);
        let sparse = self.sparse.remove(name);
        dense || sparse
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.dense.record_count() + self.sparse.record_count()
    }

    #[must_use]
    pub fn oldest_vcn(&self) -> u64 {
        self.oldest_vcn
    }

    #[must_use]
    pub fn newest_vcn(&self) -> u64 {
        self.newest_vcn
    }

    /// Advances the rolling window to make `vcn` the newest open chapter.
    /// Demotes the chapter that newly crosses into the sparse band, and
    /// purges (from both indexes) any chapter that falls out of the window
    /// entirely (spec.md §4.1/§4.4).
    pub fn set_open_chapter(&mut self, vcn: u64, geometry: &Geometry) {
        if vcn <= self.newest_vcn && self.newest_vcn != 0 {
            return;
        }
        self.newest_vcn = vcn;
        let window = geometry.chapters_to_expire(self.oldest_vcn, self.newest_vcn);
        let new_oldest = self.oldest_vcn + window;

        for expiring in self.oldest_vcn..new_oldest {
            self.dense.purge_chapter(expiring);
            self.sparse.purge_chapter(expiring);
        }
        self.oldest_vcn = new_oldest;

        if geometry.sparse_chapters_per_volume > 0 {
            for vcn in self.oldest_vcn..self.newest_vcn {
                if geometry.is_sparse_chapter(self.oldest_vcn, vcn) {
                    self.dense.demote_chapter_to_sparse(vcn, geometry.sparse_sample_rate);
                }
            }
        }
    }

    #[must_use]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.oldest_vcn.to_le_bytes());
        out.extend_from_slice(&self.newest_vcn.to_le_bytes());
        let dense = self.dense.encode();
        out.extend_from_slice(&(dense.len() as u64).to_le_bytes());
        out.extend_from_slice(&dense);
        let sparse = self.sparse.encode();
        out.extend_from_slice(&(sparse.len() as u64).to_le_bytes());
        out.extend_from_slice(&sparse);
        Ok(out)
    }

    pub fn decode(bytes: &[u8], geometry: Geometry) -> Result<Self> {
        use crate::error::Error;

        let mut pos = 0usize;
        let read_u64 = |bytes: &[u8], pos: &mut usize| -> Result<u64> {
            let slice = bytes
                .get(*pos..*pos + 8)
                .ok_or_else(|| Error::CorruptData("truncated zone volume index".into()))?;
            *pos += 8;
            Ok(u64::from_le_bytes(slice.try_into().unwrap()))
        };

        let oldest_vcn = read_u64(bytes, &mut pos)?;
        let newest_vcn = read_u64(bytes, &mut pos)?;

        let dense_len = read_u64(bytes, &mut pos)? as usize;
        let dense_bytes = bytes
            .get(pos..pos + dense_len)
            .ok_or_else(|| Error::CorruptData("truncated dense delta index".into()))?;
        pos += dense_len;
        let dense = DeltaIndex::decode(dense_bytes, max_entries_per_list(&geometry))?;

        let sparse_len = read_u64(bytes, &mut pos)? as usize;
        let sparse_bytes = bytes
            .get(pos..pos + sparse_len)
            .ok_or_else(|| Error::CorruptData("truncated sparse delta index".into()))?;
        let sparse = DeltaIndex::decode(sparse_bytes, sparse_max_entries_per_list(&geometry))?;

        Ok(Self {
            dense,
            sparse,
            oldest_vcn,
            newest_vcn,
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
    fn put_then_lookup_reports_dense() {
        let geometry = Geometry::default();
        let mut zone = ZoneVolumeIndex::new(geometry);
        zone.put(&name(1), 3, geometry.sparse_sample_rate).unwrap();
        let triage = zone.lookup(&name(1), &geometry);
        assert_eq!(triage.virtual_chapter, Some(3));
        assert!(!triage.in_sampled_chapter);
    }

    #[test]
    fn remove_clears_hint() {
        let geometry = Geometry::default();
        let mut zone = ZoneVolumeIndex::new(geometry);
        zone.put(&name(1), 3, geometry.sparse_sample_rate).unwrap();
        assert!(zone.remove(&name(1)));
        assert!(!zone.lookup(&name(1), &geometry).virtual_chapter.is_some());
    }

    #[test]
    fn window_advance_purges_expired_chapters() {
        let geometry = Geometry::default();
        let mut zone = ZoneVolumeIndex::new(geometry);
        zone.put(&name(1), 0, geometry.sparse_sample_rate).unwrap();
        for vcn in 1..geometry.chapters_per_volume as u64 + 3 {
            zone.set_open_chapter(vcn, &geometry);
        }
        assert!(zone.lookup(&name(1), &geometry).virtual_chapter.is_none());
    }

    #[test]
    fn encode_decode_round_trip() {
        let geometry = Geometry::default();
        let mut zone = ZoneVolumeIndex::new(geometry);
        zone.put(&name(1), 2, geometry.sparse_sample_rate).unwrap();
        zone.set_open_chapter(3, &geometry);

        let bytes = zone.encode().unwrap();
        let decoded = ZoneVolumeIndex::decode(&bytes, geometry).unwrap();
        assert_eq!(decoded.newest_vcn(), 3);
        assert_eq!(
            decoded.lookup(&name(1), &geometry).virtual_chapter,
            zone.lookup(&name(1), &geometry).virtual_chapter
        );
    }
}
