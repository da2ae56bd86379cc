// Volume index: name -> most-recent VCN hint, sharded into zone_count
// independent shards. Each shard carries both a dense delta index (the
// dense band of the window) and a sparse delta index (sampled names,
// tracked across the full window) — spec.md §4.1.
//
// Each shard is owned by its zone worker but wrapped in a `Mutex` so the
// triage stage (running on its own thread) can take a cheap, read-only
// lookup without routing a message through the zone's own queue (spec.md
// §4.5 describes this as a direct, read-only consult of the volume index).
// Contention is negligible in practice: only the owning zone ever writes.

mod zone_index;

pub use zone_index::{Record, Triage, ZoneVolumeIndex};

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::geometry::Geometry;
use crate::name::RecordName;

pub struct VolumeIndex {
    geometry: Geometry,
    zone_count: u32,
    zones: Vec<Arc<Mutex<ZoneVolumeIndex>>>,
}

impl VolumeIndex {
    #[must_use]
    pub fn new(geometry: Geometry, zone_count: u32) -> Self {
        let zones = (0..zone_count)
            .map(|_| Arc::new(Mutex::new(ZoneVolumeIndex::new(geometry))))
            .collect();
        Self {
            geometry,
            zone_count,
            zones,
        }
    }

    #[must_use]
    pub fn zone_count(&self) -> u32 {
        self.zone_count
    }

    #[must_use]
    pub fn zone_of(&self, name: &RecordName) -> u32 {
        name.zone(self.zone_count)
    }

    #[must_use]
    pub fn zone_handle(&self, zone_id: u32) -> Arc<Mutex<ZoneVolumeIndex>> {
        Arc::clone(&self.zones[zone_id as usize])
    }

    pub fn zone_lock(&self, zone_id: u32) -> MutexGuard<'_, ZoneVolumeIndex> {
        self.zones[zone_id as usize]
            .lock()
            .expect("zone volume index mutex poisoned")
    }

    /// Cheap, read-only lookup used by the triage stage to decide whether a
    /// sparse barrier must be broadcast before this request reaches its
    /// zone (spec.md §4.5).
    #[must_use]
    pub fn lookup(&self, name: &RecordName) -> Triage {
        let zone_id = self.zone_of(name);
        self.zone_lock(zone_id).lookup(name, &self.geometry)
    }

    /// Advances the rolling window for every zone at once (used on a clean
    /// load and by rebuild, where all zones observe the same window
    /// simultaneously rather than interleaved through per-zone chapter
    /// closes).
    pub fn set_open_chapter(&self, vcn: u64) {
        for zone in &self.zones {
            zone.lock()
                .expect("zone volume index mutex poisoned")
                .set_open_chapter(vcn, &self.geometry);
        }
    }

    pub fn set_zone_open_chapter(&self, zone_id: u32, vcn: u64) {
        self.zone_lock(zone_id).set_open_chapter(vcn, &self.geometry);
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Total live dense entries across all zones plus their sparse shards —
    /// used by `get_stats`.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.zones
            .iter()
            .map(|z| z.lock().expect("zone volume index mutex poisoned").entry_count())
            .sum()
    }

    /// Serializes every zone shard in order, for the save-slot snapshot.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.zone_count.to_le_bytes());
        for zone in &self.zones {
            let bytes = zone
                .lock()
                .expect("zone volume index mutex poisoned")
                .encode()?;
            out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8], geometry: Geometry) -> Result<Self> {
        use crate::error::Error;

        let zone_count = u32::from_le_bytes(
            bytes
                .get(0..4)
                .ok_or_else(|| Error::CorruptData("truncated volume index header".into()))?
                .try_into()
                .unwrap(),
        );
        let mut pos = 4usize;
        let mut zones = Vec::with_capacity(zone_count as usize);
        for _ in 0..zone_count {
            let len = u64::from_le_bytes(
                bytes
                    .get(pos..pos + 8)
                    .ok_or_else(|| Error::CorruptData("truncated zone length".into()))?
                    .try_into()
                    .unwrap(),
            ) as usize;
            pos += 8;
            let zone_bytes = bytes
                .get(pos..pos + len)
                .ok_or_else(|| Error::CorruptData("truncated zone body".into()))?;
            pos += len;
            zones.push(Arc::new(Mutex::new(ZoneVolumeIndex::decode(zone_bytes, geometry)?)));
        }
        Ok(Self {
            geometry,
            zone_count,
            zones,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn routes_names_to_stable_zones() {
        let idx = VolumeIndex::new(Geometry::default(), 4);
        let name = RecordName::new([42; 16]);
        assert_eq!(idx.zone_of(&name), idx.zone_of(&name));
    }

    #[test]
    fn set_open_chapter_advances_every_zone() {
        let idx = VolumeIndex::new(Geometry::default(), 2);
        idx.set_open_chapter(5);
        assert_eq!(idx.zone_lock(0).newest_vcn(), 5);
        assert_eq!(idx.zone_lock(1).newest_vcn(), 5);
    }
}
