// Statistics surface (spec.md §6 names `get_stats` but leaves its fields
// unspecified; this fills in the detail a caller of a dedup-advice index
// actually needs to drive its own metrics).

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-zone counters, updated only by that zone's own worker thread so a
/// relaxed load/store is sufficient — no zone ever touches another zone's
/// counters.
#[derive(Default)]
pub(crate) struct ZoneStats {
    pub entries_accessed: AtomicU64,
    pub entries_stored: AtomicU64,
    pub overflows: AtomicU64,
    pub collisions: AtomicU64,
}

impl ZoneStats {
    fn snapshot(&self) -> ZoneStatsSnapshot {
        ZoneStatsSnapshot {
            entries_accessed: self.entries_accessed.load(Ordering::Relaxed),
            entries_stored: self.entries_stored.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ZoneStatsSnapshot {
    pub entries_accessed: u64,
    pub entries_stored: u64,
    pub overflows: u64,
    pub collisions: u64,
}

/// Volume-wide I/O counters.
#[derive(Default)]
pub(crate) struct VolumeStats {
    pub disk_reads: AtomicU64,
    pub disk_writes: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeStatsSnapshot {
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl VolumeStats {
    fn snapshot(&self) -> VolumeStatsSnapshot {
        VolumeStatsSnapshot {
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexStats {
    pub zones: [ZoneStatsSnapshot; 16],
    pub zone_count: u32,
    pub entries_indexed: u64,
    pub volume: VolumeStatsSnapshot,
}

impl IndexStats {
    pub(crate) fn collect<'a>(
        zones: impl IntoIterator<Item = &'a ZoneStats>,
        volume: &VolumeStats,
        entries_indexed: u64,
    ) -> Self {
        let mut snapshot = Self {
            entries_indexed,
            volume: volume.snapshot(),
            ..Self::default()
        };
        let mut zone_count = 0u32;
        for (slot, zone) in snapshot.zones.iter_mut().zip(zones) {
            *slot = zone.snapshot();
            zone_count += 1;
        }
        snapshot.zone_count = zone_count;
        snapshot
    }
}
