// The on-disk config region: an encoded `Geometry` plus the handful of
// session-wide parameters (zone count, sparse cache capacity, read-thread
// count, checkpoint frequency) that must match across every open of the
// same volume (spec.md §4.8). Two wire variants exist, matching the
// original format's `6.02`/`8.02` generations: `8.02` adds a pair of
// chapter-remap fields that let a volume shrink by one chapter; this
// implementation decodes them but `Config::open` (session.rs) rejects any
// non-default remap, per spec.md §9 open question (c).

use crate::error::{Error, Result};
use crate::geometry::Geometry;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChapterRemap {
    pub remapped_virtual: u64,
    pub remapped_physical: u64,
}

impl ChapterRemap {
    #[must_use]
    pub fn none() -> Self {
        Self {
            remapped_virtual: 0,
            remapped_physical: 0,
        }
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::none()
    }
}

/// Which wire generation a config record was written as.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigVersion {
    /// `6.02`: geometry + session parameters, no remap fields.
    V6_02,
    /// `8.02`: adds `ChapterRemap`.
    V8_02,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigRecord {
    pub geometry: Geometry,
    pub zone_count: u32,
    pub cache_chapters: u32,
    pub read_threads: u32,
    pub checkpoint_frequency: u32,
    pub remap: ChapterRemap,
}

impl ConfigRecord {
    #[must_use]
    pub fn version(&self) -> ConfigVersion {
        if self.remap.is_default() {
            ConfigVersion::V6_02
        } else {
            ConfigVersion::V8_02
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.geometry.records_per_page.to_le_bytes());
        out.extend_from_slice(&self.geometry.record_pages_per_chapter.to_le_bytes());
        out.extend_from_slice(&self.geometry.index_pages_per_chapter.to_le_bytes());
        out.extend_from_slice(&self.geometry.chapters_per_volume.to_le_bytes());
        out.extend_from_slice(&self.geometry.sparse_chapters_per_volume.to_le_bytes());
        out.extend_from_slice(&self.geometry.sparse_sample_rate.to_le_bytes());
        out.extend_from_slice(&self.zone_count.to_le_bytes());
        out.extend_from_slice(&self.cache_chapters.to_le_bytes());
        out.extend_from_slice(&self.read_threads.to_le_bytes());
        out.extend_from_slice(&self.checkpoint_frequency.to_le_bytes());
        out.extend_from_slice(&self.remap.remapped_virtual.to_le_bytes());
        out.extend_from_slice(&self.remap.remapped_physical.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
            let slice = bytes
                .get(*pos..*pos + 4)
                .ok_or_else(|| Error::CorruptComponent("truncated config record".into()))?;
            *pos += 4;
            Ok(u32::from_le_bytes(slice.try_into().unwrap()))
        }
        fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
            let slice = bytes
                .get(*pos..*pos + 8)
                .ok_or_else(|| Error::CorruptComponent("truncated config record".into()))?;
            *pos += 8;
            Ok(u64::from_le_bytes(slice.try_into().unwrap()))
        }

        let mut pos = 0usize;
        let records_per_page = read_u32(bytes, &mut pos)?;
        let record_pages_per_chapter = read_u32(bytes, &mut pos)?;
        let index_pages_per_chapter = read_u32(bytes, &mut pos)?;
        let chapters_per_volume = read_u32(bytes, &mut pos)?;
        let sparse_chapters_per_volume = read_u32(bytes, &mut pos)?;
        let sparse_sample_rate = read_u32(bytes, &mut pos)?;
        let zone_count = read_u32(bytes, &mut pos)?;
        let cache_chapters = read_u32(bytes, &mut pos)?;
        let read_threads = read_u32(bytes, &mut pos)?;
        let checkpoint_frequency = read_u32(bytes, &mut pos)?;
        let remapped_virtual = read_u64(bytes, &mut pos)?;
        let remapped_physical = read_u64(bytes, &mut pos)?;

        let geometry = Geometry::new(
            records_per_page,
            record_pages_per_chapter,
            index_pages_per_chapter,
            chapters_per_volume,
            sparse_chapters_per_volume,
            sparse_sample_rate,
        )?;

        Ok(Self {
            geometry,
            zone_count,
            cache_chapters,
            read_threads,
            checkpoint_frequency,
            remap: ChapterRemap {
                remapped_virtual,
                remapped_physical,
            },
        })
    }
}
