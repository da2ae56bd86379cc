// Fixed per-instance parameters that define chapter/page sizes (spec.md §3).
//
// Immutable once an index is created: geometry is baked into the config
// region on open/create and never changes across load/rebuild.

use crate::error::{Error, Result};

/// Bytes per on-disk page. Fixed by the format, not configurable.
pub const BYTES_PER_PAGE: u32 = 4096;

/// Fixed-size metadata payload (a physical block address, in VDO terms)
/// stored alongside each name.
pub const METADATA_SIZE: usize = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Geometry {
    pub records_per_page: u32,
    pub record_pages_per_chapter: u32,
    pub index_pages_per_chapter: u32,
    pub chapters_per_volume: u32,
    pub sparse_chapters_per_volume: u32,
    pub sparse_sample_rate: u32,
}

impl Geometry {
    pub fn new(
        records_per_page: u32,
        record_pages_per_chapter: u32,
        index_pages_per_chapter: u32,
        chapters_per_volume: u32,
        sparse_chapters_per_volume: u32,
        sparse_sample_rate: u32,
    ) -> Result<Self> {
        let geometry = Self {
            records_per_page,
            record_pages_per_chapter,
            index_pages_per_chapter,
            chapters_per_volume,
            sparse_chapters_per_volume,
            sparse_sample_rate,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    fn validate(&self) -> Result<()> {
        if self.records_per_page == 0
            || self.record_pages_per_chapter == 0
            || self.chapters_per_volume == 0
        {
            return Err(Error::InvalidArgument(
                "geometry parameters must be non-zero".into(),
            ));
        }
        if self.sparse_chapters_per_volume >= self.chapters_per_volume {
            return Err(Error::InvalidArgument(
                "sparse_chapters_per_volume must be smaller than chapters_per_volume".into(),
            ));
        }
        if self.sparse_sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "sparse_sample_rate must be at least 1".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn pages_per_chapter(&self) -> u32 {
        self.index_pages_per_chapter + self.record_pages_per_chapter
    }

    #[must_use]
    pub fn records_per_chapter(&self) -> u32 {
        self.records_per_page * self.record_pages_per_chapter
    }

    #[must_use]
    pub fn dense_chapters_per_volume(&self) -> u32 {
        self.chapters_per_volume - self.sparse_chapters_per_volume
    }

    /// Physical chapter slot for a virtual chapter number.
    #[must_use]
    pub fn physical_chapter(&self, vcn: u64) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (vcn % u64::from(self.chapters_per_volume)) as u32
        }
    }

    /// Is the chapter at `vcn` within the sparse band of the active window
    /// `[oldest, newest)`? The sparse band is the `sparse_chapters_per_volume`
    /// chapters closest to `oldest` — the chapters nearest to aging out of
    /// the window entirely. As `oldest` advances, a chapter that was dense
    /// crosses into the sparse band before it is finally purged; this is the
    /// point at which its non-sampled entries are demoted (spec.md §4.1).
    #[must_use]
    pub fn is_sparse_chapter(&self, oldest_vcn: u64, vcn: u64) -> bool {
        if vcn < oldest_vcn {
            return false;
        }
        vcn - oldest_vcn < u64::from(self.sparse_chapters_per_volume)
    }

    /// Number of chapters to expire (move `oldest` forward by) once
    /// `newest_vcn` chapters have accumulated. The window never exceeds
    /// `chapters_per_volume` chapters (spec.md invariant 1/4).
    #[must_use]
    pub fn chapters_to_expire(&self, oldest_vcn: u64, newest_vcn: u64) -> u64 {
        let window = newest_vcn.saturating_sub(oldest_vcn);
        window.saturating_sub(u64::from(self.chapters_per_volume))
    }

    #[must_use]
    pub fn chapter_size_bytes(&self) -> u64 {
        u64::from(self.pages_per_chapter()) * u64::from(BYTES_PER_PAGE)
    }

    #[must_use]
    pub fn volume_size_bytes(&self) -> u64 {
        self.chapter_size_bytes() * u64::from(self.chapters_per_volume)
    }
}

impl Default for Geometry {
    /// A small test geometry: 16 records/page, 4 record pages/chapter, 2
    /// index pages/chapter, 8 chapters/volume, 2 sparse, sample rate 4 — the
    /// concrete scenario geometry used throughout spec.md §8.
    fn default() -> Self {
        Self {
            records_per_page: 16,
            record_pages_per_chapter: 4,
            index_pages_per_chapter: 2,
            chapters_per_volume: 8,
            sparse_chapters_per_volume: 2,
            sparse_sample_rate: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn default_geometry_matches_spec_scenarios() {
        let g = Geometry::default();
        assert_eq!(g.records_per_chapter(), 64);
        assert_eq!(g.pages_per_chapter(), 6);
        assert_eq!(g.dense_chapters_per_volume(), 6);
    }

    #[test]
    fn physical_chapter_wraps() {
        let g = Geometry::default();
        assert_eq!(g.physical_chapter(0), 0);
        assert_eq!(g.physical_chapter(8), 0);
        assert_eq!(g.physical_chapter(9), 1);
    }

    #[test]
    fn rejects_sparse_chapters_too_large() {
        assert!(Geometry::new(16, 4, 2, 8, 8, 4).is_err());
    }

    #[test]
    fn sparse_chapter_window() {
        let g = Geometry::default();
        // oldest = 1: sparse band is chapters 1,2 (closest to aging out)
        assert!(g.is_sparse_chapter(1, 1));
        assert!(g.is_sparse_chapter(1, 2));
        assert!(!g.is_sparse_chapter(1, 3));
    }

    #[test]
    fn chapters_to_expire_keeps_window_at_chapters_per_volume() {
        let g = Geometry::default(); // chapters_per_volume = 8
        assert_eq!(g.chapters_to_expire(0, 8), 0);
        assert_eq!(g.chapters_to_expire(0, 9), 1);
        // spec.md scenario 3: closing chapters 0..9 one at a time, oldest_vcn
        // must land on 1, not 3 — i.e. the window holds exactly 8 chapters.
        let mut oldest = 0u64;
        for newest in 1..=9u64 {
            oldest += g.chapters_to_expire(oldest, newest);
        }
        assert_eq!(oldest, 1);
    }
}
