// The volume: the circular on-disk store of `chapters_per_volume` chapters
// (spec.md §4.3). Each chapter is a fixed-size run of index pages followed
// by record pages; the physical chapter a VCN occupies is
// `vcn % chapters_per_volume`, so writing a new chapter always overwrites
// the oldest one still on disk.

mod chapter_io;
mod index_page_map;
mod page_cache;

pub use chapter_io::{ChapterReader, ChapterWriter};
pub use index_page_map::IndexPageMap;
pub use page_cache::PageCache;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::geometry::Geometry;
use crate::name::RecordName;
use crate::open_chapter::OpenChapterRecord;

/// The on-disk chapter store plus its read-thread page cache.
pub struct Volume {
    file: File,
    path: PathBuf,
    geometry: Geometry,
    cache: PageCache,
}

impl Volume {
    pub fn create(path: impl AsRef<Path>, geometry: Geometry, cache_chapters: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(geometry.volume_size_bytes())?;
        Ok(Self {
            file,
            path,
            geometry,
            cache: PageCache::new(cache_chapters.max(1)),
        })
    }

    pub fn open(path: impl AsRef<Path>, geometry: Geometry, cache_chapters: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self {
            file,
            path,
            geometry,
            cache: PageCache::new(cache_chapters.max(1)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Packs a closed chapter's records onto disk at `vcn`'s physical slot,
    /// sorted by name so the record page search can binary-search, plus an
    /// index page map locating each name's record page (spec.md §4.3).
    pub fn write_chapter(&mut self, vcn: u64, entries: &[(RecordName, OpenChapterRecord)]) -> Result<()> {
        let physical = self.geometry.physical_chapter(vcn);
        ChapterWriter::new(&mut self.file, &self.geometry, physical).write(vcn, entries)?;
        self.cache.invalidate(physical);
        Ok(())
    }

    /// Looks up `name` in the chapter occupying `vcn`'s physical slot,
    /// confirming (or refuting) a volume-index hint. Reads go through the
    /// page cache so a hot chapter's index pages are not re-read from disk
    /// on every lookup (spec.md §4.3).
    pub fn search_chapter(&mut self, vcn: u64, name: &RecordName) -> Result<Option<OpenChapterRecord>> {
        let physical = self.geometry.physical_chapter(vcn);
        let reader = ChapterReader::new(&self.file, &self.geometry, physical);
        self.cache.search(physical, &reader, name)
    }

    /// Scans every physical chapter slot's header (cheap: no record pages
    /// are read) and returns the VCNs present on disk, used by rebuild to
    /// find `[lowest_vcn, highest_vcn]` before replaying any records
    /// (spec.md §4.3 `find_volume_chapter_boundaries`). Divides the
    /// physical range across `read_threads` concurrent readers, modeling
    /// the volume's read-thread pool (spec.md §5).
    pub fn find_chapter_boundaries(&self, read_threads: usize) -> Result<Vec<u64>> {
        let read_threads = read_threads.max(1).min(self.geometry.chapters_per_volume.max(1) as usize);
        let chunk = (self.geometry.chapters_per_volume as usize).div_ceil(read_threads);
        let geometry = self.geometry;
        let path = self.path.clone();

        std::thread::scope(|scope| -> Result<Vec<u64>> {
            let mut handles = Vec::with_capacity(read_threads);
            for worker in 0..read_threads {
                let start = worker * chunk;
                let end = ((worker + 1) * chunk).min(geometry.chapters_per_volume as usize);
                let path = path.clone();
                handles.push(scope.spawn(move || -> Result<Vec<u64>> {
                    if start >= end {
                        return Ok(Vec::new());
                    }
                    let file = File::open(&path)?;
                    let mut found = Vec::new();
                    for physical in start..end {
                        let reader = ChapterReader::new(&file, &geometry, physical as u32);
                        if let Some(vcn) = reader.vcn_if_present()? {
                            found.push(vcn);
                        }
                    }
                    Ok(found)
                }));
            }
            let mut all = Vec::new();
            for handle in handles {
                all.extend(handle.join().expect("chapter boundary scan thread panicked")?);
            }
            Ok(all)
        })
    }

    /// Returns `(vcn, entries)` for every chapter on disk whose stored VCN
    /// is within `[oldest_vcn, newest_vcn]`, in ascending VCN order — the
    /// read path used by rebuild (spec.md §6.4).
    pub fn scan_chapters_in_order(
        &self,
        oldest_vcn: u64,
        newest_vcn: u64,
    ) -> Result<Vec<(u64, Vec<(RecordName, OpenChapterRecord)>)>> {
        let mut found = Vec::new();
        for physical in 0..self.geometry.chapters_per_volume {
            let reader = ChapterReader::new(&self.file, &self.geometry, physical);
            if let Some((vcn, entries)) = reader.read_if_in_range(oldest_vcn, newest_vcn)? {
                found.push((vcn, entries));
            }
        }
        found.sort_by_key(|(vcn, _)| *vcn);
        Ok(found)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn entry(byte: u8) -> (RecordName, OpenChapterRecord) {
        (
            RecordName::new([byte; 16]),
            OpenChapterRecord { metadata: [byte; 16] },
        )
    }

    #[test]
    fn write_then_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::default();
        let mut volume = Volume::create(dir.path().join("volume"), geometry, 2).unwrap();

        let entries = vec![entry(1), entry(2), entry(3)];
        volume.write_chapter(0, &entries).unwrap();

        let found = volume.search_chapter(0, &RecordName::new([2; 16])).unwrap();
        assert_eq!(found.unwrap().metadata, [2; 16]);

        let missing = volume.search_chapter(0, &RecordName::new([99; 16])).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn search_finds_names_across_full_and_partial_pages() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::default();
        let mut volume = Volume::create(dir.path().join("volume"), geometry, 2).unwrap();

        // records_per_page == 16, so this fills page 0 entirely and leaves
        // page 1 holding only 3 records — the binary search within a page
        // must stop at the actual record count, not the page's capacity.
        let entries: Vec<_> = (0..19u8).map(entry).collect();
        volume.write_chapter(0, &entries).unwrap();

        let last_on_full_page = volume.search_chapter(0, &RecordName::new([15; 16])).unwrap();
        assert_eq!(last_on_full_page.unwrap().metadata, [15; 16]);

        let on_partial_page = volume.search_chapter(0, &RecordName::new([18; 16])).unwrap();
        assert_eq!(on_partial_page.unwrap().metadata, [18; 16]);

        let missing = volume.search_chapter(0, &RecordName::new([200; 16])).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::default();
        let path = dir.path().join("volume");
        {
            let mut volume = Volume::create(&path, geometry, 2).unwrap();
            volume.write_chapter(0, &[entry(7)]).unwrap();
            volume.sync().unwrap();
        }
        let mut reopened = Volume::open(&path, geometry, 2).unwrap();
        let found = reopened.search_chapter(0, &RecordName::new([7; 16])).unwrap();
        assert!(found.is_some());
    }
}
